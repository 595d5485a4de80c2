//! Composable notification index queries.
//!
//! # Responsibility
//! - Accumulate state, grouping, ordering, filter and paging choices as data.
//! - Provide the named index shapes (`all_index`, `unopened_index`,
//!   `opened_index`) and their group-member companions.
//!
//! # Invariants
//! - Filters are conjunctive; setting one never clears another.
//! - Ordering always ends with `id ASC` as a tie-breaker (see `sql`).

use crate::model::notification::{EntityRef, NotificationId};

/// Opened/unopened partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StateFilter {
    #[default]
    All,
    Unopened,
    /// Opened rows, at most `limit` of them.
    Opened { limit: u32 },
    /// Opened rows without a cap.
    ///
    /// Can return unbounded result sets. Only use when the opened set is
    /// already known to be small.
    OpenedUnbounded,
}

/// Owner/member selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GroupingMode {
    #[default]
    IncludeAll,
    OwnersOnly,
    MembersOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    /// `created_at DESC`.
    #[default]
    LatestFirst,
    /// `created_at ASC`.
    EarliestFirst,
}

impl SortOrder {
    pub fn from_reverse(reverse: bool) -> Self {
        if reverse {
            Self::EarliestFirst
        } else {
            Self::LatestFirst
        }
    }
}

/// Typed columns available to custom predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Id,
    Key,
    TargetType,
    TargetId,
    NotifiableType,
    NotifiableId,
    GroupType,
    GroupId,
    NotifierType,
    NotifierId,
    GroupOwnerId,
    OpenedAt,
    CreatedAt,
}

impl Column {
    pub(crate) fn as_sql(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Key => "key",
            Self::TargetType => "target_type",
            Self::TargetId => "target_id",
            Self::NotifiableType => "notifiable_type",
            Self::NotifiableId => "notifiable_id",
            Self::GroupType => "group_type",
            Self::GroupId => "group_id",
            Self::NotifierType => "notifier_type",
            Self::NotifierId => "notifier_id",
            Self::GroupOwnerId => "group_owner_id",
            Self::OpenedAt => "opened_at",
            Self::CreatedAt => "created_at",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparison {
    pub(crate) fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PredicateValue {
    Integer(i64),
    Text(String),
}

impl From<i64> for PredicateValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<&str> for PredicateValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for PredicateValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Caller-supplied structured filter, bound as SQL parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    Compare {
        column: Column,
        op: Comparison,
        value: PredicateValue,
    },
    IsNull(Column),
    IsNotNull(Column),
    /// Empty list matches nothing.
    In(Column, Vec<PredicateValue>),
}

impl Predicate {
    pub fn compare(column: Column, op: Comparison, value: impl Into<PredicateValue>) -> Self {
        Self::Compare {
            column,
            op,
            value: value.into(),
        }
    }
}

/// Structured notification query.
///
/// Built with chained methods and translated to SQL by the repository.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationQuery {
    pub(crate) state: StateFilter,
    pub(crate) grouping: GroupingMode,
    pub(crate) order: SortOrder,
    pub(crate) target: Option<EntityRef>,
    pub(crate) target_type: Option<String>,
    pub(crate) notifiable: Option<EntityRef>,
    pub(crate) notifiable_type: Option<String>,
    pub(crate) group: Option<(String, String)>,
    pub(crate) key: Option<String>,
    pub(crate) owner_ids: Option<Vec<NotificationId>>,
    pub(crate) owner_index: Option<Box<NotificationQuery>>,
    pub(crate) predicates: Vec<Predicate>,
    pub(crate) created_after: Option<i64>,
    pub(crate) limit: Option<u32>,
    pub(crate) offset: u32,
}

impl NotificationQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Owners, latest first unless `reverse`.
    pub fn all_index(reverse: bool, with_group_members: bool) -> Self {
        Self::index_shape(StateFilter::All, reverse, with_group_members)
    }

    /// Unopened owners, latest first unless `reverse`.
    pub fn unopened_index(reverse: bool, with_group_members: bool) -> Self {
        Self::index_shape(StateFilter::Unopened, reverse, with_group_members)
    }

    /// At most `limit` opened owners, latest first unless `reverse`.
    pub fn opened_index(limit: u32, reverse: bool, with_group_members: bool) -> Self {
        Self::index_shape(StateFilter::Opened { limit }, reverse, with_group_members)
    }

    fn index_shape(state: StateFilter, reverse: bool, with_group_members: bool) -> Self {
        let grouping = if with_group_members {
            GroupingMode::IncludeAll
        } else {
            GroupingMode::OwnersOnly
        };
        Self {
            state,
            grouping,
            order: SortOrder::from_reverse(reverse),
            ..Self::default()
        }
    }

    /// Members whose owner appears in this query's unopened index.
    ///
    /// Filters already set on `self` apply to both the owner index and the
    /// member rows.
    pub fn unopened_index_group_members_only(self) -> Self {
        let owners = self.clone().with_state(StateFilter::Unopened).owners_only();
        self.group_members_of_index(owners)
    }

    /// Members whose owner appears in this query's opened index of `limit`.
    pub fn opened_index_group_members_only(self, limit: u32) -> Self {
        let owners = self
            .clone()
            .with_state(StateFilter::Opened { limit })
            .owners_only();
        self.group_members_of_index(owners)
    }

    fn group_members_of_index(mut self, owners: NotificationQuery) -> Self {
        let owners = owners.latest_order().unpaged();
        self.state = StateFilter::All;
        self.owner_index = Some(Box::new(owners));
        self.members_only()
    }

    pub fn with_state(mut self, state: StateFilter) -> Self {
        self.state = state;
        self
    }

    pub fn unopened_only(self) -> Self {
        self.with_state(StateFilter::Unopened)
    }

    pub fn opened_only(self, limit: u32) -> Self {
        self.with_state(StateFilter::Opened { limit })
    }

    /// Opened rows without a cap. See [`StateFilter::OpenedUnbounded`].
    pub fn opened_only_unbounded(self) -> Self {
        self.with_state(StateFilter::OpenedUnbounded)
    }

    pub fn owners_only(mut self) -> Self {
        self.grouping = GroupingMode::OwnersOnly;
        self
    }

    pub fn members_only(mut self) -> Self {
        self.grouping = GroupingMode::MembersOnly;
        self
    }

    pub fn with_group_members(mut self) -> Self {
        self.grouping = GroupingMode::IncludeAll;
        self
    }

    pub fn latest_order(mut self) -> Self {
        self.order = SortOrder::LatestFirst;
        self
    }

    pub fn earliest_order(mut self) -> Self {
        self.order = SortOrder::EarliestFirst;
        self
    }

    pub fn reverse(mut self, reverse: bool) -> Self {
        self.order = SortOrder::from_reverse(reverse);
        self
    }

    pub fn filtered_by_target(mut self, target: &EntityRef) -> Self {
        self.target = Some(target.clone());
        self
    }

    pub fn filtered_by_target_type(mut self, target_type: impl Into<String>) -> Self {
        self.target_type = Some(target_type.into());
        self
    }

    pub fn filtered_by_instance(mut self, notifiable: &EntityRef) -> Self {
        self.notifiable = Some(notifiable.clone());
        self
    }

    pub fn filtered_by_type(mut self, notifiable_type: impl Into<String>) -> Self {
        self.notifiable_type = Some(notifiable_type.into());
        self
    }

    pub fn filtered_by_group(self, group: &EntityRef) -> Self {
        self.filtered_by_group_type_and_id(group.entity_type(), group.entity_id())
    }

    pub fn filtered_by_group_type_and_id(
        mut self,
        group_type: impl Into<String>,
        group_id: impl Into<String>,
    ) -> Self {
        self.group = Some((group_type.into(), group_id.into()));
        self
    }

    pub fn filtered_by_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Members of the given owners. An empty list matches nothing.
    pub fn group_members_of_owner_ids_only(mut self, owner_ids: &[NotificationId]) -> Self {
        self.owner_ids = Some(owner_ids.to_vec());
        self
    }

    pub fn custom_filter(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    /// Keeps rows with `created_at > now_ms - expiry_delay_ms`.
    pub fn within_expiration_only(mut self, expiry_delay_ms: i64, now_ms: i64) -> Self {
        self.created_after = Some(now_ms.saturating_sub(expiry_delay_ms));
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }

    pub fn paginate(self, limit: u32, offset: u32) -> Self {
        self.limit(limit).offset(offset)
    }

    fn unpaged(mut self) -> Self {
        self.limit = None;
        self.offset = 0;
        self
    }

    pub fn state(&self) -> StateFilter {
        self.state
    }

    pub fn grouping(&self) -> GroupingMode {
        self.grouping
    }

    pub fn order(&self) -> SortOrder {
        self.order
    }

    /// Effective row cap: the smaller of the page limit and an opened limit.
    pub fn effective_limit(&self) -> Option<u32> {
        let state_limit = match self.state {
            StateFilter::Opened { limit } => Some(limit),
            _ => None,
        };
        match (state_limit, self.limit) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{GroupingMode, NotificationQuery, SortOrder, StateFilter};
    use crate::model::notification::EntityRef;

    #[test]
    fn named_indexes_default_to_owners_latest_first() {
        let query = NotificationQuery::unopened_index(false, false);
        assert_eq!(query.state(), StateFilter::Unopened);
        assert_eq!(query.grouping(), GroupingMode::OwnersOnly);
        assert_eq!(query.order(), SortOrder::LatestFirst);

        let reversed = NotificationQuery::all_index(true, true);
        assert_eq!(reversed.grouping(), GroupingMode::IncludeAll);
        assert_eq!(reversed.order(), SortOrder::EarliestFirst);
    }

    #[test]
    fn effective_limit_takes_smaller_of_state_and_page_limit() {
        assert_eq!(NotificationQuery::opened_index(10, false, false).effective_limit(), Some(10));
        assert_eq!(
            NotificationQuery::opened_index(10, false, false)
                .limit(3)
                .effective_limit(),
            Some(3)
        );
        assert_eq!(
            NotificationQuery::new().opened_only_unbounded().effective_limit(),
            None
        );
        assert_eq!(NotificationQuery::new().limit(4).effective_limit(), Some(4));
    }

    #[test]
    fn member_scope_nests_owner_index_with_shared_filters() {
        let target = EntityRef::new("User", "1").unwrap();
        let query = NotificationQuery::new()
            .filtered_by_target(&target)
            .opened_index_group_members_only(5);

        assert_eq!(query.grouping(), GroupingMode::MembersOnly);
        assert_eq!(query.state(), StateFilter::All);
        let owners = query.owner_index.as_deref().unwrap();
        assert_eq!(owners.state(), StateFilter::Opened { limit: 5 });
        assert_eq!(owners.grouping(), GroupingMode::OwnersOnly);
        assert_eq!(owners.target.as_ref(), Some(&target));
    }
}
