//! Group merge decisions for newly created notifications.
//!
//! # Responsibility
//! - Describe which existing owner a new notification may join.
//! - Provide the extension point for extra grouping-window conditions.
//!
//! # Invariants
//! - Only unopened owners with the same target and the same group are ever
//!   offered as candidates; a policy can only narrow that set.
//! - Notifications without a group never merge.

use crate::config::StoreConfig;
use crate::model::notification::{NewNotification, Notification};

/// Candidate lookup options derived from the active policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CandidateScope {
    /// Candidate must also share the new notification's key.
    pub same_key: bool,
}

/// Decides whether a new notification joins a candidate owner.
pub trait GroupingPolicy: Send + Sync {
    /// Narrows the candidate lookup before the policy sees a row.
    fn candidate_scope(&self) -> CandidateScope {
        CandidateScope::default()
    }

    /// Called with the most recent unopened owner for the same
    /// `(target, group)`. Returning `false` starts a new group.
    fn accepts(&self, candidate: &Notification, input: &NewNotification, now_ms: i64) -> bool;
}

/// Unopened + same group, optionally key-matched and time-windowed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DefaultGroupingPolicy {
    pub group_by_key: bool,
    pub window_ms: Option<i64>,
}

impl DefaultGroupingPolicy {
    pub fn from_config(config: &StoreConfig) -> Self {
        Self {
            group_by_key: config.group_by_key,
            window_ms: config.grouping_window_ms,
        }
    }
}

impl GroupingPolicy for DefaultGroupingPolicy {
    fn candidate_scope(&self) -> CandidateScope {
        CandidateScope {
            same_key: self.group_by_key,
        }
    }

    fn accepts(&self, candidate: &Notification, input: &NewNotification, now_ms: i64) -> bool {
        if candidate.is_opened() || candidate.is_group_member() {
            return false;
        }
        if input.group.is_none() || candidate.group != input.group {
            return false;
        }
        if self.group_by_key && candidate.key != input.key {
            return false;
        }
        match self.window_ms {
            Some(window) => now_ms.saturating_sub(candidate.created_at) <= window,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{DefaultGroupingPolicy, GroupingPolicy};
    use crate::model::notification::{EntityRef, NewNotification, Notification, Parameters};

    fn reference(entity_type: &str, id: &str) -> EntityRef {
        EntityRef::new(entity_type, id).unwrap()
    }

    fn owner(created_at: i64) -> Notification {
        Notification {
            id: 1,
            target: reference("User", "1"),
            notifiable: reference("Comment", "1"),
            key: "comment.default".to_string(),
            group_owner_id: None,
            group: Some(reference("Article", "1")),
            notifier: None,
            parameters: Parameters::new(),
            opened_at: None,
            created_at,
        }
    }

    fn input(key: &str) -> NewNotification {
        NewNotification::new(reference("User", "1"), reference("Comment", "2"), key)
            .with_group(reference("Article", "1"))
    }

    #[test]
    fn default_policy_merges_unopened_same_group() {
        let policy = DefaultGroupingPolicy::default();
        assert!(policy.accepts(&owner(0), &input("comment.reply"), 10));
    }

    #[test]
    fn opened_or_ungrouped_candidates_never_merge() {
        let policy = DefaultGroupingPolicy::default();
        let mut opened = owner(0);
        opened.opened_at = Some(5);
        assert!(!policy.accepts(&opened, &input("comment.default"), 10));

        let mut ungrouped = input("comment.default");
        ungrouped.group = None;
        assert!(!policy.accepts(&owner(0), &ungrouped, 10));
    }

    #[test]
    fn key_and_window_refinements_narrow_merging() {
        let policy = DefaultGroupingPolicy {
            group_by_key: true,
            window_ms: Some(100),
        };
        assert!(policy.candidate_scope().same_key);
        assert!(!policy.accepts(&owner(0), &input("comment.reply"), 50));
        assert!(policy.accepts(&owner(0), &input("comment.default"), 100));
        assert!(!policy.accepts(&owner(0), &input("comment.default"), 101));
    }
}
