//! Per-batch group member and notifier counts.
//!
//! # Responsibility
//! - Answer member and distinct-notifier counts for many owners of one
//!   target with one grouped query per `(target, state, limit)`.
//! - Memoize those grouped results for the lifetime of one render.
//!
//! # Invariants
//! - A cache is scoped to one request; it is never shared across threads.
//! - Owners absent from a grouped result have count 0.
//! - Opened counts never exceed the opened limit in use.

use crate::model::notification::{EntityRef, Notification, NotificationId};
use crate::query::builder::NotificationQuery;
use crate::repo::notification_repo::{NotificationRepository, RepoError, RepoResult};
use log::debug;
use std::collections::HashMap;

/// Which index an owner's members are counted against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CountState {
    Unopened,
    Opened,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CountScope {
    target: EntityRef,
    state: CountState,
    /// Always `None` for unopened counts.
    limit: Option<u32>,
}

#[derive(Debug, Clone)]
struct OwnerSnapshot {
    target: EntityRef,
    notifier_type: Option<String>,
}

/// Memoized grouped counts for one batch of owners.
pub struct AggregateCache<'r, R: NotificationRepository + ?Sized> {
    repo: &'r R,
    default_opened_limit: u32,
    owners: HashMap<NotificationId, OwnerSnapshot>,
    member_counts: HashMap<CountScope, HashMap<NotificationId, u64>>,
    notifier_counts: HashMap<CountScope, HashMap<(NotificationId, String), u64>>,
    queries_issued: usize,
}

impl<'r, R: NotificationRepository + ?Sized> AggregateCache<'r, R> {
    /// Creates an empty cache. `default_opened_limit` applies when a caller
    /// asks for opened counts without a limit.
    pub fn new(repo: &'r R, default_opened_limit: u32) -> Self {
        Self {
            repo,
            default_opened_limit,
            owners: HashMap::new(),
            member_counts: HashMap::new(),
            notifier_counts: HashMap::new(),
            queries_issued: 0,
        }
    }

    /// Registers owners already in hand so lookups need no row fetch.
    pub fn prime(&mut self, owners: &[Notification]) {
        for owner in owners {
            self.owners.insert(
                owner.id,
                OwnerSnapshot {
                    target: owner.target.clone(),
                    notifier_type: owner
                        .notifier
                        .as_ref()
                        .map(|notifier| notifier.entity_type().to_string()),
                },
            );
        }
    }

    /// Number of storage round trips issued by this cache so far.
    pub fn queries_issued(&self) -> usize {
        self.queries_issued
    }

    /// Members of `owner_id` within the unopened or opened index.
    pub fn member_count(
        &mut self,
        owner_id: NotificationId,
        state: CountState,
        limit: Option<u32>,
    ) -> RepoResult<u64> {
        let owner = self.owner(owner_id)?;
        let scope = self.scope(owner.target, state, limit);

        if !self.member_counts.contains_key(&scope) {
            let members = member_rows(&scope);
            let counts = self.repo.member_counts_by_owner(&members)?;
            self.queries_issued += 1;
            debug!(
                "event=aggregate_load module=service kind=member_count state={:?} owners={}",
                scope.state,
                counts.len()
            );
            self.member_counts.insert(scope.clone(), counts);
        }

        let count = self
            .member_counts
            .get(&scope)
            .and_then(|counts| counts.get(&owner_id))
            .copied()
            .unwrap_or(0);
        Ok(clamp(count, &scope))
    }

    /// Distinct notifiers among members of `owner_id`, excluding the
    /// owner's own notifier.
    pub fn distinct_notifier_count(
        &mut self,
        owner_id: NotificationId,
        state: CountState,
        limit: Option<u32>,
    ) -> RepoResult<u64> {
        let owner = self.owner(owner_id)?;
        let Some(notifier_type) = owner.notifier_type.clone() else {
            return Ok(0);
        };
        let scope = self.scope(owner.target, state, limit);

        if !self.notifier_counts.contains_key(&scope) {
            let members = member_rows(&scope);
            let counts = self.repo.notifier_counts_by_owner(&members)?;
            self.queries_issued += 1;
            debug!(
                "event=aggregate_load module=service kind=notifier_count state={:?} owners={}",
                scope.state,
                counts.len()
            );
            self.notifier_counts.insert(scope.clone(), counts);
        }

        let count = self
            .notifier_counts
            .get(&scope)
            .and_then(|counts| counts.get(&(owner_id, notifier_type)))
            .copied()
            .unwrap_or(0);
        Ok(clamp(count, &scope))
    }

    fn owner(&mut self, owner_id: NotificationId) -> RepoResult<OwnerSnapshot> {
        if let Some(owner) = self.owners.get(&owner_id) {
            return Ok(owner.clone());
        }
        let loaded = self
            .repo
            .get_notification(owner_id)?
            .ok_or(RepoError::NotFound(owner_id))?;
        self.queries_issued += 1;
        self.prime(std::slice::from_ref(&loaded));
        self.owners
            .get(&owner_id)
            .cloned()
            .ok_or(RepoError::NotFound(owner_id))
    }

    fn scope(&self, target: EntityRef, state: CountState, limit: Option<u32>) -> CountScope {
        let limit = match state {
            CountState::Unopened => None,
            CountState::Opened => Some(limit.unwrap_or(self.default_opened_limit)),
        };
        CountScope {
            target,
            state,
            limit,
        }
    }
}

fn member_rows(scope: &CountScope) -> NotificationQuery {
    let base = NotificationQuery::new().filtered_by_target(&scope.target);
    match (scope.state, scope.limit) {
        (CountState::Opened, Some(limit)) => base.opened_index_group_members_only(limit),
        _ => base.unopened_index_group_members_only(),
    }
}

fn clamp(count: u64, scope: &CountScope) -> u64 {
    match scope.limit {
        Some(limit) => count.min(u64::from(limit)),
        None => count,
    }
}
