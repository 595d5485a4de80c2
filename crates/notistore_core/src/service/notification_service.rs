//! Notification use-case service.
//!
//! # Responsibility
//! - Provide create/open/index/count entry points over a repository.
//! - Retry the grouping transaction on lock contention, bounded by config.
//! - Validate references against the entity registry when one is set.
//!
//! # Invariants
//! - Service APIs never bypass repository validation/persistence contracts.
//! - A create either inserts exactly one row or returns an error.
//! - Log events carry type tags and ids of notifications only, never
//!   parameters or host entity ids.

use crate::config::{ConfigError, StoreConfig};
use crate::grouping::{DefaultGroupingPolicy, GroupingPolicy};
use crate::model::entity::{EntityRegistry, ResolvedEntities};
use crate::model::notification::{
    NewNotification, Notification, NotificationId, NotificationValidationError, ReferenceField,
};
use crate::query::builder::NotificationQuery;
use crate::repo::notification_repo::{NotificationRepository, RepoError, RepoResult};
use crate::service::aggregate_cache::{AggregateCache, CountState};
use crate::service::now_epoch_ms;
use log::{error, info, warn};
use std::time::Instant;

/// Notification service facade over repository implementations.
pub struct NotificationService<R: NotificationRepository> {
    repo: R,
    config: StoreConfig,
    policy: Box<dyn GroupingPolicy>,
    registry: Option<EntityRegistry>,
}

impl<R: NotificationRepository> NotificationService<R> {
    /// Creates a service with default configuration.
    pub fn new(repo: R) -> Self {
        Self::from_parts(repo, StoreConfig::default())
    }

    /// Creates a service; the grouping policy is derived from `config`.
    ///
    /// # Errors
    /// Returns the [`ConfigError`] of [`StoreConfig::validate`].
    pub fn with_config(repo: R, config: StoreConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::from_parts(repo, config))
    }

    fn from_parts(repo: R, config: StoreConfig) -> Self {
        let policy: Box<dyn GroupingPolicy> = Box::new(DefaultGroupingPolicy::from_config(&config));
        Self {
            repo,
            config,
            policy,
            registry: None,
        }
    }

    /// Replaces the grouping policy.
    pub fn with_grouping_policy(mut self, policy: Box<dyn GroupingPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Requires target/notifiable to resolve through `registry` on create.
    pub fn with_registry(mut self, registry: EntityRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    /// Creates one notification, joining an open group when allowed.
    ///
    /// # Errors
    /// - `Validation` for missing/unresolvable references or blank key.
    /// - `ConcurrencyConflict` once lock contention outlasts the retry budget.
    /// - `Db` for any other storage failure, unchanged.
    pub fn create(&self, input: &NewNotification) -> RepoResult<Notification> {
        let started_at = Instant::now();
        if let Err(err) = self.validate_input(input) {
            warn!(
                "event=notification_create module=service status=rejected error_code=validation error={}",
                err
            );
            return Err(err.into());
        }

        let max_attempts = self.config.max_create_retries.saturating_add(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.repo.insert_grouped(input, self.policy.as_ref(), now_epoch_ms()) {
                Ok(created) => {
                    info!(
                        "event=notification_create module=service status=ok id={} target_type={} grouped={} attempts={} duration_ms={}",
                        created.id,
                        created.target.entity_type(),
                        created.is_group_member(),
                        attempt,
                        started_at.elapsed().as_millis()
                    );
                    return Ok(created);
                }
                Err(err) if err.is_retryable_conflict() && attempt < max_attempts => {
                    warn!(
                        "event=notification_create module=service status=retry attempt={} error={}",
                        attempt, err
                    );
                    std::thread::sleep(self.config.retry_backoff(attempt));
                }
                Err(err) if err.is_retryable_conflict() => {
                    error!(
                        "event=notification_create module=service status=error error_code=concurrency_conflict attempts={} duration_ms={}",
                        attempt,
                        started_at.elapsed().as_millis()
                    );
                    return Err(RepoError::ConcurrencyConflict { attempts: attempt });
                }
                Err(err) => {
                    error!(
                        "event=notification_create module=service status=error attempts={} error={}",
                        attempt, err
                    );
                    return Err(err);
                }
            }
        }
    }

    /// Marks one notification opened. Repeated calls keep the first time.
    pub fn open(&self, id: NotificationId) -> RepoResult<Notification> {
        let opened = self.repo.open_notification(id, now_epoch_ms())?;
        info!(
            "event=notification_open module=service status=ok id={} opened_at={}",
            opened.id,
            opened.opened_at.unwrap_or_default()
        );
        Ok(opened)
    }

    /// Opens every unopened notification matched by `query`.
    pub fn open_all(&self, query: &NotificationQuery) -> RepoResult<usize> {
        let changed = self.repo.open_matching(query, now_epoch_ms())?;
        info!(
            "event=notification_open_all module=service status=ok changed={}",
            changed
        );
        Ok(changed)
    }

    pub fn get(&self, id: NotificationId) -> RepoResult<Option<Notification>> {
        self.repo.get_notification(id)
    }

    /// Lists notifications for a composed index query.
    pub fn index(&self, query: &NotificationQuery) -> RepoResult<Vec<Notification>> {
        self.repo.list_notifications(query)
    }

    /// Index query restricted to rows inside the configured retention.
    ///
    /// Equivalent to [`Self::index`] when no `expiry_delay_ms` is set.
    pub fn index_within_expiration(
        &self,
        query: &NotificationQuery,
    ) -> RepoResult<Vec<Notification>> {
        match self.config.expiry_delay_ms {
            Some(delay) => {
                let scoped = query.clone().within_expiration_only(delay, now_epoch_ms());
                self.repo.list_notifications(&scoped)
            }
            None => self.repo.list_notifications(query),
        }
    }

    /// Most recently created notification of `query`.
    pub fn latest(&self, query: &NotificationQuery) -> RepoResult<Option<Notification>> {
        self.first_of(query.clone().latest_order())
    }

    /// Earliest created notification of `query`.
    pub fn earliest(&self, query: &NotificationQuery) -> RepoResult<Option<Notification>> {
        self.first_of(query.clone().earliest_order())
    }

    fn first_of(&self, query: NotificationQuery) -> RepoResult<Option<Notification>> {
        let mut rows = self.repo.list_notifications(&query.limit(1))?;
        Ok(rows.pop())
    }

    /// Distinct keys present in `query`, ascending.
    pub fn uniq_keys(&self, query: &NotificationQuery) -> RepoResult<Vec<String>> {
        self.repo.uniq_keys(query)
    }

    pub fn count(&self, query: &NotificationQuery) -> RepoResult<u64> {
        self.repo.count_notifications(query)
    }

    /// Owner of a member, or `None` for owners.
    pub fn group_owner(&self, id: NotificationId) -> RepoResult<Option<Notification>> {
        let notification = self.repo.get_notification(id)?.ok_or(RepoError::NotFound(id))?;
        match notification.group_owner_id {
            Some(owner_id) => self.repo.get_notification(owner_id),
            None => Ok(None),
        }
    }

    /// Members of one owner, earliest first.
    pub fn group_members(&self, owner_id: NotificationId) -> RepoResult<Vec<Notification>> {
        let query = NotificationQuery::new()
            .group_members_of_owner_ids_only(&[owner_id])
            .earliest_order();
        self.repo.list_notifications(&query)
    }

    /// Starts a per-render aggregate cache over this service's repository.
    pub fn aggregate_cache(&self) -> AggregateCache<'_, R> {
        AggregateCache::new(&self.repo, self.config.opened_index_limit)
    }

    /// One-off member count. Prefer [`Self::aggregate_cache`] for batches.
    pub fn member_count(
        &self,
        owner_id: NotificationId,
        state: CountState,
        limit: Option<u32>,
    ) -> RepoResult<u64> {
        self.aggregate_cache().member_count(owner_id, state, limit)
    }

    /// One-off distinct-notifier count. Prefer [`Self::aggregate_cache`].
    pub fn distinct_notifier_count(
        &self,
        owner_id: NotificationId,
        state: CountState,
        limit: Option<u32>,
    ) -> RepoResult<u64> {
        self.aggregate_cache()
            .distinct_notifier_count(owner_id, state, limit)
    }

    /// Batch-resolves references of a page through the registry.
    ///
    /// Returns an empty result when no registry is configured.
    pub fn preload_entities(
        &self,
        notifications: &[Notification],
        fields: &[ReferenceField],
    ) -> ResolvedEntities {
        match self.registry.as_ref() {
            Some(registry) => registry.preload(notifications, fields),
            None => ResolvedEntities::default(),
        }
    }

    /// Deletes groups older than `expiry_delay_ms` (or the configured delay).
    ///
    /// Returns `Ok(0)` without touching storage when no delay is known.
    pub fn destroy_expired(&self, expiry_delay_ms: Option<i64>) -> RepoResult<usize> {
        let Some(delay) = expiry_delay_ms.or(self.config.expiry_delay_ms) else {
            return Ok(0);
        };
        let cutoff = now_epoch_ms().saturating_sub(delay);
        let deleted = self.repo.delete_groups_created_before(cutoff)?;
        info!(
            "event=notification_purge module=service status=ok deleted_groups={} expiry_delay_ms={}",
            deleted, delay
        );
        Ok(deleted)
    }

    fn validate_input(&self, input: &NewNotification) -> Result<(), NotificationValidationError> {
        input.validate()?;
        if let Some(registry) = self.registry.as_ref() {
            registry.validate_new(input)?;
        }
        Ok(())
    }
}
