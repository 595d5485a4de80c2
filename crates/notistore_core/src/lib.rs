//! Core domain logic for the notification store.
//! This crate is the single source of truth for grouping and index invariants.

pub mod config;
pub mod db;
pub mod grouping;
pub mod logging;
pub mod model;
pub mod query;
pub mod repo;
pub mod service;

pub use config::{ConfigError, StoreConfig};
pub use db::{open_db, open_db_in_memory, open_db_with_busy_timeout, DbError, DbResult};
pub use grouping::{CandidateScope, DefaultGroupingPolicy, GroupingPolicy};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::entity::{Entity, EntityRegistry, EntityResolver, ResolvedEntities};
pub use model::notification::{
    EntityRef, NewNotification, Notification, NotificationId, NotificationValidationError,
    Parameters, ReferenceField,
};
pub use query::builder::{
    Column, Comparison, GroupingMode, NotificationQuery, Predicate, PredicateValue, SortOrder,
    StateFilter,
};
pub use repo::notification_repo::{
    NotificationRepository, RepoError, RepoResult, SqliteNotificationRepository,
};
pub use service::aggregate_cache::{AggregateCache, CountState};
pub use service::notification_service::NotificationService;

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
