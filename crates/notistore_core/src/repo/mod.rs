//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define use-case oriented data access contracts for notifications.
//! - Isolate SQLite query details from service orchestration.
//!
//! # Invariants
//! - Repository writes validate `NewNotification` before persistence.
//! - Repository APIs return semantic errors (`NotFound`,
//!   `ConcurrencyConflict`) in addition to DB transport errors.

pub mod notification_repo;
