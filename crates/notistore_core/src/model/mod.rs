//! Notification record model and polymorphic entity references.
//!
//! # Responsibility
//! - Define the canonical notification row shared by grouping, index and
//!   aggregate code.
//! - Resolve polymorphic references through an explicit type registry.
//!
//! # Invariants
//! - Every notification is identified by a monotonically increasing
//!   `NotificationId`.
//! - Group membership is expressed by id only; owners never embed members.

pub mod entity;
pub mod notification;
