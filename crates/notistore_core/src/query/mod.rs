//! Index query engine.
//!
//! # Responsibility
//! - Expose a builder for filtered, ordered, paginated notification views.
//! - Translate builder state into bound SQL inside the core boundary.

pub mod builder;
pub(crate) mod sql;
