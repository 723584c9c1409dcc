//! Storage module (C1).
//!
//! SQLite-backed relational store: bi-temporal memory versions, the entity
//! graph, session state, background tasks, and dream-session history, all
//! behind a single `Storage` handle with FTS5 kept in sync by trigger.

mod migrations;
mod store;

pub use migrations::{Migration, LATEST_VERSION, MIGRATIONS};
pub use store::{sanitize_fts5_query, Storage};
