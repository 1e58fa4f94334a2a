//! Core data models for the content-addressed file store.
//!
//! These records describe stored files, not their bytes. They map to
//! SQLite rows via `sqlx::FromRow` and serialize as JSON via `serde`.

pub mod stored_file;
pub mod tracking;
