//! Migration framework
//!
//! Provides:
//! - Migration runner with idempotent application
//! - Embedded SQL migrations

mod embedded;
mod runner;

pub use runner::apply_migrations;
