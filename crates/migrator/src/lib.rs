//! # Migrator Crate
//!
//! Brings a database schema to the latest version, or reverts it to empty,
//! using versioned SQL files discovered at runtime.
//!
//! Both directions are idempotent: running them against a database that is
//! already up to date (or already empty), or against a directory with no
//! migration files at all, succeeds without doing anything. Every other
//! failure is returned to the caller, which should treat it as fatal during
//! startup.

pub mod dialect;
pub mod error;
pub mod runner;

pub use dialect::Dialect;
pub use error::MigrationError;
pub use runner::{MigrationOutcome, Migrator, MigratorConfig};
