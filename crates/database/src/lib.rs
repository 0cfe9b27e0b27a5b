//! # Database Crate
//!
//! A thin, transaction-aware access layer over a pooled SQL connection.
//!
//! ## Architectural Principles
//!
//! - **Explicit scopes:** every call takes a [`Scope`]. The scope carries the
//!   caller's cancellation and deadline, and optionally a [`TxHandle`]. The
//!   same [`Client`] method runs on that transaction when present and on the
//!   pool otherwise, so repository code does not care whether it is inside a
//!   unit of work.
//! - **Engine agnostic:** uses the `sqlx` `Any` driver, so one client serves
//!   PostgreSQL in production and SQLite for embedded or local use.
//! - **Guaranteed release:** row cursors own their connection and give it back
//!   when dropped.
//!
//! ## Public API
//!
//! - `Client`: execute/query/scan operations, `ping` and `close`.
//! - `ClientConfig`: connection string and pool bounds, validated up front.
//! - `Scope` / `TxHandle`: the execution scope and transaction capability.
//! - `Value` / `args!`: positional statement arguments.
//! - `DbError` / `ErrorKind`: the errors returned by this crate.

// Declare the modules that constitute this crate.
pub mod client;
pub mod connection;
pub mod error;
pub mod rows;
pub mod scope;
pub mod value;

// Re-export the key components to create a clean, public-facing API.
pub use client::{Client, Route};
pub use connection::{ClientConfig, connect};
pub use error::{DbError, ErrorKind, Interrupted};
pub use rows::{RowHandle, Rows};
pub use scope::{Scope, TxHandle};
pub use value::{TypedValue, Value, ValueKind};

// Row types callers decode into.
pub use sqlx::FromRow;
pub use sqlx::AnyConnection;
pub use sqlx::any::{AnyQueryResult, AnyRow};
