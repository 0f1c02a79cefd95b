#![allow(clippy::result_large_err)]
#![allow(clippy::type_complexity)]

//! Validation engine for shadowcheck: statically checks embedded SQL
//! (queries, views, inserts) against a live, migrations-built shadow
//! PostgreSQL schema.
//!
//! # Modules
//!
//! - [`error`] — the crate's error types (`Error`, `MigrationError`,
//!   `ResolveError`, `ClusterError`).
//! - [`naming`] — identifier escaping and deterministic view naming.
//! - [`migrations`] — `V<n>__desc.sql` migration file loading and hashing.
//! - [`views`] — view dependency resolution into creation order.
//! - [`cluster`] — embedded `initdb`/`postgres` cluster lifecycle.
//! - [`columns`] — `pg_catalog` introspection (columns, types, nullability).
//! - [`analyzer`] — query/insert shape analysis and type translation.
//! - [`diagnostics`] — turning analysis answers into `ErrorDiagnostic`s.
//! - [`cache`] — content-keyed query/insert result caches.
//! - [`shadow_db`] — shadow database rebuild and view materialization.
//! - [`session`] — the worker's request/response dispatch loop.
//!
//! The binary entry point lives in the `shadowcheck-cli` crate, which wraps
//! [`session::WorkerSession`] in the newline-delimited-JSON stdio protocol
//! described in the project's design notes.

pub mod analyzer;
pub mod cache;
pub mod cluster;
pub mod columns;
pub mod diagnostics;
pub mod error;
pub mod migrations;
pub mod naming;
pub mod session;
pub mod shadow_db;
pub mod views;

pub use analyzer::{translate_sql_type, AnalyzerContext, UniqueColumnTypes};
pub use cache::{InsertCache, QueryCache};
pub use cluster::ClusterHandle;
pub use columns::{ColsLibrary, PgTypes};
pub use error::{ClusterError, Error, MigrationError, ResolveError, Result};
pub use migrations::MigrationFile;
pub use session::WorkerSession;
pub use shadow_db::ShadowDb;
pub use views::ResolveOutcome;

// Re-export the wire protocol types consumers need to build `WorkerRequest`s
// and interpret `WorkerResponse`s without a direct `shadowcheck-proto` dependency.
pub use shadowcheck_proto as proto;
