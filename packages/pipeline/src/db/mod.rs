//! Database access wrappers (spec §4.1.4), ported from
//! `talos.db.{base_database,context_database,transactional_database}`.
//!
//! Both wrappers acquire a connection from a shared `sqlx::PgPool` and
//! guarantee it's released; `TxDb` additionally guarantees the
//! transaction is committed or rolled back. Rust's ownership model
//! replaces the Python context manager's `__exit__`: instead of an
//! implicit commit-on-success/rollback-on-exception at scope exit,
//! callers explicitly call `commit()` or `rollback()`, consuming the
//! handle. A `Drop` guard on `TxDb` rolls back (best-effort, logging
//! any failure) if neither was called — e.g. an early `?` return.

mod context;
mod transactional;

pub use context::ContextDb;
pub use transactional::TxDb;
