use sqlx::PgPool;

/// Read-only queries and simple single-statement writes, matching
/// `talos.db.context_database.ContextDatabase`. Exposes the pool
/// directly so call sites use `sqlx::query!`/`query_as!` in the usual
/// way; there is no multi-statement atomicity here — use
/// [`crate::db::TxDb`] when that's required.
pub struct ContextDb<'p> {
    pool: &'p PgPool,
}

impl<'p> ContextDb<'p> {
    pub fn new(pool: &'p PgPool) -> Self {
        Self { pool }
    }

    /// The pool backing this scope. Each statement executed against it
    /// auto-commits immediately (a bare `PgPool` has no open
    /// transaction to defer against).
    pub fn pool(&self) -> &PgPool {
        self.pool
    }
}
