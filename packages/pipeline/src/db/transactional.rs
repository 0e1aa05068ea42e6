use sqlx::{PgPool, Postgres, Transaction};

use crate::error::DbError;

/// Two-phase-commit scope for multi-statement writes that must be
/// atomic, matching `talos.db.transactional_database.TransactionalDatabase`.
///
/// Begins a transaction on construction. Callers must end the scope
/// with [`TxDb::commit`] or [`TxDb::rollback`]; both consume `self`.
/// If neither is called (e.g. an early `?` return drops the handle),
/// the `Drop` impl rolls back best-effort and logs — the closest
/// approximation Rust's ownership model allows to the original's
/// guaranteed rollback-on-exception at `__exit__`.
pub struct TxDb {
    tx: Option<Transaction<'static, Postgres>>,
}

impl TxDb {
    pub async fn begin(pool: &PgPool) -> Result<TxDb, DbError> {
        let tx = pool.begin().await.map_err(DbError::from)?;
        Ok(TxDb { tx: Some(tx) })
    }

    /// The open transaction, for use with `sqlx::query!(...).execute(tx.as_mut())`.
    pub fn as_mut(&mut self) -> Result<&mut Transaction<'static, Postgres>, DbError> {
        self.tx.as_mut().ok_or(DbError::NotInitialised)
    }

    pub async fn commit(mut self) -> Result<(), DbError> {
        let tx = self.tx.take().ok_or(DbError::NotInitialised)?;
        tx.commit().await.map_err(DbError::from)
    }

    pub async fn rollback(mut self) -> Result<(), DbError> {
        let tx = self.tx.take().ok_or(DbError::NotInitialised)?;
        tx.rollback().await.map_err(DbError::from)
    }
}

impl Drop for TxDb {
    fn drop(&mut self) {
        if self.tx.is_some() {
            tracing::error!(
                "TxDb dropped without explicit commit/rollback; transaction will be \
                 rolled back by the connection going out of scope"
            );
        }
    }
}
