//! Scoped batch transactions with connection timing logs
//!
//! A `UnitOfWork` owns one pooled connection for the life of a transaction.
//! It ends by `commit`, `rollback`, or being dropped; a drop rolls back
//! (sqlx semantics) and is logged so abandoned batches show up in traces.

use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use std::time::Instant;

use crate::error::IngestResult;

/// Transaction wrapper that logs acquisition and release timing
pub struct UnitOfWork {
    tx: Transaction<'static, Sqlite>,
    guard: ReleaseGuard,
}

/// Logs the release path of a unit of work; commit and rollback disarm it
struct ReleaseGuard {
    caller: &'static str,
    acquired_at: Instant,
    armed: bool,
}

impl ReleaseGuard {
    fn release(mut self, how: &'static str) {
        self.armed = false;
        let held_ms = self.acquired_at.elapsed().as_millis();
        if held_ms > 2000 {
            tracing::warn!(
                caller = self.caller,
                held_ms,
                how,
                "Long transaction, connection held for extended period"
            );
        } else {
            tracing::debug!(caller = self.caller, held_ms, how, "Connection released");
        }
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        if self.armed {
            tracing::debug!(
                caller = self.caller,
                held_ms = self.acquired_at.elapsed().as_millis(),
                "Connection released (drop, transaction rolled back)"
            );
        }
    }
}

impl UnitOfWork {
    /// Connection to run statements on inside the transaction
    pub fn conn(&mut self) -> &mut SqliteConnection {
        &mut self.tx
    }

    /// Commit all work done through `conn()`
    pub async fn commit(self) -> IngestResult<()> {
        let UnitOfWork { tx, guard } = self;
        tx.commit().await?;
        guard.release("commit");
        Ok(())
    }

    /// Discard all work done through `conn()`
    pub async fn rollback(self) -> IngestResult<()> {
        let UnitOfWork { tx, guard } = self;
        tx.rollback().await?;
        guard.release("rollback");
        Ok(())
    }
}

/// Begin a unit of work on `pool`, logging how long acquisition took
pub async fn begin_unit(pool: &SqlitePool, caller: &'static str) -> IngestResult<UnitOfWork> {
    let start = Instant::now();
    tracing::debug!(caller, "Connection acquisition requested");

    let tx = pool.begin().await?;

    let wait_ms = start.elapsed().as_millis();
    if wait_ms > 1000 {
        tracing::warn!(
            caller,
            wait_ms,
            "Slow connection acquisition, pool may be saturated"
        );
    } else {
        tracing::debug!(caller, wait_ms, "Connection acquired");
    }

    Ok(UnitOfWork {
        tx,
        guard: ReleaseGuard {
            caller,
            acquired_at: Instant::now(),
            armed: true,
        },
    })
}
