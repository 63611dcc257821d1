//! System-wide run lock
//!
//! One pipeline execution at a time: the lock is a single row with a fixed
//! primary key, so acquisition is an INSERT that fails fast when another run
//! holds it. No queuing; the second invocation exits with `LockHeld`.

use caveat_common::{Error, Result};
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// Acquire the run lock for a batch, failing fast if it is held
pub async fn acquire_run_lock(pool: &SqlitePool, batch_id: Uuid) -> Result<()> {
    let result = sqlx::query("INSERT INTO run_lock (id, batch_id, acquired_at) VALUES (1, ?, ?)")
        .bind(batch_id.to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(pool)
        .await;

    match result {
        Ok(_) => {
            tracing::info!(batch_id = %batch_id, "Run lock acquired");
            Ok(())
        }
        Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
            let holder = sqlx::query("SELECT batch_id, acquired_at FROM run_lock WHERE id = 1")
                .fetch_optional(pool)
                .await?;
            let detail = match holder {
                Some(row) => format!(
                    "held by batch {} since {}",
                    row.get::<String, _>("batch_id"),
                    row.get::<String, _>("acquired_at")
                ),
                None => "held by another run".to_string(),
            };
            Err(Error::LockHeld(detail))
        }
        Err(e) => Err(e.into()),
    }
}

/// Release the run lock
///
/// Idempotent; releasing an unheld lock is a no-op so every terminal path of
/// the pipeline can call it unconditionally.
pub async fn release_run_lock(pool: &SqlitePool) -> Result<()> {
    sqlx::query("DELETE FROM run_lock WHERE id = 1")
        .execute(pool)
        .await?;
    tracing::debug!("Run lock released");
    Ok(())
}
