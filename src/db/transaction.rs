use sqlx::pool::PoolConnection;
use sqlx::{Sqlite, SqliteConnection, SqlitePool};
use tracing::warn;

use crate::error::{AppError, AppResult};

/// A transaction opened with `BEGIN IMMEDIATE`.
///
/// The write lock is taken up front, so a read followed by a write cannot fail
/// with `SQLITE_BUSY` halfway through; waiting writers queue on `busy_timeout`.
/// Close it with [`WriteTransaction::finish`]. Dropping it unfinished rolls back.
pub struct WriteTransaction {
    conn: Option<PoolConnection<Sqlite>>,
}

impl WriteTransaction {
    pub async fn begin(pool: &SqlitePool) -> AppResult<Self> {
        let mut conn = pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
        Ok(Self { conn: Some(conn) })
    }

    pub fn conn(&mut self) -> AppResult<&mut SqliteConnection> {
        self.conn
            .as_deref_mut()
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("transaction already finished")))
    }

    /// Commit when `result` is `Ok`, roll back otherwise, and hand `result` back.
    pub async fn finish<T>(mut self, result: AppResult<T>) -> AppResult<T> {
        let Some(mut conn) = self.conn.take() else {
            return Err(AppError::Internal(anyhow::anyhow!(
                "transaction already finished"
            )));
        };

        match result {
            Ok(value) => {
                if let Err(e) = sqlx::query("COMMIT").execute(&mut *conn).await {
                    rollback(conn).await;
                    return Err(AppError::Database(e));
                }
                Ok(value)
            }
            Err(err) => {
                rollback(conn).await;
                Err(err)
            }
        }
    }
}

impl Drop for WriteTransaction {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(rollback(conn));
            }
            // No runtime to roll back on: close the connection instead of
            // returning it to the pool mid-transaction.
            Err(_) => drop(conn.detach()),
        }
    }
}

async fn rollback(mut conn: PoolConnection<Sqlite>) {
    if let Err(e) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
        warn!("Rollback failed, closing connection: {}", e);
        if let Err(e) = conn.close().await {
            warn!("Failed to close connection after rollback error: {}", e);
        }
    }
}
