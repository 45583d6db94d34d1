use chrono::Utc;
use sqlx::SqliteConnection;

use crate::db::models::{Connection, CreateConnection};
use crate::error::{AppError, AppResult};

// ============================================================================
// Connection Repository
// ============================================================================

/// Repository for the `connections` table.
///
/// Every method takes a plain connection so callers can run it inside their own
/// transaction (`&mut *tx`).
pub struct ConnectionRepository;

impl ConnectionRepository {
    /// All connections owned by a user, oldest first.
    pub async fn find_by_user_id(
        conn: &mut SqliteConnection,
        user_id: &str,
    ) -> AppResult<Vec<Connection>> {
        sqlx::query_as::<_, Connection>(
            r#"
            SELECT
                id,
                user_id,
                provider,
                auth_type,
                feed_url,
                scope,
                created_at,
                updated_at
            FROM connections
            WHERE user_id = ?
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(AppError::Database)
    }

    /// Find a connection by id, restricted to the given owner.
    pub async fn find_by_id_for_user(
        conn: &mut SqliteConnection,
        id: &str,
        user_id: &str,
    ) -> AppResult<Option<Connection>> {
        sqlx::query_as::<_, Connection>(
            r#"
            SELECT
                id,
                user_id,
                provider,
                auth_type,
                feed_url,
                scope,
                created_at,
                updated_at
            FROM connections
            WHERE id = ? AND user_id = ?
            "#,
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(AppError::Database)
    }

    /// Find the ICS connection for an already-normalized feed URL.
    pub async fn find_ics_by_feed_url(
        conn: &mut SqliteConnection,
        user_id: &str,
        feed_url: &str,
    ) -> AppResult<Option<Connection>> {
        sqlx::query_as::<_, Connection>(
            r#"
            SELECT
                id,
                user_id,
                provider,
                auth_type,
                feed_url,
                scope,
                created_at,
                updated_at
            FROM connections
            WHERE user_id = ? AND auth_type = 'ics' AND feed_url = ?
            "#,
        )
        .bind(user_id)
        .bind(feed_url)
        .fetch_optional(&mut *conn)
        .await
        .map_err(AppError::Database)
    }

    /// Insert a connection with a pre-assigned id and return the stored row.
    pub async fn create(
        conn: &mut SqliteConnection,
        user_id: &str,
        create: &CreateConnection,
    ) -> AppResult<Connection> {
        let now = Utc::now().naive_utc();

        sqlx::query_as::<_, Connection>(
            r#"
            INSERT INTO connections (
                id,
                user_id,
                provider,
                auth_type,
                feed_url,
                scope,
                created_at,
                updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING
                id,
                user_id,
                provider,
                auth_type,
                feed_url,
                scope,
                created_at,
                updated_at
            "#,
        )
        .bind(&create.id)
        .bind(user_id)
        .bind(create.provider)
        .bind(create.provider.auth_type())
        .bind(&create.feed_url)
        .bind(create.scope)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *conn)
        .await
        .map_err(AppError::Database)
    }

    /// Bump `updated_at` for a connection that was re-submitted.
    pub async fn touch(conn: &mut SqliteConnection, id: &str) -> AppResult<()> {
        let now = Utc::now().naive_utc();

        sqlx::query("UPDATE connections SET updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(id)
            .execute(&mut *conn)
            .await
            .map_err(AppError::Database)?;

        Ok(())
    }

    /// Delete a connection. Returns whether a row was removed.
    ///
    /// Callers delete the connection's calendars first; the FK cascade is only a backstop.
    pub async fn delete(conn: &mut SqliteConnection, id: &str) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM connections WHERE id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await
            .map_err(AppError::Database)?;

        Ok(result.rows_affected() > 0)
    }
}
