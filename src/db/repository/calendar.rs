use chrono::Utc;
use sqlx::SqliteConnection;

use crate::db::models::{Calendar, CreateCalendar, UpdateCalendar};
use crate::error::{AppError, AppResult};

// ============================================================================
// Calendar Repository
// ============================================================================

/// Repository for the `calendars` table.
///
/// Calendars carry no user id of their own; ownership is always resolved
/// through the owning connection.
pub struct CalendarRepository;

impl CalendarRepository {
    /// All calendars owned (via their connection) by a user.
    pub async fn find_by_user_id(
        conn: &mut SqliteConnection,
        user_id: &str,
    ) -> AppResult<Vec<Calendar>> {
        sqlx::query_as::<_, Calendar>(
            r#"
            SELECT
                c.id,
                c.connection_id,
                c.external_calendar_id,
                c.name,
                c.access,
                c.is_busy_source,
                c.is_default_write,
                c.time_zone,
                c.color,
                c.created_at,
                c.updated_at
            FROM calendars c
            INNER JOIN connections k ON k.id = c.connection_id
            WHERE k.user_id = ?
            ORDER BY c.created_at ASC, c.id ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(AppError::Database)
    }

    /// Find a calendar by id only if it belongs to the user.
    ///
    /// Absence and foreign ownership are deliberately indistinguishable.
    pub async fn find_owned(
        conn: &mut SqliteConnection,
        user_id: &str,
        calendar_id: &str,
    ) -> AppResult<Option<Calendar>> {
        sqlx::query_as::<_, Calendar>(
            r#"
            SELECT
                c.id,
                c.connection_id,
                c.external_calendar_id,
                c.name,
                c.access,
                c.is_busy_source,
                c.is_default_write,
                c.time_zone,
                c.color,
                c.created_at,
                c.updated_at
            FROM calendars c
            INNER JOIN connections k ON k.id = c.connection_id
            WHERE c.id = ? AND k.user_id = ?
            "#,
        )
        .bind(calendar_id)
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(AppError::Database)
    }

    /// The user's current default-write calendar, if any.
    pub async fn find_default_write(
        conn: &mut SqliteConnection,
        user_id: &str,
    ) -> AppResult<Option<Calendar>> {
        sqlx::query_as::<_, Calendar>(
            r#"
            SELECT
                c.id,
                c.connection_id,
                c.external_calendar_id,
                c.name,
                c.access,
                c.is_busy_source,
                c.is_default_write,
                c.time_zone,
                c.color,
                c.created_at,
                c.updated_at
            FROM calendars c
            INNER JOIN connections k ON k.id = c.connection_id
            WHERE k.user_id = ? AND c.is_default_write = 1
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(AppError::Database)
    }

    pub async fn create(conn: &mut SqliteConnection, create: &CreateCalendar) -> AppResult<Calendar> {
        let now = Utc::now().naive_utc();

        sqlx::query_as::<_, Calendar>(
            r#"
            INSERT INTO calendars (
                id,
                connection_id,
                external_calendar_id,
                name,
                access,
                is_busy_source,
                is_default_write,
                time_zone,
                color,
                created_at,
                updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, 0, ?, ?, ?, ?)
            RETURNING
                id,
                connection_id,
                external_calendar_id,
                name,
                access,
                is_busy_source,
                is_default_write,
                time_zone,
                color,
                created_at,
                updated_at
            "#,
        )
        .bind(&create.id)
        .bind(&create.connection_id)
        .bind(&create.external_calendar_id)
        .bind(&create.name)
        .bind(create.access)
        .bind(create.is_busy_source)
        .bind(&create.time_zone)
        .bind(&create.color)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *conn)
        .await
        .map_err(AppError::Database)
    }

    /// Apply a partial update. Fields left as `None` keep their stored value.
    pub async fn update(
        conn: &mut SqliteConnection,
        id: &str,
        update: &UpdateCalendar,
    ) -> AppResult<bool> {
        let now = Utc::now().naive_utc();

        let result = sqlx::query(
            r#"
            UPDATE calendars
            SET
                name = COALESCE(?, name),
                access = COALESCE(?, access),
                is_busy_source = COALESCE(?, is_busy_source),
                is_default_write = CASE WHEN ? THEN 0 ELSE is_default_write END,
                time_zone = COALESCE(?, time_zone),
                color = COALESCE(?, color),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&update.name)
        .bind(update.access)
        .bind(update.is_busy_source)
        .bind(update.clear_default_write)
        .bind(&update.time_zone)
        .bind(&update.color)
        .bind(now)
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(AppError::Database)?;

        Ok(result.rows_affected() > 0)
    }

    /// Make `calendar_id` the user's only default-write calendar in one statement.
    ///
    /// Every other calendar owned by the user is cleared in the same UPDATE, so
    /// there is never a moment with two defaults. `updated_at` only moves on rows
    /// whose flag actually changes.
    pub async fn sweep_default_write(
        conn: &mut SqliteConnection,
        user_id: &str,
        calendar_id: &str,
    ) -> AppResult<u64> {
        let now = Utc::now().naive_utc();

        let result = sqlx::query(
            r#"
            UPDATE calendars
            SET
                updated_at = CASE
                    WHEN is_default_write <> (CASE WHEN id = ? THEN 1 ELSE 0 END) THEN ?
                    ELSE updated_at
                END,
                is_default_write = CASE WHEN id = ? THEN 1 ELSE 0 END
            WHERE connection_id IN (SELECT id FROM connections WHERE user_id = ?)
            "#,
        )
        .bind(calendar_id)
        .bind(now)
        .bind(calendar_id)
        .bind(user_id)
        .execute(&mut *conn)
        .await
        .map_err(AppError::Database)?;

        Ok(result.rows_affected())
    }

    /// Delete a single calendar row by primary id.
    pub async fn delete(conn: &mut SqliteConnection, id: &str) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM calendars WHERE id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await
            .map_err(AppError::Database)?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete every calendar belonging to a connection.
    pub async fn delete_by_connection(
        conn: &mut SqliteConnection,
        connection_id: &str,
    ) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM calendars WHERE connection_id = ?")
            .bind(connection_id)
            .execute(&mut *conn)
            .await
            .map_err(AppError::Database)?;

        Ok(result.rows_affected())
    }
}
