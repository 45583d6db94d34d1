use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::CalendarShare;
use crate::error::{AppError, AppResult};

// ============================================================================
// Calendar Share Repository
// ============================================================================

pub struct CalendarShareRepository;

impl CalendarShareRepository {
    /// Create a share (owner grants access to grantee). Re-granting updates `can_manage`.
    pub async fn upsert(
        pool: &SqlitePool,
        owner_user_id: &str,
        grantee_user_id: &str,
        can_manage: bool,
    ) -> AppResult<CalendarShare> {
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().naive_utc();

        sqlx::query_as::<_, CalendarShare>(
            r#"
            INSERT INTO calendar_shares (
                id, owner_user_id, grantee_user_id, can_manage, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(owner_user_id, grantee_user_id) DO UPDATE SET
                can_manage = excluded.can_manage,
                updated_at = excluded.updated_at
            RETURNING
                id, owner_user_id, grantee_user_id, can_manage, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(owner_user_id)
        .bind(grantee_user_id)
        .bind(can_manage)
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Find a single share by owner and grantee.
    pub async fn find_by_owner_and_grantee(
        pool: &SqlitePool,
        owner_user_id: &str,
        grantee_user_id: &str,
    ) -> AppResult<Option<CalendarShare>> {
        sqlx::query_as::<_, CalendarShare>(
            r#"
            SELECT
                id, owner_user_id, grantee_user_id, can_manage, created_at, updated_at
            FROM calendar_shares
            WHERE owner_user_id = ? AND grantee_user_id = ?
            LIMIT 1
            "#,
        )
        .bind(owner_user_id)
        .bind(grantee_user_id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Update the `can_manage` flag for an existing share.
    pub async fn update_can_manage(
        pool: &SqlitePool,
        owner_user_id: &str,
        grantee_user_id: &str,
        can_manage: bool,
    ) -> AppResult<Option<CalendarShare>> {
        let now = chrono::Utc::now().naive_utc();

        sqlx::query_as::<_, CalendarShare>(
            r#"
            UPDATE calendar_shares
            SET can_manage = ?, updated_at = ?
            WHERE owner_user_id = ? AND grantee_user_id = ?
            RETURNING
                id, owner_user_id, grantee_user_id, can_manage, created_at, updated_at
            "#,
        )
        .bind(can_manage)
        .bind(now)
        .bind(owner_user_id)
        .bind(grantee_user_id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Delete a share (revoke access). Returns whether a share existed.
    pub async fn delete(
        pool: &SqlitePool,
        owner_user_id: &str,
        grantee_user_id: &str,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            "DELETE FROM calendar_shares WHERE owner_user_id = ? AND grantee_user_id = ?",
        )
        .bind(owner_user_id)
        .bind(grantee_user_id)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(result.rows_affected() > 0)
    }

    /// Shares granted by an owner, newest first.
    pub async fn list_by_owner(
        pool: &SqlitePool,
        owner_user_id: &str,
    ) -> AppResult<Vec<CalendarShare>> {
        sqlx::query_as::<_, CalendarShare>(
            r#"
            SELECT
                id, owner_user_id, grantee_user_id, can_manage, created_at, updated_at
            FROM calendar_shares
            WHERE owner_user_id = ?
            ORDER BY created_at DESC
            "#,
        )
        .bind(owner_user_id)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Shares other owners granted to this user, newest first.
    pub async fn list_by_grantee(
        pool: &SqlitePool,
        grantee_user_id: &str,
    ) -> AppResult<Vec<CalendarShare>> {
        sqlx::query_as::<_, CalendarShare>(
            r#"
            SELECT
                id, owner_user_id, grantee_user_id, can_manage, created_at, updated_at
            FROM calendar_shares
            WHERE grantee_user_id = ?
            ORDER BY created_at DESC
            "#,
        )
        .bind(grantee_user_id)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }
}
