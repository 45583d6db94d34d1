use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::db::CalendarShareRepository;
use crate::error::{AppError, AppResult};

/// Decides whether the current caller may read or change an owner's integrations.
#[async_trait]
pub trait AccessPolicy: Send + Sync {
    async fn can_read(&self, owner_id: &str) -> AppResult<bool>;
    async fn can_write(&self, owner_id: &str) -> AppResult<bool>;
}

/// Fails with `Forbidden` unless the caller may read `owner_id`'s data.
pub async fn ensure_read(access: &dyn AccessPolicy, owner_id: &str) -> AppResult<()> {
    if access.can_read(owner_id).await? {
        Ok(())
    } else {
        tracing::warn!("Read access denied for owner {}", owner_id);
        Err(AppError::Forbidden)
    }
}

/// Fails with `Forbidden` unless the caller may change `owner_id`'s data.
pub async fn ensure_write(access: &dyn AccessPolicy, owner_id: &str) -> AppResult<()> {
    if access.can_write(owner_id).await? {
        Ok(())
    } else {
        tracing::warn!("Write access denied for owner {}", owner_id);
        Err(AppError::Forbidden)
    }
}

/// Owners always have full access; other users need a share, and a share with
/// `can_manage` to write.
pub struct ShareAccessPolicy {
    pool: SqlitePool,
    actor_id: String,
}

impl ShareAccessPolicy {
    pub fn new(pool: SqlitePool, actor_id: impl Into<String>) -> Self {
        Self {
            pool,
            actor_id: actor_id.into(),
        }
    }
}

#[async_trait]
impl AccessPolicy for ShareAccessPolicy {
    async fn can_read(&self, owner_id: &str) -> AppResult<bool> {
        if owner_id == self.actor_id {
            return Ok(true);
        }
        let share =
            CalendarShareRepository::find_by_owner_and_grantee(&self.pool, owner_id, &self.actor_id)
                .await?;
        Ok(share.is_some())
    }

    async fn can_write(&self, owner_id: &str) -> AppResult<bool> {
        if owner_id == self.actor_id {
            return Ok(true);
        }
        let share =
            CalendarShareRepository::find_by_owner_and_grantee(&self.pool, owner_id, &self.actor_id)
                .await?;
        Ok(matches!(share, Some(s) if s.can_manage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::init::test_pool;

    #[tokio::test]
    async fn owner_always_has_access() {
        let pool = test_pool().await;
        let policy = ShareAccessPolicy::new(pool, "owner");
        assert!(policy.can_read("owner").await.unwrap());
        assert!(policy.can_write("owner").await.unwrap());
    }

    #[tokio::test]
    async fn shares_grant_read_and_manage_grants_write() {
        let pool = test_pool().await;
        let policy = ShareAccessPolicy::new(pool.clone(), "grantee");

        assert!(!policy.can_read("owner").await.unwrap());
        assert!(matches!(
            ensure_read(&policy, "owner").await,
            Err(AppError::Forbidden)
        ));

        CalendarShareRepository::upsert(&pool, "owner", "grantee", false)
            .await
            .unwrap();
        assert!(policy.can_read("owner").await.unwrap());
        assert!(!policy.can_write("owner").await.unwrap());
        assert!(matches!(
            ensure_write(&policy, "owner").await,
            Err(AppError::Forbidden)
        ));

        CalendarShareRepository::upsert(&pool, "owner", "grantee", true)
            .await
            .unwrap();
        assert!(policy.can_write("owner").await.unwrap());
        assert!(ensure_write(&policy, "owner").await.is_ok());
    }
}
