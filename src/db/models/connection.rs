use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::provider::{Access, AuthType, Provider};

// ============================================================================
// Connection Models
// ============================================================================

/// A user's link to one external calendar source: an OAuth account or an ICS feed.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Connection {
    pub id: String,
    pub user_id: String,
    pub provider: Provider,
    pub auth_type: AuthType,
    /// Normalized feed URL; only set when `auth_type` is `ics`.
    pub feed_url: Option<String>,
    pub scope: Access,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateConnection {
    pub id: String,
    pub provider: Provider,
    pub feed_url: Option<String>,
    pub scope: Access,
}
