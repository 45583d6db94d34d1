use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ============================================================================
// Calendar Share Models
// ============================================================================

/// Grant from an owner to another user to see (and with `can_manage`, change)
/// the owner's calendar integrations.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CalendarShare {
    pub id: String,
    pub owner_user_id: String,
    pub grantee_user_id: String,
    pub can_manage: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}
