use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::provider::Access;

// ============================================================================
// Calendar Models (calendars exposed by a connection)
// ============================================================================

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Calendar {
    pub id: String,
    pub connection_id: String,
    /// Stable within the owning connection. Caller-supplied for OAuth, derived for ICS.
    pub external_calendar_id: String,
    pub name: String,
    pub access: Access,
    pub is_busy_source: bool,
    pub is_default_write: bool,
    pub time_zone: Option<String>,
    pub color: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Fully resolved values for a new calendar row.
///
/// `is_default_write` is intentionally absent: new rows start as non-default and
/// only the default-write sweep may set the flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateCalendar {
    pub id: String,
    pub connection_id: String,
    pub external_calendar_id: String,
    pub name: String,
    pub access: Access,
    pub is_busy_source: bool,
    pub time_zone: Option<String>,
    pub color: Option<String>,
}

/// Partial update; `None` keeps the stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateCalendar {
    pub name: Option<String>,
    pub access: Option<Access>,
    pub is_busy_source: Option<bool>,
    /// Clears the default-write flag on this row. Row updates never set it; the sweep does.
    pub clear_default_write: bool,
    pub time_zone: Option<String>,
    pub color: Option<String>,
}
