use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use tracing::info;

use crate::db::models::{AuthType, Calendar, Connection, UpdateCalendar};
use crate::db::{CalendarRepository, ConnectionRepository, WriteTransaction};
use crate::error::{AppError, AppResult};
use crate::services::access::{ensure_read, ensure_write, AccessPolicy};
use crate::services::apply::{ApplySummary, MutationApplier};
use crate::services::identity::normalize_feed_url;
use crate::services::reconcile::{self, DesiredCalendar, LoadedState, ReconcileOptions, SkippedItem};
use crate::AppState;

/// A connection together with the calendars it exposes.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionWithCalendars {
    #[serde(flatten)]
    pub connection: Connection,
    pub calendars: Vec<Calendar>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplaceOutcome {
    pub summary: ApplySummary,
    /// Desired items that were dropped as malformed (best-effort mode only).
    pub skipped: Vec<SkippedItem>,
    pub integrations: Vec<ConnectionWithCalendars>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertStatus {
    Created,
    Updated,
}

impl UpsertStatus {
    fn from_created(created: bool) -> Self {
        if created {
            UpsertStatus::Created
        } else {
            UpsertStatus::Updated
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IcsUpsertOutcome {
    pub calendar_id: String,
    pub connection_id: String,
    /// Status of the calendar row, which is what callers usually care about.
    pub status: UpsertStatus,
    pub connection_status: UpsertStatus,
    pub calendar_status: UpsertStatus,
}

/// Identifies the ICS source to remove: by connection id, or by feed URL.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IcsTarget {
    #[serde(default, alias = "connectionId")]
    pub connection_id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct FlagPatch {
    #[serde(default, alias = "isBusySource")]
    pub is_busy_source: Option<bool>,
    #[serde(default, alias = "isDefaultWrite")]
    pub is_default_write: Option<bool>,
}

pub struct CalendarIntegrationService;

impl CalendarIntegrationService {
    /// Read a user's connections and calendars and index them by identity.
    ///
    /// Call with the same transaction the resulting plan is applied in.
    pub async fn load_state(conn: &mut SqliteConnection, user_id: &str) -> AppResult<LoadedState> {
        let connections = ConnectionRepository::find_by_user_id(&mut *conn, user_id).await?;
        let calendars = CalendarRepository::find_by_user_id(&mut *conn, user_id).await?;
        Ok(LoadedState::new(connections, calendars))
    }

    async fn read_integrations(
        state: &Arc<AppState>,
        user_id: &str,
    ) -> AppResult<Vec<ConnectionWithCalendars>> {
        let mut conn = state.db.acquire().await.map_err(AppError::Database)?;
        let connections = ConnectionRepository::find_by_user_id(&mut conn, user_id).await?;
        let calendars = CalendarRepository::find_by_user_id(&mut conn, user_id).await?;

        let mut by_connection: HashMap<String, Vec<Calendar>> = HashMap::new();
        for calendar in calendars {
            by_connection
                .entry(calendar.connection_id.clone())
                .or_default()
                .push(calendar);
        }

        Ok(connections
            .into_iter()
            .map(|connection| {
                let calendars = by_connection.remove(&connection.id).unwrap_or_default();
                ConnectionWithCalendars {
                    connection,
                    calendars,
                }
            })
            .collect())
    }

    /// All connections of `owner_id` with their calendars.
    pub async fn list(
        state: &Arc<AppState>,
        access: &dyn AccessPolicy,
        owner_id: &str,
    ) -> AppResult<Vec<ConnectionWithCalendars>> {
        ensure_read(access, owner_id).await?;
        Self::read_integrations(state, owner_id).await
    }

    /// The calendar new events of `owner_id` are written to by default, if any.
    pub async fn default_write_calendar(
        state: &Arc<AppState>,
        access: &dyn AccessPolicy,
        owner_id: &str,
    ) -> AppResult<Option<Calendar>> {
        ensure_read(access, owner_id).await?;
        let mut conn = state.db.acquire().await.map_err(AppError::Database)?;
        CalendarRepository::find_default_write(&mut conn, owner_id).await
    }

    /// Make the stored connections and calendars of `owner_id` match `desired`.
    ///
    /// Runs load, plan and apply in one transaction. Malformed items are skipped
    /// and reported unless strict replace is configured.
    pub async fn replace(
        state: &Arc<AppState>,
        access: &dyn AccessPolicy,
        owner_id: &str,
        desired: Vec<DesiredCalendar>,
    ) -> AppResult<ReplaceOutcome> {
        ensure_write(access, owner_id).await?;

        let max_items = state.config.calendar.max_replace_items;
        if desired.len() > max_items {
            return Err(AppError::Validation(format!(
                "at most {} calendars can be submitted at once",
                max_items
            )));
        }

        let options = ReconcileOptions::full_replace(state.config.calendar.strict_replace);

        let _guard = state.locks.lock(owner_id).await;
        let mut tx = WriteTransaction::begin(&state.db).await?;

        let result: AppResult<_> = async {
            let conn = tx.conn()?;
            let loaded = Self::load_state(conn, owner_id).await?;
            let plan = reconcile::plan(&loaded, &desired, options)
                .map_err(|e| AppError::BadRequest(e.to_string()))?;
            let summary = MutationApplier::apply(conn, owner_id, &plan).await?;
            Ok((plan, summary))
        }
        .await;
        let (plan, summary) = tx.finish(result).await?;

        info!(
            user_id = owner_id,
            created = summary.calendars_created,
            updated = summary.calendars_updated,
            deleted = summary.calendars_deleted,
            connections_deleted = summary.connections_deleted,
            skipped = plan.skipped.len(),
            default_write = ?summary.default_write_calendar_id,
            "Reconciled calendar integrations"
        );

        let integrations = Self::read_integrations(state, owner_id).await?;

        Ok(ReplaceOutcome {
            summary,
            skipped: plan.skipped,
            integrations,
        })
    }

    /// Add an ICS feed, or refresh it if the same feed is already connected.
    ///
    /// `webcal://` and `https://` spellings of one feed resolve to the same rows.
    pub async fn upsert_ics_connection(
        state: &Arc<AppState>,
        access: &dyn AccessPolicy,
        owner_id: &str,
        url: &str,
        name: Option<String>,
    ) -> AppResult<IcsUpsertOutcome> {
        ensure_write(access, owner_id).await?;

        let desired = [DesiredCalendar {
            provider: "ics".to_string(),
            url: Some(url.to_string()),
            name,
            ..Default::default()
        }];

        let _guard = state.locks.lock(owner_id).await;
        let mut tx = WriteTransaction::begin(&state.db).await?;

        let result: AppResult<_> = async {
            let conn = tx.conn()?;
            let loaded = Self::load_state(conn, owner_id).await?;
            let plan = reconcile::plan(&loaded, &desired, ReconcileOptions::single_item())
                .map_err(|e| AppError::BadRequest(e.reason))?;
            let outcome = plan.outcomes.first().cloned().ok_or_else(|| {
                AppError::Internal(anyhow::anyhow!("ICS upsert produced no outcome"))
            })?;

            MutationApplier::apply(conn, owner_id, &plan).await?;
            Ok(outcome)
        }
        .await;
        let outcome = tx.finish(result).await?;

        info!(
            user_id = owner_id,
            connection_id = %outcome.connection_id,
            calendar_id = %outcome.calendar_id,
            created = outcome.calendar_created,
            "Upserted ICS calendar"
        );

        Ok(IcsUpsertOutcome {
            calendar_id: outcome.calendar_id,
            connection_id: outcome.connection_id,
            status: UpsertStatus::from_created(outcome.calendar_created),
            connection_status: UpsertStatus::from_created(outcome.connection_created),
            calendar_status: UpsertStatus::from_created(outcome.calendar_created),
        })
    }

    /// Remove an ICS connection and its calendar. Returns whether anything was deleted.
    pub async fn remove_ics_connection(
        state: &Arc<AppState>,
        access: &dyn AccessPolicy,
        owner_id: &str,
        target: IcsTarget,
    ) -> AppResult<bool> {
        ensure_write(access, owner_id).await?;

        let connection_id = target
            .connection_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string);
        let feed_url = match target.url.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
            Some(raw) if connection_id.is_none() => Some(
                normalize_feed_url(raw).map_err(|e| AppError::BadRequest(e.to_string()))?,
            ),
            _ => None,
        };
        if connection_id.is_none() && feed_url.is_none() {
            return Err(AppError::BadRequest(
                "connection_id or url is required".to_string(),
            ));
        }

        let _guard = state.locks.lock(owner_id).await;
        let mut tx = WriteTransaction::begin(&state.db).await?;

        let result: AppResult<_> = async {
            let conn = tx.conn()?;
            let connection = match (&connection_id, &feed_url) {
                (Some(id), _) => ConnectionRepository::find_by_id_for_user(conn, id, owner_id)
                    .await?
                    .filter(|c| c.auth_type == AuthType::Ics),
                (None, Some(url)) => {
                    ConnectionRepository::find_ics_by_feed_url(conn, owner_id, url.as_str()).await?
                }
                (None, None) => None,
            };

            let Some(connection) = connection else {
                return Ok(None);
            };

            let calendars_deleted =
                CalendarRepository::delete_by_connection(conn, &connection.id).await?;
            let deleted = ConnectionRepository::delete(conn, &connection.id).await?;
            Ok(Some((connection.id, calendars_deleted, deleted)))
        }
        .await;

        let Some((connection_id, calendars_deleted, deleted)) = tx.finish(result).await? else {
            return Ok(false);
        };

        info!(
            user_id = owner_id,
            connection_id = %connection_id,
            calendars_deleted,
            "Removed ICS connection"
        );

        Ok(deleted)
    }

    /// Patch the busy-source and default-write flags of one calendar.
    ///
    /// Setting default-write runs the same single-statement sweep as a full replace.
    pub async fn update_flags(
        state: &Arc<AppState>,
        access: &dyn AccessPolicy,
        owner_id: &str,
        calendar_id: &str,
        patch: FlagPatch,
    ) -> AppResult<bool> {
        ensure_write(access, owner_id).await?;

        let _guard = state.locks.lock(owner_id).await;
        let mut tx = WriteTransaction::begin(&state.db).await?;

        let result: AppResult<_> = async {
            let conn = tx.conn()?;
            CalendarRepository::find_owned(conn, owner_id, calendar_id)
                .await?
                .ok_or_else(|| AppError::NotFound("Calendar not found".to_string()))?;

            let update = UpdateCalendar {
                is_busy_source: patch.is_busy_source,
                clear_default_write: patch.is_default_write == Some(false),
                ..Default::default()
            };

            let mut updated = false;
            if update.is_busy_source.is_some() || update.clear_default_write {
                updated |= CalendarRepository::update(conn, calendar_id, &update).await?;
            }
            if patch.is_default_write == Some(true) {
                MutationApplier::sweep_default_write(conn, owner_id, calendar_id).await?;
                updated = true;
            }
            Ok(updated)
        }
        .await;
        tx.finish(result).await
    }

    /// Delete one calendar. The owning connection is left in place even if it
    /// ends up with no calendars; the next full replace prunes it.
    pub async fn delete_calendar(
        state: &Arc<AppState>,
        access: &dyn AccessPolicy,
        owner_id: &str,
        calendar_id: &str,
    ) -> AppResult<bool> {
        ensure_write(access, owner_id).await?;

        let _guard = state.locks.lock(owner_id).await;
        let mut tx = WriteTransaction::begin(&state.db).await?;

        let result: AppResult<_> = async {
            let conn = tx.conn()?;
            CalendarRepository::find_owned(conn, owner_id, calendar_id)
                .await?
                .ok_or_else(|| AppError::NotFound("Calendar not found".to_string()))?;
            CalendarRepository::delete(conn, calendar_id).await
        }
        .await;
        tx.finish(result).await
    }
}
