use serde::Serialize;
use sqlx::SqliteConnection;

use crate::db::{CalendarRepository, ConnectionRepository};
use crate::error::{AppError, AppResult};
use crate::services::reconcile::MutationPlan;

/// Row counts of an applied plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplySummary {
    pub connections_created: usize,
    pub connections_updated: usize,
    pub connections_deleted: usize,
    pub calendars_created: usize,
    pub calendars_updated: usize,
    pub calendars_deleted: usize,
    pub default_write_calendar_id: Option<String>,
}

/// Executes a [`MutationPlan`].
///
/// Must be handed a connection that is inside an open transaction; any error
/// is returned as-is and the caller's transaction is dropped, rolling back
/// every statement issued here.
pub struct MutationApplier;

impl MutationApplier {
    pub async fn apply(
        conn: &mut SqliteConnection,
        user_id: &str,
        plan: &MutationPlan,
    ) -> AppResult<ApplySummary> {
        let mut summary = ApplySummary::default();

        // Children before parents, and before anything that may reuse a freed identity.
        for calendar_id in &plan.calendar_deletes {
            if CalendarRepository::delete(&mut *conn, calendar_id).await? {
                summary.calendars_deleted += 1;
            }
        }
        for connection_id in &plan.connection_deletes {
            summary.calendars_deleted +=
                CalendarRepository::delete_by_connection(&mut *conn, connection_id).await? as usize;
            if ConnectionRepository::delete(&mut *conn, connection_id).await? {
                summary.connections_deleted += 1;
            }
        }

        for create in &plan.connection_creates {
            ConnectionRepository::create(&mut *conn, user_id, create).await?;
            summary.connections_created += 1;
        }
        for connection_id in &plan.connection_touches {
            ConnectionRepository::touch(&mut *conn, connection_id).await?;
            summary.connections_updated += 1;
        }

        for create in &plan.calendar_creates {
            CalendarRepository::create(&mut *conn, create).await?;
            summary.calendars_created += 1;
        }
        for planned in &plan.calendar_updates {
            if CalendarRepository::update(&mut *conn, &planned.calendar_id, &planned.update).await? {
                summary.calendars_updated += 1;
            }
        }

        // Always the last statement of the unit of work.
        if let Some(calendar_id) = &plan.default_write {
            Self::sweep_default_write(&mut *conn, user_id, calendar_id).await?;
            summary.default_write_calendar_id = Some(calendar_id.clone());
        }

        tracing::debug!(user_id, ?summary, "Applied calendar mutation plan");
        Ok(summary)
    }

    /// Make `calendar_id` the only default-write calendar of `user_id`.
    ///
    /// Fails with `NotFound` when the target is not one of the user's calendars,
    /// since the sweep would otherwise silently leave the user with no default.
    pub async fn sweep_default_write(
        conn: &mut SqliteConnection,
        user_id: &str,
        calendar_id: &str,
    ) -> AppResult<()> {
        if CalendarRepository::find_owned(&mut *conn, user_id, calendar_id)
            .await?
            .is_none()
        {
            return Err(AppError::NotFound("Calendar not found".to_string()));
        }

        CalendarRepository::sweep_default_write(&mut *conn, user_id, calendar_id).await?;
        Ok(())
    }
}
