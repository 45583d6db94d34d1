use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::{get, patch, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::db::models::Calendar;
use crate::error::AppResult;
use crate::routes::auth::AuthUser;
use crate::services::calendar_integrations::{
    ConnectionWithCalendars, FlagPatch, IcsTarget, IcsUpsertOutcome, ReplaceOutcome,
};
use crate::services::invites::{InviteOutcome, InviteRequest};
use crate::services::reconcile::DesiredCalendar;
use crate::services::{CalendarIntegrationService, InviteService, ShareAccessPolicy};
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_integrations).put(replace_integrations))
        .route("/default", get(get_default_write_calendar))
        .route("/ics", post(upsert_ics).delete(remove_ics))
        .route("/invites", post(send_invite))
        .route("/:id", patch(update_flags).delete(delete_calendar))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Lets a grantee act on a calendar owner's integrations through a share.
#[derive(Debug, Default, Deserialize)]
pub struct OwnerQuery {
    pub user_id: Option<String>,
}

impl OwnerQuery {
    fn owner_or(self, actor_id: &str) -> String {
        self.user_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| actor_id.to_string())
    }
}

#[derive(Debug, Deserialize)]
pub struct ReplaceRequest {
    pub calendars: Vec<DesiredCalendar>,
}

#[derive(Debug, Deserialize)]
pub struct UpsertIcsRequest {
    pub url: String,
    pub name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DefaultWriteResponse {
    pub calendar: Option<Calendar>,
}

#[derive(Debug, Serialize)]
pub struct DeletedResponse {
    pub deleted: bool,
}

#[derive(Debug, Serialize)]
pub struct UpdatedResponse {
    pub updated: bool,
}

// ============================================================================
// Handlers
// ============================================================================

async fn list_integrations(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Query(owner): Query<OwnerQuery>,
) -> AppResult<Json<Vec<ConnectionWithCalendars>>> {
    let owner_id = owner.owner_or(&user_id);
    let access = ShareAccessPolicy::new(state.db.clone(), user_id);
    let integrations = CalendarIntegrationService::list(&state, &access, &owner_id).await?;
    Ok(Json(integrations))
}

/// Replace the owner's whole set of connections and calendars.
async fn replace_integrations(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Query(owner): Query<OwnerQuery>,
    Json(request): Json<ReplaceRequest>,
) -> AppResult<Json<ReplaceOutcome>> {
    let owner_id = owner.owner_or(&user_id);
    let access = ShareAccessPolicy::new(state.db.clone(), user_id);
    let outcome =
        CalendarIntegrationService::replace(&state, &access, &owner_id, request.calendars).await?;
    Ok(Json(outcome))
}

async fn get_default_write_calendar(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Query(owner): Query<OwnerQuery>,
) -> AppResult<Json<DefaultWriteResponse>> {
    let owner_id = owner.owner_or(&user_id);
    let access = ShareAccessPolicy::new(state.db.clone(), user_id);
    let calendar =
        CalendarIntegrationService::default_write_calendar(&state, &access, &owner_id).await?;
    Ok(Json(DefaultWriteResponse { calendar }))
}

async fn upsert_ics(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Query(owner): Query<OwnerQuery>,
    Json(request): Json<UpsertIcsRequest>,
) -> AppResult<Json<IcsUpsertOutcome>> {
    let owner_id = owner.owner_or(&user_id);
    let access = ShareAccessPolicy::new(state.db.clone(), user_id);
    let outcome = CalendarIntegrationService::upsert_ics_connection(
        &state,
        &access,
        &owner_id,
        &request.url,
        request.name,
    )
    .await?;
    Ok(Json(outcome))
}

async fn remove_ics(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Query(owner): Query<OwnerQuery>,
    Json(target): Json<IcsTarget>,
) -> AppResult<Json<DeletedResponse>> {
    let owner_id = owner.owner_or(&user_id);
    let access = ShareAccessPolicy::new(state.db.clone(), user_id);
    let deleted =
        CalendarIntegrationService::remove_ics_connection(&state, &access, &owner_id, target)
            .await?;
    Ok(Json(DeletedResponse { deleted }))
}

async fn update_flags(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(calendar_id): Path<String>,
    Query(owner): Query<OwnerQuery>,
    Json(patch): Json<FlagPatch>,
) -> AppResult<Json<UpdatedResponse>> {
    let owner_id = owner.owner_or(&user_id);
    let access = ShareAccessPolicy::new(state.db.clone(), user_id);
    let updated =
        CalendarIntegrationService::update_flags(&state, &access, &owner_id, &calendar_id, patch)
            .await?;
    Ok(Json(UpdatedResponse { updated }))
}

async fn delete_calendar(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(calendar_id): Path<String>,
    Query(owner): Query<OwnerQuery>,
) -> AppResult<Json<DeletedResponse>> {
    let owner_id = owner.owner_or(&user_id);
    let access = ShareAccessPolicy::new(state.db.clone(), user_id);
    let deleted =
        CalendarIntegrationService::delete_calendar(&state, &access, &owner_id, &calendar_id)
            .await?;
    Ok(Json(DeletedResponse { deleted }))
}

async fn send_invite(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Query(owner): Query<OwnerQuery>,
    Json(request): Json<InviteRequest>,
) -> AppResult<Json<InviteOutcome>> {
    let owner_id = owner.owner_or(&user_id);
    let access = ShareAccessPolicy::new(state.db.clone(), user_id);
    let outcome = InviteService::send_invite(&state, &access, &owner_id, request).await?;
    Ok(Json(outcome))
}
