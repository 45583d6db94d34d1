use std::sync::Arc;

use axum::{
    extract::{Path, State},
    routing::{get, put},
    Json, Router,
};
use serde::Deserialize;

use crate::db::models::CalendarShare;
use crate::db::CalendarShareRepository;
use crate::error::{AppError, AppResult};
use crate::routes::auth::AuthUser;
use crate::routes::calendars::DeletedResponse;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_shared).post(create_share))
        .route("/incoming", get(list_incoming_shared))
        .route("/:grantee_id", put(update_share).delete(revoke_share))
}

#[derive(Debug, Deserialize)]
pub struct CreateShareRequest {
    #[serde(alias = "granteeUserId")]
    pub grantee_user_id: String,
    #[serde(alias = "canManage")]
    pub can_manage: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateShareRequest {
    #[serde(alias = "canManage")]
    pub can_manage: bool,
}

/// List users the current user has shared their calendars with
async fn list_shared(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
) -> AppResult<Json<Vec<CalendarShare>>> {
    let shares = CalendarShareRepository::list_by_owner(&state.db, &user_id).await?;
    Ok(Json(shares))
}

/// List owners who shared their calendars with the current user
async fn list_incoming_shared(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
) -> AppResult<Json<Vec<CalendarShare>>> {
    let shares = CalendarShareRepository::list_by_grantee(&state.db, &user_id).await?;
    Ok(Json(shares))
}

/// Grant another user access, or change the level of an existing grant
async fn create_share(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Json(request): Json<CreateShareRequest>,
) -> AppResult<Json<CalendarShare>> {
    let grantee_id = request.grantee_user_id.trim();
    if grantee_id.is_empty() {
        return Err(AppError::Validation("grantee_user_id is required".to_string()));
    }
    if grantee_id == user_id {
        return Err(AppError::Validation(
            "Cannot share calendars with yourself".to_string(),
        ));
    }

    let share = CalendarShareRepository::upsert(
        &state.db,
        &user_id,
        grantee_id,
        request.can_manage.unwrap_or(false),
    )
    .await?;

    tracing::info!(
        owner = %user_id,
        grantee = %share.grantee_user_id,
        can_manage = share.can_manage,
        "Calendar share granted"
    );
    Ok(Json(share))
}

/// Toggle `can_manage` on an existing share
async fn update_share(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(grantee_id): Path<String>,
    Json(request): Json<UpdateShareRequest>,
) -> AppResult<Json<CalendarShare>> {
    let share = CalendarShareRepository::update_can_manage(
        &state.db,
        &user_id,
        &grantee_id,
        request.can_manage,
    )
    .await?
    .ok_or_else(|| AppError::NotFound("Share not found".to_string()))?;
    Ok(Json(share))
}

/// Revoke a share previously granted by the current user
async fn revoke_share(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(grantee_id): Path<String>,
) -> AppResult<Json<DeletedResponse>> {
    let deleted = CalendarShareRepository::delete(&state.db, &user_id, &grantee_id).await?;
    Ok(Json(DeletedResponse { deleted }))
}
