//! Authorization API: access checks for projects and teams, and scope grant
//! management for administrators.

use crate::{
    app::AppState,
    auth::{RequireAdmin, RequireAuth},
    error::ApiError,
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use fern_gate_access::{PermissionLevel, ScopeGrant};
use fern_gate_core::UserId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

const DEFAULT_ACTION: &str = "read";

#[derive(Debug, Deserialize)]
pub struct AccessQuery {
    action: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ProjectAccess {
    pub allowed: bool,
}

#[derive(Debug, Serialize)]
pub struct TeamAccess {
    pub can_access: bool,
    pub can_manage: bool,
}

#[derive(Debug, Deserialize)]
pub struct GrantScopeRequest {
    scope: String,
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct RevokeScopeQuery {
    scope: String,
}

#[derive(Debug, Serialize)]
pub struct RevokeScopeResponse {
    pub revoked: u64,
}

/// Checks whether the caller may perform `action` (default `read`) on a project.
///
/// A matching scope grant or an explicit project permission at that level
/// allows the action.
pub async fn project_access(
    RequireAuth(caller): RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<String>,
    Query(query): Query<AccessQuery>,
) -> Result<Json<ProjectAccess>, ApiError> {
    let action = query.action.as_deref().unwrap_or(DEFAULT_ACTION);

    let mut allowed = state
        .authz
        .caller_can_access_resource(&caller, &project_id, action)
        .await
        .map_err(|e| ApiError::from_authorization(e.current_context()))?;

    if !allowed {
        if let (Some(user), Ok(level)) = (caller.user(), action.parse::<PermissionLevel>()) {
            allowed = state
                .authz
                .has_project_permission(user, &project_id, level)
                .await
                .map_err(|e| ApiError::from_authorization(e.current_context()))?;
        }
    }

    Ok(Json(ProjectAccess { allowed }))
}

/// Reports the caller's access to a team's projects and team management.
pub async fn team_access(
    RequireAuth(caller): RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(team): Path<String>,
) -> Json<TeamAccess> {
    let access = match caller.user() {
        Some(user) => TeamAccess {
            can_access: state.authz.can_access_team_projects(user, &team),
            can_manage: state.authz.can_manage_team(user, &team),
        },
        None => TeamAccess {
            can_access: false,
            can_manage: false,
        },
    };
    Json(access)
}

/// Lists a user's unexpired scope grants.
pub async fn list_scopes(
    RequireAdmin(_admin): RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<ScopeGrant>>, ApiError> {
    let grants = state
        .authz
        .list_active_scopes(&UserId::new(user_id))
        .await
        .map_err(|e| ApiError::from_authorization(e.current_context()))?;
    Ok(Json(grants))
}

/// Grants a scope to a user.
pub async fn grant_scope(
    RequireAdmin(admin): RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Json(request): Json<GrantScopeRequest>,
) -> Result<(StatusCode, Json<ScopeGrant>), ApiError> {
    let granted_by = UserId::new(admin.subject());
    let grant = state
        .authz
        .grant_scope(
            &UserId::new(user_id),
            &request.scope,
            &granted_by,
            request.expires_at,
        )
        .await
        .map_err(|e| ApiError::from_authorization(e.current_context()))?;

    info!(
        user_id = %grant.user_id,
        scope = %grant.scope,
        granted_by = %granted_by,
        "scope granted"
    );
    Ok((StatusCode::CREATED, Json(grant)))
}

/// Revokes every grant of a scope string from a user.
pub async fn revoke_scope(
    RequireAdmin(admin): RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Query(query): Query<RevokeScopeQuery>,
) -> Result<Json<RevokeScopeResponse>, ApiError> {
    let user_id = UserId::new(user_id);
    let revoked = state
        .authz
        .revoke_scope(&user_id, &query.scope)
        .await
        .map_err(|e| ApiError::from_authorization(e.current_context()))?;

    info!(%user_id, scope = %query.scope, revoked, revoked_by = admin.subject(), "scope revoked");
    Ok(Json(RevokeScopeResponse { revoked }))
}
