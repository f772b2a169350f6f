//! Role and permission route handlers

use crate::auth::{require_any_permission, require_permission, AuthUser};
use crate::error::{not_found_error, ApiResult, AppError};
use crate::models::*;
use crate::routes::extract::ValidatedJson;
use crate::state::SharedState;
use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use std::collections::BTreeMap;
use tracing::info;

fn role_not_found() -> AppError {
    not_found_error("角色不存在")
}

/// GET /api/roles
///
/// User managers may list roles to pick assignments from.
pub async fn list_roles(
    State(state): State<SharedState>,
    Extension(auth): Extension<AuthUser>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<ApiResponse<Page<RoleWithPermissions>>>> {
    require_any_permission(state.users.as_ref(), auth.user_id, &["role:view", "user:manage"]).await?;

    let filter = RoleFilter {
        keyword: query.keyword(),
    };
    let page = query.page_request();
    let (items, total) = state.roles.list_roles(&filter, page).await?;
    Ok(Json(ApiResponse::data(Page::new(items, total, page))))
}

/// GET /api/roles/{id}
pub async fn get_role(
    State(state): State<SharedState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> ApiResult<Json<ApiResponse<RoleWithPermissions>>> {
    require_permission(state.users.as_ref(), auth.user_id, "role:view").await?;

    let role = state.roles.find_role(id).await?.ok_or_else(role_not_found)?;
    Ok(Json(ApiResponse::data(role)))
}

/// POST /api/roles
pub async fn create_role(
    State(state): State<SharedState>,
    Extension(auth): Extension<AuthUser>,
    ValidatedJson(req): ValidatedJson<CreateRoleRequest>,
) -> ApiResult<Json<ApiResponse<RoleWithPermissions>>> {
    require_permission(state.users.as_ref(), auth.user_id, "role:manage").await?;

    let role = state.roles.create_role(&req).await?;
    info!("User {} created role {}", auth.username, role.role.code);
    Ok(Json(ApiResponse::with_message(role, "创建角色成功")))
}

/// PUT /api/roles/{id}
pub async fn update_role(
    State(state): State<SharedState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<i64>,
    ValidatedJson(req): ValidatedJson<UpdateRoleRequest>,
) -> ApiResult<Json<ApiResponse<RoleWithPermissions>>> {
    require_permission(state.users.as_ref(), auth.user_id, "role:manage").await?;

    let role = state.roles.update_role(id, &req).await?.ok_or_else(role_not_found)?;
    info!("User {} updated role {}", auth.username, role.role.code);
    Ok(Json(ApiResponse::with_message(role, "更新角色成功")))
}

/// DELETE /api/roles/{id}
pub async fn delete_role(
    State(state): State<SharedState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> ApiResult<Json<ApiResponse<()>>> {
    require_permission(state.users.as_ref(), auth.user_id, "role:manage").await?;

    if !state.roles.delete_role(id).await? {
        return Err(role_not_found());
    }
    info!("User {} deleted role {}", auth.username, id);
    Ok(Json(ApiResponse::message_only("删除角色成功")))
}

/// GET /api/permissions, grouped by module
pub async fn list_permissions(
    State(state): State<SharedState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<ApiResponse<BTreeMap<String, Vec<Permission>>>>> {
    let module = query.module.as_deref().map(str::trim).filter(|m| !m.is_empty());
    let permissions = state.roles.list_permissions(module).await?;

    let mut grouped: BTreeMap<String, Vec<Permission>> = BTreeMap::new();
    for permission in permissions {
        grouped.entry(permission.module.clone()).or_default().push(permission);
    }
    Ok(Json(ApiResponse::data(grouped)))
}
