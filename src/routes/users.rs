//! User management route handlers

use crate::auth::{hash_password, require_all_permissions, require_permission, AuthUser};
use crate::error::{not_found_error, ApiResult, AppError};
use crate::models::*;
use crate::routes::extract::ValidatedJson;
use crate::state::SharedState;
use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use tracing::{debug, info};

fn user_not_found() -> AppError {
    not_found_error("用户不存在")
}

/// Granting roles also needs sight of the roles being granted
const ROLE_GRANT: &[&str] = &["user:manage", "role:view"];

/// GET /api/users
pub async fn list_users(
    State(state): State<SharedState>,
    Extension(auth): Extension<AuthUser>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<ApiResponse<Page<UserWithRoles>>>> {
    require_permission(state.users.as_ref(), auth.user_id, "user:view").await?;

    let filter = UserFilter {
        keyword: query.keyword(),
    };
    let page = query.page_request();
    let (items, total) = state.users.list_users(&filter, page).await?;
    debug!("Listed {} of {} users", items.len(), total);

    Ok(Json(ApiResponse::data(Page::new(items, total, page))))
}

/// GET /api/users/{id}
pub async fn get_user(
    State(state): State<SharedState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> ApiResult<Json<ApiResponse<UserWithRoles>>> {
    require_permission(state.users.as_ref(), auth.user_id, "user:view").await?;

    let user = state.users.find_user(id).await?.ok_or_else(user_not_found)?;
    Ok(Json(ApiResponse::data(user)))
}

/// POST /api/users
pub async fn create_user(
    State(state): State<SharedState>,
    Extension(auth): Extension<AuthUser>,
    ValidatedJson(req): ValidatedJson<CreateUserRequest>,
) -> ApiResult<Json<ApiResponse<UserWithRoles>>> {
    if req.role_ids.is_empty() {
        require_permission(state.users.as_ref(), auth.user_id, "user:manage").await?;
    } else {
        require_all_permissions(state.users.as_ref(), auth.user_id, ROLE_GRANT).await?;
    }

    let password_hash = hash_password(&req.password)?;
    let user = state
        .users
        .create_user(NewUser {
            username: req.username.trim().to_string(),
            password_hash,
            email: req.email,
            real_name: req.real_name,
            role_ids: req.role_ids,
        })
        .await?;

    info!("User {} created user {}", auth.username, user.user.username);
    Ok(Json(ApiResponse::with_message(user, "创建用户成功")))
}

/// PUT /api/users/{id}
pub async fn update_user(
    State(state): State<SharedState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<i64>,
    ValidatedJson(req): ValidatedJson<UpdateUserRequest>,
) -> ApiResult<Json<ApiResponse<UserWithRoles>>> {
    if req.role_ids.is_some() {
        require_all_permissions(state.users.as_ref(), auth.user_id, ROLE_GRANT).await?;
    } else {
        require_permission(state.users.as_ref(), auth.user_id, "user:manage").await?;
    }

    let password_hash = match req.password.as_deref() {
        Some(password) => Some(hash_password(password)?),
        None => None,
    };
    let changes = UserChanges {
        email: req.email,
        real_name: req.real_name,
        status: req.status,
        password_hash,
        role_ids: req.role_ids,
    };

    let user = state.users.update_user(id, changes).await?.ok_or_else(user_not_found)?;
    info!("User {} updated user {}", auth.username, id);
    Ok(Json(ApiResponse::with_message(user, "更新用户成功")))
}

/// DELETE /api/users/{id}
pub async fn delete_user(
    State(state): State<SharedState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> ApiResult<Json<ApiResponse<()>>> {
    require_permission(state.users.as_ref(), auth.user_id, "user:manage").await?;

    if id == auth.user_id {
        return Err(AppError::BadRequest("不能删除自己".to_string()));
    }
    if !state.users.delete_user(id).await? {
        return Err(user_not_found());
    }

    info!("User {} deleted user {}", auth.username, id);
    Ok(Json(ApiResponse::message_only("删除用户成功")))
}
