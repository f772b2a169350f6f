//! Authentication route handlers
//!
//! Provides login, register and current-user endpoints.

use crate::auth::{hash_password, verify_password, AuthUser};
use crate::error::{not_found_error, ApiResult, AppError};
use crate::models::{ApiResponse, LoginRequest, NewUser, Permission, RegisterRequest, Role, UserWithRoles};
use crate::routes::extract::ValidatedJson;
use crate::state::SharedState;
use axum::{
    extract::{Extension, State},
    Json,
};
use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

/// Public profile of a user
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
    pub real_name: Option<String>,
    pub avatar: Option<String>,
    pub roles: Vec<Role>,
}

impl From<UserWithRoles> for UserProfile {
    fn from(value: UserWithRoles) -> Self {
        let UserWithRoles { user, roles } = value;
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            real_name: user.real_name,
            avatar: user.avatar,
            roles,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: UserProfile,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub user: UserProfile,
    pub permissions: Vec<Permission>,
}

fn bad_credentials() -> AppError {
    AppError::Unauthorized("用户名或密码错误".to_string())
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<SharedState>,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> ApiResult<Json<ApiResponse<LoginResponse>>> {
    let account = state
        .users
        .find_user_by_username(req.username.trim())
        .await?
        .ok_or_else(bad_credentials)?;

    if !account.user.is_enabled() {
        warn!("Disabled account {} tried to log in", account.user.username);
        return Err(AppError::Forbidden("账号已被禁用".to_string()));
    }

    if !verify_password(&req.password, &account.user.password_hash)? {
        warn!("Failed login for {}", account.user.username);
        return Err(bad_credentials());
    }

    state.users.touch_login(account.user.id, Utc::now()).await?;
    let token = state
        .tokens
        .issue(account.user.id, &account.user.username, account.role_codes())?;

    info!("User {} logged in", account.user.username);
    Ok(Json(ApiResponse::data(LoginResponse {
        token,
        user: account.into(),
    })))
}

/// POST /api/auth/register
///
/// Creates an account without roles. The caller logs in afterwards.
pub async fn register(
    State(state): State<SharedState>,
    ValidatedJson(req): ValidatedJson<RegisterRequest>,
) -> ApiResult<Json<ApiResponse<UserWithRoles>>> {
    let password_hash = hash_password(&req.password)?;
    let user = state
        .users
        .create_user(NewUser {
            username: req.username.trim().to_string(),
            password_hash,
            email: req.email,
            real_name: req.real_name,
            role_ids: Vec::new(),
        })
        .await?;

    info!("Registered user {} ({})", user.user.username, user.user.id);
    Ok(Json(ApiResponse::with_message(user, "注册成功")))
}

/// GET /api/auth/me
pub async fn me(
    State(state): State<SharedState>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<Json<ApiResponse<MeResponse>>> {
    let user = state
        .users
        .find_user(auth.user_id)
        .await?
        .ok_or_else(|| not_found_error("用户不存在"))?;
    let permissions = state.users.permissions_of(auth.user_id).await?;

    Ok(Json(ApiResponse::data(MeResponse {
        user: user.into(),
        permissions,
    })))
}
