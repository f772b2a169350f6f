//! Credential store and permission graph models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// A registered console user
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(skip_serializing, default)] // Never send password hash to client
    pub password_hash: String,
    pub email: Option<String>,
    pub real_name: Option<String>,
    pub avatar: Option<String>,
    pub status: i16,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn is_enabled(&self) -> bool {
        self.status != super::STATUS_DISABLED
    }
}

/// User together with the roles linked through `user_roles`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserWithRoles {
    #[serde(flatten)]
    pub user: User,
    pub roles: Vec<Role>,
}

impl UserWithRoles {
    pub fn role_codes(&self) -> Vec<String> {
        self.roles.iter().map(|r| r.code.clone()).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub status: i16,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleWithPermissions {
    #[serde(flatten)]
    pub role: Role,
    pub permissions: Vec<Permission>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permission {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub module: String,
    pub action: String,
    pub description: Option<String>,
}

/// POST /api/auth/login
#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(custom(function = "crate::models::not_blank", message = "用户名不能为空"))]
    pub username: String,
    #[validate(length(min = 6, message = "密码至少6位"))]
    pub password: String,
}

/// POST /api/auth/register
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[validate(custom(function = "crate::models::not_blank", message = "用户名不能为空"), length(max = 50, message = "用户名最多50位"))]
    pub username: String,
    #[validate(length(min = 6, max = 100, message = "密码长度需为6-100位"))]
    pub password: String,
    #[validate(email(message = "邮箱格式不正确"))]
    pub email: Option<String>,
    #[validate(length(max = 50, message = "真实姓名最多50位"))]
    pub real_name: Option<String>,
}

/// POST /api/users
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
    #[validate(custom(function = "crate::models::not_blank", message = "用户名不能为空"), length(max = 50, message = "用户名最多50位"))]
    pub username: String,
    #[validate(length(min = 6, max = 100, message = "密码长度需为6-100位"))]
    pub password: String,
    #[validate(email(message = "邮箱格式不正确"))]
    pub email: Option<String>,
    #[validate(length(max = 50, message = "真实姓名最多50位"))]
    pub real_name: Option<String>,
    #[serde(default)]
    pub role_ids: Vec<i64>,
}

/// PUT /api/users/{id}: only these fields may change
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequest {
    #[validate(email(message = "邮箱格式不正确"))]
    pub email: Option<String>,
    #[validate(length(max = 50, message = "真实姓名最多50位"))]
    pub real_name: Option<String>,
    #[validate(range(min = 0, max = 1, message = "状态值无效"))]
    pub status: Option<i16>,
    #[validate(length(min = 6, max = 100, message = "密码长度需为6-100位"))]
    pub password: Option<String>,
    /// Replaces every role link when present
    pub role_ids: Option<Vec<i64>>,
}

/// Insert payload handed to the user repository (password already hashed)
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub password_hash: String,
    pub email: Option<String>,
    pub real_name: Option<String>,
    pub role_ids: Vec<i64>,
}

/// Update payload handed to the user repository (password already hashed)
#[derive(Debug, Clone, Default)]
pub struct UserChanges {
    pub email: Option<String>,
    pub real_name: Option<String>,
    pub status: Option<i16>,
    pub password_hash: Option<String>,
    pub role_ids: Option<Vec<i64>>,
}

/// POST /api/roles
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoleRequest {
    #[validate(custom(function = "crate::models::not_blank", message = "编码不能为空"), length(max = 50, message = "编码最多50位"))]
    pub code: String,
    #[validate(custom(function = "crate::models::not_blank", message = "名称不能为空"), length(max = 100, message = "名称最多100位"))]
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub permission_ids: Vec<i64>,
}

/// PUT /api/roles/{id}
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRoleRequest {
    #[validate(custom(function = "crate::models::not_blank", message = "名称不能为空"), length(max = 100, message = "名称最多100位"))]
    pub name: Option<String>,
    pub description: Option<String>,
    #[validate(range(min = 0, max = 1, message = "状态值无效"))]
    pub status: Option<i16>,
    /// Replaces every permission link when present
    pub permission_ids: Option<Vec<i64>>,
}

/// Filters for the user list
#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    pub keyword: Option<String>,
}

/// Filters for the role list
#[derive(Debug, Clone, Default)]
pub struct RoleFilter {
    pub keyword: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{STATUS_DISABLED, STATUS_ENABLED};

    #[test]
    fn test_only_disabled_status_blocks_user() {
        let mut user: User = serde_json::from_value(serde_json::json!({
            "id": 1,
            "username": "zhang",
            "email": null,
            "realName": null,
            "avatar": null,
            "status": STATUS_ENABLED,
            "lastLoginAt": null,
            "createdAt": "2024-01-01T00:00:00Z",
            "updatedAt": "2024-01-01T00:00:00Z"
        }))
        .unwrap();
        assert!(user.is_enabled());

        user.status = STATUS_DISABLED;
        assert!(!user.is_enabled());
    }
}
