//! Permission checks over the user -> role -> permission graph

use crate::error::{ApiResult, AppError};
use crate::repository::UserRepository;
use crate::seed::ADMIN_ROLE;
use std::collections::HashSet;
use tracing::warn;

/// Resolved permission set of one user. `None` means the admin bypass.
async fn granted(users: &dyn UserRepository, user_id: i64) -> ApiResult<Option<HashSet<String>>> {
    let Some(user) = users.find_user(user_id).await? else {
        return Ok(Some(HashSet::new()));
    };
    if user.roles.iter().any(|r| r.code == ADMIN_ROLE) {
        return Ok(None);
    }

    let codes = users
        .permissions_of(user_id)
        .await?
        .into_iter()
        .map(|p| p.code)
        .collect();
    Ok(Some(codes))
}

pub async fn has_permission(users: &dyn UserRepository, user_id: i64, code: &str) -> ApiResult<bool> {
    Ok(match granted(users, user_id).await? {
        None => true,
        Some(codes) => codes.contains(code),
    })
}

pub async fn has_any_permission(users: &dyn UserRepository, user_id: i64, codes: &[&str]) -> ApiResult<bool> {
    Ok(match granted(users, user_id).await? {
        None => true,
        Some(held) => codes.iter().any(|c| held.contains(*c)),
    })
}

pub async fn has_all_permissions(users: &dyn UserRepository, user_id: i64, codes: &[&str]) -> ApiResult<bool> {
    Ok(match granted(users, user_id).await? {
        None => true,
        Some(held) => codes.iter().all(|c| held.contains(*c)),
    })
}

fn denied(user_id: i64, codes: &[&str]) -> AppError {
    warn!("User {} lacks permission {}", user_id, codes.join(","));
    AppError::Forbidden("权限不足".to_string())
}

/// 403 `权限不足` unless the user holds `code`
pub async fn require_permission(users: &dyn UserRepository, user_id: i64, code: &str) -> ApiResult<()> {
    if has_permission(users, user_id, code).await? {
        return Ok(());
    }
    Err(denied(user_id, &[code]))
}

pub async fn require_any_permission(users: &dyn UserRepository, user_id: i64, codes: &[&str]) -> ApiResult<()> {
    if has_any_permission(users, user_id, codes).await? {
        return Ok(());
    }
    Err(denied(user_id, codes))
}

pub async fn require_all_permissions(users: &dyn UserRepository, user_id: i64, codes: &[&str]) -> ApiResult<()> {
    if has_all_permissions(users, user_id, codes).await? {
        return Ok(());
    }
    Err(denied(user_id, codes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewUser, RoleFilter};
    use crate::repository::{MemoryStore, RoleRepository};

    async fn user_with_role(store: &MemoryStore, username: &str, role_code: &str) -> i64 {
        let filter = RoleFilter {
            keyword: Some(role_code.to_string()),
        };
        let (roles, _) = store.list_roles(&filter, Default::default()).await.unwrap();
        let role = roles.into_iter().find(|r| r.role.code == role_code).unwrap();

        let user = store
            .create_user(NewUser {
                username: username.to_string(),
                password_hash: "x".to_string(),
                email: None,
                real_name: None,
                role_ids: vec![role.role.id],
            })
            .await
            .unwrap();
        user.user.id
    }

    #[tokio::test]
    async fn test_admin_passes_every_check() {
        let store = MemoryStore::seeded("hash");
        let admin = store.find_user_by_username("admin").await.unwrap().unwrap();

        assert!(has_permission(&store, admin.user.id, "anything:at_all").await.unwrap());
        assert!(has_all_permissions(&store, admin.user.id, &["user:manage", "nope"]).await.unwrap());
    }

    #[tokio::test]
    async fn test_viewer_permissions_follow_role_grants() {
        let store = MemoryStore::seeded("hash");
        let viewer = user_with_role(&store, "reader", "viewer").await;

        assert!(has_permission(&store, viewer, "task:view").await.unwrap());
        assert!(!has_permission(&store, viewer, "task:manage").await.unwrap());
        assert!(has_any_permission(&store, viewer, &["task:manage", "role:view"]).await.unwrap());
        assert!(!has_all_permissions(&store, viewer, &["task:view", "task:review"]).await.unwrap());

        let err = require_permission(&store, viewer, "user:manage").await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(ref m) if m == "权限不足"));
    }

    #[tokio::test]
    async fn test_require_any_and_all() {
        let store = MemoryStore::seeded("hash");
        let steward = user_with_role(&store, "steward", "data_steward").await;

        require_any_permission(&store, steward, &["role:view", "task:assign"]).await.unwrap();
        require_all_permissions(&store, steward, &["task:assign", "task:review"]).await.unwrap();

        let err = require_any_permission(&store, steward, &["role:view", "user:manage"]).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
        let err = require_all_permissions(&store, steward, &["task:review", "role:view"]).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_unknown_user_holds_nothing() {
        let store = MemoryStore::seeded("hash");
        assert!(!has_any_permission(&store, 999, &["task:view"]).await.unwrap());
    }
}
