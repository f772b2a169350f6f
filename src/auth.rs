//! Authentication and authorization module
//!
//! JWT bearer tokens identify the caller; permissions are resolved through
//! the user's roles on every check.

mod jwt;
mod middleware;
pub mod password;
mod permission;

pub use jwt::{Claims, TokenService};
pub use middleware::auth_middleware;
pub use password::{hash_password, verify_password};
pub use permission::{require_all_permissions, require_any_permission, require_permission};

/// Caller identity placed in the request extensions by `auth_middleware`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: i64,
    pub username: String,
    pub roles: Vec<String>,
}

impl From<Claims> for AuthUser {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: claims.user_id,
            username: claims.username,
            roles: claims.roles,
        }
    }
}
