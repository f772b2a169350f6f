//! Authentication middleware
//!
//! Validates the bearer token and stores the caller as `AuthUser` in the
//! request extensions.

use crate::auth::AuthUser;
use crate::error::AppError;
use crate::state::SharedState;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{authorization::Bearer, Authorization, HeaderMapExt};
use tracing::debug;

pub async fn auth_middleware(
    State(state): State<SharedState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let bearer = request
        .headers()
        .typed_get::<Authorization<Bearer>>()
        .ok_or_else(|| AppError::Unauthorized("未授权访问".to_string()))?;

    let user = AuthUser::from(state.tokens.verify(bearer.token())?);
    debug!("Request by {} (roles {:?})", user.username, user.roles);
    request.extensions_mut().insert(user);

    Ok(next.run(request).await)
}
