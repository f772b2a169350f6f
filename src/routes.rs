//! Route definitions and router setup
//!
//! Configures all API routes and middleware.

mod auth;
mod catalog;
mod data_elements;
pub mod extract;
mod mapping_rules;
mod quality;
mod quality_rules;
mod roles;
mod sync;
mod tasks;
mod users;

#[cfg(test)]
mod tests;

use crate::auth::auth_middleware;
use crate::config::Settings;
use crate::state::SharedState;
use axum::{
    http::{header, Method},
    middleware,
    routing::{get, post},
    Router,
};
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    request_id::MakeRequestUuid,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
    ServiceBuilderExt,
};
use tracing::Level;

/// Create the application router with all routes and middleware
pub fn create_router(state: SharedState) -> Router {
    let cors = build_cors_layer(&state.settings);

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    let layers = ServiceBuilder::new()
        .set_x_request_id(MakeRequestUuid)
        .layer(trace_layer)
        .layer(CompressionLayer::new())
        .layer(cors)
        .propagate_x_request_id();

    let public = Router::new()
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/register", post(auth::register));

    let protected = Router::new()
        .route("/api/auth/me", get(auth::me))
        // System management
        .route("/api/users", get(users::list_users).post(users::create_user))
        .route(
            "/api/users/{id}",
            get(users::get_user).put(users::update_user).delete(users::delete_user),
        )
        .route("/api/roles", get(roles::list_roles).post(roles::create_role))
        .route(
            "/api/roles/{id}",
            get(roles::get_role).put(roles::update_role).delete(roles::delete_role),
        )
        .route("/api/permissions", get(roles::list_permissions))
        // Lookups
        .route("/api/data-types", get(catalog::list_data_types))
        .route("/api/format-rules", get(catalog::list_format_rules))
        .route("/api/rule-categories", get(catalog::list_rule_categories))
        .route("/api/rule-templates", get(catalog::list_rule_templates))
        .route("/api/data-element-categories", get(catalog::list_data_element_categories))
        // Registries
        .route(
            "/api/data-elements",
            get(data_elements::list_data_elements).post(data_elements::create_data_element),
        )
        .route(
            "/api/data-elements/{id}",
            get(data_elements::get_data_element)
                .put(data_elements::update_data_element)
                .delete(data_elements::delete_data_element),
        )
        .route(
            "/api/quality-rules",
            get(quality_rules::list_quality_rules).post(quality_rules::create_quality_rule),
        )
        .route(
            "/api/quality-rules/{id}",
            get(quality_rules::get_quality_rule)
                .put(quality_rules::update_quality_rule)
                .delete(quality_rules::delete_quality_rule),
        )
        .route(
            "/api/mapping-rules",
            get(mapping_rules::list_mapping_rules).post(mapping_rules::create_mapping_rule),
        )
        .route(
            "/api/mapping-rules/{id}",
            get(mapping_rules::get_mapping_rule)
                .put(mapping_rules::update_mapping_rule)
                .delete(mapping_rules::delete_mapping_rule),
        )
        // Synchronization
        .route(
            "/api/external-data-sources",
            get(sync::list_data_sources).post(sync::create_data_source),
        )
        .route(
            "/api/external-data-sources/{id}",
            get(sync::get_data_source)
                .put(sync::update_data_source)
                .delete(sync::delete_data_source),
        )
        .route("/api/sync-tasks", get(sync::list_sync_tasks).post(sync::create_sync_task))
        .route(
            "/api/sync-tasks/{id}",
            get(sync::get_sync_task).put(sync::update_sync_task).delete(sync::delete_sync_task),
        )
        .route("/api/sync-tasks/{id}/execute", post(sync::execute_sync_task))
        // Quality
        .route(
            "/api/quality-checks",
            get(quality::list_quality_checks).post(quality::create_quality_check),
        )
        .route(
            "/api/quality-checks/{id}",
            get(quality::get_quality_check).delete(quality::delete_quality_check),
        )
        .route("/api/quality-checks/{id}/execute", post(quality::execute_quality_check))
        .route("/api/quality-reports", get(quality::list_quality_reports))
        .route("/api/quality-trends", get(quality::quality_trends))
        // Workflow
        .route("/api/tasks", get(tasks::list_tasks).post(tasks::create_task))
        .route(
            "/api/tasks/{id}",
            get(tasks::get_task).put(tasks::update_task).delete(tasks::delete_task),
        )
        .route("/api/tasks/{id}/assign", post(tasks::assign_task))
        .route(
            "/api/tasks/{id}/respond",
            post(tasks::respond_task).put(tasks::respond_task),
        )
        .route("/api/tasks/{id}/complete", post(tasks::complete_task))
        .route("/api/tasks/{id}/review", post(tasks::review_task))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .route("/health", get(health_check))
        .merge(public)
        .merge(protected)
        .layer(layers)
        .with_state(state)
}

/// Build CORS layer from settings
fn build_cors_layer(settings: &Settings) -> CorsLayer {
    let origins: Vec<_> = settings
        .cors
        .allowed_origins
        .iter()
        .filter_map(|s| s.parse().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT])
        .max_age(Duration::from_secs(3600));

    if origins.is_empty() {
        cors.allow_origin(Any)
    } else {
        cors.allow_origin(origins)
    }
}

/// Health check endpoint
async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "success": true,
        "message": "Server is running fine.",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}
