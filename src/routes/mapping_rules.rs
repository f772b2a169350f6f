//! Mapping rule registry handlers

use crate::auth::AuthUser;
use crate::error::{not_found_error, ApiResult, AppError};
use crate::models::*;
use crate::routes::extract::{parse_filter, ValidatedJson};
use crate::state::SharedState;
use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use tracing::info;

fn rule_not_found() -> AppError {
    not_found_error("映射规则不存在")
}

/// GET /api/mapping-rules
pub async fn list_mapping_rules(
    State(state): State<SharedState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<ApiResponse<Page<MappingRule>>>> {
    let filter = MappingRuleFilter {
        keyword: query.keyword(),
        status: parse_filter("status", query.status.as_deref())?,
    };
    let page = query.page_request();
    let (items, total) = state.mapping_rules.list_mapping_rules(&filter, page).await?;
    Ok(Json(ApiResponse::data(Page::new(items, total, page))))
}

/// GET /api/mapping-rules/{id} with field and value mappings
pub async fn get_mapping_rule(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<ApiResponse<MappingRuleDetail>>> {
    let rule = state
        .mapping_rules
        .find_mapping_rule(id)
        .await?
        .ok_or_else(rule_not_found)?;
    Ok(Json(ApiResponse::data(rule)))
}

/// POST /api/mapping-rules
pub async fn create_mapping_rule(
    State(state): State<SharedState>,
    Extension(auth): Extension<AuthUser>,
    ValidatedJson(req): ValidatedJson<CreateMappingRuleRequest>,
) -> ApiResult<Json<ApiResponse<MappingRuleDetail>>> {
    let rule = state.mapping_rules.create_mapping_rule(&req, auth.user_id).await?;
    info!(
        "User {} created mapping rule {} with {} field mappings",
        auth.username,
        rule.rule.code,
        rule.field_mappings.len()
    );
    Ok(Json(ApiResponse::with_message(rule, "创建映射规则成功")))
}

/// PUT /api/mapping-rules/{id}
///
/// Child mappings are replaced only when the body carries them.
pub async fn update_mapping_rule(
    State(state): State<SharedState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<i64>,
    ValidatedJson(req): ValidatedJson<UpdateMappingRuleRequest>,
) -> ApiResult<Json<ApiResponse<MappingRuleDetail>>> {
    let rule = state
        .mapping_rules
        .update_mapping_rule(id, &req, auth.user_id)
        .await?
        .ok_or_else(rule_not_found)?;
    info!("User {} updated mapping rule {}", auth.username, rule.rule.code);
    Ok(Json(ApiResponse::with_message(rule, "更新映射规则成功")))
}

/// DELETE /api/mapping-rules/{id}
pub async fn delete_mapping_rule(
    State(state): State<SharedState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> ApiResult<Json<ApiResponse<()>>> {
    if !state.mapping_rules.delete_mapping_rule(id).await? {
        return Err(rule_not_found());
    }
    info!("User {} deleted mapping rule {}", auth.username, id);
    Ok(Json(ApiResponse::message_only("删除映射规则成功")))
}
