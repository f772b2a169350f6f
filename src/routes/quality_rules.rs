//! Quality rule registry handlers

use super::data_elements::VERSION_LIMIT;
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
    not_found_error("质量规则不存在")
}

/// GET /api/quality-rules
pub async fn list_quality_rules(
    State(state): State<SharedState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<ApiResponse<Page<QualityRule>>>> {
    let filter = QualityRuleFilter {
        keyword: query.keyword(),
        rule_type: parse_filter("ruleType", query.rule_type.as_deref())?,
        status: parse_filter("status", query.status.as_deref())?,
    };
    let page = query.page_request();
    let (items, total) = state.quality_rules.list_quality_rules(&filter, page).await?;
    Ok(Json(ApiResponse::data(Page::new(items, total, page))))
}

/// GET /api/quality-rules/{id}
pub async fn get_quality_rule(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<ApiResponse<QualityRuleDetail>>> {
    let rule = state
        .quality_rules
        .find_quality_rule(id)
        .await?
        .ok_or_else(rule_not_found)?;
    let versions = state.quality_rules.quality_rule_versions(id, VERSION_LIMIT).await?;
    Ok(Json(ApiResponse::data(QualityRuleDetail { rule, versions })))
}

/// POST /api/quality-rules
pub async fn create_quality_rule(
    State(state): State<SharedState>,
    Extension(auth): Extension<AuthUser>,
    ValidatedJson(req): ValidatedJson<CreateQualityRuleRequest>,
) -> ApiResult<Json<ApiResponse<QualityRule>>> {
    let rule = state.quality_rules.create_quality_rule(&req, auth.user_id).await?;
    info!("User {} created quality rule {}", auth.username, rule.code);
    Ok(Json(ApiResponse::with_message(rule, "创建质量规则成功")))
}

/// PUT /api/quality-rules/{id}
pub async fn update_quality_rule(
    State(state): State<SharedState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<i64>,
    ValidatedJson(req): ValidatedJson<UpdateQualityRuleRequest>,
) -> ApiResult<Json<ApiResponse<QualityRule>>> {
    let rule = state
        .quality_rules
        .update_quality_rule(id, &req, auth.user_id)
        .await?
        .ok_or_else(rule_not_found)?;
    info!("Quality rule {} is now at version {}", rule.code, rule.version);
    Ok(Json(ApiResponse::with_message(rule, "更新质量规则成功")))
}

/// DELETE /api/quality-rules/{id}
pub async fn delete_quality_rule(
    State(state): State<SharedState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> ApiResult<Json<ApiResponse<()>>> {
    if !state.quality_rules.delete_quality_rule(id).await? {
        return Err(rule_not_found());
    }
    info!("User {} deleted quality rule {}", auth.username, id);
    Ok(Json(ApiResponse::message_only("删除质量规则成功")))
}
