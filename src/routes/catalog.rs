//! Read-only lookup endpoints

use crate::error::ApiResult;
use crate::models::*;
use crate::routes::extract::parse_filter;
use crate::state::SharedState;
use axum::{
    extract::{Query, State},
    Json,
};

/// GET /api/data-types
pub async fn list_data_types(State(state): State<SharedState>) -> ApiResult<Json<ApiResponse<Vec<DataType>>>> {
    Ok(Json(ApiResponse::data(state.catalog.list_data_types().await?)))
}

/// GET /api/format-rules
pub async fn list_format_rules(State(state): State<SharedState>) -> ApiResult<Json<ApiResponse<Vec<FormatRule>>>> {
    Ok(Json(ApiResponse::data(state.catalog.list_format_rules().await?)))
}

/// GET /api/rule-categories
pub async fn list_rule_categories(
    State(state): State<SharedState>,
) -> ApiResult<Json<ApiResponse<Vec<RuleCategory>>>> {
    Ok(Json(ApiResponse::data(state.catalog.list_rule_categories().await?)))
}

/// GET /api/rule-templates?ruleType=
pub async fn list_rule_templates(
    State(state): State<SharedState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<ApiResponse<Vec<RuleTemplate>>>> {
    let rule_type = parse_filter::<RuleType>("ruleType", query.rule_type.as_deref())?;
    Ok(Json(ApiResponse::data(state.catalog.list_rule_templates(rule_type).await?)))
}

/// GET /api/data-element-categories as a tree
pub async fn list_data_element_categories(
    State(state): State<SharedState>,
) -> ApiResult<Json<ApiResponse<Vec<CategoryNode>>>> {
    let categories = state.catalog.list_data_element_categories().await?;
    Ok(Json(ApiResponse::data(build_category_tree(categories))))
}
