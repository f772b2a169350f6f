//! Quality check, report and trend handlers

use crate::auth::AuthUser;
use crate::error::{not_found_error, ApiResult, AppError};
use crate::models::*;
use crate::routes::extract::{parse_filter, ValidatedJson};
use crate::state::SharedState;
use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use chrono::{Duration, Utc};
use tracing::info;

const REPORT_LIMIT: i64 = 10;
const DEFAULT_TREND_DAYS: i64 = 30;

fn check_not_found() -> AppError {
    not_found_error("质量检查不存在")
}

/// GET /api/quality-checks
pub async fn list_quality_checks(
    State(state): State<SharedState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<ApiResponse<Page<QualityCheck>>>> {
    let filter = QualityCheckFilter {
        keyword: query.keyword(),
        status: parse_filter("status", query.status.as_deref())?,
    };
    let page = query.page_request();
    let (items, total) = state.quality_checks.list_quality_checks(&filter, page).await?;
    Ok(Json(ApiResponse::data(Page::new(items, total, page))))
}

/// GET /api/quality-checks/{id} with its latest reports
pub async fn get_quality_check(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<ApiResponse<QualityCheckDetail>>> {
    let check = state
        .quality_checks
        .find_quality_check(id)
        .await?
        .ok_or_else(check_not_found)?;
    let reports = state.quality_checks.reports_of_check(id, REPORT_LIMIT).await?;
    Ok(Json(ApiResponse::data(QualityCheckDetail { check, reports })))
}

/// POST /api/quality-checks
pub async fn create_quality_check(
    State(state): State<SharedState>,
    Extension(auth): Extension<AuthUser>,
    ValidatedJson(req): ValidatedJson<CreateQualityCheckRequest>,
) -> ApiResult<Json<ApiResponse<QualityCheck>>> {
    let check = state.quality_checks.create_quality_check(&req, auth.user_id).await?;
    info!("User {} created quality check {}", auth.username, check.code);
    Ok(Json(ApiResponse::with_message(check, "创建质量检查成功")))
}

/// DELETE /api/quality-checks/{id}, reports cascade
pub async fn delete_quality_check(
    State(state): State<SharedState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> ApiResult<Json<ApiResponse<()>>> {
    if !state.quality_checks.delete_quality_check(id).await? {
        return Err(check_not_found());
    }
    info!("User {} deleted quality check {}", auth.username, id);
    Ok(Json(ApiResponse::message_only("删除质量检查成功")))
}

/// POST /api/quality-checks/{id}/execute
pub async fn execute_quality_check(
    State(state): State<SharedState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> ApiResult<Json<ApiResponse<QualityReport>>> {
    let report = state.quality.execute(id, auth.user_id).await?;
    Ok(Json(ApiResponse::with_message(report, "质量检查执行成功")))
}

/// GET /api/quality-reports, newest first
pub async fn list_quality_reports(
    State(state): State<SharedState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<ApiResponse<Page<QualityReport>>>> {
    let filter = QualityReportFilter {
        check_id: query.check_id,
    };
    let page = query.page_request();
    let (items, total) = state.quality_checks.list_quality_reports(&filter, page).await?;
    Ok(Json(ApiResponse::data(Page::new(items, total, page))))
}

/// GET /api/quality-trends?checkId=&days=
pub async fn quality_trends(
    State(state): State<SharedState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<ApiResponse<Vec<QualityTrendPoint>>>> {
    let check_id = query
        .check_id
        .ok_or_else(|| AppError::BadRequest("请指定检查ID".to_string()))?;
    let days = query.days.filter(|d| *d > 0).unwrap_or(DEFAULT_TREND_DAYS);

    let since = Utc::now() - Duration::days(days);
    let reports = state.quality_checks.quality_trend(check_id, since).await?;
    Ok(Json(ApiResponse::data(reports.iter().map(QualityTrendPoint::from).collect())))
}
