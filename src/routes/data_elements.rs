//! Data element registry handlers
//!
//! The registry is versioned: every update snapshots the previous row.

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

/// History entries embedded in a detail response
pub(super) const VERSION_LIMIT: i64 = 10;

fn element_not_found() -> AppError {
    not_found_error("数据元不存在")
}

/// GET /api/data-elements
pub async fn list_data_elements(
    State(state): State<SharedState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<ApiResponse<Page<DataElement>>>> {
    let filter = DataElementFilter {
        keyword: query.keyword(),
        category_id: query.category_id,
        status: parse_filter("status", query.status.as_deref())?,
    };
    let page = query.page_request();
    let (items, total) = state.data_elements.list_data_elements(&filter, page).await?;
    Ok(Json(ApiResponse::data(Page::new(items, total, page))))
}

/// GET /api/data-elements/{id}
pub async fn get_data_element(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<ApiResponse<DataElementDetail>>> {
    let element = state
        .data_elements
        .find_data_element(id)
        .await?
        .ok_or_else(element_not_found)?;
    let versions = state.data_elements.data_element_versions(id, VERSION_LIMIT).await?;
    Ok(Json(ApiResponse::data(DataElementDetail { element, versions })))
}

/// POST /api/data-elements
pub async fn create_data_element(
    State(state): State<SharedState>,
    Extension(auth): Extension<AuthUser>,
    ValidatedJson(req): ValidatedJson<CreateDataElementRequest>,
) -> ApiResult<Json<ApiResponse<DataElement>>> {
    let element = state.data_elements.create_data_element(&req, auth.user_id).await?;
    info!("User {} created data element {}", auth.username, element.code);
    Ok(Json(ApiResponse::with_message(element, "创建数据元成功")))
}

/// PUT /api/data-elements/{id}
pub async fn update_data_element(
    State(state): State<SharedState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<i64>,
    ValidatedJson(req): ValidatedJson<UpdateDataElementRequest>,
) -> ApiResult<Json<ApiResponse<DataElement>>> {
    let element = state
        .data_elements
        .update_data_element(id, &req, auth.user_id)
        .await?
        .ok_or_else(element_not_found)?;
    info!("Data element {} is now at version {}", element.code, element.version);
    Ok(Json(ApiResponse::with_message(element, "更新数据元成功")))
}

/// DELETE /api/data-elements/{id}
pub async fn delete_data_element(
    State(state): State<SharedState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> ApiResult<Json<ApiResponse<()>>> {
    if !state.data_elements.delete_data_element(id).await? {
        return Err(element_not_found());
    }
    info!("User {} deleted data element {}", auth.username, id);
    Ok(Json(ApiResponse::message_only("删除数据元成功")))
}
