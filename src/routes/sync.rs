//! External data source and sync task handlers

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

const SOURCE_TASK_LIMIT: i64 = 10;
const SYNC_RECORD_LIMIT: i64 = 20;

fn source_not_found() -> AppError {
    not_found_error("外部数据源不存在")
}

fn sync_task_not_found() -> AppError {
    not_found_error("同步任务不存在")
}

/// GET /api/external-data-sources
pub async fn list_data_sources(
    State(state): State<SharedState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<ApiResponse<Page<ExternalDataSource>>>> {
    let filter = DataSourceFilter {
        keyword: query.keyword(),
        source_type: parse_filter("sourceType", query.source_type.as_deref())?,
        status: parse_filter("status", query.status.as_deref())?,
    };
    let page = query.page_request();
    let (items, total) = state.data_sources.list_data_sources(&filter, page).await?;
    Ok(Json(ApiResponse::data(Page::new(items, total, page))))
}

/// GET /api/external-data-sources/{id}
pub async fn get_data_source(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<ApiResponse<DataSourceDetail>>> {
    let source = state
        .data_sources
        .find_data_source(id)
        .await?
        .ok_or_else(source_not_found)?;
    let sync_tasks = state.data_sources.sync_tasks_of_source(id, SOURCE_TASK_LIMIT).await?;
    Ok(Json(ApiResponse::data(DataSourceDetail { source, sync_tasks })))
}

/// POST /api/external-data-sources
pub async fn create_data_source(
    State(state): State<SharedState>,
    Extension(auth): Extension<AuthUser>,
    ValidatedJson(req): ValidatedJson<CreateDataSourceRequest>,
) -> ApiResult<Json<ApiResponse<ExternalDataSource>>> {
    let source = state.data_sources.create_data_source(&req, auth.user_id).await?;
    info!("User {} created data source {}", auth.username, source.code);
    Ok(Json(ApiResponse::with_message(source, "创建外部数据源成功")))
}

/// PUT /api/external-data-sources/{id}
pub async fn update_data_source(
    State(state): State<SharedState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<i64>,
    ValidatedJson(req): ValidatedJson<UpdateDataSourceRequest>,
) -> ApiResult<Json<ApiResponse<ExternalDataSource>>> {
    let source = state
        .data_sources
        .update_data_source(id, &req, auth.user_id)
        .await?
        .ok_or_else(source_not_found)?;
    Ok(Json(ApiResponse::with_message(source, "更新外部数据源成功")))
}

/// DELETE /api/external-data-sources/{id}
pub async fn delete_data_source(
    State(state): State<SharedState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> ApiResult<Json<ApiResponse<()>>> {
    if !state.data_sources.delete_data_source(id).await? {
        return Err(source_not_found());
    }
    info!("User {} deleted data source {}", auth.username, id);
    Ok(Json(ApiResponse::message_only("删除外部数据源成功")))
}

/// GET /api/sync-tasks
pub async fn list_sync_tasks(
    State(state): State<SharedState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<ApiResponse<Page<SyncTask>>>> {
    let filter = SyncTaskFilter {
        keyword: query.keyword(),
        sync_type: parse_filter("syncType", query.sync_type.as_deref())?,
        sync_status: parse_filter("syncStatus", query.sync_status.as_deref())?,
    };
    let page = query.page_request();
    let (items, total) = state.sync_tasks.list_sync_tasks(&filter, page).await?;
    Ok(Json(ApiResponse::data(Page::new(items, total, page))))
}

/// GET /api/sync-tasks/{id} with its source and latest run records
pub async fn get_sync_task(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<ApiResponse<SyncTaskDetail>>> {
    let task = state
        .sync_tasks
        .find_sync_task(id)
        .await?
        .ok_or_else(sync_task_not_found)?;
    let source = state.data_sources.find_data_source(task.source_id).await?;
    let sync_records = state.sync_tasks.sync_records(id, SYNC_RECORD_LIMIT).await?;
    Ok(Json(ApiResponse::data(SyncTaskDetail {
        task,
        source,
        sync_records,
    })))
}

/// POST /api/sync-tasks
pub async fn create_sync_task(
    State(state): State<SharedState>,
    Extension(auth): Extension<AuthUser>,
    ValidatedJson(req): ValidatedJson<CreateSyncTaskRequest>,
) -> ApiResult<Json<ApiResponse<SyncTask>>> {
    let task = state.sync_tasks.create_sync_task(&req, auth.user_id).await?;
    info!("User {} created sync task {}", auth.username, task.code);
    Ok(Json(ApiResponse::with_message(task, "创建同步任务成功")))
}

/// PUT /api/sync-tasks/{id}
pub async fn update_sync_task(
    State(state): State<SharedState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<i64>,
    ValidatedJson(req): ValidatedJson<UpdateSyncTaskRequest>,
) -> ApiResult<Json<ApiResponse<SyncTask>>> {
    let task = state
        .sync_tasks
        .update_sync_task(id, &req, auth.user_id)
        .await?
        .ok_or_else(sync_task_not_found)?;
    Ok(Json(ApiResponse::with_message(task, "更新同步任务成功")))
}

/// DELETE /api/sync-tasks/{id}
pub async fn delete_sync_task(
    State(state): State<SharedState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> ApiResult<Json<ApiResponse<()>>> {
    if !state.sync_tasks.delete_sync_task(id).await? {
        return Err(sync_task_not_found());
    }
    info!("User {} deleted sync task {}", auth.username, id);
    Ok(Json(ApiResponse::message_only("删除同步任务成功")))
}

/// POST /api/sync-tasks/{id}/execute
pub async fn execute_sync_task(
    State(state): State<SharedState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> ApiResult<Json<ApiResponse<SyncRecord>>> {
    let record = state.sync.execute(id, auth.user_id).await?;
    Ok(Json(ApiResponse::with_message(record, "同步执行成功")))
}
