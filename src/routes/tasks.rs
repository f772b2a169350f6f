//! Governance task handlers
//!
//! Status changes go through `TaskWorkflow`; the plain CRUD routes never
//! touch the status column.

use crate::auth::AuthUser;
use crate::error::{not_found_error, ApiResult, AppError};
use crate::models::*;
use crate::routes::extract::{parse_filter, ValidatedJson};
use crate::state::SharedState;
use crate::workflow::{RespondAction, ReviewAction};
use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use tracing::info;

const EXECUTION_LIMIT: i64 = 10;

fn task_not_found() -> AppError {
    not_found_error("任务不存在")
}

/// GET /api/tasks
pub async fn list_tasks(
    State(state): State<SharedState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<ApiResponse<Page<Task>>>> {
    let filter = TaskFilter {
        keyword: query.keyword(),
        task_type: parse_filter("taskType", query.task_type.as_deref())?,
        status: parse_filter("status", query.status.as_deref())?,
    };
    let page = query.page_request();
    let (items, total) = state.tasks.list_tasks(&filter, page).await?;
    Ok(Json(ApiResponse::data(Page::new(items, total, page))))
}

/// GET /api/tasks/{id} with assignments and latest executions
pub async fn get_task(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<ApiResponse<TaskDetail>>> {
    let task = state.tasks.find_task(id).await?.ok_or_else(task_not_found)?;
    let assignments = state.tasks.task_assignments(id).await?;
    let executions = state.tasks.task_executions(id, EXECUTION_LIMIT).await?;
    Ok(Json(ApiResponse::data(TaskDetail {
        task,
        assignments,
        executions,
    })))
}

/// POST /api/tasks
pub async fn create_task(
    State(state): State<SharedState>,
    Extension(auth): Extension<AuthUser>,
    ValidatedJson(req): ValidatedJson<CreateTaskRequest>,
) -> ApiResult<Json<ApiResponse<Task>>> {
    let task = state.workflow.create(req, auth.user_id).await?;
    Ok(Json(ApiResponse::with_message(task, "创建任务成功")))
}

/// PUT /api/tasks/{id}
pub async fn update_task(
    State(state): State<SharedState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<i64>,
    ValidatedJson(req): ValidatedJson<UpdateTaskRequest>,
) -> ApiResult<Json<ApiResponse<Task>>> {
    let task = state
        .tasks
        .update_task(id, &req, auth.user_id)
        .await?
        .ok_or_else(task_not_found)?;
    Ok(Json(ApiResponse::with_message(task, "更新任务成功")))
}

/// DELETE /api/tasks/{id}
pub async fn delete_task(
    State(state): State<SharedState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> ApiResult<Json<ApiResponse<()>>> {
    if !state.tasks.delete_task(id).await? {
        return Err(task_not_found());
    }
    info!("User {} deleted task {}", auth.username, id);
    Ok(Json(ApiResponse::message_only("删除任务成功")))
}

/// POST /api/tasks/{id}/assign
pub async fn assign_task(
    State(state): State<SharedState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<i64>,
    ValidatedJson(req): ValidatedJson<AssignTaskRequest>,
) -> ApiResult<Json<ApiResponse<TaskAssignment>>> {
    let assignment = state.workflow.assign(id, &req, auth.user_id).await?;
    Ok(Json(ApiResponse::with_message(assignment, "分配任务成功")))
}

/// PUT|POST /api/tasks/{id}/respond
pub async fn respond_task(
    State(state): State<SharedState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<i64>,
    ValidatedJson(req): ValidatedJson<RespondTaskRequest>,
) -> ApiResult<Json<ApiResponse<Task>>> {
    let (action, record) = state.workflow.respond(id, &req, auth.user_id).await?;
    let message = match action {
        RespondAction::Accept => "接收任务成功",
        RespondAction::Reject => "拒绝任务成功",
    };
    Ok(Json(ApiResponse::with_message(record.task, message)))
}

/// POST /api/tasks/{id}/complete
pub async fn complete_task(
    State(state): State<SharedState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<i64>,
    ValidatedJson(req): ValidatedJson<CompleteTaskRequest>,
) -> ApiResult<Json<ApiResponse<TaskExecution>>> {
    let execution = state.workflow.complete(id, &req, auth.user_id).await?;
    Ok(Json(ApiResponse::with_message(execution, "提交执行结果成功")))
}

/// POST /api/tasks/{id}/review
pub async fn review_task(
    State(state): State<SharedState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<i64>,
    ValidatedJson(req): ValidatedJson<ReviewTaskRequest>,
) -> ApiResult<Json<ApiResponse<Task>>> {
    let (action, task) = state.workflow.review(id, &req, auth.user_id).await?;
    let message = match action {
        ReviewAction::Approve => "审核通过",
        ReviewAction::Reject => "审核驳回",
    };
    Ok(Json(ApiResponse::with_message(task, message)))
}
