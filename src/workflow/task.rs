//! Task state machine
//!
//! ```text
//! pending ──assign──▶ assigned ──accept──▶ in_progress ──complete──▶ reviewing ──approve──▶ completed
//!    ▲                   │                                               │
//!    └──────reject───────┘                                               └──reject──▶ rejected
//! ```
//!
//! Each step checks the current status for a precise error, then hands a
//! compare-and-set `Transition` to the repository so a concurrent change of
//! the same task cannot slip in between the check and the write.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{not_found_error, ApiResult, AppError};
use crate::models::*;
use crate::repository::{NewExecution, TaskRepository, Transition, TransitionEffect, TransitionRecord, UserRepository};

/// Answer of an assignee to a pending assignment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RespondAction {
    Accept,
    Reject,
}

impl FromStr for RespondAction {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accept" => Ok(RespondAction::Accept),
            "reject" => Ok(RespondAction::Reject),
            _ => Err(AppError::BadRequest("无效的操作".to_string())),
        }
    }
}

/// Reviewer decision on a submitted task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewAction {
    Approve,
    Reject,
}

impl FromStr for ReviewAction {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approve" => Ok(ReviewAction::Approve),
            "reject" => Ok(ReviewAction::Reject),
            _ => Err(AppError::BadRequest("无效的操作".to_string())),
        }
    }
}

/// `TASK-<yyyymmddHHMMSS>-<6 hex>`
pub fn generate_task_code(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("TASK-{}-{}", now.format("%Y%m%d%H%M%S"), &suffix[..6])
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

fn task_not_found() -> AppError {
    not_found_error("任务不存在")
}

pub struct TaskWorkflow {
    tasks: Arc<dyn TaskRepository>,
    users: Arc<dyn UserRepository>,
}

impl TaskWorkflow {
    pub fn new(tasks: Arc<dyn TaskRepository>, users: Arc<dyn UserRepository>) -> Self {
        Self { tasks, users }
    }

    async fn load(&self, task_id: i64) -> ApiResult<Task> {
        self.tasks.find_task(task_id).await?.ok_or_else(task_not_found)
    }

    /// Create a task in `pending`, generating a code when none is given
    pub async fn create(&self, request: CreateTaskRequest, actor: i64) -> ApiResult<Task> {
        let code = non_blank(request.code.as_deref()).unwrap_or_else(|| generate_task_code(Utc::now()));
        let task = self.tasks.create_task(NewTask { code, request }, actor).await?;
        info!("Task {} ({}) created by user {}", task.id, task.code, actor);
        Ok(task)
    }

    pub async fn assign(&self, task_id: i64, request: &AssignTaskRequest, actor: i64) -> ApiResult<TaskAssignment> {
        let task = self.load(task_id).await?;
        if task.status != TaskStatus::Pending {
            return Err(AppError::InvalidState("任务状态不允许分配".to_string()));
        }
        if self.users.find_user(request.assigned_to).await?.is_none() {
            return Err(not_found_error("用户不存在"));
        }

        let transition = Transition {
            task_id,
            from: TaskStatus::Pending,
            to: TaskStatus::Assigned,
            actor_id: actor,
            at: Utc::now(),
            effect: TransitionEffect::Assign {
                assigned_to: request.assigned_to,
                deadline: request.deadline,
            },
        };
        let record = self.tasks.apply_transition(transition).await?.ok_or_else(|| {
            warn!("Task {} left pending before it could be assigned", task_id);
            AppError::InvalidState("任务状态不允许分配".to_string())
        })?;

        info!("Task {} assigned to user {} by user {}", task_id, request.assigned_to, actor);
        record
            .assignment
            .ok_or_else(|| AppError::Internal(format!("Assignment of task {} was not recorded", task_id)))
    }

    /// The acting user accepts or rejects their pending assignment
    pub async fn respond(
        &self,
        task_id: i64,
        request: &RespondTaskRequest,
        actor: i64,
    ) -> ApiResult<(RespondAction, TransitionRecord)> {
        let missing = || not_found_error("任务分配不存在或已处理");
        let assignment = self.tasks.pending_assignment(task_id, actor).await?.ok_or_else(missing)?;

        let action: RespondAction = request.action.parse()?;
        let (to, reject_reason) = match action {
            RespondAction::Accept => (TaskStatus::InProgress, None),
            RespondAction::Reject => {
                let reason = non_blank(request.reject_reason.as_deref())
                    .ok_or_else(|| AppError::BadRequest("拒绝原因不能为空".to_string()))?;
                (TaskStatus::Pending, Some(reason))
            }
        };

        let transition = Transition {
            task_id,
            from: TaskStatus::Assigned,
            to,
            actor_id: actor,
            at: Utc::now(),
            effect: TransitionEffect::Respond {
                assignment_id: assignment.id,
                accepted: action == RespondAction::Accept,
                reject_reason,
            },
        };
        let record = self.tasks.apply_transition(transition).await?.ok_or_else(missing)?;

        info!("User {} answered {:?} on task {}", actor, action, task_id);
        Ok((action, record))
    }

    /// Record the execution result and send the task to review
    pub async fn complete(&self, task_id: i64, request: &CompleteTaskRequest, actor: i64) -> ApiResult<TaskExecution> {
        let task = self.load(task_id).await?;
        if task.status != TaskStatus::InProgress {
            return Err(AppError::InvalidState("任务状态不允许提交".to_string()));
        }

        let transition = Transition {
            task_id,
            from: TaskStatus::InProgress,
            to: TaskStatus::Reviewing,
            actor_id: actor,
            at: Utc::now(),
            effect: TransitionEffect::Complete(NewExecution {
                execution_log: request.execution_log.clone(),
                result_summary: request.result_summary.clone(),
                processed_count: request.processed_count.unwrap_or(0),
                success_count: request.success_count.unwrap_or(0),
                failed_count: request.failed_count.unwrap_or(0),
            }),
        };
        let record = self
            .tasks
            .apply_transition(transition)
            .await?
            .ok_or_else(|| AppError::InvalidState("任务状态不允许提交".to_string()))?;

        info!("Task {} submitted for review by user {}", task_id, actor);
        record
            .execution
            .ok_or_else(|| AppError::Internal(format!("Execution of task {} was not recorded", task_id)))
    }

    /// Approve or reject a task under review. Rejection is terminal.
    pub async fn review(&self, task_id: i64, request: &ReviewTaskRequest, actor: i64) -> ApiResult<(ReviewAction, Task)> {
        let task = self.load(task_id).await?;
        if task.status != TaskStatus::Reviewing {
            return Err(AppError::InvalidState("任务状态不允许审核".to_string()));
        }

        let action: ReviewAction = request.action.parse()?;
        let comment = non_blank(request.comment.as_deref());
        let to = match action {
            ReviewAction::Approve => TaskStatus::Completed,
            ReviewAction::Reject => {
                if comment.is_none() {
                    return Err(AppError::BadRequest("审核意见不能为空".to_string()));
                }
                TaskStatus::Rejected
            }
        };

        let transition = Transition {
            task_id,
            from: TaskStatus::Reviewing,
            to,
            actor_id: actor,
            at: Utc::now(),
            effect: TransitionEffect::Review { comment },
        };
        let record = self
            .tasks
            .apply_transition(transition)
            .await?
            .ok_or_else(|| AppError::InvalidState("任务状态不允许审核".to_string()))?;

        info!("Task {} reviewed by user {}: {:?}", task_id, actor, action);
        Ok((action, record.task))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryStore;
    use pretty_assertions::assert_eq;

    async fn setup() -> (Arc<MemoryStore>, TaskWorkflow, i64) {
        let store = Arc::new(MemoryStore::seeded("hash"));
        let admin = store.find_user_by_username("admin").await.unwrap().unwrap().user.id;
        let workflow = TaskWorkflow::new(store.clone(), store.clone());
        (store, workflow, admin)
    }

    fn create_request() -> CreateTaskRequest {
        serde_json::from_value(serde_json::json!({ "name": "客户数据清洗", "taskType": "cleaning" })).unwrap()
    }

    fn respond(action: &str, reason: Option<&str>) -> RespondTaskRequest {
        RespondTaskRequest {
            action: action.to_string(),
            reject_reason: reason.map(str::to_string),
        }
    }

    fn assign_to(user: i64) -> AssignTaskRequest {
        AssignTaskRequest {
            assigned_to: user,
            deadline: None,
        }
    }

    #[test]
    fn test_generated_code_format() {
        let now = DateTime::parse_from_rfc3339("2024-03-05T08:09:10Z").unwrap().with_timezone(&Utc);
        let code = generate_task_code(now);
        assert!(code.starts_with("TASK-20240305080910-"), "{}", code);
        assert_eq!(code.len(), "TASK-20240305080910-".len() + 6);
    }

    #[tokio::test]
    async fn test_create_generates_code_and_starts_pending() {
        let (_, workflow, admin) = setup().await;
        let task = workflow.create(create_request(), admin).await.unwrap();
        assert!(task.code.starts_with("TASK-"));
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.priority, Priority::Medium);
    }

    #[tokio::test]
    async fn test_happy_path_reaches_completed() {
        let (store, workflow, admin) = setup().await;
        let task = workflow.create(create_request(), admin).await.unwrap();

        workflow.assign(task.id, &assign_to(admin), admin).await.unwrap();
        let (action, record) = workflow.respond(task.id, &respond("accept", None), admin).await.unwrap();
        assert_eq!(action, RespondAction::Accept);
        assert_eq!(record.task.status, TaskStatus::InProgress);
        assert!(record.task.actual_start_time.is_some());

        let execution = workflow
            .complete(
                task.id,
                &CompleteTaskRequest {
                    processed_count: Some(100),
                    success_count: Some(98),
                    failed_count: Some(2),
                    ..Default::default()
                },
                admin,
            )
            .await
            .unwrap();
        assert_eq!(execution.status, ExecutionStatus::Success);
        assert_eq!(execution.failed_count, 2);

        let review = ReviewTaskRequest {
            action: "approve".to_string(),
            comment: None,
        };
        let (_, task) = workflow.review(task.id, &review, admin).await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.actual_end_time.is_some());
        assert_eq!(store.task_executions(task.id, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_assign_requires_pending() {
        let (_, workflow, admin) = setup().await;
        let task = workflow.create(create_request(), admin).await.unwrap();
        workflow.assign(task.id, &assign_to(admin), admin).await.unwrap();

        let err = workflow.assign(task.id, &assign_to(admin), admin).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidState(ref m) if m == "任务状态不允许分配"));
    }

    #[tokio::test]
    async fn test_assign_to_unknown_user_is_not_found() {
        let (_, workflow, admin) = setup().await;
        let task = workflow.create(create_request(), admin).await.unwrap();
        let err = workflow.assign(task.id, &assign_to(4242), admin).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(ref m) if m == "用户不存在"));
    }

    #[tokio::test]
    async fn test_reject_assignment_needs_reason_and_returns_to_pending() {
        let (store, workflow, admin) = setup().await;
        let task = workflow.create(create_request(), admin).await.unwrap();
        workflow.assign(task.id, &assign_to(admin), admin).await.unwrap();

        let err = workflow.respond(task.id, &respond("reject", Some("  ")), admin).await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(ref m) if m == "拒绝原因不能为空"));
        assert_eq!(store.find_task(task.id).await.unwrap().unwrap().status, TaskStatus::Assigned);

        let (_, record) = workflow
            .respond(task.id, &respond("reject", Some("人手不足")), admin)
            .await
            .unwrap();
        assert_eq!(record.task.status, TaskStatus::Pending);
        let assignment = record.assignment.unwrap();
        assert_eq!(assignment.status, AssignmentStatus::Rejected);
        assert_eq!(assignment.reject_reason.as_deref(), Some("人手不足"));

        let err = workflow.respond(task.id, &respond("accept", None), admin).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(ref m) if m == "任务分配不存在或已处理"));
    }

    #[tokio::test]
    async fn test_unknown_respond_action() {
        let (_, workflow, admin) = setup().await;
        let task = workflow.create(create_request(), admin).await.unwrap();
        workflow.assign(task.id, &assign_to(admin), admin).await.unwrap();

        let err = workflow.respond(task.id, &respond("maybe", None), admin).await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(ref m) if m == "无效的操作"));
    }

    #[tokio::test]
    async fn test_complete_and_review_check_status() {
        let (_, workflow, admin) = setup().await;
        let task = workflow.create(create_request(), admin).await.unwrap();

        let err = workflow.complete(task.id, &CompleteTaskRequest::default(), admin).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidState(ref m) if m == "任务状态不允许提交"));

        let review = ReviewTaskRequest {
            action: "approve".to_string(),
            comment: None,
        };
        let err = workflow.review(task.id, &review, admin).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidState(ref m) if m == "任务状态不允许审核"));
    }

    #[tokio::test]
    async fn test_review_reject_requires_comment() {
        let (_, workflow, admin) = setup().await;
        let task = workflow.create(create_request(), admin).await.unwrap();
        workflow.assign(task.id, &assign_to(admin), admin).await.unwrap();
        workflow.respond(task.id, &respond("accept", None), admin).await.unwrap();
        workflow.complete(task.id, &CompleteTaskRequest::default(), admin).await.unwrap();

        let mut review = ReviewTaskRequest {
            action: "reject".to_string(),
            comment: None,
        };
        let err = workflow.review(task.id, &review, admin).await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(ref m) if m == "审核意见不能为空"));

        review.comment = Some("结果不完整".to_string());
        let (action, task) = workflow.review(task.id, &review, admin).await.unwrap();
        assert_eq!(action, ReviewAction::Reject);
        assert_eq!(task.status, TaskStatus::Rejected);
        assert_eq!(task.review_comment.as_deref(), Some("结果不完整"));
    }

    #[tokio::test]
    async fn test_missing_task() {
        let (_, workflow, admin) = setup().await;
        let err = workflow.assign(99, &assign_to(admin), admin).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(ref m) if m == "任务不存在"));
    }
}
