//! Governance task models
//!
//! A task moves `pending → assigned → in_progress → reviewing → completed | rejected`;
//! a rejected assignment sends it back to `pending`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::text_enum;

text_enum! {
    pub enum TaskStatus {
        Pending => "pending",
        Assigned => "assigned",
        InProgress => "in_progress",
        Reviewing => "reviewing",
        Completed => "completed",
        Rejected => "rejected",
    }
}

impl TaskStatus {
    /// Tasks being worked on or under review cannot be deleted
    pub fn is_locked(&self) -> bool {
        matches!(self, TaskStatus::InProgress | TaskStatus::Reviewing)
    }
}

text_enum! {
    pub enum TaskType {
        Cleaning => "cleaning",
        Integration => "integration",
        Standardization => "standardization",
        QualityCheck => "quality_check",
        Mapping => "mapping",
    }
}

text_enum! {
    pub enum Priority {
        High => "high",
        Medium => "medium",
        Low => "low",
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

text_enum! {
    pub enum AssignmentStatus {
        Pending => "pending",
        Accepted => "accepted",
        Rejected => "rejected",
    }
}

text_enum! {
    /// Outcome of a task execution or a sync run
    pub enum ExecutionStatus {
        Success => "success",
        Failed => "failed",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub task_type: TaskType,
    pub priority: Priority,
    pub status: TaskStatus,
    pub related_data_element_id: Option<i64>,
    pub related_quality_rule_id: Option<i64>,
    pub related_mapping_rule_id: Option<i64>,
    pub plan_start_time: Option<DateTime<Utc>>,
    pub plan_end_time: Option<DateTime<Utc>>,
    pub actual_start_time: Option<DateTime<Utc>>,
    pub actual_end_time: Option<DateTime<Utc>>,
    pub review_comment: Option<String>,
    pub created_by: Option<i64>,
    pub updated_by: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskAssignment {
    pub id: i64,
    pub task_id: i64,
    pub assigned_to: i64,
    pub assigned_by: i64,
    pub status: AssignmentStatus,
    pub reject_reason: Option<String>,
    pub deadline: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskExecution {
    pub id: i64,
    pub task_id: i64,
    pub executor_id: i64,
    pub status: ExecutionStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub execution_log: Option<String>,
    pub result_summary: Option<String>,
    pub processed_count: i32,
    pub success_count: i32,
    pub failed_count: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDetail {
    #[serde(flatten)]
    pub task: Task,
    pub assignments: Vec<TaskAssignment>,
    pub executions: Vec<TaskExecution>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    /// Generated when absent
    #[validate(custom(function = "crate::models::not_blank", message = "编码不能为空"), length(max = 50, message = "编码最多50位"))]
    pub code: Option<String>,
    #[validate(custom(function = "crate::models::not_blank", message = "名称不能为空"), length(max = 100, message = "名称最多100位"))]
    pub name: String,
    pub description: Option<String>,
    pub task_type: TaskType,
    #[serde(default)]
    pub priority: Priority,
    pub related_data_element_id: Option<i64>,
    pub related_quality_rule_id: Option<i64>,
    pub related_mapping_rule_id: Option<i64>,
    pub plan_start_time: Option<DateTime<Utc>>,
    pub plan_end_time: Option<DateTime<Utc>>,
}

/// Insert payload with the code already resolved
#[derive(Debug, Clone)]
pub struct NewTask {
    pub code: String,
    pub request: CreateTaskRequest,
}

/// PUT body: descriptive fields only, status moves through the workflow
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTaskRequest {
    #[validate(custom(function = "crate::models::not_blank", message = "编码不能为空"), length(max = 50, message = "编码最多50位"))]
    pub code: Option<String>,
    #[validate(custom(function = "crate::models::not_blank", message = "名称不能为空"), length(max = 100, message = "名称最多100位"))]
    pub name: Option<String>,
    pub description: Option<String>,
    pub task_type: Option<TaskType>,
    pub priority: Option<Priority>,
    pub related_data_element_id: Option<i64>,
    pub related_quality_rule_id: Option<i64>,
    pub related_mapping_rule_id: Option<i64>,
    pub plan_start_time: Option<DateTime<Utc>>,
    pub plan_end_time: Option<DateTime<Utc>>,
}

impl UpdateTaskRequest {
    pub fn apply_to(&self, task: &mut Task) {
        if let Some(code) = &self.code {
            task.code = code.clone();
        }
        if let Some(name) = &self.name {
            task.name = name.clone();
        }
        if self.description.is_some() {
            task.description = self.description.clone();
        }
        if let Some(task_type) = self.task_type {
            task.task_type = task_type;
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if self.related_data_element_id.is_some() {
            task.related_data_element_id = self.related_data_element_id;
        }
        if self.related_quality_rule_id.is_some() {
            task.related_quality_rule_id = self.related_quality_rule_id;
        }
        if self.related_mapping_rule_id.is_some() {
            task.related_mapping_rule_id = self.related_mapping_rule_id;
        }
        if self.plan_start_time.is_some() {
            task.plan_start_time = self.plan_start_time;
        }
        if self.plan_end_time.is_some() {
            task.plan_end_time = self.plan_end_time;
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AssignTaskRequest {
    #[validate(range(min = 1, message = "执行人不能为空"))]
    pub assigned_to: i64,
    pub deadline: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RespondTaskRequest {
    /// `accept` or `reject`
    #[validate(custom(function = "crate::models::not_blank", message = "操作不能为空"))]
    pub action: String,
    pub reject_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CompleteTaskRequest {
    pub execution_log: Option<String>,
    pub result_summary: Option<String>,
    #[validate(range(min = 0, message = "处理数量不能为负数"))]
    pub processed_count: Option<i32>,
    #[validate(range(min = 0, message = "成功数量不能为负数"))]
    pub success_count: Option<i32>,
    #[validate(range(min = 0, message = "失败数量不能为负数"))]
    pub failed_count: Option<i32>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ReviewTaskRequest {
    /// `approve` or `reject`
    #[validate(custom(function = "crate::models::not_blank", message = "操作不能为空"))]
    pub action: String,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub keyword: Option<String>,
    pub task_type: Option<TaskType>,
    pub status: Option<TaskStatus>,
}

impl TaskFilter {
    pub fn matches(&self, task: &Task) -> bool {
        self.keyword.as_deref().map_or(true, |k| {
            super::contains_keyword(&task.code, k) || super::contains_keyword(&task.name, k)
        }) && self.task_type.map_or(true, |t| task.task_type == t)
            && self.status.map_or(true, |s| task.status == s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_defaults_to_medium() {
        let body = serde_json::json!({ "code": "T1", "name": "Clean", "taskType": "cleaning" });
        let request: CreateTaskRequest = serde_json::from_value(body).unwrap();
        assert_eq!(request.priority, Priority::Medium);
        assert_eq!(request.task_type, TaskType::Cleaning);
    }

    #[test]
    fn test_update_ignores_status_in_body() {
        let body = serde_json::json!({ "name": "Renamed", "status": "completed" });
        let request: UpdateTaskRequest = serde_json::from_value(body).unwrap();
        assert_eq!(request.name.as_deref(), Some("Renamed"));
        assert!(request.task_type.is_none());
    }

    #[test]
    fn test_locked_statuses() {
        assert!(TaskStatus::InProgress.is_locked());
        assert!(TaskStatus::Reviewing.is_locked());
        assert!(!TaskStatus::Pending.is_locked());
        assert_eq!(TaskStatus::InProgress.as_str(), "in_progress");
    }
}
