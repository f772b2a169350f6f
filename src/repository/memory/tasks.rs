use async_trait::async_trait;
use chrono::Utc;

use super::{latest, missing_reference, page_newest_first, MemoryData, MemoryStore};
use crate::error::{conflict_error, ApiResult, AppError};
use crate::models::*;
use crate::repository::{TaskRepository, Transition, TransitionEffect, TransitionRecord};

impl MemoryData {
    fn check_task_refs(&self, element: Option<i64>, rule: Option<i64>, mapping: Option<i64>) -> ApiResult<()> {
        let ok = element.map_or(true, |id| self.data_elements.iter().any(|e| e.id == id))
            && rule.map_or(true, |id| self.quality_rules.iter().any(|r| r.id == id))
            && mapping.map_or(true, |id| self.mapping_rules.iter().any(|m| m.id == id));
        if ok {
            Ok(())
        } else {
            Err(missing_reference())
        }
    }
}

#[async_trait]
impl TaskRepository for MemoryStore {
    async fn list_tasks(&self, filter: &TaskFilter, page: PageRequest) -> ApiResult<(Vec<Task>, i64)> {
        let data = self.data.read().await;
        let rows = data.tasks.iter().filter(|t| filter.matches(t)).collect();
        Ok(page_newest_first(rows, |t: &Task| (t.created_at, t.id), page))
    }

    async fn find_task(&self, id: i64) -> ApiResult<Option<Task>> {
        let data = self.data.read().await;
        Ok(data.tasks.iter().find(|t| t.id == id).cloned())
    }

    async fn task_assignments(&self, task_id: i64) -> ApiResult<Vec<TaskAssignment>> {
        let data = self.data.read().await;
        let mut rows: Vec<TaskAssignment> = data
            .assignments
            .iter()
            .filter(|a| a.task_id == task_id)
            .cloned()
            .collect();
        rows.sort_by_key(|a| (a.created_at, a.id));
        Ok(rows)
    }

    async fn task_executions(&self, task_id: i64, limit: i64) -> ApiResult<Vec<TaskExecution>> {
        let data = self.data.read().await;
        let rows = data.executions.iter().filter(|e| e.task_id == task_id).collect();
        Ok(latest(rows, |e: &TaskExecution| (e.created_at, e.id), limit))
    }

    async fn create_task(&self, task: NewTask, actor: i64) -> ApiResult<Task> {
        let mut data = self.data.write().await;
        if data.tasks.iter().any(|t| t.code == task.code) {
            return Err(conflict_error("任务编码已存在"));
        }
        let request = task.request;
        data.check_task_refs(
            request.related_data_element_id,
            request.related_quality_rule_id,
            request.related_mapping_rule_id,
        )?;

        let now = Utc::now();
        let created = Task {
            id: data.next_id(),
            code: task.code,
            name: request.name,
            description: request.description,
            task_type: request.task_type,
            priority: request.priority,
            status: TaskStatus::Pending,
            related_data_element_id: request.related_data_element_id,
            related_quality_rule_id: request.related_quality_rule_id,
            related_mapping_rule_id: request.related_mapping_rule_id,
            plan_start_time: request.plan_start_time,
            plan_end_time: request.plan_end_time,
            actual_start_time: None,
            actual_end_time: None,
            review_comment: None,
            created_by: Some(actor),
            updated_by: None,
            created_at: now,
            updated_at: now,
        };
        data.tasks.push(created.clone());
        Ok(created)
    }

    async fn update_task(&self, id: i64, request: &UpdateTaskRequest, actor: i64) -> ApiResult<Option<Task>> {
        let mut data = self.data.write().await;
        let Some(index) = data.tasks.iter().position(|t| t.id == id) else {
            return Ok(None);
        };
        if let Some(code) = &request.code {
            if data.tasks.iter().any(|t| t.code == *code && t.id != id) {
                return Err(conflict_error("任务编码已存在"));
            }
        }
        data.check_task_refs(
            request.related_data_element_id,
            request.related_quality_rule_id,
            request.related_mapping_rule_id,
        )?;

        let task = &mut data.tasks[index];
        request.apply_to(task);
        task.updated_by = Some(actor);
        task.updated_at = Utc::now();
        Ok(Some(task.clone()))
    }

    async fn delete_task(&self, id: i64) -> ApiResult<bool> {
        let mut data = self.data.write().await;
        let Some(index) = data.tasks.iter().position(|t| t.id == id) else {
            return Ok(false);
        };
        if data.tasks[index].status.is_locked() {
            return Err(AppError::BadRequest("任务正在执行或审核中，无法删除".to_string()));
        }
        data.tasks.remove(index);
        data.assignments.retain(|a| a.task_id != id);
        data.executions.retain(|e| e.task_id != id);
        Ok(true)
    }

    async fn pending_assignment(&self, task_id: i64, user_id: i64) -> ApiResult<Option<TaskAssignment>> {
        let data = self.data.read().await;
        Ok(data
            .assignments
            .iter()
            .filter(|a| a.task_id == task_id && a.assigned_to == user_id && a.status == AssignmentStatus::Pending)
            .max_by_key(|a| (a.created_at, a.id))
            .cloned())
    }

    async fn apply_transition(&self, transition: Transition) -> ApiResult<Option<TransitionRecord>> {
        let mut data = self.data.write().await;
        let Some(index) = data
            .tasks
            .iter()
            .position(|t| t.id == transition.task_id && t.status == transition.from)
        else {
            return Ok(None);
        };

        let at = transition.at;
        let mut assignment = None;
        let mut execution = None;

        match transition.effect {
            TransitionEffect::Assign { assigned_to, deadline } => {
                if !data.users.iter().any(|u| u.id == assigned_to) {
                    return Err(missing_reference());
                }
                let row = TaskAssignment {
                    id: data.next_id(),
                    task_id: transition.task_id,
                    assigned_to,
                    assigned_by: transition.actor_id,
                    status: AssignmentStatus::Pending,
                    reject_reason: None,
                    deadline,
                    created_at: at,
                    updated_at: at,
                };
                data.assignments.push(row.clone());
                assignment = Some(row);
            }
            TransitionEffect::Respond {
                assignment_id,
                accepted,
                reject_reason,
            } => {
                let Some(row) = data.assignments.iter_mut().find(|a| {
                    a.id == assignment_id && a.task_id == transition.task_id && a.status == AssignmentStatus::Pending
                }) else {
                    return Ok(None);
                };
                row.status = if accepted {
                    AssignmentStatus::Accepted
                } else {
                    AssignmentStatus::Rejected
                };
                row.reject_reason = reject_reason;
                row.updated_at = at;
                assignment = Some(row.clone());
                if accepted {
                    data.tasks[index].actual_start_time = Some(at);
                }
            }
            TransitionEffect::Complete(values) => {
                let start_time = data.tasks[index].actual_start_time.unwrap_or(at);
                let row = TaskExecution {
                    id: data.next_id(),
                    task_id: transition.task_id,
                    executor_id: transition.actor_id,
                    status: ExecutionStatus::Success,
                    start_time,
                    end_time: Some(at),
                    execution_log: values.execution_log,
                    result_summary: values.result_summary,
                    processed_count: values.processed_count,
                    success_count: values.success_count,
                    failed_count: values.failed_count,
                    created_at: at,
                };
                data.executions.push(row.clone());
                execution = Some(row);
                data.tasks[index].actual_end_time = Some(at);
            }
            TransitionEffect::Review { comment } => {
                data.tasks[index].review_comment = comment;
            }
        }

        let task = &mut data.tasks[index];
        task.status = transition.to;
        task.updated_by = Some(transition.actor_id);
        task.updated_at = at;

        Ok(Some(TransitionRecord {
            task: task.clone(),
            assignment,
            execution,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{NewExecution, UserRepository};
    use pretty_assertions::assert_eq;

    fn new_task(code: &str) -> NewTask {
        let request: CreateTaskRequest = serde_json::from_value(serde_json::json!({
            "name": "清洗客户数据",
            "taskType": "cleaning"
        }))
        .unwrap();
        NewTask {
            code: code.to_string(),
            request,
        }
    }

    fn transition(task_id: i64, from: TaskStatus, to: TaskStatus, effect: TransitionEffect) -> Transition {
        Transition {
            task_id,
            from,
            to,
            actor_id: 1,
            at: Utc::now(),
            effect,
        }
    }

    async fn admin_id(store: &MemoryStore) -> i64 {
        store.find_user_by_username("admin").await.unwrap().unwrap().user.id
    }

    #[tokio::test]
    async fn test_transition_requires_expected_status() {
        let store = MemoryStore::seeded("hash");
        let admin = admin_id(&store).await;
        let task = store.create_task(new_task("T1"), admin).await.unwrap();
        assert_eq!(task.status, TaskStatus::Pending);

        let stale = transition(
            task.id,
            TaskStatus::Assigned,
            TaskStatus::InProgress,
            TransitionEffect::Review { comment: None },
        );
        assert!(store.apply_transition(stale).await.unwrap().is_none());
        assert_eq!(store.find_task(task.id).await.unwrap().unwrap().status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn test_full_lifecycle_writes_assignment_and_execution() {
        let store = MemoryStore::seeded("hash");
        let admin = admin_id(&store).await;
        let task = store.create_task(new_task("T1"), admin).await.unwrap();

        let assign = transition(
            task.id,
            TaskStatus::Pending,
            TaskStatus::Assigned,
            TransitionEffect::Assign {
                assigned_to: admin,
                deadline: None,
            },
        );
        let record = store.apply_transition(assign).await.unwrap().unwrap();
        let assignment = record.assignment.unwrap();
        assert_eq!(assignment.status, AssignmentStatus::Pending);

        let pending = store.pending_assignment(task.id, admin).await.unwrap().unwrap();
        assert_eq!(pending.id, assignment.id);

        let accept = transition(
            task.id,
            TaskStatus::Assigned,
            TaskStatus::InProgress,
            TransitionEffect::Respond {
                assignment_id: assignment.id,
                accepted: true,
                reject_reason: None,
            },
        );
        let record = store.apply_transition(accept).await.unwrap().unwrap();
        assert!(record.task.actual_start_time.is_some());
        assert!(store.pending_assignment(task.id, admin).await.unwrap().is_none());

        let err = store.delete_task(task.id).await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));

        let complete = transition(
            task.id,
            TaskStatus::InProgress,
            TaskStatus::Reviewing,
            TransitionEffect::Complete(NewExecution {
                processed_count: 10,
                success_count: 9,
                failed_count: 1,
                ..Default::default()
            }),
        );
        let record = store.apply_transition(complete).await.unwrap().unwrap();
        let execution = record.execution.unwrap();
        assert_eq!(execution.processed_count, 10);
        assert_eq!(Some(execution.start_time), record.task.actual_start_time);
        assert_eq!(store.task_executions(task.id, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_assign_to_unknown_user_writes_nothing() {
        let store = MemoryStore::seeded("hash");
        let task = store.create_task(new_task("T1"), 1).await.unwrap();
        let assign = transition(
            task.id,
            TaskStatus::Pending,
            TaskStatus::Assigned,
            TransitionEffect::Assign {
                assigned_to: 9999,
                deadline: None,
            },
        );
        assert!(store.apply_transition(assign).await.is_err());
        assert_eq!(store.find_task(task.id).await.unwrap().unwrap().status, TaskStatus::Pending);
        assert!(store.task_assignments(task.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_task_code_conflicts() {
        let store = MemoryStore::new();
        store.create_task(new_task("T1"), 1).await.unwrap();
        let err = store.create_task(new_task("T1"), 1).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(ref m) if m == "任务编码已存在"));
    }
}
