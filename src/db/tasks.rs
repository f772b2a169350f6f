use async_trait::async_trait;
use tokio_postgres::Row;

use super::{like_pattern, map_delete_error, PgStore};
use crate::error::{map_write_error, ApiResult, AppError};
use crate::models::*;
use crate::repository::{TaskRepository, Transition, TransitionEffect, TransitionRecord};

const TASK_COLUMNS: &str = "id, code, name, description, task_type, priority, status, \
    related_data_element_id, related_quality_rule_id, related_mapping_rule_id, plan_start_time, \
    plan_end_time, actual_start_time, actual_end_time, review_comment, created_by, updated_by, \
    created_at, updated_at";

const ASSIGNMENT_COLUMNS: &str =
    "id, task_id, assigned_to, assigned_by, status, reject_reason, deadline, created_at, updated_at";

const EXECUTION_COLUMNS: &str = "id, task_id, executor_id, status, start_time, end_time, execution_log, \
    result_summary, processed_count, success_count, failed_count, created_at";

fn task_from_row(row: &Row) -> Task {
    Task {
        id: row.get("id"),
        code: row.get("code"),
        name: row.get("name"),
        description: row.get("description"),
        task_type: row.get("task_type"),
        priority: row.get("priority"),
        status: row.get("status"),
        related_data_element_id: row.get("related_data_element_id"),
        related_quality_rule_id: row.get("related_quality_rule_id"),
        related_mapping_rule_id: row.get("related_mapping_rule_id"),
        plan_start_time: row.get("plan_start_time"),
        plan_end_time: row.get("plan_end_time"),
        actual_start_time: row.get("actual_start_time"),
        actual_end_time: row.get("actual_end_time"),
        review_comment: row.get("review_comment"),
        created_by: row.get("created_by"),
        updated_by: row.get("updated_by"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn assignment_from_row(row: &Row) -> TaskAssignment {
    TaskAssignment {
        id: row.get("id"),
        task_id: row.get("task_id"),
        assigned_to: row.get("assigned_to"),
        assigned_by: row.get("assigned_by"),
        status: row.get("status"),
        reject_reason: row.get("reject_reason"),
        deadline: row.get("deadline"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn execution_from_row(row: &Row) -> TaskExecution {
    TaskExecution {
        id: row.get("id"),
        task_id: row.get("task_id"),
        executor_id: row.get("executor_id"),
        status: row.get("status"),
        start_time: row.get("start_time"),
        end_time: row.get("end_time"),
        execution_log: row.get("execution_log"),
        result_summary: row.get("result_summary"),
        processed_count: row.get("processed_count"),
        success_count: row.get("success_count"),
        failed_count: row.get("failed_count"),
        created_at: row.get("created_at"),
    }
}

#[async_trait]
impl TaskRepository for PgStore {
    async fn list_tasks(&self, filter: &TaskFilter, page: PageRequest) -> ApiResult<(Vec<Task>, i64)> {
        let client = self.client().await?;
        let keyword = like_pattern(filter.keyword.as_deref());
        let task_type = filter.task_type.map(|t| t.as_str());
        let status = filter.status.map(|s| s.as_str());
        let condition = "($1::text IS NULL OR code ILIKE $1 OR name ILIKE $1)
            AND ($2::text IS NULL OR task_type = $2)
            AND ($3::text IS NULL OR status = $3)";

        let total: i64 = client
            .query_one(
                &format!("SELECT COUNT(*) FROM tasks WHERE {}", condition),
                &[&keyword, &task_type, &status],
            )
            .await?
            .get(0);
        let rows = client
            .query(
                &format!(
                    "SELECT {} FROM tasks WHERE {} ORDER BY created_at DESC, id DESC LIMIT $4 OFFSET $5",
                    TASK_COLUMNS, condition
                ),
                &[&keyword, &task_type, &status, &page.limit(), &page.offset()],
            )
            .await?;
        Ok((rows.iter().map(task_from_row).collect(), total))
    }

    async fn find_task(&self, id: i64) -> ApiResult<Option<Task>> {
        let client = self.client().await?;
        let sql = format!("SELECT {} FROM tasks WHERE id = $1", TASK_COLUMNS);
        Ok(client.query_opt(&sql, &[&id]).await?.as_ref().map(task_from_row))
    }

    async fn task_assignments(&self, task_id: i64) -> ApiResult<Vec<TaskAssignment>> {
        let client = self.client().await?;
        let sql = format!(
            "SELECT {} FROM task_assignments WHERE task_id = $1 ORDER BY created_at, id",
            ASSIGNMENT_COLUMNS
        );
        let rows = client.query(&sql, &[&task_id]).await?;
        Ok(rows.iter().map(assignment_from_row).collect())
    }

    async fn task_executions(&self, task_id: i64, limit: i64) -> ApiResult<Vec<TaskExecution>> {
        let client = self.client().await?;
        let sql = format!(
            "SELECT {} FROM task_executions WHERE task_id = $1 ORDER BY created_at DESC, id DESC LIMIT $2",
            EXECUTION_COLUMNS
        );
        let rows = client.query(&sql, &[&task_id, &limit]).await?;
        Ok(rows.iter().map(execution_from_row).collect())
    }

    async fn create_task(&self, task: NewTask, actor: i64) -> ApiResult<Task> {
        let client = self.client().await?;
        let request = &task.request;
        let sql = format!(
            "INSERT INTO tasks (code, name, description, task_type, priority, status,
                 related_data_element_id, related_quality_rule_id, related_mapping_rule_id,
                 plan_start_time, plan_end_time, created_by)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
             RETURNING {}",
            TASK_COLUMNS
        );
        let row = client
            .query_one(
                &sql,
                &[
                    &task.code,
                    &request.name,
                    &request.description,
                    &request.task_type.as_str(),
                    &request.priority.as_str(),
                    &TaskStatus::Pending.as_str(),
                    &request.related_data_element_id,
                    &request.related_quality_rule_id,
                    &request.related_mapping_rule_id,
                    &request.plan_start_time,
                    &request.plan_end_time,
                    &actor,
                ],
            )
            .await
            .map_err(|e| map_write_error(e, "任务编码已存在"))?;
        Ok(task_from_row(&row))
    }

    async fn update_task(&self, id: i64, request: &UpdateTaskRequest, actor: i64) -> ApiResult<Option<Task>> {
        let mut client = self.client().await?;
        let tx = client.transaction().await?;

        let lock = format!("SELECT {} FROM tasks WHERE id = $1 FOR UPDATE", TASK_COLUMNS);
        let Some(row) = tx.query_opt(&lock, &[&id]).await? else {
            return Ok(None);
        };
        let mut next = task_from_row(&row);
        request.apply_to(&mut next);

        let sql = format!(
            "UPDATE tasks SET
                 code = $2, name = $3, description = $4, task_type = $5, priority = $6,
                 related_data_element_id = $7, related_quality_rule_id = $8,
                 related_mapping_rule_id = $9, plan_start_time = $10, plan_end_time = $11,
                 updated_by = $12, updated_at = NOW()
             WHERE id = $1
             RETURNING {}",
            TASK_COLUMNS
        );
        let row = tx
            .query_one(
                &sql,
                &[
                    &id,
                    &next.code,
                    &next.name,
                    &next.description,
                    &next.task_type.as_str(),
                    &next.priority.as_str(),
                    &next.related_data_element_id,
                    &next.related_quality_rule_id,
                    &next.related_mapping_rule_id,
                    &next.plan_start_time,
                    &next.plan_end_time,
                    &actor,
                ],
            )
            .await
            .map_err(|e| map_write_error(e, "任务编码已存在"))?;
        tx.commit().await?;
        Ok(Some(task_from_row(&row)))
    }

    async fn delete_task(&self, id: i64) -> ApiResult<bool> {
        let mut client = self.client().await?;
        let tx = client.transaction().await?;

        let Some(row) = tx
            .query_opt("SELECT status FROM tasks WHERE id = $1 FOR UPDATE", &[&id])
            .await?
        else {
            return Ok(false);
        };
        let status: TaskStatus = row.get("status");
        if status.is_locked() {
            return Err(AppError::BadRequest("任务正在执行或审核中，无法删除".to_string()));
        }

        tx.execute("DELETE FROM tasks WHERE id = $1", &[&id])
            .await
            .map_err(|e| map_delete_error(e, "任务正在执行或审核中，无法删除"))?;
        tx.commit().await?;
        Ok(true)
    }

    async fn pending_assignment(&self, task_id: i64, user_id: i64) -> ApiResult<Option<TaskAssignment>> {
        let client = self.client().await?;
        let sql = format!(
            "SELECT {} FROM task_assignments
             WHERE task_id = $1 AND assigned_to = $2 AND status = $3
             ORDER BY created_at DESC, id DESC LIMIT 1",
            ASSIGNMENT_COLUMNS
        );
        let row = client
            .query_opt(&sql, &[&task_id, &user_id, &AssignmentStatus::Pending.as_str()])
            .await?;
        Ok(row.as_ref().map(assignment_from_row))
    }

    async fn apply_transition(&self, transition: Transition) -> ApiResult<Option<TransitionRecord>> {
        let mut client = self.client().await?;
        let tx = client.transaction().await?;

        let lock = format!("SELECT {} FROM tasks WHERE id = $1 AND status = $2 FOR UPDATE", TASK_COLUMNS);
        let Some(row) = tx
            .query_opt(&lock, &[&transition.task_id, &transition.from.as_str()])
            .await?
        else {
            return Ok(None);
        };
        let mut task = task_from_row(&row);
        let at = transition.at;
        let mut assignment = None;
        let mut execution = None;

        match transition.effect {
            TransitionEffect::Assign { assigned_to, deadline } => {
                let sql = format!(
                    "INSERT INTO task_assignments (task_id, assigned_to, assigned_by, status, deadline, created_at, updated_at)
                     VALUES ($1, $2, $3, $4, $5, $6, $6)
                     RETURNING {}",
                    ASSIGNMENT_COLUMNS
                );
                let row = tx
                    .query_one(
                        &sql,
                        &[
                            &transition.task_id,
                            &assigned_to,
                            &transition.actor_id,
                            &AssignmentStatus::Pending.as_str(),
                            &deadline,
                            &at,
                        ],
                    )
                    .await
                    .map_err(|e| map_write_error(e, "任务分配已存在"))?;
                assignment = Some(assignment_from_row(&row));
            }
            TransitionEffect::Respond {
                assignment_id,
                accepted,
                reject_reason,
            } => {
                let status = if accepted {
                    AssignmentStatus::Accepted
                } else {
                    AssignmentStatus::Rejected
                };
                let sql = format!(
                    "UPDATE task_assignments SET status = $3, reject_reason = $4, updated_at = $5
                     WHERE id = $1 AND task_id = $2 AND status = $6
                     RETURNING {}",
                    ASSIGNMENT_COLUMNS
                );
                let Some(row) = tx
                    .query_opt(
                        &sql,
                        &[
                            &assignment_id,
                            &transition.task_id,
                            &status.as_str(),
                            &reject_reason,
                            &at,
                            &AssignmentStatus::Pending.as_str(),
                        ],
                    )
                    .await?
                else {
                    return Ok(None);
                };
                assignment = Some(assignment_from_row(&row));
                if accepted {
                    task.actual_start_time = Some(at);
                }
            }
            TransitionEffect::Complete(values) => {
                let start_time = task.actual_start_time.unwrap_or(at);
                let sql = format!(
                    "INSERT INTO task_executions (task_id, executor_id, status, start_time, end_time,
                         execution_log, result_summary, processed_count, success_count, failed_count, created_at)
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $5)
                     RETURNING {}",
                    EXECUTION_COLUMNS
                );
                let row = tx
                    .query_one(
                        &sql,
                        &[
                            &transition.task_id,
                            &transition.actor_id,
                            &ExecutionStatus::Success.as_str(),
                            &start_time,
                            &at,
                            &values.execution_log,
                            &values.result_summary,
                            &values.processed_count,
                            &values.success_count,
                            &values.failed_count,
                        ],
                    )
                    .await
                    .map_err(|e| map_write_error(e, "执行记录已存在"))?;
                execution = Some(execution_from_row(&row));
                task.actual_end_time = Some(at);
            }
            TransitionEffect::Review { comment } => {
                task.review_comment = comment;
            }
        }

        let sql = format!(
            "UPDATE tasks SET status = $2, actual_start_time = $3, actual_end_time = $4,
                 review_comment = $5, updated_by = $6, updated_at = $7
             WHERE id = $1
             RETURNING {}",
            TASK_COLUMNS
        );
        let row = tx
            .query_one(
                &sql,
                &[
                    &transition.task_id,
                    &transition.to.as_str(),
                    &task.actual_start_time,
                    &task.actual_end_time,
                    &task.review_comment,
                    &transition.actor_id,
                    &at,
                ],
            )
            .await?;
        tx.commit().await?;

        Ok(Some(TransitionRecord {
            task: task_from_row(&row),
            assignment,
            execution,
        }))
    }
}
