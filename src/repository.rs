//! Repository traits
//!
//! One trait per aggregate. Handlers and the workflow engine only see these
//! traits (held as `Arc<dyn ...>` in the application state); `PgStore` and
//! `MemoryStore` implement all of them.
//!
//! Conventions shared by every implementation:
//! - `find_*` returns `Ok(None)` for unknown ids, `update_*` likewise.
//! - `delete_*` returns `Ok(false)` for unknown ids and `AppError::BadRequest`
//!   when dependents still reference the row. The dependent count and the
//!   delete happen atomically.
//! - Duplicate unique codes are reported as `AppError::Conflict` and nothing
//!   is written.

pub mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{ApiResult, AppError};
use crate::models::*;

/// JSON image of a row, stored in the version tables before an update
pub(crate) fn snapshot<T: serde::Serialize>(row: &T) -> ApiResult<serde_json::Value> {
    serde_json::to_value(row).map_err(|e| AppError::Internal(format!("Failed to snapshot row: {}", e)))
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn list_users(&self, filter: &UserFilter, page: PageRequest) -> ApiResult<(Vec<UserWithRoles>, i64)>;
    async fn find_user(&self, id: i64) -> ApiResult<Option<UserWithRoles>>;
    async fn find_user_by_username(&self, username: &str) -> ApiResult<Option<UserWithRoles>>;
    /// Fails with `用户名已存在` / `邮箱已被使用` on duplicates
    async fn create_user(&self, user: NewUser) -> ApiResult<UserWithRoles>;
    /// Role links are replaced when `changes.role_ids` is present
    async fn update_user(&self, id: i64, changes: UserChanges) -> ApiResult<Option<UserWithRoles>>;
    async fn delete_user(&self, id: i64) -> ApiResult<bool>;
    async fn touch_login(&self, id: i64, at: DateTime<Utc>) -> ApiResult<()>;
    /// Union of the permissions granted by every role the user holds
    async fn permissions_of(&self, user_id: i64) -> ApiResult<Vec<Permission>>;
}

#[async_trait]
pub trait RoleRepository: Send + Sync {
    async fn list_roles(&self, filter: &RoleFilter, page: PageRequest) -> ApiResult<(Vec<RoleWithPermissions>, i64)>;
    async fn find_role(&self, id: i64) -> ApiResult<Option<RoleWithPermissions>>;
    async fn create_role(&self, request: &CreateRoleRequest) -> ApiResult<RoleWithPermissions>;
    async fn update_role(&self, id: i64, request: &UpdateRoleRequest) -> ApiResult<Option<RoleWithPermissions>>;
    /// Refused while any user holds the role
    async fn delete_role(&self, id: i64) -> ApiResult<bool>;
    /// Ordered by module, then code
    async fn list_permissions(&self, module: Option<&str>) -> ApiResult<Vec<Permission>>;
}

#[async_trait]
pub trait CatalogRepository: Send + Sync {
    async fn list_data_types(&self) -> ApiResult<Vec<DataType>>;
    async fn list_format_rules(&self) -> ApiResult<Vec<FormatRule>>;
    async fn list_rule_categories(&self) -> ApiResult<Vec<RuleCategory>>;
    async fn list_rule_templates(&self, rule_type: Option<RuleType>) -> ApiResult<Vec<RuleTemplate>>;
    /// Flat list; the tree is assembled by `build_category_tree`
    async fn list_data_element_categories(&self) -> ApiResult<Vec<DataElementCategory>>;
}

#[async_trait]
pub trait DataElementRepository: Send + Sync {
    async fn list_data_elements(&self, filter: &DataElementFilter, page: PageRequest) -> ApiResult<(Vec<DataElement>, i64)>;
    async fn find_data_element(&self, id: i64) -> ApiResult<Option<DataElement>>;
    /// Newest version first
    async fn data_element_versions(&self, id: i64, limit: i64) -> ApiResult<Vec<EntityVersion>>;
    async fn create_data_element(&self, request: &CreateDataElementRequest, actor: i64) -> ApiResult<DataElement>;
    /// Snapshots the current row, applies the changes and bumps `version`
    async fn update_data_element(&self, id: i64, request: &UpdateDataElementRequest, actor: i64) -> ApiResult<Option<DataElement>>;
    /// Refused while a task references the element
    async fn delete_data_element(&self, id: i64) -> ApiResult<bool>;
}

#[async_trait]
pub trait QualityRuleRepository: Send + Sync {
    async fn list_quality_rules(&self, filter: &QualityRuleFilter, page: PageRequest) -> ApiResult<(Vec<QualityRule>, i64)>;
    async fn find_quality_rule(&self, id: i64) -> ApiResult<Option<QualityRule>>;
    async fn quality_rule_versions(&self, id: i64, limit: i64) -> ApiResult<Vec<EntityVersion>>;
    async fn create_quality_rule(&self, request: &CreateQualityRuleRequest, actor: i64) -> ApiResult<QualityRule>;
    async fn update_quality_rule(&self, id: i64, request: &UpdateQualityRuleRequest, actor: i64) -> ApiResult<Option<QualityRule>>;
    async fn delete_quality_rule(&self, id: i64) -> ApiResult<bool>;
}

#[async_trait]
pub trait MappingRuleRepository: Send + Sync {
    async fn list_mapping_rules(&self, filter: &MappingRuleFilter, page: PageRequest) -> ApiResult<(Vec<MappingRule>, i64)>;
    async fn find_mapping_rule(&self, id: i64) -> ApiResult<Option<MappingRuleDetail>>;
    async fn create_mapping_rule(&self, request: &CreateMappingRuleRequest, actor: i64) -> ApiResult<MappingRuleDetail>;
    /// Children are replaced in the same transaction when supplied
    async fn update_mapping_rule(&self, id: i64, request: &UpdateMappingRuleRequest, actor: i64) -> ApiResult<Option<MappingRuleDetail>>;
    async fn delete_mapping_rule(&self, id: i64) -> ApiResult<bool>;
}

#[async_trait]
pub trait DataSourceRepository: Send + Sync {
    async fn list_data_sources(&self, filter: &DataSourceFilter, page: PageRequest) -> ApiResult<(Vec<ExternalDataSource>, i64)>;
    async fn find_data_source(&self, id: i64) -> ApiResult<Option<ExternalDataSource>>;
    /// Newest first
    async fn sync_tasks_of_source(&self, source_id: i64, limit: i64) -> ApiResult<Vec<SyncTask>>;
    async fn create_data_source(&self, request: &CreateDataSourceRequest, actor: i64) -> ApiResult<ExternalDataSource>;
    async fn update_data_source(&self, id: i64, request: &UpdateDataSourceRequest, actor: i64) -> ApiResult<Option<ExternalDataSource>>;
    /// Refused while sync tasks belong to the source
    async fn delete_data_source(&self, id: i64) -> ApiResult<bool>;
}

#[async_trait]
pub trait SyncTaskRepository: Send + Sync {
    async fn list_sync_tasks(&self, filter: &SyncTaskFilter, page: PageRequest) -> ApiResult<(Vec<SyncTask>, i64)>;
    async fn find_sync_task(&self, id: i64) -> ApiResult<Option<SyncTask>>;
    /// Newest first
    async fn sync_records(&self, sync_task_id: i64, limit: i64) -> ApiResult<Vec<SyncRecord>>;
    async fn create_sync_task(&self, request: &CreateSyncTaskRequest, actor: i64) -> ApiResult<SyncTask>;
    async fn update_sync_task(&self, id: i64, request: &UpdateSyncTaskRequest, actor: i64) -> ApiResult<Option<SyncTask>>;
    /// Refused while `sync_enabled` is set
    async fn delete_sync_task(&self, id: i64) -> ApiResult<bool>;
    /// Compare-and-set `sync_status` to running. `None` when the task is
    /// missing or already running.
    async fn begin_sync(&self, id: i64, actor: i64) -> ApiResult<Option<SyncTask>>;
    /// Persist the run record and leave the task in `status`
    async fn finish_sync(&self, id: i64, record: NewSyncRecord, status: SyncStatus, log: &str, actor: i64) -> ApiResult<SyncRecord>;
    /// Release a claim whose run could not be recorded: `running` becomes `failed`
    async fn abort_sync(&self, id: i64, log: &str, actor: i64) -> ApiResult<()>;
}

#[async_trait]
pub trait QualityCheckRepository: Send + Sync {
    async fn list_quality_checks(&self, filter: &QualityCheckFilter, page: PageRequest) -> ApiResult<(Vec<QualityCheck>, i64)>;
    async fn find_quality_check(&self, id: i64) -> ApiResult<Option<QualityCheck>>;
    async fn create_quality_check(&self, request: &CreateQualityCheckRequest, actor: i64) -> ApiResult<QualityCheck>;
    /// Reports are removed with the check
    async fn delete_quality_check(&self, id: i64) -> ApiResult<bool>;
    /// Newest first
    async fn reports_of_check(&self, check_id: i64, limit: i64) -> ApiResult<Vec<QualityReport>>;
    /// Set `running`; `None` when the check is missing
    async fn begin_check(&self, id: i64, actor: i64) -> ApiResult<Option<QualityCheck>>;
    /// Persist the report, set `completed` and stamp `last_check_time`
    async fn finish_check(&self, id: i64, report: NewQualityReport, actor: i64) -> ApiResult<QualityReport>;
    async fn fail_check(&self, id: i64, actor: i64) -> ApiResult<()>;
    /// Ordered by check time, newest first
    async fn list_quality_reports(&self, filter: &QualityReportFilter, page: PageRequest) -> ApiResult<(Vec<QualityReport>, i64)>;
    /// Reports of one check since `since`, oldest first
    async fn quality_trend(&self, check_id: i64, since: DateTime<Utc>) -> ApiResult<Vec<QualityReport>>;
}

/// Execution values submitted when a task is completed
#[derive(Debug, Clone, Default)]
pub struct NewExecution {
    pub execution_log: Option<String>,
    pub result_summary: Option<String>,
    pub processed_count: i32,
    pub success_count: i32,
    pub failed_count: i32,
}

/// Side effect written together with a task status change
#[derive(Debug, Clone)]
pub enum TransitionEffect {
    /// Insert a pending assignment
    Assign {
        assigned_to: i64,
        deadline: Option<DateTime<Utc>>,
    },
    /// Close a pending assignment. Accepting stamps `actual_start_time`.
    Respond {
        assignment_id: i64,
        accepted: bool,
        reject_reason: Option<String>,
    },
    /// Record a successful execution and stamp `actual_end_time`
    Complete(NewExecution),
    /// Store the reviewer's comment
    Review { comment: Option<String> },
}

/// A task status compare-and-set plus its side effect
#[derive(Debug, Clone)]
pub struct Transition {
    pub task_id: i64,
    pub from: TaskStatus,
    pub to: TaskStatus,
    pub actor_id: i64,
    pub at: DateTime<Utc>,
    pub effect: TransitionEffect,
}

/// Rows written by a successful transition
#[derive(Debug, Clone)]
pub struct TransitionRecord {
    pub task: Task,
    pub assignment: Option<TaskAssignment>,
    pub execution: Option<TaskExecution>,
}

#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn list_tasks(&self, filter: &TaskFilter, page: PageRequest) -> ApiResult<(Vec<Task>, i64)>;
    async fn find_task(&self, id: i64) -> ApiResult<Option<Task>>;
    /// Oldest first
    async fn task_assignments(&self, task_id: i64) -> ApiResult<Vec<TaskAssignment>>;
    /// Newest first
    async fn task_executions(&self, task_id: i64, limit: i64) -> ApiResult<Vec<TaskExecution>>;
    async fn create_task(&self, task: NewTask, actor: i64) -> ApiResult<Task>;
    async fn update_task(&self, id: i64, request: &UpdateTaskRequest, actor: i64) -> ApiResult<Option<Task>>;
    /// Refused while the task is in progress or under review
    async fn delete_task(&self, id: i64) -> ApiResult<bool>;
    async fn pending_assignment(&self, task_id: i64, user_id: i64) -> ApiResult<Option<TaskAssignment>>;
    /// Atomically move the task from `from` to `to` and write the effect.
    /// `None` when the task is missing or no longer in `from` (or, for a
    /// response, the assignment is no longer pending); nothing is written then.
    async fn apply_transition(&self, transition: Transition) -> ApiResult<Option<TransitionRecord>>;
}

/// Everything the application needs from a storage backend
pub trait Store:
    UserRepository
    + RoleRepository
    + CatalogRepository
    + DataElementRepository
    + QualityRuleRepository
    + MappingRuleRepository
    + DataSourceRepository
    + SyncTaskRepository
    + QualityCheckRepository
    + TaskRepository
    + 'static
{
}

impl<T> Store for T where
    T: UserRepository
        + RoleRepository
        + CatalogRepository
        + DataElementRepository
        + QualityRuleRepository
        + MappingRuleRepository
        + DataSourceRepository
        + SyncTaskRepository
        + QualityCheckRepository
        + TaskRepository
        + 'static
{
}
