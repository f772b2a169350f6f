//! Sync task execution

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::error::{not_found_error, ApiResult, AppError};
use crate::models::*;
use crate::repository::SyncTaskRepository;

/// Counts reported by a connector run
#[derive(Debug, Clone, PartialEq)]
pub struct SyncOutcome {
    pub total_count: i32,
    pub success_count: i32,
    pub failed_count: i32,
    pub updated_count: i32,
    pub inserted_count: i32,
    pub details: serde_json::Value,
}

impl Default for SyncOutcome {
    fn default() -> Self {
        Self {
            total_count: 0,
            success_count: 0,
            failed_count: 0,
            updated_count: 0,
            inserted_count: 0,
            details: serde_json::json!({}),
        }
    }
}

#[derive(Debug, Error)]
#[error("{0}")]
pub struct ConnectorError(pub String);

/// Pulls records from an external source into a registry
#[async_trait]
pub trait SyncConnector: Send + Sync {
    async fn run(&self, task: &SyncTask) -> Result<SyncOutcome, ConnectorError>;
}

/// Connector that transfers nothing and always succeeds
pub struct NoopConnector;

#[async_trait]
impl SyncConnector for NoopConnector {
    async fn run(&self, _task: &SyncTask) -> Result<SyncOutcome, ConnectorError> {
        Ok(SyncOutcome::default())
    }
}

pub struct SyncExecutor {
    tasks: Arc<dyn SyncTaskRepository>,
    connector: Arc<dyn SyncConnector>,
}

impl SyncExecutor {
    pub fn new(tasks: Arc<dyn SyncTaskRepository>, connector: Arc<dyn SyncConnector>) -> Self {
        Self { tasks, connector }
    }

    /// Run a sync task once and return the persisted record.
    ///
    /// The task is claimed with a compare-and-set to `running`; a second
    /// concurrent execute is refused. A connector failure is recorded in the
    /// run record and leaves the task `failed` rather than failing the request.
    /// If the record itself cannot be saved, the claim is released as `failed`.
    pub async fn execute(&self, id: i64, actor: i64) -> ApiResult<SyncRecord> {
        let Some(task) = self.tasks.begin_sync(id, actor).await? else {
            return match self.tasks.find_sync_task(id).await? {
                Some(_) => {
                    warn!("Sync task {} is already running", id);
                    Err(AppError::InvalidState("同步任务正在执行中".to_string()))
                }
                None => Err(not_found_error("同步任务不存在")),
            };
        };

        info!("Sync task {} ({}) started by user {}", task.id, task.code, actor);
        let started = Instant::now();
        let result = self.connector.run(&task).await;
        let duration_seconds = started.elapsed().as_secs() as i32;

        let (record, status, log) = match result {
            Ok(outcome) => (
                NewSyncRecord {
                    sync_status: ExecutionStatus::Success,
                    total_count: outcome.total_count,
                    success_count: outcome.success_count,
                    failed_count: outcome.failed_count,
                    updated_count: outcome.updated_count,
                    inserted_count: outcome.inserted_count,
                    sync_details: outcome.details,
                    error_message: None,
                    duration_seconds,
                },
                SyncStatus::Idle,
                "同步完成".to_string(),
            ),
            Err(e) => {
                error!("Sync task {} failed: {}", task.id, e);
                (
                    NewSyncRecord {
                        sync_status: ExecutionStatus::Failed,
                        total_count: 0,
                        success_count: 0,
                        failed_count: 0,
                        updated_count: 0,
                        inserted_count: 0,
                        sync_details: serde_json::json!({}),
                        error_message: Some(e.to_string()),
                        duration_seconds,
                    },
                    SyncStatus::Failed,
                    format!("同步失败: {}", e),
                )
            }
        };

        let saved = match self.tasks.finish_sync(task.id, record, status, &log, actor).await {
            Ok(saved) => saved,
            Err(e) => {
                error!("Failed to record sync run for task {}: {}", task.id, e);
                if let Err(reset) = self.tasks.abort_sync(task.id, "同步记录保存失败", actor).await {
                    error!("Failed to release sync task {}: {}", task.id, reset);
                }
                return Err(e);
            }
        };
        info!("Sync task {} finished with status {}", task.id, status);
        Ok(saved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{DataSourceRepository, MemoryStore};
    use pretty_assertions::assert_eq;

    struct FailingConnector;

    #[async_trait]
    impl SyncConnector for FailingConnector {
        async fn run(&self, _task: &SyncTask) -> Result<SyncOutcome, ConnectorError> {
            Err(ConnectorError("connection refused".to_string()))
        }
    }

    async fn sync_task(store: &MemoryStore) -> SyncTask {
        let source: CreateDataSourceRequest = serde_json::from_value(serde_json::json!({
            "code": "HR_DB",
            "name": "人事系统",
            "sourceType": "database"
        }))
        .unwrap();
        let source = store.create_data_source(&source, 1).await.unwrap();

        let task: CreateSyncTaskRequest = serde_json::from_value(serde_json::json!({
            "code": "SYNC_HR",
            "name": "人事数据元同步",
            "syncType": "data_element",
            "sourceId": source.id,
            "targetType": "data_element",
            "syncFrequency": "manual"
        }))
        .unwrap();
        store.create_sync_task(&task, 1).await.unwrap()
    }

    #[tokio::test]
    async fn test_execute_records_run_and_returns_to_idle() {
        let store = Arc::new(MemoryStore::new());
        let task = sync_task(&store).await;
        let executor = SyncExecutor::new(store.clone(), Arc::new(NoopConnector));

        let record = executor.execute(task.id, 1).await.unwrap();
        assert_eq!(record.sync_status, ExecutionStatus::Success);
        assert_eq!(record.total_count, 0);

        let task = store.find_sync_task(task.id).await.unwrap().unwrap();
        assert_eq!(task.sync_status, SyncStatus::Idle);
        assert_eq!(task.sync_log.as_deref(), Some("同步完成"));
        assert_eq!(task.last_sync_time, Some(record.sync_time));
        assert_eq!(store.sync_records(task.id, 20).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_connector_failure_marks_task_failed() {
        let store = Arc::new(MemoryStore::new());
        let task = sync_task(&store).await;
        let executor = SyncExecutor::new(store.clone(), Arc::new(FailingConnector));

        let record = executor.execute(task.id, 1).await.unwrap();
        assert_eq!(record.sync_status, ExecutionStatus::Failed);
        assert_eq!(record.error_message.as_deref(), Some("connection refused"));
        let task = store.find_sync_task(task.id).await.unwrap().unwrap();
        assert_eq!(task.sync_status, SyncStatus::Failed);
    }

    #[tokio::test]
    async fn test_running_task_is_refused() {
        let store = Arc::new(MemoryStore::new());
        let task = sync_task(&store).await;
        store.begin_sync(task.id, 1).await.unwrap().unwrap();

        let executor = SyncExecutor::new(store.clone(), Arc::new(NoopConnector));
        let err = executor.execute(task.id, 1).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidState(ref m) if m == "同步任务正在执行中"));
        assert!(store.sync_records(task.id, 20).await.unwrap().is_empty());
    }

    /// Delegates to the memory store but cannot save run records
    struct UnwritableRecords(Arc<MemoryStore>);

    #[async_trait]
    impl SyncTaskRepository for UnwritableRecords {
        async fn list_sync_tasks(&self, filter: &SyncTaskFilter, page: PageRequest) -> ApiResult<(Vec<SyncTask>, i64)> {
            self.0.list_sync_tasks(filter, page).await
        }
        async fn find_sync_task(&self, id: i64) -> ApiResult<Option<SyncTask>> {
            self.0.find_sync_task(id).await
        }
        async fn sync_records(&self, sync_task_id: i64, limit: i64) -> ApiResult<Vec<SyncRecord>> {
            self.0.sync_records(sync_task_id, limit).await
        }
        async fn create_sync_task(&self, request: &CreateSyncTaskRequest, actor: i64) -> ApiResult<SyncTask> {
            self.0.create_sync_task(request, actor).await
        }
        async fn update_sync_task(&self, id: i64, request: &UpdateSyncTaskRequest, actor: i64) -> ApiResult<Option<SyncTask>> {
            self.0.update_sync_task(id, request, actor).await
        }
        async fn delete_sync_task(&self, id: i64) -> ApiResult<bool> {
            self.0.delete_sync_task(id).await
        }
        async fn begin_sync(&self, id: i64, actor: i64) -> ApiResult<Option<SyncTask>> {
            self.0.begin_sync(id, actor).await
        }
        async fn finish_sync(&self, _id: i64, _record: NewSyncRecord, _status: SyncStatus, _log: &str, _actor: i64) -> ApiResult<SyncRecord> {
            Err(AppError::Internal("connection reset".to_string()))
        }
        async fn abort_sync(&self, id: i64, log: &str, actor: i64) -> ApiResult<()> {
            self.0.abort_sync(id, log, actor).await
        }
    }

    #[tokio::test]
    async fn test_unsaved_record_releases_running_claim() {
        let store = Arc::new(MemoryStore::new());
        let task = sync_task(&store).await;
        let broken = SyncExecutor::new(Arc::new(UnwritableRecords(store.clone())), Arc::new(NoopConnector));

        let err = broken.execute(task.id, 1).await.unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));
        let stored = store.find_sync_task(task.id).await.unwrap().unwrap();
        assert_eq!(stored.sync_status, SyncStatus::Failed);
        assert!(store.sync_records(task.id, 20).await.unwrap().is_empty());

        let executor = SyncExecutor::new(store.clone(), Arc::new(NoopConnector));
        let record = executor.execute(task.id, 1).await.unwrap();
        assert_eq!(record.sync_status, ExecutionStatus::Success);
        let stored = store.find_sync_task(task.id).await.unwrap().unwrap();
        assert_eq!(stored.sync_status, SyncStatus::Idle);
    }

    #[test]
    fn test_missing_task_is_not_found() {
        let store = Arc::new(MemoryStore::new());
        let executor = SyncExecutor::new(store, Arc::new(NoopConnector));
        let err = tokio_test::block_on(executor.execute(7, 1)).unwrap_err();
        assert!(matches!(err, AppError::NotFound(ref m) if m == "同步任务不存在"));
    }
}
