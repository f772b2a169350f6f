//! Application state management
//!
//! Contains shared state accessible across all handlers. Handlers only see
//! repository traits, so the Postgres and in-memory backends are
//! interchangeable.

use crate::auth::TokenService;
use crate::config::Settings;
use crate::repository::*;
use crate::workflow::{NoopConnector, QualityExecutor, SimulatedEvaluator, SyncExecutor, TaskWorkflow};
use std::sync::Arc;

/// Application state shared across all handlers
pub struct AppState {
    pub users: Arc<dyn UserRepository>,
    pub roles: Arc<dyn RoleRepository>,
    pub catalog: Arc<dyn CatalogRepository>,
    pub data_elements: Arc<dyn DataElementRepository>,
    pub quality_rules: Arc<dyn QualityRuleRepository>,
    pub mapping_rules: Arc<dyn MappingRuleRepository>,
    pub data_sources: Arc<dyn DataSourceRepository>,
    pub sync_tasks: Arc<dyn SyncTaskRepository>,
    pub quality_checks: Arc<dyn QualityCheckRepository>,
    pub tasks: Arc<dyn TaskRepository>,

    /// Issues and verifies bearer tokens
    pub tokens: TokenService,

    pub workflow: TaskWorkflow,
    pub sync: SyncExecutor,
    pub quality: QualityExecutor,

    pub settings: Settings,
}

impl AppState {
    /// Wire every repository to one storage backend
    pub fn new<S: Store>(store: Arc<S>, settings: Settings) -> Self {
        Self {
            users: store.clone(),
            roles: store.clone(),
            catalog: store.clone(),
            data_elements: store.clone(),
            quality_rules: store.clone(),
            mapping_rules: store.clone(),
            data_sources: store.clone(),
            sync_tasks: store.clone(),
            quality_checks: store.clone(),
            tasks: store.clone(),
            tokens: TokenService::from_config(&settings.auth),
            workflow: TaskWorkflow::new(store.clone(), store.clone()),
            sync: SyncExecutor::new(store.clone(), Arc::new(NoopConnector)),
            quality: QualityExecutor::new(store, Arc::new(SimulatedEvaluator)),
            settings,
        }
    }
}

/// Type alias for shared state
pub type SharedState = Arc<AppState>;
