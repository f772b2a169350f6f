//! Synchronization task models

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use super::{text_enum, ExecutionStatus, ExternalDataSource};

text_enum! {
    /// Registry a sync task feeds
    pub enum SyncType {
        DataElement => "data_element",
        QualityRule => "quality_rule",
        MappingRule => "mapping_rule",
    }
}

text_enum! {
    pub enum SyncFrequency {
        Manual => "manual",
        Daily => "daily",
        Weekly => "weekly",
        Monthly => "monthly",
        Cron => "cron",
    }
}

text_enum! {
    pub enum SyncStatus {
        Idle => "idle",
        Running => "running",
        Success => "success",
        Failed => "failed",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncTask {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub sync_type: SyncType,
    pub source_id: i64,
    pub target_type: String,
    pub target_config: serde_json::Value,
    pub sync_frequency: SyncFrequency,
    pub cron_expression: Option<String>,
    pub sync_enabled: bool,
    pub sync_status: SyncStatus,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub sync_log: Option<String>,
    pub created_by: Option<i64>,
    pub updated_by: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of one sync run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRecord {
    pub id: i64,
    pub sync_task_id: i64,
    pub sync_status: ExecutionStatus,
    pub total_count: i32,
    pub success_count: i32,
    pub failed_count: i32,
    pub updated_count: i32,
    pub inserted_count: i32,
    pub sync_details: serde_json::Value,
    pub error_message: Option<String>,
    pub duration_seconds: i32,
    pub sync_time: DateTime<Utc>,
}

/// Record values produced by a run, before persistence assigns the id
#[derive(Debug, Clone)]
pub struct NewSyncRecord {
    pub sync_status: ExecutionStatus,
    pub total_count: i32,
    pub success_count: i32,
    pub failed_count: i32,
    pub updated_count: i32,
    pub inserted_count: i32,
    pub sync_details: serde_json::Value,
    pub error_message: Option<String>,
    pub duration_seconds: i32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncTaskDetail {
    #[serde(flatten)]
    pub task: SyncTask,
    pub source: Option<ExternalDataSource>,
    pub sync_records: Vec<SyncRecord>,
}

/// Five or six whitespace separated cron fields
static CRON_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*[0-9A-Za-z*?/,#LW-]+(\s+[0-9A-Za-z*?/,#LW-]+){4,5}\s*$").expect("cron pattern compiles")
});

fn cron_fields(value: &str) -> Result<(), ValidationError> {
    if CRON_PATTERN.is_match(value) {
        Ok(())
    } else {
        Err(ValidationError::new("cron"))
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateSyncTaskRequest {
    #[validate(custom(function = "crate::models::not_blank", message = "编码不能为空"), length(max = 50, message = "编码最多50位"))]
    pub code: String,
    #[validate(custom(function = "crate::models::not_blank", message = "名称不能为空"), length(max = 100, message = "名称最多100位"))]
    pub name: String,
    pub description: Option<String>,
    pub sync_type: SyncType,
    pub source_id: i64,
    #[validate(custom(function = "crate::models::not_blank", message = "目标类型不能为空"), length(max = 50, message = "目标类型最多50位"))]
    pub target_type: String,
    #[serde(default = "super::data_source::empty_object")]
    pub target_config: serde_json::Value,
    pub sync_frequency: SyncFrequency,
    #[validate(length(max = 100, message = "Cron表达式最多100位"), custom(function = "cron_fields", message = "Cron表达式格式不正确"))]
    pub cron_expression: Option<String>,
    #[serde(default)]
    pub sync_enabled: bool,
}

/// PUT body; run state (`syncStatus`, `lastSyncTime`) only changes through Execute
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSyncTaskRequest {
    #[validate(custom(function = "crate::models::not_blank", message = "编码不能为空"), length(max = 50, message = "编码最多50位"))]
    pub code: Option<String>,
    #[validate(custom(function = "crate::models::not_blank", message = "名称不能为空"), length(max = 100, message = "名称最多100位"))]
    pub name: Option<String>,
    pub description: Option<String>,
    pub sync_type: Option<SyncType>,
    pub source_id: Option<i64>,
    #[validate(custom(function = "crate::models::not_blank", message = "目标类型不能为空"), length(max = 50, message = "目标类型最多50位"))]
    pub target_type: Option<String>,
    pub target_config: Option<serde_json::Value>,
    pub sync_frequency: Option<SyncFrequency>,
    #[validate(length(max = 100, message = "Cron表达式最多100位"), custom(function = "cron_fields", message = "Cron表达式格式不正确"))]
    pub cron_expression: Option<String>,
    pub sync_enabled: Option<bool>,
}

impl UpdateSyncTaskRequest {
    pub fn apply_to(&self, task: &mut SyncTask) {
        if let Some(code) = &self.code {
            task.code = code.clone();
        }
        if let Some(name) = &self.name {
            task.name = name.clone();
        }
        if self.description.is_some() {
            task.description = self.description.clone();
        }
        if let Some(sync_type) = self.sync_type {
            task.sync_type = sync_type;
        }
        if let Some(source_id) = self.source_id {
            task.source_id = source_id;
        }
        if let Some(target_type) = &self.target_type {
            task.target_type = target_type.clone();
        }
        if let Some(config) = &self.target_config {
            task.target_config = config.clone();
        }
        if let Some(frequency) = self.sync_frequency {
            task.sync_frequency = frequency;
        }
        if self.cron_expression.is_some() {
            task.cron_expression = self.cron_expression.clone();
        }
        if let Some(enabled) = self.sync_enabled {
            task.sync_enabled = enabled;
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SyncTaskFilter {
    pub keyword: Option<String>,
    pub sync_type: Option<SyncType>,
    pub sync_status: Option<SyncStatus>,
}

impl SyncTaskFilter {
    pub fn matches(&self, task: &SyncTask) -> bool {
        self.keyword.as_deref().map_or(true, |k| {
            super::contains_keyword(&task.code, k) || super::contains_keyword(&task.name, k)
        }) && self.sync_type.map_or(true, |t| task.sync_type == t)
            && self.sync_status.map_or(true, |s| task.sync_status == s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(cron: &str) -> CreateSyncTaskRequest {
        serde_json::from_value(serde_json::json!({
            "code": "SYNC_DE",
            "name": "数据元同步",
            "syncType": "data_element",
            "sourceId": 1,
            "targetType": "data_element",
            "syncFrequency": "cron",
            "cronExpression": cron
        }))
        .unwrap()
    }

    #[test]
    fn test_cron_expression_format() {
        assert!(request("0 2 * * *").validate().is_ok());
        assert!(request("0 0/5 * ? * MON-FRI").validate().is_ok());
        assert!(request("every day").validate().is_err());
    }

    #[test]
    fn test_sync_type_uses_snake_case() {
        let task = request("0 2 * * *");
        assert_eq!(task.sync_type, SyncType::DataElement);
        assert_eq!(SyncStatus::Running.as_str(), "running");
    }
}
