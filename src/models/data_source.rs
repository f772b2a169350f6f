//! External data source models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::{text_enum, SyncTask};

text_enum! {
    pub enum SourceType {
        Database => "database",
        Api => "api",
        File => "file",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalDataSource {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub source_type: SourceType,
    /// Free-form connection settings, interpreted by the sync connector
    pub connection_config: serde_json::Value,
    pub api_endpoint: Option<String>,
    #[serde(skip_serializing, default)] // Credentials stay server side
    pub api_key: Option<String>,
    pub status: i16,
    pub created_by: Option<i64>,
    pub updated_by: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceDetail {
    #[serde(flatten)]
    pub source: ExternalDataSource,
    pub sync_tasks: Vec<SyncTask>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateDataSourceRequest {
    #[validate(custom(function = "crate::models::not_blank", message = "编码不能为空"), length(max = 50, message = "编码最多50位"))]
    pub code: String,
    #[validate(custom(function = "crate::models::not_blank", message = "名称不能为空"), length(max = 100, message = "名称最多100位"))]
    pub name: String,
    pub description: Option<String>,
    pub source_type: SourceType,
    #[serde(default = "empty_object")]
    pub connection_config: serde_json::Value,
    #[validate(length(max = 255, message = "接口地址最多255位"))]
    pub api_endpoint: Option<String>,
    #[validate(length(max = 255, message = "接口密钥最多255位"))]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDataSourceRequest {
    #[validate(custom(function = "crate::models::not_blank", message = "编码不能为空"), length(max = 50, message = "编码最多50位"))]
    pub code: Option<String>,
    #[validate(custom(function = "crate::models::not_blank", message = "名称不能为空"), length(max = 100, message = "名称最多100位"))]
    pub name: Option<String>,
    pub description: Option<String>,
    pub source_type: Option<SourceType>,
    pub connection_config: Option<serde_json::Value>,
    #[validate(length(max = 255, message = "接口地址最多255位"))]
    pub api_endpoint: Option<String>,
    #[validate(length(max = 255, message = "接口密钥最多255位"))]
    pub api_key: Option<String>,
    #[validate(range(min = 0, max = 1, message = "状态值无效"))]
    pub status: Option<i16>,
}

impl UpdateDataSourceRequest {
    pub fn apply_to(&self, source: &mut ExternalDataSource) {
        if let Some(code) = &self.code {
            source.code = code.clone();
        }
        if let Some(name) = &self.name {
            source.name = name.clone();
        }
        if self.description.is_some() {
            source.description = self.description.clone();
        }
        if let Some(source_type) = self.source_type {
            source.source_type = source_type;
        }
        if let Some(config) = &self.connection_config {
            source.connection_config = config.clone();
        }
        if self.api_endpoint.is_some() {
            source.api_endpoint = self.api_endpoint.clone();
        }
        if self.api_key.is_some() {
            source.api_key = self.api_key.clone();
        }
        if let Some(status) = self.status {
            source.status = status;
        }
    }
}

pub(crate) fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

#[derive(Debug, Clone, Default)]
pub struct DataSourceFilter {
    pub keyword: Option<String>,
    pub source_type: Option<SourceType>,
    pub status: Option<i16>,
}

impl DataSourceFilter {
    pub fn matches(&self, source: &ExternalDataSource) -> bool {
        self.keyword.as_deref().map_or(true, |k| {
            super::contains_keyword(&source.code, k) || super::contains_keyword(&source.name, k)
        }) && self.source_type.map_or(true, |t| source.source_type == t)
            && self.status.map_or(true, |s| source.status == s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_key_is_never_serialized() {
        let now = Utc::now();
        let source = ExternalDataSource {
            id: 1,
            code: "CRM".into(),
            name: "客户系统".into(),
            description: None,
            source_type: SourceType::Api,
            connection_config: empty_object(),
            api_endpoint: Some("https://crm.example.com".into()),
            api_key: Some("s3cr3t".into()),
            status: 1,
            created_by: None,
            updated_by: None,
            created_at: now,
            updated_at: now,
        };

        let json = serde_json::to_value(&source).unwrap();
        assert!(json.get("apiKey").is_none());
        assert_eq!(json["sourceType"], "api");
    }
}
