//! Data element registry models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// A named, typed unit of business data
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataElement {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub data_type_id: Option<i64>,
    pub format_rule_id: Option<i64>,
    pub length: Option<i32>,
    pub is_required: bool,
    pub default_value: Option<String>,
    pub value_range: Option<String>,
    pub business_rule: Option<String>,
    pub category_id: Option<i64>,
    pub status: i16,
    pub version: i32,
    pub created_by: Option<i64>,
    pub updated_by: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Snapshot appended to a version-history table before a versioned entity changes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityVersion {
    pub id: i64,
    pub entity_id: i64,
    /// Version the entity had when the snapshot was taken
    pub version: i32,
    pub content: serde_json::Value,
    pub created_by: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Single element with its latest history entries
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataElementDetail {
    #[serde(flatten)]
    pub element: DataElement,
    pub versions: Vec<EntityVersion>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateDataElementRequest {
    #[validate(custom(function = "crate::models::not_blank", message = "编码不能为空"), length(max = 50, message = "编码最多50位"))]
    pub code: String,
    #[validate(custom(function = "crate::models::not_blank", message = "名称不能为空"), length(max = 100, message = "名称最多100位"))]
    pub name: String,
    pub description: Option<String>,
    pub data_type_id: Option<i64>,
    pub format_rule_id: Option<i64>,
    #[validate(range(min = 1, message = "长度必须为正整数"))]
    pub length: Option<i32>,
    #[serde(default)]
    pub is_required: bool,
    #[validate(length(max = 255, message = "默认值最多255位"))]
    pub default_value: Option<String>,
    #[validate(length(max = 255, message = "取值范围最多255位"))]
    pub value_range: Option<String>,
    pub business_rule: Option<String>,
    pub category_id: Option<i64>,
}

/// Fields a PUT may change; anything else in the body is ignored
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDataElementRequest {
    #[validate(custom(function = "crate::models::not_blank", message = "编码不能为空"), length(max = 50, message = "编码最多50位"))]
    pub code: Option<String>,
    #[validate(custom(function = "crate::models::not_blank", message = "名称不能为空"), length(max = 100, message = "名称最多100位"))]
    pub name: Option<String>,
    pub description: Option<String>,
    pub data_type_id: Option<i64>,
    pub format_rule_id: Option<i64>,
    #[validate(range(min = 1, message = "长度必须为正整数"))]
    pub length: Option<i32>,
    pub is_required: Option<bool>,
    #[validate(length(max = 255, message = "默认值最多255位"))]
    pub default_value: Option<String>,
    #[validate(length(max = 255, message = "取值范围最多255位"))]
    pub value_range: Option<String>,
    pub business_rule: Option<String>,
    pub category_id: Option<i64>,
    #[validate(range(min = 0, max = 1, message = "状态值无效"))]
    pub status: Option<i16>,
}

impl UpdateDataElementRequest {
    /// Apply the present fields onto `element`
    pub fn apply_to(&self, element: &mut DataElement) {
        if let Some(code) = &self.code {
            element.code = code.clone();
        }
        if let Some(name) = &self.name {
            element.name = name.clone();
        }
        if self.description.is_some() {
            element.description = self.description.clone();
        }
        if self.data_type_id.is_some() {
            element.data_type_id = self.data_type_id;
        }
        if self.format_rule_id.is_some() {
            element.format_rule_id = self.format_rule_id;
        }
        if self.length.is_some() {
            element.length = self.length;
        }
        if let Some(is_required) = self.is_required {
            element.is_required = is_required;
        }
        if self.default_value.is_some() {
            element.default_value = self.default_value.clone();
        }
        if self.value_range.is_some() {
            element.value_range = self.value_range.clone();
        }
        if self.business_rule.is_some() {
            element.business_rule = self.business_rule.clone();
        }
        if self.category_id.is_some() {
            element.category_id = self.category_id;
        }
        if let Some(status) = self.status {
            element.status = status;
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DataElementFilter {
    pub keyword: Option<String>,
    pub category_id: Option<i64>,
    pub status: Option<i16>,
}

impl DataElementFilter {
    pub fn matches(&self, element: &DataElement) -> bool {
        self.keyword.as_deref().map_or(true, |k| {
            super::contains_keyword(&element.code, k) || super::contains_keyword(&element.name, k)
        }) && self.category_id.map_or(true, |c| element.category_id == Some(c))
            && self.status.map_or(true, |s| element.status == s)
    }
}
