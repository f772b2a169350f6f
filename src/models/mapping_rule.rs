//! Mapping rule models: source to target field and value transformations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::text_enum;

text_enum! {
    pub enum MappingType {
        OneToOne => "one_to_one",
        OneToMany => "one_to_many",
        ManyToOne => "many_to_one",
    }
}

impl Default for MappingType {
    fn default() -> Self {
        MappingType::OneToOne
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingRule {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub source_system: String,
    pub source_table: String,
    pub target_system: String,
    pub target_table: String,
    pub mapping_type: MappingType,
    pub status: i16,
    pub created_by: Option<i64>,
    pub updated_by: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldMapping {
    pub id: i64,
    pub mapping_rule_id: i64,
    pub source_field: String,
    pub target_field: String,
    pub transform_expression: Option<String>,
    pub sort_order: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueMapping {
    pub id: i64,
    pub mapping_rule_id: i64,
    pub source_value: String,
    pub target_value: String,
    pub description: Option<String>,
}

/// Rule with its children, field mappings ordered by `sort_order`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingRuleDetail {
    #[serde(flatten)]
    pub rule: MappingRule,
    pub field_mappings: Vec<FieldMapping>,
    pub value_mappings: Vec<ValueMapping>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct FieldMappingInput {
    #[validate(custom(function = "crate::models::not_blank", message = "源字段不能为空"))]
    pub source_field: String,
    #[validate(custom(function = "crate::models::not_blank", message = "目标字段不能为空"))]
    pub target_field: String,
    pub transform_expression: Option<String>,
    #[serde(default)]
    pub sort_order: i32,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ValueMappingInput {
    pub source_value: String,
    pub target_value: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateMappingRuleRequest {
    #[validate(custom(function = "crate::models::not_blank", message = "编码不能为空"), length(max = 50, message = "编码最多50位"))]
    pub code: String,
    #[validate(custom(function = "crate::models::not_blank", message = "名称不能为空"), length(max = 100, message = "名称最多100位"))]
    pub name: String,
    pub description: Option<String>,
    #[validate(custom(function = "crate::models::not_blank", message = "源系统不能为空"), length(max = 100, message = "源系统最多100位"))]
    pub source_system: String,
    #[validate(custom(function = "crate::models::not_blank", message = "源表不能为空"), length(max = 100, message = "源表最多100位"))]
    pub source_table: String,
    #[validate(custom(function = "crate::models::not_blank", message = "目标系统不能为空"), length(max = 100, message = "目标系统最多100位"))]
    pub target_system: String,
    #[validate(custom(function = "crate::models::not_blank", message = "目标表不能为空"), length(max = 100, message = "目标表最多100位"))]
    pub target_table: String,
    #[serde(default)]
    pub mapping_type: MappingType,
    #[serde(default)]
    #[validate(nested)]
    pub field_mappings: Vec<FieldMappingInput>,
    #[serde(default)]
    #[validate(nested)]
    pub value_mappings: Vec<ValueMappingInput>,
}

/// PUT body. Children lists replace the stored ones only when present.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMappingRuleRequest {
    #[validate(custom(function = "crate::models::not_blank", message = "编码不能为空"), length(max = 50, message = "编码最多50位"))]
    pub code: Option<String>,
    #[validate(custom(function = "crate::models::not_blank", message = "名称不能为空"), length(max = 100, message = "名称最多100位"))]
    pub name: Option<String>,
    pub description: Option<String>,
    #[validate(custom(function = "crate::models::not_blank", message = "源系统不能为空"), length(max = 100, message = "源系统最多100位"))]
    pub source_system: Option<String>,
    #[validate(custom(function = "crate::models::not_blank", message = "源表不能为空"), length(max = 100, message = "源表最多100位"))]
    pub source_table: Option<String>,
    #[validate(custom(function = "crate::models::not_blank", message = "目标系统不能为空"), length(max = 100, message = "目标系统最多100位"))]
    pub target_system: Option<String>,
    #[validate(custom(function = "crate::models::not_blank", message = "目标表不能为空"), length(max = 100, message = "目标表最多100位"))]
    pub target_table: Option<String>,
    pub mapping_type: Option<MappingType>,
    #[validate(range(min = 0, max = 1, message = "状态值无效"))]
    pub status: Option<i16>,
    #[validate(nested)]
    pub field_mappings: Option<Vec<FieldMappingInput>>,
    #[validate(nested)]
    pub value_mappings: Option<Vec<ValueMappingInput>>,
}

impl UpdateMappingRuleRequest {
    pub fn apply_to(&self, rule: &mut MappingRule) {
        if let Some(code) = &self.code {
            rule.code = code.clone();
        }
        if let Some(name) = &self.name {
            rule.name = name.clone();
        }
        if self.description.is_some() {
            rule.description = self.description.clone();
        }
        if let Some(v) = &self.source_system {
            rule.source_system = v.clone();
        }
        if let Some(v) = &self.source_table {
            rule.source_table = v.clone();
        }
        if let Some(v) = &self.target_system {
            rule.target_system = v.clone();
        }
        if let Some(v) = &self.target_table {
            rule.target_table = v.clone();
        }
        if let Some(mapping_type) = self.mapping_type {
            rule.mapping_type = mapping_type;
        }
        if let Some(status) = self.status {
            rule.status = status;
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MappingRuleFilter {
    pub keyword: Option<String>,
    pub status: Option<i16>,
}

impl MappingRuleFilter {
    /// Keyword matches code, name, source system or target system
    pub fn matches(&self, rule: &MappingRule) -> bool {
        self.keyword.as_deref().map_or(true, |k| {
            [&rule.code, &rule.name, &rule.source_system, &rule.target_system]
                .iter()
                .any(|field| super::contains_keyword(field, k))
        }) && self.status.map_or(true, |s| rule.status == s)
    }
}
