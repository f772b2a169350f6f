//! Quality rule registry models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::{text_enum, EntityVersion};

text_enum! {
    /// Dimension of data quality a rule measures
    pub enum RuleType {
        Completeness => "completeness",
        Consistency => "consistency",
        Accuracy => "accuracy",
        Timeliness => "timeliness",
        Uniqueness => "uniqueness",
        Reference => "reference",
    }
}

text_enum! {
    pub enum Severity {
        Error => "error",
        Warning => "warning",
        Info => "info",
    }
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Error
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityRule {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub rule_type: RuleType,
    pub data_source: Option<String>,
    pub table_name: Option<String>,
    pub field_name: Option<String>,
    pub rule_expression: Option<String>,
    pub severity: Severity,
    pub category_id: Option<i64>,
    pub status: i16,
    pub version: i32,
    pub created_by: Option<i64>,
    pub updated_by: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityRuleDetail {
    #[serde(flatten)]
    pub rule: QualityRule,
    pub versions: Vec<EntityVersion>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateQualityRuleRequest {
    #[validate(custom(function = "crate::models::not_blank", message = "编码不能为空"), length(max = 50, message = "编码最多50位"))]
    pub code: String,
    #[validate(custom(function = "crate::models::not_blank", message = "名称不能为空"), length(max = 100, message = "名称最多100位"))]
    pub name: String,
    pub description: Option<String>,
    pub rule_type: RuleType,
    #[validate(length(max = 100, message = "数据源最多100位"))]
    pub data_source: Option<String>,
    #[validate(length(max = 100, message = "表名最多100位"))]
    pub table_name: Option<String>,
    #[validate(length(max = 100, message = "字段名最多100位"))]
    pub field_name: Option<String>,
    pub rule_expression: Option<String>,
    #[serde(default)]
    pub severity: Severity,
    pub category_id: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateQualityRuleRequest {
    #[validate(custom(function = "crate::models::not_blank", message = "编码不能为空"), length(max = 50, message = "编码最多50位"))]
    pub code: Option<String>,
    #[validate(custom(function = "crate::models::not_blank", message = "名称不能为空"), length(max = 100, message = "名称最多100位"))]
    pub name: Option<String>,
    pub description: Option<String>,
    pub rule_type: Option<RuleType>,
    #[validate(length(max = 100, message = "数据源最多100位"))]
    pub data_source: Option<String>,
    #[validate(length(max = 100, message = "表名最多100位"))]
    pub table_name: Option<String>,
    #[validate(length(max = 100, message = "字段名最多100位"))]
    pub field_name: Option<String>,
    pub rule_expression: Option<String>,
    pub severity: Option<Severity>,
    pub category_id: Option<i64>,
    #[validate(range(min = 0, max = 1, message = "状态值无效"))]
    pub status: Option<i16>,
}

impl UpdateQualityRuleRequest {
    pub fn apply_to(&self, rule: &mut QualityRule) {
        if let Some(code) = &self.code {
            rule.code = code.clone();
        }
        if let Some(name) = &self.name {
            rule.name = name.clone();
        }
        if self.description.is_some() {
            rule.description = self.description.clone();
        }
        if let Some(rule_type) = self.rule_type {
            rule.rule_type = rule_type;
        }
        if self.data_source.is_some() {
            rule.data_source = self.data_source.clone();
        }
        if self.table_name.is_some() {
            rule.table_name = self.table_name.clone();
        }
        if self.field_name.is_some() {
            rule.field_name = self.field_name.clone();
        }
        if self.rule_expression.is_some() {
            rule.rule_expression = self.rule_expression.clone();
        }
        if let Some(severity) = self.severity {
            rule.severity = severity;
        }
        if self.category_id.is_some() {
            rule.category_id = self.category_id;
        }
        if let Some(status) = self.status {
            rule.status = status;
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct QualityRuleFilter {
    pub keyword: Option<String>,
    pub rule_type: Option<RuleType>,
    pub status: Option<i16>,
}

impl QualityRuleFilter {
    pub fn matches(&self, rule: &QualityRule) -> bool {
        self.keyword.as_deref().map_or(true, |k| {
            super::contains_keyword(&rule.code, k) || super::contains_keyword(&rule.name, k)
        }) && self.rule_type.map_or(true, |t| rule.rule_type == t)
            && self.status.map_or(true, |s| rule.status == s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_type_rejects_unknown_values() {
        let body = serde_json::json!({ "code": "QR1", "name": "非空", "ruleType": "freshness" });
        assert!(serde_json::from_value::<CreateQualityRuleRequest>(body).is_err());
    }

    #[test]
    fn test_severity_defaults_to_error() {
        let body = serde_json::json!({ "code": "QR1", "name": "非空", "ruleType": "completeness" });
        let request: CreateQualityRuleRequest = serde_json::from_value(body).unwrap();
        assert_eq!(request.severity, Severity::Error);
        assert_eq!(request.rule_type, RuleType::Completeness);
    }
}
