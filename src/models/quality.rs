//! Quality check runs and the reports they produce

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::text_enum;

text_enum! {
    pub enum CheckStatus {
        Pending => "pending",
        Running => "running",
        Completed => "completed",
        Failed => "failed",
    }
}

/// A configured run of a quality rule against a data element
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityCheck {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub quality_rule_id: Option<i64>,
    pub data_element_id: Option<i64>,
    pub check_type: Option<String>,
    pub status: CheckStatus,
    pub last_check_time: Option<DateTime<Utc>>,
    pub created_by: Option<i64>,
    pub updated_by: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityReport {
    pub id: i64,
    pub check_id: i64,
    pub check_time: DateTime<Utc>,
    pub total_records: i32,
    pub error_records: i32,
    pub warning_records: i32,
    pub success_records: i32,
    /// Percentages with two decimals
    pub error_rate: f64,
    pub warning_rate: f64,
    pub success_rate: f64,
    pub duration_seconds: i32,
    pub created_by: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Counts produced by an evaluator, before persistence
#[derive(Debug, Clone, PartialEq)]
pub struct NewQualityReport {
    pub total_records: i32,
    pub error_records: i32,
    pub warning_records: i32,
    pub success_records: i32,
    pub error_rate: f64,
    pub warning_rate: f64,
    pub success_rate: f64,
    pub duration_seconds: i32,
}

/// One day in the quality trend, oldest first
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityTrendPoint {
    /// `YYYY-MM-DD` of the report's check time
    pub date: String,
    pub total_records: i32,
    pub error_records: i32,
    pub warning_records: i32,
    pub success_records: i32,
    pub error_rate: f64,
    pub warning_rate: f64,
    pub success_rate: f64,
}

impl From<&QualityReport> for QualityTrendPoint {
    fn from(report: &QualityReport) -> Self {
        Self {
            date: report.check_time.format("%Y-%m-%d").to_string(),
            total_records: report.total_records,
            error_records: report.error_records,
            warning_records: report.warning_records,
            success_records: report.success_records,
            error_rate: report.error_rate,
            warning_rate: report.warning_rate,
            success_rate: report.success_rate,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityCheckDetail {
    #[serde(flatten)]
    pub check: QualityCheck,
    pub reports: Vec<QualityReport>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateQualityCheckRequest {
    #[validate(custom(function = "crate::models::not_blank", message = "编码不能为空"), length(max = 50, message = "编码最多50位"))]
    pub code: String,
    #[validate(custom(function = "crate::models::not_blank", message = "名称不能为空"), length(max = 100, message = "名称最多100位"))]
    pub name: String,
    pub description: Option<String>,
    pub quality_rule_id: Option<i64>,
    pub data_element_id: Option<i64>,
    #[validate(length(max = 50, message = "检查类型最多50位"))]
    pub check_type: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct QualityCheckFilter {
    pub keyword: Option<String>,
    pub status: Option<CheckStatus>,
}

impl QualityCheckFilter {
    pub fn matches(&self, check: &QualityCheck) -> bool {
        self.keyword.as_deref().map_or(true, |k| {
            super::contains_keyword(&check.code, k) || super::contains_keyword(&check.name, k)
        }) && self.status.map_or(true, |s| check.status == s)
    }
}

#[derive(Debug, Clone, Default)]
pub struct QualityReportFilter {
    pub check_id: Option<i64>,
}
