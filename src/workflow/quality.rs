//! Quality check execution

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use rand::Rng;
use tracing::{error, info};

use crate::error::{not_found_error, ApiResult};
use crate::models::*;
use crate::repository::QualityCheckRepository;

/// Record counts produced by evaluating a check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityCounts {
    pub total: i32,
    pub error: i32,
    pub warning: i32,
}

impl QualityCounts {
    /// 5% errors and 10% warnings, rounded down
    pub fn simulated(total: i32) -> Self {
        Self {
            total,
            error: total * 5 / 100,
            warning: total * 10 / 100,
        }
    }

    pub fn success(&self) -> i32 {
        self.total - self.error - self.warning
    }
}

#[async_trait]
pub trait QualityEvaluator: Send + Sync {
    async fn evaluate(&self, check: &QualityCheck) -> ApiResult<QualityCounts>;
}

/// Evaluator producing a random volume in `[1000, 11000)` with fixed ratios
pub struct SimulatedEvaluator;

#[async_trait]
impl QualityEvaluator for SimulatedEvaluator {
    async fn evaluate(&self, _check: &QualityCheck) -> ApiResult<QualityCounts> {
        let total = rand::thread_rng().gen_range(1000..11000);
        Ok(QualityCounts::simulated(total))
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn percentage(part: i32, total: i32) -> f64 {
    if total == 0 {
        return 0.0;
    }
    round2(part as f64 / total as f64 * 100.0)
}

/// Report values for `counts`, rates in percent with two decimals
pub fn build_report(counts: QualityCounts, duration_seconds: i32) -> NewQualityReport {
    let success = counts.success();
    NewQualityReport {
        total_records: counts.total,
        error_records: counts.error,
        warning_records: counts.warning,
        success_records: success,
        error_rate: percentage(counts.error, counts.total),
        warning_rate: percentage(counts.warning, counts.total),
        success_rate: percentage(success, counts.total),
        duration_seconds,
    }
}

pub struct QualityExecutor {
    checks: Arc<dyn QualityCheckRepository>,
    evaluator: Arc<dyn QualityEvaluator>,
}

impl QualityExecutor {
    pub fn new(checks: Arc<dyn QualityCheckRepository>, evaluator: Arc<dyn QualityEvaluator>) -> Self {
        Self { checks, evaluator }
    }

    /// Run a check once and return the persisted report
    pub async fn execute(&self, id: i64, actor: i64) -> ApiResult<QualityReport> {
        let check = self
            .checks
            .begin_check(id, actor)
            .await?
            .ok_or_else(|| not_found_error("质量检查不存在"))?;

        let started = Instant::now();
        let counts = match self.evaluator.evaluate(&check).await {
            Ok(counts) => counts,
            Err(e) => {
                error!("Quality check {} failed: {}", check.id, e);
                self.checks.fail_check(check.id, actor).await?;
                return Err(e);
            }
        };
        let report = build_report(counts, started.elapsed().as_secs() as i32);

        let saved = self.checks.finish_check(check.id, report, actor).await?;
        info!(
            "Quality check {} ({}) completed: {} records, error rate {}%",
            check.id, check.code, saved.total_records, saved.error_rate
        );
        Ok(saved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::repository::MemoryStore;
    use pretty_assertions::assert_eq;

    struct FixedEvaluator(i32);

    #[async_trait]
    impl QualityEvaluator for FixedEvaluator {
        async fn evaluate(&self, _check: &QualityCheck) -> ApiResult<QualityCounts> {
            Ok(QualityCounts::simulated(self.0))
        }
    }

    struct BrokenEvaluator;

    #[async_trait]
    impl QualityEvaluator for BrokenEvaluator {
        async fn evaluate(&self, _check: &QualityCheck) -> ApiResult<QualityCounts> {
            Err(AppError::Internal("rule engine offline".to_string()))
        }
    }

    async fn check(store: &MemoryStore) -> QualityCheck {
        let request: CreateQualityCheckRequest =
            serde_json::from_value(serde_json::json!({ "code": "QC1", "name": "客户表完整性" })).unwrap();
        store.create_quality_check(&request, 1).await.unwrap()
    }

    #[test]
    fn test_simulated_counts_round_down() {
        let counts = QualityCounts::simulated(1234);
        assert_eq!(counts.error, 61);
        assert_eq!(counts.warning, 123);
        assert_eq!(counts.success(), 1050);
    }

    #[test]
    fn test_rates_use_two_decimals() {
        let report = build_report(QualityCounts::simulated(1234), 0);
        assert_eq!(report.error_rate, 4.94);
        assert_eq!(report.warning_rate, 9.97);
        assert_eq!(report.success_rate, 85.09);

        let empty = build_report(QualityCounts::simulated(0), 0);
        assert_eq!(empty.success_rate, 0.0);
    }

    #[tokio::test]
    async fn test_simulated_volume_range() {
        let store = MemoryStore::new();
        let check = check(&store).await;
        for _ in 0..20 {
            let counts = SimulatedEvaluator.evaluate(&check).await.unwrap();
            assert!((1000..11000).contains(&counts.total));
        }
    }

    #[tokio::test]
    async fn test_execute_completes_check() {
        let store = Arc::new(MemoryStore::new());
        let check = check(&store).await;
        let executor = QualityExecutor::new(store.clone(), Arc::new(FixedEvaluator(2000)));

        let report = executor.execute(check.id, 1).await.unwrap();
        assert_eq!(report.total_records, 2000);
        assert_eq!(report.error_records, 100);
        assert_eq!(report.success_rate, 85.0);

        let check = store.find_quality_check(check.id).await.unwrap().unwrap();
        assert_eq!(check.status, CheckStatus::Completed);
        assert!(check.last_check_time.is_some());
    }

    #[tokio::test]
    async fn test_evaluator_failure_marks_check_failed() {
        let store = Arc::new(MemoryStore::new());
        let check = check(&store).await;
        let executor = QualityExecutor::new(store.clone(), Arc::new(BrokenEvaluator));

        assert!(executor.execute(check.id, 1).await.is_err());
        let check = store.find_quality_check(check.id).await.unwrap().unwrap();
        assert_eq!(check.status, CheckStatus::Failed);
        assert!(store.reports_of_check(check.id, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_check_is_not_found() {
        let executor = QualityExecutor::new(Arc::new(MemoryStore::new()), Arc::new(SimulatedEvaluator));
        let err = executor.execute(5, 1).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(ref m) if m == "质量检查不存在"));
    }
}
