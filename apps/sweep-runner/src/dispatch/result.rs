//! Dispatch results and the batch report.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::error::ErrorKind;
use super::sanitize::KpiRow;
use crate::sweep::{GeneratedConfiguration, ParamMap};

/// Final status of one configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStatus {
    /// Backtest ran and returned results.
    Success,
    /// Retries exhausted or the endpoint reported a logical failure.
    Failed,
    /// Batch cancelled before or during this configuration.
    Cancelled,
}

impl DispatchStatus {
    /// Column value.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Outcome of one configuration, created once after its last attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchResult {
    /// Batch index of the configuration.
    pub index: usize,
    /// Configuration label.
    pub label: String,
    /// Source sweep name.
    pub sweep: String,
    /// Final status.
    pub status: DispatchStatus,
    /// Failure classification.
    pub error_kind: Option<ErrorKind>,
    /// Last captured error message.
    pub error: Option<String>,
    /// Informational note, e.g. `no trades`.
    pub note: Option<String>,
    /// Requests issued.
    pub attempts: u32,
    /// Wall time spent on this configuration.
    pub elapsed_ms: u64,
    /// KPIs (empty unless successful).
    pub kpis: KpiRow,
    /// Varied parameters of the configuration.
    pub sweep_params: ParamMap,
    /// Detail packet path, when one was written.
    pub detail_path: Option<PathBuf>,
}

impl DispatchResult {
    /// Result for a configuration that was never attempted.
    #[must_use]
    pub fn not_attempted(configuration: &GeneratedConfiguration) -> Self {
        Self {
            index: configuration.index,
            label: configuration.label.clone(),
            sweep: configuration.sweep.clone(),
            status: DispatchStatus::Cancelled,
            error_kind: Some(ErrorKind::Cancelled),
            error: Some("cancelled before dispatch".to_string()),
            note: None,
            attempts: 0,
            elapsed_ms: 0,
            kpis: KpiRow::empty(),
            sweep_params: configuration.sweep_params.clone(),
            detail_path: None,
        }
    }

    /// Whether the backtest succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == DispatchStatus::Success
    }
}

/// Result of a whole batch, in input order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    /// Run identifier.
    pub run_id: String,
    /// One result per configuration, sorted by index.
    pub results: Vec<DispatchResult>,
    /// Total execution time in milliseconds.
    pub total_time_ms: u64,
    /// Whether the batch was cancelled.
    pub cancelled: bool,
}

impl BatchReport {
    fn count(&self, status: DispatchStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    /// Successful configurations.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.count(DispatchStatus::Success)
    }

    /// Failed configurations.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(DispatchStatus::Failed)
    }

    /// Cancelled configurations.
    #[must_use]
    pub fn cancelled_count(&self) -> usize {
        self.count(DispatchStatus::Cancelled)
    }

    /// Get the success rate over all configurations.
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.results.is_empty() {
            0.0
        } else {
            self.succeeded() as f64 / self.results.len() as f64
        }
    }

    /// Get successful results only.
    #[must_use]
    pub fn successful_results(&self) -> Vec<&DispatchResult> {
        self.results.iter().filter(|r| r.is_success()).collect()
    }

    /// Get failed results only.
    #[must_use]
    pub fn failed_results(&self) -> Vec<&DispatchResult> {
        self.results
            .iter()
            .filter(|r| r.status == DispatchStatus::Failed)
            .collect()
    }

    /// Get the best successful result by net PnL.
    #[must_use]
    pub fn best_by_net_pnl(&self) -> Option<&DispatchResult> {
        self.results
            .iter()
            .filter_map(|r| {
                r.kpis
                    .get("net_pnl")
                    .filter(|_| r.is_success())
                    .map(|pnl| (r, pnl))
            })
            .max_by(|(_, a), (_, b)| a.total_cmp(b))
            .map(|(r, _)| r)
    }
}
