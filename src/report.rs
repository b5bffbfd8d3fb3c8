//! Canonical JSON document produced by [`crate::orchestrator::Orchestrator`].
//! Any CSV/YAML/HTML rendering is a value-preserving projection of this
//! shape; this module owns only the shape, not the projections.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::types::{Mode, Operation, Strategy, SwapReceipt};

/// How the run ended. Carried on [`ExecutionSummary::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    DeadlineExpired,
    Cancelled,
    AbortedConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_id: u64,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

/// Echo of the validated request that produced this report, for auditability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigurationSnapshot {
    pub operation: Operation,
    pub input_mint: String,
    pub output_mint: String,
    pub strategy: Strategy,
    pub mode: Mode,
    pub slippage_bps: u16,
    pub verify: bool,
    pub max_retries: u32,
    pub collect_fee: bool,
    pub wallet_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub status: RunStatus,
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration_ms: u64,
}

/// Volume and price-impact figures computed over `success` receipts only,
/// per the result-aggregation invariants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeSummary {
    pub input_volume: u64,
    pub output_volume: u64,
    pub total_fees: u64,
    pub average_price_impact_bps: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub metadata: RunMetadata,
    pub configuration: ConfigurationSnapshot,
    pub execution_summary: ExecutionSummary,
    pub volume_summary: VolumeSummary,
    pub swap_results: Vec<SwapReceipt>,
    pub error_classification: std::collections::HashMap<ErrorKind, usize>,
}
