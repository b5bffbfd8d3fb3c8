//! Core data model: tokens, wallets, the run-level swap request, and the
//! per-wallet records produced while driving it to completion.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

/// A token identified by its canonical mint, with an optional display alias.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub symbol: Option<String>,
    pub mint: String,
    pub decimals: u8,
}

impl Token {
    pub fn new(mint: impl Into<String>, decimals: u8) -> Self {
        Self {
            symbol: None,
            mint: mint.into(),
            decimals,
        }
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }
}

/// One wallet in the fleet. `index` is stable within a run and used as the
/// tie-breaker for ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    pub index: u32,
    pub address: String,
    pub has_signing_key: bool,
}

/// Purely semantic label; does not change planning or execution logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Buy,
    Sell,
}

/// Amount distribution strategy, selected once for the whole run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Strategy {
    Fixed { base: u64 },
    Percentage { fraction: f64 },
    Random { min: u64, max: u64 },
    Custom { amounts: Vec<u64> },
}

/// Scheduling discipline for dispatching wallet executions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Mode {
    Sequential { delay_ms: u64 },
    Parallel { max_concurrent: usize },
    Batch { size: usize, delay_ms: u64 },
}

/// Immutable, validated run-level request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapRequest {
    pub operation: Operation,
    pub input_token: Token,
    pub output_token: Token,
    pub strategy: Strategy,
    pub mode: Mode,
    pub slippage_bps: u16,
    pub verify: bool,
    pub max_retries: u32,
    pub retry_backoff_base_ms: u64,
    pub collect_fee: bool,
    pub minimum_input_amount: u64,
    pub run_deadline_ms: Option<u64>,
}

/// The planner's admission decision for one wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionVerdict {
    Ok,
    InsufficientBalance,
    BelowMinimum,
    Skip,
}

/// Per-wallet plan, created once per wallet per run and never mutated after
/// admission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletPlan {
    pub wallet: Wallet,
    pub input_amount: u64,
    pub verdict: AdmissionVerdict,
}

/// Short-lived route quote. May become stale before it is consumed.
#[derive(Debug, Clone)]
pub struct Quote {
    pub in_amount: u64,
    pub out_amount: u64,
    pub route_id: String,
    pub price_impact_bps: u32,
    pub fetched_at: Instant,
}

impl Quote {
    pub fn age(&self) -> std::time::Duration {
        self.fetched_at.elapsed()
    }
}

/// Terminal status of a single wallet's swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapStatus {
    Success,
    Failed,
    Skipped,
}

/// Terminal, immutable record of one wallet's run. Created exactly once per
/// admitted `WalletPlan`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapReceipt {
    pub wallet_index: u32,
    pub status: SwapStatus,
    pub input_amount: u64,
    pub output_amount: Option<u64>,
    #[serde(rename = "transaction_id")]
    pub tx_id: Option<String>,
    pub fee_amount: Option<u64>,
    pub price_impact_bps: Option<u32>,
    pub duration_ms: u64,
    pub attempts: u32,
    pub error_kind: Option<ErrorKind>,
    pub error_detail: Option<String>,
}

/// Tagged union over SwapRunner state transitions, totally ordered per
/// wallet by `seq`; unordered across wallets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub wallet_index: u32,
    pub seq: u64,
    pub at: DateTime<Utc>,
    pub kind: LifecycleEventKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEventKind {
    PlanAdmitted,
    QuoteStarted,
    QuoteReady {
        route_id: String,
        price_impact_bps: u32,
    },
    ExecuteStarted,
    ExecuteSubmitted {
        tx_id: String,
    },
    Verified,
    Failed {
        error_kind: ErrorKind,
        error_detail: String,
    },
    Skipped {
        reason: String,
    },
    RetryScheduled {
        attempt: u32,
        delay_ms: u64,
        reason: String,
    },
}
