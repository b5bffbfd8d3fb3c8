//! Folds terminal `SwapReceipt`s (and the `LifecycleEvent`s that produced
//! them) into a `RunReport`. Single-consumer, no locking: grounded on the
//! rolling-accumulator style of a volume tracker that keeps running sums
//! instead of re-scanning history on every read.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::error::ErrorKind;
use crate::report::{ConfigurationSnapshot, ExecutionSummary, RunStatus, VolumeSummary};
use crate::types::{LifecycleEvent, SwapReceipt, SwapStatus};

/// Accumulates receipts (and, optionally, a full lifecycle log) for one run.
/// Every admitted wallet contributes exactly one receipt; the aggregator
/// does not itself enforce that invariant, since that is a property of how
/// `Scheduler` drives `SwapRunner`. This struct only folds whatever it is
/// given.
#[derive(Default)]
pub struct ResultAggregator {
    receipts: Vec<SwapReceipt>,
    events: Vec<LifecycleEvent>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_event(&mut self, event: LifecycleEvent) {
        self.events.push(event);
    }

    pub fn record_events(&mut self, events: impl IntoIterator<Item = LifecycleEvent>) {
        self.events.extend(events);
    }

    pub fn record_receipt(&mut self, receipt: SwapReceipt) {
        self.receipts.push(receipt);
    }

    pub fn record_receipts(&mut self, receipts: impl IntoIterator<Item = SwapReceipt>) {
        self.receipts.extend(receipts);
    }

    pub fn events(&self) -> &[LifecycleEvent] {
        &self.events
    }

    pub fn receipts(&self) -> &[SwapReceipt] {
        &self.receipts
    }

    fn counts(&self) -> (usize, usize, usize) {
        let success = self.receipts.iter().filter(|r| r.status == SwapStatus::Success).count();
        let failed = self.receipts.iter().filter(|r| r.status == SwapStatus::Failed).count();
        let skipped = self.receipts.iter().filter(|r| r.status == SwapStatus::Skipped).count();
        (success, failed, skipped)
    }

    fn volume_summary(&self) -> VolumeSummary {
        let successes: Vec<&SwapReceipt> =
            self.receipts.iter().filter(|r| r.status == SwapStatus::Success).collect();

        let input_volume: u64 = successes.iter().map(|r| r.input_amount).sum();
        let output_volume: u64 = successes.iter().map(|r| r.output_amount.unwrap_or(0)).sum();
        let total_fees: u64 = successes.iter().filter_map(|r| r.fee_amount).sum();

        let average_price_impact_bps = if input_volume == 0 {
            None
        } else {
            let weighted: u128 = successes
                .iter()
                .map(|r| (r.input_amount as u128) * (r.price_impact_bps.unwrap_or(0) as u128))
                .sum();
            Some(weighted as f64 / input_volume as f64)
        };

        VolumeSummary {
            input_volume,
            output_volume,
            total_fees,
            average_price_impact_bps,
        }
    }

    fn error_classification(&self) -> HashMap<ErrorKind, usize> {
        let mut map = HashMap::new();
        for receipt in &self.receipts {
            if receipt.status == SwapStatus::Failed {
                if let Some(kind) = receipt.error_kind {
                    *map.entry(kind).or_insert(0) += 1;
                }
            }
        }
        map
    }

    /// Closes the run into a `RunReport`. `configuration` and `status` are
    /// supplied by the orchestrator, which is the only component that knows
    /// the original request and why the run ended.
    pub fn finalize(
        self,
        run_id: u64,
        started_at: DateTime<Utc>,
        configuration: ConfigurationSnapshot,
        status: RunStatus,
    ) -> crate::report::RunReport {
        let ended_at = Utc::now();
        let (success, failed, skipped) = self.counts();
        let duration_ms = (ended_at - started_at).num_milliseconds().max(0) as u64;

        crate::report::RunReport {
            metadata: crate::report::RunMetadata { run_id, started_at, ended_at },
            configuration,
            execution_summary: ExecutionSummary { status, success, failed, skipped, duration_ms },
            volume_summary: self.volume_summary(),
            error_classification: self.error_classification(),
            swap_results: self.receipts,
        }
    }
}
