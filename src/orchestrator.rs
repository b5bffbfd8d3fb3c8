//! Top-level entry point. Validates a `SwapRequest` against the wallet
//! fleet, snapshots balances, hands planning off to `AmountPlanner`, drives
//! `Scheduler`, and folds the result into a `RunReport`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::amount_planner::{AmountPlanner, PlanningError, WalletSnapshot};
use crate::config::Config;
use crate::dex_client::DexClient;
use crate::error::{ErrorKind, OrchestratorError};
use crate::progress_bus::ProgressBus;
use crate::report::{
    ConfigurationSnapshot, ExecutionSummary, RunMetadata, RunReport, RunStatus, VolumeSummary,
};
use crate::result_aggregator::ResultAggregator;
use crate::scheduler::{CancelSignal, Scheduler};
use crate::types::{AdmissionVerdict, Mode, Strategy, SwapRequest, Wallet};
use crate::wallet_source::WalletSource;

/// Process-wide monotonic counter. Opaque beyond "distinct and increasing
/// within this process": a run id only needs to be unique for the lifetime
/// of this process, not globally, so a UUID is unnecessary here.
static RUN_ID: AtomicU64 = AtomicU64::new(1);

pub struct Orchestrator {
    config: Config,
    wallet_source: Arc<dyn WalletSource>,
    dex: Arc<dyn DexClient>,
}

impl Orchestrator {
    pub fn new(config: Config, wallet_source: Arc<dyn WalletSource>, dex: Arc<dyn DexClient>) -> Self {
        Self { config, wallet_source, dex }
    }

    /// Runs `request` to completion, with no external cancellation handle
    /// beyond `request.run_deadline_ms`.
    pub async fn run(&self, request: SwapRequest) -> Result<RunReport, OrchestratorError> {
        let (_never_cancel_tx, never_cancel_rx) = watch::channel(false);
        self.run_cancellable(request, never_cancel_rx).await
    }

    /// Runs `request` to completion, treating `external_cancel` becoming
    /// `true` identically to `run_deadline_ms` expiry.
    pub async fn run_cancellable(
        &self,
        request: SwapRequest,
        mut external_cancel: watch::Receiver<bool>,
    ) -> Result<RunReport, OrchestratorError> {
        let run_id = RUN_ID.fetch_add(1, Ordering::SeqCst);
        let started_at = Utc::now();
        info!(run_id, "starting swap run");

        let wallets = self
            .wallet_source
            .list_wallets()
            .await
            .map_err(|e| OrchestratorError::Config(format!("failed to list wallets: {e}")))?;

        let mut request = request;
        if let Err(e) = self.resolve_token_mints(&mut request).await {
            return Ok(self.aborted_config_report(run_id, started_at, &request, wallets.len(), e.to_string()));
        }
        if let Err(e) = self.validate(&request, &wallets) {
            return Ok(self.aborted_config_report(run_id, started_at, &request, wallets.len(), e.to_string()));
        }

        let mut snapshots = Vec::with_capacity(wallets.len());
        for wallet in &wallets {
            let balance = self
                .wallet_source
                .balance(&wallet.address, &request.input_token.mint)
                .await
                .map_err(|e| OrchestratorError::Config(format!("failed to read balance for {}: {e}", wallet.address)))?;
            snapshots.push((wallet, balance));
        }
        let snapshot_refs: Vec<WalletSnapshot<'_>> = snapshots
            .iter()
            .map(|(wallet, available_balance)| WalletSnapshot { wallet, available_balance: *available_balance })
            .collect();

        let plans = match AmountPlanner::plan(&snapshot_refs, &request.strategy, request.minimum_input_amount, run_id) {
            Ok(plans) => plans,
            Err(e) => {
                return Ok(self.aborted_config_report(run_id, started_at, &request, wallets.len(), e.to_string()));
            }
        };

        if !plans.iter().any(|p| p.verdict == AdmissionVerdict::Ok) && *external_cancel.borrow() {
            return Err(OrchestratorError::CancelledBeforeAdmission);
        }

        let configuration = ConfigurationSnapshot {
            operation: request.operation,
            input_mint: request.input_token.mint.clone(),
            output_mint: request.output_token.mint.clone(),
            strategy: request.strategy.clone(),
            mode: request.mode,
            slippage_bps: request.slippage_bps,
            verify: request.verify,
            max_retries: request.max_retries,
            collect_fee: request.collect_fee,
            wallet_count: wallets.len(),
        };

        let (cancel, _internal_rx) = CancelSignal::new();
        let cancel_for_external = cancel.clone();
        tokio::spawn(async move {
            if external_cancel.changed().await.is_ok() && *external_cancel.borrow() {
                cancel_for_external.cancel();
            }
        });

        let (events_tx, mut events_rx) = ProgressBus::channel();
        let drain = tokio::spawn(async move {
            let mut events = Vec::new();
            while let Some(event) = events_rx.recv().await {
                events.push(event);
            }
            events
        });

        let scheduler = Scheduler::new(self.dex.clone(), self.wallet_source.clone(), self.config.clone());
        let request = Arc::new(request);
        let input_token = Arc::new(request.input_token.clone());
        let output_token = Arc::new(request.output_token.clone());

        let receipts = scheduler
            .run(plans, request, input_token, output_token, events_tx, cancel.clone())
            .await;

        let events = drain.await.unwrap_or_default();

        let status = if cancel.was_deadline_hit() {
            RunStatus::DeadlineExpired
        } else if cancel.is_cancelled() {
            RunStatus::Cancelled
        } else {
            RunStatus::Completed
        };

        if status != RunStatus::Completed {
            warn!(run_id, ?status, "run ended without completing every plan");
        }

        let mut aggregator = ResultAggregator::new();
        aggregator.record_events(events);
        aggregator.record_receipts(receipts);

        Ok(aggregator.finalize(run_id, started_at, configuration, status))
    }

    /// Builds the report returned when a pre-execution validation check
    /// fails: no plan is ever constructed, so `swap_results` stays empty and
    /// the whole run is classified under `error_kind=config`.
    fn aborted_config_report(
        &self,
        run_id: u64,
        started_at: DateTime<Utc>,
        request: &SwapRequest,
        wallet_count: usize,
        detail: String,
    ) -> RunReport {
        warn!(run_id, %detail, "run aborted before execution: configuration error");

        let configuration = ConfigurationSnapshot {
            operation: request.operation,
            input_mint: request.input_token.mint.clone(),
            output_mint: request.output_token.mint.clone(),
            strategy: request.strategy.clone(),
            mode: request.mode,
            slippage_bps: request.slippage_bps,
            verify: request.verify,
            max_retries: request.max_retries,
            collect_fee: request.collect_fee,
            wallet_count,
        };

        let ended_at = Utc::now();
        let duration_ms = (ended_at - started_at).num_milliseconds().max(0) as u64;
        let mut error_classification = HashMap::new();
        error_classification.insert(ErrorKind::Config, 1);

        RunReport {
            metadata: RunMetadata { run_id, started_at, ended_at },
            configuration,
            execution_summary: ExecutionSummary {
                status: RunStatus::AbortedConfig,
                success: 0,
                failed: 0,
                skipped: 0,
                duration_ms,
            },
            volume_summary: VolumeSummary {
                input_volume: 0,
                output_volume: 0,
                total_fees: 0,
                average_price_impact_bps: None,
            },
            error_classification,
            swap_results: Vec::new(),
        }
    }

    /// Resolves a token's mint from its symbol when the caller supplied only
    /// a symbol, via `DexClient::supported_tokens`. A token that already
    /// carries a mint is left untouched.
    async fn resolve_token_mints(&self, request: &mut SwapRequest) -> Result<(), OrchestratorError> {
        let needs_lookup = request.input_token.mint.is_empty() || request.output_token.mint.is_empty();
        if !needs_lookup {
            return Ok(());
        }

        let supported = self
            .dex
            .supported_tokens()
            .await
            .map_err(|e| OrchestratorError::Config(format!("failed to resolve token symbols: {e}")))?;

        for token in [&mut request.input_token, &mut request.output_token] {
            if token.mint.is_empty() {
                let symbol = token.symbol.clone().ok_or_else(|| {
                    OrchestratorError::Config("token has neither a mint nor a symbol to resolve".into())
                })?;
                let mint = supported
                    .get(&symbol)
                    .cloned()
                    .ok_or_else(|| OrchestratorError::Config(format!("unknown token symbol {symbol}")))?;
                token.mint = mint;
            }
        }

        Ok(())
    }

    fn validate(&self, request: &SwapRequest, wallets: &[Wallet]) -> Result<(), OrchestratorError> {
        if wallets.is_empty() {
            return Err(OrchestratorError::Config("no wallets selected".into()));
        }

        match &request.strategy {
            Strategy::Fixed { base } if *base == 0 => {
                return Err(OrchestratorError::Config("fixed strategy base amount must be > 0".into()));
            }
            Strategy::Percentage { fraction } if !(*fraction > 0.0 && *fraction <= 1.0) => {
                return Err(OrchestratorError::Config(format!(
                    "percentage strategy fraction {fraction} must be in (0, 1]"
                )));
            }
            Strategy::Random { min, max } if min > max => {
                return Err(OrchestratorError::Config(format!(
                    "random strategy min {min} must be <= max {max}"
                )));
            }
            Strategy::Custom { amounts } if amounts.len() != wallets.len() => {
                return Err(OrchestratorError::Config(format!(
                    "custom strategy has {} amount(s) but {} wallet(s) were selected",
                    amounts.len(),
                    wallets.len()
                )));
            }
            _ => {}
        }

        match &request.mode {
            Mode::Parallel { max_concurrent } if *max_concurrent == 0 => {
                return Err(OrchestratorError::Config("parallel mode max_concurrent must be > 0".into()));
            }
            Mode::Batch { size, .. } if *size == 0 => {
                return Err(OrchestratorError::Config("batch mode size must be > 0".into()));
            }
            _ => {}
        }

        if request.slippage_bps == 0 || request.slippage_bps > 10_000 {
            return Err(OrchestratorError::Config(format!(
                "slippage_bps {} out of range (0, 10000]",
                request.slippage_bps
            )));
        }

        if request.input_token.mint.is_empty() || request.output_token.mint.is_empty() {
            return Err(OrchestratorError::Config("input and output token mints must be resolved before a run starts".into()));
        }

        Ok(())
    }
}
