//! Dispatches `SwapRunner` invocations under one of three concurrency
//! disciplines, honoring a run-scoped cancellation signal and an optional
//! global deadline. Plans are always processed in ascending wallet index;
//! event ordering across wallets is not guaranteed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::config::Config;
use crate::dex_client::DexClient;
use crate::progress_bus::ProgressSender;
use crate::swap_runner::SwapRunner;
use crate::types::{Mode, SwapReceipt, SwapRequest, Token, WalletPlan};
use crate::wallet_source::WalletSource;

/// Run-scoped cancellation signal. Cloned into every spawned task; flips
/// once, either because the caller asked for external cancellation or
/// because `run_deadline_ms` expired. `deadline_hit` distinguishes the two
/// causes after the fact, for `Orchestrator`'s exit-status reporting.
#[derive(Clone)]
pub struct CancelSignal {
    tx: watch::Sender<bool>,
    deadline_hit: Arc<AtomicBool>,
}

impl CancelSignal {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { tx, deadline_hit: Arc::new(AtomicBool::new(false)) }, rx)
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    fn mark_deadline_hit(&self) {
        self.deadline_hit.store(true, Ordering::SeqCst);
        self.cancel();
    }

    pub fn was_deadline_hit(&self) -> bool {
        self.deadline_hit.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

pub struct Scheduler {
    dex: Arc<dyn DexClient>,
    wallet_source: Arc<dyn WalletSource>,
    config: Config,
}

impl Scheduler {
    pub fn new(dex: Arc<dyn DexClient>, wallet_source: Arc<dyn WalletSource>, config: Config) -> Self {
        Self { dex, wallet_source, config }
    }

    /// Runs every plan to a terminal `SwapReceipt`, in wallet-index order,
    /// under `request.mode`'s concurrency discipline. Returns once every
    /// spawned runner has reached a terminal state.
    pub async fn run(
        &self,
        mut plans: Vec<WalletPlan>,
        request: Arc<SwapRequest>,
        input_token: Arc<Token>,
        output_token: Arc<Token>,
        events: ProgressSender,
        cancel: CancelSignal,
    ) -> Vec<SwapReceipt> {
        plans.sort_by_key(|p| p.wallet.index);

        if let Some(deadline_ms) = request.run_deadline_ms {
            let cancel_for_deadline = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(deadline_ms)).await;
                if !cancel_for_deadline.is_cancelled() {
                    info!("run deadline of {deadline_ms}ms expired, cancelling remaining plans");
                    cancel_for_deadline.mark_deadline_hit();
                }
            });
        }

        match request.mode {
            Mode::Sequential { delay_ms } => {
                self.run_sequential(plans, request, input_token, output_token, events, cancel, delay_ms)
                    .await
            }
            Mode::Parallel { max_concurrent } => {
                self.run_parallel(
                    plans,
                    request,
                    input_token,
                    output_token,
                    events,
                    cancel,
                    max_concurrent.max(1),
                )
                .await
            }
            Mode::Batch { size, delay_ms } => {
                self.run_batched(
                    plans,
                    request,
                    input_token,
                    output_token,
                    events,
                    cancel,
                    size.max(1),
                    delay_ms,
                )
                .await
            }
        }
    }

    async fn run_one(
        &self,
        plan: WalletPlan,
        request: Arc<SwapRequest>,
        input_token: Arc<Token>,
        output_token: Arc<Token>,
        events: ProgressSender,
        cancel_rx: watch::Receiver<bool>,
    ) -> SwapReceipt {
        let mut runner = SwapRunner::new(self.dex.clone(), self.wallet_source.clone(), &self.config);
        runner
            .run(&plan, &request, &input_token, &output_token, cancel_rx, events)
            .await
    }

    async fn run_sequential(
        &self,
        plans: Vec<WalletPlan>,
        request: Arc<SwapRequest>,
        input_token: Arc<Token>,
        output_token: Arc<Token>,
        events: ProgressSender,
        cancel: CancelSignal,
        delay_ms: u64,
    ) -> Vec<SwapReceipt> {
        let mut receipts = Vec::with_capacity(plans.len());
        let mut iter = plans.into_iter().peekable();

        while let Some(plan) = iter.next() {
            if cancel.is_cancelled() {
                debug!("sequential scheduler stopping admission after cancellation");
                break;
            }
            let receipt = self
                .run_one(plan, request.clone(), input_token.clone(), output_token.clone(), events.clone(), cancel.subscribe())
                .await;
            receipts.push(receipt);

            if iter.peek().is_some() && delay_ms > 0 && !cancel.is_cancelled() {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
        }

        receipts
    }

    async fn run_parallel(
        &self,
        plans: Vec<WalletPlan>,
        request: Arc<SwapRequest>,
        input_token: Arc<Token>,
        output_token: Arc<Token>,
        events: ProgressSender,
        cancel: CancelSignal,
        max_concurrent: usize,
    ) -> Vec<SwapReceipt> {
        let semaphore = Arc::new(Semaphore::new(max_concurrent));
        let mut joins = JoinSet::new();

        for plan in plans {
            if cancel.is_cancelled() {
                debug!("parallel scheduler stopping admission after cancellation");
                break;
            }

            let permit_holder = semaphore.clone();
            let dex = self.dex.clone();
            let wallet_source = self.wallet_source.clone();
            let config = self.config.clone();
            let request = request.clone();
            let input_token = input_token.clone();
            let output_token = output_token.clone();
            let events = events.clone();
            let cancel_rx = cancel.subscribe();

            joins.spawn(async move {
                let _permit = permit_holder.acquire_owned().await.expect("semaphore not closed");
                let mut runner = SwapRunner::new(dex, wallet_source, &config);
                runner.run(&plan, &request, &input_token, &output_token, cancel_rx, events).await
            });
        }

        let mut receipts = Vec::new();
        while let Some(result) = joins.join_next().await {
            if let Ok(receipt) = result {
                receipts.push(receipt);
            }
        }
        receipts.sort_by_key(|r| r.wallet_index);
        receipts
    }

    async fn run_batched(
        &self,
        plans: Vec<WalletPlan>,
        request: Arc<SwapRequest>,
        input_token: Arc<Token>,
        output_token: Arc<Token>,
        events: ProgressSender,
        cancel: CancelSignal,
        size: usize,
        delay_ms: u64,
    ) -> Vec<SwapReceipt> {
        let mut receipts = Vec::with_capacity(plans.len());
        let chunks: Vec<Vec<WalletPlan>> = plans
            .chunks(size)
            .map(|c| c.to_vec())
            .collect();
        let mut chunk_iter = chunks.into_iter().peekable();

        while let Some(batch) = chunk_iter.next() {
            if cancel.is_cancelled() {
                debug!("batch scheduler stopping admission after cancellation");
                break;
            }

            let mut joins = JoinSet::new();
            for plan in batch {
                let dex = self.dex.clone();
                let wallet_source = self.wallet_source.clone();
                let config = self.config.clone();
                let request = request.clone();
                let input_token = input_token.clone();
                let output_token = output_token.clone();
                let events = events.clone();
                let cancel_rx = cancel.subscribe();

                joins.spawn(async move {
                    let mut runner = SwapRunner::new(dex, wallet_source, &config);
                    runner.run(&plan, &request, &input_token, &output_token, cancel_rx, events).await
                });
            }

            while let Some(result) = joins.join_next().await {
                if let Ok(receipt) = result {
                    receipts.push(receipt);
                }
            }

            if chunk_iter.peek().is_some() && delay_ms > 0 && !cancel.is_cancelled() {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
        }

        receipts.sort_by_key(|r| r.wallet_index);
        receipts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex_client::ExecuteOutcome;
    use crate::error::DexError;
    use crate::progress_bus::ProgressBus;
    use crate::types::{AdmissionVerdict, Operation, Quote, Strategy, Wallet};
    use crate::wallet_source::StaticWalletSource;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    struct CountingDex {
        in_flight: Arc<AtomicUsize>,
        max_observed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl DexClient for CountingDex {
        async fn supported_tokens(&self) -> Result<HashMap<String, String>, DexError> {
            Ok(HashMap::new())
        }

        async fn quote(
            &self,
            _input_mint: &str,
            _output_mint: &str,
            amount: u64,
            _slippage_bps: u16,
            _direct_only: bool,
            _max_retries: u32,
        ) -> Result<Quote, DexError> {
            Ok(Quote {
                in_amount: amount,
                out_amount: amount,
                route_id: "r".into(),
                price_impact_bps: 0,
                fetched_at: Instant::now(),
            })
        }

        async fn execute(
            &self,
            _priv_key: &str,
            quote: &Quote,
            _opts: crate::dex_client::ExecuteOptions,
            _max_retries: u32,
        ) -> Result<ExecuteOutcome, DexError> {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_observed.fetch_max(current, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(ExecuteOutcome { tx_id: "TX".into(), output_amount: quote.out_amount, fee_amount: None })
        }
    }

    fn wallet_plans(n: u32) -> Vec<WalletPlan> {
        (0..n)
            .map(|i| WalletPlan {
                wallet: Wallet { index: i, address: format!("addr{i}"), has_signing_key: true },
                input_amount: 1_000,
                verdict: AdmissionVerdict::Ok,
            })
            .collect()
    }

    fn base_request(mode: Mode) -> SwapRequest {
        SwapRequest {
            operation: Operation::Buy,
            input_token: Token::new("in", 9),
            output_token: Token::new("out", 6),
            strategy: Strategy::Fixed { base: 1_000 },
            mode,
            slippage_bps: 50,
            verify: false,
            max_retries: 0,
            retry_backoff_base_ms: 1,
            collect_fee: false,
            minimum_input_amount: 0,
            run_deadline_ms: None,
        }
    }

    #[tokio::test]
    async fn parallel_never_exceeds_concurrency_bound() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_observed = Arc::new(AtomicUsize::new(0));
        let dex = Arc::new(CountingDex { in_flight: in_flight.clone(), max_observed: max_observed.clone() });
        let wallet_source = Arc::new(StaticWalletSource::new(vec![]).with_key("addr0", "k").with_key("addr1", "k").with_key("addr2", "k").with_key("addr3", "k"));
        let scheduler = Scheduler::new(dex, wallet_source, Config::default());

        let request = Arc::new(base_request(Mode::Parallel { max_concurrent: 2 }));
        let (events_tx, _rx) = ProgressBus::channel();
        let (cancel, _rx2) = CancelSignal::new();

        let receipts = scheduler
            .run(
                wallet_plans(4),
                request,
                Arc::new(Token::new("in", 9)),
                Arc::new(Token::new("out", 6)),
                events_tx,
                cancel,
            )
            .await;

        assert_eq!(receipts.len(), 4);
        assert!(max_observed.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn sequential_preserves_index_order_completion() {
        let dex = Arc::new(CountingDex {
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_observed: Arc::new(AtomicUsize::new(0)),
        });
        let wallet_source = Arc::new(
            StaticWalletSource::new(vec![])
                .with_key("addr0", "k")
                .with_key("addr1", "k")
                .with_key("addr2", "k"),
        );
        let scheduler = Scheduler::new(dex, wallet_source, Config::default());
        let request = Arc::new(base_request(Mode::Sequential { delay_ms: 0 }));
        let (events_tx, _rx) = ProgressBus::channel();
        let (cancel, _rx2) = CancelSignal::new();

        let receipts = scheduler
            .run(
                wallet_plans(3),
                request,
                Arc::new(Token::new("in", 9)),
                Arc::new(Token::new("out", 6)),
                events_tx,
                cancel,
            )
            .await;

        let indices: Vec<u32> = receipts.iter().map(|r| r.wallet_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }
}
