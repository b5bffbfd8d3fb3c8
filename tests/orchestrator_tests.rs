//! End-to-end scenarios for the multi-wallet swap orchestrator. Each test
//! wires a scripted `DexClient` and an in-memory `WalletSource` together and
//! asserts against the resulting `RunReport`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;

use swap_orchestrator::{
    Config, DexClient, DexError, ErrorKind, Mode, Operation, Orchestrator, Quote, RunStatus,
    StaticWalletSource, Strategy, SwapRequest, SwapStatus, Token, Wallet,
};
use swap_orchestrator::dex_client::{ExecuteOptions, ExecuteOutcome};

/// Scripted `DexClient` used across scenarios. Quotes always succeed with a
/// fixed output ratio and price impact; execute behavior is controlled
/// per-key via `slippage_once_for` (one `SlippageExceeded` before success)
/// and an optional artificial delay to simulate "swap cost" for the
/// deadline-expiry scenario.
struct ScenarioDex {
    out_ratio_pct: u64,
    price_impact_bps: u32,
    slippage_once_for: Mutex<HashMap<String, bool>>,
    execute_delay_ms: u64,
}

impl ScenarioDex {
    fn new(out_ratio_pct: u64, price_impact_bps: u32) -> Self {
        Self {
            out_ratio_pct,
            price_impact_bps,
            slippage_once_for: Mutex::new(HashMap::new()),
            execute_delay_ms: 0,
        }
    }

    fn with_slippage_once(self, keys: &[&str]) -> Self {
        let mut map = self.slippage_once_for.lock().unwrap();
        for k in keys {
            map.insert(k.to_string(), true);
        }
        drop(map);
        self
    }

    fn with_execute_delay_ms(mut self, ms: u64) -> Self {
        self.execute_delay_ms = ms;
        self
    }
}

#[async_trait]
impl DexClient for ScenarioDex {
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
            out_amount: amount * self.out_ratio_pct / 100,
            route_id: "route-1".into(),
            price_impact_bps: self.price_impact_bps,
            fetched_at: Instant::now(),
        })
    }

    async fn execute(
        &self,
        priv_key: &str,
        quote: &Quote,
        _opts: ExecuteOptions,
        _max_retries: u32,
    ) -> Result<ExecuteOutcome, DexError> {
        if self.execute_delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.execute_delay_ms)).await;
        }

        let mut scripts = self.slippage_once_for.lock().unwrap();
        if let Some(pending) = scripts.get_mut(priv_key) {
            if *pending {
                *pending = false;
                return Err(DexError::SlippageExceeded("simulated".into()));
            }
        }
        drop(scripts);

        Ok(ExecuteOutcome {
            tx_id: format!("TX-{priv_key}"),
            output_amount: quote.out_amount,
            fee_amount: None,
        })
    }
}

fn wallets(n: u32) -> Vec<Wallet> {
    (0..n)
        .map(|i| Wallet { index: i, address: format!("addr{i}"), has_signing_key: true })
        .collect()
}

fn source_with(wallet_list: &[Wallet], balances: &[u64]) -> StaticWalletSource {
    let mut source = StaticWalletSource::new(wallet_list.to_vec());
    for (w, balance) in wallet_list.iter().zip(balances) {
        source = source
            .with_balance(w.address.clone(), "So111", *balance)
            .with_key(w.address.clone(), format!("key{}", w.index));
    }
    source
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn base_request(strategy: Strategy, mode: Mode) -> SwapRequest {
    SwapRequest {
        operation: Operation::Buy,
        input_token: Token::new("So111", 9),
        output_token: Token::new("Tok111", 6),
        strategy,
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

/// Scenario 1: fixed amounts, sequential dispatch, all three wallets succeed.
#[tokio::test]
async fn fixed_sequential_all_succeed() {
    init_tracing();
    let wallet_list = wallets(3);
    let source = source_with(&wallet_list, &[1_000_000_000, 1_000_000_000, 1_000_000_000]);
    let dex = ScenarioDex::new(96, 50);
    let orchestrator = Orchestrator::new(Config::default(), Arc::new(source), Arc::new(dex));

    let request = base_request(
        Strategy::Fixed { base: 100_000_000 },
        Mode::Sequential { delay_ms: 0 },
    );
    let report = orchestrator.run(request).await.unwrap();

    assert_eq!(report.execution_summary.status, RunStatus::Completed);
    assert_eq!(report.execution_summary.success, 3);
    assert_eq!(report.execution_summary.failed, 0);
    assert_eq!(report.execution_summary.skipped, 0);
    assert_eq!(report.volume_summary.input_volume, 300_000_000);
    assert_eq!(report.volume_summary.output_volume, 288_000_000);
    assert_eq!(report.volume_summary.average_price_impact_bps, Some(50.0));
}

/// Scenario 2: percentage amounts, parallel{2} dispatch, one wallet below
/// minimum is skipped before any remote call.
#[tokio::test]
async fn percentage_parallel_one_below_minimum() {
    init_tracing();
    let wallet_list = wallets(3);
    let source = source_with(&wallet_list, &[1_000_000_000, 0, 500_000_000]);
    let dex = ScenarioDex::new(100, 10);
    let orchestrator = Orchestrator::new(Config::default(), Arc::new(source), Arc::new(dex));

    let mut request = base_request(
        Strategy::Percentage { fraction: 0.5 },
        Mode::Parallel { max_concurrent: 2 },
    );
    request.minimum_input_amount = 10_000_000;
    let report = orchestrator.run(request).await.unwrap();

    assert_eq!(report.execution_summary.success, 2);
    assert_eq!(report.execution_summary.skipped, 1);
    assert_eq!(report.volume_summary.input_volume, 750_000_000);

    let skipped = report
        .swap_results
        .iter()
        .find(|r| r.status == SwapStatus::Skipped)
        .unwrap();
    assert_eq!(skipped.wallet_index, 1);
    assert!(skipped.tx_id.is_none());
    assert!(skipped.output_amount.is_none());
}

/// Scenario 3: random amounts, batch{2, 100ms} dispatch; two wallets hit a
/// transient slippage rejection and retry successfully.
#[tokio::test]
async fn random_batch_retries_slippage_then_succeeds() {
    init_tracing();
    let wallet_list = wallets(4);
    let source = source_with(&wallet_list, &[u64::MAX, u64::MAX, u64::MAX, u64::MAX]);
    let dex = ScenarioDex::new(100, 10).with_slippage_once(&["key0", "key1"]);
    let orchestrator = Orchestrator::new(Config::default(), Arc::new(source), Arc::new(dex));

    let mut request = base_request(
        Strategy::Random { min: 50_000_000, max: 250_000_000 },
        Mode::Batch { size: 2, delay_ms: 100 },
    );
    request.max_retries = 2;
    let report = orchestrator.run(request).await.unwrap();

    assert_eq!(report.execution_summary.status, RunStatus::Completed);
    assert_eq!(report.execution_summary.success, 4);
    for wallet_index in [0, 1] {
        let receipt = report.swap_results.iter().find(|r| r.wallet_index == wallet_index).unwrap();
        assert!(receipt.attempts >= 3, "wallet {wallet_index} should have re-quoted and retried");
    }
}

/// Scenario 4: a global deadline expires mid-run; later wallets are skipped
/// rather than attempted, and the report status reflects the cutoff.
#[tokio::test]
async fn deadline_expiry_skips_remaining_wallets() {
    init_tracing();
    let wallet_list = wallets(4);
    let source = source_with(&wallet_list, &[1_000_000_000, 1_000_000_000, 1_000_000_000, 1_000_000_000]);
    let dex = ScenarioDex::new(100, 10).with_execute_delay_ms(500);
    let orchestrator = Orchestrator::new(Config::default(), Arc::new(source), Arc::new(dex));

    let mut request = base_request(
        Strategy::Fixed { base: 100_000_000 },
        Mode::Sequential { delay_ms: 1_000 },
    );
    request.run_deadline_ms = Some(1_500);
    let report = orchestrator.run(request).await.unwrap();

    assert_eq!(report.execution_summary.status, RunStatus::DeadlineExpired);
    assert!(report.execution_summary.skipped >= 1, "at least one wallet should be cut off by the deadline");
    assert!(report.execution_summary.success >= 1, "at least the first wallet should have completed");
}

/// Scenario 5: a custom-amount list whose length does not match the
/// selected wallet set aborts before any execution begins.
#[tokio::test]
async fn custom_length_mismatch_is_aborted_config() {
    init_tracing();
    let wallet_list = wallets(3);
    let source = source_with(&wallet_list, &[1_000_000_000, 1_000_000_000, 1_000_000_000]);
    let dex = ScenarioDex::new(100, 10);
    let orchestrator = Orchestrator::new(Config::default(), Arc::new(source), Arc::new(dex));

    let request = base_request(
        Strategy::Custom { amounts: vec![100_000_000, 200_000_000] },
        Mode::Sequential { delay_ms: 0 },
    );
    let report = orchestrator.run(request).await.unwrap();

    assert_eq!(report.execution_summary.status, RunStatus::AbortedConfig);
    assert!(report.swap_results.is_empty());
    assert_eq!(report.error_classification.get(&ErrorKind::Config), Some(&1));
}

/// Scenario 6: execute reports success but the post-execute balance check
/// cannot confirm the credit; the receipt keeps the transaction id but is
/// terminally failed with `verification`.
#[tokio::test]
async fn verification_failure_after_successful_submission() {
    init_tracing();
    let wallet_list = wallets(1);
    // Balance never changes across the pre/post reads, so verification
    // cannot observe a credit even though execute "succeeded".
    let source = source_with(&wallet_list, &[1_000_000_000]);
    let dex = ScenarioDex::new(100, 10);
    let orchestrator = Orchestrator::new(Config::default(), Arc::new(source), Arc::new(dex));

    let mut request = base_request(
        Strategy::Fixed { base: 50_000_000 },
        Mode::Sequential { delay_ms: 0 },
    );
    request.verify = true;
    let report = orchestrator.run(request).await.unwrap();

    assert_eq!(report.swap_results.len(), 1);
    let receipt = &report.swap_results[0];
    assert_eq!(receipt.status, SwapStatus::Failed);
    assert_eq!(receipt.error_kind, Some(ErrorKind::Verification));
    assert!(receipt.tx_id.is_some());
    assert_eq!(report.volume_summary.output_volume, 0, "a failed receipt must not count toward output volume");
}

/// Report-closure invariant across a mixed run: every selected wallet
/// contributes exactly one receipt, and the three status counts add up to
/// the wallet count regardless of individual outcomes.
#[tokio::test]
async fn report_closure_holds_for_a_mixed_run() {
    init_tracing();
    let wallet_list = wallets(3);
    let source = source_with(&wallet_list, &[1_000_000_000, 0, 1_000_000_000]);
    let dex = ScenarioDex::new(100, 10);
    let orchestrator = Orchestrator::new(Config::default(), Arc::new(source), Arc::new(dex));

    let mut request = base_request(
        Strategy::Fixed { base: 50_000_000 },
        Mode::Parallel { max_concurrent: 3 },
    );
    request.minimum_input_amount = 1;
    let report = orchestrator.run(request).await.unwrap();

    assert_eq!(report.swap_results.len(), 3);
    let total = report.execution_summary.success + report.execution_summary.failed + report.execution_summary.skipped;
    assert_eq!(total, 3);
}
