//! Drives a single wallet's swap through `Planned -> Quoted -> Executed ->
//! (Verified | Failed)`, plus the terminal `Skipped` state, publishing a
//! `LifecycleEvent` on every transition and owning retry policy for
//! transport/business errors that the DEX client classifies as retryable.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::watch;
use tracing::warn;

use crate::config::{Config, FEE_RATIO};
use crate::dex_client::{DexClient, ExecuteOptions};
use crate::error::ErrorKind;
use crate::progress_bus::ProgressSender;
use crate::types::{
    AdmissionVerdict, LifecycleEvent, LifecycleEventKind, Quote, SwapReceipt, SwapRequest,
    SwapStatus, Token, WalletPlan,
};
use crate::wallet_source::WalletSource;

/// Per-wallet sequence counter plus the clock used for attempt bookkeeping.
/// Owns the in-flight quote/receipt-in-progress exclusively; no state here
/// is shared with any other `SwapRunner`.
pub struct SwapRunner {
    dex: Arc<dyn DexClient>,
    wallet_source: Arc<dyn WalletSource>,
    quote_staleness: Duration,
    seq: u64,
}

impl SwapRunner {
    pub fn new(dex: Arc<dyn DexClient>, wallet_source: Arc<dyn WalletSource>, config: &Config) -> Self {
        Self {
            dex,
            wallet_source,
            quote_staleness: config.quote_staleness,
            seq: 0,
        }
    }

    fn emit(&mut self, tx: &ProgressSender, wallet_index: u32, kind: LifecycleEventKind) {
        let event = LifecycleEvent {
            wallet_index,
            seq: self.seq,
            at: Utc::now(),
            kind,
        };
        self.seq += 1;
        // A full channel means the renderer is behind; runners never block
        // on it (see progress_bus docs) so a terminal/retry event is still
        // delivered via `try_send`'s blocking variant when there is room,
        // and otherwise the bounded buffer's own backpressure is on the
        // producer side intentionally small enough that this should not
        // happen under normal operation. We still must not drop terminal
        // events, so fall back to a blocking send off the hot path.
        if let Err(e) = tx.try_send(event) {
            match e {
                tokio::sync::mpsc::error::TrySendError::Full(event) => {
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        let _ = tx.send(event).await;
                    });
                }
                tokio::sync::mpsc::error::TrySendError::Closed(_) => {}
            }
        }
    }

    fn is_cancelled(cancel: &watch::Receiver<bool>) -> bool {
        *cancel.borrow()
    }

    /// Runs `plan` to completion: either a terminal `SwapReceipt` is
    /// produced, or the run is cancelled before any remote call was made.
    pub async fn run(
        &mut self,
        plan: &WalletPlan,
        request: &SwapRequest,
        input_token: &Token,
        output_token: &Token,
        mut cancel: watch::Receiver<bool>,
        events: ProgressSender,
    ) -> SwapReceipt {
        let start = Instant::now();
        let wallet_index = plan.wallet.index;

        if plan.verdict != AdmissionVerdict::Ok {
            self.emit(
                &events,
                wallet_index,
                LifecycleEventKind::Skipped {
                    reason: format!("{:?}", plan.verdict),
                },
            );
            return SwapReceipt {
                wallet_index,
                status: SwapStatus::Skipped,
                input_amount: plan.input_amount,
                output_amount: None,
                tx_id: None,
                fee_amount: None,
                price_impact_bps: None,
                duration_ms: start.elapsed().as_millis() as u64,
                attempts: 0,
                error_kind: None,
                error_detail: None,
            };
        }

        if Self::is_cancelled(&cancel) {
            self.emit(
                &events,
                wallet_index,
                LifecycleEventKind::Skipped { reason: "cancelled".into() },
            );
            return self.skipped_receipt(plan, start, 0);
        }

        self.emit(&events, wallet_index, LifecycleEventKind::PlanAdmitted);

        // `quote`/`execute` calls below already retry transport/rate-limit
        // failures internally inside the DexClient; the counters here track
        // logical attempts (a whole quote or execute call, however many
        // transport retries it took), which is what `max_retries` bounds at
        // this layer.
        let max_attempts = request.max_retries + 1;
        let mut quote_attempts = 0u32;
        let mut execute_attempts = 0u32;
        let mut quote: Option<Quote> = None;

        loop {
            if cancel.has_changed().unwrap_or(false) {
                let _ = cancel.borrow_and_update();
            }
            if Self::is_cancelled(&cancel) && quote.is_none() {
                self.emit(
                    &events,
                    wallet_index,
                    LifecycleEventKind::Skipped { reason: "cancelled".into() },
                );
                return self.skipped_receipt(plan, start, quote_attempts + execute_attempts);
            }

            let needs_quote = match &quote {
                None => true,
                Some(q) => q.age() > self.quote_staleness,
            };

            if needs_quote {
                self.emit(&events, wallet_index, LifecycleEventKind::QuoteStarted);
                quote_attempts += 1;

                match self
                    .dex
                    .quote(
                        &input_token.mint,
                        &output_token.mint,
                        plan.input_amount,
                        request.slippage_bps,
                        false,
                        request.max_retries,
                    )
                    .await
                {
                    Ok(q) => {
                        self.emit(
                            &events,
                            wallet_index,
                            LifecycleEventKind::QuoteReady {
                                route_id: q.route_id.clone(),
                                price_impact_bps: q.price_impact_bps,
                            },
                        );
                        quote = Some(q);
                    }
                    Err(e) => {
                        let kind = e.kind();
                        if kind.is_retryable() && quote_attempts < max_attempts {
                            let delay = self.backoff_delay(request, quote_attempts);
                            self.emit(
                                &events,
                                wallet_index,
                                LifecycleEventKind::RetryScheduled {
                                    attempt: quote_attempts,
                                    delay_ms: delay.as_millis() as u64,
                                    reason: e.to_string(),
                                },
                            );
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                        return self.failed_receipt(
                            plan,
                            start,
                            quote_attempts + execute_attempts,
                            kind,
                            e.to_string(),
                            &events,
                        );
                    }
                }
                continue;
            }

            if Self::is_cancelled(&cancel) {
                self.emit(
                    &events,
                    wallet_index,
                    LifecycleEventKind::Skipped { reason: "cancelled before submit".into() },
                );
                return self.skipped_receipt(plan, start, quote_attempts + execute_attempts);
            }

            let current_quote = quote.clone().expect("quote populated above");
            self.emit(&events, wallet_index, LifecycleEventKind::ExecuteStarted);
            execute_attempts += 1;

            let pre_output_balance = if request.verify {
                self.wallet_source
                    .balance(&plan.wallet.address, &output_token.mint)
                    .await
                    .unwrap_or(0)
            } else {
                0
            };

            let priv_key = match self.wallet_source.private_key_for(&plan.wallet.address).await {
                Ok(k) => k,
                Err(e) => {
                    return self.failed_receipt(
                        plan,
                        start,
                        quote_attempts + execute_attempts,
                        ErrorKind::Auth,
                        e.to_string(),
                        &events,
                    );
                }
            };

            let opts = ExecuteOptions {
                wrap_unwrap_sol: true,
                collect_fee: request.collect_fee,
                verify: request.verify,
            };

            match self
                .dex
                .execute(&priv_key, &current_quote, opts, request.max_retries)
                .await
            {
                Ok(outcome) => {
                    self.emit(
                        &events,
                        wallet_index,
                        LifecycleEventKind::ExecuteSubmitted { tx_id: outcome.tx_id.clone() },
                    );

                    let verified = if !request.verify {
                        true
                    } else {
                        let post_output_balance = self
                            .wallet_source
                            .balance(&plan.wallet.address, &output_token.mint)
                            .await
                            .unwrap_or(pre_output_balance);
                        post_output_balance > pre_output_balance
                    };

                    let fee_amount = if request.collect_fee {
                        outcome
                            .fee_amount
                            .or_else(|| Some(((current_quote.in_amount as f64) * FEE_RATIO) as u64))
                    } else {
                        None
                    };

                    if verified {
                        self.emit(&events, wallet_index, LifecycleEventKind::Verified);
                        return SwapReceipt {
                            wallet_index,
                            status: SwapStatus::Success,
                            input_amount: plan.input_amount,
                            output_amount: Some(outcome.output_amount),
                            tx_id: Some(outcome.tx_id),
                            fee_amount,
                            price_impact_bps: Some(current_quote.price_impact_bps),
                            duration_ms: start.elapsed().as_millis() as u64,
                            attempts: quote_attempts + execute_attempts,
                            error_kind: None,
                            error_detail: None,
                        };
                    }

                    // The swap was submitted (and may well have landed
                    // on-chain) even though verification could not confirm
                    // the credit, so the transaction id and reported output
                    // amount are kept on the receipt unlike a plain failed
                    // attempt, which never got this far.
                    let detail = "post-execute check could not confirm credit".to_string();
                    warn!(wallet_index, "verification failed after successful submission");
                    self.emit(
                        &events,
                        wallet_index,
                        LifecycleEventKind::Failed {
                            error_kind: ErrorKind::Verification,
                            error_detail: detail.clone(),
                        },
                    );
                    return SwapReceipt {
                        wallet_index,
                        status: SwapStatus::Failed,
                        input_amount: plan.input_amount,
                        output_amount: Some(outcome.output_amount),
                        tx_id: Some(outcome.tx_id),
                        fee_amount,
                        price_impact_bps: Some(current_quote.price_impact_bps),
                        duration_ms: start.elapsed().as_millis() as u64,
                        attempts: quote_attempts + execute_attempts,
                        error_kind: Some(ErrorKind::Verification),
                        error_detail: Some(detail),
                    };
                }
                Err(e) => {
                    let kind = e.kind();
                    let needs_requote = matches!(kind, ErrorKind::QuoteStale | ErrorKind::Slippage);
                    let retryable_budget_left = execute_attempts < max_attempts;

                    if kind.is_retryable() && retryable_budget_left {
                        let delay = self.backoff_delay(request, execute_attempts);
                        self.emit(
                            &events,
                            wallet_index,
                            LifecycleEventKind::RetryScheduled {
                                attempt: execute_attempts,
                                delay_ms: delay.as_millis() as u64,
                                reason: e.to_string(),
                            },
                        );
                        tokio::time::sleep(delay).await;
                        if needs_requote {
                            quote = None;
                        }
                        continue;
                    }

                    return self.failed_receipt(
                        plan,
                        start,
                        quote_attempts + execute_attempts,
                        kind,
                        e.to_string(),
                        &events,
                    );
                }
            }
        }
    }

    fn backoff_delay(&self, request: &SwapRequest, attempt: u32) -> Duration {
        let base = request.retry_backoff_base_ms as f64;
        let nominal = base * 2f64.powi((attempt.saturating_sub(1)) as i32);
        let jitter = nominal * fastrand::f64() * 0.25;
        Duration::from_millis((nominal + jitter) as u64)
    }

    fn skipped_receipt(&self, plan: &WalletPlan, start: Instant, attempts: u32) -> SwapReceipt {
        SwapReceipt {
            wallet_index: plan.wallet.index,
            status: SwapStatus::Skipped,
            input_amount: plan.input_amount,
            output_amount: None,
            tx_id: None,
            fee_amount: None,
            price_impact_bps: None,
            duration_ms: start.elapsed().as_millis() as u64,
            attempts,
            error_kind: None,
            error_detail: None,
        }
    }

    fn failed_receipt(
        &mut self,
        plan: &WalletPlan,
        start: Instant,
        attempts: u32,
        kind: ErrorKind,
        detail: String,
        events: &ProgressSender,
    ) -> SwapReceipt {
        warn!(
            wallet_index = plan.wallet.index,
            ?kind, %detail, "swap failed terminally"
        );
        self.emit(
            events,
            plan.wallet.index,
            LifecycleEventKind::Failed { error_kind: kind, error_detail: detail.clone() },
        );
        SwapReceipt {
            wallet_index: plan.wallet.index,
            status: SwapStatus::Failed,
            input_amount: plan.input_amount,
            output_amount: None,
            tx_id: None,
            fee_amount: None,
            price_impact_bps: None,
            duration_ms: start.elapsed().as_millis() as u64,
            attempts,
            error_kind: Some(kind),
            error_detail: Some(detail),
        }
    }
}
