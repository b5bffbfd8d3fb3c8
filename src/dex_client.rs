//! Thin, async facade over the remote DEX aggregator (Jupiter-shaped wire
//! format). Retries inside this module are restricted to transport-level
//! failures and throttling; business rejections (slippage, stale quote,
//! insufficient balance, ...) are classified once here and surfaced
//! immediately so [`crate::swap_runner::SwapRunner`] can decide retry policy
//! from the tag rather than from string matching.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use once_cell::sync::OnceCell;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::DexError;
use crate::types::Quote;

/// Result of a successful `execute` call. Assembled into a full
/// [`crate::types::SwapReceipt`] by the caller, which alone knows the
/// wallet index, attempt count, and elapsed wall time.
#[derive(Debug, Clone)]
pub struct ExecuteOutcome {
    pub tx_id: String,
    pub output_amount: u64,
    pub fee_amount: Option<u64>,
}

#[derive(Debug, Clone, Copy)]
pub struct ExecuteOptions {
    pub wrap_unwrap_sol: bool,
    pub collect_fee: bool,
    pub verify: bool,
}

/// Facade over the remote aggregator. Implementations must be safe for
/// concurrent use: the same client is shared across every `SwapRunner` in a
/// run.
#[async_trait]
pub trait DexClient: Send + Sync {
    async fn supported_tokens(&self) -> Result<HashMap<String, String>, DexError>;

    async fn quote(
        &self,
        input_mint: &str,
        output_mint: &str,
        amount: u64,
        slippage_bps: u16,
        direct_only: bool,
        max_retries: u32,
    ) -> Result<Quote, DexError>;

    async fn execute(
        &self,
        priv_key: &str,
        quote: &Quote,
        opts: ExecuteOptions,
        max_retries: u32,
    ) -> Result<ExecuteOutcome, DexError>;
}

// --- wire shapes (canonical subset, per the external-interfaces contract) ---

#[derive(Debug, Serialize)]
struct QuoteRequestWire<'a> {
    input_mint: &'a str,
    output_mint: &'a str,
    amount: u64,
    slippage_bps: u16,
    only_direct_routes: bool,
}

#[derive(Debug, Deserialize)]
struct QuoteResponseWire {
    in_amount: String,
    out_amount: String,
    price_impact_pct: String,
    route_id: String,
}

#[derive(Debug, Serialize)]
struct SwapRequestWire<'a> {
    user_wallet_private_key_base58: &'a str,
    quote_response: QuoteResponseEcho<'a>,
    wrap_and_unwrap_sol: bool,
    collect_fees: bool,
    verify_swap: bool,
}

/// Echoes back the route the aggregator must execute against. The
/// aggregator treats this opaquely; we only need `route_id` and `in_amount`
/// round-tripped.
#[derive(Debug, Serialize)]
struct QuoteResponseEcho<'a> {
    route_id: &'a str,
    in_amount: u64,
    out_amount: u64,
}

#[derive(Debug, Deserialize)]
struct SwapResponseWire {
    transaction_id: String,
    status: String,
    #[serde(default)]
    fee_collection: Option<FeeCollectionWire>,
}

#[derive(Debug, Deserialize)]
struct FeeCollectionWire {
    status: String,
    #[serde(default)]
    fee_amount: Option<u64>,
}

/// Minimum interval enforced between outbound requests, on top of the token
/// bucket, mirroring the burst-protector pattern used against this same
/// aggregator elsewhere in this codebase.
const MIN_REQUEST_INTERVAL_MS: u64 = 50;

pub struct JupiterDexClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    limiter: Arc<
        RateLimiter<
            governor::state::NotKeyed,
            governor::state::InMemoryState,
            governor::clock::DefaultClock,
        >,
    >,
    quote_timeout: Duration,
    execute_timeout: Duration,
    supported_tokens_cache: OnceCell<HashMap<String, String>>,
}

impl JupiterDexClient {
    pub fn new(config: &Config) -> Self {
        let quota = Quota::per_second(nonzero!(10u32)).allow_burst(nonzero!(20u32));
        let limiter = Arc::new(RateLimiter::direct(quota));

        let client = Client::builder()
            .build()
            .expect("failed to build reqwest client");

        Self {
            client,
            base_url: config.jupiter_base_url.clone(),
            api_key: config.jupiter_api_key.clone(),
            limiter,
            quote_timeout: config.quote_timeout,
            execute_timeout: config.execute_timeout,
            supported_tokens_cache: OnceCell::new(),
        }
    }

    /// Converts a base64-encoded private key to base58, the single canonical
    /// form the aggregator accepts. Keys already in base58 pass through
    /// unchanged. This is the one edge adapter the rest of the system never
    /// has to think about again.
    fn normalize_private_key(priv_key: &str) -> Result<String, DexError> {
        use base64::Engine;

        if bs58::decode(priv_key).into_vec().is_ok() {
            return Ok(priv_key.to_string());
        }

        let decoded = base64::engine::general_purpose::STANDARD
            .decode(priv_key)
            .map_err(|e| DexError::SignatureError(format!("key is neither base58 nor base64: {e}")))?;
        Ok(bs58::encode(decoded).into_string())
    }

    async fn throttle(&self) {
        self.limiter.until_ready().await;
        sleep(Duration::from_millis(MIN_REQUEST_INTERVAL_MS)).await;
    }

    fn classify_transport(status: StatusCode, body: &str) -> DexError {
        if status == StatusCode::TOO_MANY_REQUESTS {
            DexError::RateLimited(format!("429: {body}"))
        } else if status.is_server_error() {
            DexError::Transport(format!("{status}: {body}"))
        } else {
            DexError::QuoteRejected(format!("{status}: {body}"))
        }
    }

    fn classify_swap_rejection(body: &str) -> DexError {
        let lower = body.to_lowercase();
        if lower.contains("slippage") {
            DexError::SlippageExceeded(body.to_string())
        } else if lower.contains("stale") || lower.contains("blockhash") {
            DexError::QuoteStale(body.to_string())
        } else if lower.contains("insufficient") {
            DexError::InsufficientBalance(body.to_string())
        } else if lower.contains("signature") || lower.contains("sign") {
            DexError::SignatureError(body.to_string())
        } else {
            DexError::Unknown(body.to_string())
        }
    }

    /// Runs `attempt` with transport-only retry, exponential backoff, and a
    /// per-call timeout. Business errors are returned to the caller on the
    /// first attempt without retry.
    async fn with_transport_retry<T, F, Fut>(
        &self,
        op_name: &str,
        max_retries: u32,
        mut attempt: F,
    ) -> Result<T, DexError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, DexError>>,
    {
        let mut tries = 0u32;
        loop {
            self.throttle().await;
            match attempt().await {
                Ok(v) => return Ok(v),
                Err(e) if matches!(e, DexError::Transport(_) | DexError::RateLimited(_)) => {
                    tries += 1;
                    if tries > max_retries {
                        warn!("{op_name} exhausted {tries} attempts: {e}");
                        return Err(e);
                    }
                    let backoff_ms = 200u64.saturating_mul(1u64 << (tries - 1).min(16));
                    let jitter_ms = (fastrand::f64() * 0.25 * backoff_ms as f64) as u64;
                    debug!(
                        "{op_name} transport error (attempt {tries}/{}), retrying in {}ms: {e}",
                        max_retries + 1,
                        backoff_ms + jitter_ms
                    );
                    sleep(Duration::from_millis(backoff_ms + jitter_ms)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl DexClient for JupiterDexClient {
    async fn supported_tokens(&self) -> Result<HashMap<String, String>, DexError> {
        if let Some(cached) = self.supported_tokens_cache.get() {
            return Ok(cached.clone());
        }

        let url = format!("{}/tokens/v1/all", self.base_url);
        let response = self
            .client
            .get(&url)
            .timeout(self.quote_timeout)
            .send()
            .await
            .map_err(|e| DexError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_transport(status, &body));
        }

        #[derive(Deserialize)]
        struct TokenEntry {
            symbol: String,
            mint: String,
        }

        let entries: Vec<TokenEntry> = response
            .json()
            .await
            .map_err(|e| DexError::Unknown(format!("bad token list: {e}")))?;

        let map: HashMap<String, String> =
            entries.into_iter().map(|t| (t.symbol, t.mint)).collect();

        let _ = self.supported_tokens_cache.set(map.clone());
        Ok(map)
    }

    async fn quote(
        &self,
        input_mint: &str,
        output_mint: &str,
        amount: u64,
        slippage_bps: u16,
        direct_only: bool,
        max_retries: u32,
    ) -> Result<Quote, DexError> {
        self.with_transport_retry("quote", max_retries, || async {
            let url = format!("{}/swap/v1/quote", self.base_url);
            let body = QuoteRequestWire {
                input_mint,
                output_mint,
                amount,
                slippage_bps,
                only_direct_routes: direct_only,
            };

            let mut req = self.client.get(&url).query(&body).timeout(self.quote_timeout);
            if let Some(key) = &self.api_key {
                req = req.header("x-api-key", key);
            }

            let response = req.send().await.map_err(|e| DexError::Transport(e.to_string()))?;
            if !response.status().is_success() {
                let status = response.status();
                let text = response.text().await.unwrap_or_default();
                return Err(Self::classify_transport(status, &text));
            }

            let wire: QuoteResponseWire = response
                .json()
                .await
                .map_err(|e| DexError::Unknown(format!("bad quote response: {e}")))?;

            let in_amount: u64 = wire
                .in_amount
                .parse()
                .map_err(|_| DexError::Unknown("non-numeric in_amount".into()))?;
            let out_amount: u64 = wire
                .out_amount
                .parse()
                .map_err(|_| DexError::Unknown("non-numeric out_amount".into()))?;
            let price_impact_pct: f64 = wire
                .price_impact_pct
                .parse()
                .map_err(|_| DexError::Unknown("non-numeric price_impact_pct".into()))?;

            Ok(Quote {
                in_amount,
                out_amount,
                route_id: wire.route_id,
                price_impact_bps: (price_impact_pct * 100.0).round() as u32,
                fetched_at: Instant::now(),
            })
        })
        .await
    }

    async fn execute(
        &self,
        priv_key: &str,
        quote: &Quote,
        opts: ExecuteOptions,
        max_retries: u32,
    ) -> Result<ExecuteOutcome, DexError> {
        let normalized_key = Self::normalize_private_key(priv_key)?;

        self.with_transport_retry("execute", max_retries, || async {
            let url = format!("{}/swap/v1/swap", self.base_url);
            let body = SwapRequestWire {
                user_wallet_private_key_base58: &normalized_key,
                quote_response: QuoteResponseEcho {
                    route_id: &quote.route_id,
                    in_amount: quote.in_amount,
                    out_amount: quote.out_amount,
                },
                wrap_and_unwrap_sol: opts.wrap_unwrap_sol,
                collect_fees: opts.collect_fee,
                verify_swap: opts.verify,
            };

            let mut req = self
                .client
                .post(&url)
                .json(&body)
                .timeout(self.execute_timeout);
            if let Some(key) = &self.api_key {
                req = req.header("x-api-key", key);
            }

            let response = req.send().await.map_err(|e| DexError::Transport(e.to_string()))?;
            let status = response.status();
            let text = response
                .text()
                .await
                .map_err(|e| DexError::Transport(e.to_string()))?;

            if !status.is_success() {
                return Err(Self::classify_transport(status, &text));
            }

            let wire: SwapResponseWire = serde_json::from_str(&text)
                .map_err(|e| DexError::Unknown(format!("bad swap response: {e}")))?;

            if wire.status != "success" {
                return Err(Self::classify_swap_rejection(&text));
            }

            let fee_amount = match &wire.fee_collection {
                Some(fee) if fee.status == "success" => fee.fee_amount,
                _ => None,
            };

            Ok(ExecuteOutcome {
                tx_id: wire.transaction_id,
                output_amount: quote.out_amount,
                fee_amount,
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_base58_key_unchanged() {
        let key = bs58::encode([1u8; 64]).into_string();
        let normalized = JupiterDexClient::normalize_private_key(&key).unwrap();
        assert_eq!(normalized, key);
    }

    #[test]
    fn classifies_slippage_rejection() {
        let err = JupiterDexClient::classify_swap_rejection("Slippage tolerance exceeded");
        assert!(matches!(err, DexError::SlippageExceeded(_)));
    }

    #[test]
    fn classifies_stale_quote_rejection() {
        let err = JupiterDexClient::classify_swap_rejection("quote is stale, blockhash expired");
        assert!(matches!(err, DexError::QuoteStale(_)));
    }

    #[test]
    fn classifies_server_error_as_transport() {
        let err = JupiterDexClient::classify_transport(StatusCode::BAD_GATEWAY, "bad gateway");
        assert!(matches!(err, DexError::Transport(_)));
    }

    #[test]
    fn classifies_429_as_rate_limited() {
        let err = JupiterDexClient::classify_transport(StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert!(matches!(err, DexError::RateLimited(_)));
    }
}
