//! Run-scoped configuration that is genuinely environment-driven (the DEX
//! aggregator endpoint and credentials, the quote staleness window). The
//! per-request knobs (strategy, mode, slippage, retries, ...) live on
//! [`crate::types::SwapRequest`] instead and are validated once, at the
//! edge, by the orchestrator.

use std::env;
use std::time::Duration;

use anyhow::Result;

/// Default conservative staleness window for a quote before it must be
/// re-fetched. Not documented by the aggregator; chosen deliberately (see
/// design notes) and overridable per deployment.
pub const DEFAULT_QUOTE_STALENESS_MS: u64 = 10_000;

/// Fixed fee ratio applied at execute time when `SwapRequest::collect_fee`
/// is set.
pub const FEE_RATIO: f64 = 0.001;

#[derive(Debug, Clone)]
pub struct Config {
    pub jupiter_base_url: String,
    pub jupiter_api_key: Option<String>,
    pub quote_timeout: Duration,
    pub execute_timeout: Duration,
    pub quote_staleness: Duration,
}

impl Config {
    /// Load configuration from environment variables, falling back to
    /// conservative defaults for anything not set.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let jupiter_base_url = env::var("JUPITER_BASE_URL")
            .unwrap_or_else(|_| "https://api.jup.ag".to_string());
        let jupiter_api_key = env::var("JUPITER_API_KEY").ok();

        let quote_timeout_ms: u64 = env::var("QUOTE_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5_000);
        let execute_timeout_ms: u64 = env::var("EXECUTE_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(20_000);
        let quote_staleness_ms: u64 = env::var("QUOTE_STALENESS_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_QUOTE_STALENESS_MS);

        Ok(Self {
            jupiter_base_url,
            jupiter_api_key,
            quote_timeout: Duration::from_millis(quote_timeout_ms),
            execute_timeout: Duration::from_millis(execute_timeout_ms),
            quote_staleness: Duration::from_millis(quote_staleness_ms),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            jupiter_base_url: "https://api.jup.ag".to_string(),
            jupiter_api_key: None,
            quote_timeout: Duration::from_millis(5_000),
            execute_timeout: Duration::from_millis(20_000),
            quote_staleness: Duration::from_millis(DEFAULT_QUOTE_STALENESS_MS),
        }
    }
}
