//! Typed error taxonomy shared by the DEX client and the per-wallet state
//! machine, plus the orchestrator-level error surfaced on pre-execution
//! validation failures.
//!
//! Business errors are mapped onto [`ErrorKind`] once, at the DexClient
//! boundary, rather than re-derived by string matching at every call site
//! (see the re-architecture note on exceptions-as-control-flow in the design
//! notes).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error kind taxonomy surfaced in receipts and aggregated into the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transport,
    RateLimited,
    Quote,
    Slippage,
    QuoteStale,
    InsufficientBalance,
    Auth,
    Verification,
    Config,
    Unknown,
}

impl ErrorKind {
    /// Whether `SwapRunner` should retry within budget on this kind.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::Transport | ErrorKind::RateLimited | ErrorKind::Slippage | ErrorKind::QuoteStale
        )
    }
}

/// Errors returned by [`crate::dex_client::DexClient`] operations.
#[derive(Debug, Error)]
pub enum DexError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("quote rejected: {0}")]
    QuoteRejected(String),
    #[error("slippage exceeded: {0}")]
    SlippageExceeded(String),
    #[error("insufficient balance: {0}")]
    InsufficientBalance(String),
    #[error("signature error: {0}")]
    SignatureError(String),
    #[error("quote stale: {0}")]
    QuoteStale(String),
    #[error("verification failed: {0}")]
    VerificationFailed(String),
    #[error("unclassified dex error: {0}")]
    Unknown(String),
}

impl DexError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DexError::Transport(_) => ErrorKind::Transport,
            DexError::RateLimited(_) => ErrorKind::RateLimited,
            DexError::QuoteRejected(_) => ErrorKind::Quote,
            DexError::SlippageExceeded(_) => ErrorKind::Slippage,
            DexError::InsufficientBalance(_) => ErrorKind::InsufficientBalance,
            DexError::SignatureError(_) => ErrorKind::Auth,
            DexError::QuoteStale(_) => ErrorKind::QuoteStale,
            DexError::VerificationFailed(_) => ErrorKind::Verification,
            DexError::Unknown(_) => ErrorKind::Unknown,
        }
    }
}

/// Top-level error returned by [`crate::orchestrator::Orchestrator::run`].
/// Per-wallet failures never surface here: they are captured as
/// `SwapReceipt`s with `status = failed` instead (partial-failure
/// semantics). Only pre-execution validation and full-run cancellation with
/// zero admitted plans are fatal to the run as a whole.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("run cancelled before any wallet was admitted")]
    CancelledBeforeAdmission,
}
