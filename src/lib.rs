//! Multi-wallet swap orchestrator.
//!
//! Given a fleet of wallets and a desired token swap, this crate computes
//! per-wallet amounts, schedules per-wallet executions under one of three
//! concurrency disciplines, drives each execution through a
//! quote -> execute -> verify pipeline with bounded retries, and emits a
//! structured run report.
//!
//! Telegram interaction, wallet key storage, the live DEX aggregator, and
//! Solana RPC are intentionally out of scope here: they are represented only
//! by the trait boundaries ([`DexClient`], [`WalletSource`]) this crate
//! consumes.

pub mod amount_planner;
pub mod config;
pub mod dex_client;
pub mod error;
pub mod orchestrator;
pub mod progress_bus;
pub mod report;
pub mod result_aggregator;
pub mod scheduler;
pub mod swap_runner;
pub mod types;
pub mod wallet_source;

pub use amount_planner::AmountPlanner;
pub use config::Config;
pub use dex_client::{DexClient, JupiterDexClient};
pub use error::{DexError, ErrorKind, OrchestratorError};
pub use orchestrator::Orchestrator;
pub use progress_bus::{ProgressBus, ProgressReceiver, ProgressSender};
pub use report::{RunReport, RunStatus};
pub use result_aggregator::ResultAggregator;
pub use scheduler::Scheduler;
pub use swap_runner::SwapRunner;
pub use types::{
    AdmissionVerdict, LifecycleEvent, LifecycleEventKind, Mode, Operation, Quote, Strategy,
    SwapReceipt, SwapRequest, SwapStatus, Token, Wallet, WalletPlan,
};
pub use wallet_source::{StaticWalletSource, WalletSource};
