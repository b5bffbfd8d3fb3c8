//! Read-only query interface in front of wallet keys and balances. The core
//! never persists keys: it requests a signing key just-in-time from the
//! provider at execute time, and never reaches past this trait into actual
//! derivation or file storage.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::types::Wallet;

#[async_trait]
pub trait WalletSource: Send + Sync {
    async fn list_wallets(&self) -> anyhow::Result<Vec<Wallet>>;

    /// Balance of `address` in `mint`'s base units.
    async fn balance(&self, address: &str, mint: &str) -> anyhow::Result<u64>;

    /// Resolves the signing key for the given wallet address. Returns an
    /// error if the wallet has no signing key available (e.g. watch-only).
    async fn private_key_for(&self, address: &str) -> anyhow::Result<String>;
}

/// In-memory reference implementation, primarily for tests and mock-mode
/// callers. Balances are keyed by `(address, mint)`.
#[derive(Default)]
pub struct StaticWalletSource {
    wallets: Vec<Wallet>,
    balances: HashMap<(String, String), u64>,
    keys: HashMap<String, String>,
}

impl StaticWalletSource {
    pub fn new(wallets: Vec<Wallet>) -> Self {
        Self {
            wallets,
            balances: HashMap::new(),
            keys: HashMap::new(),
        }
    }

    pub fn with_balance(mut self, address: impl Into<String>, mint: impl Into<String>, amount: u64) -> Self {
        self.balances.insert((address.into(), mint.into()), amount);
        self
    }

    pub fn with_key(mut self, address: impl Into<String>, priv_key_base58: impl Into<String>) -> Self {
        self.keys.insert(address.into(), priv_key_base58.into());
        self
    }
}

#[async_trait]
impl WalletSource for StaticWalletSource {
    async fn list_wallets(&self) -> anyhow::Result<Vec<Wallet>> {
        Ok(self.wallets.clone())
    }

    async fn balance(&self, address: &str, mint: &str) -> anyhow::Result<u64> {
        Ok(self
            .balances
            .get(&(address.to_string(), mint.to_string()))
            .copied()
            .unwrap_or(0))
    }

    async fn private_key_for(&self, address: &str) -> anyhow::Result<String> {
        self.keys
            .get(address)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no signing key available for {address}"))
    }
}
