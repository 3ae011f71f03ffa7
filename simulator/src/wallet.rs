//! Simulated external wallets that call into the vault.

use capvault_common::{AccountId, Amount};
use capvault_ledger::{CallContext, IdentityProvider, StaticIdentity};
use tokio::sync::RwLock;

/// An account holder with funds outside the vault.
pub struct SimulatedWallet {
    /// Account identifier.
    pub id: AccountId,
    /// Identity used to sign calls.
    identity: StaticIdentity,
    /// Funds held outside the vault.
    external: RwLock<Amount>,
    /// Funds the wallet started with.
    initial: Amount,
}

impl SimulatedWallet {
    /// Create a wallet with an initial external balance.
    pub fn new(id: impl Into<String>, initial: Amount) -> Self {
        let id = AccountId::new(id.into());
        Self {
            identity: StaticIdentity::new(id.clone()),
            id,
            external: RwLock::new(initial),
            initial,
        }
    }

    /// Funds currently held outside the vault.
    pub async fn external_balance(&self) -> Amount {
        *self.external.read().await
    }

    /// Funds the wallet started with.
    pub fn initial_balance(&self) -> Amount {
        self.initial
    }

    /// Take `amount` out of the wallet and attach it to a call.
    ///
    /// Returns `None` when the wallet cannot cover the amount.
    pub async fn attach(&self, amount: Amount) -> Option<CallContext> {
        let mut external = self.external.write().await;
        let rest = external.checked_sub(amount)?;
        *external = rest;
        Some(CallContext::from_provider(&self.identity, amount))
    }

    /// Return value that the vault refused.
    pub async fn refund(&self, amount: Amount) {
        let mut external = self.external.write().await;
        *external = external.checked_add(amount).unwrap_or(Amount::MAX);
    }

    /// Context for a call that carries no value.
    pub fn call(&self) -> CallContext {
        CallContext::from_provider(&self.identity, Amount::ZERO)
    }

    /// Identity the wallet calls with.
    pub fn caller(&self) -> AccountId {
        self.identity.caller()
    }
}

/// Wallet factory for creating test wallets.
pub struct WalletFactory;

impl WalletFactory {
    /// Create N simulated wallets.
    pub fn create_wallets(count: usize, initial: Amount) -> Vec<SimulatedWallet> {
        let names = [
            "ALICE", "BOB", "CAROL", "DAVE", "ERIN", "FRANK", "GRACE", "HEIDI", "IVAN", "JUDY",
        ];

        (0..count)
            .map(|i| match names.get(i) {
                Some(name) => SimulatedWallet::new(*name, initial),
                None => SimulatedWallet::new(format!("ACCOUNT_{}", i + 1), initial),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_attach_and_refund() {
        let wallet = SimulatedWallet::new("ALICE", Amount::new(100));

        let ctx = wallet.attach(Amount::new(60)).await.unwrap();
        assert_eq!(ctx.caller, AccountId::new("ALICE"));
        assert_eq!(ctx.value, Amount::new(60));
        assert_eq!(wallet.external_balance().await, Amount::new(40));

        assert!(wallet.attach(Amount::new(41)).await.is_none());

        wallet.refund(Amount::new(60)).await;
        assert_eq!(wallet.external_balance().await, Amount::new(100));
    }

    #[test]
    fn test_factory_names() {
        let wallets = WalletFactory::create_wallets(12, Amount::new(1));
        assert_eq!(wallets[0].id, AccountId::new("ALICE"));
        assert_eq!(wallets[11].id, AccountId::new("ACCOUNT_12"));
        assert_eq!(wallets[1].caller(), AccountId::new("BOB"));
    }
}
