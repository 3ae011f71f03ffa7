//! Caller identity and per-call context.

use capvault_common::{AccountId, Amount};

/// Supplies the identity of whoever is calling into the ledger.
///
/// The integration layer owns authentication; the ledger only trusts what
/// this returns and never accepts an account parameter on mutating calls.
pub trait IdentityProvider: Send + Sync {
    /// Identity of the current caller.
    fn caller(&self) -> AccountId;
}

/// Provider that always reports the same identity.
#[derive(Debug, Clone)]
pub struct StaticIdentity(AccountId);

impl StaticIdentity {
    /// Create a provider for a fixed identity.
    pub fn new(account: impl Into<AccountId>) -> Self {
        Self(account.into())
    }
}

impl IdentityProvider for StaticIdentity {
    fn caller(&self) -> AccountId {
        self.0.clone()
    }
}

/// Context attached to every ledger call: who is calling and what value
/// travels with the call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallContext {
    /// Calling account.
    pub caller: AccountId,
    /// Value attached to the call.
    pub value: Amount,
}

impl CallContext {
    /// Create a context carrying value.
    pub fn new(caller: impl Into<AccountId>, value: impl Into<Amount>) -> Self {
        Self {
            caller: caller.into(),
            value: value.into(),
        }
    }

    /// Create a context with no attached value.
    pub fn without_value(caller: impl Into<AccountId>) -> Self {
        Self::new(caller, Amount::ZERO)
    }

    /// Build a context for the provider's current caller.
    pub fn from_provider(provider: &dyn IdentityProvider, value: Amount) -> Self {
        Self {
            caller: provider.caller(),
            value,
        }
    }
}
