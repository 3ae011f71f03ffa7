//! Outbound value transfer executors.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use capvault_common::{AccountId, Amount};
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use tracing::{debug, warn};

/// Reasons an outbound transfer did not happen.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransferError {
    /// Recipient cannot currently receive value.
    #[error("Recipient unavailable: {0}")]
    RecipientUnavailable(AccountId),

    /// The value rail refused the transfer.
    #[error("Transfer rejected: {0}")]
    Rejected(String),
}

/// Moves value out of the vault to a recipient.
///
/// Called by the ledger once a withdrawal's debit is recorded. The
/// implementation may call back into the ledger from the same task and sees
/// the debited balance; a withdrawal for the same account issued from a
/// separately spawned task waits for this transfer to finish. It must report
/// its outcome before returning and must not expect the ledger to retry.
#[async_trait]
pub trait TransferExecutor: Send + Sync {
    /// Executor name, for logs.
    fn name(&self) -> &str;

    /// Move `amount` to `recipient`.
    async fn transfer(&self, recipient: &AccountId, amount: Amount) -> Result<(), TransferError>;
}

/// Executor that always succeeds and keeps a running payout total per
/// recipient.
#[derive(Default)]
pub struct LoggingTransferExecutor {
    payouts: DashMap<AccountId, Amount>,
    transfers: AtomicU64,
}

impl LoggingTransferExecutor {
    /// Create a new executor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total paid out to a recipient.
    pub fn paid_to(&self, recipient: &AccountId) -> Amount {
        self.payouts
            .get(recipient)
            .map(|a| *a)
            .unwrap_or(Amount::ZERO)
    }

    /// Total paid out to everyone.
    pub fn total_paid(&self) -> Amount {
        self.payouts.iter().map(|entry| *entry.value()).sum()
    }

    /// Number of completed transfers.
    pub fn transfer_count(&self) -> u64 {
        self.transfers.load(Ordering::Relaxed)
    }

    fn record(&self, recipient: &AccountId, amount: Amount) {
        let mut paid = self.payouts.entry(recipient.clone()).or_insert(Amount::ZERO);
        *paid = paid.checked_add(amount).unwrap_or(Amount::MAX);
        self.transfers.fetch_add(1, Ordering::Relaxed);
    }
}

#[async_trait]
impl TransferExecutor for LoggingTransferExecutor {
    fn name(&self) -> &str {
        "logging"
    }

    async fn transfer(&self, recipient: &AccountId, amount: Amount) -> Result<(), TransferError> {
        self.record(recipient, amount);
        debug!(recipient = %recipient, amount = %amount, "Transfer executed");
        Ok(())
    }
}

/// Executor that fails a fraction of transfers, and every transfer to a
/// blocked recipient. Successful transfers are recorded like
/// [`LoggingTransferExecutor`].
pub struct FaultyTransferExecutor {
    inner: LoggingTransferExecutor,
    failure_rate: f64,
    rng: Mutex<StdRng>,
    blocked: DashSet<AccountId>,
}

impl FaultyTransferExecutor {
    /// Create an executor failing with probability `failure_rate`.
    pub fn new(failure_rate: f64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };

        Self {
            inner: LoggingTransferExecutor::new(),
            failure_rate: failure_rate.clamp(0.0, 1.0),
            rng: Mutex::new(rng),
            blocked: DashSet::new(),
        }
    }

    /// Make every transfer to `recipient` fail.
    pub fn block(&self, recipient: AccountId) {
        self.blocked.insert(recipient);
    }

    /// Stop failing transfers to `recipient`.
    pub fn unblock(&self, recipient: &AccountId) {
        self.blocked.remove(recipient);
    }

    /// Total paid out to a recipient.
    pub fn paid_to(&self, recipient: &AccountId) -> Amount {
        self.inner.paid_to(recipient)
    }

    /// Total paid out to everyone.
    pub fn total_paid(&self) -> Amount {
        self.inner.total_paid()
    }
}

#[async_trait]
impl TransferExecutor for FaultyTransferExecutor {
    fn name(&self) -> &str {
        "faulty"
    }

    async fn transfer(&self, recipient: &AccountId, amount: Amount) -> Result<(), TransferError> {
        if self.blocked.contains(recipient) {
            warn!(recipient = %recipient, "Transfer to blocked recipient");
            return Err(TransferError::RecipientUnavailable(recipient.clone()));
        }

        let fail = self.failure_rate > 0.0 && self.rng.lock().gen_bool(self.failure_rate);
        if fail {
            warn!(recipient = %recipient, amount = %amount, "Injected transfer failure");
            return Err(TransferError::Rejected("injected failure".to_string()));
        }

        self.inner.transfer(recipient, amount).await
    }
}
