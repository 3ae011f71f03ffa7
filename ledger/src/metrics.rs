//! Operational counters for vault monitoring.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

/// Vault metrics.
///
/// These count attempts and failures, which the ledger's own accumulators
/// do not record. Successful operations are tracked by the ledger itself.
pub struct VaultMetrics {
    /// Deposit calls received.
    pub deposits_attempted: AtomicU64,
    /// Withdraw calls received.
    pub withdrawals_attempted: AtomicU64,
    /// Operations rejected by validation.
    pub rejections: AtomicU64,
    /// Direct transfers refused.
    pub direct_transfers_rejected: AtomicU64,
    /// Withdrawals whose outbound transfer failed.
    pub transfer_failures: AtomicU64,
    /// Withdrawal effects reverted after a failed transfer.
    pub rollbacks: AtomicU64,
}

impl VaultMetrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self {
            deposits_attempted: AtomicU64::new(0),
            withdrawals_attempted: AtomicU64::new(0),
            rejections: AtomicU64::new(0),
            direct_transfers_rejected: AtomicU64::new(0),
            transfer_failures: AtomicU64::new(0),
            rollbacks: AtomicU64::new(0),
        }
    }

    /// Record a deposit call.
    pub fn deposit_attempted(&self) {
        self.deposits_attempted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a withdraw call.
    pub fn withdrawal_attempted(&self) {
        self.withdrawals_attempted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a validation rejection.
    pub fn rejected(&self) {
        self.rejections.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a refused direct transfer.
    pub fn direct_transfer_rejected(&self) {
        self.direct_transfers_rejected.fetch_add(1, Ordering::Relaxed);
        self.rejections.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed outbound transfer.
    pub fn transfer_failed(&self) {
        self.transfer_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a reverted withdrawal.
    pub fn rolled_back(&self) {
        self.rollbacks.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            deposits_attempted: self.deposits_attempted.load(Ordering::Relaxed),
            withdrawals_attempted: self.withdrawals_attempted.load(Ordering::Relaxed),
            rejections: self.rejections.load(Ordering::Relaxed),
            direct_transfers_rejected: self.direct_transfers_rejected.load(Ordering::Relaxed),
            transfer_failures: self.transfer_failures.load(Ordering::Relaxed),
            rollbacks: self.rollbacks.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus format.
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        format!(
            r#"# HELP capvault_deposits_attempted Total deposit calls
# TYPE capvault_deposits_attempted counter
capvault_deposits_attempted {}

# HELP capvault_withdrawals_attempted Total withdraw calls
# TYPE capvault_withdrawals_attempted counter
capvault_withdrawals_attempted {}

# HELP capvault_rejections Total operations rejected by validation
# TYPE capvault_rejections counter
capvault_rejections {}

# HELP capvault_direct_transfers_rejected Total direct transfers refused
# TYPE capvault_direct_transfers_rejected counter
capvault_direct_transfers_rejected {}

# HELP capvault_transfer_failures Total failed outbound transfers
# TYPE capvault_transfer_failures counter
capvault_transfer_failures {}

# HELP capvault_rollbacks Total reverted withdrawals
# TYPE capvault_rollbacks counter
capvault_rollbacks {}
"#,
            snapshot.deposits_attempted,
            snapshot.withdrawals_attempted,
            snapshot.rejections,
            snapshot.direct_transfers_rejected,
            snapshot.transfer_failures,
            snapshot.rollbacks,
        )
    }
}

impl Default for VaultMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub deposits_attempted: u64,
    pub withdrawals_attempted: u64,
    pub rejections: u64,
    pub direct_transfers_rejected: u64,
    pub transfer_failures: u64,
    pub rollbacks: u64,
}

/// Shared metrics instance.
pub type SharedMetrics = Arc<VaultMetrics>;
