//! CapVault Ledger
//!
//! Per-account value vault over a shared pool with a global capacity ceiling
//! and a per-withdrawal ceiling.
//!
//! Withdrawals follow checks-effects-interactions: validation, then the
//! balance debit, then the call to the [`TransferExecutor`]. A failed
//! transfer reverts the debit.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use capvault_common::{AccountId, Amount};
//! use capvault_ledger::{CallContext, LoggingTransferExecutor, VaultConfig, VaultLedger};
//!
//! let ledger = VaultLedger::new(
//!     VaultConfig::new(100u128, 50u128),
//!     AccountId::new("DEPLOYER"),
//!     Arc::new(LoggingTransferExecutor::new()),
//! )?;
//!
//! ledger.deposit(&CallContext::new("ALICE", 100u128))?;
//! ledger.withdraw(&CallContext::without_value("ALICE"), Amount::new(50)).await?;
//! ```

pub mod vault;
pub mod config;
pub mod identity;
pub mod transfer;
pub mod events;
pub mod metrics;
pub mod snapshot;

pub use vault::{DepositReceipt, VaultLedger, VaultStats, WithdrawalReceipt};
pub use config::VaultConfig;
pub use identity::{CallContext, IdentityProvider, StaticIdentity};
pub use transfer::{FaultyTransferExecutor, LoggingTransferExecutor, TransferError, TransferExecutor};
pub use events::{EventEnvelope, EventPublisher, VaultEvent};
pub use metrics::{MetricsSnapshot, VaultMetrics};
pub use snapshot::LedgerSnapshot;
