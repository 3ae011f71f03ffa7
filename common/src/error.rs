//! Error types for CapVault operations.

use crate::{AccountId, Amount};
use thiserror::Error;

/// Main error type for vault operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VaultError {
    /// Amount parameter was zero.
    #[error("Amount must be greater than zero")]
    ZeroAmount,

    /// Construction-time parameter invalid.
    #[error("Invalid configuration: bank_cap {bank_cap}, withdraw_limit {withdraw_limit}")]
    InvalidConfiguration {
        bank_cap: String,
        withdraw_limit: String,
    },

    /// Deposit would breach the global cap.
    #[error("Deposit of {attempted} exceeds bank cap, {remaining} remaining")]
    ExceedsBankCap { attempted: Amount, remaining: Amount },

    /// Withdrawal exceeds the per-operation ceiling.
    #[error("Withdrawal of {attempted} exceeds limit {limit}")]
    ExceedsWithdrawLimit { attempted: Amount, limit: Amount },

    /// Withdrawal exceeds the caller's own balance.
    #[error("Insufficient balance: attempted {attempted}, balance {balance}")]
    InsufficientBalance { attempted: Amount, balance: Amount },

    /// Outbound value movement did not succeed.
    #[error("Transfer of {amount} to {recipient} failed: {reason}")]
    TransferFailed {
        recipient: AccountId,
        amount: Amount,
        reason: String,
    },

    /// Value received outside the deposit path.
    #[error("Direct transfer of {value} from {sender} rejected, use deposit")]
    DirectDepositNotAllowed { sender: AccountId, value: Amount },

    /// Configuration input could not be parsed.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Snapshot or live state violates a ledger invariant.
    #[error("Corrupt ledger state: {0}")]
    CorruptSnapshot(String),

    /// A checked accumulator update overflowed.
    #[error("Arithmetic overflow: {0}")]
    ArithmeticOverflow(String),

    /// Snapshot encoding or decoding failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl VaultError {
    /// Build an `InvalidConfiguration` from any displayable parameter values.
    pub fn invalid_configuration(
        bank_cap: impl ToString,
        withdraw_limit: impl ToString,
    ) -> Self {
        VaultError::InvalidConfiguration {
            bank_cap: bank_cap.to_string(),
            withdraw_limit: withdraw_limit.to_string(),
        }
    }

    /// Check if this error is a validation rejection (no state was touched).
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            VaultError::ZeroAmount
                | VaultError::ExceedsBankCap { .. }
                | VaultError::ExceedsWithdrawLimit { .. }
                | VaultError::InsufficientBalance { .. }
                | VaultError::DirectDepositNotAllowed { .. }
        )
    }

    /// Get a stable error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            VaultError::ZeroAmount => "ZERO_AMOUNT",
            VaultError::InvalidConfiguration { .. } => "INVALID_CONFIGURATION",
            VaultError::ExceedsBankCap { .. } => "EXCEEDS_BANK_CAP",
            VaultError::ExceedsWithdrawLimit { .. } => "EXCEEDS_WITHDRAW_LIMIT",
            VaultError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            VaultError::TransferFailed { .. } => "TRANSFER_FAILED",
            VaultError::DirectDepositNotAllowed { .. } => "DIRECT_DEPOSIT_NOT_ALLOWED",
            VaultError::ConfigurationError(_) => "CONFIGURATION_ERROR",
            VaultError::CorruptSnapshot(_) => "CORRUPT_SNAPSHOT",
            VaultError::ArithmeticOverflow(_) => "ARITHMETIC_OVERFLOW",
            VaultError::SerializationError(_) => "SERIALIZATION_ERROR",
        }
    }
}

/// Result type alias for vault operations.
pub type Result<T> = std::result::Result<T, VaultError>;
