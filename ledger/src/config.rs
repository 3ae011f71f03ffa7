//! Vault configuration.

use capvault_common::{Amount, Result, VaultError};

/// Immutable parameters of a vault ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultConfig {
    /// Ceiling on the total value the ledger may ever accept.
    pub bank_cap: Amount,
    /// Ceiling on the value removable in a single withdrawal.
    pub withdraw_limit: Amount,
    /// Capacity of the event broadcast buffer.
    pub event_buffer: usize,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            // 1000 and 10 whole units at 18 decimals
            bank_cap: Amount::new(1_000 * 10u128.pow(18)),
            withdraw_limit: Amount::new(10 * 10u128.pow(18)),
            event_buffer: 1024,
        }
    }
}

impl VaultConfig {
    /// Create a configuration with the default event buffer.
    pub fn new(bank_cap: impl Into<Amount>, withdraw_limit: impl Into<Amount>) -> Self {
        Self {
            bank_cap: bank_cap.into(),
            withdraw_limit: withdraw_limit.into(),
            ..Self::default()
        }
    }

    /// Create from signed inputs, rejecting zero and negative values.
    pub fn from_signed(bank_cap: i128, withdraw_limit: i128) -> Result<Self> {
        if bank_cap <= 0 || withdraw_limit <= 0 {
            return Err(VaultError::invalid_configuration(bank_cap, withdraw_limit));
        }
        Ok(Self::new(bank_cap as u128, withdraw_limit as u128))
    }

    /// Load configuration from environment variables.
    ///
    /// `VAULT_BANK_CAP` and `VAULT_WITHDRAW_LIMIT` must be set together.
    pub fn from_env() -> Result<Self> {
        let bank_cap = std::env::var("VAULT_BANK_CAP").ok();
        let withdraw_limit = std::env::var("VAULT_WITHDRAW_LIMIT").ok();

        let mut config = match (bank_cap, withdraw_limit) {
            (Some(cap), Some(limit)) => Self::from_signed(
                parse_signed("VAULT_BANK_CAP", &cap)?,
                parse_signed("VAULT_WITHDRAW_LIMIT", &limit)?,
            )?,
            (None, None) => Self::default(),
            _ => {
                return Err(VaultError::ConfigurationError(
                    "VAULT_BANK_CAP and VAULT_WITHDRAW_LIMIT must be set together".to_string(),
                ))
            }
        };

        if let Ok(buffer) = std::env::var("VAULT_EVENT_BUFFER") {
            config.event_buffer = buffer.trim().parse().map_err(|_| {
                VaultError::ConfigurationError(format!(
                    "VAULT_EVENT_BUFFER is not a count: {}",
                    buffer
                ))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.bank_cap.is_zero() || self.withdraw_limit.is_zero() {
            return Err(VaultError::invalid_configuration(
                self.bank_cap,
                self.withdraw_limit,
            ));
        }

        if self.event_buffer == 0 {
            return Err(VaultError::ConfigurationError(
                "Event buffer cannot be 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_signed(name: &str, raw: &str) -> Result<i128> {
    raw.trim()
        .parse()
        .map_err(|_| VaultError::ConfigurationError(format!("{} is not an integer: {}", name, raw)))
}
