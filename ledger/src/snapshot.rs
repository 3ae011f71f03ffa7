//! Point-in-time ledger snapshots for persistence.

use std::collections::BTreeMap;

use capvault_common::{AccountId, Amount, Result, VaultError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::VaultConfig;

/// Complete accounting state of a ledger.
///
/// Captured under the ledger's state lock, so the accumulators, counts and
/// balances always describe the same instant. Persist it as one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub bank_cap: Amount,
    pub withdraw_limit: Amount,
    pub deployer: AccountId,
    pub total_deposited: Amount,
    pub total_withdrawn: Amount,
    pub deposit_count: u64,
    pub withdraw_count: u64,
    /// Sequence of the last emitted event.
    #[serde(default)]
    pub last_sequence: u64,
    /// Capacity of the event broadcast buffer.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    pub balances: BTreeMap<AccountId, Amount>,
    pub taken_at: DateTime<Utc>,
}

fn default_event_buffer() -> usize {
    VaultConfig::default().event_buffer
}

impl LedgerSnapshot {
    /// Configuration the snapshot was taken under.
    pub fn config(&self) -> VaultConfig {
        VaultConfig {
            bank_cap: self.bank_cap,
            withdraw_limit: self.withdraw_limit,
            event_buffer: self.event_buffer,
        }
    }

    /// Encode as JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| VaultError::SerializationError(e.to_string()))
    }

    /// Decode from JSON. The result is not yet validated.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| VaultError::SerializationError(e.to_string()))
    }

    /// Check configuration and accounting invariants.
    pub fn validate(&self) -> Result<()> {
        self.config().validate()?;

        check_accounting(
            self.bank_cap,
            self.total_deposited,
            self.total_withdrawn,
            self.balances.iter(),
        )
    }
}

/// Verify the closed-ledger invariants against a set of balances.
///
/// - deposits never exceed the cap
/// - no account holds more than was ever deposited
/// - deposited minus withdrawn equals the sum of balances
pub(crate) fn check_accounting<'a>(
    bank_cap: Amount,
    total_deposited: Amount,
    total_withdrawn: Amount,
    balances: impl Iterator<Item = (&'a AccountId, &'a Amount)>,
) -> Result<()> {
    if total_deposited > bank_cap {
        return Err(VaultError::CorruptSnapshot(format!(
            "total deposited {} exceeds bank cap {}",
            total_deposited, bank_cap
        )));
    }

    let net = total_deposited.checked_sub(total_withdrawn).ok_or_else(|| {
        VaultError::CorruptSnapshot(format!(
            "total withdrawn {} exceeds total deposited {}",
            total_withdrawn, total_deposited
        ))
    })?;

    let mut sum = Amount::ZERO;
    for (account, balance) in balances {
        if *balance > total_deposited {
            return Err(VaultError::CorruptSnapshot(format!(
                "balance {} of {} exceeds total deposited {}",
                balance, account, total_deposited
            )));
        }
        sum = sum.checked_add(*balance).ok_or_else(|| {
            VaultError::CorruptSnapshot("sum of balances overflows".to_string())
        })?;
    }

    if sum != net {
        return Err(VaultError::CorruptSnapshot(format!(
            "sum of balances {} does not match net deposits {}",
            sum, net
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> LedgerSnapshot {
        let mut balances = BTreeMap::new();
        balances.insert(AccountId::new("ALICE"), Amount::new(70));
        balances.insert(AccountId::new("BOB"), Amount::new(0));

        LedgerSnapshot {
            bank_cap: Amount::new(100),
            withdraw_limit: Amount::new(50),
            deployer: AccountId::new("DEPLOYER"),
            total_deposited: Amount::new(90),
            total_withdrawn: Amount::new(20),
            deposit_count: 2,
            withdraw_count: 1,
            last_sequence: 3,
            event_buffer: 16,
            balances,
            taken_at: Utc::now(),
        }
    }

    #[test]
    fn test_consistent_snapshot_validates() {
        assert!(snapshot().validate().is_ok());
    }

    #[test]
    fn test_json_preserves_snapshot() {
        let original = snapshot();
        let decoded = LedgerSnapshot::from_json(&original.to_json().unwrap()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_unbalanced_snapshot_rejected() {
        let mut snap = snapshot();
        snap.balances.insert(AccountId::new("BOB"), Amount::new(1));

        assert!(matches!(
            snap.validate(),
            Err(VaultError::CorruptSnapshot(_))
        ));
    }

    #[test]
    fn test_over_cap_snapshot_rejected() {
        let mut snap = snapshot();
        snap.total_deposited = Amount::new(120);
        snap.total_withdrawn = Amount::new(50);

        assert!(matches!(
            snap.validate(),
            Err(VaultError::CorruptSnapshot(_))
        ));
    }

    #[test]
    fn test_zero_limit_snapshot_rejected() {
        let mut snap = snapshot();
        snap.withdraw_limit = Amount::ZERO;

        assert!(matches!(
            snap.validate(),
            Err(VaultError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn test_missing_event_buffer_defaults() {
        let mut value = serde_json::to_value(snapshot()).unwrap();
        value.as_object_mut().unwrap().remove("event_buffer");

        let decoded = LedgerSnapshot::from_json(&value.to_string()).unwrap();
        assert_eq!(decoded.event_buffer, VaultConfig::default().event_buffer);
    }

    #[test]
    fn test_garbage_json_rejected() {
        assert!(matches!(
            LedgerSnapshot::from_json("{not json"),
            Err(VaultError::SerializationError(_))
        ));
    }
}
