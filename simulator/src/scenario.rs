//! Scripted simulation scenarios.

use serde::{Deserialize, Serialize};

/// A scripted scenario run against a fresh ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Scenario name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Ledger bank cap for this scenario.
    pub bank_cap: u128,
    /// Ledger withdraw limit for this scenario.
    pub withdraw_limit: u128,
    /// Steps in the scenario.
    pub steps: Vec<ScenarioStep>,
}

/// A step in a scenario.
///
/// Action steps carry the error code they are expected to fail with, or
/// `None` if they must succeed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScenarioStep {
    /// Deposit from a wallet.
    Deposit {
        account: String,
        amount: u128,
        expect: Option<String>,
    },
    /// Withdraw to a wallet.
    Withdraw {
        account: String,
        amount: u128,
        expect: Option<String>,
    },
    /// Send value to the vault without calling deposit.
    DirectTransfer {
        account: String,
        amount: u128,
        expect: Option<String>,
    },
    /// Make every outbound transfer to an account fail.
    FailTransfersTo { account: String },
    /// Let transfers to an account succeed again.
    RestoreTransfers { account: String },
    /// Check an account's vault balance.
    ExpectBalance { account: String, amount: u128 },
    /// Check the ledger accumulators.
    ExpectTotals {
        total_deposited: u128,
        total_withdrawn: u128,
    },
}

fn ok() -> Option<String> {
    None
}

fn fails(code: &str) -> Option<String> {
    Some(code.to_string())
}

impl Scenario {
    /// Names of the built-in scenarios.
    pub const NAMES: [&'static str; 4] = ["basic", "bank-cap", "transfer-failure", "direct-transfer"];

    /// Load a built-in scenario by name, or a scenario file ending in `.json`.
    pub fn load(name: &str) -> anyhow::Result<Self> {
        if name.ends_with(".json") {
            let raw = std::fs::read_to_string(name)?;
            return Ok(serde_json::from_str(&raw)?);
        }

        match name {
            "basic" => Ok(Self::basic()),
            "bank-cap" => Ok(Self::bank_cap()),
            "transfer-failure" => Ok(Self::transfer_failure()),
            "direct-transfer" => Ok(Self::direct_transfer()),
            _ => Err(anyhow::anyhow!(
                "Unknown scenario: {} (known: {})",
                name,
                Self::NAMES.join(", ")
            )),
        }
    }

    /// Deposit, withdraw and the per-withdrawal limit.
    fn basic() -> Self {
        Self {
            name: "basic".to_string(),
            description: "Deposit then withdraw within and beyond the limit".to_string(),
            bank_cap: 100,
            withdraw_limit: 50,
            steps: vec![
                ScenarioStep::Deposit {
                    account: "ALICE".to_string(),
                    amount: 100,
                    expect: ok(),
                },
                ScenarioStep::Withdraw {
                    account: "ALICE".to_string(),
                    amount: 60,
                    expect: fails("EXCEEDS_WITHDRAW_LIMIT"),
                },
                ScenarioStep::Withdraw {
                    account: "ALICE".to_string(),
                    amount: 50,
                    expect: ok(),
                },
                ScenarioStep::Withdraw {
                    account: "CAROL".to_string(),
                    amount: 1,
                    expect: fails("INSUFFICIENT_BALANCE"),
                },
                ScenarioStep::Withdraw {
                    account: "ALICE".to_string(),
                    amount: 0,
                    expect: fails("ZERO_AMOUNT"),
                },
                ScenarioStep::ExpectBalance {
                    account: "ALICE".to_string(),
                    amount: 50,
                },
                ScenarioStep::ExpectTotals {
                    total_deposited: 100,
                    total_withdrawn: 50,
                },
            ],
        }
    }

    /// Filling the pool to exactly its cap.
    fn bank_cap() -> Self {
        Self {
            name: "bank-cap".to_string(),
            description: "Fill the vault to its cap and try to exceed it".to_string(),
            bank_cap: 100,
            withdraw_limit: 50,
            steps: vec![
                ScenarioStep::Deposit {
                    account: "ALICE".to_string(),
                    amount: 70,
                    expect: ok(),
                },
                ScenarioStep::Deposit {
                    account: "BOB".to_string(),
                    amount: 31,
                    expect: fails("EXCEEDS_BANK_CAP"),
                },
                ScenarioStep::Deposit {
                    account: "BOB".to_string(),
                    amount: 30,
                    expect: ok(),
                },
                ScenarioStep::Deposit {
                    account: "CAROL".to_string(),
                    amount: 1,
                    expect: fails("EXCEEDS_BANK_CAP"),
                },
                // Withdrawals do not free capacity: the cap bounds lifetime deposits
                ScenarioStep::Withdraw {
                    account: "BOB".to_string(),
                    amount: 30,
                    expect: ok(),
                },
                ScenarioStep::Deposit {
                    account: "CAROL".to_string(),
                    amount: 1,
                    expect: fails("EXCEEDS_BANK_CAP"),
                },
                ScenarioStep::ExpectTotals {
                    total_deposited: 100,
                    total_withdrawn: 30,
                },
            ],
        }
    }

    /// A failed payout rolls back the withdrawal.
    fn transfer_failure() -> Self {
        Self {
            name: "transfer-failure".to_string(),
            description: "Outbound transfer fails and the withdrawal is reverted".to_string(),
            bank_cap: 1_000,
            withdraw_limit: 100,
            steps: vec![
                ScenarioStep::Deposit {
                    account: "ALICE".to_string(),
                    amount: 200,
                    expect: ok(),
                },
                ScenarioStep::FailTransfersTo {
                    account: "ALICE".to_string(),
                },
                ScenarioStep::Withdraw {
                    account: "ALICE".to_string(),
                    amount: 80,
                    expect: fails("TRANSFER_FAILED"),
                },
                ScenarioStep::ExpectBalance {
                    account: "ALICE".to_string(),
                    amount: 200,
                },
                ScenarioStep::ExpectTotals {
                    total_deposited: 200,
                    total_withdrawn: 0,
                },
                ScenarioStep::RestoreTransfers {
                    account: "ALICE".to_string(),
                },
                ScenarioStep::Withdraw {
                    account: "ALICE".to_string(),
                    amount: 80,
                    expect: ok(),
                },
                ScenarioStep::ExpectBalance {
                    account: "ALICE".to_string(),
                    amount: 120,
                },
            ],
        }
    }

    /// Value sent outside the deposit path is refused.
    fn direct_transfer() -> Self {
        Self {
            name: "direct-transfer".to_string(),
            description: "Direct value transfers are rejected without crediting".to_string(),
            bank_cap: 1_000,
            withdraw_limit: 100,
            steps: vec![
                ScenarioStep::DirectTransfer {
                    account: "BOB".to_string(),
                    amount: 25,
                    expect: fails("DIRECT_DEPOSIT_NOT_ALLOWED"),
                },
                ScenarioStep::ExpectBalance {
                    account: "BOB".to_string(),
                    amount: 0,
                },
                ScenarioStep::Deposit {
                    account: "BOB".to_string(),
                    amount: 25,
                    expect: ok(),
                },
                ScenarioStep::ExpectTotals {
                    total_deposited: 25,
                    total_withdrawn: 0,
                },
            ],
        }
    }
}
