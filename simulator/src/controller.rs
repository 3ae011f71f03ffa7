//! Simulation controller.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, ensure};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::RwLock;
use tracing::{info, warn};

use capvault_common::{AccountId, Amount, VaultError};
use capvault_ledger::{FaultyTransferExecutor, VaultConfig, VaultLedger};

use crate::metrics::{OperationKind, SimulationMetrics};
use crate::scenario::{Scenario, ScenarioStep};
use crate::wallet::{SimulatedWallet, WalletFactory};

/// Funds each simulated wallet starts with outside the vault.
const INITIAL_WALLET_FUNDS: u128 = 1_000_000_000;

/// Controls the simulation.
pub struct SimulationController {
    /// The ledger under test.
    ledger: Arc<VaultLedger>,
    /// Executor paying out withdrawals.
    executor: Arc<FaultyTransferExecutor>,
    /// Simulated wallets.
    wallets: Arc<Vec<SimulatedWallet>>,
    /// Simulation metrics.
    metrics: Arc<RwLock<SimulationMetrics>>,
    /// Random seed for workload generation.
    seed: Option<u64>,
}

impl SimulationController {
    /// Create a controller around a fresh ledger.
    pub fn new(
        config: VaultConfig,
        account_count: usize,
        failure_rate: f64,
        seed: Option<u64>,
    ) -> anyhow::Result<Self> {
        let executor = Arc::new(FaultyTransferExecutor::new(failure_rate, seed));
        let ledger = VaultLedger::new(config, AccountId::new("DEPLOYER"), executor.clone())?;
        let wallets = WalletFactory::create_wallets(account_count, Amount::new(INITIAL_WALLET_FUNDS));

        info!(
            accounts = account_count,
            failure_rate,
            "Simulation initialized"
        );

        Ok(Self {
            ledger: Arc::new(ledger),
            executor,
            wallets: Arc::new(wallets),
            metrics: Arc::new(RwLock::new(SimulationMetrics::new())),
            seed,
        })
    }

    /// The ledger under test.
    pub fn ledger(&self) -> &VaultLedger {
        &self.ledger
    }

    /// Run a random workload: one task per wallet, each issuing up to
    /// `ops_per_account` operations or stopping at `duration`.
    pub async fn run(&self, ops_per_account: u64, duration: Option<Duration>) -> anyhow::Result<()> {
        info!(ops_per_account, "Running random workload");

        let deadline = duration.map(|d| Instant::now() + d);
        let mut handles = Vec::with_capacity(self.wallets.len());

        for index in 0..self.wallets.len() {
            let ledger = self.ledger.clone();
            let wallets = self.wallets.clone();
            let metrics = self.metrics.clone();
            let mut rng = match self.seed {
                Some(s) => StdRng::seed_from_u64(s.wrapping_add(index as u64)),
                None => StdRng::from_entropy(),
            };

            handles.push(tokio::spawn(async move {
                let wallet = &wallets[index];
                let mut local = SimulationMetrics::new();
                let limit = ledger.config().withdraw_limit.units();

                for _ in 0..ops_per_account {
                    if deadline.is_some_and(|d| Instant::now() >= d) {
                        break;
                    }

                    let roll: u8 = rng.gen_range(0..100);
                    let started = Instant::now();
                    let (kind, outcome) = if roll < 45 {
                        let amount = Amount::new(rng.gen_range(0..=limit.saturating_mul(2)));
                        (OperationKind::Deposit, deposit(&ledger, wallet, amount).await)
                    } else if roll < 90 {
                        // Overshoot the limit now and then
                        let amount = Amount::new(rng.gen_range(0..=limit.saturating_add(limit / 5)));
                        (OperationKind::Withdraw, withdraw(&ledger, wallet, amount).await)
                    } else {
                        let amount = Amount::new(rng.gen_range(1..=limit));
                        (
                            OperationKind::DirectTransfer,
                            direct_transfer(&ledger, wallet, amount).await,
                        )
                    };

                    match outcome {
                        Ok(()) => local.record_success(kind, started.elapsed()),
                        Err(e) => local.record_failure(kind, e.error_code()),
                    }

                    tokio::task::yield_now().await;
                }

                metrics.write().await.merge(local);
            }));
        }

        for result in futures::future::join_all(handles).await {
            result?;
        }

        Ok(())
    }

    /// Run a scripted scenario, failing on the first unmet expectation.
    pub async fn run_scenario(&self, scenario: &Scenario) -> anyhow::Result<()> {
        info!(
            scenario = %scenario.name,
            description = %scenario.description,
            "Running scenario"
        );

        for (index, step) in scenario.steps.iter().enumerate() {
            self.execute_step(step)
                .await
                .map_err(|e| anyhow!("step {} ({:?}): {}", index + 1, step, e))?;
        }

        Ok(())
    }

    /// Execute a single scenario step.
    async fn execute_step(&self, step: &ScenarioStep) -> anyhow::Result<()> {
        match step {
            ScenarioStep::Deposit {
                account,
                amount,
                expect,
            } => {
                let wallet = self.wallet(account)?;
                let started = Instant::now();
                let outcome = deposit(&self.ledger, wallet, Amount::new(*amount)).await;
                self.check_outcome(OperationKind::Deposit, started, outcome, expect)
                    .await
            }
            ScenarioStep::Withdraw {
                account,
                amount,
                expect,
            } => {
                let wallet = self.wallet(account)?;
                let started = Instant::now();
                let outcome = withdraw(&self.ledger, wallet, Amount::new(*amount)).await;
                self.check_outcome(OperationKind::Withdraw, started, outcome, expect)
                    .await
            }
            ScenarioStep::DirectTransfer {
                account,
                amount,
                expect,
            } => {
                let wallet = self.wallet(account)?;
                let started = Instant::now();
                let outcome = direct_transfer(&self.ledger, wallet, Amount::new(*amount)).await;
                self.check_outcome(OperationKind::DirectTransfer, started, outcome, expect)
                    .await
            }
            ScenarioStep::FailTransfersTo { account } => {
                info!(account = %account, "Injecting transfer failures");
                self.executor.block(AccountId::new(account.as_str()));
                Ok(())
            }
            ScenarioStep::RestoreTransfers { account } => {
                info!(account = %account, "Clearing transfer failures");
                self.executor.unblock(&AccountId::new(account.as_str()));
                Ok(())
            }
            ScenarioStep::ExpectBalance { account, amount } => {
                let actual = self.ledger.balance_of(&AccountId::new(account.as_str()));
                ensure!(
                    actual == Amount::new(*amount),
                    "balance of {} is {}, expected {}",
                    account,
                    actual,
                    amount
                );
                Ok(())
            }
            ScenarioStep::ExpectTotals {
                total_deposited,
                total_withdrawn,
            } => {
                let stats = self.ledger.stats();
                ensure!(
                    stats.total_deposited == Amount::new(*total_deposited)
                        && stats.total_withdrawn == Amount::new(*total_withdrawn),
                    "totals are {}/{}, expected {}/{}",
                    stats.total_deposited,
                    stats.total_withdrawn,
                    total_deposited,
                    total_withdrawn
                );
                Ok(())
            }
        }
    }

    async fn check_outcome(
        &self,
        kind: OperationKind,
        started: Instant,
        outcome: Result<(), VaultError>,
        expect: &Option<String>,
    ) -> anyhow::Result<()> {
        let mut metrics = self.metrics.write().await;
        match &outcome {
            Ok(()) => metrics.record_success(kind, started.elapsed()),
            Err(e) => metrics.record_failure(kind, e.error_code()),
        }

        match (outcome, expect) {
            (Ok(()), None) => Ok(()),
            (Err(e), Some(code)) if e.error_code() == code.as_str() => Ok(()),
            (Ok(()), Some(code)) => bail!("{} succeeded, expected {}", kind.label(), code),
            (Err(e), _) => bail!("{} failed with {}: {}", kind.label(), e.error_code(), e),
        }
    }

    fn wallet(&self, account: &str) -> anyhow::Result<&SimulatedWallet> {
        self.wallets
            .iter()
            .find(|w| w.id.as_str() == account)
            .ok_or_else(|| anyhow!("Wallet not found: {}", account))
    }

    /// Check that value was neither created nor destroyed.
    ///
    /// Every unit a wallet started with is either still in the wallet, held
    /// in the vault, or was paid back out by the executor.
    pub async fn verify(&self) -> anyhow::Result<()> {
        self.ledger.verify_integrity()?;

        let stats = self.ledger.stats();
        ensure!(
            self.executor.total_paid() == stats.total_withdrawn,
            "executor paid {} but ledger recorded {} withdrawn",
            self.executor.total_paid(),
            stats.total_withdrawn
        );

        for wallet in self.wallets.iter() {
            let account = wallet.caller();
            let external = wallet.external_balance().await;
            let held = self.ledger.balance_of(&account);
            let paid = self.executor.paid_to(&account);

            let accounted = external
                .checked_add(held)
                .and_then(|a| a.checked_add(paid))
                .ok_or_else(|| anyhow!("{} holdings overflow", account))?;
            if accounted != wallet.initial_balance() {
                warn!(
                    account = %account,
                    external = %external,
                    held = %held,
                    paid = %paid,
                    "Value not conserved"
                );
                bail!(
                    "{} accounts for {}, started with {}",
                    account,
                    accounted,
                    wallet.initial_balance()
                );
            }
        }

        info!("Ledger integrity verified");
        Ok(())
    }

    /// Get simulation metrics.
    pub async fn get_metrics(&self) -> SimulationMetrics {
        self.metrics.read().await.clone()
    }
}

/// Deposit from a wallet's external funds, refunding on rejection.
async fn deposit(
    ledger: &VaultLedger,
    wallet: &SimulatedWallet,
    amount: Amount,
) -> Result<(), VaultError> {
    let Some(ctx) = wallet.attach(amount).await else {
        return Err(VaultError::InsufficientBalance {
            attempted: amount,
            balance: wallet.external_balance().await,
        });
    };

    match ledger.deposit(&ctx) {
        Ok(_) => Ok(()),
        Err(e) => {
            wallet.refund(amount).await;
            Err(e)
        }
    }
}

/// Withdraw to a wallet. The payout is tracked by the executor.
async fn withdraw(
    ledger: &VaultLedger,
    wallet: &SimulatedWallet,
    amount: Amount,
) -> Result<(), VaultError> {
    ledger.withdraw(&wallet.call(), amount).await.map(|_| ())
}

/// Send value without going through deposit; the vault must bounce it.
async fn direct_transfer(
    ledger: &VaultLedger,
    wallet: &SimulatedWallet,
    amount: Amount,
) -> Result<(), VaultError> {
    let Some(ctx) = wallet.attach(amount).await else {
        return Err(VaultError::InsufficientBalance {
            attempted: amount,
            balance: wallet.external_balance().await,
        });
    };

    let result = ledger.receive_direct(&ctx);
    if result.is_err() {
        wallet.refund(amount).await;
    }
    result
}
