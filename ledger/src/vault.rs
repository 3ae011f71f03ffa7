//! Core vault ledger implementation.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, Mutex as AsyncMutex};
use tracing::{info, instrument, warn};

use capvault_common::{AccountId, Amount, Result, VaultError};

use crate::config::VaultConfig;
use crate::events::{EventEnvelope, EventPublisher, VaultEvent};
use crate::identity::CallContext;
use crate::metrics::{MetricsSnapshot, SharedMetrics, VaultMetrics};
use crate::snapshot::{check_accounting, LedgerSnapshot};
use crate::transfer::TransferExecutor;

tokio::task_local! {
    /// Accounts whose outbound transfer the current task is executing.
    static IN_TRANSFER: Vec<AccountId>;
}

/// Accounts with a transfer in flight on the current task, innermost last.
fn transfer_scope() -> Vec<AccountId> {
    IN_TRANSFER.try_with(|accounts| accounts.clone()).unwrap_or_default()
}

/// Aggregate vault statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VaultStats {
    pub bank_cap: Amount,
    pub withdraw_limit: Amount,
    pub total_deposited: Amount,
    pub total_withdrawn: Amount,
    pub deposit_count: u64,
    pub withdraw_count: u64,
}

impl VaultStats {
    /// Value that can still be deposited before hitting the cap.
    pub fn remaining_capacity(&self) -> Amount {
        self.bank_cap.saturating_sub(self.total_deposited)
    }

    /// Value currently held for accounts.
    pub fn net_deposits(&self) -> Amount {
        self.total_deposited.saturating_sub(self.total_withdrawn)
    }
}

/// Outcome of a successful deposit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositReceipt {
    pub account: AccountId,
    pub amount: Amount,
    pub balance_after: Amount,
    /// Sequence of the emitted `Deposit` event.
    pub sequence: u64,
}

/// Outcome of a successful withdrawal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawalReceipt {
    pub account: AccountId,
    pub amount: Amount,
    pub balance_after: Amount,
    /// Sequence of the emitted `Withdrawal` event.
    pub sequence: u64,
}

/// Debits applied to an account whose transfers have not completed yet.
#[derive(Debug, Default, Clone, Copy)]
struct PendingDebit {
    amount: Amount,
    count: u64,
}

/// Mutable accounting state, always accessed under one lock.
///
/// `balances` and the accumulators hold committed values only. Debits of
/// withdrawals whose transfer is still running live in `pending` and are
/// visible only to calls made from inside that transfer.
#[derive(Debug, Default)]
struct LedgerState {
    balances: HashMap<AccountId, Amount>,
    pending: HashMap<AccountId, PendingDebit>,
    total_deposited: Amount,
    total_withdrawn: Amount,
    deposit_count: u64,
    withdraw_count: u64,
    last_sequence: u64,
}

impl LedgerState {
    fn committed_balance(&self, account: &AccountId) -> Amount {
        self.balances.get(account).copied().unwrap_or(Amount::ZERO)
    }

    fn pending_debit(&self, account: &AccountId) -> PendingDebit {
        self.pending.get(account).copied().unwrap_or_default()
    }

    /// Committed balance minus every in-flight debit of the account.
    fn available(&self, account: &AccountId) -> Amount {
        self.committed_balance(account)
            .saturating_sub(self.pending_debit(account).amount)
    }

    /// Balance as seen by a caller running inside the transfers in `scope`.
    fn visible_balance(&self, account: &AccountId, scope: &[AccountId]) -> Amount {
        if scope.contains(account) {
            self.available(account)
        } else {
            self.committed_balance(account)
        }
    }

    fn release_pending(&mut self, account: &AccountId, amount: Amount) {
        if let Some(debit) = self.pending.get_mut(account) {
            debit.amount = debit.amount.saturating_sub(amount);
            debit.count = debit.count.saturating_sub(1);
            if debit.count == 0 {
                self.pending.remove(account);
            }
        }
    }

    fn next_sequence(&mut self) -> u64 {
        self.last_sequence += 1;
        self.last_sequence
    }
}

/// The vault ledger: per-account balances in a capped shared pool.
///
/// Deposits and the check-and-debit half of every withdrawal run under a
/// single state lock. A withdrawal then holds its account's turn until the
/// transfer executor finishes, so other withdrawals on that account wait and
/// never see a debit that may still be rolled back. Calls the executor makes
/// back into the ledger on the same task skip the wait and observe the
/// debited balance.
pub struct VaultLedger {
    config: VaultConfig,
    deployer: AccountId,
    state: Mutex<LedgerState>,
    account_turns: DashMap<AccountId, Arc<AsyncMutex<()>>>,
    executor: Arc<dyn TransferExecutor>,
    events: EventPublisher,
    metrics: SharedMetrics,
}

/// A withdrawal debit awaiting its transfer.
///
/// Dropping it without [`PendingWithdrawal::commit`] releases the debit,
/// including when the `withdraw` future itself is dropped mid-transfer.
struct PendingWithdrawal<'a> {
    ledger: &'a VaultLedger,
    account: &'a AccountId,
    amount: Amount,
    settled: bool,
}

impl PendingWithdrawal<'_> {
    /// Turn the pending debit into a committed withdrawal and emit its event.
    fn commit(mut self) -> Result<(Amount, u64)> {
        let mut state = self.ledger.state.lock();

        let balance = state
            .committed_balance(self.account)
            .checked_sub(self.amount)
            .ok_or_else(|| overflow("balance"))?;
        let total_withdrawn = state
            .total_withdrawn
            .checked_add(self.amount)
            .ok_or_else(|| overflow("total withdrawn"))?;

        state.balances.insert(self.account.clone(), balance);
        state.release_pending(self.account, self.amount);
        state.total_withdrawn = total_withdrawn;
        state.withdraw_count += 1;
        self.settled = true;

        // Still net of any outer transfer on this task for the same account
        let balance_after = state.available(self.account);
        let sequence = state.next_sequence();
        self.ledger.events.publish(EventEnvelope::new(
            sequence,
            VaultEvent::Withdrawal {
                account: self.account.clone(),
                amount: self.amount,
                balance_after,
            },
        ));

        Ok((balance_after, sequence))
    }
}

impl Drop for PendingWithdrawal<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }

        self.ledger
            .state
            .lock()
            .release_pending(self.account, self.amount);
        self.ledger.metrics.rolled_back();

        info!(
            account = %self.account,
            amount = %self.amount,
            "Withdrawal rolled back"
        );
    }
}

impl VaultLedger {
    /// Create a ledger owned by `deployer`.
    pub fn new(
        config: VaultConfig,
        deployer: AccountId,
        executor: Arc<dyn TransferExecutor>,
    ) -> Result<Self> {
        config.validate()?;

        info!(
            deployer = %deployer,
            bank_cap = %config.bank_cap,
            withdraw_limit = %config.withdraw_limit,
            executor = executor.name(),
            "Vault ledger created"
        );

        Ok(Self {
            events: EventPublisher::new(config.event_buffer),
            config,
            deployer,
            state: Mutex::new(LedgerState::default()),
            account_turns: DashMap::new(),
            executor,
            metrics: Arc::new(VaultMetrics::new()),
        })
    }

    /// Rebuild a ledger from a persisted snapshot.
    pub fn restore(snapshot: LedgerSnapshot, executor: Arc<dyn TransferExecutor>) -> Result<Self> {
        snapshot.validate()?;

        let ledger = Self::new(snapshot.config(), snapshot.deployer, executor)?;
        {
            let mut state = ledger.state.lock();
            state.balances = snapshot.balances.into_iter().collect();
            state.total_deposited = snapshot.total_deposited;
            state.total_withdrawn = snapshot.total_withdrawn;
            state.deposit_count = snapshot.deposit_count;
            state.withdraw_count = snapshot.withdraw_count;
            state.last_sequence = snapshot.last_sequence;
        }

        info!(
            accounts = ledger.account_count(),
            taken_at = %snapshot.taken_at,
            "Vault ledger restored"
        );

        Ok(ledger)
    }

    /// Credit the value attached to the call to the caller's own balance.
    #[instrument(skip_all, fields(account = %ctx.caller, amount = %ctx.value))]
    pub fn deposit(&self, ctx: &CallContext) -> Result<DepositReceipt> {
        self.metrics.deposit_attempted();

        let account = &ctx.caller;
        let amount = ctx.value;
        let scope = transfer_scope();

        let mut state = self.state.lock();

        if amount.is_zero() {
            return Err(self.reject("deposit", VaultError::ZeroAmount));
        }

        let remaining = self.config.bank_cap.saturating_sub(state.total_deposited);
        if amount > remaining {
            return Err(self.reject(
                "deposit",
                VaultError::ExceedsBankCap {
                    attempted: amount,
                    remaining,
                },
            ));
        }

        // amount <= remaining keeps both sums at or below the cap
        let balance = state
            .committed_balance(account)
            .checked_add(amount)
            .ok_or_else(|| overflow("balance"))?;
        let total_deposited = state
            .total_deposited
            .checked_add(amount)
            .ok_or_else(|| overflow("total deposited"))?;

        state.balances.insert(account.clone(), balance);
        state.total_deposited = total_deposited;
        state.deposit_count += 1;

        let balance_after = state.visible_balance(account, &scope);
        let sequence = state.next_sequence();
        self.events.publish(EventEnvelope::new(
            sequence,
            VaultEvent::Deposit {
                account: account.clone(),
                amount,
                balance_after,
            },
        ));
        drop(state);

        info!(
            account = %account,
            amount = %amount,
            balance_after = %balance_after,
            "Deposit credited"
        );

        Ok(DepositReceipt {
            account: account.clone(),
            amount,
            balance_after,
            sequence,
        })
    }

    /// Debit the caller's balance and transfer `amount` out to the caller.
    ///
    /// The debit is recorded before the executor runs. If the executor fails,
    /// or this future is dropped before it finishes, the debit is released
    /// and nothing is committed.
    #[instrument(skip_all, fields(account = %ctx.caller, amount = %amount))]
    pub async fn withdraw(&self, ctx: &CallContext, amount: Amount) -> Result<WithdrawalReceipt> {
        self.metrics.withdrawal_attempted();

        if !ctx.value.is_zero() {
            return Err(self.reject_direct(ctx));
        }

        let account = &ctx.caller;
        let mut scope = transfer_scope();

        // A call from inside this account's own transfer already holds the turn
        let _turn = if scope.contains(account) {
            None
        } else {
            let turn = self.account_turn(account);
            Some(turn.lock_owned().await)
        };

        let pending = self.reserve_withdrawal(account, amount)?;

        scope.push(account.clone());
        let transferred = IN_TRANSFER
            .scope(scope, self.executor.transfer(account, amount))
            .await;

        if let Err(e) = transferred {
            self.metrics.transfer_failed();
            drop(pending);

            warn!(
                account = %account,
                amount = %amount,
                executor = self.executor.name(),
                error = %e,
                "Transfer failed, withdrawal rolled back"
            );

            return Err(VaultError::TransferFailed {
                recipient: account.clone(),
                amount,
                reason: e.to_string(),
            });
        }

        let (balance_after, sequence) = pending.commit()?;

        info!(
            account = %account,
            amount = %amount,
            balance_after = %balance_after,
            "Withdrawal completed"
        );

        Ok(WithdrawalReceipt {
            account: account.clone(),
            amount,
            balance_after,
            sequence,
        })
    }

    /// Entry point for value sent without calling `deposit`. Always fails.
    ///
    /// Value that cannot be attributed to an account is never absorbed.
    pub fn receive_direct(&self, ctx: &CallContext) -> Result<()> {
        Err(self.reject_direct(ctx))
    }

    /// Balance of an account; zero if it never deposited.
    ///
    /// Called from inside the account's own transfer, the in-flight debit is
    /// already subtracted.
    pub fn balance_of(&self, account: &AccountId) -> Amount {
        let scope = transfer_scope();
        self.state.lock().visible_balance(account, &scope)
    }

    /// Aggregate statistics, read atomically.
    pub fn stats(&self) -> VaultStats {
        let scope = transfer_scope();
        let state = self.state.lock();

        let mut stats = VaultStats {
            bank_cap: self.config.bank_cap,
            withdraw_limit: self.config.withdraw_limit,
            total_deposited: state.total_deposited,
            total_withdrawn: state.total_withdrawn,
            deposit_count: state.deposit_count,
            withdraw_count: state.withdraw_count,
        };

        let mut seen: Vec<&AccountId> = Vec::with_capacity(scope.len());
        for account in &scope {
            if seen.contains(&account) {
                continue;
            }
            seen.push(account);

            let debit = state.pending_debit(account);
            stats.total_withdrawn = stats
                .total_withdrawn
                .checked_add(debit.amount)
                .unwrap_or(Amount::MAX);
            stats.withdraw_count += debit.count;
        }

        stats
    }

    /// Identity that created the ledger.
    pub fn deployer(&self) -> &AccountId {
        &self.deployer
    }

    /// Ledger configuration.
    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    /// Number of accounts that ever deposited.
    pub fn account_count(&self) -> usize {
        self.state.lock().balances.len()
    }

    /// Subscribe to deposit and withdrawal events.
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.events.subscribe()
    }

    /// Operational metrics.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Shared handle to the metrics counters.
    pub fn shared_metrics(&self) -> SharedMetrics {
        self.metrics.clone()
    }

    /// Capture the committed accounting state.
    ///
    /// Withdrawals whose transfer is still running are not included.
    pub fn snapshot(&self) -> LedgerSnapshot {
        let state = self.state.lock();
        LedgerSnapshot {
            bank_cap: self.config.bank_cap,
            withdraw_limit: self.config.withdraw_limit,
            deployer: self.deployer.clone(),
            total_deposited: state.total_deposited,
            total_withdrawn: state.total_withdrawn,
            deposit_count: state.deposit_count,
            withdraw_count: state.withdraw_count,
            last_sequence: state.last_sequence,
            event_buffer: self.config.event_buffer,
            balances: state
                .balances
                .iter()
                .map(|(account, balance)| (account.clone(), *balance))
                .collect(),
            taken_at: Utc::now(),
        }
    }

    /// Verify the ledger invariants against committed state.
    pub fn verify_integrity(&self) -> Result<()> {
        let state = self.state.lock();
        check_accounting(
            self.config.bank_cap,
            state.total_deposited,
            state.total_withdrawn,
            state.balances.iter(),
        )
    }

    fn account_turn(&self, account: &AccountId) -> Arc<AsyncMutex<()>> {
        self.account_turns
            .entry(account.clone())
            .or_default()
            .value()
            .clone()
    }

    /// Validate a withdrawal and record its debit as pending.
    fn reserve_withdrawal<'a>(
        &'a self,
        account: &'a AccountId,
        amount: Amount,
    ) -> Result<PendingWithdrawal<'a>> {
        let mut state = self.state.lock();

        if amount.is_zero() {
            return Err(self.reject("withdraw", VaultError::ZeroAmount));
        }

        if amount > self.config.withdraw_limit {
            return Err(self.reject(
                "withdraw",
                VaultError::ExceedsWithdrawLimit {
                    attempted: amount,
                    limit: self.config.withdraw_limit,
                },
            ));
        }

        let balance = state.available(account);
        if amount > balance {
            return Err(self.reject(
                "withdraw",
                VaultError::InsufficientBalance {
                    attempted: amount,
                    balance,
                },
            ));
        }

        // amount <= available, so the pending sum stays within the balance
        let debit = state.pending.entry(account.clone()).or_default();
        debit.amount = debit
            .amount
            .checked_add(amount)
            .ok_or_else(|| overflow("pending debit"))?;
        debit.count += 1;

        Ok(PendingWithdrawal {
            ledger: self,
            account,
            amount,
            settled: false,
        })
    }

    fn reject(&self, operation: &'static str, err: VaultError) -> VaultError {
        self.metrics.rejected();
        warn!(operation, code = err.error_code(), error = %err, "Operation rejected");
        err
    }

    fn reject_direct(&self, ctx: &CallContext) -> VaultError {
        self.metrics.direct_transfer_rejected();
        let err = VaultError::DirectDepositNotAllowed {
            sender: ctx.caller.clone(),
            value: ctx.value,
        };
        warn!(sender = %ctx.caller, value = %ctx.value, "Direct transfer rejected");
        err
    }
}

fn overflow(what: &str) -> VaultError {
    VaultError::ArithmeticOverflow(format!("{} overflow", what))
}
