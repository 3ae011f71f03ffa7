//! End-to-end ledger scenarios.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use capvault_common::{AccountId, Amount, VaultError};
use capvault_ledger::{
    CallContext, FaultyTransferExecutor, LoggingTransferExecutor, TransferError,
    TransferExecutor, VaultConfig, VaultEvent, VaultLedger,
};
use parking_lot::Mutex;
use tokio::sync::Notify;

fn ledger_with(
    bank_cap: u128,
    withdraw_limit: u128,
    executor: Arc<dyn TransferExecutor>,
) -> VaultLedger {
    VaultLedger::new(
        VaultConfig::new(bank_cap, withdraw_limit),
        AccountId::new("DEPLOYER"),
        executor,
    )
    .unwrap()
}

fn account(id: &str) -> AccountId {
    AccountId::new(id)
}

#[test]
fn test_zero_bank_cap_is_invalid() {
    let result = VaultLedger::new(
        VaultConfig::new(0u128, 10u128),
        account("DEPLOYER"),
        Arc::new(LoggingTransferExecutor::new()),
    );

    assert_eq!(
        result.err(),
        Some(VaultError::invalid_configuration(0, 10))
    );
}

#[tokio::test]
async fn test_cap_and_limit_scenario() {
    let ledger = ledger_with(100, 50, Arc::new(LoggingTransferExecutor::new()));

    ledger.deposit(&CallContext::new("A", 100u128)).unwrap();
    assert_eq!(ledger.balance_of(&account("A")), Amount::new(100));
    assert_eq!(ledger.stats().total_deposited, Amount::new(100));

    assert_eq!(
        ledger.deposit(&CallContext::new("B", 1u128)),
        Err(VaultError::ExceedsBankCap {
            attempted: Amount::new(1),
            remaining: Amount::ZERO,
        })
    );

    let a = CallContext::without_value("A");
    assert_eq!(
        ledger.withdraw(&a, Amount::new(60)).await,
        Err(VaultError::ExceedsWithdrawLimit {
            attempted: Amount::new(60),
            limit: Amount::new(50),
        })
    );

    ledger.withdraw(&a, Amount::new(50)).await.unwrap();
    assert_eq!(ledger.balance_of(&account("A")), Amount::new(50));
    assert_eq!(ledger.stats().total_withdrawn, Amount::new(50));
    assert!(ledger.verify_integrity().is_ok());
}

#[tokio::test]
async fn test_withdraw_without_balance() {
    let ledger = ledger_with(100, 50, Arc::new(LoggingTransferExecutor::new()));
    ledger.deposit(&CallContext::new("A", 30u128)).unwrap();
    let before = ledger.stats();

    assert_eq!(
        ledger
            .withdraw(&CallContext::without_value("C"), Amount::new(1))
            .await,
        Err(VaultError::InsufficientBalance {
            attempted: Amount::new(1),
            balance: Amount::ZERO,
        })
    );

    assert_eq!(ledger.stats(), before);
    assert_eq!(ledger.balance_of(&account("C")), Amount::ZERO);
}

#[tokio::test]
async fn test_zero_withdraw_rejected() {
    let ledger = ledger_with(100, 50, Arc::new(LoggingTransferExecutor::new()));
    ledger.deposit(&CallContext::new("A", 30u128)).unwrap();

    assert_eq!(
        ledger
            .withdraw(&CallContext::without_value("A"), Amount::ZERO)
            .await,
        Err(VaultError::ZeroAmount)
    );
}

#[test]
fn test_exact_remaining_fills_cap() {
    let ledger = ledger_with(100, 50, Arc::new(LoggingTransferExecutor::new()));
    ledger.deposit(&CallContext::new("A", 30u128)).unwrap();

    let remaining = ledger.stats().remaining_capacity();
    assert_eq!(remaining, Amount::new(70));

    assert_eq!(
        ledger.deposit(&CallContext::new("B", 71u128)),
        Err(VaultError::ExceedsBankCap {
            attempted: Amount::new(71),
            remaining: Amount::new(70),
        })
    );

    ledger.deposit(&CallContext::new("B", remaining)).unwrap();
    assert_eq!(ledger.stats().total_deposited, Amount::new(100));
}

#[tokio::test]
async fn test_limit_boundary_independent_of_balance() {
    let ledger = ledger_with(1_000, 50, Arc::new(LoggingTransferExecutor::new()));
    ledger.deposit(&CallContext::new("A", 500u128)).unwrap();
    let a = CallContext::without_value("A");

    assert!(matches!(
        ledger.withdraw(&a, Amount::new(51)).await,
        Err(VaultError::ExceedsWithdrawLimit { .. })
    ));
    ledger.withdraw(&a, Amount::new(50)).await.unwrap();
    assert_eq!(ledger.balance_of(&account("A")), Amount::new(450));
}

#[tokio::test]
async fn test_transfer_failure_leaves_state_unchanged() {
    let executor = Arc::new(FaultyTransferExecutor::new(0.0, Some(3)));
    let ledger = ledger_with(100, 50, executor.clone());
    ledger.deposit(&CallContext::new("A", 80u128)).unwrap();
    executor.block(account("A"));
    let before = ledger.stats();

    let result = ledger
        .withdraw(&CallContext::without_value("A"), Amount::new(40))
        .await;

    match result {
        Err(VaultError::TransferFailed {
            recipient, amount, ..
        }) => {
            assert_eq!(recipient, account("A"));
            assert_eq!(amount, Amount::new(40));
        }
        other => panic!("expected TransferFailed, got {:?}", other),
    }
    assert_eq!(ledger.balance_of(&account("A")), Amount::new(80));
    assert_eq!(ledger.stats(), before);
    assert_eq!(executor.paid_to(&account("A")), Amount::ZERO);

    executor.unblock(&account("A"));
    ledger
        .withdraw(&CallContext::without_value("A"), Amount::new(40))
        .await
        .unwrap();
    assert_eq!(executor.paid_to(&account("A")), Amount::new(40));
}

#[test]
fn test_reads_are_repeatable() {
    let ledger = ledger_with(100, 50, Arc::new(LoggingTransferExecutor::new()));
    ledger.deposit(&CallContext::new("A", 30u128)).unwrap();

    assert_eq!(ledger.stats(), ledger.stats());
    assert_eq!(ledger.balance_of(&account("A")), ledger.balance_of(&account("A")));
    assert_eq!(ledger.snapshot().balances, ledger.snapshot().balances);
}

#[tokio::test]
async fn test_events_follow_commit_order() {
    let ledger = ledger_with(100, 50, Arc::new(LoggingTransferExecutor::new()));
    let mut events = ledger.subscribe();

    ledger.deposit(&CallContext::new("A", 30u128)).unwrap();
    ledger
        .withdraw(&CallContext::without_value("A"), Amount::new(10))
        .await
        .unwrap();

    let first = events.recv().await.unwrap();
    let second = events.recv().await.unwrap();

    assert_eq!(first.sequence, 1);
    assert_eq!(
        first.event,
        VaultEvent::Deposit {
            account: account("A"),
            amount: Amount::new(30),
            balance_after: Amount::new(30),
        }
    );
    assert_eq!(second.sequence, 2);
    assert_eq!(
        second.event,
        VaultEvent::Withdrawal {
            account: account("A"),
            amount: Amount::new(10),
            balance_after: Amount::new(20),
        }
    );
}

/// Executor that tries to withdraw again for the same recipient while the
/// first withdrawal's transfer is in flight.
struct ReentrantExecutor {
    ledger: Mutex<Weak<VaultLedger>>,
    reentrant_result: Mutex<Option<Result<(), VaultError>>>,
    balance_seen: Mutex<Option<Amount>>,
}

impl ReentrantExecutor {
    fn new() -> Self {
        Self {
            ledger: Mutex::new(Weak::new()),
            reentrant_result: Mutex::new(None),
            balance_seen: Mutex::new(None),
        }
    }
}

#[async_trait]
impl TransferExecutor for ReentrantExecutor {
    fn name(&self) -> &str {
        "reentrant"
    }

    async fn transfer(&self, recipient: &AccountId, amount: Amount) -> Result<(), TransferError> {
        let ledger = self.ledger.lock().upgrade();
        let Some(ledger) = ledger else {
            return Ok(());
        };

        if self.reentrant_result.lock().is_some() {
            return Ok(());
        }
        *self.balance_seen.lock() = Some(ledger.balance_of(recipient));
        // Mark before re-entering so the nested transfer does not recurse again
        *self.reentrant_result.lock() = Some(Ok(()));

        let ctx = CallContext::without_value(recipient.clone());
        let result = ledger.withdraw(&ctx, amount).await.map(|_| ());
        *self.reentrant_result.lock() = Some(result);
        Ok(())
    }
}

#[tokio::test]
async fn test_reentrant_withdraw_sees_debited_balance() {
    let executor = Arc::new(ReentrantExecutor::new());
    let ledger = Arc::new(ledger_with(100, 50, executor.clone()));
    *executor.ledger.lock() = Arc::downgrade(&ledger);

    ledger.deposit(&CallContext::new("A", 40u128)).unwrap();
    ledger
        .withdraw(&CallContext::without_value("A"), Amount::new(40))
        .await
        .unwrap();

    assert_eq!(*executor.balance_seen.lock(), Some(Amount::ZERO));
    assert_eq!(
        executor.reentrant_result.lock().clone(),
        Some(Err(VaultError::InsufficientBalance {
            attempted: Amount::new(40),
            balance: Amount::ZERO,
        }))
    );
    assert_eq!(ledger.balance_of(&account("A")), Amount::ZERO);
    assert_eq!(ledger.stats().withdraw_count, 1);
    assert!(ledger.verify_integrity().is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_operations_preserve_invariants() {
    let executor = Arc::new(FaultyTransferExecutor::new(0.2, Some(42)));
    let ledger = Arc::new(ledger_with(10_000, 25, executor.clone()));

    let mut handles = Vec::new();
    for i in 0..8 {
        let ledger = ledger.clone();
        handles.push(tokio::spawn(async move {
            let id = format!("ACCOUNT_{}", i % 4);
            for n in 0..50u128 {
                let _ = ledger.deposit(&CallContext::new(id.as_str(), n % 7 + 1));
                let _ = ledger
                    .withdraw(&CallContext::without_value(id.as_str()), Amount::new(n % 5 + 1))
                    .await;
            }
        }));
    }

    for result in futures::future::join_all(handles).await {
        result.unwrap();
    }

    assert!(ledger.verify_integrity().is_ok());

    let stats = ledger.stats();
    let net = stats.net_deposits();
    assert_eq!(net, ledger.snapshot().balances.values().sum::<Amount>());
    assert_eq!(executor.total_paid(), stats.total_withdrawn);
    assert!(stats.total_deposited <= stats.bank_cap);
}

/// Executor whose first transfer parks until released, then fails. Later
/// transfers succeed immediately.
struct GatedExecutor {
    inner: LoggingTransferExecutor,
    calls: AtomicU64,
    entered: Notify,
    release: Notify,
}

impl GatedExecutor {
    fn new() -> Self {
        Self {
            inner: LoggingTransferExecutor::new(),
            calls: AtomicU64::new(0),
            entered: Notify::new(),
            release: Notify::new(),
        }
    }
}

#[async_trait]
impl TransferExecutor for GatedExecutor {
    fn name(&self) -> &str {
        "gated"
    }

    async fn transfer(&self, recipient: &AccountId, amount: Amount) -> Result<(), TransferError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            self.entered.notify_one();
            self.release.notified().await;
            return Err(TransferError::Rejected("gate closed".to_string()));
        }
        self.inner.transfer(recipient, amount).await
    }
}

#[tokio::test]
async fn test_cancelled_withdraw_is_rolled_back() {
    let executor = Arc::new(GatedExecutor::new());
    let ledger = ledger_with(100, 50, executor.clone());
    ledger.deposit(&CallContext::new("A", 40u128)).unwrap();
    let before = ledger.stats();
    let mut events = ledger.subscribe();

    let result = tokio::time::timeout(
        Duration::from_millis(20),
        ledger.withdraw(&CallContext::without_value("A"), Amount::new(30)),
    )
    .await;

    assert!(result.is_err());
    assert_eq!(ledger.balance_of(&account("A")), Amount::new(40));
    assert_eq!(ledger.stats(), before);
    assert_eq!(ledger.metrics().rollbacks, 1);
    assert!(events.try_recv().is_err());
    assert!(ledger.verify_integrity().is_ok());

    // The account is usable again with its full balance
    let receipt = ledger
        .withdraw(&CallContext::without_value("A"), Amount::new(40))
        .await
        .unwrap();
    assert_eq!(receipt.balance_after, Amount::ZERO);
    assert_eq!(executor.inner.paid_to(&account("A")), Amount::new(40));
}

#[tokio::test]
async fn test_pending_withdrawal_is_invisible_to_other_callers() {
    let executor = Arc::new(GatedExecutor::new());
    let ledger = Arc::new(ledger_with(100, 50, executor.clone()));
    ledger.deposit(&CallContext::new("A", 40u128)).unwrap();
    let before = ledger.stats();

    let first = {
        let ledger = ledger.clone();
        tokio::spawn(async move {
            ledger
                .withdraw(&CallContext::without_value("A"), Amount::new(30))
                .await
        })
    };
    executor.entered.notified().await;

    // Debit of the in-flight withdrawal is not observable from outside it
    assert_eq!(ledger.balance_of(&account("A")), Amount::new(40));
    assert_eq!(ledger.stats(), before);
    assert_eq!(
        ledger.snapshot().balances.get(&account("A")),
        Some(&Amount::new(40))
    );

    let second = {
        let ledger = ledger.clone();
        tokio::spawn(async move {
            ledger
                .withdraw(&CallContext::without_value("A"), Amount::new(20))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!second.is_finished());

    executor.release.notify_one();

    assert!(matches!(
        first.await.unwrap(),
        Err(VaultError::TransferFailed { .. })
    ));
    let receipt = second.await.unwrap().unwrap();
    assert_eq!(receipt.balance_after, Amount::new(20));

    let stats = ledger.stats();
    assert_eq!(stats.total_withdrawn, Amount::new(20));
    assert_eq!(stats.withdraw_count, 1);
    assert_eq!(ledger.balance_of(&account("A")), Amount::new(20));
}

#[tokio::test]
async fn test_other_accounts_proceed_during_pending_withdrawal() {
    let executor = Arc::new(GatedExecutor::new());
    let ledger = Arc::new(ledger_with(100, 50, executor.clone()));
    ledger.deposit(&CallContext::new("A", 40u128)).unwrap();
    ledger.deposit(&CallContext::new("B", 40u128)).unwrap();

    let first = {
        let ledger = ledger.clone();
        tokio::spawn(async move {
            ledger
                .withdraw(&CallContext::without_value("A"), Amount::new(30))
                .await
        })
    };
    executor.entered.notified().await;

    ledger
        .withdraw(&CallContext::without_value("B"), Amount::new(15))
        .await
        .unwrap();
    assert_eq!(ledger.balance_of(&account("B")), Amount::new(25));

    executor.release.notify_one();
    assert!(first.await.unwrap().is_err());
    assert_eq!(ledger.balance_of(&account("A")), Amount::new(40));
}
