//! Observable ledger events.

use capvault_common::{AccountId, Amount, EventId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// A committed change to an account's vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VaultEvent {
    /// Value was credited through the deposit path.
    Deposit {
        account: AccountId,
        amount: Amount,
        balance_after: Amount,
    },
    /// Value was debited and transferred out.
    Withdrawal {
        account: AccountId,
        amount: Amount,
        balance_after: Amount,
    },
}

impl VaultEvent {
    /// Account the event concerns.
    pub fn account(&self) -> &AccountId {
        match self {
            VaultEvent::Deposit { account, .. } | VaultEvent::Withdrawal { account, .. } => account,
        }
    }

    /// Amount moved.
    pub fn amount(&self) -> Amount {
        match self {
            VaultEvent::Deposit { amount, .. } | VaultEvent::Withdrawal { amount, .. } => *amount,
        }
    }

    /// Account balance once the event was applied.
    pub fn balance_after(&self) -> Amount {
        match self {
            VaultEvent::Deposit { balance_after, .. }
            | VaultEvent::Withdrawal { balance_after, .. } => *balance_after,
        }
    }
}

/// An event with its delivery metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique event ID.
    pub id: EventId,
    /// Position in the ledger's event order, starting at 1.
    pub sequence: u64,
    /// When the event was emitted.
    pub emitted_at: DateTime<Utc>,
    /// The event itself.
    pub event: VaultEvent,
}

impl EventEnvelope {
    /// Wrap an event.
    pub fn new(sequence: u64, event: VaultEvent) -> Self {
        Self {
            id: EventId::new(),
            sequence,
            emitted_at: Utc::now(),
            event,
        }
    }
}

/// Fan-out of ledger events to any number of subscribers.
///
/// Slow subscribers lag and lose the oldest events; the ledger never waits
/// for them.
pub struct EventPublisher {
    tx: broadcast::Sender<EventEnvelope>,
}

impl EventPublisher {
    /// Create a publisher buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }

    /// Publish an event, returning how many subscribers received it.
    pub fn publish(&self, envelope: EventEnvelope) -> usize {
        // No subscribers is not an error
        self.tx.send(envelope).unwrap_or(0)
    }

    /// Current number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
