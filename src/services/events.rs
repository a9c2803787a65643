//! Event system for ledger operations
//!
//! Provides an event bus for notifying listeners about ledger changes.
//! Useful for:
//! - Audit logging
//! - Real-time notifications (badge unlocked, challenge completed)
//! - Leaderboard cache invalidation

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, trace};

/// Ledger events emitted by the disposal ledger and services
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerEvent {
    DisposalRecorded {
        disposal_id: String,
        user_id: String,
        weight_kg: f64,
    },
    TotalsUpdated {
        user_id: String,
        waste_kg: f64,
        points: i64,
        level: i64,
    },
    ExperienceLogged {
        user_id: String,
        xp: i64,
        reason: String,
    },
    BadgeAwarded {
        user_id: String,
        badge_id: String,
    },
    ChallengeJoined {
        user_id: String,
        challenge_id: String,
    },
    ChallengeCompleted {
        user_id: String,
        challenge_id: String,
        reward_xp: i64,
    },
    TotalsReconciled {
        user_id: String,
        waste_kg: f64,
        points: i64,
    },
}

/// Trait for event listeners
pub trait EventListener: Send + Sync {
    /// Handle an event
    fn on_event(&self, event: &LedgerEvent);
}

/// Event bus for broadcasting ledger events
pub struct EventBus {
    sender: broadcast::Sender<LedgerEvent>,
}

impl EventBus {
    /// Create a new event bus with default capacity
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    /// Create a new event bus with specified capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all subscribers
    pub fn emit(&self, event: LedgerEvent) {
        trace!(event = ?event, "Emitting ledger event");
        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Logging event listener for audit trails
pub struct LoggingEventListener;

impl EventListener for LoggingEventListener {
    fn on_event(&self, event: &LedgerEvent) {
        match event {
            LedgerEvent::DisposalRecorded { disposal_id, user_id, weight_kg } => {
                debug!(disposal_id = %disposal_id, user_id = %user_id, weight_kg, "Disposal recorded");
            }
            LedgerEvent::BadgeAwarded { user_id, badge_id } => {
                info!(user_id = %user_id, badge_id = %badge_id, "Badge awarded");
            }
            LedgerEvent::ChallengeCompleted { user_id, challenge_id, reward_xp } => {
                info!(user_id = %user_id, challenge_id = %challenge_id, reward_xp, "Challenge completed");
            }
            LedgerEvent::TotalsReconciled { user_id, waste_kg, points } => {
                info!(user_id = %user_id, waste_kg, points, "Totals reconciled");
            }
            _ => {
                trace!(event = ?event, "Ledger event");
            }
        }
    }
}

/// Spawn a background task that logs all events
pub fn spawn_logging_listener(event_bus: Arc<EventBus>) -> tokio::task::JoinHandle<()> {
    let mut receiver = event_bus.subscribe();
    let listener = LoggingEventListener;

    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => listener.on_event(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, "Event listener lagged, skipped events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed, stopping listener");
                    break;
                }
            }
        }
    })
}
