use crate::types::{Address, Amount, Choice, Commitment};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 256;

/// Record published for every fund-moving or resolving operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameEvent {
    Deposited {
        player: Address,
        amount: Amount,
    },
    Opened {
        commitment: Commitment,
        initiator: Address,
        wager: Amount,
        deadline: DateTime<Utc>,
        responder: Address,
    },
    Joined {
        commitment: Commitment,
        responder: Address,
        choice: Choice,
    },
    Revealed {
        commitment: Commitment,
        /// `None` on a tie
        winner: Option<Address>,
        revealer: Address,
    },
    ForceRevealed {
        commitment: Commitment,
        winner: Address,
        revealer: Address,
    },
    ClaimedBack {
        commitment: Commitment,
        beneficiary: Address,
        triggered_by: Address,
    },
    Withdrawn {
        caller: Address,
        amount: Amount,
    },
    Paused {
        by: Address,
    },
    Resumed {
        by: Address,
    },
}

impl GameEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Deposited { .. } => "Deposited",
            Self::Opened { .. } => "Opened",
            Self::Joined { .. } => "Joined",
            Self::Revealed { .. } => "Revealed",
            Self::ForceRevealed { .. } => "ForceRevealed",
            Self::ClaimedBack { .. } => "ClaimedBack",
            Self::Withdrawn { .. } => "Withdrawn",
            Self::Paused { .. } => "Paused",
            Self::Resumed { .. } => "Resumed",
        }
    }

    pub fn commitment(&self) -> Option<Commitment> {
        match self {
            Self::Opened { commitment, .. }
            | Self::Joined { commitment, .. }
            | Self::Revealed { commitment, .. }
            | Self::ForceRevealed { commitment, .. }
            | Self::ClaimedBack { commitment, .. } => Some(*commitment),
            _ => None,
        }
    }
}

/// Event as stored in the journal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedEvent {
    pub seq: i64,
    pub recorded_at: DateTime<Utc>,
    pub event: GameEvent,
}

/// Fan-out of events to live subscribers.
///
/// Publishing never blocks and never fails; with no subscribers the event is
/// simply dropped, and slow subscribers see `RecvError::Lagged`.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<GameEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GameEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: GameEvent) {
        tracing::debug!("Publishing {} event", event.name());
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_in_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let player = Address::new([7; 20]);

        bus.publish(GameEvent::Deposited { player, amount: 5 });
        bus.publish(GameEvent::Withdrawn {
            caller: player,
            amount: 5,
        });

        assert_eq!(rx.recv().await.unwrap().name(), "Deposited");
        assert_eq!(rx.recv().await.unwrap().name(), "Withdrawn");
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        bus.publish(GameEvent::Paused {
            by: Address::new([1; 20]),
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_event_json_is_tagged_by_name() {
        let event = GameEvent::Withdrawn {
            caller: Address::new([0xb0; 20]),
            amount: 600,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["Withdrawn"]["amount"], 600);

        let text = serde_json::to_string(&event).unwrap();
        let back: GameEvent = serde_json::from_str(&text).unwrap();
        assert_eq!(back, event);
    }
}
