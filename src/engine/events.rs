// src/engine/events.rs
//! Lifecycle event publication.
//!
//! Consumers (dashboard, metrics exporter) subscribe through a bounded
//! broadcast channel. Publication is fire-and-forget: with no subscribers the
//! send is dropped, and a lagging subscriber loses old events instead of
//! stalling execution.

use tokio::sync::broadcast;

pub const EVENT_BUFFER: usize = 256;

#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    OpportunityFound {
        id: String,
        strategy: &'static str,
        net_profit_usd: f64,
        confidence: f64,
    },
    TradeSubmitted {
        trade_id: String,
        strategy: &'static str,
    },
    PositionOpened {
        trade_id: String,
        amount_lamports: u64,
    },
    PositionClosed {
        trade_id: String,
        realized_pnl_lamports: i64,
    },
    CircuitBreakerTripped {
        consecutive_failures: u32,
    },
    DailyLossLimitTripped {
        loss_usd: f64,
    },
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<LifecycleEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_BUFFER);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: LifecycleEvent) {
        // No subscribers is fine; never block or propagate.
        let _ = self.sender.send(event);
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
    async fn publish_without_subscribers_does_not_fail() {
        let bus = EventBus::new();
        bus.publish(LifecycleEvent::CircuitBreakerTripped {
            consecutive_failures: 5,
        });
    }

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(LifecycleEvent::PositionOpened {
            trade_id: "t1".to_string(),
            amount_lamports: 42,
        });
        match rx.recv().await.unwrap() {
            LifecycleEvent::PositionOpened { trade_id, amount_lamports } => {
                assert_eq!(trade_id, "t1");
                assert_eq!(amount_lamports, 42);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
