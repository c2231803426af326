use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventError {
    #[error("Failed to send event: {message}")]
    SendFailed { message: String },
    #[error("Receiver lagged, skipped {count} events")]
    Lagged { count: u64 },
    #[error("Failed to receive event: {message}")]
    ReceiveFailed { message: String },
}

pub type EventResult<T> = Result<T, EventError>;

/// Lifecycle events emitted by the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum EngineEvent {
    /// A capability request succeeded, from a handler or from the cache.
    ExecutionComplete {
        execution_id: Uuid,
        capability: String,
        handler_used: String,
        cached: bool,
        latency_ms: u64,
    },
    HandlerRegistered {
        handler_id: String,
    },
}

pub struct EventBus {
    event_sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (event_sender, _) = broadcast::channel(capacity.max(1));
        Self { event_sender }
    }

    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver::new(self.event_sender.subscribe())
    }

    pub fn subscriber_count(&self) -> usize {
        self.event_sender.receiver_count()
    }

    /// Fails only when nobody is subscribed.
    pub async fn publish(&self, event: EngineEvent) -> EventResult<()> {
        self.event_sender
            .send(event)
            .map_err(|e| EventError::SendFailed {
                message: e.to_string(),
            })?;
        Ok(())
    }
}

/// Subscription handle. Dropping it unsubscribes.
pub struct EventReceiver {
    receiver: broadcast::Receiver<EngineEvent>,
}

impl EventReceiver {
    fn new(receiver: broadcast::Receiver<EngineEvent>) -> Self {
        Self { receiver }
    }

    /// Receives the next event. After a lag the receiver resubscribes and the
    /// skipped count is returned as an error; call `recv` again promptly.
    pub async fn recv(&mut self) -> EventResult<EngineEvent> {
        match self.receiver.recv().await {
            Ok(event) => Ok(event),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                self.receiver = self.receiver.resubscribe();
                Err(EventError::Lagged { count: n })
            }
            Err(e) => Err(EventError::ReceiveFailed {
                message: e.to_string(),
            }),
        }
    }

    /// Non-blocking variant; `None` when nothing is queued.
    pub fn try_recv(&mut self) -> Option<EngineEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}
