//! Engine event subscription
//!
//! Republishes the engine's container event feed through a single-slot
//! channel. A slow consumer backs up into the feed instead of losing events.
//! The first feed error goes to a separate channel and ends the subscription.

use crate::engine::{ContainerEngine, EngineError};
use crate::models::ContainerEvent;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Buffered handoff between the feed task and the consumer
const EVENT_BUFFER: usize = 1;

/// Receiving side of one feed subscription. Dropping it stops the feed task.
pub struct EventSubscription {
    pub events: mpsc::Receiver<ContainerEvent>,
    pub errors: mpsc::Receiver<EngineError>,
    task: JoinHandle<()>,
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub struct EventStreamConsumer;

impl EventStreamConsumer {
    /// Open one subscription on `engine` and start forwarding its events.
    ///
    /// Must be called from within a tokio runtime.
    pub fn subscribe<E>(engine: &E) -> EventSubscription
    where
        E: ContainerEngine + ?Sized,
    {
        let mut feed = engine.subscribe_events();
        let (events_tx, events) = mpsc::channel(EVENT_BUFFER);
        let (errors_tx, errors) = mpsc::channel(1);

        let task = tokio::spawn(async move {
            while let Some(item) = feed.next().await {
                match item {
                    Ok(event) => {
                        if events_tx.send(event).await.is_err() {
                            debug!("Event consumer went away, closing feed");
                            return;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Engine event feed failed");
                        let _ = errors_tx.send(e).await;
                        return;
                    }
                }
            }
            debug!("Engine event feed ended");
        });

        EventSubscription {
            events,
            errors,
            task,
        }
    }
}
