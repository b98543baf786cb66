//! Operational event bus for the rotation controller: a broadcast channel
//! plus a small set of fan-out sinks for consumers that want every event
//! rather than just the latest.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::{RwLock, broadcast};

#[derive(Debug, Clone)]
pub enum OperationalEvent {
    SwitchStarted { from: u32, to: u32, at: SystemTime },
    SwitchSucceeded { index: u32, at: SystemTime },
    SwitchFailed { index: u32, error: String, at: SystemTime },
    FallbackSwitching { to: u32, at: SystemTime },
    ConnectionLost { at: SystemTime },
}

pub trait EventSink: Send + Sync {
    fn write<'a>(
        &'a self,
        event: &'a OperationalEvent,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
}

#[derive(Clone)]
pub struct EventHub {
    inner: Arc<Inner>,
}

struct Inner {
    tx: broadcast::Sender<OperationalEvent>,
    sinks: RwLock<Vec<Arc<dyn EventSink>>>,
}

impl EventHub {
    pub fn new(buffer: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer);
        Self {
            inner: Arc::new(Inner {
                tx,
                sinks: RwLock::new(Vec::new()),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OperationalEvent> {
        self.inner.tx.subscribe()
    }

    pub async fn add_sink(&self, sink: Arc<dyn EventSink>) {
        self.inner.sinks.write().await.push(sink);
    }

    pub async fn emit(&self, event: OperationalEvent) {
        let _ = self.inner.tx.send(event.clone());
        let sinks = self.inner.sinks.read().await.clone();
        for sink in sinks {
            let event_ref = event.clone();
            tokio::spawn(async move {
                sink.write(&event_ref).await;
            });
        }
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(64)
    }
}
