//! Fan-out broker for federating multiple bus instances.
//!
//! The broker holds one inbound queue per registered bus. `publish` copies
//! the serialized payload to every queue; each `BrokerMessageBus` worker
//! dequeues from its own queue and dispatches to its local handlers. This is
//! the multi-process mode of the in-process bus: payloads cross the boundary
//! as plain JSON with the timestamp serialized.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

use cerise_domain::error::{Error, Result};

use crate::bus::{Dispatcher, EventHandler, SubscriptionId};
use crate::event::Event;

/// Shared fan-out list of inbound queues.
#[derive(Default, Clone)]
pub struct FanoutBroker {
    queues: Arc<RwLock<Vec<mpsc::UnboundedSender<Value>>>>,
}

impl FanoutBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new inbound queue and return its receiving end.
    pub fn register(&self) -> mpsc::UnboundedReceiver<Value> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.queues.write().push(tx);
        rx
    }

    /// Copy a payload to every live queue, dropping closed ones.
    pub fn publish(&self, payload: Value) {
        self.queues
            .write()
            .retain(|queue| queue.send(payload.clone()).is_ok());
    }

    pub fn queue_count(&self) -> usize {
        self.queues.read().len()
    }
}

/// A bus instance attached to a [`FanoutBroker`].
pub struct BrokerMessageBus {
    broker: FanoutBroker,
    inner: Arc<crate::bus::MessageBus>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Value>>>,
    pending: Arc<AtomicUsize>,
    drained: Arc<Notify>,
    cancel: Mutex<Option<CancellationToken>>,
    worker: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl BrokerMessageBus {
    pub fn new(broker: FanoutBroker) -> Self {
        let receiver = broker.register();
        Self {
            broker,
            inner: Arc::new(crate::bus::MessageBus::new()),
            receiver: Mutex::new(Some(receiver)),
            pending: Arc::new(AtomicUsize::new(0)),
            drained: Arc::new(Notify::new()),
            cancel: Mutex::new(None),
            worker: Mutex::new(None),
        }
    }

    pub fn subscribe(&self, pattern: &str, handler: EventHandler) -> Result<SubscriptionId> {
        self.inner.subscribe(pattern, handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.unsubscribe(id)
    }

    pub fn clear_handlers(&self) {
        self.inner.clear_handlers();
    }

    /// Publish via the broker: every attached bus (including this one)
    /// receives a copy.
    pub async fn publish(&self, event: Event) -> Result<()> {
        self.broker.publish(event.to_value());
        Ok(())
    }

    pub fn publish_sync(&self, event: Event) {
        self.broker.publish(event.to_value());
    }

    pub async fn emit(
        &self,
        event_type: &str,
        data: serde_json::Map<String, Value>,
        source: &str,
    ) -> Result<()> {
        self.publish(Event::new(event_type, data, source)).await
    }

    /// Start the local dequeue-and-dispatch worker. Idempotent.
    pub async fn start(&self) -> Result<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }
        let Some(mut receiver) = self.receiver.lock().take() else {
            return Err(Error::FailedPrecondition(
                "broker bus already consumed its queue".into(),
            ));
        };
        let token = CancellationToken::new();
        *self.cancel.lock() = Some(token.clone());

        let dispatcher = Dispatcher::for_broker(
            &self.inner,
            Arc::clone(&self.pending),
            Arc::clone(&self.drained),
        );

        *worker = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    payload = receiver.recv() => {
                        let Some(payload) = payload else { break };
                        let Some(event) = Event::from_value(payload) else {
                            tracing::warn!("broker delivered malformed event payload");
                            continue;
                        };
                        dispatcher.dispatch_counted(event).await;
                    }
                }
            }
            tracing::info!("broker bus worker stopped");
        }));
        Ok(())
    }

    pub async fn stop(&self) {
        let token = self.cancel.lock().take();
        if let Some(token) = token {
            token.cancel();
        }
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Wait for this instance's in-flight dispatches to finish.
    pub async fn wait_empty(&self) {
        loop {
            if self.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            let notified = self.drained.notified();
            if self.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}
