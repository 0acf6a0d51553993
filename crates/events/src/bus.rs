//! In-process async message bus.
//!
//! One queue feeds a single worker task. Per event, every handler whose glob
//! pattern matches the dotted event type runs as its own task; the worker
//! joins them all before taking the next event. Handler failures (errors or
//! panics) are logged and never poison the bus.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use globset::{Glob, GlobMatcher};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

use cerise_domain::error::{Error, Result};

use crate::event::Event;

/// Boxed async event handler.
pub type EventHandler = Arc<dyn Fn(Event) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Identifier returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    pattern: String,
    matcher: GlobMatcher,
    handler: EventHandler,
}

type SubscriptionTable = Arc<RwLock<Vec<Subscription>>>;

/// Async message bus with glob-pattern subscriptions.
pub struct MessageBus {
    subscriptions: SubscriptionTable,
    sender: mpsc::UnboundedSender<Event>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Event>>>,
    next_id: AtomicU64,
    pending: Arc<AtomicUsize>,
    drained: Arc<Notify>,
    cancel: Mutex<Option<CancellationToken>>,
    worker: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            subscriptions: Arc::new(RwLock::new(Vec::new())),
            sender,
            receiver: Mutex::new(Some(receiver)),
            next_id: AtomicU64::new(1),
            pending: Arc::new(AtomicUsize::new(0)),
            drained: Arc::new(Notify::new()),
            cancel: Mutex::new(None),
            worker: Mutex::new(None),
        }
    }

    /// Subscribe a handler to a glob pattern over dotted event types
    /// (`"memory.*"`, `"*.changed"`, or an exact type).
    pub fn subscribe(&self, pattern: &str, handler: EventHandler) -> Result<SubscriptionId> {
        let matcher = Glob::new(pattern)
            .map_err(|e| Error::InvalidArgument(format!("bad event pattern '{pattern}': {e}")))?
            .compile_matcher();
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscriptions.write().push(Subscription {
            id,
            pattern: pattern.to_string(),
            matcher,
            handler,
        });
        tracing::debug!(pattern, "subscribed");
        Ok(id)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self.subscriptions.write();
        let before = subs.len();
        subs.retain(|s| s.id != id);
        subs.len() != before
    }

    pub fn clear_handlers(&self) {
        self.subscriptions.write().clear();
    }

    /// Publish an event onto the queue.
    pub async fn publish(&self, event: Event) -> Result<()> {
        self.enqueue(event)
    }

    /// Fire-and-forget publish for non-async callers.
    pub fn publish_sync(&self, event: Event) {
        if let Err(e) = self.enqueue(event) {
            tracing::warn!(error = %e, "publish_sync dropped event");
        }
    }

    /// Create and publish an event in one call.
    pub async fn emit(
        &self,
        event_type: &str,
        data: serde_json::Map<String, serde_json::Value>,
        source: &str,
    ) -> Result<()> {
        self.publish(Event::new(event_type, data, source)).await
    }

    fn enqueue(&self, event: Event) -> Result<()> {
        self.pending.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(event_type = %event.event_type, "published event");
        self.sender.send(event).map_err(|_| {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            Error::Cancelled("message bus is shut down".into())
        })
    }

    /// Start the worker loop. Idempotent.
    pub async fn start(&self) {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return;
        }
        let Some(mut receiver) = self.receiver.lock().take() else {
            return;
        };
        let token = CancellationToken::new();
        *self.cancel.lock() = Some(token.clone());

        let dispatcher = Dispatcher {
            subscriptions: Arc::clone(&self.subscriptions),
            pending: Arc::clone(&self.pending),
            drained: Arc::clone(&self.drained),
        };

        *worker = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    event = receiver.recv() => {
                        let Some(event) = event else { break };
                        dispatcher.dispatch(event).await;
                    }
                }
            }
            tracing::info!("message bus worker stopped");
        }));
        tracing::info!("message bus started");
    }

    /// Stop the worker cooperatively, letting the in-flight event drain.
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

    /// Resolve once the queue is empty and all in-flight handlers finished.
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

/// Worker-side view of the bus: matches handlers and tracks drain state.
pub(crate) struct Dispatcher {
    subscriptions: SubscriptionTable,
    pending: Arc<AtomicUsize>,
    drained: Arc<Notify>,
}

impl Dispatcher {
    /// Dispatcher reusing another bus's subscription table with externally
    /// owned drain accounting (broker mode).
    pub(crate) fn for_broker(
        bus: &MessageBus,
        pending: Arc<AtomicUsize>,
        drained: Arc<Notify>,
    ) -> Self {
        Self {
            subscriptions: Arc::clone(&bus.subscriptions),
            pending,
            drained,
        }
    }

    /// Dispatch an event that was not counted at publish time.
    pub(crate) async fn dispatch_counted(&self, event: Event) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        self.dispatch(event).await;
    }

    pub(crate) async fn dispatch(&self, event: Event) {
        let handlers: Vec<(String, EventHandler)> = self
            .subscriptions
            .read()
            .iter()
            .filter(|s| s.matcher.is_match(&event.event_type))
            .map(|s| (s.pattern.clone(), Arc::clone(&s.handler)))
            .collect();

        if handlers.is_empty() {
            tracing::debug!(event_type = %event.event_type, "no handlers for event");
        } else {
            let tasks: Vec<_> = handlers
                .into_iter()
                .map(|(pattern, handler)| {
                    let event = event.clone();
                    let event_type = event.event_type.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handler(event).await {
                            tracing::error!(
                                pattern = %pattern,
                                event_type = %event_type,
                                error = %e,
                                "event handler failed"
                            );
                        }
                    })
                })
                .collect();
            for task in tasks {
                if let Err(e) = task.await {
                    tracing::error!(error = %e, "event handler panicked");
                }
            }
        }
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.drained.notify_waiters();
        }
    }
}

/// Build an [`EventHandler`] from an async closure.
pub fn handler<F, Fut>(f: F) -> EventHandler
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |event| Box::pin(f(event)))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn counting_handler(counter: Arc<AtomicUsize>) -> EventHandler {
        handler(move |_event| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
    }

    #[tokio::test]
    async fn exact_and_glob_subscriptions_both_fire() {
        let bus = Arc::new(MessageBus::new());
        let exact = Arc::new(AtomicUsize::new(0));
        let glob = Arc::new(AtomicUsize::new(0));
        bus.subscribe("memory.recorded", counting_handler(Arc::clone(&exact)))
            .unwrap();
        bus.subscribe("memory.*", counting_handler(Arc::clone(&glob)))
            .unwrap();
        bus.start().await;

        bus.emit("memory.recorded", serde_json::Map::new(), "test")
            .await
            .unwrap();
        bus.emit("memory.fact.upserted", serde_json::Map::new(), "test")
            .await
            .unwrap();
        bus.wait_empty().await;

        assert_eq!(exact.load(Ordering::SeqCst), 1);
        assert_eq!(glob.load(Ordering::SeqCst), 2);
        bus.stop().await;
    }

    #[tokio::test]
    async fn suffix_glob_matches() {
        let bus = Arc::new(MessageBus::new());
        let count = Arc::new(AtomicUsize::new(0));
        bus.subscribe("*.changed", counting_handler(Arc::clone(&count)))
            .unwrap();
        bus.start().await;
        bus.emit("config.theme.changed", serde_json::Map::new(), "test")
            .await
            .unwrap();
        bus.emit("dialogue.user_message", serde_json::Map::new(), "test")
            .await
            .unwrap();
        bus.wait_empty().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        bus.stop().await;
    }

    #[tokio::test]
    async fn failing_handler_does_not_block_others() {
        let bus = Arc::new(MessageBus::new());
        let count = Arc::new(AtomicUsize::new(0));
        bus.subscribe(
            "boom",
            handler(|_| async { Err(Error::Other("handler exploded".into())) }),
        )
        .unwrap();
        bus.subscribe("boom", counting_handler(Arc::clone(&count)))
            .unwrap();
        bus.start().await;
        bus.emit("boom", serde_json::Map::new(), "test").await.unwrap();
        bus.wait_empty().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        bus.stop().await;
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let bus = Arc::new(MessageBus::new());
        let count = Arc::new(AtomicUsize::new(0));
        let id = bus
            .subscribe("x", counting_handler(Arc::clone(&count)))
            .unwrap();
        bus.start().await;
        bus.emit("x", serde_json::Map::new(), "t").await.unwrap();
        bus.wait_empty().await;
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.emit("x", serde_json::Map::new(), "t").await.unwrap();
        bus.wait_empty().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        bus.stop().await;
    }

    #[tokio::test]
    async fn invalid_pattern_is_rejected() {
        let bus = MessageBus::new();
        let result = bus.subscribe("mem[ory", handler(|_| async { Ok(()) }));
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn wait_empty_on_idle_bus_returns_immediately() {
        let bus = MessageBus::new();
        bus.start().await;
        bus.wait_empty().await;
        bus.stop().await;
    }
}
