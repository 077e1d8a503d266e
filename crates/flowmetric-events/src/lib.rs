//! In-process publish/subscribe bus (C7).
//!
//! Producers `publish`, consumers `subscribe`. Synchronous handlers run
//! on the publisher's thread before `publish` returns — the cache layer
//! relies on that ordering guarantee for its invalidation invariant.
//! Handlers declared async are dispatched onto the tokio runtime.
//! Handler failures are logged and never abort further dispatch.

use chrono::{DateTime, Utc};
use flowmetric_error::FlowError;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// The closed set of event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// A collection job finished and fsynced a new artifact.
    DataCollected,
    /// A configuration scope changed at runtime.
    ConfigChanged,
    /// An operator requested a refresh for a key.
    ManualRefresh,
    /// The cache dropped entries for a key.
    CacheInvalidated,
    /// The cache pre-loaded entries.
    CacheWarmed,
}

impl EventType {
    /// Stable string form used in logs and the introspection API.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::DataCollected => "DATA_COLLECTED",
            Self::ConfigChanged => "CONFIG_CHANGED",
            Self::ManualRefresh => "MANUAL_REFRESH",
            Self::CacheInvalidated => "CACHE_INVALIDATED",
            Self::CacheWarmed => "CACHE_WARMED",
        }
    }
}

/// One published event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique event identifier.
    pub id: Uuid,
    /// Event type.
    pub event_type: EventType,
    /// Canonical range spec, for key-scoped events.
    pub range_spec: Option<String>,
    /// Environment name, for key-scoped events.
    pub environment: Option<String>,
    /// Config scope, for `ConfigChanged`.
    pub scope: Option<String>,
    /// Publication timestamp.
    pub at: DateTime<Utc>,
}

impl Event {
    /// Create an event with no key or scope.
    #[must_use]
    pub fn new(event_type: EventType) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type,
            range_spec: None,
            environment: None,
            scope: None,
            at: Utc::now(),
        }
    }

    /// Attach a `(range, environment)` cache key.
    #[must_use]
    pub fn with_key(mut self, range_spec: impl Into<String>, environment: impl Into<String>) -> Self {
        self.range_spec = Some(range_spec.into());
        self.environment = Some(environment.into());
        self
    }

    /// Attach a config scope.
    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }
}

/// Result type handlers return; errors are logged by the bus.
pub type HandlerResult = std::result::Result<(), FlowError>;

type SyncHandler = Arc<dyn Fn(&Event) -> HandlerResult + Send + Sync>;
type AsyncHandler =
    Arc<dyn Fn(Event) -> Pin<Box<dyn Future<Output = HandlerResult> + Send>> + Send + Sync>;

enum Dispatch {
    Sync(SyncHandler),
    Async(AsyncHandler),
}

struct Subscription {
    name: String,
    dispatch: Dispatch,
}

/// The bus. Cheap to clone via `Arc`; the subscription table is guarded
/// by a read-mostly lock.
pub struct EventBus {
    subscriptions: RwLock<HashMap<EventType, Vec<Subscription>>>,
    history: RwLock<VecDeque<Event>>,
    retention: usize,
}

impl EventBus {
    /// Create a bus retaining the last `retention` events for
    /// introspection.
    #[must_use]
    pub fn new(retention: usize) -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            history: RwLock::new(VecDeque::with_capacity(retention.min(1024))),
            retention,
        }
    }

    /// Register a synchronous handler. It runs on the publisher's thread
    /// and must be quick; do not hold locks across it.
    pub fn subscribe<F>(&self, event_type: EventType, name: impl Into<String>, handler: F)
    where
        F: Fn(&Event) -> HandlerResult + Send + Sync + 'static,
    {
        self.subscriptions
            .write()
            .entry(event_type)
            .or_default()
            .push(Subscription {
                name: name.into(),
                dispatch: Dispatch::Sync(Arc::new(handler)),
            });
    }

    /// Register an async handler, dispatched to the shared runtime on
    /// publish.
    pub fn subscribe_async<F, Fut>(&self, event_type: EventType, name: impl Into<String>, handler: F)
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let handler: AsyncHandler = Arc::new(move |event| Box::pin(handler(event)));
        self.subscriptions
            .write()
            .entry(event_type)
            .or_default()
            .push(Subscription {
                name: name.into(),
                dispatch: Dispatch::Async(handler),
            });
    }

    /// Publish an event. Synchronous handlers complete before this
    /// returns; async handlers are spawned. Returns the number of
    /// handlers dispatched.
    pub fn publish(&self, event: Event) -> usize {
        debug!(event = event.event_type.as_str(), id = %event.id, "publishing event");
        self.remember(&event);

        let mut dispatched = 0;
        let subscriptions = self.subscriptions.read();
        let Some(handlers) = subscriptions.get(&event.event_type) else {
            return 0;
        };

        for subscription in handlers {
            dispatched += 1;
            match &subscription.dispatch {
                Dispatch::Sync(handler) => {
                    let handler = Arc::clone(handler);
                    let outcome =
                        catch_unwind(AssertUnwindSafe(|| handler(&event)));
                    match outcome {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            warn!(
                                subscriber = %subscription.name,
                                event = event.event_type.as_str(),
                                error = %e,
                                "event handler failed"
                            );
                        }
                        Err(_) => {
                            error!(
                                subscriber = %subscription.name,
                                event = event.event_type.as_str(),
                                "event handler panicked"
                            );
                        }
                    }
                }
                Dispatch::Async(handler) => {
                    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
                        warn!(
                            subscriber = %subscription.name,
                            "async handler skipped: no tokio runtime on publishing thread"
                        );
                        continue;
                    };
                    let handler = Arc::clone(handler);
                    let event = event.clone();
                    let name = subscription.name.clone();
                    runtime.spawn(async move {
                        if let Err(e) = handler(event).await {
                            warn!(subscriber = %name, error = %e, "async event handler failed");
                        }
                    });
                }
            }
        }
        dispatched
    }

    /// The retained events, newest last.
    #[must_use]
    pub fn recent(&self) -> Vec<Event> {
        self.history.read().iter().cloned().collect()
    }

    /// Number of subscriptions for a type (introspection/tests).
    #[must_use]
    pub fn subscriber_count(&self, event_type: EventType) -> usize {
        self.subscriptions
            .read()
            .get(&event_type)
            .map_or(0, Vec::len)
    }

    fn remember(&self, event: &Event) {
        if self.retention == 0 {
            return;
        }
        let mut history = self.history.write();
        if history.len() >= self.retention {
            history.pop_front();
        }
        history.push_back(event.clone());
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(100)
    }
}
