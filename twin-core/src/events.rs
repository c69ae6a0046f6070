use std::future::Future;
use std::pin::Pin;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, RwLock,
};

use anyhow::Result;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

static LISTENER_ID: AtomicU64 = AtomicU64::new(1);

fn next_listener_id() -> ListenerId {
    ListenerId(LISTENER_ID.fetch_add(1, Ordering::Relaxed))
}

/// Component lifecycle event names.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    CollectorCompleted,
    HarvesterCompleted,
    Custom(String),
}

impl EventKind {
    pub fn custom(name: impl Into<String>) -> Self {
        EventKind::Custom(name.into())
    }
}

/// Data delivered to event listeners.
#[derive(Debug, Clone)]
pub struct ComponentEvent {
    pub kind: EventKind,
    pub component_name: String,
    pub timestamp: DateTime<Utc>,
}

impl ComponentEvent {
    pub fn collector_completed(component_name: impl Into<String>) -> Self {
        Self {
            kind: EventKind::CollectorCompleted,
            component_name: component_name.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn harvester_completed(component_name: impl Into<String>) -> Self {
        Self {
            kind: EventKind::HarvesterCompleted,
            component_name: component_name.into(),
            timestamp: Utc::now(),
        }
    }
}

pub type EventFut<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Listener signature (async).
pub type EventListener =
    Arc<dyn for<'a> Fn(&'a ComponentEvent) -> EventFut<'a> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventPat {
    Any,
    Exact(EventKind),
}

impl EventPat {
    fn matches(&self, kind: &EventKind) -> bool {
        match self {
            EventPat::Any => true,
            EventPat::Exact(k) => k == kind,
        }
    }
}

#[derive(Clone)]
struct ListenerEntry {
    id: ListenerId,
    pattern: EventPat,
    listener: EventListener,
    once: bool,
}

/// Minimal runtime-agnostic event hub.
///
/// Emission is split into three phases so no lock is ever held across
/// an `.await`:
/// 1) snapshot matching listeners (read-only, no await)
/// 2) await listeners (no lock held)
/// 3) cleanup once-listeners (write-lock, no await)
pub struct TwinEventHub {
    listeners: Vec<ListenerEntry>,
}

impl Default for TwinEventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl TwinEventHub {
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
        }
    }

    pub fn on(&mut self, pattern: EventPat, listener: EventListener) -> ListenerId {
        let id = next_listener_id();
        self.listeners.push(ListenerEntry {
            id,
            pattern,
            listener,
            once: false,
        });
        id
    }

    pub fn once(&mut self, pattern: EventPat, listener: EventListener) -> ListenerId {
        let id = next_listener_id();
        self.listeners.push(ListenerEntry {
            id,
            pattern,
            listener,
            once: true,
        });
        id
    }

    pub fn off(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|e| e.id != id);
        before != self.listeners.len()
    }

    /// Phase 1: snapshot matching listeners + remember `once` ids.
    pub fn snapshot_emit(&self, event: &ComponentEvent) -> (Vec<EventListener>, Vec<ListenerId>) {
        let mut to_call = Vec::new();
        let mut once_ids = Vec::new();

        for entry in &self.listeners {
            if entry.pattern.matches(&event.kind) {
                to_call.push(entry.listener.clone());
                if entry.once {
                    once_ids.push(entry.id);
                }
            }
        }

        (to_call, once_ids)
    }

    /// Phase 3: remove `once` listeners after emit finishes.
    pub fn finalize_once_removals(&mut self, once_ids: &[ListenerId]) {
        if once_ids.is_empty() {
            return;
        }
        self.listeners.retain(|e| !once_ids.contains(&e.id));
    }
}

/// Shared event bus: the hub behind a lock, with the three-phase
/// emission wired in. This is what the engine hands to its subsystems.
#[derive(Clone)]
pub struct EventBus {
    hub: Arc<RwLock<TwinEventHub>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            hub: Arc::new(RwLock::new(TwinEventHub::new())),
        }
    }

    pub fn on(&self, pattern: EventPat, listener: EventListener) -> ListenerId {
        self.hub.write().unwrap().on(pattern, listener)
    }

    pub fn once(&self, pattern: EventPat, listener: EventListener) -> ListenerId {
        self.hub.write().unwrap().once(pattern, listener)
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.hub.write().unwrap().off(id)
    }

    /// Emit to all matching listeners. Listener errors are logged and do
    /// not stop delivery to the remaining listeners.
    pub async fn emit(&self, event: ComponentEvent) {
        let (listeners, once_ids) = self.hub.read().unwrap().snapshot_emit(&event);

        for f in &listeners {
            if let Err(e) = f(&event).await {
                tracing::warn!(
                    component = %event.component_name,
                    error = %e,
                    "event listener failed"
                );
            }
        }

        self.hub.write().unwrap().finalize_once_removals(&once_ids);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_listener(counter: Arc<AtomicUsize>) -> EventListener {
        Arc::new(move |_event| {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
    }

    #[tokio::test]
    async fn delivers_to_matching_listeners_only() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        bus.on(
            EventPat::Exact(EventKind::CollectorCompleted),
            counting_listener(hits.clone()),
        );

        bus.emit(ComponentEvent::collector_completed("weather")).await;
        bus.emit(ComponentEvent::harvester_completed("avg")).await;

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn once_listener_fires_exactly_once() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        bus.once(EventPat::Any, counting_listener(hits.clone()));

        bus.emit(ComponentEvent::collector_completed("a")).await;
        bus.emit(ComponentEvent::collector_completed("a")).await;

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn off_removes_a_listener() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let id = bus.on(EventPat::Any, counting_listener(hits.clone()));

        assert!(bus.off(id));
        bus.emit(ComponentEvent::collector_completed("a")).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn a_failing_listener_does_not_block_the_rest() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        bus.on(
            EventPat::Any,
            Arc::new(|_event| Box::pin(async { Err(anyhow::anyhow!("boom")) })),
        );
        bus.on(EventPat::Any, counting_listener(hits.clone()));

        bus.emit(ComponentEvent::collector_completed("a")).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
