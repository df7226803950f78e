//! Presentation events and the collaborator interface the UI provides.
//!
//! Handlers are registered on an [`EventHubBuilder`] before the session
//! starts; there is no late binding. Every event is also broadcast, so a
//! front end can consume it as a stream instead.

use super::models::MiningStats;
use crate::database::Transaction;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use tokio::sync::broadcast;
use tracing::debug;

/// Navigation surfaces that own surface-scoped loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Surface {
    Home,
    Transactions,
    Messages,
    Mining,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    StatusChanged,
    BalanceChanged,
    TransactionObserved,
    ContactRosterChanged,
    MessageArrived,
    Notify,
    Notice,
    MiningStats,
    IdentityBalance,
    StreamAction,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StatusChanged {
        online: bool,
        reason: Option<String>,
    },
    BalanceChanged {
        transparent: f64,
        shielded: f64,
    },
    TransactionObserved(Transaction),
    ContactRosterChanged,
    MessageArrived {
        contact_id: String,
        preview: String,
    },
    /// User-facing notification.
    Notify {
        title: String,
        body: String,
    },
    /// Transient toast-style notice.
    Notice(String),
    /// `None` when the mining endpoint is unreachable.
    MiningStats(Option<MiningStats>),
    IdentityBalance(f64),
    StreamAction(String),
}

impl SessionEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            SessionEvent::StatusChanged { .. } => EventKind::StatusChanged,
            SessionEvent::BalanceChanged { .. } => EventKind::BalanceChanged,
            SessionEvent::TransactionObserved(_) => EventKind::TransactionObserved,
            SessionEvent::ContactRosterChanged => EventKind::ContactRosterChanged,
            SessionEvent::MessageArrived { .. } => EventKind::MessageArrived,
            SessionEvent::Notify { .. } => EventKind::Notify,
            SessionEvent::Notice(_) => EventKind::Notice,
            SessionEvent::MiningStats(_) => EventKind::MiningStats,
            SessionEvent::IdentityBalance(_) => EventKind::IdentityBalance,
            SessionEvent::StreamAction(_) => EventKind::StreamAction,
        }
    }

    pub fn notify(title: impl Into<String>, body: impl Into<String>) -> Self {
        SessionEvent::Notify {
            title: title.into(),
            body: body.into(),
        }
    }
}

type Handler = Box<dyn Fn(&SessionEvent) + Send + Sync>;

pub struct EventHubBuilder {
    handlers: HashMap<EventKind, Vec<Handler>>,
    capacity: usize,
}

impl EventHubBuilder {
    /// Register a handler for one event kind.
    pub fn on<F>(mut self, kind: EventKind, handler: F) -> Self
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.handlers
            .entry(kind)
            .or_default()
            .push(Box::new(handler));
        self
    }

    /// Broadcast buffer size for stream subscribers.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn build(self) -> EventHub {
        let (broadcast, _) = broadcast::channel(self.capacity);
        EventHub {
            handlers: self.handlers,
            broadcast,
        }
    }
}

pub struct EventHub {
    handlers: HashMap<EventKind, Vec<Handler>>,
    broadcast: broadcast::Sender<SessionEvent>,
}

impl EventHub {
    pub fn builder() -> EventHubBuilder {
        EventHubBuilder {
            handlers: HashMap::new(),
            capacity: 256,
        }
    }

    pub fn emit(&self, event: SessionEvent) {
        debug!("Event {:?}", event.kind());
        if let Some(handlers) = self.handlers.get(&event.kind()) {
            for handler in handlers {
                handler(&event);
            }
        }
        // No subscribers is fine
        let _ = self.broadcast.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.broadcast.subscribe()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        EventHub::builder().build()
    }
}

/// What the presentation layer tells the core about its current view.
pub trait Presentation: Send + Sync {
    /// Contact whose chat is currently open, if any.
    fn current_foreground_contact_id(&self) -> Option<String>;

    fn is_surface_visible(&self, surface: Surface) -> bool;
}

/// Thread-safe [`Presentation`] the front end updates as the user navigates.
#[derive(Default)]
pub struct SurfaceState {
    visible: RwLock<HashSet<Surface>>,
    foreground_contact: RwLock<Option<String>>,
}

impl SurfaceState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn show(&self, surface: Surface) {
        if let Ok(mut visible) = self.visible.write() {
            visible.insert(surface);
        }
    }

    pub fn hide(&self, surface: Surface) {
        if let Ok(mut visible) = self.visible.write() {
            visible.remove(&surface);
        }
    }

    pub fn open_contact(&self, contact_id: &str) {
        if let Ok(mut current) = self.foreground_contact.write() {
            *current = Some(contact_id.to_string());
        }
    }

    pub fn close_contact(&self) {
        if let Ok(mut current) = self.foreground_contact.write() {
            *current = None;
        }
    }
}

impl Presentation for SurfaceState {
    fn current_foreground_contact_id(&self) -> Option<String> {
        self.foreground_contact
            .read()
            .ok()
            .and_then(|current| current.clone())
    }

    fn is_surface_visible(&self, surface: Surface) -> bool {
        self.visible
            .read()
            .map(|visible| visible.contains(&surface))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn handlers_receive_only_their_kind() {
        let notified = Arc::new(Mutex::new(Vec::new()));
        let sink = notified.clone();
        let hub = EventHub::builder()
            .on(EventKind::Notify, move |event| {
                sink.lock().unwrap().push(event.clone());
            })
            .build();

        hub.emit(SessionEvent::Notice("Server is offline".into()));
        hub.emit(SessionEvent::notify("Receive", "1.00000000 BTCZ"));

        let notified = notified.lock().unwrap();
        assert_eq!(notified.len(), 1);
        assert_eq!(notified[0], SessionEvent::notify("Receive", "1.00000000 BTCZ"));
    }

    #[test]
    fn several_handlers_per_kind() {
        let count = Arc::new(Mutex::new(0));
        let (a, b) = (count.clone(), count.clone());
        let hub = EventHub::builder()
            .on(EventKind::ContactRosterChanged, move |_| *a.lock().unwrap() += 1)
            .on(EventKind::ContactRosterChanged, move |_| *b.lock().unwrap() += 1)
            .build();

        hub.emit(SessionEvent::ContactRosterChanged);
        assert_eq!(*count.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn subscribers_see_every_event() {
        let hub = EventHub::default();
        let mut rx = hub.subscribe();

        hub.emit(SessionEvent::IdentityBalance(0.5));
        assert_eq!(rx.recv().await.unwrap(), SessionEvent::IdentityBalance(0.5));
    }

    #[test]
    fn surface_state_tracks_navigation() {
        let state = SurfaceState::new();
        assert!(!state.is_surface_visible(Surface::Messages));

        state.show(Surface::Messages);
        state.open_contact("c1");
        assert!(state.is_surface_visible(Surface::Messages));
        assert_eq!(state.current_foreground_contact_id().as_deref(), Some("c1"));

        state.hide(Surface::Messages);
        state.close_contact();
        assert!(!state.is_surface_visible(Surface::Messages));
        assert!(state.current_foreground_contact_id().is_none());
    }
}
