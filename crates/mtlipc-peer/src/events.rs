use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use mtlipc_frame::{Command, Frame, ResponseKind};
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Which event a listener is registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Exited,
    HitBreakpoint,
    Step,
    Generate,
    /// Any other code arriving on the sentinel id.
    Other(i32),
}

impl From<Command> for EventKind {
    fn from(command: Command) -> Self {
        match command {
            Command::IpcExit => EventKind::Exited,
            Command::IpcHitBreakpoint => EventKind::HitBreakpoint,
            Command::IpcStep => EventKind::Step,
            Command::IpcGenerate => EventKind::Generate,
            other => EventKind::Other(other.code()),
        }
    }
}

/// Decoded contents of an event frame.
#[derive(Debug, Clone, PartialEq)]
pub struct EventPayload {
    pub command: Command,
    pub kind: ResponseKind,
    /// Raw payload text.
    pub detail: String,
    /// Payload parsed as JSON, when it is JSON.
    pub value: Option<serde_json::Value>,
}

impl EventPayload {
    pub fn from_frame(frame: &Frame) -> Self {
        let detail = frame.payload_str().into_owned();
        let value = if detail.trim().is_empty() {
            None
        } else {
            serde_json::from_str(&detail).ok()
        };
        Self {
            command: frame.command,
            kind: frame.response_kind(),
            detail,
            value,
        }
    }

    /// Player id that triggered a breakpoint or step.
    pub fn owner(&self) -> Option<i64> {
        self.value.as_ref()?.get("owner")?.as_i64()
    }

    /// Decode the payload into `T`.
    pub fn parse<'a, T: Deserialize<'a>>(&'a self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.detail)
    }
}

/// An unsolicited notification from the remote controller.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteEvent {
    /// The remote is shutting down.
    Exited(EventPayload),
    HitBreakpoint(EventPayload),
    Step(EventPayload),
    Generate(EventPayload),
    Other(EventPayload),
}

impl RemoteEvent {
    pub fn from_frame(frame: &Frame) -> Self {
        let payload = EventPayload::from_frame(frame);
        match EventKind::from(frame.command) {
            EventKind::Exited => RemoteEvent::Exited(payload),
            EventKind::HitBreakpoint => RemoteEvent::HitBreakpoint(payload),
            EventKind::Step => RemoteEvent::Step(payload),
            EventKind::Generate => RemoteEvent::Generate(payload),
            EventKind::Other(_) => RemoteEvent::Other(payload),
        }
    }

    pub fn kind(&self) -> EventKind {
        EventKind::from(self.payload().command)
    }

    pub fn payload(&self) -> &EventPayload {
        match self {
            RemoteEvent::Exited(payload)
            | RemoteEvent::HitBreakpoint(payload)
            | RemoteEvent::Step(payload)
            | RemoteEvent::Generate(payload)
            | RemoteEvent::Other(payload) => payload,
        }
    }

    pub fn owner(&self) -> Option<i64> {
        self.payload().owner()
    }
}

/// Handle returned by [`EventSink::on`], used to remove the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&RemoteEvent) + Send + Sync>;

/// Fans sentinel-id frames out to listeners and subscribers.
pub struct EventSink {
    listeners: Mutex<Vec<(ListenerId, EventKind, Listener)>>,
    next_id: AtomicU64,
    tx: broadcast::Sender<RemoteEvent>,
}

impl EventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            tx,
        }
    }

    /// Call `listener` for every event of `kind`.
    pub fn on<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&RemoteEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.registry().push((id, kind, Arc::new(listener)));
        id
    }

    /// Remove a listener. Returns false if it was already gone.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut listeners = self.registry();
        let before = listeners.len();
        listeners.retain(|(existing, _, _)| *existing != id);
        listeners.len() != before
    }

    /// Receive every event from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<RemoteEvent> {
        self.tx.subscribe()
    }

    pub fn listener_count(&self) -> usize {
        self.registry().len()
    }

    /// Decode a sentinel frame and deliver it.
    pub fn dispatch(&self, frame: &Frame) -> RemoteEvent {
        let event = RemoteEvent::from_frame(frame);
        self.deliver(&event);
        event
    }

    /// Invoke matching listeners once each, then broadcast.
    pub fn deliver(&self, event: &RemoteEvent) {
        let kind = event.kind();
        // Snapshot so listeners may call on/off without deadlocking.
        let matching: Vec<Listener> = self
            .registry()
            .iter()
            .filter(|(_, registered, _)| *registered == kind)
            .map(|(_, _, listener)| Arc::clone(listener))
            .collect();

        debug!(
            ?kind,
            owner = event.owner(),
            listeners = matching.len(),
            "dispatching remote event"
        );
        for listener in matching {
            listener(event);
        }

        if self.tx.send(event.clone()).is_err() {
            trace!(?kind, "no event subscribers");
        }
    }

    fn registry(&self) -> MutexGuard<'_, Vec<(ListenerId, EventKind, Listener)>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink")
            .field("listeners", &self.listener_count())
            .field("subscribers", &self.tx.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn breakpoint(owner: i64) -> Frame {
        Frame::event(
            Command::IpcHitBreakpoint,
            ResponseKind::Success,
            format!(r#"{{"owner":{owner}}}"#),
        )
    }

    #[test]
    fn listener_runs_once_with_owner() {
        let sink = EventSink::new(8);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&seen);
        sink.on(EventKind::HitBreakpoint, move |event| {
            captured.lock().unwrap().push(event.owner());
        });

        let event = sink.dispatch(&breakpoint(3));
        assert!(matches!(event, RemoteEvent::HitBreakpoint(_)));
        assert_eq!(*seen.lock().unwrap(), vec![Some(3)]);
    }

    #[test]
    fn listeners_only_see_their_kind() {
        let sink = EventSink::new(8);
        let steps = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&steps);
        sink.on(EventKind::Step, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        sink.dispatch(&breakpoint(1));
        sink.dispatch(&Frame::event(Command::IpcStep, ResponseKind::Success, r#"{"owner":1}"#));
        assert_eq!(steps.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn off_removes_listener() {
        let sink = EventSink::new(8);
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let id = sink.on(EventKind::HitBreakpoint, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(sink.off(id));
        assert!(!sink.off(id));
        sink.dispatch(&breakpoint(2));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(sink.listener_count(), 0);
    }

    #[test]
    fn unregistered_codes_are_broadcast_as_other() {
        let sink = EventSink::new(8);
        let mut rx = sink.subscribe();

        sink.dispatch(&Frame::event(Command::Unknown(150), ResponseKind::Success, "not json"));

        let event = rx.try_recv().unwrap();
        assert_eq!(event.kind(), EventKind::Other(150));
        assert!(event.payload().value.is_none());
        assert_eq!(event.payload().detail, "not json");
    }

    #[test]
    fn subscribers_get_every_event_in_order() {
        let sink = EventSink::new(8);
        let mut rx = sink.subscribe();

        sink.dispatch(&breakpoint(1));
        sink.dispatch(&Frame::event(Command::IpcExit, ResponseKind::Success, ""));

        assert_eq!(rx.try_recv().unwrap().kind(), EventKind::HitBreakpoint);
        let exited = rx.try_recv().unwrap();
        assert!(matches!(exited, RemoteEvent::Exited(_)));
        assert!(exited.owner().is_none());
    }

    #[test]
    fn listener_may_unregister_itself() {
        let sink = Arc::new(EventSink::new(8));
        let slot = Arc::new(Mutex::new(None));
        let (weak_sink, id_slot) = (Arc::downgrade(&sink), Arc::clone(&slot));
        let id = sink.on(EventKind::HitBreakpoint, move |_| {
            if let (Some(sink), Some(id)) = (weak_sink.upgrade(), *id_slot.lock().unwrap()) {
                sink.off(id);
            }
        });
        *slot.lock().unwrap() = Some(id);

        sink.dispatch(&breakpoint(1));
        assert_eq!(sink.listener_count(), 0);
    }
}
