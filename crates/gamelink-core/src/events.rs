//! Outbound game events.

use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

/// Something that can push `evt` envelopes to connected clients.
pub trait EventSink: Send + Sync {
    /// Send one event of `kind` to every ready client.
    fn emit(&self, kind: &str, payload: Value);
}

/// Swappable holder for the current sink.
///
/// Components that outlive a server (the command table survives reloads)
/// hold a slot; the supervisor attaches each new server as it starts.
#[derive(Default)]
pub struct EventSlot {
    inner: RwLock<Option<Arc<dyn EventSink>>>,
}

impl EventSlot {
    /// Empty slot; events are dropped until a sink is attached.
    pub fn new() -> Self {
        Self::default()
    }

    /// Point the slot at `sink`, replacing any previous one.
    pub fn attach(&self, sink: Arc<dyn EventSink>) {
        *self.inner.write() = Some(sink);
    }

    /// Drop the current sink, if any.
    pub fn detach(&self) {
        *self.inner.write() = None;
    }

    /// Whether a sink is attached.
    pub fn is_attached(&self) -> bool {
        self.inner.read().is_some()
    }

    /// Emit through the attached sink. Returns `false` if none is attached.
    pub fn emit(&self, kind: &str, payload: Value) -> bool {
        let sink = self.inner.read().clone();
        match sink {
            Some(sink) => {
                sink.emit(kind, payload);
                true
            }
            None => {
                debug!(kind, "no event sink attached, dropping event");
                false
            }
        }
    }
}

impl std::fmt::Debug for EventSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSlot")
            .field("attached", &self.is_attached())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(String, Value)>>);

    impl EventSink for Recorder {
        fn emit(&self, kind: &str, payload: Value) {
            self.0.lock().push((kind.to_owned(), payload));
        }
    }

    #[test]
    fn empty_slot_drops() {
        let slot = EventSlot::new();
        assert!(!slot.emit("Player.Join", json!({})));
    }

    #[test]
    fn attached_sink_receives() {
        let slot = EventSlot::new();
        let rec = Arc::new(Recorder::default());
        slot.attach(rec.clone());
        assert!(slot.emit("Player.Join", json!({"name": "Alex"})));
        assert_eq!(rec.0.lock()[0].0, "Player.Join");

        slot.detach();
        assert!(!slot.is_attached());
        assert!(!slot.emit("Player.Join", json!({})));
        assert_eq!(rec.0.lock().len(), 1);
    }
}
