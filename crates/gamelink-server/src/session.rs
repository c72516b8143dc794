//! Per-connection state.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use gamelink_core::envelope::{self, Envelope};
use gamelink_core::ids::SessionId;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Lifecycle of a session: `Connected -> Ready -> Closed`, or straight to
/// `Closed` from `Connected`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    /// Socket accepted, waiting for `hello`.
    Connected = 0,
    /// Handshake done; commands are routed and events delivered.
    Ready = 1,
    /// Disconnected or rejected.
    Closed = 2,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Connected,
            1 => Self::Ready,
            _ => Self::Closed,
        }
    }
}

/// One connected client.
///
/// Outbound frames go through a bounded queue drained by the session's
/// writer task, so [`Session::send`] never blocks and is safe to call from
/// the tick thread. Uncorrelated frames (events) are dropped when the queue
/// is full; replies hold a [`ReplySlot`] reserved before their command is
/// routed and are never dropped.
pub struct Session {
    id: SessionId,
    tx: mpsc::Sender<Arc<String>>,
    state: AtomicU8,
    connected_at: Instant,
    dropped_frames: AtomicU64,
}

impl Session {
    /// New session in [`SessionState::Connected`] feeding `tx`.
    pub fn new(id: SessionId, tx: mpsc::Sender<Arc<String>>) -> Self {
        Self {
            id,
            tx,
            state: AtomicU8::new(SessionState::Connected as u8),
            connected_at: Instant::now(),
            dropped_frames: AtomicU64::new(0),
        }
    }

    /// Server-assigned id.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether the handshake has completed and the session is still open.
    pub fn is_ready(&self) -> bool {
        self.state() == SessionState::Ready
    }

    /// `Connected -> Ready`. Returns `false` if the session was not waiting
    /// for its handshake.
    pub fn mark_ready(&self) -> bool {
        self.state
            .compare_exchange(
                SessionState::Connected as u8,
                SessionState::Ready as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Terminal. Returns the state the session was in.
    pub fn close(&self) -> SessionState {
        SessionState::from_u8(self.state.swap(SessionState::Closed as u8, Ordering::AcqRel))
    }

    /// Queue a frame. Returns `false` if the session is closed or its queue
    /// is full.
    pub fn send(&self, frame: Arc<String>) -> bool {
        if self.state() == SessionState::Closed {
            return false;
        }
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                let dropped = self.dropped_frames.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(session_id = %self.id, dropped, "send queue full, dropping frame");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Reserve queue capacity for one reply, waiting while the queue is full.
    ///
    /// Returns `None` once the writer has gone away.
    pub async fn reserve_reply(&self) -> Option<ReplySlot> {
        let permit = self.tx.clone().reserve_owned().await.ok()?;
        Some(ReplySlot {
            session_id: self.id.clone(),
            permit,
        })
    }

    /// Encode and queue an envelope.
    pub fn send_envelope(&self, envelope: &Envelope) -> bool {
        match envelope::encode(envelope) {
            Ok(text) => {
                let sent = self.send(Arc::new(text));
                if !sent {
                    debug!(
                        session_id = %self.id,
                        t = envelope.envelope_type.as_str(),
                        "envelope not delivered"
                    );
                }
                sent
            }
            Err(error) => {
                warn!(session_id = %self.id, %error, "failed to encode envelope");
                false
            }
        }
    }

    /// Frames dropped because the queue was full.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    /// Time since the socket was accepted.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Queue capacity held for exactly one outbound frame.
///
/// Sending consumes the slot and cannot fail for lack of room. Dropping it
/// unused gives the capacity back.
pub struct ReplySlot {
    session_id: SessionId,
    permit: mpsc::OwnedPermit<Arc<String>>,
}

impl ReplySlot {
    /// Encode `envelope` into the reserved slot. Returns `false` only if the
    /// envelope cannot be encoded.
    pub fn send(self, envelope: &Envelope) -> bool {
        match envelope::encode(envelope) {
            Ok(text) => {
                let _ = self.permit.send(Arc::new(text));
                true
            }
            Err(error) => {
                warn!(session_id = %self.session_id, %error, "failed to encode reply");
                false
            }
        }
    }
}

impl std::fmt::Debug for ReplySlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplySlot")
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}
