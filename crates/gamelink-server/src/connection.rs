//! WebSocket session lifecycle, from upgrade through disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use gamelink_core::envelope::{self, Envelope, EnvelopeType};
use gamelink_core::errors::UNAUTHORIZED;
use gamelink_core::ids::SessionId;
use gamelink_telemetry::names;
use metrics::counter;
use secrecy::SecretString;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::dispatch::DispatchRouter;
use crate::handshake::verify_hello;
use crate::registry::SessionRegistry;
use crate::session::{Session, SessionState};
use crate::shutdown::ShutdownCoordinator;

/// Interval between server-initiated Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long the writer gets to flush queued frames after the reader stops.
const WRITER_DRAIN: Duration = Duration::from_secs(2);

/// Everything a session task needs from its server.
pub(crate) struct ConnectionContext {
    pub router: Arc<DispatchRouter>,
    pub registry: Arc<SessionRegistry>,
    pub shutdown: Arc<ShutdownCoordinator>,
    pub shared_secret: Option<SecretString>,
    pub max_send_queue: usize,
}

/// Run one client connection.
///
/// 1. Spawns the writer, which drains the session's send queue and pings
/// 2. Waits for a `hello`; other frames before it are ignored
/// 3. Routes `cmd` frames once the session is ready, reading the next frame
///    only after the reply to this one has room in the send queue
/// 4. On disconnect, unregisters the session and flushes the writer
#[instrument(skip_all, fields(session_id = %session_id))]
pub(crate) async fn run_session(socket: WebSocket, session_id: SessionId, ctx: Arc<ConnectionContext>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (send_tx, mut send_rx) = mpsc::channel::<Arc<String>>(ctx.max_send_queue);
    let session = Arc::new(Session::new(session_id, send_tx));
    let close = ctx.shutdown.token().child_token();

    counter!(names::CONNECTIONS_TOTAL).increment(1);
    info!("client connected");

    let writer_close = close.clone();
    let mut writer = ctx.shutdown.spawn(async move {
        let mut ping = tokio::time::interval(PING_INTERVAL);
        let _ = ping.tick().await;

        loop {
            tokio::select! {
                () = writer_close.cancelled() => {
                    while let Ok(frame) = send_rx.try_recv() {
                        if ws_tx.send(Message::Text(frame.as_str().into())).await.is_err() {
                            break;
                        }
                    }
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
                frame = send_rx.recv() => {
                    let Some(frame) = frame else { break };
                    if ws_tx.send(Message::Text(frame.as_str().into())).await.is_err() {
                        break;
                    }
                }
                _ = ping.tick() => {
                    if ws_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    loop {
        let msg = tokio::select! {
            () = close.cancelled() => break,
            msg = ws_rx.next() => msg,
        };
        match msg {
            Some(Ok(Message::Text(text))) => {
                handle_frame(&session, text.as_str().as_bytes(), &ctx, &close).await;
            }
            Some(Ok(Message::Binary(data))) => handle_frame(&session, &data, &ctx, &close).await,
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
            Some(Ok(Message::Close(_))) => {
                debug!("client sent close frame");
                break;
            }
            Some(Err(error)) => {
                debug!(%error, "websocket read failed");
                break;
            }
            None => break,
        }
    }

    let _ = session.close();
    let _ = ctx.registry.remove(session.id());
    close.cancel();
    if tokio::time::timeout(WRITER_DRAIN, &mut writer).await.is_err() {
        warn!("writer did not drain in time, aborting");
        writer.abort();
    }
    info!(
        age_ms = u64::try_from(session.age().as_millis()).unwrap_or(u64::MAX),
        dropped_frames = session.dropped_frames(),
        "client disconnected"
    );
}

async fn handle_frame(session: &Arc<Session>, bytes: &[u8], ctx: &ConnectionContext, close: &CancellationToken) {
    let envelope = match envelope::decode(bytes) {
        Ok(envelope) => envelope,
        Err(error) => {
            counter!(names::DECODE_ERRORS).increment(1);
            warn!(%error, len = bytes.len(), "dropping undecodable frame");
            return;
        }
    };

    match (session.state(), envelope.envelope_type) {
        (SessionState::Connected, EnvelopeType::Hello) => accept_hello(session, &envelope, ctx, close),
        (SessionState::Connected, other) => {
            debug!(t = other.as_str(), "ignoring frame before handshake");
        }
        (SessionState::Ready, EnvelopeType::Cmd) => {
            let slot = tokio::select! {
                () = close.cancelled() => return,
                slot = session.reserve_reply() => slot,
            };
            match slot {
                Some(slot) => ctx.router.route(session, slot, envelope),
                None => debug!("writer gone, dropping command"),
            }
        }
        (SessionState::Ready, other) => {
            debug!(t = other.as_str(), "ignoring non-command frame");
        }
        (SessionState::Closed, _) => {}
    }
}

fn accept_hello(session: &Arc<Session>, hello: &Envelope, ctx: &ConnectionContext, close: &CancellationToken) {
    if !verify_hello(ctx.shared_secret.as_ref(), hello.sig.as_deref()) {
        counter!(names::HANDSHAKES_REJECTED).increment(1);
        warn!("handshake rejected, bad credential");
        let _ = session.send_envelope(&Envelope::fault(UNAUTHORIZED, "invalid credential"));
        close.cancel();
        return;
    }
    if session.mark_ready() {
        let _ = session.send_envelope(&Envelope::hello_ack());
        ctx.registry.add(Arc::clone(session));
        info!("handshake complete");
    }
}
