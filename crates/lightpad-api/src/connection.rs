//! An authenticated control channel to one Lightpad.
//!
//! A [`Connection`] owns two background tasks over the split socket:
//!
//! - the **reader** decodes frames and routes them by kind. `Reply`
//!   frames go to the command waiting on that `seq`; `Event` frames (and
//!   frames of unknown kind) are classified and pushed onto the event
//!   lane. When the socket ends it pushes one terminal
//!   [`ConnectionLost`] and fails every pending command.
//! - the **writer** drains outbound frames into the socket.
//!
//! Commands are serialized through a lane lock so at most one is in
//! flight. Events arriving before anyone takes the lane are buffered.
//!
//! The connection is generic over any `AsyncRead + AsyncWrite` stream so
//! the same code runs over TLS, plain TCP and in-memory duplex pipes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use secrecy::ExposeSecret;
use serde_json::json;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::auth::Session;
use crate::codec::{Frame, FrameCodec, FrameKind};
use crate::dispatch::CommandReply;
use crate::error::{CommandError, ConnectError, ConnectionLost};
use crate::event::{self, LightpadEvent};
use crate::transport::{DeviceEndpoint, TransportConfig, millis};

/// Items delivered on the event lane. The lane ends with at most one
/// `Err`, after which the sender is dropped.
pub type EventLane = mpsc::UnboundedReceiver<Result<LightpadEvent, ConnectionLost>>;

type EventSender = mpsc::UnboundedSender<Result<LightpadEvent, ConnectionLost>>;
type Pending = Mutex<HashMap<u32, oneshot::Sender<Frame>>>;

const CLOSE_GRACE: Duration = Duration::from_millis(500);

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Connection {
    endpoint: DeviceEndpoint,
    session: Arc<Session>,
    outbound: mpsc::UnboundedSender<Frame>,
    pending: Arc<Pending>,
    events: Mutex<Option<EventLane>>,
    command_lane: tokio::sync::Mutex<()>,
    next_seq: AtomicU32,
    command_timeout: Duration,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.endpoint)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Start the frame tasks over `stream` and present the session's
    /// house access token.
    ///
    /// A `401`/`403` handshake reply expires the session and yields
    /// [`ConnectError::AuthRejected`].
    pub async fn establish<S>(
        stream: S,
        endpoint: DeviceEndpoint,
        session: Arc<Session>,
        config: &TransportConfig,
    ) -> Result<Self, ConnectError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let conn = Self::spawn(stream, endpoint, session, config.command_timeout);
        match conn.hello(config.handshake_timeout).await {
            Ok(()) => {
                debug!(endpoint = %conn.endpoint, "lightpad session established");
                Ok(conn)
            }
            Err(e) => {
                conn.close();
                Err(e)
            }
        }
    }

    fn spawn<S>(
        stream: S,
        endpoint: DeviceEndpoint,
        session: Arc<Session>,
        command_timeout: Duration,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let pending: Arc<Pending> = Arc::default();
        let cancel = CancellationToken::new();

        tokio::spawn(read_loop(
            FramedRead::new(read_half, FrameCodec::new()),
            Arc::clone(&pending),
            events_tx,
            cancel.clone(),
            endpoint.to_string(),
        ));
        tokio::spawn(write_loop(
            FramedWrite::new(write_half, FrameCodec::new()),
            outbound_rx,
            cancel.clone(),
        ));

        Self {
            endpoint,
            session,
            outbound,
            pending,
            events: Mutex::new(Some(events_rx)),
            command_lane: tokio::sync::Mutex::new(()),
            next_seq: AtomicU32::new(1),
            command_timeout,
            cancel,
        }
    }

    async fn hello(&self, budget: Duration) -> Result<(), ConnectError> {
        let body = json!({
            "llid": self.endpoint.id,
            "hat": self.session.token().expose_secret(),
        });

        let frame = match self.round_trip(FrameKind::Hello, &body, budget).await {
            Ok(frame) => frame,
            Err(CommandError::Timeout { timeout_ms }) => {
                return Err(ConnectError::Timeout { timeout_ms });
            }
            Err(CommandError::SessionExpired) => {
                return Err(ConnectError::AuthRejected {
                    reason: "session expired".into(),
                });
            }
            Err(e) => {
                return Err(ConnectError::Unreachable {
                    addr: self.endpoint.socket_addr().to_string(),
                    reason: format!("handshake failed: {e}"),
                });
            }
        };

        let reply = CommandReply::parse(&frame).map_err(|e| ConnectError::Unreachable {
            addr: self.endpoint.socket_addr().to_string(),
            reason: format!("malformed handshake reply: {e}"),
        })?;

        match reply.status {
            s if (200..300).contains(&s) => Ok(()),
            401 | 403 => {
                self.session.expire();
                Err(ConnectError::AuthRejected {
                    reason: reply
                        .message
                        .unwrap_or_else(|| format!("device answered {}", reply.status)),
                })
            }
            s => Err(ConnectError::Unreachable {
                addr: self.endpoint.socket_addr().to_string(),
                reason: format!("handshake refused with status {s}"),
            }),
        }
    }

    /// Send one frame and wait for the reply carrying the same `seq`.
    /// Holds the command lane for the whole round trip. Nothing is sent
    /// once the session has expired.
    pub(crate) async fn round_trip(
        &self,
        kind: FrameKind,
        body: &serde_json::Value,
        budget: Duration,
    ) -> Result<Frame, CommandError> {
        let _lane = self.command_lane.lock().await;
        if self.is_closed() {
            return Err(CommandError::TransportClosed);
        }
        if self.session.is_expired() {
            return Err(CommandError::SessionExpired);
        }

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let frame =
            Frame::json(kind, seq, body).map_err(|e| CommandError::invalid("body", e.to_string()))?;

        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(seq, tx);
        // The reader cancels before clearing `pending`, so a waiter
        // registered after that clear is caught here.
        if self.is_closed() || self.outbound.send(frame).is_err() {
            lock(&self.pending).remove(&seq);
            return Err(CommandError::TransportClosed);
        }
        trace!(seq, ?kind, "frame queued");

        match timeout(budget, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(CommandError::TransportClosed),
            Err(_) => {
                lock(&self.pending).remove(&seq);
                Err(CommandError::Timeout {
                    timeout_ms: millis(budget),
                })
            }
        }
    }

    pub fn endpoint(&self) -> &DeviceEndpoint {
        &self.endpoint
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    /// Take the event lane. Only the first caller gets it.
    pub fn take_events(&self) -> Option<EventLane> {
        lock(&self.events).take()
    }

    /// Stop both frame tasks. Pending commands fail with
    /// [`CommandError::TransportClosed`]; the event lane ends without a
    /// loss item.
    pub fn close(&self) {
        if !self.cancel.is_cancelled() {
            debug!(endpoint = %self.endpoint, "closing lightpad connection");
        }
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the connection is closed, locally or by the device.
    pub async fn closed(&self) {
        self.cancel.cancelled().await;
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ── Frame tasks ──────────────────────────────────────────────────────

async fn read_loop<R>(
    mut frames: FramedRead<R, FrameCodec>,
    pending: Arc<Pending>,
    events: EventSender,
    cancel: CancellationToken,
    endpoint: String,
) where
    R: AsyncRead + Unpin,
{
    let lost = loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break None,
            frame = frames.next() => match frame {
                Some(Ok(frame)) => route(frame, &pending, &events),
                Some(Err(e)) => break Some(ConnectionLost { reason: e.to_string() }),
                None => break Some(ConnectionLost { reason: "device closed".into() }),
            },
        }
    };

    if let Some(lost) = lost {
        warn!(%endpoint, reason = %lost.reason, "lightpad connection lost");
        let _ = events.send(Err(lost));
    }

    cancel.cancel();
    lock(&pending).clear();
}

fn route(frame: Frame, pending: &Pending, events: &EventSender) {
    match frame.kind {
        FrameKind::Reply => {
            let waiter = lock(pending).remove(&frame.seq);
            match waiter {
                Some(waiter) => {
                    let _ = waiter.send(frame);
                }
                None => debug!(seq = frame.seq, "reply with no waiting command"),
            }
        }
        FrameKind::Event => {
            let event = event::classify(&frame.body_text());
            trace!(kind = event.kind(), "event");
            let _ = events.send(Ok(event));
        }
        FrameKind::Other(byte) => {
            debug!(kind = byte, "unrecognised frame kind");
            let _ = events.send(Ok(LightpadEvent::Unknown {
                raw_message: frame.body_text().into_owned(),
            }));
        }
        FrameKind::Hello | FrameKind::Command => {
            debug!(kind = ?frame.kind, "ignoring client-bound frame from device");
        }
    }
}

async fn write_loop<W>(
    mut sink: FramedWrite<W, FrameCodec>,
    mut outbound: mpsc::UnboundedReceiver<Frame>,
    cancel: CancellationToken,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            frame = outbound.recv() => match frame {
                Some(frame) => {
                    if let Err(e) = sink.send(frame).await {
                        warn!(error = %e, "lightpad write failed");
                        cancel.cancel();
                        break;
                    }
                }
                None => break,
            },
        }
    }

    let _ = timeout(CLOSE_GRACE, sink.close()).await;
}
