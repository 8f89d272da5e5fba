//! Session facade over one transport connection.
//!
//! Composes the envelope codec, the waiter registry, and a transport into
//! the synchronous-looking request/response API callers actually want.
//!
//! # Message Flow
//!
//! 1. Caller invokes [`Session::request`] with kind, uri, and payload
//! 2. Session generates a fresh envelope id and registers a oneshot waiter
//! 3. The envelope is serialized and queued to the writer task
//! 4. Caller awaits on the oneshot receiver under its timeout
//! 5. The reader task decodes each inbound frame and delivers it by id
//! 6. Caller receives the matched envelope, or cancels its waiter on timeout
//!
//! The writer task is the sole owner of the transport's write half, so two
//! concurrent sends can never interleave their bytes. The reader task
//! processes frames strictly one at a time; waiters consume their delivered
//! value on their own tasks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;
use webos_protocol::Envelope;

use crate::error::{Error, Result};
use crate::registry::WaiterRegistry;
use crate::transport::{self, TransportParts, TransportSender};

/// Backstop TTL after which undelivered, uncancelled waiters are reclaimed.
const SWEEP_TTL: Duration = Duration::from_secs(60);

enum Outbound {
    Frame(String),
    Shutdown,
}

/// One persistent session with a device.
///
/// Cheap to share: hand out `Arc<Session>` clones to every caller. All of
/// them may issue requests concurrently; one reader drives all deliveries.
pub struct Session {
    registry: WaiterRegistry,
    outbound: mpsc::UnboundedSender<Outbound>,
    closed: AtomicBool,
}

impl Session {
    /// Connects to the device's command channel at `ws://{host}:3000/`.
    pub async fn connect(host: &str) -> Result<Arc<Self>> {
        Ok(Self::from_parts(transport::connect(host).await?))
    }

    /// Builds a session over an already-connected transport.
    ///
    /// Spawns the writer task (sole owner of the write half) and the reader
    /// task (drains inbound frames serially). Both hold only weak handles:
    /// they end when the session is closed, the transport goes away, or the
    /// last `Arc<Session>` is dropped - so an abandoned session releases its
    /// socket without an explicit [`close`](Self::close).
    pub fn from_parts(parts: TransportParts) -> Arc<Self> {
        let TransportParts { sender, mut frames } = parts;
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let session = Arc::new(Self {
            registry: WaiterRegistry::new(),
            outbound: outbound_tx,
            closed: AtomicBool::new(false),
        });

        tokio::spawn(writer_loop(Arc::downgrade(&session), sender, outbound_rx));

        let reader = Arc::downgrade(&session);
        tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                let Some(session) = reader.upgrade() else {
                    break;
                };
                if session.is_closed() {
                    break;
                }
                session.on_frame(&frame);
            }
            // transport gone: fail whatever is still pending
            if let Some(session) = reader.upgrade() {
                session.close();
            }
        });

        session
    }

    /// Fire-and-forget send. Returns the generated envelope id.
    pub fn send(
        &self,
        kind: impl Into<String>,
        uri: Option<String>,
        payload: Option<Value>,
    ) -> Result<String> {
        let id = next_request_id();
        self.write_envelope(&Envelope::new(kind, id.clone(), uri, payload))?;
        Ok(id)
    }

    /// Sends an envelope and awaits its reply.
    ///
    /// On timeout the waiter is cancelled before [`Error::Timeout`] is
    /// returned, so a late reply cannot fire into a caller that gave up and
    /// the registry cannot grow.
    pub async fn request(
        &self,
        kind: impl Into<String>,
        uri: Option<String>,
        payload: Option<Value>,
        timeout: Duration,
    ) -> Result<Envelope> {
        let (id, rx) = self.send_with_waiter(kind, uri, payload)?;
        self.await_reply(&id, rx, timeout).await
    }

    /// Sends an envelope with a waiter armed under its id, leaving the wait
    /// to the caller. The pairing flow uses this to wait repeatedly on one
    /// id across multiple replies.
    pub(crate) fn send_with_waiter(
        &self,
        kind: impl Into<String>,
        uri: Option<String>,
        payload: Option<Value>,
    ) -> Result<(String, oneshot::Receiver<Result<Envelope>>)> {
        let id = next_request_id();
        let (tx, rx) = oneshot::channel();
        self.registry.register(&id, tx)?;

        if let Err(e) = self.write_envelope(&Envelope::new(kind, id.clone(), uri, payload)) {
            self.registry.cancel(&id);
            return Err(e);
        }
        Ok((id, rx))
    }

    /// Sends an envelope with a persistent waiter under its id: every reply
    /// the device addresses to the id lands on the returned receiver, with
    /// nothing lost between polls. The pairing flow uses this because the
    /// device answers one `register` id twice; the subscriber must
    /// [`cancel_waiter`](Self::cancel_waiter) on its terminal state.
    pub(crate) fn send_subscribed(
        &self,
        kind: impl Into<String>,
        uri: Option<String>,
        payload: Option<Value>,
    ) -> Result<(String, mpsc::UnboundedReceiver<Result<Envelope>>)> {
        let id = next_request_id();
        let (tx, rx) = mpsc::unbounded_channel();
        self.registry.subscribe(&id, tx)?;

        if let Err(e) = self.write_envelope(&Envelope::new(kind, id.clone(), uri, payload)) {
            self.registry.cancel(&id);
            return Err(e);
        }
        Ok((id, rx))
    }

    /// Arms a fresh waiter under an id whose previous waiter was consumed.
    pub(crate) fn rearm(&self, id: &str) -> Result<oneshot::Receiver<Result<Envelope>>> {
        let (tx, rx) = oneshot::channel();
        self.registry.register(id, tx)?;
        Ok(rx)
    }

    pub(crate) fn cancel_waiter(&self, id: &str) {
        self.registry.cancel(id);
    }

    /// Awaits a previously armed waiter under `timeout`.
    pub(crate) async fn await_reply(
        &self,
        id: &str,
        rx: oneshot::Receiver<Result<Envelope>>,
        timeout: Duration,
    ) -> Result<Envelope> {
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(delivered)) => delivered,
            // sender dropped without delivery: swept, or session torn down
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => {
                self.registry.cancel(id);
                Err(Error::Timeout)
            }
        }
    }

    /// Decoder entry point for one inbound frame.
    ///
    /// A malformed frame is dropped with a warning; it must never take the
    /// reader loop down. Unmatched envelopes are not errors either - the
    /// device sends unsolicited notifications.
    fn on_frame(&self, frame: &str) {
        let swept = self.registry.sweep(Instant::now(), SWEEP_TTL);
        if swept > 0 {
            tracing::debug!(swept, "reclaimed stale waiters");
        }

        let envelope = match decode_frame(frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!("dropping inbound frame: {e}");
                return;
            }
        };

        let id = envelope.id.clone();
        let kind = envelope.kind.clone();
        if self.registry.deliver(&id, envelope) {
            tracing::debug!(%id, %kind, "delivered envelope");
        } else {
            tracing::debug!(%id, %kind, "unmatched envelope (ignored)");
        }
    }

    fn write_envelope(&self, envelope: &Envelope) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }
        let frame = serde_json::to_string(envelope)?;
        tracing::debug!(id = %envelope.id, kind = %envelope.kind, "sending envelope");
        self.outbound
            .send(Outbound::Frame(frame))
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Closes the session. Idempotent.
    ///
    /// Future sends fail immediately with [`Error::ConnectionClosed`], the
    /// writer task closes the transport, and every still-pending waiter is
    /// delivered [`Error::ConnectionClosed`] rather than being left to time
    /// out. Dropping the last `Arc<Session>` tears the tasks and transport
    /// down too, but without notifying anything - prefer an explicit close
    /// while requests may be in flight.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.outbound.send(Outbound::Shutdown);
        self.registry.close_all();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of requests still awaiting a reply.
    pub fn pending(&self) -> usize {
        self.registry.len()
    }
}

async fn writer_loop(
    session: Weak<Session>,
    mut sender: Box<dyn TransportSender>,
    mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
) {
    // recv() yields None once the session (the only Outbound sender) is
    // dropped, so the loop also ends with the last user handle.
    while let Some(message) = outbound_rx.recv().await {
        match message {
            Outbound::Frame(frame) => {
                if let Err(e) = sender.send(frame).await {
                    tracing::error!("transport write error: {e}");
                    if let Some(session) = session.upgrade() {
                        session.close();
                    }
                    break;
                }
            }
            Outbound::Shutdown => break,
        }
    }
    sender.close().await;
}

fn decode_frame(frame: &str) -> Result<Envelope> {
    serde_json::from_str(frame).map_err(|e| Error::MalformedMessage(e.to_string()))
}

/// Generates a fresh envelope id.
///
/// UUIDv4 rather than a counter: ids stay unique across reconnects and
/// across every concurrent caller without coordination.
fn next_request_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::transport::channel_pair;

    #[tokio::test]
    async fn request_resolves_with_the_matched_reply() {
        let (parts, mut remote) = channel_pair();
        let session = Session::from_parts(parts);

        let requester = {
            let session = Arc::clone(&session);
            tokio::spawn(async move {
                session
                    .request(
                        Envelope::REQUEST,
                        Some("ssap://audio/getVolume".to_string()),
                        None,
                        Duration::from_secs(5),
                    )
                    .await
            })
        };

        let sent = remote.recv_envelope().await.unwrap();
        assert_eq!(sent.kind, Envelope::REQUEST);
        assert_eq!(sent.uri.as_deref(), Some("ssap://audio/getVolume"));

        remote.reply(
            Envelope::RESPONSE,
            &sent.id,
            serde_json::json!({"returnValue": true, "volume": 7}),
        );

        let reply = requester.await.unwrap().unwrap();
        assert_eq!(reply.id, sent.id);
        assert_eq!(reply.payload.unwrap()["volume"], 7);
        assert_eq!(session.pending(), 0);
    }

    #[tokio::test]
    async fn zero_timeout_cancels_the_waiter() {
        let (parts, _remote) = channel_pair();
        let session = Session::from_parts(parts);

        let (id, rx) = session
            .send_with_waiter(Envelope::REQUEST, None, None)
            .unwrap();
        let err = session
            .await_reply(&id, rx, Duration::ZERO)
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        // cancelled, not leaked: the id slot is free again
        assert_eq!(session.pending(), 0);
        let _rx = session.rearm(&id).unwrap();
        assert_eq!(session.pending(), 1);
    }

    #[tokio::test]
    async fn generated_ids_are_pairwise_distinct() {
        let (parts, _remote) = channel_pair();
        let session = Session::from_parts(parts);

        let mut ids = HashSet::new();
        for _ in 0..10_000 {
            let id = session.send(Envelope::REQUEST, None, None).unwrap();
            assert!(ids.insert(id));
        }
        assert_eq!(ids.len(), 10_000);
    }

    #[tokio::test]
    async fn malformed_frame_does_not_stop_the_reader() {
        let (parts, mut remote) = channel_pair();
        let session = Session::from_parts(parts);

        remote.inject("this is not json");
        remote.inject(r#"{"id": 42}"#); // id has the wrong type

        let requester = {
            let session = Arc::clone(&session);
            tokio::spawn(async move {
                session
                    .request(Envelope::REQUEST, None, None, Duration::from_secs(5))
                    .await
            })
        };

        let sent = remote.recv_envelope().await.unwrap();
        remote.reply(Envelope::RESPONSE, &sent.id, serde_json::json!({}));

        assert!(requester.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn unmatched_envelope_is_ignored() {
        let (parts, mut remote) = channel_pair();
        let session = Session::from_parts(parts);

        remote.reply(Envelope::RESPONSE, "nobody-asked", serde_json::json!({}));

        let requester = {
            let session = Arc::clone(&session);
            tokio::spawn(async move {
                session
                    .request(Envelope::REQUEST, None, None, Duration::from_secs(5))
                    .await
            })
        };

        let sent = remote.recv_envelope().await.unwrap();
        remote.reply(Envelope::RESPONSE, &sent.id, serde_json::json!({}));
        assert!(requester.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn close_delivers_connection_closed_to_pending_waiters() {
        let (parts, mut remote) = channel_pair();
        let session = Session::from_parts(parts);

        let requester = {
            let session = Arc::clone(&session);
            tokio::spawn(async move {
                session
                    .request(Envelope::REQUEST, None, None, Duration::from_secs(30))
                    .await
            })
        };

        // wait until the request is actually on the wire (waiter armed)
        let _ = remote.recv_envelope().await.unwrap();
        session.close();

        let err = requester.await.unwrap().unwrap_err();
        assert!(err.is_closed());
        assert_eq!(session.pending(), 0);
    }

    #[tokio::test]
    async fn send_after_close_fails_fast() {
        let (parts, _remote) = channel_pair();
        let session = Session::from_parts(parts);

        session.close();
        session.close(); // idempotent

        let err = session.send(Envelope::REQUEST, None, None).unwrap_err();
        assert!(err.is_closed());

        let err = session
            .request(Envelope::REQUEST, None, None, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.is_closed());
    }

    #[tokio::test]
    async fn transport_loss_closes_the_session() {
        let (parts, mut remote) = channel_pair();
        let session = Session::from_parts(parts);

        let requester = {
            let session = Arc::clone(&session);
            tokio::spawn(async move {
                session
                    .request(Envelope::REQUEST, None, None, Duration::from_secs(30))
                    .await
            })
        };

        let _ = remote.recv_envelope().await.unwrap();
        drop(remote);

        let err = requester.await.unwrap().unwrap_err();
        assert!(err.is_closed());
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn dropping_the_last_handle_releases_the_transport() {
        let (parts, mut remote) = channel_pair();
        let session = Session::from_parts(parts);

        session.send(Envelope::REQUEST, None, None).unwrap();
        assert!(remote.recv_frame().await.is_some());

        // no explicit close: the writer must still wind down and give the
        // write half back once the last handle is gone
        drop(session);
        assert!(remote.recv_frame().await.is_none());
    }

    #[test]
    fn decode_failure_is_malformed_message() {
        let err = decode_frame("{").unwrap_err();
        assert!(matches!(err, Error::MalformedMessage(_)));
    }
}
