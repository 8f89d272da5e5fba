//! Transport layer: WebSocket and in-memory frame channels.
//!
//! The session never owns a socket type directly. It holds a boxed
//! [`TransportSender`] for the write side and drains an mpsc channel of
//! inbound text frames for the read side, so alternate transports (most
//! importantly the in-memory [`channel_pair`] used in tests) can be
//! substituted without touching the session.

use std::future::Future;
use std::pin::Pin;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use webos_protocol::Envelope;

use crate::error::{Error, Result};

/// Fixed command-channel port on the device.
pub const PORT: u16 = 3000;

/// Write half of a transport.
///
/// Object-safe via boxed futures; the session's writer task is the sole
/// owner, which is what keeps outbound frames from interleaving.
pub trait TransportSender: Send {
    /// Writes one text frame to the wire.
    fn send(&mut self, frame: String) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Closes the write side, completing a close handshake where the
    /// transport has one.
    fn close(&mut self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Both halves of a connected transport, ready to hand to a session.
pub struct TransportParts {
    /// Write half, consumed by the session's writer task.
    pub sender: Box<dyn TransportSender>,
    /// Inbound text frames, fed serially by whatever owns the read half.
    pub frames: mpsc::UnboundedReceiver<String>,
}

/// Opens the WebSocket command channel to a device.
///
/// Spawns the read pump that forwards inbound text frames into
/// `TransportParts::frames`; the pump ends when the device closes the
/// socket or the receiver is dropped.
pub async fn connect(host: &str) -> Result<TransportParts> {
    let url = format!("ws://{host}:{PORT}/");
    let (socket, _response) = connect_async(&url)
        .await
        .map_err(|e| Error::Transport(format!("connect to {url}: {e}")))?;

    let (sink, stream) = socket.split();
    let (frame_tx, frames) = mpsc::unbounded_channel();

    tokio::spawn(read_pump(stream, frame_tx));

    Ok(TransportParts {
        sender: Box::new(WebSocketSender { sink }),
        frames,
    })
}

type WsSink = futures_util::stream::SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

struct WebSocketSender {
    sink: WsSink,
}

impl TransportSender for WebSocketSender {
    fn send(&mut self, frame: String) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.sink
                .send(Message::Text(frame))
                .await
                .map_err(|e| Error::Transport(e.to_string()))
        })
    }

    fn close(&mut self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            let _ = self.sink.close().await;
        })
    }
}

async fn read_pump(mut stream: WsStream, frame_tx: mpsc::UnboundedSender<String>) {
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => {
                if frame_tx.send(text).is_err() {
                    break;
                }
            }
            Ok(Message::Close(_)) => break,
            // Pings are answered by tungstenite; binary frames do not occur
            // on this protocol.
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!("WebSocket read error: {e}");
                break;
            }
        }
    }
}

/// Creates an in-memory transport plus the remote end driving it.
///
/// The returned [`FakeRemote`] observes every frame the session writes and
/// can inject inbound frames, which is enough to script a device
/// deterministically in tests.
pub fn channel_pair() -> (TransportParts, FakeRemote) {
    let (frame_tx, frames) = mpsc::unbounded_channel();
    let (written_tx, written_rx) = mpsc::unbounded_channel();

    let parts = TransportParts {
        sender: Box::new(ChannelSender { tx: written_tx }),
        frames,
    };
    let remote = FakeRemote {
        inbound: frame_tx,
        written: written_rx,
    };
    (parts, remote)
}

struct ChannelSender {
    tx: mpsc::UnboundedSender<String>,
}

impl TransportSender for ChannelSender {
    fn send(&mut self, frame: String) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let result = self
            .tx
            .send(frame)
            .map_err(|_| Error::Transport("remote end dropped".to_string()));
        Box::pin(async move { result })
    }

    fn close(&mut self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async {})
    }
}

/// The device side of an in-memory transport.
pub struct FakeRemote {
    inbound: mpsc::UnboundedSender<String>,
    written: mpsc::UnboundedReceiver<String>,
}

impl FakeRemote {
    /// Injects a raw inbound frame, as if the device had sent it.
    pub fn inject(&self, frame: impl Into<String>) {
        let _ = self.inbound.send(frame.into());
    }

    /// Injects a reply envelope for the given request id.
    pub fn reply(&self, kind: &str, id: &str, payload: serde_json::Value) {
        let envelope = Envelope::new(kind, id, None, Some(payload));
        self.inject(serde_json::to_string(&envelope).expect("envelope serializes"));
    }

    /// Next raw frame the session wrote, or `None` once the session is gone.
    pub async fn recv_frame(&mut self) -> Option<String> {
        self.written.recv().await
    }

    /// Next written frame, decoded as an envelope.
    pub async fn recv_envelope(&mut self) -> Option<Envelope> {
        let frame = self.recv_frame().await?;
        serde_json::from_str(&frame).ok()
    }
}
