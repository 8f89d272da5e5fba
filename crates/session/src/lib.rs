//! Session core for webOS TVs - pairing handshake and request correlation.
//!
//! A webOS television exposes one WebSocket command channel carrying JSON
//! envelopes in both directions. This crate provides the session layer on
//! top of that channel:
//!
//! - **Transport**: WebSocket (or any substitute) split into a write half
//!   and an inbound frame stream
//! - **Correlation**: request ids mapped to oneshot waiters, delivered
//!   at most once, swept when abandoned
//! - **Pairing**: the registration handshake trading a capability manifest
//!   for a long-lived client key
//! - **Session**: the facade tying the above together over one connection
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────┐
//! │    callers    │  send / request / register
//! └───────┬───────┘
//! ┌───────▼───────┐
//! │    Session    │
//! │  ┌──────────┐ │
//! │  │ Registry │ │  id → waiter correlation
//! │  └──────────┘ │
//! │  ┌──────────┐ │
//! │  │ Pairing  │ │  registration state machine
//! │  └──────────┘ │
//! │  ┌──────────┐ │
//! │  │ Transport│ │  WebSocket / in-memory frames
//! │  └──────────┘ │
//! └───────────────┘
//! ```
//!
//! # Quick start
//!
//! ```no_run
//! use std::time::Duration;
//! use webos_protocol::Manifest;
//! use webos_session::{MemoryStore, PairingState, Session};
//!
//! # async fn pair() -> webos_session::Result<()> {
//! let session = Session::connect("192.168.1.50").await?;
//! let store = MemoryStore::new();
//!
//! let mut flow = session.register(&store, Manifest::lg_remote(), Duration::from_secs(60))?;
//! while let Some(state) = flow.next().await {
//!     if state? == PairingState::PromptSent {
//!         println!("Accept the pairing prompt on your TV");
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod pairing;
pub mod registry;
pub mod session;
pub mod store;
pub mod transport;

// Re-export key types at crate root
pub use error::{Error, Result};
pub use pairing::{PairingFlow, PairingState};
pub use registry::{SubscriptionSender, WaiterRegistry, WaiterSender};
pub use session::Session;
pub use store::{CLIENT_KEY, CredentialStore, MemoryStore};
pub use transport::{FakeRemote, PORT, TransportParts, TransportSender, channel_pair, connect};
