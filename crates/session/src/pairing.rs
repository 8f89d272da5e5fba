//! Pairing controller: the registration handshake as an explicit state
//! machine.
//!
//! Pairing trades a capability manifest for a long-lived client key. The
//! exchange over one envelope id looks like:
//!
//! 1. Session sends `register` carrying the manifest, plus any stored key
//! 2. Device may answer with a `pairingType: "PROMPT"` payload while it
//!    asks its user on screen
//! 3. Device answers `registered` carrying the granted `client-key`
//!
//! [`PairingFlow`] surfaces each step to the caller through
//! [`next`](PairingFlow::next) so a UI can show "accept the prompt on your
//! TV" between the two replies.

use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use webos_protocol::{Envelope, Manifest, RegistrationReply, RegistrationRequest};

use crate::error::{Error, Result};
use crate::session::Session;
use crate::store::{CLIENT_KEY, CredentialStore};

/// Where the handshake currently stands.
///
/// Monotonic per flow: `New` → `PromptSent` → `Registered`, with `Failed`
/// reachable from anywhere as the terminal failure. A fresh
/// [`Session::register`] call restarts from `New`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingState {
    /// Registration sent, no reply interpreted yet.
    New,
    /// The device is showing its on-screen prompt.
    PromptSent,
    /// Pairing succeeded; the store holds the granted key.
    Registered,
    /// Handshake failed or timed out. Terminal.
    Failed,
}

impl Session {
    /// Starts the pairing handshake.
    ///
    /// Reads a previously granted key from `store` (under [`CLIENT_KEY`])
    /// and merges it into a fresh registration payload - the manifest is
    /// never mutated, so any number of sessions can pair off one shared
    /// manifest concurrently. The registration envelope goes out before
    /// this returns; drive the returned flow with
    /// [`next`](PairingFlow::next).
    ///
    /// # Errors
    ///
    /// Fails if the session is closed or the payload cannot be built.
    pub fn register<'a>(
        &'a self,
        store: &'a dyn CredentialStore,
        manifest: Manifest,
        timeout: Duration,
    ) -> Result<PairingFlow<'a>> {
        let request = RegistrationRequest::new(manifest, store.get(CLIENT_KEY));
        let payload = serde_json::to_value(&request)?;

        // A persistent subscription, not a one-shot waiter: both handshake
        // replies arrive under this one id, and the second must be buffered
        // even if it lands before the caller polls again.
        let (id, replies) = self.send_subscribed(Envelope::REGISTER, None, Some(payload))?;

        Ok(PairingFlow {
            session: self,
            store,
            deadline: Instant::now() + timeout,
            state: PairingState::New,
            id,
            replies,
            done: false,
        })
    }
}

/// One run of the registration handshake.
pub struct PairingFlow<'a> {
    session: &'a Session,
    store: &'a dyn CredentialStore,
    deadline: Instant,
    state: PairingState,
    id: String,
    replies: mpsc::UnboundedReceiver<Result<Envelope>>,
    done: bool,
}

impl PairingFlow<'_> {
    /// Advances the handshake to its next state notification.
    ///
    /// Yields `Ok(PromptSent)` for each prompt-pending reply,
    /// `Ok(Registered)` once the key is granted and stored, or an error on
    /// an unrecognized reply, timeout, or session loss. After a terminal
    /// state this returns `None`.
    pub async fn next(&mut self) -> Option<Result<PairingState>> {
        if self.done {
            return None;
        }

        let remaining = self.deadline.saturating_duration_since(Instant::now());
        let reply = match tokio::time::timeout(remaining, self.replies.recv()).await {
            Ok(Some(Ok(reply))) => reply,
            Ok(Some(Err(e))) => return Some(self.fail(e)),
            // subscription dropped without a close notification: swept
            Ok(None) => return Some(self.fail(Error::ConnectionClosed)),
            Err(_) => return Some(self.fail(Error::Timeout)),
        };

        Some(self.advance(reply))
    }

    /// Where the handshake currently stands.
    pub fn state(&self) -> PairingState {
        self.state
    }

    fn advance(&mut self, reply: Envelope) -> Result<PairingState> {
        let payload: RegistrationReply = match &reply.payload {
            Some(value) => serde_json::from_value(value.clone()).unwrap_or_default(),
            None => RegistrationReply::default(),
        };

        if reply.is_kind(Envelope::REGISTERED) {
            let Some(key) = payload.client_key else {
                return self.fail(Error::HandshakeFailed(
                    "registered reply without client-key".to_string(),
                ));
            };
            self.store.set(CLIENT_KEY, key);
            self.state = PairingState::Registered;
            self.done = true;
            self.session.cancel_waiter(&self.id);
            return Ok(PairingState::Registered);
        }

        if payload.pairing_type.as_deref() == Some("PROMPT") {
            self.state = PairingState::PromptSent;
            return Ok(PairingState::PromptSent);
        }

        self.fail(Error::HandshakeFailed(format!(
            "unexpected reply of kind '{}'",
            reply.kind
        )))
    }

    /// Terminal failure: unregister the subscription and record the state.
    fn fail(&mut self, e: Error) -> Result<PairingState> {
        self.state = PairingState::Failed;
        self.done = true;
        self.session.cancel_waiter(&self.id);
        Err(e)
    }
}

impl Drop for PairingFlow<'_> {
    fn drop(&mut self) {
        // abandoned mid-handshake: do not leak the waiter
        if !self.done {
            self.session.cancel_waiter(&self.id);
        }
    }
}
