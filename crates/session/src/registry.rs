//! Correlation registry: maps outstanding request ids to waiters.
//!
//! Two waiter shapes share the map: one-shot waiters for plain
//! request/response pairs, removed on delivery, and persistent
//! subscriptions for flows the device answers more than once under a single
//! id (the pairing handshake). Either shape is removed exactly once - on
//! final delivery, on cancellation, or by the stale sweep. A single mutex
//! guards the map; the delivery send itself always happens after the lock
//! is released, so a waiter can never stall another id's delivery from
//! inside the registry.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use webos_protocol::Envelope;

use crate::error::{Error, Result};

/// Delivery target of a plain outstanding request.
pub type WaiterSender = oneshot::Sender<Result<Envelope>>;

/// Delivery target of a multi-reply subscription.
pub type SubscriptionSender = mpsc::UnboundedSender<Result<Envelope>>;

enum DeliveryTarget {
    Once(WaiterSender),
    Persistent(SubscriptionSender),
}

impl DeliveryTarget {
    fn send(self, delivered: Result<Envelope>) {
        match self {
            DeliveryTarget::Once(tx) => {
                let _ = tx.send(delivered);
            }
            DeliveryTarget::Persistent(tx) => {
                let _ = tx.send(delivered);
            }
        }
    }
}

struct Waiter {
    target: DeliveryTarget,
    created_at: Instant,
}

/// Registry of pending requests keyed by envelope id.
#[derive(Default)]
pub struct WaiterRegistry {
    waiters: Mutex<HashMap<String, Waiter>>,
}

impl WaiterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a one-shot waiter for `id`, consumed by its first delivery.
    ///
    /// # Errors
    ///
    /// [`Error::DuplicateId`] if a waiter is already registered under `id`;
    /// the existing waiter is left untouched.
    pub fn register(&self, id: &str, tx: WaiterSender) -> Result<()> {
        self.insert(id, DeliveryTarget::Once(tx), Instant::now())
    }

    /// Records a persistent waiter for `id`, surviving deliveries until it
    /// is cancelled or swept. For flows where the device sends several
    /// replies under one id; the subscriber must cancel on its terminal
    /// state.
    ///
    /// # Errors
    ///
    /// [`Error::DuplicateId`] as for [`register`](Self::register).
    pub fn subscribe(&self, id: &str, tx: SubscriptionSender) -> Result<()> {
        self.insert(id, DeliveryTarget::Persistent(tx), Instant::now())
    }

    fn insert(&self, id: &str, target: DeliveryTarget, created_at: Instant) -> Result<()> {
        let mut waiters = self.waiters.lock();
        if waiters.contains_key(id) {
            return Err(Error::DuplicateId(id.to_string()));
        }
        waiters.insert(id.to_string(), Waiter { target, created_at });
        Ok(())
    }

    /// Hands `envelope` to the waiter registered under its id. Returns false
    /// when no waiter matched - unsolicited inbound traffic is legal, the
    /// caller just logs it.
    ///
    /// A one-shot waiter is taken out of the map under the lock (at-most-once
    /// by construction); a persistent one stays for the next reply. Either
    /// way the send happens after the lock is released.
    pub fn deliver(&self, id: &str, envelope: Envelope) -> bool {
        enum Target {
            Once(WaiterSender),
            Persistent(SubscriptionSender),
        }

        let target = {
            let mut waiters = self.waiters.lock();
            let persistent = match waiters.get(id) {
                None => return false,
                Some(waiter) => match &waiter.target {
                    DeliveryTarget::Persistent(tx) => Some(tx.clone()),
                    DeliveryTarget::Once(_) => None,
                },
            };
            match persistent {
                Some(tx) => Target::Persistent(tx),
                None => match waiters.remove(id) {
                    Some(Waiter {
                        target: DeliveryTarget::Once(tx),
                        ..
                    }) => Target::Once(tx),
                    // checked present and one-shot under the same lock
                    _ => return false,
                },
            }
        };

        match target {
            Target::Once(tx) => {
                // The receiver may already be gone (caller timed out between
                // our removal and its cancel); that is its problem, not ours.
                let _ = tx.send(Ok(envelope));
            }
            Target::Persistent(tx) => {
                if tx.send(Ok(envelope)).is_err() {
                    // subscriber vanished without cancelling; drop the entry
                    self.cancel(id);
                }
            }
        }
        true
    }

    /// Removes a waiter without delivering anything. Used by the caller-side
    /// timeout path and by subscribers reaching a terminal state; a no-op if
    /// the id is unknown.
    pub fn cancel(&self, id: &str) {
        self.waiters.lock().remove(id);
    }

    /// Removes every waiter older than `ttl` as of `now`, returning how many
    /// went. Backstop for callers that abandoned a request without
    /// cancelling; dropping the sender fails their receiver.
    pub fn sweep(&self, now: Instant, ttl: Duration) -> usize {
        let stale: Vec<Waiter> = {
            let mut waiters = self.waiters.lock();
            let stale_ids: Vec<String> = waiters
                .iter()
                .filter(|(_, w)| now.saturating_duration_since(w.created_at) > ttl)
                .map(|(id, _)| id.clone())
                .collect();
            stale_ids
                .iter()
                .filter_map(|id| waiters.remove(id))
                .collect()
        };
        stale.len()
    }

    /// Drains the registry, failing every pending waiter with
    /// [`Error::ConnectionClosed`]. Called on session close so nothing is
    /// left to time out silently.
    pub fn close_all(&self) {
        let drained: Vec<Waiter> = {
            let mut waiters = self.waiters.lock();
            waiters.drain().map(|(_, waiter)| waiter).collect()
        };
        for waiter in drained {
            waiter.target.send(Err(Error::ConnectionClosed));
        }
    }

    /// Number of outstanding waiters.
    pub fn len(&self) -> usize {
        self.waiters.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    fn register_at(&self, id: &str, tx: WaiterSender, created_at: Instant) -> Result<()> {
        self.insert(id, DeliveryTarget::Once(tx), created_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(id: &str) -> Envelope {
        Envelope::new("response", id, None, None)
    }

    #[test]
    fn deliver_targets_only_the_matching_waiter() {
        let registry = WaiterRegistry::new();
        let (tx_a, mut rx_a) = oneshot::channel();
        let (tx_b, mut rx_b) = oneshot::channel();
        registry.register("a", tx_a).unwrap();
        registry.register("b", tx_b).unwrap();

        assert!(registry.deliver("a", envelope("a")));

        assert_eq!(rx_a.try_recv().unwrap().unwrap().id, "a");
        assert!(rx_b.try_recv().is_err());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn second_deliver_for_same_id_is_unmatched() {
        let registry = WaiterRegistry::new();
        let (tx, _rx) = oneshot::channel();
        registry.register("a", tx).unwrap();

        assert!(registry.deliver("a", envelope("a")));
        assert!(!registry.deliver("a", envelope("a")));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let registry = WaiterRegistry::new();
        let (tx1, mut rx1) = oneshot::channel();
        let (tx2, _rx2) = oneshot::channel();
        let (sub_tx, _sub_rx) = mpsc::unbounded_channel();
        registry.register("a", tx1).unwrap();

        let err = registry.register("a", tx2).unwrap_err();
        assert!(matches!(err, Error::DuplicateId(id) if id == "a"));
        let err = registry.subscribe("a", sub_tx).unwrap_err();
        assert!(matches!(err, Error::DuplicateId(id) if id == "a"));

        // the original waiter is still the one that gets the reply
        assert!(registry.deliver("a", envelope("a")));
        assert!(rx1.try_recv().unwrap().is_ok());
    }

    #[test]
    fn cancel_removes_without_delivery() {
        let registry = WaiterRegistry::new();
        let (tx, mut rx) = oneshot::channel();
        registry.register("a", tx).unwrap();

        registry.cancel("a");

        assert!(registry.is_empty());
        assert!(!registry.deliver("a", envelope("a")));
        // sender was dropped, not fired
        assert!(matches!(
            rx.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        ));
    }

    #[test]
    fn persistent_waiter_survives_deliveries_until_cancelled() {
        let registry = WaiterRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.subscribe("a", tx).unwrap();

        assert!(registry.deliver("a", envelope("a")));
        assert!(registry.deliver("a", envelope("a")));
        assert_eq!(registry.len(), 1);
        assert!(rx.try_recv().unwrap().is_ok());
        assert!(rx.try_recv().unwrap().is_ok());

        registry.cancel("a");
        assert!(!registry.deliver("a", envelope("a")));
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn dropped_subscriber_is_reclaimed_on_delivery() {
        let registry = WaiterRegistry::new();
        let (tx, rx) = mpsc::unbounded_channel();
        registry.subscribe("a", tx).unwrap();
        drop(rx);

        // the delivery hit a dead subscriber; the entry goes with it
        assert!(registry.deliver("a", envelope("a")));
        assert!(registry.is_empty());
        assert!(!registry.deliver("a", envelope("a")));
    }

    #[test]
    fn sweep_removes_only_expired_waiters() {
        let registry = WaiterRegistry::new();
        let base = Instant::now();
        let ttl = Duration::from_secs(60);
        let (tx_old, _rx_old) = oneshot::channel();
        let (tx_fresh, _rx_fresh) = oneshot::channel();
        registry.register_at("old", tx_old, base).unwrap();
        registry
            .register_at("fresh", tx_fresh, base + Duration::from_secs(2))
            .unwrap();

        // at base+61 the first waiter is 61s old, the second 59s
        let swept = registry.sweep(base + Duration::from_secs(61), ttl);

        assert_eq!(swept, 1);
        assert_eq!(registry.len(), 1);
        assert!(registry.deliver("fresh", envelope("fresh")));
        assert!(!registry.deliver("old", envelope("old")));
    }

    #[test]
    fn close_all_fails_every_pending_waiter() {
        let registry = WaiterRegistry::new();
        let (tx_a, mut rx_a) = oneshot::channel();
        let (tx_b, mut rx_b) = oneshot::channel();
        let (sub_tx, mut sub_rx) = mpsc::unbounded_channel();
        registry.register("a", tx_a).unwrap();
        registry.register("b", tx_b).unwrap();
        registry.subscribe("c", sub_tx).unwrap();

        registry.close_all();

        assert!(registry.is_empty());
        for rx in [&mut rx_a, &mut rx_b] {
            let delivered = rx.try_recv().unwrap();
            assert!(matches!(delivered, Err(Error::ConnectionClosed)));
        }
        assert!(matches!(
            sub_rx.try_recv().unwrap(),
            Err(Error::ConnectionClosed)
        ));
    }
}
