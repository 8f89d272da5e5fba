//! Credential store seam.
//!
//! Pairing reads an existing client key before registering and writes the
//! granted one back afterwards; where the key actually lives (file, keyring,
//! config service) is the embedder's business.

use std::collections::HashMap;

use parking_lot::Mutex;

/// Storage key under which the pairing credential is kept.
///
/// This is the *storage* key; the wire field is `client-key`.
pub const CLIENT_KEY: &str = "client_key";

/// Key-value store for the pairing credential.
pub trait CredentialStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: String);
}

/// In-memory store for tests and embedders that persist elsewhere.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: String) {
        self.entries.lock().insert(key.to_string(), value);
    }
}
