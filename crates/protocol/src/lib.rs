//! Wire types for the webOS TV command protocol.
//!
//! This crate contains the serde-serializable types exchanged with a webOS
//! television over its WebSocket command channel. These types represent the
//! "protocol layer" - the shapes of data as they appear on the wire.
//!
//! # Design Philosophy
//!
//! Types in this crate are:
//! - **Pure data**: No behavior beyond serialization/deserialization
//! - **1:1 with the wire**: Field names match what the device sends and expects
//! - **Stable**: Changes only when the wire protocol changes
//!
//! Connection handling, correlation, and pairing live in `webos-session`.

pub mod envelope;
pub mod registration;

pub use envelope::Envelope;
pub use registration::{
    Manifest, ManifestSignature, PairingType, RegistrationReply, RegistrationRequest,
    SignedManifest,
};
