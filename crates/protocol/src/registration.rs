//! Registration (pairing) payload shapes.
//!
//! Pairing trades a capability manifest for a long-lived client key. The
//! manifest content is an opaque signed document the device validates; the
//! session layer only ever merges the optional `client-key` field into it.
//!
//! # Main Types
//!
//! - [`RegistrationRequest`] - the payload of the outgoing `register` envelope
//! - [`RegistrationReply`] - the payload shape of handshake replies
//! - [`Manifest`] - the capability-and-signature document, with
//!   [`Manifest::lg_remote`] providing the stock LG remote manifest

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// How the device should confirm the pairing with its user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PairingType {
    /// On-screen accept/reject prompt, the only mode the stock firmware
    /// offers without a pin pad.
    #[serde(rename = "PROMPT")]
    Prompt,
}

/// Payload of the outgoing `register` envelope.
///
/// Built fresh per pairing attempt: the manifest is shared immutable data,
/// so the optional credential is merged here rather than written into a
/// shared template.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationRequest {
    pub force_pairing: bool,
    pub manifest: Manifest,
    pub pairing_type: PairingType,
    /// Client key from a previous pairing; lets the device skip the prompt.
    #[serde(rename = "client-key", skip_serializing_if = "Option::is_none")]
    pub client_key: Option<String>,
}

impl RegistrationRequest {
    /// Assembles a request from a manifest and an optional stored credential.
    pub fn new(manifest: Manifest, client_key: Option<String>) -> Self {
        Self {
            force_pairing: false,
            manifest,
            pairing_type: PairingType::Prompt,
            client_key,
        }
    }
}

/// Payload shape of handshake replies.
///
/// The device answers a `register` envelope with up to two replies: a
/// `response` whose payload says `pairingType: "PROMPT"` while the user is
/// being asked, then a `registered` envelope carrying the granted key.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegistrationReply {
    #[serde(default, rename = "pairingType")]
    pub pairing_type: Option<String>,
    #[serde(default, rename = "client-key")]
    pub client_key: Option<String>,
}

/// The capability-and-signature document attached to every registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub app_version: String,
    pub manifest_version: u32,
    pub permissions: Vec<String>,
    pub signatures: Vec<ManifestSignature>,
    pub signed: SignedManifest,
}

/// One signature over the manifest's signed block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestSignature {
    pub signature: String,
    pub signature_version: u32,
}

/// The signed inner block of a manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedManifest {
    pub app_id: String,
    pub created: String,
    pub localized_app_names: BTreeMap<String, String>,
    pub localized_vendor_names: BTreeMap<String, String>,
    pub permissions: Vec<String>,
    pub serial: String,
    pub vendor_id: String,
}

/// RSA-SHA256 signature blob of the stock LG remote manifest, as shipped in
/// LG's own test application.
const LG_REMOTE_SIGNATURE: &str = concat!(
    "eyJhbGdvcml0aG0iOiJSU0EtU0hBMjU2Iiwia2V5SWQiOiJ0ZXN0LXNpZ25pbm",
    "ctY2VydCIsInNpZ25hdHVyZVZlcnNpb24iOjF9.hrVRgjCwXVvE2OOSpDZ58hR",
    "+59aFNwYDyjQgKk3auukd7pcegmE2CzPCa0bJ0ZsRAcKkCTJrWo5iDzNhMBWRy",
    "aMOv5zWSrthlf7G128qvIlpMT0YNY+n/FaOHE73uLrS/g7swl3/qH/BGFG2Hu4",
    "RlL48eb3lLKqTt2xKHdCs6Cd4RMfJPYnzgvI4BNrFUKsjkcu+WD4OO2A27Pq1n",
    "50cMchmcaXadJhGrOqH5YmHdOCj5NSHzJYrsW0HPlpuAx/ECMeIZYDh6RMqaFM",
    "2DXzdKX9NmmyqzJ3o/0lkk/N97gfVRLW5hA29yeAwaCViZNCP8iC9aO0q9fQoj",
    "oa7NQnAtw==",
);

impl Manifest {
    /// The stock LG remote-app manifest.
    ///
    /// Grants the full remote-control permission set; the device accepts it
    /// from any client. Callers pairing as their own registered app supply
    /// their own manifest instead.
    pub fn lg_remote() -> Self {
        Self {
            app_version: "1.1".to_string(),
            manifest_version: 1,
            permissions: [
                "LAUNCH",
                "LAUNCH_WEBAPP",
                "APP_TO_APP",
                "CLOSE",
                "TEST_OPEN",
                "TEST_PROTECTED",
                "CONTROL_AUDIO",
                "CONTROL_DISPLAY",
                "CONTROL_INPUT_JOYSTICK",
                "CONTROL_INPUT_MEDIA_RECORDING",
                "CONTROL_INPUT_MEDIA_PLAYBACK",
                "CONTROL_INPUT_TV",
                "CONTROL_POWER",
                "READ_APP_STATUS",
                "READ_CURRENT_CHANNEL",
                "READ_INPUT_DEVICE_LIST",
                "READ_NETWORK_STATE",
                "READ_RUNNING_APPS",
                "READ_TV_CHANNEL_LIST",
                "WRITE_NOTIFICATION_TOAST",
                "READ_POWER_STATE",
                "READ_COUNTRY_INFO",
            ]
            .map(str::to_string)
            .to_vec(),
            signatures: vec![ManifestSignature {
                signature: LG_REMOTE_SIGNATURE.to_string(),
                signature_version: 1,
            }],
            signed: SignedManifest {
                app_id: "com.lge.test".to_string(),
                created: "20140509".to_string(),
                localized_app_names: BTreeMap::from([
                    (String::new(), "LG Remote App".to_string()),
                    ("ko-KR".to_string(), "리모컨 앱".to_string()),
                    ("zxx-XX".to_string(), "ЛГ Rэмotэ AПП".to_string()),
                ]),
                localized_vendor_names: BTreeMap::from([(
                    String::new(),
                    "LG Electronics".to_string(),
                )]),
                permissions: [
                    "TEST_SECURE",
                    "CONTROL_INPUT_TEXT",
                    "CONTROL_MOUSE_AND_KEYBOARD",
                    "READ_INSTALLED_APPS",
                    "READ_LGE_SDX",
                    "READ_NOTIFICATIONS",
                    "SEARCH",
                    "WRITE_SETTINGS",
                    "WRITE_NOTIFICATION_ALERT",
                    "CONTROL_POWER",
                    "READ_CURRENT_CHANNEL",
                    "READ_RUNNING_APPS",
                    "READ_UPDATE_INFO",
                    "UPDATE_FROM_REMOTE_APP",
                    "READ_LGE_TV_INPUT_EVENTS",
                    "READ_TV_CURRENT_TIME",
                ]
                .map(str::to_string)
                .to_vec(),
                serial: "2f930e2d2cfe083771f68e4fe7bb07".to_string(),
                vendor_id: "com.lge".to_string(),
            },
        }
    }
}
