//! Data carried inside payloads: presence, user and event subscriptions.
//!
//! These are plain serde structs. Field names match the JSON the desktop
//! application uses; optional fields are skipped when `None` so the peer
//! never sees explicit `null`s it did not ask for.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

use crate::ServerEvent;

// ---------------------------------------------------------------------------
// Rich presence
// ---------------------------------------------------------------------------

/// The status shown on the user's profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RichPresence {
    /// First line under the application name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,

    /// Second line, usually the party status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamps: Option<Timestamps>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assets: Option<Assets>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub party: Option<Party>,

    /// Secrets enable the join and spectate buttons.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secrets: Option<Secrets>,

    /// Up to two link buttons. Cannot be combined with secrets.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buttons: Vec<Button>,

    /// Whether this is an instanced game session.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub instance: bool,
}

impl RichPresence {
    /// Creates an empty presence.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the details line.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Sets the state line.
    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    pub fn with_timestamps(mut self, timestamps: Timestamps) -> Self {
        self.timestamps = Some(timestamps);
        self
    }

    pub fn with_assets(mut self, assets: Assets) -> Self {
        self.assets = Some(assets);
        self
    }

    pub fn with_party(mut self, party: Party) -> Self {
        self.party = Some(party);
        self
    }

    pub fn with_secrets(mut self, secrets: Secrets) -> Self {
        self.secrets = Some(secrets);
        self
    }

    /// Appends a link button.
    pub fn with_button(mut self, label: impl Into<String>, url: impl Into<String>) -> Self {
        self.buttons.push(Button {
            label: label.into(),
            url: url.into(),
        });
        self
    }
}

/// Start and end of the activity, in Unix seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamps {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<u64>,
}

/// Image keys uploaded to the application, with hover texts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assets {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub large_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub large_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub small_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub small_text: Option<String>,
}

/// The party the user is in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Party {
    pub id: String,
    /// `[current, max]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<[u32; 2]>,
}

/// Opaque secrets handed back to the game on join or spectate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secrets {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spectate: Option<String>,
    #[serde(default, rename = "match", skip_serializing_if = "Option::is_none")]
    pub match_secret: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
    pub label: String,
    pub url: String,
}

// ---------------------------------------------------------------------------
// Ready metadata
// ---------------------------------------------------------------------------

/// The user logged into the desktop application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discriminator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_name: Option<String>,
    /// Avatar hash, if the user has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default)]
    pub bot: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub premium_type: Option<u8>,
}

impl User {
    /// The name to show: the global name when set, else the username.
    pub fn display_name(&self) -> &str {
        self.global_name.as_deref().unwrap_or(&self.username)
    }
}

/// Environment the peer runs in, reported with `READY`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    #[serde(default)]
    pub cdn_host: String,
    #[serde(default)]
    pub api_endpoint: String,
    #[serde(default)]
    pub environment: String,
}

// ---------------------------------------------------------------------------
// Event subscriptions
// ---------------------------------------------------------------------------

/// A set of subscribable server events.
///
/// ```
/// use presence_rpc_protocol::EventFlags;
///
/// let flags = EventFlags::JOIN | EventFlags::SPECTATE;
/// assert!(flags.contains(EventFlags::JOIN));
/// assert!(!flags.contains(EventFlags::JOIN_REQUEST));
/// ```
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct EventFlags(u8);

impl EventFlags {
    pub const NONE: EventFlags = EventFlags(0);
    /// `ACTIVITY_JOIN`.
    pub const JOIN: EventFlags = EventFlags(1);
    /// `ACTIVITY_SPECTATE`.
    pub const SPECTATE: EventFlags = EventFlags(1 << 1);
    /// `ACTIVITY_JOIN_REQUEST`.
    pub const JOIN_REQUEST: EventFlags = EventFlags(1 << 2);

    const EVENTS: [(EventFlags, ServerEvent); 3] = [
        (EventFlags::JOIN, ServerEvent::ActivityJoin),
        (EventFlags::SPECTATE, ServerEvent::ActivitySpectate),
        (EventFlags::JOIN_REQUEST, ServerEvent::ActivityJoinRequest),
    ];

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Whether every flag in `other` is also in `self`.
    pub fn contains(self, other: EventFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Flags in `self` that are not in `other`.
    pub fn difference(self, other: EventFlags) -> EventFlags {
        EventFlags(self.0 & !other.0)
    }

    /// The server events these flags stand for, in a fixed order.
    pub fn events(self) -> impl Iterator<Item = ServerEvent> {
        Self::EVENTS
            .into_iter()
            .filter(move |(flag, _)| self.contains(*flag))
            .map(|(_, evt)| evt)
    }
}

impl BitOr for EventFlags {
    type Output = EventFlags;

    fn bitor(self, rhs: EventFlags) -> EventFlags {
        EventFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for EventFlags {
    fn bitor_assign(&mut self, rhs: EventFlags) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for EventFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.events()).finish()
    }
}
