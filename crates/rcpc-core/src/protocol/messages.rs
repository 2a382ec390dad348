//! The RCPC envelope vocabulary.
//!
//! Every message exchanged with the host is one JSON object whose `"type"`
//! field names the variant.  All other fields sit next to it in the same
//! object, for example:
//!
//! ```json
//! {"type":"ACTION_MOVE","distanceX":4.5,"distanceY":-2.0}
//! ```
//!
//! Serde's `#[serde(tag = "type")]` attribute handles the discriminator.
//!
//! # Families
//!
//! - **Control** envelopes drive the handshake and session lifecycle and are
//!   interpreted by the client's session loops.
//! - **Feature** envelopes carry pointer, click, media, and volume actions.
//!   The connection core treats them as opaque payloads and hands them to
//!   whoever subscribed for network events.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ── Protocol constants ────────────────────────────────────────────────────────

/// TCP port the host application listens on.
pub const DEFAULT_PORT: u16 = 666;

/// Name of the discriminator field present in every envelope.
pub const TYPE_FIELD: &str = "type";

/// Longest envelope line accepted from the wire, newline excluded.
pub const MAX_ENVELOPE_LEN: usize = 64 * 1024;

// ── Envelope ──────────────────────────────────────────────────────────────────

/// One protocol message.
///
/// Envelopes are immutable values; build a new one instead of editing a
/// received one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Envelope {
    // ── Control ───────────────────────────────────────────────────────────────
    /// Identity announcement carrying the stable per-install device identifier.
    #[serde(rename = "INFO_UUID")]
    InfoUuid { uuid: String },

    /// Host accepted the connection.
    #[serde(rename = "INFO_USER_ACCEPTED_CONNECTION")]
    Accepted,

    /// Either side is closing the connection.  Sent by the host in place of
    /// [`Envelope::Accepted`] it means the connection was refused.
    #[serde(rename = "INFO_USER_CLOSED_CONNECTION")]
    Closed,

    /// Host asks the client to announce its identity again.
    #[serde(rename = "ACTION_GET_UUID")]
    GetUuid,

    // ── Pointer ───────────────────────────────────────────────────────────────
    #[serde(rename = "ACTION_MOVE")]
    Move {
        #[serde(rename = "distanceX")]
        distance_x: f32,
        #[serde(rename = "distanceY")]
        distance_y: f32,
    },

    #[serde(rename = "ACTION_SCROLL")]
    Scroll {
        #[serde(rename = "distanceX")]
        distance_x: f32,
        #[serde(rename = "distanceY")]
        distance_y: f32,
    },

    #[serde(rename = "ACTION_PRIMARY_CLICK")]
    PrimaryClick,

    #[serde(rename = "ACTION_SECONDARY_CLICK")]
    SecondaryClick,

    #[serde(rename = "ACTION_MIDDLE_CLICK")]
    MiddleClick,

    #[serde(rename = "ACTION_CLICK_AND_DRAG_START")]
    DragStart,

    #[serde(rename = "ACTION_CLICK_AND_DRAG_MOVE")]
    DragMove {
        #[serde(rename = "distanceX")]
        distance_x: f32,
        #[serde(rename = "distanceY")]
        distance_y: f32,
    },

    #[serde(rename = "ACTION_CLICK_AND_DRAG_END")]
    DragEnd,

    // ── Media transport ───────────────────────────────────────────────────────
    #[serde(rename = "ACTION_STOP")]
    Stop,

    #[serde(rename = "ACTION_PLAY_PAUSE")]
    PlayPause,

    #[serde(rename = "ACTION_PREVIOUS_TRACK")]
    PreviousTrack,

    #[serde(rename = "ACTION_NEXT_TRACK")]
    NextTrack,

    // ── Volume ────────────────────────────────────────────────────────────────
    /// Asks the host to reply with an [`Envelope::VolumeUpdate`].
    #[serde(rename = "ACTION_GET_CURRENT_VOLUME")]
    GetVolume,

    /// Sets the host's master volume.  `volume` is a slider value in `0..=100`.
    #[serde(rename = "ACTION_SET_VOLUME")]
    SetVolume { volume: f32 },

    /// Host reports its master volume as a fraction in `0.0..=1.0`.
    #[serde(rename = "INFO_CURRENT_VOLUME_UPDATE")]
    VolumeUpdate { volume: f64 },

    /// A well-formed envelope whose `type` is not part of this vocabulary.
    ///
    /// Produced only by the decoder; passed through to listeners untouched.
    /// `fields` holds every member of the object except `type`.
    #[serde(skip)]
    Unknown {
        kind: String,
        fields: Map<String, Value>,
    },
}

impl Envelope {
    /// Builds the identity announcement for `device_id`.
    pub fn identity(device_id: impl Into<String>) -> Self {
        Envelope::InfoUuid {
            uuid: device_id.into(),
        }
    }

    /// Returns the discriminator of this envelope.
    pub fn kind(&self) -> EnvelopeKind {
        match self {
            Envelope::InfoUuid { .. } => EnvelopeKind::InfoUuid,
            Envelope::Accepted => EnvelopeKind::Accepted,
            Envelope::Closed => EnvelopeKind::Closed,
            Envelope::GetUuid => EnvelopeKind::GetUuid,
            Envelope::Move { .. } => EnvelopeKind::Move,
            Envelope::Scroll { .. } => EnvelopeKind::Scroll,
            Envelope::PrimaryClick => EnvelopeKind::PrimaryClick,
            Envelope::SecondaryClick => EnvelopeKind::SecondaryClick,
            Envelope::MiddleClick => EnvelopeKind::MiddleClick,
            Envelope::DragStart => EnvelopeKind::DragStart,
            Envelope::DragMove { .. } => EnvelopeKind::DragMove,
            Envelope::DragEnd => EnvelopeKind::DragEnd,
            Envelope::Stop => EnvelopeKind::Stop,
            Envelope::PlayPause => EnvelopeKind::PlayPause,
            Envelope::PreviousTrack => EnvelopeKind::PreviousTrack,
            Envelope::NextTrack => EnvelopeKind::NextTrack,
            Envelope::GetVolume => EnvelopeKind::GetVolume,
            Envelope::SetVolume { .. } => EnvelopeKind::SetVolume,
            Envelope::VolumeUpdate { .. } => EnvelopeKind::VolumeUpdate,
            Envelope::Unknown { .. } => EnvelopeKind::Unknown,
        }
    }

    /// Returns the wire value of the `type` field.
    pub fn type_name(&self) -> &str {
        match self {
            Envelope::Unknown { kind, .. } => kind,
            other => other.kind().as_str(),
        }
    }
}

// ── Envelope kinds ────────────────────────────────────────────────────────────

/// Field-less discriminator of an [`Envelope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvelopeKind {
    InfoUuid,
    Accepted,
    Closed,
    GetUuid,
    Move,
    Scroll,
    PrimaryClick,
    SecondaryClick,
    MiddleClick,
    DragStart,
    DragMove,
    DragEnd,
    Stop,
    PlayPause,
    PreviousTrack,
    NextTrack,
    GetVolume,
    SetVolume,
    VolumeUpdate,
    Unknown,
}

impl EnvelopeKind {
    /// Every kind that has a wire name, in declaration order.
    pub const KNOWN: [EnvelopeKind; 19] = [
        EnvelopeKind::InfoUuid,
        EnvelopeKind::Accepted,
        EnvelopeKind::Closed,
        EnvelopeKind::GetUuid,
        EnvelopeKind::Move,
        EnvelopeKind::Scroll,
        EnvelopeKind::PrimaryClick,
        EnvelopeKind::SecondaryClick,
        EnvelopeKind::MiddleClick,
        EnvelopeKind::DragStart,
        EnvelopeKind::DragMove,
        EnvelopeKind::DragEnd,
        EnvelopeKind::Stop,
        EnvelopeKind::PlayPause,
        EnvelopeKind::PreviousTrack,
        EnvelopeKind::NextTrack,
        EnvelopeKind::GetVolume,
        EnvelopeKind::SetVolume,
        EnvelopeKind::VolumeUpdate,
    ];

    /// Wire value of the `type` field for this kind.
    ///
    /// [`EnvelopeKind::Unknown`] has no wire name of its own and maps to `""`.
    pub fn as_str(self) -> &'static str {
        match self {
            EnvelopeKind::InfoUuid => "INFO_UUID",
            EnvelopeKind::Accepted => "INFO_USER_ACCEPTED_CONNECTION",
            EnvelopeKind::Closed => "INFO_USER_CLOSED_CONNECTION",
            EnvelopeKind::GetUuid => "ACTION_GET_UUID",
            EnvelopeKind::Move => "ACTION_MOVE",
            EnvelopeKind::Scroll => "ACTION_SCROLL",
            EnvelopeKind::PrimaryClick => "ACTION_PRIMARY_CLICK",
            EnvelopeKind::SecondaryClick => "ACTION_SECONDARY_CLICK",
            EnvelopeKind::MiddleClick => "ACTION_MIDDLE_CLICK",
            EnvelopeKind::DragStart => "ACTION_CLICK_AND_DRAG_START",
            EnvelopeKind::DragMove => "ACTION_CLICK_AND_DRAG_MOVE",
            EnvelopeKind::DragEnd => "ACTION_CLICK_AND_DRAG_END",
            EnvelopeKind::Stop => "ACTION_STOP",
            EnvelopeKind::PlayPause => "ACTION_PLAY_PAUSE",
            EnvelopeKind::PreviousTrack => "ACTION_PREVIOUS_TRACK",
            EnvelopeKind::NextTrack => "ACTION_NEXT_TRACK",
            EnvelopeKind::GetVolume => "ACTION_GET_CURRENT_VOLUME",
            EnvelopeKind::SetVolume => "ACTION_SET_VOLUME",
            EnvelopeKind::VolumeUpdate => "INFO_CURRENT_VOLUME_UPDATE",
            EnvelopeKind::Unknown => "",
        }
    }

    /// Looks up a kind by its wire name.
    pub fn from_wire(name: &str) -> Option<EnvelopeKind> {
        Self::KNOWN.into_iter().find(|kind| kind.as_str() == name)
    }

    /// Returns `true` for handshake and lifecycle envelopes.
    pub fn is_control(self) -> bool {
        matches!(
            self,
            EnvelopeKind::InfoUuid
                | EnvelopeKind::Accepted
                | EnvelopeKind::Closed
                | EnvelopeKind::GetUuid
        )
    }
}

impl std::fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnvelopeKind::Unknown => f.write_str("<unknown>"),
            other => f.write_str(other.as_str()),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
