//! Core types and data structures for the peer call engine

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Default time an invite stays valid before the call is abandoned, in milliseconds.
pub const CALL_TIMEOUT_MS: u64 = 60_000;

/// STUN server used when the environment supplies no ICE servers.
pub const FALLBACK_ICE_SERVER: &str = "stun:turn.matrix.org";

/// Grace period granted to initial ICE candidate gathering before a
/// description is sent out, in milliseconds.
pub const ICE_GATHERING_GRACE_MS: u64 = 200;

/// Trickle batching delay for calls we received, in milliseconds.
pub const CANDIDATE_SEND_DELAY_INBOUND_MS: u64 = 500;

/// Trickle batching delay for calls we placed, in milliseconds.
pub const CANDIDATE_SEND_DELAY_OUTBOUND_MS: u64 = 2_000;

/// Signalling protocol version carried in every invite.
pub const SIGNALLING_VERSION: u32 = 1;

/// Unique identifier for a call, used for log correlation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallId(pub Uuid);

impl CallId {
    /// Create a new random call ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the remote device a signalling message came from.
///
/// Remote clients predating per-device signalling send no party id at all;
/// those map to [`PartyId::Legacy`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PartyId {
    /// A specific remote device
    Device(String),
    /// Legacy client without device-level identity
    Legacy,
}

impl PartyId {
    /// Create a device party id
    pub fn device(id: impl Into<String>) -> Self {
        Self::Device(id.into())
    }
}

impl fmt::Display for PartyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Device(id) => write!(f, "{id}"),
            Self::Legacy => write!(f, "<legacy>"),
        }
    }
}

/// Lifecycle state of a peer call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallState {
    /// Freshly constructed, no direction committed
    Fledgling,
    /// Waiting for local media acquisition to resolve
    WaitLocalMedia,
    /// Producing the initial offer (outbound)
    CreateOffer,
    /// Producing the answer (inbound)
    CreateAnswer,
    /// Invite sent, waiting for an answer
    InviteSent,
    /// Inbound invite applied, waiting for the local user to pick up
    Ringing,
    /// Descriptions exchanged, ICE in progress
    Connecting,
    /// Media flowing
    Connected,
    /// Terminal state; nothing leaves it
    Ended,
}

/// Which side placed or received the call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallDirection {
    /// The remote side invited us
    Inbound,
    /// We placed the call
    Outbound,
}

/// Which side caused the call to end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallParty {
    /// This device
    Local,
    /// The remote device
    Remote,
}

/// Kind of an SDP session description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    /// An offer
    Offer,
    /// A provisional answer
    Pranswer,
    /// A final answer
    Answer,
    /// Rollback to the previous stable description
    Rollback,
}

/// An SDP session description as exchanged over signalling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Description kind
    #[serde(rename = "type")]
    pub kind: SdpType,
    /// Raw SDP payload
    pub sdp: String,
}

impl SessionDescription {
    /// Build a description of the given kind
    pub fn new(kind: SdpType, sdp: impl Into<String>) -> Self {
        Self {
            kind,
            sdp: sdp.into(),
        }
    }
}

/// A trickled ICE candidate.
///
/// An empty `candidate` string is the end-of-candidates marker and is
/// valid on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// Candidate attribute line, possibly empty
    #[serde(default)]
    pub candidate: String,
    /// Media description identifier the candidate belongs to
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    /// Index of the media description the candidate belongs to
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
}

impl IceCandidate {
    /// A candidate carrying neither `sdpMid` nor `sdpMLineIndex` cannot be
    /// routed to a media description and must be skipped.
    #[must_use]
    pub fn is_routable(&self) -> bool {
        self.sdp_mid.is_some() || self.sdp_mline_index.is_some()
    }
}

/// ICE connection state reported by the peer connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceConnectionState {
    /// Gathering has not produced a pair yet
    New,
    /// Connectivity checks in progress
    Checking,
    /// A usable pair was found
    Connected,
    /// All checks finished successfully
    Completed,
    /// Connectivity checks failed
    Failed,
    /// A previously usable pair stopped working
    Disconnected,
    /// The transport was closed
    Closed,
}

/// ICE gathering state reported by the peer connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceGatheringState {
    /// No gathering started
    New,
    /// Candidates are being gathered
    Gathering,
    /// Gathering finished
    Complete,
}

/// Purpose of a remote media stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamPurpose {
    /// Camera and/or microphone
    Usermedia,
    /// Screen capture
    Screenshare,
}

/// Role of a media track within a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackKind {
    /// Microphone audio
    Microphone,
    /// Camera video
    Camera,
    /// Screen-share video
    ScreenShare,
}

/// Per-stream metadata exchanged in-band with offers and answers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamMetadata {
    /// What the stream carries
    pub purpose: StreamPurpose,
    /// Whether the stream's audio is muted at the sender
    #[serde(default)]
    pub audio_muted: bool,
    /// Whether the stream's video is muted at the sender
    #[serde(default)]
    pub video_muted: bool,
}

/// Stream-id-keyed metadata map as carried on the wire
pub type SdpStreamMetadata = HashMap<String, StreamMetadata>;

/// Tunables for a peer call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallConfig {
    /// How long an invite stays valid, in milliseconds
    pub call_timeout_ms: u64,
    /// Grace period for initial candidate gathering, in milliseconds
    pub gathering_grace_ms: u64,
    /// Trickle batching delay for inbound calls, in milliseconds
    pub inbound_candidate_delay_ms: u64,
    /// Trickle batching delay for outbound calls, in milliseconds
    pub outbound_candidate_delay_ms: u64,
    /// ICE servers handed to the peer connection factory
    pub ice_servers: Vec<String>,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: CALL_TIMEOUT_MS,
            gathering_grace_ms: ICE_GATHERING_GRACE_MS,
            inbound_candidate_delay_ms: CANDIDATE_SEND_DELAY_INBOUND_MS,
            outbound_candidate_delay_ms: CANDIDATE_SEND_DELAY_OUTBOUND_MS,
            ice_servers: vec![FALLBACK_ICE_SERVER.to_string()],
        }
    }
}

impl CallConfig {
    /// Trickle batching delay for the given call direction
    #[must_use]
    pub fn candidate_send_delay_ms(&self, direction: CallDirection) -> u64 {
        match direction {
            CallDirection::Inbound => self.inbound_candidate_delay_ms,
            CallDirection::Outbound => self.outbound_candidate_delay_ms,
        }
    }
}
