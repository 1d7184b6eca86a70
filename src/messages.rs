//! Signalling message codec
//!
//! The wire payloads exchanged between the two call legs. Envelope,
//! delivery and encryption are the transport's concern; this module only
//! defines the tagged content union and its JSON mapping.

use crate::error::CallErrorCode;
use crate::types::{IceCandidate, SdpStreamMetadata, SessionDescription};
use serde::{Deserialize, Serialize};

/// A signalling message content payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignallingMessage {
    /// Start a call: the initial offer plus stream metadata
    Invite {
        /// The SDP offer
        offer: SessionDescription,
        /// Purpose and mute flags for the offered streams
        #[serde(default)]
        sdp_stream_metadata: SdpStreamMetadata,
        /// Signalling protocol version
        version: u32,
        /// How long the invite stays valid, in milliseconds; absent means
        /// the receiver applies its default
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lifetime: Option<u64>,
    },

    /// Accept a call: the answer plus stream metadata
    Answer {
        /// The SDP answer
        answer: SessionDescription,
        /// Purpose and mute flags for the answering streams
        #[serde(default)]
        sdp_stream_metadata: SdpStreamMetadata,
    },

    /// A batch of trickled ICE candidates
    Candidates {
        /// Candidates in emission order; blank candidates mark end-of-candidates
        candidates: Vec<IceCandidate>,
    },

    /// Mid-call renegotiation description
    Negotiate {
        /// The renegotiated SDP description
        description: SessionDescription,
        /// Purpose and mute flags for the current streams
        #[serde(default)]
        sdp_stream_metadata: SdpStreamMetadata,
    },

    /// Stream metadata changed without renegotiation (e.g. mute toggles)
    SdpStreamMetadataChanged {
        /// The fresh metadata map
        sdp_stream_metadata: SdpStreamMetadata,
    },

    /// End the call
    Hangup {
        /// Why the sender ended the call
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<CallErrorCode>,
    },

    /// A message kind this engine does not know; ignored on dispatch
    #[serde(other)]
    Unknown,
}

impl SignallingMessage {
    /// Short name of the message kind, for logging
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Invite { .. } => "invite",
            Self::Answer { .. } => "answer",
            Self::Candidates { .. } => "candidates",
            Self::Negotiate { .. } => "negotiate",
            Self::SdpStreamMetadataChanged { .. } => "sdp_stream_metadata_changed",
            Self::Hangup { .. } => "hangup",
            Self::Unknown => "unknown",
        }
    }

    /// Parse a message from its JSON content payload
    ///
    /// # Errors
    ///
    /// Returns a `serde_json` error if the payload is not valid JSON or its
    /// fields do not match the tagged kind.
    pub fn parse(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize the message to its JSON content payload
    ///
    /// # Errors
    ///
    /// Returns a `serde_json` error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
