//! Error taxonomy: wire-visible hangup reasons and API errors

use crate::types::CallState;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Reason a call ended, as carried in `Hangup` messages and recorded on the
/// call at termination.
///
/// Every failure source in the engine maps to exactly one of these codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallErrorCode {
    /// The local user ended the call
    UserHangup,
    /// Creating the local offer failed
    LocalOfferFailed,
    /// Local media acquisition was rejected
    NoUserMedia,
    /// Creating the answer failed
    CreateAnswer,
    /// The invite message could not be sent
    SendInvite,
    /// The answer message could not be sent
    SendAnswer,
    /// Applying the local description failed
    SetLocalDescription,
    /// Applying the remote description failed, or it produced no remote tracks
    SetRemoteDescription,
    /// The ICE connection reached the `failed` state
    IceFailed,
    /// No answer arrived (or the user did not pick up) within the invite lifetime
    InviteTimeout,
    /// A non-initial signalling send failed
    SignallingFailed,
    /// Another of our devices answered the call
    AnsweredElsewhere,
    /// The call was replaced by a new one
    Replaced,
    /// The call was transferred
    Transfered,
    /// The remote user is busy
    UserBusy,
    /// Unknown devices prevented the call
    UnknownDevices,
    /// A new session superseded this one
    NewSession,
}

impl CallErrorCode {
    /// Wire representation of the code
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserHangup => "user_hangup",
            Self::LocalOfferFailed => "local_offer_failed",
            Self::NoUserMedia => "no_user_media",
            Self::CreateAnswer => "create_answer",
            Self::SendInvite => "send_invite",
            Self::SendAnswer => "send_answer",
            Self::SetLocalDescription => "set_local_description",
            Self::SetRemoteDescription => "set_remote_description",
            Self::IceFailed => "ice_failed",
            Self::InviteTimeout => "invite_timeout",
            Self::SignallingFailed => "signalling_failed",
            Self::AnsweredElsewhere => "answered_elsewhere",
            Self::Replaced => "replaced",
            Self::Transfered => "transfered",
            Self::UserBusy => "user_busy",
            Self::UnknownDevices => "unknown_devices",
            Self::NewSession => "new_session",
        }
    }
}

impl fmt::Display for CallErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by peer call operations
#[derive(Error, Debug)]
pub enum CallError {
    /// The operation is not valid in the call's current state
    #[error("operation `{operation}` invalid in state {state:?}")]
    InvalidState {
        /// Operation that was attempted
        operation: &'static str,
        /// State the call was in
        state: CallState,
    },

    /// The call terminated while the operation was in flight
    #[error("call terminated: {reason}")]
    Terminated {
        /// Recorded hangup reason
        reason: CallErrorCode,
    },

    /// A peer connection operation failed without terminating the call
    #[error("peer connection failure: {0}")]
    PeerConnection(String),
}

/// Errors from handing a signalling message to the transport
#[derive(Error, Debug)]
pub enum SignallingError {
    /// The transport rejected or failed to deliver the message
    #[error("transport rejected message: {0}")]
    Send(String),

    /// The transport is no longer usable
    #[error("transport closed")]
    Closed,
}
