//! Abstract peer connection interface
//!
//! The engine drives an external ICE/DTLS/SRTP stack through
//! [`PeerConnection`] and receives its callbacks through
//! [`PeerConnectionObserver`]. The connection holds only a weak reference
//! to the observer, so the call machine owns the connection and not the
//! other way around.

use crate::media::MediaTrack;
use crate::types::{
    IceCandidate, IceConnectionState, IceGatheringState, SessionDescription, StreamPurpose,
};
use async_trait::async_trait;
use std::sync::{Arc, Weak};
use thiserror::Error;

/// Peer connection operation errors
#[derive(Error, Debug)]
pub enum PeerConnectionError {
    /// Creating the offer failed
    #[error("failed to create offer: {0}")]
    CreateOffer(String),

    /// Creating the answer failed
    #[error("failed to create answer: {0}")]
    CreateAnswer(String),

    /// Applying the local description failed
    #[error("failed to set local description: {0}")]
    SetLocalDescription(String),

    /// Applying the remote description failed
    #[error("failed to set remote description: {0}")]
    SetRemoteDescription(String),

    /// The stack rejected an ICE candidate
    #[error("failed to add ICE candidate: {0}")]
    AddCandidate(String),

    /// A track add/remove/replace failed
    #[error("track operation failed: {0}")]
    Track(String),

    /// The connection was already closed
    #[error("peer connection closed")]
    Closed,
}

/// A negotiated data channel
pub trait DataChannel: Send + Sync {
    /// Label the channel was created with
    fn label(&self) -> String;

    /// Close the channel
    fn close(&self);
}

/// The media transport capability consumed by the call machine.
///
/// One peer connection is exclusively owned by one call and is never
/// touched from outside the state machine after construction.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Create an SDP offer for the current set of senders
    async fn create_offer(&self) -> Result<SessionDescription, PeerConnectionError>;

    /// Create an SDP answer to the applied remote offer
    async fn create_answer(&self) -> Result<SessionDescription, PeerConnectionError>;

    /// Apply a local description; `None` lets the stack pick the
    /// description implied by its signalling state
    async fn set_local_description(
        &self,
        description: Option<SessionDescription>,
    ) -> Result<(), PeerConnectionError>;

    /// Apply a remote description
    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), PeerConnectionError>;

    /// Add a remote ICE candidate
    async fn add_ice_candidate(&self, candidate: IceCandidate)
        -> Result<(), PeerConnectionError>;

    /// Start sending a local track
    async fn add_track(&self, track: Arc<dyn MediaTrack>) -> Result<(), PeerConnectionError>;

    /// Stop sending a local track; returns whether the track was known
    async fn remove_track(&self, track: &Arc<dyn MediaTrack>)
        -> Result<bool, PeerConnectionError>;

    /// Swap the source of a sender in place; returns whether the swap was
    /// codec-compatible (an incompatible swap triggers renegotiation)
    async fn replace_track(
        &self,
        old: &Arc<dyn MediaTrack>,
        new: Arc<dyn MediaTrack>,
    ) -> Result<bool, PeerConnectionError>;

    /// Open a data channel
    fn create_data_channel(&self);

    /// The negotiated data channel, if one exists
    fn data_channel(&self) -> Option<Arc<dyn DataChannel>>;

    /// Tracks currently received from the remote side
    fn remote_tracks(&self) -> Vec<Arc<dyn MediaTrack>>;

    /// Current ICE gathering state
    fn ice_gathering_state(&self) -> IceGatheringState;

    /// The local description currently in effect, if any
    fn local_description(&self) -> Option<SessionDescription>;

    /// Tell the connection that stream purposes changed so remote tracks
    /// re-evaluate their type through
    /// [`PeerConnectionObserver::purpose_for_stream_id`]
    fn notify_stream_purpose_changed(&self);

    /// Install the observer receiving this connection's callbacks
    fn set_observer(&self, observer: Weak<dyn PeerConnectionObserver>);

    /// Close the connection; idempotent
    async fn close(&self);
}

/// Callback surface the peer connection reports into
pub trait PeerConnectionObserver: Send + Sync {
    /// The ICE connection state changed
    fn on_ice_connection_state_change(&self, state: IceConnectionState);

    /// A local ICE candidate was gathered
    fn on_local_ice_candidate(&self, candidate: IceCandidate);

    /// The ICE gathering state changed
    fn on_ice_gathering_state_change(&self, state: IceGatheringState);

    /// The set of remote tracks changed
    fn on_remote_tracks_changed(&self);

    /// The data channel appeared or disappeared
    fn on_data_channel_changed(&self);

    /// The connection needs (re)negotiation
    fn on_negotiation_needed(&self);

    /// Resolve the purpose of a remote stream; unknown streams default to
    /// [`StreamPurpose::Usermedia`]
    fn purpose_for_stream_id(&self, stream_id: &str) -> StreamPurpose;
}
