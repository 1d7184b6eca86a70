//! Local media abstractions
//!
//! The engine never captures media itself; it receives a [`LocalMedia`]
//! handle owning the local tracks and consumes remote tracks through the
//! same [`MediaTrack`] capability.

use crate::types::{SdpStreamMetadata, TrackKind};
use std::sync::Arc;
use thiserror::Error;

/// Media acquisition and device errors
#[derive(Error, Debug)]
pub enum MediaError {
    /// The user or platform rejected media acquisition
    #[error("media acquisition failed: {0}")]
    Acquisition(String),

    /// A requested capture device does not exist
    #[error("device not found: {0}")]
    DeviceNotFound(String),
}

/// A single media track, local or remote
pub trait MediaTrack: Send + Sync {
    /// Role of the track within the call
    fn kind(&self) -> TrackKind;

    /// Identifier of the stream the track belongs to
    fn stream_id(&self) -> String;

    /// Whether the track is currently muted
    fn is_muted(&self) -> bool;

    /// Mute or unmute the track
    fn set_muted(&self, muted: bool);

    /// Stop the track and release its source
    fn stop(&self);
}

/// Handle owning the local tracks of one call leg.
///
/// Any subset of the three roles may be present.
pub trait LocalMedia: Send + Sync {
    /// All tracks carried by this handle
    fn tracks(&self) -> Vec<Arc<dyn MediaTrack>>;

    /// The microphone track, if any
    fn microphone_track(&self) -> Option<Arc<dyn MediaTrack>>;

    /// The camera track, if any
    fn camera_track(&self) -> Option<Arc<dyn MediaTrack>>;

    /// The screen-share track, if any
    fn screen_share_track(&self) -> Option<Arc<dyn MediaTrack>>;

    /// Stream metadata describing the local streams, as sent with offers
    /// and answers
    fn sdp_metadata(&self) -> SdpStreamMetadata;

    /// The track filling the given role, if any
    fn track(&self, kind: TrackKind) -> Option<Arc<dyn MediaTrack>> {
        match kind {
            TrackKind::Microphone => self.microphone_track(),
            TrackKind::Camera => self.camera_track(),
            TrackKind::ScreenShare => self.screen_share_track(),
        }
    }

    /// Stop every track owned by this handle
    fn stop_all(&self) {
        for track in self.tracks() {
            track.stop();
        }
    }
}
