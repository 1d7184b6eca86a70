//! Track reconciliation
//!
//! When local media is swapped, each track role (microphone, camera,
//! screen-share) is diffed between the old and new handle and exactly one
//! peer connection action is applied per role.

use crate::media::{LocalMedia, MediaTrack};
use crate::peer_connection::{PeerConnection, PeerConnectionError};
use crate::types::TrackKind;
use std::sync::Arc;

/// The three track roles a call carries
pub const TRACK_ROLES: [TrackKind; 3] = [
    TrackKind::Microphone,
    TrackKind::Camera,
    TrackKind::ScreenShare,
];

/// Action to apply for one track role
pub enum TrackAction {
    /// Start sending a new track
    Add(Arc<dyn MediaTrack>),
    /// Stop sending a removed track
    Remove(Arc<dyn MediaTrack>),
    /// Swap the sender's source in place
    Replace {
        /// Track currently being sent
        old: Arc<dyn MediaTrack>,
        /// Track to send instead
        new: Arc<dyn MediaTrack>,
    },
}

impl TrackAction {
    /// Short name of the action, for logging
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Add(_) => "add",
            Self::Remove(_) => "remove",
            Self::Replace { .. } => "replace",
        }
    }
}

/// Compute the action for one role given its old and new track.
///
/// Identical tracks (same handle in both media objects) are a no-op, so
/// swapping in the same media twice does nothing the second time.
#[must_use]
pub fn plan_track_update(
    old: Option<Arc<dyn MediaTrack>>,
    new: Option<Arc<dyn MediaTrack>>,
) -> Option<TrackAction> {
    match (old, new) {
        (Some(old), Some(new)) => {
            if Arc::ptr_eq(&old, &new) {
                None
            } else {
                Some(TrackAction::Replace { old, new })
            }
        }
        (Some(old), None) => Some(TrackAction::Remove(old)),
        (None, Some(new)) => Some(TrackAction::Add(new)),
        (None, None) => None,
    }
}

/// Apply the per-role diff between two media handles to the peer
/// connection.
///
/// A codec-incompatible replace makes the connection fire
/// negotiation-needed; that is handled by the negotiation queue, not here.
///
/// # Errors
///
/// Returns the first peer connection error encountered; earlier actions
/// stay applied.
pub async fn apply_track_updates(
    pc: &dyn PeerConnection,
    old_media: Option<&Arc<dyn LocalMedia>>,
    new_media: &Arc<dyn LocalMedia>,
) -> Result<(), PeerConnectionError> {
    for role in TRACK_ROLES {
        let old_track = old_media.and_then(|media| media.track(role));
        let new_track = new_media.track(role);
        let Some(action) = plan_track_update(old_track, new_track) else {
            continue;
        };
        tracing::debug!(role = ?role, action = action.kind(), "reconciling local track");
        match action {
            TrackAction::Add(track) => pc.add_track(track).await?,
            TrackAction::Remove(track) => {
                pc.remove_track(&track).await?;
            }
            TrackAction::Replace { old, new } => {
                pc.replace_track(&old, new).await?;
            }
        }
    }
    Ok(())
}
