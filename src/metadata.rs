//! Stream metadata registry
//!
//! Maps remote stream ids to their purpose and mute flags. Incoming
//! metadata is merged one level deep (stream id → entry, later wins);
//! after every merge the peer connection is notified so remote tracks
//! re-evaluate their type.

use crate::types::{SdpStreamMetadata, StreamMetadata, StreamPurpose};
use std::collections::HashMap;

/// Registry of remote stream metadata for one call
#[derive(Debug, Default)]
pub struct StreamMetadataRegistry {
    entries: HashMap<String, StreamMetadata>,
}

impl StreamMetadataRegistry {
    /// Merge an incoming metadata map; later values overwrite earlier ones.
    ///
    /// Returns whether any entry actually changed.
    pub fn merge(&mut self, update: &SdpStreamMetadata) -> bool {
        let mut changed = false;
        for (stream_id, entry) in update {
            if self.entries.get(stream_id) != Some(entry) {
                self.entries.insert(stream_id.clone(), *entry);
                changed = true;
            }
        }
        changed
    }

    /// Metadata for a stream, if known
    #[must_use]
    pub fn get(&self, stream_id: &str) -> Option<&StreamMetadata> {
        self.entries.get(stream_id)
    }

    /// Purpose of a stream; unknown streams default to usermedia
    #[must_use]
    pub fn purpose_for(&self, stream_id: &str) -> StreamPurpose {
        self.entries
            .get(stream_id)
            .map_or(StreamPurpose::Usermedia, |entry| entry.purpose)
    }

    /// Whether no metadata has been received yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
