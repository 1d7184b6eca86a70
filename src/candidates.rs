//! ICE candidate queues
//!
//! Two buffers with opposite directions: [`CandidateQueue`] batches local
//! candidates for a trickled `Candidates` message, and
//! [`RemoteCandidateBuffer`] parks inbound candidates that arrive before
//! an opponent party has been chosen.

use crate::types::{IceCandidate, PartyId};
use std::collections::HashMap;

/// Outbound candidates pending a batched send
#[derive(Debug, Default)]
pub struct CandidateQueue {
    pending: Vec<IceCandidate>,
    scheduled: bool,
}

impl CandidateQueue {
    /// Append a candidate in arrival order
    pub fn push(&mut self, candidate: IceCandidate) {
        self.pending.push(candidate);
    }

    /// Take the whole batch, leaving the queue empty
    pub fn take_batch(&mut self) -> Vec<IceCandidate> {
        std::mem::take(&mut self.pending)
    }

    /// Drop all pending candidates (they are contained in a fresh local
    /// description)
    pub fn discard(&mut self) {
        self.pending.clear();
    }

    /// Whether nothing is queued
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Number of queued candidates
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Mark a batch send as scheduled; returns whether one already was
    pub fn set_scheduled(&mut self) -> bool {
        std::mem::replace(&mut self.scheduled, true)
    }

    /// Clear the scheduled marker once the drain loop exits
    pub fn clear_scheduled(&mut self) {
        self.scheduled = false;
    }

    /// Whether a batch send is currently scheduled or draining
    #[must_use]
    pub fn is_scheduled(&self) -> bool {
        self.scheduled
    }
}

/// Inbound candidates received before an opponent party was chosen,
/// keyed by the sender's party id.
///
/// The buffer exists only while the opponent is undecided; once a party
/// commits, its candidates are drained in arrival order and the buffer is
/// destroyed, discarding every other party's candidates.
#[derive(Debug, Default)]
pub struct RemoteCandidateBuffer {
    by_party: HashMap<PartyId, Vec<IceCandidate>>,
}

impl RemoteCandidateBuffer {
    /// File candidates under the sender's party id, preserving order
    pub fn file(&mut self, party_id: &PartyId, candidates: Vec<IceCandidate>) {
        self.by_party
            .entry(party_id.clone())
            .or_default()
            .extend(candidates);
    }

    /// Consume the buffer, returning the committed party's candidates in
    /// arrival order; everything else is dropped.
    #[must_use]
    pub fn drain_for(mut self, party_id: &PartyId) -> Vec<IceCandidate> {
        self.by_party.remove(party_id).unwrap_or_default()
    }

    /// Number of candidates buffered for a party
    #[must_use]
    pub fn len_for(&self, party_id: &PartyId) -> usize {
        self.by_party.get(party_id).map_or(0, Vec::len)
    }
}
