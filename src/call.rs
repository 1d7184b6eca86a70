//! The peer call state machine
//!
//! [`PeerCall`] drives one 1:1 media session through its lifecycle:
//! offer/answer exchange, ICE candidate trickling, renegotiation and
//! hangup. It owns the abstract peer connection exclusively and talks to
//! the host only through [`CallHandler`].
//!
//! All state lives behind a short-lived lock that is never held across a
//! suspension point; every resumption path re-reads the state before
//! acting, because anything may have happened in between, most notably a
//! transition into the absorbing `Ended` state.

use crate::candidates::{CandidateQueue, RemoteCandidateBuffer};
use crate::error::{CallError, CallErrorCode, SignallingError};
use crate::media::{LocalMedia, MediaError};
use crate::messages::SignallingMessage;
use crate::metadata::StreamMetadataRegistry;
use crate::negotiation::NegotiationQueue;
use crate::peer_connection::{PeerConnection, PeerConnectionObserver};
use crate::reconcile;
use crate::timer::{Disposables, TimeoutCreator};
use crate::types::{
    CallConfig, CallDirection, CallId, CallParty, CallState, IceCandidate, IceConnectionState,
    IceGatheringState, PartyId, SdpStreamMetadata, SdpType, SessionDescription, StreamPurpose,
    TrackKind, SIGNALLING_VERSION,
};
use async_trait::async_trait;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::watch;

/// Snapshot of a call's observable state, passed to the host on every
/// update
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallUpdate {
    /// The call the update belongs to
    pub call_id: CallId,
    /// Current lifecycle state
    pub state: CallState,
    /// Which side ended the call, once ended
    pub hangup_party: Option<CallParty>,
    /// Why the call ended, once ended
    pub hangup_reason: Option<CallErrorCode>,
}

/// Outbound hooks supplied by the host
#[async_trait]
pub trait CallHandler: Send + Sync {
    /// Called on every observable change of the call
    fn emit_update(&self, update: CallUpdate);

    /// Hand a signalling message to the transport.
    ///
    /// Resolving means the message was accepted for delivery; an error is
    /// treated as a send failure by the state machine.
    ///
    /// # Errors
    ///
    /// Returns a [`SignallingError`] if the transport rejects the message.
    async fn send_signalling_message(
        &self,
        message: SignallingMessage,
    ) -> Result<(), SignallingError>;
}

struct CallInner {
    state: CallState,
    direction: Option<CallDirection>,
    local_media: Option<Arc<dyn LocalMedia>>,
    opponent_party_id: Option<PartyId>,
    hangup_party: Option<CallParty>,
    hangup_reason: Option<CallErrorCode>,
    candidate_queue: CandidateQueue,
    remote_candidate_buffer: Option<RemoteCandidateBuffer>,
    remote_metadata: StreamMetadataRegistry,
    ignore_offer: bool,
    making_offer: bool,
}

impl Default for CallInner {
    fn default() -> Self {
        Self {
            state: CallState::Fledgling,
            direction: None,
            local_media: None,
            opponent_party_id: None,
            hangup_party: None,
            hangup_reason: None,
            candidate_queue: CandidateQueue::default(),
            // exists exactly as long as no opponent party has been chosen
            remote_candidate_buffer: Some(RemoteCandidateBuffer::default()),
            remote_metadata: StreamMetadataRegistry::default(),
            ignore_offer: false,
            making_offer: false,
        }
    }
}

/// One 1:1 peer call
pub struct PeerCall {
    id: CallId,
    config: CallConfig,
    handler: Arc<dyn CallHandler>,
    peer_connection: Arc<dyn PeerConnection>,
    timeout_creator: Arc<dyn TimeoutCreator>,
    inner: Mutex<CallInner>,
    state_tx: watch::Sender<CallState>,
    negotiations: NegotiationQueue,
    disposables: Disposables,
    weak_self: Weak<PeerCall>,
}

impl PeerCall {
    /// Create a call in the `Fledgling` state and wire it up as the peer
    /// connection's observer.
    ///
    /// Must be called from within a tokio runtime; the negotiation worker
    /// is spawned here.
    #[must_use]
    pub fn new(
        handler: Arc<dyn CallHandler>,
        peer_connection: Arc<dyn PeerConnection>,
        timeout_creator: Arc<dyn TimeoutCreator>,
        config: CallConfig,
    ) -> Arc<Self> {
        let (state_tx, _) = watch::channel(CallState::Fledgling);
        let call = Arc::new_cyclic(|weak_self: &Weak<PeerCall>| Self {
            id: CallId::new(),
            config,
            handler,
            peer_connection: Arc::clone(&peer_connection),
            timeout_creator,
            inner: Mutex::new(CallInner::default()),
            state_tx,
            negotiations: NegotiationQueue::new(),
            disposables: Disposables::default(),
            weak_self: weak_self.clone(),
        });
        let observer: Weak<dyn PeerConnectionObserver> = call.weak_self.clone();
        peer_connection.set_observer(observer);
        call
    }

    /// The call's identifier
    #[must_use]
    pub fn id(&self) -> CallId {
        self.id
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> CallState {
        self.inner().state
    }

    /// Direction of the call, once committed
    #[must_use]
    pub fn direction(&self) -> Option<CallDirection> {
        self.inner().direction
    }

    /// The remote party we committed to, once an invite or answer was
    /// accepted
    #[must_use]
    pub fn opponent_party_id(&self) -> Option<PartyId> {
        self.inner().opponent_party_id.clone()
    }

    /// Which side ended the call, once ended
    #[must_use]
    pub fn hangup_party(&self) -> Option<CallParty> {
        self.inner().hangup_party
    }

    /// Why the call ended, once ended
    #[must_use]
    pub fn hangup_reason(&self) -> Option<CallErrorCode> {
        self.inner().hangup_reason
    }

    /// The call's configuration
    #[must_use]
    pub fn config(&self) -> &CallConfig {
        &self.config
    }

    /// Wait until the call reaches `target` or ends.
    ///
    /// Returns the state that satisfied the wait, which is `Ended` when
    /// the call terminated first.
    pub async fn wait_for_state(&self, target: CallState) -> CallState {
        self.wait_until(|state| state == target).await
    }

    /// Place an outbound call.
    ///
    /// Awaits local media, adds the tracks to the peer connection (which
    /// triggers negotiation and invite creation), and resolves once the
    /// invite is out.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::InvalidState`] outside `Fledgling`, or
    /// [`CallError::Terminated`] if the call ends before the invite is
    /// sent (media rejection, send failure, remote hangup).
    pub async fn call<F>(&self, local_media: F) -> Result<(), CallError>
    where
        F: Future<Output = Result<Arc<dyn LocalMedia>, MediaError>> + Send,
    {
        {
            let mut inner = self.inner();
            if inner.state != CallState::Fledgling {
                return Err(CallError::InvalidState {
                    operation: "call",
                    state: inner.state,
                });
            }
            inner.direction = Some(CallDirection::Outbound);
        }
        tracing::info!(call_id = %self.id, "placing outbound call");
        self.transition(CallState::WaitLocalMedia);

        let media = match local_media.await {
            Ok(media) => media,
            Err(error) => {
                tracing::warn!(call_id = %self.id, error = %error, "local media acquisition failed");
                return Err(self.fail(CallErrorCode::NoUserMedia).await);
            }
        };
        if self.state() == CallState::Ended {
            return Err(self.terminated_error());
        }
        self.inner().local_media = Some(Arc::clone(&media));
        self.transition(CallState::CreateOffer);

        for track in media.tracks() {
            if let Err(error) = self.peer_connection.add_track(track).await {
                tracing::warn!(call_id = %self.id, error = %error, "failed to add local track");
                return Err(self.fail(CallErrorCode::LocalOfferFailed).await);
            }
        }

        let state = self
            .wait_until(|state| {
                matches!(
                    state,
                    CallState::InviteSent | CallState::Connecting | CallState::Connected
                )
            })
            .await;
        if state == CallState::Ended {
            return Err(self.terminated_error());
        }
        Ok(())
    }

    /// Pick up a ringing inbound call.
    ///
    /// Awaits local media, adds the tracks, produces and applies the
    /// answer, and emits the `Answer` message after a short grace for
    /// initial candidate gathering.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::InvalidState`] outside `Ringing`, or
    /// [`CallError::Terminated`] on any failure along the answer path.
    pub async fn answer<F>(&self, local_media: F) -> Result<(), CallError>
    where
        F: Future<Output = Result<Arc<dyn LocalMedia>, MediaError>> + Send,
    {
        {
            let inner = self.inner();
            if inner.state != CallState::Ringing {
                return Err(CallError::InvalidState {
                    operation: "answer",
                    state: inner.state,
                });
            }
        }
        tracing::info!(call_id = %self.id, "answering call");
        self.transition(CallState::WaitLocalMedia);

        let media = match local_media.await {
            Ok(media) => media,
            Err(error) => {
                tracing::warn!(call_id = %self.id, error = %error, "local media acquisition failed");
                return Err(self.fail(CallErrorCode::NoUserMedia).await);
            }
        };
        if self.state() == CallState::Ended {
            return Err(self.terminated_error());
        }
        self.inner().local_media = Some(Arc::clone(&media));

        for track in media.tracks() {
            if let Err(error) = self.peer_connection.add_track(track).await {
                tracing::warn!(call_id = %self.id, error = %error, "failed to add local track");
                return Err(self.fail(CallErrorCode::CreateAnswer).await);
            }
        }
        self.transition(CallState::CreateAnswer);

        let answer = match self.peer_connection.create_answer().await {
            Ok(answer) => answer,
            Err(error) => {
                tracing::warn!(call_id = %self.id, error = %error, "failed to create answer");
                return Err(self.fail(CallErrorCode::CreateAnswer).await);
            }
        };
        if self.state() == CallState::Ended {
            return Err(self.terminated_error());
        }
        if let Err(error) = self
            .peer_connection
            .set_local_description(Some(answer.clone()))
            .await
        {
            tracing::warn!(call_id = %self.id, error = %error, "failed to set local description");
            return Err(self.fail(CallErrorCode::SetLocalDescription).await);
        }
        self.transition(CallState::Connecting);

        // grace so the answer's SDP carries the first gathered candidates
        let _ = self.delay(self.config.gathering_grace_ms).await;
        if self.state() == CallState::Ended {
            return Err(self.terminated_error());
        }
        self.inner().candidate_queue.discard();

        let description = self.peer_connection.local_description().unwrap_or(answer);
        let message = SignallingMessage::Answer {
            answer: description,
            sdp_stream_metadata: media.sdp_metadata(),
        };
        tracing::info!(call_id = %self.id, "sending answer");
        if let Err(error) = self.handler.send_signalling_message(message).await {
            tracing::warn!(call_id = %self.id, error = %error, "failed to send answer");
            return Err(self.fail(CallErrorCode::SendAnswer).await);
        }
        self.spawn_candidate_flush();
        Ok(())
    }

    /// End the call locally.
    ///
    /// Sends a `Hangup` message (best effort) and terminates with the
    /// given reason. A no-op once the call has ended.
    pub async fn hangup(&self, reason: CallErrorCode) {
        if self.state() == CallState::Ended {
            return;
        }
        tracing::info!(call_id = %self.id, reason = %reason, "hanging up");
        let message = SignallingMessage::Hangup {
            reason: Some(reason),
        };
        if let Err(error) = self.handler.send_signalling_message(message).await {
            tracing::warn!(call_id = %self.id, error = %error, "failed to send hangup");
        }
        self.terminate(CallParty::Local, reason, true).await;
    }

    /// Swap the local media, reconciling each track role against the peer
    /// connection.
    ///
    /// Replacement does not renegotiate when codec-compatible; otherwise
    /// the connection fires negotiation-needed and the serialized
    /// negotiation path takes over.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::InvalidState`] after the call ended,
    /// [`CallError::Terminated`] if media acquisition fails, or
    /// [`CallError::PeerConnection`] if a track operation is rejected (the
    /// call keeps running; the host decides whether to hang up).
    pub async fn set_media<F>(&self, local_media: F) -> Result<(), CallError>
    where
        F: Future<Output = Result<Arc<dyn LocalMedia>, MediaError>> + Send,
    {
        {
            let inner = self.inner();
            if inner.state == CallState::Ended {
                return Err(CallError::InvalidState {
                    operation: "set_media",
                    state: inner.state,
                });
            }
        }
        let media = match local_media.await {
            Ok(media) => media,
            Err(error) => {
                tracing::warn!(call_id = %self.id, error = %error, "local media acquisition failed");
                return Err(self.fail(CallErrorCode::NoUserMedia).await);
            }
        };
        if self.state() == CallState::Ended {
            return Err(self.terminated_error());
        }
        let old_media = self.inner().local_media.replace(Arc::clone(&media));

        if let Err(error) = reconcile::apply_track_updates(
            self.peer_connection.as_ref(),
            old_media.as_ref(),
            &media,
        )
        .await
        {
            tracing::warn!(call_id = %self.id, error = %error, "track reconciliation failed");
            return Err(CallError::PeerConnection(error.to_string()));
        }

        // announce the fresh stream metadata mid-call
        if matches!(self.state(), CallState::Connecting | CallState::Connected) {
            let message = SignallingMessage::SdpStreamMetadataChanged {
                sdp_stream_metadata: media.sdp_metadata(),
            };
            if let Err(error) = self.handler.send_signalling_message(message).await {
                tracing::warn!(call_id = %self.id, error = %error, "failed to send stream metadata");
                return Err(self.fail(CallErrorCode::SignallingFailed).await);
            }
        }
        Ok(())
    }

    /// Dispatch an inbound signalling message for this call.
    ///
    /// Invalid or out-of-order messages are ignored; message kinds the
    /// engine does not know are dropped silently.
    pub async fn handle_incoming_signalling_message(
        &self,
        message: SignallingMessage,
        party_id: PartyId,
    ) {
        tracing::debug!(
            call_id = %self.id,
            kind = message.kind(),
            party = %party_id,
            "incoming signalling message"
        );
        match message {
            SignallingMessage::Invite {
                offer,
                sdp_stream_metadata,
                version: _,
                lifetime,
            } => {
                self.handle_invite(offer, sdp_stream_metadata, lifetime, party_id)
                    .await;
            }
            SignallingMessage::Answer {
                answer,
                sdp_stream_metadata,
            } => {
                self.handle_answer(answer, sdp_stream_metadata, party_id)
                    .await;
            }
            SignallingMessage::Candidates { candidates } => {
                self.handle_remote_ice_candidates(candidates, party_id)
                    .await;
            }
            SignallingMessage::Negotiate {
                description,
                sdp_stream_metadata,
            } => {
                self.handle_negotiate(description, sdp_stream_metadata, party_id)
                    .await;
            }
            SignallingMessage::SdpStreamMetadataChanged {
                sdp_stream_metadata,
            } => self.handle_metadata_changed(&sdp_stream_metadata, &party_id),
            SignallingMessage::Hangup { reason } => {
                self.terminate(
                    CallParty::Remote,
                    reason.unwrap_or(CallErrorCode::UserHangup),
                    false,
                )
                .await;
            }
            SignallingMessage::Unknown => {
                tracing::debug!(call_id = %self.id, "ignoring unknown signalling message");
            }
        }
    }

    /// Release every resource held by the call: timers, the negotiation
    /// worker, the peer connection and the local tracks. Idempotent.
    pub async fn dispose(&self) {
        tracing::debug!(call_id = %self.id, "disposing call");
        self.negotiations.close();
        self.disposables.abort_all();
        let media = self.inner().local_media.clone();
        if let Some(media) = media {
            media.stop_all();
        }
        self.peer_connection.close().await;
    }

    // ── inbound message handling ──────────────────────────────────────

    async fn handle_invite(
        &self,
        offer: SessionDescription,
        metadata: SdpStreamMetadata,
        lifetime: Option<u64>,
        party_id: PartyId,
    ) {
        {
            let mut inner = self.inner();
            if inner.state != CallState::Fledgling || inner.opponent_party_id.is_some() {
                tracing::debug!(call_id = %self.id, state = ?inner.state, "ignoring invite");
                return;
            }
            // commit before the first await so a competing device cannot win
            inner.opponent_party_id = Some(party_id.clone());
            inner.direction = Some(CallDirection::Inbound);
        }
        tracing::info!(call_id = %self.id, party = %party_id, "handling invite");
        if !metadata.is_empty() {
            self.merge_remote_metadata(&metadata);
        }

        if let Err(error) = self.peer_connection.set_remote_description(offer).await {
            tracing::warn!(call_id = %self.id, error = %error, "failed to apply remote offer");
            self.terminate(CallParty::Local, CallErrorCode::SetRemoteDescription, true)
                .await;
            return;
        }
        self.drain_buffered_candidates(&party_id).await;
        if self.state() == CallState::Ended {
            return;
        }
        if self.peer_connection.remote_tracks().is_empty() {
            tracing::warn!(call_id = %self.id, "remote offer produced no tracks");
            self.terminate(CallParty::Local, CallErrorCode::SetRemoteDescription, true)
                .await;
            return;
        }
        self.transition(CallState::Ringing);

        // if nobody picks up within the invite lifetime, the remote side
        // has effectively rescinded the call
        let lifetime_ms = lifetime.unwrap_or(self.config.call_timeout_ms);
        if let Some(call) = self.weak_self.upgrade() {
            tokio::spawn(async move {
                if call.delay(lifetime_ms).await && call.state() == CallState::Ringing {
                    tracing::info!(call_id = %call.id, "invite expired unanswered");
                    call.terminate(CallParty::Remote, CallErrorCode::InviteTimeout, true)
                        .await;
                }
            });
        }
    }

    async fn handle_answer(
        &self,
        answer: SessionDescription,
        metadata: SdpStreamMetadata,
        party_id: PartyId,
    ) {
        {
            let mut inner = self.inner();
            if inner.state == CallState::Ended {
                tracing::debug!(call_id = %self.id, "ignoring answer after end");
                return;
            }
            match &inner.opponent_party_id {
                Some(committed) if *committed != party_id => {
                    tracing::debug!(
                        call_id = %self.id,
                        party = %party_id,
                        "ignoring answer from competing party"
                    );
                    return;
                }
                Some(_) => {}
                // commit before the first await
                None => inner.opponent_party_id = Some(party_id.clone()),
            }
        }
        tracing::info!(call_id = %self.id, party = %party_id, "handling answer");
        self.drain_buffered_candidates(&party_id).await;
        self.transition(CallState::Connecting);
        if !metadata.is_empty() {
            self.merge_remote_metadata(&metadata);
        }
        if let Err(error) = self.peer_connection.set_remote_description(answer).await {
            tracing::warn!(call_id = %self.id, error = %error, "failed to apply remote answer");
            self.terminate(CallParty::Local, CallErrorCode::SetRemoteDescription, true)
                .await;
        }
    }

    async fn handle_remote_ice_candidates(
        &self,
        candidates: Vec<IceCandidate>,
        party_id: PartyId,
    ) {
        let to_add = {
            let mut inner = self.inner();
            if inner.state == CallState::Ended {
                tracing::debug!(call_id = %self.id, "ignoring candidates after end");
                return;
            }
            match &inner.opponent_party_id {
                None => {
                    if let Some(buffer) = inner.remote_candidate_buffer.as_mut() {
                        tracing::debug!(
                            call_id = %self.id,
                            party = %party_id,
                            count = candidates.len(),
                            "buffering candidates before party commit"
                        );
                        buffer.file(&party_id, candidates);
                    }
                    return;
                }
                Some(committed) if *committed != party_id => {
                    tracing::debug!(
                        call_id = %self.id,
                        party = %party_id,
                        "discarding candidates from competing party"
                    );
                    return;
                }
                Some(_) => candidates,
            }
        };
        for candidate in to_add {
            self.add_remote_candidate(candidate).await;
        }
    }

    async fn handle_negotiate(
        &self,
        description: SessionDescription,
        metadata: SdpStreamMetadata,
        party_id: PartyId,
    ) {
        {
            let mut inner = self.inner();
            if inner.state == CallState::Ended {
                return;
            }
            match &inner.opponent_party_id {
                Some(committed) if *committed == party_id => {}
                _ => {
                    tracing::debug!(
                        call_id = %self.id,
                        party = %party_id,
                        "ignoring negotiate from uncommitted party"
                    );
                    return;
                }
            }
            // perfect negotiation: the outbound side is impolite and
            // ignores a colliding offer while producing its own
            let polite = inner.direction == Some(CallDirection::Inbound);
            if description.kind == SdpType::Offer && inner.making_offer && !polite {
                inner.ignore_offer = true;
                tracing::debug!(call_id = %self.id, "offer glare: ignoring remote offer");
                return;
            }
            inner.ignore_offer = false;
        }
        if !metadata.is_empty() {
            self.merge_remote_metadata(&metadata);
        }

        let is_offer = description.kind == SdpType::Offer;
        if let Err(error) = self
            .peer_connection
            .set_remote_description(description)
            .await
        {
            tracing::warn!(call_id = %self.id, error = %error, "failed to apply renegotiation");
            self.terminate(CallParty::Local, CallErrorCode::SetRemoteDescription, true)
                .await;
            return;
        }
        if !is_offer {
            return;
        }

        let answer = match self.peer_connection.create_answer().await {
            Ok(answer) => answer,
            Err(error) => {
                tracing::warn!(call_id = %self.id, error = %error, "failed to answer renegotiation");
                self.terminate(CallParty::Local, CallErrorCode::CreateAnswer, true)
                    .await;
                return;
            }
        };
        if self.state() == CallState::Ended {
            return;
        }
        if let Err(error) = self
            .peer_connection
            .set_local_description(Some(answer.clone()))
            .await
        {
            tracing::warn!(call_id = %self.id, error = %error, "failed to set local description");
            self.terminate(CallParty::Local, CallErrorCode::SetLocalDescription, true)
                .await;
            return;
        }
        let message = SignallingMessage::Negotiate {
            description: self.peer_connection.local_description().unwrap_or(answer),
            sdp_stream_metadata: self.local_sdp_metadata(),
        };
        if let Err(error) = self.handler.send_signalling_message(message).await {
            tracing::warn!(call_id = %self.id, error = %error, "failed to send renegotiation answer");
            self.terminate(CallParty::Local, CallErrorCode::SignallingFailed, true)
                .await;
        }
    }

    fn handle_metadata_changed(&self, metadata: &SdpStreamMetadata, party_id: &PartyId) {
        {
            let inner = self.inner();
            if inner.state == CallState::Ended {
                return;
            }
            match &inner.opponent_party_id {
                Some(committed) if committed == party_id => {}
                _ => {
                    tracing::debug!(
                        call_id = %self.id,
                        party = %party_id,
                        "ignoring metadata from uncommitted party"
                    );
                    return;
                }
            }
        }
        self.merge_remote_metadata(metadata);
    }

    // ── negotiation ───────────────────────────────────────────────────

    async fn handle_negotiation(&self) {
        let state = self.state();
        match state {
            CallState::Ended => return,
            CallState::CreateOffer
            | CallState::InviteSent
            | CallState::Connecting
            | CallState::Connected => {}
            _ => {
                tracing::debug!(
                    call_id = %self.id,
                    state = ?state,
                    "skipping negotiation in non-negotiable state"
                );
                return;
            }
        }
        self.inner().making_offer = true;
        self.run_negotiation().await;
        self.inner().making_offer = false;
    }

    async fn run_negotiation(&self) {
        let offer = match self.peer_connection.create_offer().await {
            Ok(offer) => offer,
            Err(error) => {
                tracing::warn!(call_id = %self.id, error = %error, "failed to create offer");
                self.terminate(CallParty::Local, CallErrorCode::LocalOfferFailed, true)
                    .await;
                return;
            }
        };
        if self.state() == CallState::Ended {
            return;
        }
        if let Err(error) = self.peer_connection.set_local_description(Some(offer)).await {
            tracing::warn!(call_id = %self.id, error = %error, "failed to set local description");
            self.terminate(CallParty::Local, CallErrorCode::SetLocalDescription, true)
                .await;
            return;
        }
        if self.peer_connection.ice_gathering_state() == IceGatheringState::Gathering {
            // let the description pick up the first candidates
            if !self.delay(self.config.gathering_grace_ms).await {
                return;
            }
        }
        if self.state() == CallState::Ended {
            return;
        }
        // queued candidates are contained in the fresh description
        self.inner().candidate_queue.discard();

        let Some(description) = self.peer_connection.local_description() else {
            tracing::warn!(call_id = %self.id, "no local description after negotiation");
            self.terminate(CallParty::Local, CallErrorCode::SetLocalDescription, true)
                .await;
            return;
        };
        let metadata = self.local_sdp_metadata();

        if self.state() == CallState::CreateOffer {
            let message = SignallingMessage::Invite {
                offer: description,
                sdp_stream_metadata: metadata,
                version: SIGNALLING_VERSION,
                lifetime: Some(self.config.call_timeout_ms),
            };
            tracing::info!(call_id = %self.id, "sending invite");
            if let Err(error) = self.handler.send_signalling_message(message).await {
                tracing::warn!(call_id = %self.id, error = %error, "failed to send invite");
                self.terminate(CallParty::Local, CallErrorCode::SendInvite, true)
                    .await;
                return;
            }
            if self.state() == CallState::Ended {
                return;
            }
            self.transition(CallState::InviteSent);
            self.spawn_candidate_flush();
            self.arm_invite_timeout();
        } else {
            let message = SignallingMessage::Negotiate {
                description,
                sdp_stream_metadata: metadata,
            };
            tracing::debug!(call_id = %self.id, "sending renegotiation");
            if let Err(error) = self.handler.send_signalling_message(message).await {
                tracing::warn!(call_id = %self.id, error = %error, "failed to send renegotiation");
                self.terminate(CallParty::Local, CallErrorCode::SignallingFailed, true)
                    .await;
                return;
            }
            self.spawn_candidate_flush();
        }
    }

    fn arm_invite_timeout(&self) {
        let Some(call) = self.weak_self.upgrade() else {
            return;
        };
        let timeout_ms = self.config.call_timeout_ms;
        tokio::spawn(async move {
            if call.delay(timeout_ms).await && call.state() == CallState::InviteSent {
                tracing::info!(call_id = %call.id, "invite timed out");
                call.hangup(CallErrorCode::InviteTimeout).await;
            }
        });
    }

    // ── candidates ────────────────────────────────────────────────────

    async fn add_remote_candidate(&self, candidate: IceCandidate) {
        if !candidate.is_routable() {
            tracing::debug!(call_id = %self.id, "skipping unroutable candidate");
            return;
        }
        if let Err(error) = self.peer_connection.add_ice_candidate(candidate).await {
            if self.inner().ignore_offer {
                tracing::debug!(
                    call_id = %self.id,
                    error = %error,
                    "candidate rejected during ignored offer"
                );
            } else {
                tracing::warn!(
                    call_id = %self.id,
                    error = %error,
                    "failed to add remote ICE candidate"
                );
            }
        }
    }

    async fn drain_buffered_candidates(&self, party_id: &PartyId) {
        let buffered = {
            let mut inner = self.inner();
            inner
                .remote_candidate_buffer
                .take()
                .map(|buffer| buffer.drain_for(party_id))
                .unwrap_or_default()
        };
        if buffered.is_empty() {
            return;
        }
        tracing::debug!(
            call_id = %self.id,
            count = buffered.len(),
            "draining buffered remote candidates"
        );
        for candidate in buffered {
            self.add_remote_candidate(candidate).await;
        }
    }

    fn spawn_candidate_flush(&self) {
        let Some(call) = self.weak_self.upgrade() else {
            return;
        };
        {
            let mut inner = self.inner();
            if inner.state == CallState::Ended || inner.candidate_queue.set_scheduled() {
                return;
            }
        }
        tokio::spawn(async move { call.send_candidate_queue().await });
    }

    async fn send_candidate_queue(&self) {
        loop {
            let batch = {
                let mut inner = self.inner();
                if inner.state == CallState::Ended || inner.state == CallState::Ringing {
                    inner.candidate_queue.clear_scheduled();
                    return;
                }
                if inner.candidate_queue.is_empty() {
                    inner.candidate_queue.clear_scheduled();
                    return;
                }
                inner.candidate_queue.take_batch()
            };
            tracing::debug!(call_id = %self.id, count = batch.len(), "sending candidate batch");
            let message = SignallingMessage::Candidates { candidates: batch };
            if let Err(error) = self.handler.send_signalling_message(message).await {
                tracing::warn!(call_id = %self.id, error = %error, "failed to send candidates");
                self.inner().candidate_queue.clear_scheduled();
                self.terminate(CallParty::Local, CallErrorCode::SignallingFailed, true)
                    .await;
                return;
            }
            // loop again: candidates may have arrived during the send
        }
    }

    // ── metadata ──────────────────────────────────────────────────────

    fn merge_remote_metadata(&self, update: &SdpStreamMetadata) {
        let changed = self.inner().remote_metadata.merge(update);
        tracing::debug!(call_id = %self.id, changed, "merged remote stream metadata");
        self.peer_connection.notify_stream_purpose_changed();
        self.apply_remote_mute_states();
    }

    fn apply_remote_mute_states(&self) {
        for track in self.peer_connection.remote_tracks() {
            let metadata = self.inner().remote_metadata.get(&track.stream_id()).copied();
            if let Some(metadata) = metadata {
                let muted = if track.kind() == TrackKind::Microphone {
                    metadata.audio_muted
                } else {
                    metadata.video_muted
                };
                track.set_muted(muted);
            }
        }
    }

    fn local_sdp_metadata(&self) -> SdpStreamMetadata {
        let inner = self.inner();
        inner
            .local_media
            .as_ref()
            .map(|media| media.sdp_metadata())
            .unwrap_or_default()
    }

    // ── termination ───────────────────────────────────────────────────

    async fn terminate(&self, party: CallParty, reason: CallErrorCode, emit: bool) {
        let media = {
            let mut inner = self.inner();
            if inner.state == CallState::Ended {
                return;
            }
            inner.state = CallState::Ended;
            inner.hangup_party = Some(party);
            inner.hangup_reason = Some(reason);
            inner.remote_candidate_buffer = None;
            inner.candidate_queue.discard();
            inner.local_media.clone()
        };
        tracing::info!(call_id = %self.id, party = ?party, reason = %reason, "call ended");
        self.negotiations.close();
        if let Some(media) = media {
            media.stop_all();
        }
        self.peer_connection.close().await;
        self.disposables.abort_all();
        if emit {
            self.emit_update();
        }
        self.state_tx.send_replace(CallState::Ended);
    }

    async fn fail(&self, reason: CallErrorCode) -> CallError {
        self.terminate(CallParty::Local, reason, true).await;
        CallError::Terminated { reason }
    }

    fn terminated_error(&self) -> CallError {
        CallError::Terminated {
            reason: self
                .hangup_reason()
                .unwrap_or(CallErrorCode::UserHangup),
        }
    }

    // ── plumbing ──────────────────────────────────────────────────────

    fn inner(&self) -> MutexGuard<'_, CallInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, new_state: CallState) {
        {
            let mut inner = self.inner();
            if inner.state == CallState::Ended || inner.state == new_state {
                return;
            }
            tracing::debug!(
                call_id = %self.id,
                old_state = ?inner.state,
                new_state = ?new_state,
                "call state transition"
            );
            inner.state = new_state;
        }
        self.state_tx.send_replace(new_state);
        self.emit_update();
    }

    fn emit_update(&self) {
        let update = {
            let inner = self.inner();
            CallUpdate {
                call_id: self.id,
                state: inner.state,
                hangup_party: inner.hangup_party,
                hangup_reason: inner.hangup_reason,
            }
        };
        self.handler.emit_update(update);
    }

    async fn wait_until<F>(&self, mut reached: F) -> CallState
    where
        F: FnMut(CallState) -> bool,
    {
        let mut rx = self.state_tx.subscribe();
        loop {
            let state = *rx.borrow_and_update();
            if reached(state) || state == CallState::Ended {
                return state;
            }
            if rx.changed().await.is_err() {
                return self.state();
            }
        }
    }

    async fn delay(&self, ms: u64) -> bool {
        let timeout = self.timeout_creator.create_timeout(Duration::from_millis(ms));
        self.disposables.track(Arc::clone(&timeout));
        timeout.elapsed().await
    }
}

impl PeerConnectionObserver for PeerCall {
    fn on_ice_connection_state_change(&self, ice_state: IceConnectionState) {
        tracing::debug!(call_id = %self.id, ice_state = ?ice_state, "ICE connection state changed");
        match ice_state {
            IceConnectionState::Connected | IceConnectionState::Completed => {
                if self.state() == CallState::Connecting {
                    self.transition(CallState::Connected);
                }
            }
            IceConnectionState::Failed => {
                if let Some(call) = self.weak_self.upgrade() {
                    tokio::spawn(async move {
                        call.terminate(CallParty::Remote, CallErrorCode::IceFailed, true)
                            .await;
                    });
                }
            }
            _ => {}
        }
    }

    fn on_local_ice_candidate(&self, candidate: IceCandidate) {
        let delay_ms;
        {
            let mut inner = self.inner();
            if inner.state == CallState::Ended {
                return;
            }
            tracing::trace!(call_id = %self.id, "queueing local ICE candidate");
            inner.candidate_queue.push(candidate);
            // while ringing nothing is sent; the answer path flushes later
            if inner.state == CallState::Ringing || inner.candidate_queue.set_scheduled() {
                return;
            }
            delay_ms = self
                .config
                .candidate_send_delay_ms(inner.direction.unwrap_or(CallDirection::Outbound));
        }
        let Some(call) = self.weak_self.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            if call.delay(delay_ms).await {
                call.send_candidate_queue().await;
            } else {
                call.inner().candidate_queue.clear_scheduled();
            }
        });
    }

    fn on_ice_gathering_state_change(&self, gathering_state: IceGatheringState) {
        tracing::debug!(
            call_id = %self.id,
            gathering_state = ?gathering_state,
            "ICE gathering state changed"
        );
    }

    fn on_remote_tracks_changed(&self) {
        tracing::debug!(call_id = %self.id, "remote tracks changed");
        self.apply_remote_mute_states();
        self.emit_update();
    }

    fn on_data_channel_changed(&self) {
        tracing::debug!(call_id = %self.id, "data channel changed");
        self.emit_update();
    }

    fn on_negotiation_needed(&self) {
        if self.state() == CallState::Ended {
            return;
        }
        tracing::debug!(call_id = %self.id, "negotiation needed");
        let Some(call) = self.weak_self.upgrade() else {
            return;
        };
        self.negotiations
            .enqueue(async move { call.handle_negotiation().await });
    }

    fn purpose_for_stream_id(&self, stream_id: &str) -> StreamPurpose {
        self.inner().remote_metadata.purpose_for(stream_id)
    }
}
