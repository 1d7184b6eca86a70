//! Shared mocks for the integration suites: a recording peer connection,
//! local media fixtures and a recording signalling handler.

#![allow(dead_code)]
#![allow(clippy::unwrap_used)]

use async_trait::async_trait;
use peercall_core::media::{LocalMedia, MediaError, MediaTrack};
use peercall_core::peer_connection::{
    DataChannel, PeerConnection, PeerConnectionError, PeerConnectionObserver,
};
use peercall_core::{
    CallConfig, CallHandler, CallState, CallUpdate, IceCandidate, IceConnectionState,
    IceGatheringState, PeerCall, SdpStreamMetadata, SdpType, SessionDescription, SignallingError,
    SignallingMessage, StreamMetadata, StreamPurpose, TokioTimeoutCreator, TrackKind,
};
use std::future::{ready, Ready};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::Semaphore;

// ── tracks and media ──────────────────────────────────────────────────

pub struct MockTrack {
    kind: TrackKind,
    stream_id: String,
    muted: AtomicBool,
    stopped: AtomicBool,
}

impl MockTrack {
    pub fn new(kind: TrackKind, stream_id: &str) -> Arc<Self> {
        Arc::new(Self {
            kind,
            stream_id: stream_id.to_string(),
            muted: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

impl MediaTrack for MockTrack {
    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn stream_id(&self) -> String {
        self.stream_id.clone()
    }

    fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Acquire)
    }

    fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Release);
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }
}

pub const USERMEDIA_STREAM: &str = "local-usermedia";
pub const SCREEN_STREAM: &str = "local-screenshare";

pub struct MockLocalMedia {
    mic: Option<Arc<MockTrack>>,
    cam: Option<Arc<MockTrack>>,
    screen: Option<Arc<MockTrack>>,
}

impl MockLocalMedia {
    pub fn with_tracks(
        mic: Option<Arc<MockTrack>>,
        cam: Option<Arc<MockTrack>>,
        screen: Option<Arc<MockTrack>>,
    ) -> Arc<Self> {
        Arc::new(Self { mic, cam, screen })
    }

    pub fn mic_only() -> Arc<Self> {
        Self::with_tracks(
            Some(MockTrack::new(TrackKind::Microphone, USERMEDIA_STREAM)),
            None,
            None,
        )
    }

    pub fn mic_and_cam() -> Arc<Self> {
        Self::with_tracks(
            Some(MockTrack::new(TrackKind::Microphone, USERMEDIA_STREAM)),
            Some(MockTrack::new(TrackKind::Camera, USERMEDIA_STREAM)),
            None,
        )
    }

    pub fn mic_cam_and_screen() -> Arc<Self> {
        Self::with_tracks(
            Some(MockTrack::new(TrackKind::Microphone, USERMEDIA_STREAM)),
            Some(MockTrack::new(TrackKind::Camera, USERMEDIA_STREAM)),
            Some(MockTrack::new(TrackKind::ScreenShare, SCREEN_STREAM)),
        )
    }

    pub fn mock_microphone(&self) -> Option<Arc<MockTrack>> {
        self.mic.clone()
    }

    pub fn mock_camera(&self) -> Option<Arc<MockTrack>> {
        self.cam.clone()
    }
}

impl LocalMedia for MockLocalMedia {
    fn tracks(&self) -> Vec<Arc<dyn MediaTrack>> {
        [&self.mic, &self.cam, &self.screen]
            .into_iter()
            .flatten()
            .map(|track| Arc::clone(track) as Arc<dyn MediaTrack>)
            .collect()
    }

    fn microphone_track(&self) -> Option<Arc<dyn MediaTrack>> {
        self.mic.clone().map(|t| t as Arc<dyn MediaTrack>)
    }

    fn camera_track(&self) -> Option<Arc<dyn MediaTrack>> {
        self.cam.clone().map(|t| t as Arc<dyn MediaTrack>)
    }

    fn screen_share_track(&self) -> Option<Arc<dyn MediaTrack>> {
        self.screen.clone().map(|t| t as Arc<dyn MediaTrack>)
    }

    fn sdp_metadata(&self) -> SdpStreamMetadata {
        let mut metadata = SdpStreamMetadata::new();
        if self.mic.is_some() || self.cam.is_some() {
            metadata.insert(
                USERMEDIA_STREAM.to_string(),
                StreamMetadata {
                    purpose: StreamPurpose::Usermedia,
                    audio_muted: self.mic.as_ref().map_or(true, |t| t.is_muted()),
                    video_muted: self.cam.as_ref().map_or(true, |t| t.is_muted()),
                },
            );
        }
        if self.screen.is_some() {
            metadata.insert(
                SCREEN_STREAM.to_string(),
                StreamMetadata {
                    purpose: StreamPurpose::Screenshare,
                    audio_muted: true,
                    video_muted: false,
                },
            );
        }
        metadata
    }
}

pub fn ready_media(
    media: Arc<MockLocalMedia>,
) -> Ready<Result<Arc<dyn LocalMedia>, MediaError>> {
    ready(Ok(media as Arc<dyn LocalMedia>))
}

pub fn failing_media() -> Ready<Result<Arc<dyn LocalMedia>, MediaError>> {
    ready(Err(MediaError::Acquisition("permission denied".to_string())))
}

// ── peer connection ───────────────────────────────────────────────────

pub struct MockPeerConnection {
    pub ops: Mutex<Vec<String>>,
    pub added_candidates: Mutex<Vec<IceCandidate>>,
    remote_track_store: Mutex<Vec<Arc<dyn MediaTrack>>>,
    local_desc: Mutex<Option<SessionDescription>>,
    pub gathering: Mutex<IceGatheringState>,
    observer: Mutex<Option<Weak<dyn PeerConnectionObserver>>>,
    pub fail_create_offer: AtomicBool,
    pub fail_create_answer: AtomicBool,
    pub fail_set_local: AtomicBool,
    pub fail_set_remote: AtomicBool,
    pub fail_add_candidate: AtomicBool,
    /// fire negotiation-needed when a track is added (latched until the
    /// next local description, like a real stack)
    pub fire_negotiation_on_add_track: AtomicBool,
    negotiation_pending: AtomicBool,
    /// grow a remote usermedia track pair when a remote description lands
    pub populate_remote_tracks: AtomicBool,
    pub closed: AtomicBool,
    description_seq: AtomicU32,
    /// when set, `set_local_description` waits for a permit
    pub set_local_gate: Mutex<Option<Arc<Semaphore>>>,
}

impl MockPeerConnection {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            ops: Mutex::new(Vec::new()),
            added_candidates: Mutex::new(Vec::new()),
            remote_track_store: Mutex::new(Vec::new()),
            local_desc: Mutex::new(None),
            gathering: Mutex::new(IceGatheringState::Complete),
            observer: Mutex::new(None),
            fail_create_offer: AtomicBool::new(false),
            fail_create_answer: AtomicBool::new(false),
            fail_set_local: AtomicBool::new(false),
            fail_set_remote: AtomicBool::new(false),
            fail_add_candidate: AtomicBool::new(false),
            fire_negotiation_on_add_track: AtomicBool::new(true),
            negotiation_pending: AtomicBool::new(false),
            populate_remote_tracks: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            description_seq: AtomicU32::new(0),
            set_local_gate: Mutex::new(None),
        })
    }

    fn record(&self, op: impl Into<String>) {
        self.ops.lock().unwrap().push(op.into());
    }

    pub fn count_op(&self, op: &str) -> usize {
        self.ops.lock().unwrap().iter().filter(|o| *o == op).count()
    }

    pub fn observer(&self) -> Option<Arc<dyn PeerConnectionObserver>> {
        self.observer
            .lock()
            .unwrap()
            .as_ref()
            .and_then(Weak::upgrade)
    }

    pub fn fire_negotiation_needed(&self) {
        if let Some(observer) = self.observer() {
            observer.on_negotiation_needed();
        }
    }

    pub fn fire_ice_state(&self, state: IceConnectionState) {
        if let Some(observer) = self.observer() {
            observer.on_ice_connection_state_change(state);
        }
    }

    pub fn fire_local_candidate(&self, candidate: IceCandidate) {
        if let Some(observer) = self.observer() {
            observer.on_local_ice_candidate(candidate);
        }
    }

    pub fn fire_remote_tracks_changed(&self) {
        if let Some(observer) = self.observer() {
            observer.on_remote_tracks_changed();
        }
    }

    pub fn remote_mock_tracks(&self) -> Vec<Arc<dyn MediaTrack>> {
        self.remote_track_store.lock().unwrap().clone()
    }

    pub fn set_remote_track_store(&self, tracks: Vec<Arc<dyn MediaTrack>>) {
        *self.remote_track_store.lock().unwrap() = tracks;
    }
}

#[async_trait]
impl PeerConnection for MockPeerConnection {
    async fn create_offer(&self) -> Result<SessionDescription, PeerConnectionError> {
        self.record("create_offer");
        if self.fail_create_offer.load(Ordering::Acquire) {
            return Err(PeerConnectionError::CreateOffer("mock failure".to_string()));
        }
        let seq = self.description_seq.fetch_add(1, Ordering::AcqRel) + 1;
        Ok(SessionDescription::new(
            SdpType::Offer,
            format!("v=0 mock-offer-{seq}"),
        ))
    }

    async fn create_answer(&self) -> Result<SessionDescription, PeerConnectionError> {
        self.record("create_answer");
        if self.fail_create_answer.load(Ordering::Acquire) {
            return Err(PeerConnectionError::CreateAnswer("mock failure".to_string()));
        }
        let seq = self.description_seq.fetch_add(1, Ordering::AcqRel) + 1;
        Ok(SessionDescription::new(
            SdpType::Answer,
            format!("v=0 mock-answer-{seq}"),
        ))
    }

    async fn set_local_description(
        &self,
        description: Option<SessionDescription>,
    ) -> Result<(), PeerConnectionError> {
        let gate = self.set_local_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            let permit = gate.acquire().await.unwrap();
            permit.forget();
        }
        self.record(match &description {
            Some(desc) if desc.kind == SdpType::Offer => "set_local:offer",
            Some(_) => "set_local:answer",
            None => "set_local:implicit",
        });
        if self.fail_set_local.load(Ordering::Acquire) {
            return Err(PeerConnectionError::SetLocalDescription(
                "mock failure".to_string(),
            ));
        }
        self.negotiation_pending.store(false, Ordering::Release);
        *self.local_desc.lock().unwrap() = description;
        Ok(())
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), PeerConnectionError> {
        self.record(match description.kind {
            SdpType::Offer => "set_remote:offer",
            _ => "set_remote:answer",
        });
        if self.fail_set_remote.load(Ordering::Acquire) {
            return Err(PeerConnectionError::SetRemoteDescription(
                "mock failure".to_string(),
            ));
        }
        if self.populate_remote_tracks.load(Ordering::Acquire)
            && self.remote_track_store.lock().unwrap().is_empty()
        {
            let mic: Arc<dyn MediaTrack> =
                MockTrack::new(TrackKind::Microphone, "remote-usermedia");
            let cam: Arc<dyn MediaTrack> = MockTrack::new(TrackKind::Camera, "remote-usermedia");
            *self.remote_track_store.lock().unwrap() = vec![mic, cam];
        }
        Ok(())
    }

    async fn add_ice_candidate(
        &self,
        candidate: IceCandidate,
    ) -> Result<(), PeerConnectionError> {
        self.record(format!("add_candidate:{}", candidate.candidate));
        if self.fail_add_candidate.load(Ordering::Acquire) {
            return Err(PeerConnectionError::AddCandidate("mock failure".to_string()));
        }
        self.added_candidates.lock().unwrap().push(candidate);
        Ok(())
    }

    async fn add_track(&self, track: Arc<dyn MediaTrack>) -> Result<(), PeerConnectionError> {
        self.record(format!("add_track:{:?}", track.kind()));
        if self.fire_negotiation_on_add_track.load(Ordering::Acquire)
            && !self.negotiation_pending.swap(true, Ordering::AcqRel)
        {
            self.fire_negotiation_needed();
        }
        Ok(())
    }

    async fn remove_track(
        &self,
        track: &Arc<dyn MediaTrack>,
    ) -> Result<bool, PeerConnectionError> {
        self.record(format!("remove_track:{:?}", track.kind()));
        Ok(true)
    }

    async fn replace_track(
        &self,
        old: &Arc<dyn MediaTrack>,
        _new: Arc<dyn MediaTrack>,
    ) -> Result<bool, PeerConnectionError> {
        self.record(format!("replace_track:{:?}", old.kind()));
        Ok(true)
    }

    fn create_data_channel(&self) {
        self.record("create_data_channel");
    }

    fn data_channel(&self) -> Option<Arc<dyn DataChannel>> {
        None
    }

    fn remote_tracks(&self) -> Vec<Arc<dyn MediaTrack>> {
        self.remote_track_store.lock().unwrap().clone()
    }

    fn ice_gathering_state(&self) -> IceGatheringState {
        *self.gathering.lock().unwrap()
    }

    fn local_description(&self) -> Option<SessionDescription> {
        self.local_desc.lock().unwrap().clone()
    }

    fn notify_stream_purpose_changed(&self) {
        self.record("notify_stream_purpose_changed");
    }

    fn set_observer(&self, observer: Weak<dyn PeerConnectionObserver>) {
        *self.observer.lock().unwrap() = Some(observer);
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.record("close");
    }
}

// ── handler ───────────────────────────────────────────────────────────

pub struct MockHandler {
    pub sent: Mutex<Vec<SignallingMessage>>,
    pub updates: Mutex<Vec<CallUpdate>>,
    /// message kinds whose sends fail
    pub fail_kinds: Mutex<Vec<&'static str>>,
}

impl MockHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            updates: Mutex::new(Vec::new()),
            fail_kinds: Mutex::new(Vec::new()),
        })
    }

    pub fn fail_kind(&self, kind: &'static str) {
        self.fail_kinds.lock().unwrap().push(kind);
    }

    pub fn sent_kinds(&self) -> Vec<&'static str> {
        self.sent.lock().unwrap().iter().map(|m| m.kind()).collect()
    }

    pub fn count_kind(&self, kind: &str) -> usize {
        self.sent_kinds().iter().filter(|k| **k == kind).count()
    }

    pub fn messages_of_kind(&self, kind: &str) -> Vec<SignallingMessage> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.kind() == kind)
            .cloned()
            .collect()
    }

    pub fn update_states(&self) -> Vec<CallState> {
        self.updates.lock().unwrap().iter().map(|u| u.state).collect()
    }
}

#[async_trait]
impl CallHandler for MockHandler {
    fn emit_update(&self, update: CallUpdate) {
        self.updates.lock().unwrap().push(update);
    }

    async fn send_signalling_message(
        &self,
        message: SignallingMessage,
    ) -> Result<(), SignallingError> {
        if self.fail_kinds.lock().unwrap().contains(&message.kind()) {
            return Err(SignallingError::Send("mock send failure".to_string()));
        }
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}

// ── harness ───────────────────────────────────────────────────────────

pub struct TestCall {
    pub call: Arc<PeerCall>,
    pub pc: Arc<MockPeerConnection>,
    pub handler: Arc<MockHandler>,
}

pub fn build_call() -> TestCall {
    build_call_with_config(CallConfig::default())
}

pub fn build_call_with_config(config: CallConfig) -> TestCall {
    let pc = MockPeerConnection::new();
    let handler = MockHandler::new();
    let call = PeerCall::new(
        handler.clone(),
        pc.clone(),
        Arc::new(TokioTimeoutCreator),
        config,
    );
    TestCall { call, pc, handler }
}

/// Let spawned tasks make progress without advancing the clock
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

pub fn candidate(tag: &str) -> IceCandidate {
    IceCandidate {
        candidate: format!("candidate:{tag}"),
        sdp_mid: Some("0".to_string()),
        sdp_mline_index: Some(0),
    }
}

pub fn remote_answer() -> SignallingMessage {
    SignallingMessage::Answer {
        answer: SessionDescription::new(SdpType::Answer, "v=0 remote-answer"),
        sdp_stream_metadata: SdpStreamMetadata::new(),
    }
}

pub fn remote_invite(lifetime: Option<u64>) -> SignallingMessage {
    SignallingMessage::Invite {
        offer: SessionDescription::new(SdpType::Offer, "v=0 remote-offer"),
        sdp_stream_metadata: SdpStreamMetadata::new(),
        version: peercall_core::SIGNALLING_VERSION,
        lifetime,
    }
}

pub fn candidates_message(tags: &[&str]) -> SignallingMessage {
    SignallingMessage::Candidates {
        candidates: tags.iter().map(|tag| candidate(tag)).collect(),
    }
}
