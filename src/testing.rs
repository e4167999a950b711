// Заглушки движка, релея, presentation и захвата.
// Собираются для тестов и с фичей `test-util`.

use crate::error::{Error, Result};
use crate::media::{CaptureProvider, MediaSource};
use crate::peer::state::Presence;
use crate::peer::transport::{PeerTransport, TrackReplacement, TransportEvent, TransportEvents, TransportFactory};
use crate::peer::types::{
    IceCandidate, LocalTrack, MediaKind, ParticipantId, RemoteStream, SdpKind, SessionDescription,
};
use crate::presentation::PresentationSink;
use crate::relay::SignalingRelay;
use crate::signaling::SignalingMessage;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

/// Локальный трек без источника данных
pub fn fake_track(kind: MediaKind, id: &str) -> LocalTrack {
    let mime = match kind {
        MediaKind::Audio => MIME_TYPE_OPUS,
        MediaKind::Video => MIME_TYPE_VP8,
    };
    let track = TrackLocalStaticSample::new(
        RTCRtpCodecCapability {
            mime_type: mime.to_owned(),
            ..Default::default()
        },
        id.to_owned(),
        "fake-stream".to_owned(),
    );
    LocalTrack::new(kind, Arc::new(track))
}

/// Вызов фейкового движка
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    AddTrack(String),
    CreateOffer,
    CreateAnswer,
    SetLocal(SdpKind),
    SetRemote(SdpKind),
    AddCandidate(String),
    ReplaceTrack(MediaKind, String),
    Close,
}

/// Наблюдатель за одним `FakeTransport`, остаётся у теста после
/// того, как транспорт отдан сессии.
#[derive(Debug, Default)]
pub struct FakePeer {
    calls: Mutex<Vec<TransportCall>>,
    closed: AtomicBool,
    events: Mutex<Option<TransportEvents>>,
}

impl FakePeer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        lock(&self.calls).clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Id соединения, выданный фабрикой
    pub fn connection_id(&self) -> Option<String> {
        lock(&self.events)
            .as_ref()
            .map(|e| e.connection_id().to_owned())
    }

    /// Имитирует событие движка для этого соединения
    pub fn emit(&self, event: TransportEvent) {
        if let Some(events) = lock(&self.events).as_ref() {
            events.emit(event);
        }
    }

    /// Имитирует удалённый поток
    pub fn emit_stream(&self, stream_id: &str, kind: MediaKind) {
        self.emit(TransportEvent::Track(RemoteStream {
            stream_id: stream_id.to_owned(),
            track_id: format!("{stream_id}-{kind:?}"),
            kind: Some(kind),
        }));
    }

    fn record(&self, call: TransportCall) {
        lock(&self.calls).push(call);
    }
}

/// Signaling state соединения, переходы как в webrtc-rs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeSignaling {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
}

/// Движок в памяти. Описания с "reject" в SDP отклоняются,
/// кандидаты до remote description тоже. Недопустимые переходы
/// signaling state (в том числе откат) дают ошибку, как у webrtc-rs.
pub struct FakeTransport {
    fake: Arc<FakePeer>,
    signaling: FakeSignaling,
    remote_set: bool,
    senders: HashSet<MediaKind>,
    offers: usize,
}

impl FakeTransport {
    pub fn new(fake: Arc<FakePeer>) -> Self {
        Self {
            fake,
            signaling: FakeSignaling::Stable,
            remote_set: false,
            senders: HashSet::new(),
            offers: 0,
        }
    }

    pub fn signaling(&self) -> FakeSignaling {
        self.signaling
    }

    fn transition(&mut self, local: bool, kind: SdpKind) -> Result<()> {
        use FakeSignaling::*;
        let next = match (self.signaling, local, kind) {
            (Stable | HaveLocalOffer, true, SdpKind::Offer) => HaveLocalOffer,
            (HaveRemoteOffer, true, SdpKind::Answer) => Stable,
            (Stable, false, SdpKind::Offer) => HaveRemoteOffer,
            (HaveLocalOffer, false, SdpKind::Answer) => Stable,
            (from, local, kind) => {
                return Err(Error::Transport(format!(
                    "invalid proposed signaling state transition from {from:?} applying {} {kind:?}",
                    if local { "local" } else { "remote" }
                )))
            }
        };
        self.signaling = next;
        Ok(())
    }
}

#[async_trait]
impl PeerTransport for FakeTransport {
    async fn create_offer(&mut self) -> Result<SessionDescription> {
        self.fake.record(TransportCall::CreateOffer);
        self.offers += 1;
        Ok(SessionDescription::offer(format!("v=0 fake-offer {}", self.offers)))
    }

    async fn create_answer(&mut self) -> Result<SessionDescription> {
        self.fake.record(TransportCall::CreateAnswer);
        Ok(SessionDescription::answer("v=0 fake-answer"))
    }

    async fn set_local_description(&mut self, desc: SessionDescription) -> Result<()> {
        self.fake.record(TransportCall::SetLocal(desc.kind));
        self.transition(true, desc.kind)
    }

    async fn set_remote_description(&mut self, desc: SessionDescription) -> Result<()> {
        self.fake.record(TransportCall::SetRemote(desc.kind));
        if desc.sdp.contains("reject") {
            return Err(Error::Transport("remote description rejected".into()));
        }
        self.transition(false, desc.kind)?;
        self.remote_set = true;
        Ok(())
    }

    async fn add_ice_candidate(&mut self, candidate: IceCandidate) -> Result<()> {
        if !self.remote_set {
            return Err(Error::Transport("remote description not set".into()));
        }
        self.fake.record(TransportCall::AddCandidate(candidate.candidate));
        Ok(())
    }

    async fn add_track(&mut self, track: LocalTrack) -> Result<()> {
        self.fake.record(TransportCall::AddTrack(track.id().to_owned()));
        self.senders.insert(track.kind());
        Ok(())
    }

    async fn replace_track(&mut self, kind: MediaKind, track: LocalTrack) -> Result<TrackReplacement> {
        self.fake
            .record(TransportCall::ReplaceTrack(kind, track.id().to_owned()));
        if self.senders.insert(kind) {
            Ok(TrackReplacement::NeedsRenegotiation)
        } else {
            Ok(TrackReplacement::InPlace)
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.fake.record(TransportCall::Close);
        self.fake.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Фабрика `FakeTransport`, запоминает `FakePeer` каждого соединения
#[derive(Default)]
pub struct FakeEngine {
    fakes: Mutex<HashMap<ParticipantId, Vec<Arc<FakePeer>>>>,
    failing: Mutex<HashSet<ParticipantId>>,
    created: AtomicUsize,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Сколько соединений создано
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// `FakePeer` последнего соединения с пиром
    pub fn peer(&self, peer: &ParticipantId) -> Option<Arc<FakePeer>> {
        lock(&self.fakes).get(peer).and_then(|p| p.last().cloned())
    }

    /// Следующие соединения с пиром не создаются
    pub fn fail_create_for(&self, peer: &ParticipantId) {
        lock(&self.failing).insert(peer.clone());
    }
}

#[async_trait]
impl TransportFactory for FakeEngine {
    async fn create(&self, peer: &ParticipantId, events: TransportEvents) -> Result<Box<dyn PeerTransport>> {
        if lock(&self.failing).contains(peer) {
            return Err(Error::Transport(format!("engine refused connection to {peer}")));
        }
        let fake = FakePeer::new();
        *lock(&fake.events) = Some(events);
        lock(&self.fakes)
            .entry(peer.clone())
            .or_default()
            .push(Arc::clone(&fake));
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeTransport::new(fake)))
    }
}

/// Релей, который только записывает исходящие сообщения
#[derive(Debug, Default)]
pub struct RecordingRelay {
    sent: Mutex<Vec<SignalingMessage>>,
}

impl RecordingRelay {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sent(&self) -> Vec<SignalingMessage> {
        lock(&self.sent).clone()
    }
}

impl SignalingRelay for RecordingRelay {
    fn send(&self, msg: &SignalingMessage) -> Result<()> {
        lock(&self.sent).push(msg.clone());
        Ok(())
    }
}

/// Что получил presentation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    StreamAdded(ParticipantId, String),
    PeerRemoved(ParticipantId),
    LocalMedia(MediaSource, Vec<String>),
    NegotiationFailed(ParticipantId),
    Presence(Presence),
}

#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SinkEvent>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        lock(&self.events).clone()
    }

    /// Потоки, показанные для пира
    pub fn streams_of(&self, peer: &ParticipantId) -> Vec<String> {
        lock(&self.events)
            .iter()
            .filter_map(|e| match e {
                SinkEvent::StreamAdded(p, stream) if p == peer => Some(stream.clone()),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: SinkEvent) {
        lock(&self.events).push(event);
    }
}

impl PresentationSink for RecordingSink {
    fn stream_added(&self, peer: &ParticipantId, stream: &RemoteStream) {
        self.push(SinkEvent::StreamAdded(peer.clone(), stream.stream_id.clone()));
    }

    fn peer_removed(&self, peer: &ParticipantId) {
        self.push(SinkEvent::PeerRemoved(peer.clone()));
    }

    fn local_media(&self, source: MediaSource, tracks: &[LocalTrack]) {
        let ids = tracks.iter().map(|t| t.id().to_owned()).collect();
        self.push(SinkEvent::LocalMedia(source, ids));
    }

    fn negotiation_failed(&self, peer: &ParticipantId, _error: &Error) {
        self.push(SinkEvent::NegotiationFailed(peer.clone()));
    }

    fn presence_changed(&self, presence: Presence) {
        self.push(SinkEvent::Presence(presence));
    }
}

/// Захват с предсказуемыми id треков: `camera-audio-1`, `screen-video-2`, ...
#[derive(Debug, Default)]
pub struct ScriptedCapture {
    denied: Mutex<HashSet<String>>,
    counter: AtomicUsize,
}

impl ScriptedCapture {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Источник становится недоступен (нет устройства или разрешения)
    pub fn deny(&self, source: MediaSource) {
        lock(&self.denied).insert(source.to_string());
    }
}

#[async_trait]
impl CaptureProvider for ScriptedCapture {
    async fn acquire(&self, source: MediaSource) -> Result<Vec<LocalTrack>> {
        if lock(&self.denied).contains(&source.to_string()) {
            return Err(Error::MediaAcquisitionFailed(format!("{source} permission denied")));
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let video = fake_track(MediaKind::Video, &format!("{source}-video-{n}"));
        Ok(match source {
            MediaSource::Camera => vec![
                fake_track(MediaKind::Audio, &format!("{source}-audio-{n}")),
                video,
            ],
            MediaSource::Screen => vec![video],
        })
    }
}
