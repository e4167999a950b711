use crate::error::{Error, Result};
use crate::logger::log;
use crate::peer::buffer::CandidateBuffer;
use crate::peer::state::SessionState;
use crate::peer::transport::{PeerTransport, TrackReplacement};
use crate::peer::types::{
    IceCandidate, LocalTrack, MediaKind, ParticipantId, RemoteStream, SdpKind, SessionDescription,
};
use crate::signaling::{Command, SignalingMessage};
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// Что стало с входящим answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerOutcome {
    Applied,
    /// Answer не ожидался (дубликат или устаревший), отброшен
    Stale,
}

/// Что стало с входящим кандидатом
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateOutcome {
    Applied,
    /// Remote description ещё нет, кандидат в очереди
    Buffered,
    /// Кандидат некорректен или отклонён движком
    Dropped,
}

/// Переговоры с одним удалённым участником: одно соединение движка,
/// буфер ранних кандидатов и набор прикреплённых локальных треков.
pub struct PeerSession {
    local: ParticipantId,
    peer: ParticipantId,
    connection_id: String,
    state: SessionState,
    transport: Box<dyn PeerTransport>,
    candidates: CandidateBuffer,
    local_description_set: bool,
    remote_description_set: bool,
    // наш offer ещё без ответа
    awaiting_answer: bool,
    // трек поменялся, нужен новый обмен описаниями
    needs_renegotiation: bool,
    // пир уже попросили прислать offer
    renegotiation_requested: bool,
    // встречный offer отброшен, его кандидаты тоже до нашего answer
    discard_candidates: bool,
    tracks: HashMap<MediaKind, LocalTrack>,
    streams: HashSet<String>,
    started_at: DateTime<Utc>,
}

impl PeerSession {
    pub fn new(
        local: ParticipantId,
        peer: ParticipantId,
        connection_id: String,
        transport: Box<dyn PeerTransport>,
    ) -> Self {
        Self {
            local,
            peer,
            connection_id,
            state: SessionState::Idle,
            transport,
            candidates: CandidateBuffer::new(),
            local_description_set: false,
            remote_description_set: false,
            awaiting_answer: false,
            needs_renegotiation: false,
            renegotiation_requested: false,
            discard_candidates: false,
            tracks: HashMap::new(),
            streams: HashSet::new(),
            started_at: Utc::now(),
        }
    }

    pub fn peer(&self) -> &ParticipantId {
        &self.peer
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_awaiting_answer(&self) -> bool {
        self.awaiting_answer
    }

    /// На установленной сессии offer шлёт только меньший id пары,
    /// поэтому встречных offer при ренеготиации не бывает
    pub fn owns_renegotiation(&self) -> bool {
        self.local < self.peer
    }

    pub fn has_local_description(&self) -> bool {
        self.local_description_set
    }

    pub fn has_remote_description(&self) -> bool {
        self.remote_description_set
    }

    /// Время с создания сессии
    pub fn age(&self) -> Duration {
        Utc::now() - self.started_at
    }

    pub fn buffered_candidates(&self) -> usize {
        self.candidates.len()
    }

    /// Id прикреплённого трека данного вида
    pub fn attached_track(&self, kind: MediaKind) -> Option<&str> {
        self.tracks.get(&kind).map(|t| t.id())
    }

    /// Idle → Offering: прикрепить треки, создать и применить offer
    pub async fn start_offer(&mut self, tracks: &[LocalTrack]) -> Result<SignalingMessage> {
        if self.state != SessionState::Idle {
            return Err(Error::negotiation(
                &self.peer,
                format!("cannot start an offer while {}", self.state),
            ));
        }
        self.attach_tracks(tracks).await?;
        self.state = SessionState::Offering;
        log(&format!("Creating offer for {}...", self.peer));
        self.send_offer().await
    }

    /// Входящий offer: Idle → AnsweringPending → Connected, либо
    /// ренеготиация уже установленной сессии (остаётся Connected).
    pub async fn accept_offer(&mut self, data: &str, tracks: &[LocalTrack]) -> Result<SignalingMessage> {
        let offer = SessionDescription::from_json(data)?;
        if offer.kind != SdpKind::Offer {
            return Err(Error::Transport(format!(
                "expected an offer, got {:?}",
                offer.kind
            )));
        }

        match self.state {
            SessionState::Idle => {
                self.attach_tracks(tracks).await?;
                self.state = SessionState::AnsweringPending;
            }
            SessionState::Connected => {
                if self.awaiting_answer {
                    return Err(Error::negotiation(
                        &self.peer,
                        "offer while our renegotiation offer is unanswered",
                    ));
                }
                log(&format!("Renegotiation offer from {}", self.peer));
                // наши новые треки уйдут в этом answer
                self.needs_renegotiation = false;
                self.renegotiation_requested = false;
            }
            other => {
                return Err(Error::negotiation(
                    &self.peer,
                    format!("unexpected offer while {other}"),
                ));
            }
        }

        log("Setting remote description (offer)...");
        self.transport.set_remote_description(offer).await?;
        self.remote_description_set = true;
        self.apply_pending_candidates().await;

        log("Creating answer...");
        let answer = self.transport.create_answer().await?;
        self.transport.set_local_description(answer.clone()).await?;
        self.local_description_set = true;

        // ответчику больше ничего не нужно для локального состояния
        self.state = SessionState::Connected;
        Ok(self.message(Command::Answer, answer.to_json()?))
    }

    /// Входящий answer на наш offer
    pub async fn accept_answer(&mut self, data: &str) -> Result<AnswerOutcome> {
        let expected = match self.state {
            SessionState::Offering => true,
            SessionState::Connected => self.awaiting_answer,
            _ => false,
        };
        if !expected {
            log(&format!(
                "Discarding stale answer from {} while {}",
                self.peer, self.state
            ));
            return Ok(AnswerOutcome::Stale);
        }

        let answer = SessionDescription::from_json(data)?;
        if answer.kind != SdpKind::Answer {
            return Err(Error::Transport(format!(
                "expected an answer, got {:?}",
                answer.kind
            )));
        }

        log("Setting remote description (answer)...");
        self.transport.set_remote_description(answer).await?;
        self.remote_description_set = true;
        self.awaiting_answer = false;
        self.discard_candidates = false;
        self.apply_pending_candidates().await;
        self.state = SessionState::Connected;
        Ok(AnswerOutcome::Applied)
    }

    /// Встречный offer пира отброшен (glare), наш offer остаётся в силе.
    /// Кандидаты пира до его answer относятся к отброшенному offer.
    pub fn ignore_competing_offer(&mut self) {
        self.discard_candidates = true;
        let dropped = self.candidates.clear();
        if dropped > 0 {
            log(&format!("Dropped {} queued candidates from {}", dropped, self.peer));
        }
    }

    /// Входящий кандидат: сразу, если remote description есть, иначе в буфер
    pub async fn add_remote_candidate(&mut self, data: &str) -> CandidateOutcome {
        if self.state == SessionState::Closed {
            return CandidateOutcome::Dropped;
        }
        if self.discard_candidates {
            debug!(peer = %self.peer, "Dropping candidate of an ignored offer");
            return CandidateOutcome::Dropped;
        }
        let candidate = match IceCandidate::from_json(data) {
            Ok(c) => c,
            Err(e) => {
                warn!(peer = %self.peer, "Dropping malformed candidate: {}", e);
                return CandidateOutcome::Dropped;
            }
        };

        let candidate = if self.remote_description_set {
            candidate
        } else {
            match self.candidates.push(candidate) {
                None => {
                    log(&format!(
                        "Remote description not set yet, queuing candidate ({} pending)",
                        self.candidates.len()
                    ));
                    return CandidateOutcome::Buffered;
                }
                Some(c) => c,
            }
        };

        match self.transport.add_ice_candidate(candidate).await {
            Ok(()) => CandidateOutcome::Applied,
            Err(e) => {
                warn!(peer = %self.peer, "Failed to add ICE candidate: {}", e);
                CandidateOutcome::Dropped
            }
        }
    }

    /// Локальный кандидат от движка → сообщение пиру. Не буферизуется.
    pub fn local_candidate(&self, candidate: &IceCandidate) -> Result<Option<SignalingMessage>> {
        if !self.state.forwards_local_candidates() {
            return Ok(None);
        }
        Ok(Some(self.message(Command::IceCandidate, candidate.to_json()?)))
    }

    /// Приводит исходящие треки к текущему набору. Замена на месте; если
    /// движку нужна ренеготиация, возвращает новый offer или, если offer
    /// не наш, просьбу пиру (`connect`). Сессия остаётся Connected.
    pub async fn sync_tracks(&mut self, current: &[LocalTrack]) -> Result<Option<SignalingMessage>> {
        if self.state != SessionState::Connected {
            return Ok(None);
        }

        for track in current {
            if self.attached_track(track.kind()) == Some(track.id()) {
                continue;
            }
            let replacement = self.transport.replace_track(track.kind(), track.clone()).await?;
            log(&format!(
                "Replaced {:?} track for {} ({:?})",
                track.kind(),
                self.peer,
                replacement
            ));
            self.tracks.insert(track.kind(), track.clone());
            if replacement == TrackReplacement::NeedsRenegotiation {
                self.needs_renegotiation = true;
            }
        }

        if !self.needs_renegotiation || self.awaiting_answer {
            return Ok(None);
        }
        if self.owns_renegotiation() {
            self.needs_renegotiation = false;
            log(&format!("Renegotiating with {}", self.peer));
            return self.send_offer().await.map(Some);
        }
        if self.renegotiation_requested {
            return Ok(None);
        }
        self.renegotiation_requested = true;
        log(&format!("Asking {} to renegotiate", self.peer));
        Ok(Some(self.message(Command::Connect, String::new())))
    }

    /// Пир просит новый offer (`connect` на установленной сессии).
    /// Если наш offer ещё без ответа, новый уйдёт после answer.
    pub async fn renegotiate(&mut self) -> Result<Option<SignalingMessage>> {
        if self.state != SessionState::Connected {
            return Ok(None);
        }
        if !self.owns_renegotiation() {
            debug!(peer = %self.peer, "Renegotiation request ignored, offers come from the peer");
            return Ok(None);
        }
        if self.awaiting_answer {
            self.needs_renegotiation = true;
            return Ok(None);
        }
        self.needs_renegotiation = false;
        log(&format!("Renegotiating with {} on request", self.peer));
        self.send_offer().await.map(Some)
    }

    /// true, если поток с таким id ещё не показывался
    pub fn note_stream(&mut self, stream: &RemoteStream) -> bool {
        self.streams.insert(stream.stream_id.clone())
    }

    /// Закрывает соединение движка. Терминально.
    pub async fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closed;
        self.awaiting_answer = false;
        if let Err(e) = self.transport.close().await {
            warn!(peer = %self.peer, "Error closing transport: {}", e);
        }
    }

    async fn attach_tracks(&mut self, tracks: &[LocalTrack]) -> Result<()> {
        for track in tracks {
            if self.tracks.contains_key(&track.kind()) {
                continue;
            }
            self.transport.add_track(track.clone()).await?;
            self.tracks.insert(track.kind(), track.clone());
        }
        Ok(())
    }

    async fn send_offer(&mut self) -> Result<SignalingMessage> {
        let offer = self.transport.create_offer().await?;
        log("Setting local description (offer)...");
        self.transport.set_local_description(offer.clone()).await?;
        self.local_description_set = true;
        self.awaiting_answer = true;
        Ok(self.message(Command::Offer, offer.to_json()?))
    }

    /// Применяет отложенные кандидаты после установки remote description
    async fn apply_pending_candidates(&mut self) {
        let pending = self.candidates.drain();
        if pending.is_empty() {
            return;
        }
        log(&format!(
            "Applying {} pending candidates for {}",
            pending.len(),
            self.peer
        ));
        for candidate in pending {
            if let Err(e) = self.transport.add_ice_candidate(candidate).await {
                warn!(peer = %self.peer, "Failed to apply pending candidate: {}", e);
            }
        }
    }

    fn message(&self, command: Command, data: String) -> SignalingMessage {
        SignalingMessage::new(self.local.clone(), Some(self.peer.clone()), command, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fake_track, FakePeer, FakeTransport, TransportCall};
    use std::sync::Arc;

    fn session(fake: &Arc<FakePeer>) -> PeerSession {
        session_between("alice", "bob", fake)
    }

    fn session_between(local: &str, peer: &str, fake: &Arc<FakePeer>) -> PeerSession {
        PeerSession::new(
            ParticipantId::from(local),
            ParticipantId::from(peer),
            "conn-1".into(),
            Box::new(FakeTransport::new(Arc::clone(fake))),
        )
    }

    fn offer_json() -> String {
        SessionDescription::offer("v=0 remote-offer").to_json().unwrap()
    }

    fn answer_json() -> String {
        SessionDescription::answer("v=0 remote-answer").to_json().unwrap()
    }

    fn candidate_json(n: u32) -> String {
        IceCandidate {
            candidate: format!("candidate:{n} 1 udp 1 10.0.0.{n} 5000 typ host"),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        }
        .to_json()
        .unwrap()
    }

    #[tokio::test]
    async fn test_offerer_path() {
        let fake = FakePeer::new();
        let mut s = session(&fake);
        let tracks = vec![fake_track(MediaKind::Audio, "mic"), fake_track(MediaKind::Video, "cam")];

        let offer = s.start_offer(&tracks).await.unwrap();
        assert_eq!(offer.command(), Command::Offer);
        assert_eq!(offer.to(), Some(&ParticipantId::from("bob")));
        assert_eq!(s.state(), SessionState::Offering);
        assert!(s.is_awaiting_answer());

        assert_eq!(s.accept_answer(&answer_json()).await.unwrap(), AnswerOutcome::Applied);
        assert_eq!(s.state(), SessionState::Connected);
        assert!(s.has_local_description() && s.has_remote_description());
        assert_eq!(
            fake.calls(),
            vec![
                TransportCall::AddTrack("mic".into()),
                TransportCall::AddTrack("cam".into()),
                TransportCall::CreateOffer,
                TransportCall::SetLocal(SdpKind::Offer),
                TransportCall::SetRemote(SdpKind::Answer),
            ]
        );
    }

    #[tokio::test]
    async fn test_answerer_reaches_connected_after_answer() {
        let fake = FakePeer::new();
        let mut s = session(&fake);

        let answer = s.accept_offer(&offer_json(), &[]).await.unwrap();
        assert_eq!(answer.command(), Command::Answer);
        assert_eq!(s.state(), SessionState::Connected);
        let desc = SessionDescription::from_json(answer.data()).unwrap();
        assert_eq!(desc.kind, SdpKind::Answer);
    }

    #[tokio::test]
    async fn test_early_candidates_applied_after_remote_description() {
        let fake = FakePeer::new();
        let mut s = session(&fake);

        assert_eq!(s.add_remote_candidate(&candidate_json(1)).await, CandidateOutcome::Buffered);
        assert_eq!(s.add_remote_candidate(&candidate_json(2)).await, CandidateOutcome::Buffered);
        assert_eq!(s.buffered_candidates(), 2);

        s.accept_offer(&offer_json(), &[]).await.unwrap();
        assert_eq!(s.buffered_candidates(), 0);

        let calls = fake.calls();
        let remote_at = calls
            .iter()
            .position(|c| *c == TransportCall::SetRemote(SdpKind::Offer))
            .unwrap();
        let applied: Vec<usize> = calls
            .iter()
            .enumerate()
            .filter(|(_, c)| matches!(c, TransportCall::AddCandidate(_)))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(applied.len(), 2);
        assert!(applied.iter().all(|i| *i > remote_at));

        // после drain кандидаты применяются сразу
        assert_eq!(s.add_remote_candidate(&candidate_json(3)).await, CandidateOutcome::Applied);
    }

    #[tokio::test]
    async fn test_stale_answer_is_discarded() {
        let fake = FakePeer::new();
        let mut s = session(&fake);
        assert_eq!(s.accept_answer(&answer_json()).await.unwrap(), AnswerOutcome::Stale);
        assert_eq!(s.state(), SessionState::Idle);

        s.accept_offer(&offer_json(), &[]).await.unwrap();
        assert_eq!(s.accept_answer(&answer_json()).await.unwrap(), AnswerOutcome::Stale);
        assert_eq!(s.state(), SessionState::Connected);
    }

    #[tokio::test]
    async fn test_rejected_description_is_an_error() {
        let fake = FakePeer::new();
        let mut s = session(&fake);
        let bad = SessionDescription::offer("reject").to_json().unwrap();
        assert!(s.accept_offer(&bad, &[]).await.is_err());
        assert!(s.accept_offer("{not json", &[]).await.is_err());
    }

    #[tokio::test]
    async fn test_malformed_candidate_dropped() {
        let fake = FakePeer::new();
        let mut s = session(&fake);
        assert_eq!(s.add_remote_candidate("nope").await, CandidateOutcome::Dropped);
        assert_eq!(s.buffered_candidates(), 0);
    }

    #[tokio::test]
    async fn test_local_candidates_forwarded_only_while_negotiating() {
        let fake = FakePeer::new();
        let mut s = session(&fake);
        let cand = IceCandidate::from_json(&candidate_json(1)).unwrap();
        assert!(s.local_candidate(&cand).unwrap().is_none());

        s.start_offer(&[]).await.unwrap();
        let msg = s.local_candidate(&cand).unwrap().unwrap();
        assert_eq!(msg.command(), Command::IceCandidate);
        assert_eq!(IceCandidate::from_json(msg.data()).unwrap(), cand);

        s.close().await;
        assert_eq!(s.state(), SessionState::Closed);
        assert!(s.local_candidate(&cand).unwrap().is_none());
        assert!(fake.is_closed());
    }

    #[tokio::test]
    async fn test_sync_tracks_in_place() {
        let fake = FakePeer::new();
        let mut s = session(&fake);
        s.accept_offer(&offer_json(), &[fake_track(MediaKind::Video, "cam")]).await.unwrap();

        let screen = fake_track(MediaKind::Video, "screen");
        assert!(s.sync_tracks(&[screen]).await.unwrap().is_none());
        assert_eq!(s.attached_track(MediaKind::Video), Some("screen"));
        assert_eq!(s.state(), SessionState::Connected);
        assert!(fake
            .calls()
            .contains(&TransportCall::ReplaceTrack(MediaKind::Video, "screen".into())));
    }

    #[tokio::test]
    async fn test_sync_tracks_renegotiates_when_engine_requires_it() {
        let fake = FakePeer::new();
        let mut s = session(&fake);
        s.accept_offer(&offer_json(), &[]).await.unwrap();

        // видео-трека не было, движку нужен новый offer
        let offer = s
            .sync_tracks(&[fake_track(MediaKind::Video, "screen")])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(offer.command(), Command::Offer);
        assert_eq!(s.state(), SessionState::Connected);
        assert!(s.is_awaiting_answer());

        assert_eq!(s.accept_answer(&answer_json()).await.unwrap(), AnswerOutcome::Applied);
        assert!(!s.is_awaiting_answer());
    }

    #[tokio::test]
    async fn test_larger_id_asks_for_offer_instead_of_offering() {
        let fake = FakePeer::new();
        let mut s = session_between("bob", "alice", &fake);
        s.accept_offer(&offer_json(), &[]).await.unwrap();
        assert!(!s.owns_renegotiation());

        let request = s
            .sync_tracks(&[fake_track(MediaKind::Video, "screen")])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(request.command(), Command::Connect);
        assert_eq!(request.to(), Some(&ParticipantId::from("alice")));
        assert!(!s.is_awaiting_answer());
        // просьба уходит один раз
        assert!(s.sync_tracks(&[]).await.unwrap().is_none());

        // пир сам шлёт offer, мы в stable и просто отвечаем
        let answer = s.accept_offer(&offer_json(), &[]).await.unwrap();
        assert_eq!(answer.command(), Command::Answer);
        assert_eq!(s.state(), SessionState::Connected);
        assert!(s.sync_tracks(&[]).await.unwrap().is_none());
        let offers = fake
            .calls()
            .iter()
            .filter(|c| **c == TransportCall::SetLocal(SdpKind::Offer))
            .count();
        assert_eq!(offers, 0);
    }

    #[tokio::test]
    async fn test_renegotiation_request_handled_by_smaller_id() {
        let fake = FakePeer::new();
        let mut s = session(&fake);
        s.accept_offer(&offer_json(), &[]).await.unwrap();

        let offer = s.renegotiate().await.unwrap().unwrap();
        assert_eq!(offer.command(), Command::Offer);
        assert!(s.is_awaiting_answer());

        // вторая просьба ждёт answer на первую
        assert!(s.renegotiate().await.unwrap().is_none());
        s.accept_answer(&answer_json()).await.unwrap();
        let again = s.sync_tracks(&[]).await.unwrap().unwrap();
        assert_eq!(again.command(), Command::Offer);

        let mut larger = session_between("bob", "alice", &FakePeer::new());
        larger.accept_offer(&offer_json(), &[]).await.unwrap();
        assert!(larger.renegotiate().await.unwrap().is_none());
        assert!(!larger.is_awaiting_answer());
    }

    #[tokio::test]
    async fn test_offer_over_pending_offer_keeps_session() {
        let fake = FakePeer::new();
        let mut s = session(&fake);
        s.accept_offer(&offer_json(), &[]).await.unwrap();
        s.sync_tracks(&[fake_track(MediaKind::Video, "screen")]).await.unwrap();
        assert!(s.is_awaiting_answer());

        let err = s.accept_offer(&offer_json(), &[]).await.unwrap_err();
        assert!(matches!(err, Error::NegotiationFailed { .. }));
        assert_eq!(s.state(), SessionState::Connected);
        assert!(s.is_awaiting_answer());
        assert_eq!(s.accept_answer(&answer_json()).await.unwrap(), AnswerOutcome::Applied);
    }

    #[tokio::test]
    async fn test_ignored_offer_candidates_are_dropped_until_answer() {
        let fake = FakePeer::new();
        let mut s = session(&fake);
        assert_eq!(s.add_remote_candidate(&candidate_json(1)).await, CandidateOutcome::Buffered);
        s.start_offer(&[]).await.unwrap();

        s.ignore_competing_offer();
        assert_eq!(s.buffered_candidates(), 0);
        assert_eq!(s.add_remote_candidate(&candidate_json(2)).await, CandidateOutcome::Dropped);

        s.accept_answer(&answer_json()).await.unwrap();
        assert_eq!(s.add_remote_candidate(&candidate_json(3)).await, CandidateOutcome::Applied);
        let applied: Vec<_> = fake
            .calls()
            .into_iter()
            .filter(|c| matches!(c, TransportCall::AddCandidate(_)))
            .collect();
        assert_eq!(
            applied,
            vec![TransportCall::AddCandidate(
                IceCandidate::from_json(&candidate_json(3)).unwrap().candidate
            )]
        );
    }
}
