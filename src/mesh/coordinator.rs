use crate::error::{Error, Result};
use crate::logger::log;
use crate::mesh::MeshSender;
use crate::peer::session::{AnswerOutcome, PeerSession};
use crate::peer::state::{Presence, SessionState};
use crate::peer::transport::{ConnectionState, TransportEvent, TransportEvents, TransportFactory};
use crate::peer::types::{LocalTrack, ParticipantId};
use crate::presentation::PresentationSink;
use crate::relay::SignalingRelay;
use crate::signaling::{Command, SignalingMessage};
use crate::utils::random_id;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Таблица сессий участника: один `PeerSession` на пира.
///
/// Все методы вызываются из одного актора, поэтому переходы одной сессии
/// никогда не пересекаются, а таблица меняется под той же сериализацией.
pub struct MeshCoordinator {
    local: ParticipantId,
    sessions: HashMap<ParticipantId, PeerSession>,
    factory: Arc<dyn TransportFactory>,
    relay: Arc<dyn SignalingRelay>,
    sink: Arc<dyn PresentationSink>,
    events: MeshSender,
    // текущие исходящие треки, по одному на вид
    local_tracks: Vec<LocalTrack>,
    presence: Presence,
}

impl MeshCoordinator {
    pub fn new(
        local: ParticipantId,
        factory: Arc<dyn TransportFactory>,
        relay: Arc<dyn SignalingRelay>,
        sink: Arc<dyn PresentationSink>,
        events: MeshSender,
    ) -> Self {
        Self {
            local,
            sessions: HashMap::new(),
            factory,
            relay,
            sink,
            events,
            local_tracks: Vec::new(),
            presence: Presence::Offline,
        }
    }

    pub fn local_id(&self) -> &ParticipantId {
        &self.local
    }

    pub fn presence(&self) -> Presence {
        self.presence
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn session(&self, peer: &ParticipantId) -> Option<&PeerSession> {
        self.sessions.get(peer)
    }

    pub fn session_state(&self, peer: &ParticipantId) -> Option<SessionState> {
        self.sessions.get(peer).map(|s| s.state())
    }

    /// Пиры с сессиями, отсортированы
    pub fn peers(&self) -> Vec<ParticipantId> {
        let mut peers: Vec<ParticipantId> = self.sessions.keys().cloned().collect();
        peers.sort();
        peers
    }

    /// Релей открыт
    pub fn set_online(&mut self) {
        self.presence = Presence::Online;
        self.sink.presence_changed(Presence::Online);
    }

    /// Объявляет о себе широковещательным `connect`. Пока есть сессии,
    /// повторный вызов ничего не делает.
    pub fn on_local_connect(&mut self) -> Result<()> {
        if !self.sessions.is_empty() {
            log("Connect ignored, already in the mesh");
            return Ok(());
        }
        log(&format!("Announcing {} to the relay", self.local));
        self.relay.send(&SignalingMessage::connect(self.local.clone()))
    }

    /// Входящее сообщение релея, маршрутизация по `from`.
    ///
    /// Возвращаемые ошибки информационные (`UnknownPeer`,
    /// `NegotiationFailed`): они уже обработаны и затрагивают одного пира.
    pub async fn on_message(&mut self, msg: SignalingMessage) -> Result<()> {
        if msg.from() == &self.local {
            return Ok(());
        }
        if let Some(to) = msg.to() {
            if to != &self.local {
                debug!("Dropping {} addressed to {}", msg.command(), to);
                return Ok(());
            }
        }

        let peer = msg.from().clone();
        debug!("{} {} -> {}", msg.command(), peer, self.local);
        match msg.command() {
            Command::Connect => self.handle_connect(peer).await,
            Command::Offer => self.handle_offer(peer, msg.data()).await,
            Command::Answer => self.handle_answer(peer, msg.data()).await,
            Command::IceCandidate => self.handle_candidate(peer, msg.data()).await,
            Command::Disconnect => {
                if !self.remove_peer(&peer).await {
                    debug!("Disconnect from {} without a session", peer);
                }
                Ok(())
            }
        }
    }

    /// Событие движка для сессии `peer`. События закрытых соединений
    /// (другой `connection_id`) отбрасываются.
    pub async fn on_transport_event(
        &mut self,
        peer: ParticipantId,
        connection_id: &str,
        event: TransportEvent,
    ) -> Result<()> {
        let Some(session) = self.sessions.get_mut(&peer) else {
            debug!("Stale transport event for {}: {:?}", peer, event);
            return Ok(());
        };
        if session.connection_id() != connection_id {
            debug!("Stale transport event for {} ({})", peer, connection_id);
            return Ok(());
        }

        match event {
            TransportEvent::IceCandidate(candidate) => match session.local_candidate(&candidate) {
                Ok(Some(msg)) => self.send(&msg),
                Ok(None) => debug!("Local candidate for {} not forwarded", peer),
                Err(e) => warn!("Cannot forward local candidate to {}: {}", peer, e),
            },
            TransportEvent::Track(stream) => {
                if session.note_stream(&stream) {
                    self.sink.stream_added(&peer, &stream);
                } else {
                    debug!("Stream {} from {} already rendered", stream.stream_id, peer);
                }
            }
            TransportEvent::ConnectionState(ConnectionState::Failed) => {
                return Err(self
                    .fail_session(&peer, Error::Transport("connection failed".into()))
                    .await);
            }
            TransportEvent::ConnectionState(state) => {
                log(&format!("Transport to {peer} is {state:?}"));
            }
        }
        Ok(())
    }

    /// Новые локальные треки. Установленным сессиям трек меняется на
    /// месте, сессии в переговорах подхватят его, став Connected.
    pub async fn on_local_media_replaced(&mut self, tracks: Vec<LocalTrack>) {
        for track in tracks {
            match self.local_tracks.iter_mut().find(|t| t.kind() == track.kind()) {
                Some(slot) => *slot = track,
                None => self.local_tracks.push(track),
            }
        }

        let connected: Vec<ParticipantId> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.state() == SessionState::Connected)
            .map(|(peer, _)| peer.clone())
            .collect();
        log(&format!(
            "Propagating local media to {} connected peers",
            connected.len()
        ));
        for peer in connected {
            if let Err(e) = self.sync_session(&peer).await {
                warn!("Track replacement for {} failed: {}", peer, e);
            }
        }
    }

    /// Релей потерян: все сессии закрываются, как будто каждый пир
    /// прислал `disconnect`.
    pub async fn on_relay_lost(&mut self, reason: &str) {
        warn!("Relay unavailable: {}", reason);
        for peer in self.peers() {
            self.remove_peer(&peer).await;
        }
        self.presence = Presence::Offline;
        self.sink.presence_changed(Presence::Offline);
    }

    /// Локальный выход: `disconnect` всем и закрытие всех сессий
    pub async fn teardown(&mut self) {
        if self.presence == Presence::Online {
            self.send(&SignalingMessage::disconnect(self.local.clone(), None));
        }
        for peer in self.peers() {
            self.remove_peer(&peer).await;
        }
    }

    async fn handle_connect(&mut self, peer: ParticipantId) -> Result<()> {
        if let Some(session) = self.sessions.get_mut(&peer) {
            if session.state() != SessionState::Connected {
                log(&format!("Connect from known peer {peer} ignored"));
                return Ok(());
            }
            // connect на установленной сессии: пир просит новый offer
            return match session.renegotiate().await {
                Ok(Some(offer)) => {
                    self.send(&offer);
                    Ok(())
                }
                Ok(None) => Ok(()),
                Err(e) => Err(self.fail_session(&peer, e).await),
            };
        }

        let mut session = self.create_session(&peer).await?;
        let result = session.start_offer(&self.local_tracks).await;
        self.sessions.insert(peer.clone(), session);
        match result {
            Ok(offer) => {
                self.send(&offer);
                Ok(())
            }
            Err(e) => Err(self.fail_session(&peer, e).await),
        }
    }

    async fn handle_offer(&mut self, peer: ParticipantId, data: &str) -> Result<()> {
        if let Some(existing) = self.sessions.get_mut(&peer) {
            let state = existing.state();
            let keep_ours = match state {
                SessionState::Offering => self.local < peer,
                // на установленной сессии наш offer может быть только от меньшего id
                SessionState::Connected => existing.is_awaiting_answer(),
                _ => false,
            };
            if keep_ours {
                log(&format!("Glare with {peer}: keeping our offer"));
                existing.ignore_competing_offer();
                return Ok(());
            }
            if state == SessionState::Offering {
                log(&format!("Glare with {peer}: answering their offer instead"));
                if let Some(mut old) = self.sessions.remove(&peer) {
                    old.close().await;
                }
            }
        }

        if !self.sessions.contains_key(&peer) {
            let session = self.create_session(&peer).await?;
            self.sessions.insert(peer.clone(), session);
        }
        let Some(session) = self.sessions.get_mut(&peer) else {
            return Err(Error::UnknownPeer(peer));
        };

        match session.accept_offer(data, &self.local_tracks).await {
            Ok(answer) => {
                self.send(&answer);
                log(&format!("Session with {peer} connected (answerer)"));
                self.sync_session(&peer).await
            }
            Err(e) => Err(self.fail_session(&peer, e).await),
        }
    }

    async fn handle_answer(&mut self, peer: ParticipantId, data: &str) -> Result<()> {
        let Some(session) = self.sessions.get_mut(&peer) else {
            debug!("Answer from unknown peer {}", peer);
            return Err(Error::UnknownPeer(peer));
        };

        match session.accept_answer(data).await {
            Ok(AnswerOutcome::Applied) => {
                log(&format!("Session with {peer} connected (offerer)"));
                self.sync_session(&peer).await
            }
            Ok(AnswerOutcome::Stale) => Ok(()),
            Err(e) => Err(self.fail_session(&peer, e).await),
        }
    }

    async fn handle_candidate(&mut self, peer: ParticipantId, data: &str) -> Result<()> {
        let Some(session) = self.sessions.get_mut(&peer) else {
            debug!("ICE candidate from unknown peer {}", peer);
            return Err(Error::UnknownPeer(peer));
        };
        let outcome = session.add_remote_candidate(data).await;
        debug!("Candidate from {}: {:?}", peer, outcome);
        Ok(())
    }

    /// Подтягивает текущие треки в Connected сессию; наружу уходит
    /// offer ренеготиации или просьба о нём
    async fn sync_session(&mut self, peer: &ParticipantId) -> Result<()> {
        let Some(session) = self.sessions.get_mut(peer) else {
            return Ok(());
        };
        match session.sync_tracks(&self.local_tracks).await {
            Ok(Some(msg)) => {
                self.send(&msg);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) => Err(self.fail_session(peer, e).await),
        }
    }

    async fn create_session(&mut self, peer: &ParticipantId) -> Result<PeerSession> {
        let connection_id = random_id();
        let events = TransportEvents::new(peer.clone(), connection_id.clone(), self.events.clone());
        match self.factory.create(peer, events).await {
            Ok(transport) => Ok(PeerSession::new(
                self.local.clone(),
                peer.clone(),
                connection_id,
                transport,
            )),
            Err(e) => {
                let err = Error::negotiation(peer, e);
                self.sink.negotiation_failed(peer, &err);
                Err(err)
            }
        }
    }

    /// Закрывает сессию после ошибки переговоров; другие сессии не трогаются
    async fn fail_session(&mut self, peer: &ParticipantId, error: Error) -> Error {
        let error = match error {
            e @ Error::NegotiationFailed { .. } => e,
            other => Error::negotiation(peer, other),
        };
        warn!("{}", error);
        if let Some(mut session) = self.sessions.remove(peer) {
            session.close().await;
        }
        self.sink.negotiation_failed(peer, &error);
        self.sink.peer_removed(peer);
        error
    }

    /// true, если сессия была
    async fn remove_peer(&mut self, peer: &ParticipantId) -> bool {
        let Some(mut session) = self.sessions.remove(peer) else {
            return false;
        };
        log(&format!(
            "Closing session with {peer} after {}s",
            session.age().num_seconds()
        ));
        session.close().await;
        self.sink.peer_removed(peer);
        true
    }

    // релей fire-and-forget: потерю соединения сообщит сам релей
    fn send(&self, msg: &SignalingMessage) {
        if let Err(e) = self.relay.send(msg) {
            warn!("Failed to send {} to relay: {}", msg.command(), e);
        }
    }
}
