use crate::error::Result;
use crate::mesh::{MeshEvent, MeshSender};
use crate::peer::types::{IceCandidate, LocalTrack, MediaKind, ParticipantId, RemoteStream, SessionDescription};
use async_trait::async_trait;

/// Состояние соединения, как его сообщает движок
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Асинхронные события движка для одного соединения
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Найден локальный кандидат (trickle ICE)
    IceCandidate(IceCandidate),
    /// Пришёл удалённый трек
    Track(RemoteStream),
    ConnectionState(ConnectionState),
}

/// Результат замены исходящего трека
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackReplacement {
    /// Трек заменён без нового offer/answer
    InPlace,
    /// Движку нужен новый обмен описаниями
    NeedsRenegotiation,
}

/// Одно соединение движка с одним пиром (ICE/DTLS/SRTP внутри).
///
/// Переходы signaling state как у браузера, но без отката: из
/// have-local-offer выход только через answer.
#[async_trait]
pub trait PeerTransport: Send {
    async fn create_offer(&mut self) -> Result<SessionDescription>;
    async fn create_answer(&mut self) -> Result<SessionDescription>;
    async fn set_local_description(&mut self, desc: SessionDescription) -> Result<()>;
    async fn set_remote_description(&mut self, desc: SessionDescription) -> Result<()>;
    async fn add_ice_candidate(&mut self, candidate: IceCandidate) -> Result<()>;
    async fn add_track(&mut self, track: LocalTrack) -> Result<()>;
    async fn replace_track(&mut self, kind: MediaKind, track: LocalTrack) -> Result<TrackReplacement>;
    async fn close(&mut self) -> Result<()>;
}

/// Создаёт соединения движка
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(&self, peer: &ParticipantId, events: TransportEvents) -> Result<Box<dyn PeerTransport>>;
}

/// Канал событий движка, помеченный пиром и id соединения.
///
/// Метка позволяет отбросить события уже закрытого соединения.
#[derive(Clone, Debug)]
pub struct TransportEvents {
    peer: ParticipantId,
    connection_id: String,
    tx: MeshSender,
}

impl TransportEvents {
    pub fn new(peer: ParticipantId, connection_id: String, tx: MeshSender) -> Self {
        Self {
            peer,
            connection_id,
            tx,
        }
    }

    pub fn peer(&self) -> &ParticipantId {
        &self.peer
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Отправка в очередь участника; если актор уже остановлен, событие теряется
    pub fn emit(&self, event: TransportEvent) {
        let _ = self.tx.send(MeshEvent::Transport {
            peer: self.peer.clone(),
            connection_id: self.connection_id.clone(),
            event,
        });
    }
}
