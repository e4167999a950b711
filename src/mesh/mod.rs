// Координация меша: актор участника, его очередь и таблица сессий

mod actor;
mod coordinator;

pub use actor::Participant;
pub use coordinator::MeshCoordinator;

use crate::media::MediaSource;
use crate::peer::transport::TransportEvent;
use crate::peer::types::ParticipantId;
use tokio::sync::mpsc;

/// Жизненный цикл и входящие сообщения релея
#[derive(Debug, Clone)]
pub enum RelayEvent {
    Open,
    /// Сырые байты сообщения, декодирует актор
    Message(Vec<u8>),
    Closed(String),
    Error(String),
}

/// Всё, что обрабатывает актор участника, строго по одному
#[derive(Debug, Clone)]
pub enum MeshEvent {
    Relay(RelayEvent),
    Transport {
        peer: ParticipantId,
        connection_id: String,
        event: TransportEvent,
    },
    /// Кнопка "connect"
    Connect,
    /// Переключение камера/экран
    SwitchSource(MediaSource),
    /// Локальный выход из звонка
    Leave,
}

pub type MeshSender = mpsc::UnboundedSender<MeshEvent>;
pub type MeshReceiver = mpsc::UnboundedReceiver<MeshEvent>;

/// Очередь актора участника
pub fn channel() -> (MeshSender, MeshReceiver) {
    mpsc::unbounded_channel()
}
