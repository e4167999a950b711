use crate::peer::types::ParticipantId;

/// Result с ошибкой меша
pub type Result<T> = std::result::Result<T, Error>;

/// Ошибки оркестрации меша
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Сообщение релея не разобрано (нет `from`/`command`, неизвестная команда)
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// Сообщение от пира, для которого нет сессии
    #[error("Unknown peer: {0}")]
    UnknownPeer(ParticipantId),

    /// Обмен описаниями с пиром не удался, сессия закрыта
    #[error("Negotiation with {peer} failed: {reason}")]
    NegotiationFailed { peer: ParticipantId, reason: String },

    /// Устройство захвата недоступно или нет разрешения
    #[error("Media acquisition failed: {0}")]
    MediaAcquisitionFailed(String),

    /// Соединение с релеем потеряно или не установлено
    #[error("Relay unavailable: {0}")]
    RelayUnavailable(String),

    /// Движок отклонил операцию
    #[error("Transport error: {0}")]
    Transport(String),

    /// Неверный параметр конфигурации
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Ошибка затрагивает только сессию одного пира
    pub fn is_session_local(&self) -> bool {
        matches!(
            self,
            Error::UnknownPeer(_) | Error::NegotiationFailed { .. } | Error::Transport(_)
        )
    }

    /// Ошибка затрагивает все сессии участника
    pub fn is_global(&self) -> bool {
        matches!(self, Error::RelayUnavailable(_))
    }

    pub(crate) fn negotiation(peer: &ParticipantId, reason: impl std::fmt::Display) -> Self {
        Error::NegotiationFailed {
            peer: peer.clone(),
            reason: reason.to_string(),
        }
    }
}

impl From<webrtc::Error> for Error {
    fn from(e: webrtc::Error) -> Self {
        Error::Transport(e.to_string())
    }
}
