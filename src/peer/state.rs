use crate::peer::types::ServerConfig;
use once_cell::sync::Lazy;
use std::fmt;

/// ========== SESSION STATE ==========

/// Состояние переговоров с одним удалённым участником
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Сессия создана, описаний ещё нет
    Idle,
    /// Мы отправили offer и ждём answer
    Offering,
    /// Получили offer, готовим answer
    AnsweringPending,
    /// Локальное и удалённое описание применены
    Connected,
    /// Терминальное состояние, запись удаляется из таблицы
    Closed,
}

impl SessionState {
    /// Состояния, в которых локальные кандидаты уходят пиру
    pub fn forwards_local_candidates(self) -> bool {
        matches!(
            self,
            SessionState::Offering | SessionState::AnsweringPending | SessionState::Connected
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Offering => "offering",
            SessionState::AnsweringPending => "answering-pending",
            SessionState::Connected => "connected",
            SessionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Состояние подключения к релею
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Offline,
    Online,
}

/// ========== CONSTANTS ==========

/// ICE серверы по умолчанию
pub static DEFAULT_ICE_SERVERS: Lazy<Vec<ServerConfig>> = Lazy::new(|| {
    vec![
        ServerConfig {
            id: "default-stun".into(),
            r#type: "stun".into(),
            url: "stun:stun.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
        ServerConfig {
            id: "default-stun-1".into(),
            r#type: "stun".into(),
            url: "stun:stun1.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
    ]
});

/// Адрес релея по умолчанию
pub const DEFAULT_RELAY_URL: &str = "ws://localhost:8000/ws";
