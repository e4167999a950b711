use crate::error::{Error, Result};
use crate::peer::types::ParticipantId;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Команда сигнального сообщения
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    Connect,
    Offer,
    Answer,
    #[serde(rename = "icecandidate")]
    IceCandidate,
    Disconnect,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Command::Connect => "connect",
            Command::Offer => "offer",
            Command::Answer => "answer",
            Command::IceCandidate => "icecandidate",
            Command::Disconnect => "disconnect",
        };
        f.write_str(s)
    }
}

/// Сообщение релея. Неизменяемо после создания.
/// Пустой адресат хранится как `None` (широковещательное).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SignalingMessage {
    from: ParticipantId,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "empty_as_none"
    )]
    to: Option<ParticipantId>,
    command: Command,
    #[serde(
        default,
        skip_serializing_if = "String::is_empty",
        deserialize_with = "null_as_empty"
    )]
    data: String,
}

impl SignalingMessage {
    pub fn new(
        from: ParticipantId,
        to: Option<ParticipantId>,
        command: Command,
        data: impl Into<String>,
    ) -> Self {
        Self {
            from,
            to: to.filter(|id| !id.is_empty()),
            command,
            data: data.into(),
        }
    }

    /// Широковещательный `connect` без данных
    pub fn connect(from: ParticipantId) -> Self {
        Self::new(from, None, Command::Connect, String::new())
    }

    /// `disconnect`, адресный или широковещательный
    pub fn disconnect(from: ParticipantId, to: Option<ParticipantId>) -> Self {
        Self::new(from, to, Command::Disconnect, String::new())
    }

    pub fn from(&self) -> &ParticipantId {
        &self.from
    }

    pub fn to(&self) -> Option<&ParticipantId> {
        self.to.as_ref()
    }

    pub fn command(&self) -> Command {
        self.command
    }

    pub fn data(&self) -> &str {
        &self.data
    }

    pub fn is_broadcast(&self) -> bool {
        self.to.is_none()
    }
}

// Релей на Go всегда шлёт `"to": ""`, считаем это отсутствием адресата
fn empty_as_none<'de, D>(d: D) -> std::result::Result<Option<ParticipantId>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(d)?;
    Ok(raw.filter(|s| !s.is_empty()).map(ParticipantId::from))
}

fn null_as_empty<'de, D>(d: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(d)?.unwrap_or_default())
}

/// Кодирует сообщение в JSON байты
pub fn encode(msg: &SignalingMessage) -> Result<Vec<u8>> {
    serde_json::to_vec(msg).map_err(|e| Error::MalformedMessage(e.to_string()))
}

/// Кодирует сообщение в текст для websocket кадра
pub fn encode_text(msg: &SignalingMessage) -> Result<String> {
    serde_json::to_string(msg).map_err(|e| Error::MalformedMessage(e.to_string()))
}

/// Декодирует сообщение. Отсутствие `from`/`command` или неизвестная
/// команда дают `MalformedMessage`, форма `data` не проверяется.
pub fn decode(bytes: &[u8]) -> Result<SignalingMessage> {
    let msg: SignalingMessage =
        serde_json::from_slice(bytes).map_err(|e| Error::MalformedMessage(e.to_string()))?;
    if msg.from.is_empty() {
        return Err(Error::MalformedMessage("empty `from`".into()));
    }
    Ok(msg)
}
