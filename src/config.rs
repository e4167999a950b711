// Конфигурация приложения
// Логирование можно отключить только в режиме разработки

use crate::error::{Error, Result};
use crate::peer::state::DEFAULT_ICE_SERVERS;
use crate::peer::types::{ParticipantId, ServerConfig};

#[cfg(debug_assertions)]
pub const LOGGING_ENABLED: bool = true; // В режиме отладки логирование включено

#[cfg(not(debug_assertions))]
pub const LOGGING_ENABLED: bool = false; // В продакшене логирование отключено (кроме RUST_LOG)

// Дополнительные настройки для режима разработки
#[cfg(debug_assertions)]
pub mod dev {
    // Для полного отключения логирования в режиме разработки
    // измените эту константу на false
    pub const ENABLE_LOGGING: bool = true;
}

/// Настройки одного участника меша
#[derive(Debug, Clone)]
pub struct MeshConfig {
    pub participant_id: ParticipantId,
    pub relay_url: String,
    pub ice_servers: Vec<ServerConfig>,
}

impl MeshConfig {
    /// Собирает конфигурацию; без id генерируется случайный
    pub fn new(participant_id: Option<String>, relay_url: String, ice_servers: Option<Vec<ServerConfig>>) -> Result<Self> {
        let participant_id = match participant_id {
            Some(id) if !id.trim().is_empty() => ParticipantId::new(id.trim()),
            _ => ParticipantId::random(),
        };
        let config = Self {
            participant_id,
            relay_url,
            ice_servers: ice_servers.unwrap_or_else(|| DEFAULT_ICE_SERVERS.clone()),
        };
        config.validate()?;
        Ok(config)
    }

    /// Разбор списка ICE серверов из JSON (переменная MESH_ICE_SERVERS)
    pub fn parse_ice_servers(json: &str) -> Result<Vec<ServerConfig>> {
        serde_json::from_str(json)
            .map_err(|e| Error::InvalidConfig(format!("invalid ICE server list: {e}")))
    }

    pub fn validate(&self) -> Result<()> {
        if !self.relay_url.starts_with("ws://") && !self.relay_url.starts_with("wss://") {
            return Err(Error::InvalidConfig(format!(
                "relay url must be ws:// or wss://, got {}",
                self.relay_url
            )));
        }

        // Валидация серверов
        for server in &self.ice_servers {
            if server.url.is_empty() {
                return Err(Error::InvalidConfig("Server URL cannot be empty".into()));
            }

            if server.r#type == "turn" && (server.username.is_none() || server.credential.is_none()) {
                return Err(Error::InvalidConfig(format!(
                    "TURN server {} requires username and credential",
                    server.id
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::state::DEFAULT_RELAY_URL;

    #[test]
    fn test_defaults() {
        let config = MeshConfig::new(None, DEFAULT_RELAY_URL.into(), None).unwrap();
        assert_eq!(config.ice_servers.len(), 2);
        assert_eq!(config.participant_id.as_str().len(), 16);
    }

    #[test]
    fn test_explicit_id_is_trimmed() {
        let config = MeshConfig::new(Some(" alice ".into()), DEFAULT_RELAY_URL.into(), None).unwrap();
        assert_eq!(config.participant_id, ParticipantId::from("alice"));
    }

    #[test]
    fn test_turn_requires_credentials() {
        let servers = MeshConfig::parse_ice_servers(
            r#"[{"id":"t","type":"turn","url":"turn.example.org:3478"}]"#,
        )
        .unwrap();
        let err = MeshConfig::new(None, DEFAULT_RELAY_URL.into(), Some(servers)).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_rejects_non_websocket_relay() {
        assert!(MeshConfig::new(None, "http://localhost:8000".into(), None).is_err());
        assert!(MeshConfig::parse_ice_servers("{}").is_err());
    }
}
