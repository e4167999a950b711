use crate::error::{Error, Result};
use crate::mesh::{MeshEvent, MeshSender, RelayEvent};
use crate::peer::types::ParticipantId;
use crate::relay::SignalingRelay;
use crate::signaling::{encode, Command, SignalingMessage};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

#[derive(Default)]
struct Hub {
    // открытые соединения
    endpoints: HashMap<ParticipantId, MeshSender>,
    // участники, приславшие connect
    registered: HashSet<ParticipantId>,
}

/// Релей в памяти процесса с поведением сервера на websocket:
/// участник регистрируется своим `connect`, который рассылается остальным
/// зарегистрированным; offer/answer/icecandidate идут адресату; при
/// отключении остальным уходит `disconnect`. Сам `disconnect` не пересылается.
#[derive(Clone, Default)]
pub struct LocalRelay {
    hub: Arc<Mutex<Hub>>,
}

impl LocalRelay {
    pub fn new() -> Self {
        Self::default()
    }

    fn hub(&self) -> MutexGuard<'_, Hub> {
        self.hub.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Открывает соединение участника; в `inbox` сразу приходит `Open`
    pub fn attach(&self, id: ParticipantId, inbox: MeshSender) -> LocalRelayEndpoint {
        let _ = inbox.send(MeshEvent::Relay(RelayEvent::Open));
        self.hub().endpoints.insert(id.clone(), inbox);
        info!("connecting: {}", id);
        LocalRelayEndpoint {
            id,
            relay: self.clone(),
        }
    }

    /// Закрывает соединение участника и рассылает его `disconnect`
    pub fn detach(&self, id: &ParticipantId) {
        let mut hub = self.hub();
        let Some(inbox) = hub.endpoints.remove(id) else {
            return;
        };
        hub.registered.remove(id);
        let _ = inbox.send(MeshEvent::Relay(RelayEvent::Closed("detached".into())));
        info!("disconnecting: {}", id);

        let others: Vec<ParticipantId> = hub.registered.iter().cloned().collect();
        for to in others {
            let msg = SignalingMessage::disconnect(id.clone(), Some(to.clone()));
            Self::deliver(&hub, &to, &msg);
        }
    }

    /// Обрыв релея: все соединения закрываются без рассылок
    pub fn shutdown(&self, reason: &str) {
        let mut hub = self.hub();
        for (_, inbox) in hub.endpoints.drain() {
            let _ = inbox.send(MeshEvent::Relay(RelayEvent::Closed(reason.to_owned())));
        }
        hub.registered.clear();
    }

    /// Зарегистрированные участники
    pub fn members(&self) -> Vec<ParticipantId> {
        let mut members: Vec<ParticipantId> = self.hub().registered.iter().cloned().collect();
        members.sort();
        members
    }

    fn route(&self, sender: &ParticipantId, msg: &SignalingMessage) -> Result<()> {
        let mut hub = self.hub();
        if !hub.endpoints.contains_key(sender) {
            return Err(Error::RelayUnavailable(format!("{sender} is not attached")));
        }

        match msg.command() {
            Command::Offer | Command::Answer | Command::IceCandidate => {
                debug!("{} {} -> {:?}", msg.command(), msg.from(), msg.to());
                match msg.to() {
                    Some(to) => Self::deliver(&hub, to, msg),
                    None => warn!("{} from {} without a recipient", msg.command(), msg.from()),
                }
            }
            Command::Connect => {
                hub.registered.insert(sender.clone());
                let others: Vec<ParticipantId> = hub
                    .registered
                    .iter()
                    .filter(|id| *id != msg.from())
                    .cloned()
                    .collect();
                for to in others {
                    let connect = SignalingMessage::new(
                        msg.from().clone(),
                        Some(to.clone()),
                        Command::Connect,
                        String::new(),
                    );
                    Self::deliver(&hub, &to, &connect);
                }
            }
            Command::Disconnect => {}
        }
        Ok(())
    }

    fn deliver(hub: &Hub, to: &ParticipantId, msg: &SignalingMessage) {
        let Some(inbox) = hub.endpoints.get(to) else {
            warn!("No connection for {}", to);
            return;
        };
        match encode(msg) {
            Ok(bytes) => {
                let _ = inbox.send(MeshEvent::Relay(RelayEvent::Message(bytes)));
            }
            Err(e) => warn!("Cannot encode {}: {}", msg.command(), e),
        }
    }
}

/// Соединение одного участника с `LocalRelay`
#[derive(Clone)]
pub struct LocalRelayEndpoint {
    id: ParticipantId,
    relay: LocalRelay,
}

impl LocalRelayEndpoint {
    pub fn id(&self) -> &ParticipantId {
        &self.id
    }
}

impl SignalingRelay for LocalRelayEndpoint {
    fn send(&self, msg: &SignalingMessage) -> Result<()> {
        self.relay.route(&self.id, msg)
    }
}
