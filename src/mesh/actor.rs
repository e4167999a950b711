use crate::error::Result;
use crate::logger::log;
use crate::media::{LocalMediaController, MediaSource};
use crate::mesh::{MeshCoordinator, MeshEvent, MeshReceiver, RelayEvent};
use crate::signaling::decode;
use std::ops::ControlFlow;
use tracing::{debug, warn};

/// Участник звонка: координатор меша и локальное медиа за одной очередью.
///
/// Сообщения релея, события движка и действия пользователя обрабатываются
/// строго по одному, поэтому обработчики никогда не пересекаются.
pub struct Participant {
    mesh: MeshCoordinator,
    media: LocalMediaController,
}

impl Participant {
    pub fn new(mesh: MeshCoordinator, media: LocalMediaController) -> Self {
        Self { mesh, media }
    }

    pub fn mesh(&self) -> &MeshCoordinator {
        &self.mesh
    }

    pub fn media(&self) -> &LocalMediaController {
        &self.media
    }

    /// Захват исходного медиа до входа в меш
    pub async fn start_media(&mut self, source: MediaSource) -> Result<()> {
        self.media.switch_source(source, &mut self.mesh).await
    }

    /// Обрабатывает одно событие. `Break` после локального выхода.
    pub async fn handle(&mut self, event: MeshEvent) -> ControlFlow<()> {
        match event {
            MeshEvent::Relay(RelayEvent::Open) => {
                log(&format!("Relay open for {}", self.mesh.local_id()));
                self.mesh.set_online();
            }
            MeshEvent::Relay(RelayEvent::Message(bytes)) => match decode(&bytes) {
                Ok(msg) => {
                    if let Err(e) = self.mesh.on_message(msg).await {
                        debug!("Message handling: {}", e);
                    }
                }
                Err(e) => warn!("Ignoring relay message: {}", e),
            },
            MeshEvent::Relay(RelayEvent::Error(e)) => warn!("Relay error: {}", e),
            MeshEvent::Relay(RelayEvent::Closed(reason)) => {
                self.mesh.on_relay_lost(&reason).await;
            }
            MeshEvent::Transport {
                peer,
                connection_id,
                event,
            } => {
                if let Err(e) = self.mesh.on_transport_event(peer, &connection_id, event).await {
                    debug!("Transport event handling: {}", e);
                }
            }
            MeshEvent::Connect => {
                if let Err(e) = self.mesh.on_local_connect() {
                    warn!("Cannot join the mesh: {}", e);
                }
            }
            MeshEvent::SwitchSource(source) => {
                if let Err(e) = self.media.switch_source(source, &mut self.mesh).await {
                    warn!("Switching to {} failed: {}", source, e);
                }
            }
            MeshEvent::Leave => {
                log("Leaving the mesh");
                self.mesh.teardown().await;
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    /// Цикл актора до `Leave` или закрытия очереди
    pub async fn run(mut self, mut inbox: MeshReceiver) {
        while let Some(event) = inbox.recv().await {
            if self.handle(event).await.is_break() {
                break;
            }
        }
        debug!("Participant {} stopped", self.mesh.local_id());
    }
}
