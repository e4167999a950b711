// Несколько участников на одном релее в памяти

#![allow(dead_code)]

use meshrtc_lib::media::{LocalMediaController, MediaSource};
use meshrtc_lib::mesh::{self, MeshCoordinator, MeshEvent, MeshReceiver, MeshSender, Participant};
use meshrtc_lib::peer::{ParticipantId, SessionState};
use meshrtc_lib::relay::LocalRelay;
use meshrtc_lib::testing::{FakeEngine, RecordingSink, ScriptedCapture};
use std::collections::BTreeMap;
use std::sync::Arc;

pub struct Node {
    pub participant: Participant,
    pub inbox: MeshReceiver,
    pub tx: MeshSender,
    pub engine: Arc<FakeEngine>,
    pub sink: Arc<RecordingSink>,
    pub capture: Arc<ScriptedCapture>,
}

#[derive(Default)]
pub struct Harness {
    pub relay: LocalRelay,
    pub nodes: BTreeMap<String, Node>,
}

pub fn id(s: &str) -> ParticipantId {
    ParticipantId::from(s)
}

impl Harness {
    pub fn new() -> Self {
        Self::default()
    }

    /// Участник с камерой, подключённый к релею (но ещё не в меше)
    pub async fn join(&mut self, name: &str) {
        self.join_with(name, MediaSource::Camera).await;
    }

    pub async fn join_with(&mut self, name: &str, source: MediaSource) {
        let (tx, inbox) = mesh::channel();
        let engine = FakeEngine::new();
        let sink = RecordingSink::new();
        let capture = ScriptedCapture::new();
        let endpoint = self.relay.attach(id(name), tx.clone());

        let coordinator = MeshCoordinator::new(
            id(name),
            engine.clone(),
            Arc::new(endpoint),
            sink.clone(),
            tx.clone(),
        );
        let media = LocalMediaController::new(capture.clone(), sink.clone());
        let mut participant = Participant::new(coordinator, media);
        participant
            .start_media(source)
            .await
            .expect("capture available");

        self.nodes.insert(
            name.to_owned(),
            Node {
                participant,
                inbox,
                tx,
                engine,
                sink,
                capture,
            },
        );
        self.pump().await;
    }

    /// Нажатие "connect" и обработка всех сообщений до тишины
    pub async fn connect(&mut self, name: &str) {
        self.send(name, MeshEvent::Connect);
        self.pump().await;
    }

    pub fn send(&self, name: &str, event: MeshEvent) {
        self.node(name).tx.send(event).expect("participant inbox open");
    }

    /// Обрабатывает очереди всех участников, пока они не опустеют
    pub async fn pump(&mut self) {
        loop {
            let mut progressed = false;
            for node in self.nodes.values_mut() {
                while let Ok(event) = node.inbox.try_recv() {
                    progressed = true;
                    let _ = node.participant.handle(event).await;
                }
            }
            if !progressed {
                break;
            }
        }
    }

    pub fn node(&self, name: &str) -> &Node {
        self.nodes.get(name).expect("known participant")
    }

    pub fn mesh(&self, name: &str) -> &MeshCoordinator {
        self.node(name).participant.mesh()
    }

    pub fn state(&self, name: &str, peer: &str) -> Option<SessionState> {
        self.mesh(name).session_state(&id(peer))
    }

    /// Сессий во всём меше
    pub fn total_sessions(&self) -> usize {
        self.nodes
            .values()
            .map(|n| n.participant.mesh().session_count())
            .sum()
    }

    pub fn all_connected(&self) -> bool {
        self.nodes.values().all(|n| {
            let mesh = n.participant.mesh();
            mesh.peers()
                .iter()
                .all(|p| mesh.session_state(p) == Some(SessionState::Connected))
        })
    }
}
