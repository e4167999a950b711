// Участник меша без UI:
//   mesh-peer --relay-url ws://localhost:8000/ws --id alice
// Команды в stdin: connect, camera, screen, quit.
// Переменные окружения: MESH_RELAY_URL, MESH_ID, MESH_ICE_SERVERS
// (JSON список {id, type, url, username?, credential?}), RUST_LOG.

use clap::Parser;
use meshrtc_lib::config::MeshConfig;
use meshrtc_lib::media::{LocalMediaController, MediaSource, SyntheticCapture};
use meshrtc_lib::mesh::{self, MeshCoordinator, MeshEvent, MeshSender, Participant};
use meshrtc_lib::peer::{RtcTransportFactory, DEFAULT_RELAY_URL};
use meshrtc_lib::presentation::LogSink;
use meshrtc_lib::relay::WsRelay;
use meshrtc_lib::logger;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "mesh-peer", about = "Full-mesh WebRTC call participant")]
struct Args {
    /// Signaling relay websocket URL
    #[arg(long, env = "MESH_RELAY_URL", default_value = DEFAULT_RELAY_URL)]
    relay_url: String,

    /// Participant id, random when omitted
    #[arg(long, env = "MESH_ID")]
    id: Option<String>,

    /// ICE servers as a JSON list
    #[arg(long, env = "MESH_ICE_SERVERS")]
    ice_servers: Option<String>,

    /// Join the mesh right after the relay opens
    #[arg(long, default_value_t = false)]
    auto_connect: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logger::init();
    let args = Args::parse();

    let ice_servers = args
        .ice_servers
        .as_deref()
        .map(MeshConfig::parse_ice_servers)
        .transpose()?;
    let config = MeshConfig::new(args.id, args.relay_url, ice_servers)?;
    info!("Participant {} using relay {}", config.participant_id, config.relay_url);

    let factory = Arc::new(RtcTransportFactory::new(config.ice_servers.clone())?);
    let (tx, rx) = mesh::channel();
    let relay = Arc::new(WsRelay::connect(&config.relay_url, &config.participant_id, tx.clone()).await?);
    let sink = Arc::new(LogSink);

    let coordinator = MeshCoordinator::new(
        config.participant_id.clone(),
        factory,
        relay.clone(),
        sink.clone(),
        tx.clone(),
    );
    let media = LocalMediaController::new(Arc::new(SyntheticCapture), sink);
    let mut participant = Participant::new(coordinator, media);
    if let Err(e) = participant.start_media(MediaSource::Camera).await {
        warn!("Starting without local media: {}", e);
    }

    let actor = tokio::spawn(participant.run(rx));
    if args.auto_connect {
        let _ = tx.send(MeshEvent::Connect);
    }

    tokio::select! {
        _ = read_commands(tx.clone()) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl+C received, leaving");
        }
    }
    let _ = tx.send(MeshEvent::Leave);
    actor.await?;
    relay.close();
    Ok(())
}

/// Читает команды со stdin до `quit` или EOF
async fn read_commands(tx: MeshSender) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let event = match line.trim() {
            "connect" => MeshEvent::Connect,
            "camera" => MeshEvent::SwitchSource(MediaSource::Camera),
            "screen" => MeshEvent::SwitchSource(MediaSource::Screen),
            "quit" | "exit" => return,
            "" => continue,
            other => {
                warn!("Unknown command: {} (connect, camera, screen, quit)", other);
                continue;
            }
        };
        if tx.send(event).is_err() {
            return;
        }
    }
}
