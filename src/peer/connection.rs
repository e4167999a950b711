use crate::error::{Error, Result};
use crate::logger::{dump_candidate, log};
use crate::peer::transport::{
    ConnectionState, PeerTransport, TrackReplacement, TransportEvent, TransportEvents, TransportFactory,
};
use crate::peer::types::{
    IceCandidate, LocalTrack, MediaKind, ParticipantId, RemoteStream, SdpKind, SessionDescription,
    ServerConfig,
};
use crate::utils::add_ice_url_scheme;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_remote::TrackRemote;

/// Фабрика соединений webrtc-rs с общим API объектом
pub struct RtcTransportFactory {
    api: API,
    ice_servers: Vec<ServerConfig>,
}

impl RtcTransportFactory {
    pub fn new(ice_servers: Vec<ServerConfig>) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self { api, ice_servers })
    }
}

#[async_trait]
impl TransportFactory for RtcTransportFactory {
    async fn create(&self, peer: &ParticipantId, events: TransportEvents) -> Result<Box<dyn PeerTransport>> {
        log(&format!(
            "Creating peer connection: peer_id={}, connection_id={}",
            peer,
            events.connection_id()
        ));
        let pc = Arc::new(self.api.new_peer_connection(rtc_config(&self.ice_servers)).await?);
        install_handlers(&pc, events);

        Ok(Box::new(RtcTransport {
            peer: peer.clone(),
            pc,
            senders: HashMap::new(),
        }))
    }
}

/// Создает конфигурацию для peer connection
fn rtc_config(servers: &[ServerConfig]) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: get_user_ice_servers(servers),
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

/// Перевод конфигурации серверов в формат webrtc-rs
pub fn get_user_ice_servers(servers: &[ServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
        })
        .collect()
}

/// Обработчики событий движка пишут в очередь участника
fn install_handlers(pc: &Arc<RTCPeerConnection>, events: TransportEvents) {
    let ice_events = events.clone();
    pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
        let events = ice_events.clone();
        Box::pin(async move {
            // cand == None означает конец сбора
            let Some(c) = cand else {
                log("ICE candidate gathering completed (null candidate received)");
                return;
            };
            match c.to_json() {
                Ok(init) => {
                    let candidate = IceCandidate {
                        candidate: init.candidate,
                        sdp_mid: init.sdp_mid,
                        sdp_mline_index: init.sdp_mline_index,
                        username_fragment: init.username_fragment,
                    };
                    dump_candidate("LOCAL", &candidate);
                    events.emit(TransportEvent::IceCandidate(candidate));
                }
                Err(e) => warn!("Failed to serialize local candidate: {}", e),
            }
        })
    }));

    let track_events = events.clone();
    pc.on_track(Box::new(
        move |track: Arc<TrackRemote>, _receiver: Arc<RTCRtpReceiver>, _transceiver: Arc<RTCRtpTransceiver>| {
            let stream = RemoteStream {
                stream_id: track.stream_id(),
                track_id: track.id(),
                kind: MediaKind::from_codec_type(track.kind()),
            };
            debug!("Remote track: {:?}", stream);
            track_events.emit(TransportEvent::Track(stream));
            Box::pin(async {})
        },
    ));

    pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
        log(&format!(
            "Peer connection state for {} changed to: {:?}",
            events.peer(),
            st
        ));
        let state = match st {
            RTCPeerConnectionState::New => Some(ConnectionState::New),
            RTCPeerConnectionState::Connecting => Some(ConnectionState::Connecting),
            RTCPeerConnectionState::Connected => Some(ConnectionState::Connected),
            RTCPeerConnectionState::Disconnected => Some(ConnectionState::Disconnected),
            RTCPeerConnectionState::Failed => Some(ConnectionState::Failed),
            RTCPeerConnectionState::Closed => Some(ConnectionState::Closed),
            _ => None,
        };
        if let Some(state) = state {
            events.emit(TransportEvent::ConnectionState(state));
        }
        Box::pin(async {})
    }));
}

/// Соединение webrtc-rs с одним пиром
pub struct RtcTransport {
    peer: ParticipantId,
    pc: Arc<RTCPeerConnection>,
    senders: HashMap<MediaKind, Arc<RTCRtpSender>>,
}

impl RtcTransport {
    fn watch_rtcp(sender: &Arc<RTCRtpSender>) {
        // RTCP нужно вычитывать, иначе интерсепторы не работают
        let rtcp_sender = Arc::clone(sender);
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while rtcp_sender.read(&mut buf).await.is_ok() {}
        });
    }

    async fn add_sender(&mut self, track: &LocalTrack) -> Result<()> {
        let sender = self.pc.add_track(track.handle()).await?;
        Self::watch_rtcp(&sender);
        self.senders.insert(track.kind(), sender);
        Ok(())
    }

    /// По sendrecv трансиверу на каждый вид до первого описания, чтобы
    /// трек любого вида потом менялся на месте
    async fn ensure_senders(&mut self) -> Result<()> {
        for kind in [MediaKind::Audio, MediaKind::Video] {
            if self.senders.contains_key(&kind) {
                continue;
            }
            let transceiver = self.pc.add_transceiver_from_kind(kind.codec_type(), None).await?;
            let sender = transceiver.sender().await;
            Self::watch_rtcp(&sender);
            debug!("Reserved {:?} sender for {}", kind, self.peer);
            self.senders.insert(kind, sender);
        }
        Ok(())
    }
}

fn to_rtc(desc: &SessionDescription) -> Result<RTCSessionDescription> {
    // форма JSON у webrtc-rs совпадает с браузерной
    serde_json::from_str(&desc.to_json()?)
        .map_err(|e| Error::Transport(format!("invalid session description: {e}")))
}

fn from_rtc(desc: &RTCSessionDescription) -> Result<SessionDescription> {
    let json = serde_json::to_string(desc)
        .map_err(|e| Error::Transport(format!("cannot serialize description: {e}")))?;
    SessionDescription::from_json(&json)
}

#[async_trait]
impl PeerTransport for RtcTransport {
    async fn create_offer(&mut self) -> Result<SessionDescription> {
        self.ensure_senders().await?;
        let offer = self.pc.create_offer(None).await?;
        from_rtc(&offer)
    }

    async fn create_answer(&mut self) -> Result<SessionDescription> {
        let answer = self.pc.create_answer(None).await?;
        from_rtc(&answer)
    }

    async fn set_local_description(&mut self, desc: SessionDescription) -> Result<()> {
        self.pc.set_local_description(to_rtc(&desc)?).await?;
        Ok(())
    }

    async fn set_remote_description(&mut self, desc: SessionDescription) -> Result<()> {
        if desc.kind == SdpKind::Offer {
            // свои трансиверы должны сопоставиться с m-line из offer
            self.ensure_senders().await?;
        }
        self.pc.set_remote_description(to_rtc(&desc)?).await?;
        Ok(())
    }

    async fn add_ice_candidate(&mut self, candidate: IceCandidate) -> Result<()> {
        dump_candidate("REMOTE", &candidate);
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };
        self.pc.add_ice_candidate(init).await?;
        Ok(())
    }

    async fn add_track(&mut self, track: LocalTrack) -> Result<()> {
        match self.senders.get(&track.kind()) {
            Some(sender) => {
                sender.replace_track(Some(track.handle())).await?;
                Ok(())
            }
            None => self.add_sender(&track).await,
        }
    }

    async fn replace_track(&mut self, kind: MediaKind, track: LocalTrack) -> Result<TrackReplacement> {
        match self.senders.get(&kind) {
            Some(sender) => {
                sender.replace_track(Some(track.handle())).await?;
                Ok(TrackReplacement::InPlace)
            }
            None => {
                // нового sender без offer/answer пир не увидит
                self.add_sender(&track).await?;
                Ok(TrackReplacement::NeedsRenegotiation)
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        log(&format!("Closing peer connection to {}", self.peer));
        self.senders.clear();
        self.pc.close().await?;
        Ok(())
    }
}
