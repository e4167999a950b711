use crate::error::{Error, Result};
use crate::logger::log;
use crate::mesh::MeshCoordinator;
use crate::peer::types::{LocalTrack, MediaKind};
use crate::presentation::PresentationSink;
use crate::utils::random_id;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::warn;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// Источник локального медиа
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaSource {
    Camera,
    Screen,
}

impl fmt::Display for MediaSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaSource::Camera => f.write_str("camera"),
            MediaSource::Screen => f.write_str("screen"),
        }
    }
}

/// Захват устройств (камера, экран)
#[async_trait]
pub trait CaptureProvider: Send + Sync {
    async fn acquire(&self, source: MediaSource) -> Result<Vec<LocalTrack>>;
}

/// Захват без устройств: треки с пустыми сэмплами для headless режима
#[derive(Debug, Default)]
pub struct SyntheticCapture;

impl SyntheticCapture {
    fn track(kind: MediaKind, mime: &str, id: String, stream_id: &str) -> LocalTrack {
        let track = TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: mime.to_owned(),
                ..Default::default()
            },
            id,
            stream_id.to_owned(),
        );
        LocalTrack::new(kind, Arc::new(track))
    }
}

#[async_trait]
impl CaptureProvider for SyntheticCapture {
    async fn acquire(&self, source: MediaSource) -> Result<Vec<LocalTrack>> {
        let stream_id = format!("{source}-{}", random_id());
        let video = Self::track(
            MediaKind::Video,
            MIME_TYPE_VP8,
            format!("{source}-video-{}", random_id()),
            &stream_id,
        );
        Ok(match source {
            MediaSource::Camera => vec![
                Self::track(
                    MediaKind::Audio,
                    MIME_TYPE_OPUS,
                    format!("mic-{}", random_id()),
                    &stream_id,
                ),
                video,
            ],
            MediaSource::Screen => vec![video],
        })
    }
}

/// Выбор локального источника и раздача его треков мешу
pub struct LocalMediaController {
    capture: Arc<dyn CaptureProvider>,
    sink: Arc<dyn PresentationSink>,
    active: Option<MediaSource>,
}

impl LocalMediaController {
    pub fn new(capture: Arc<dyn CaptureProvider>, sink: Arc<dyn PresentationSink>) -> Self {
        Self {
            capture,
            sink,
            active: None,
        }
    }

    pub fn active_source(&self) -> Option<MediaSource> {
        self.active
    }

    /// Захватывает новый источник и раздаёт треки всем сессиям.
    /// При ошибке захвата остаётся прежний источник, сессии не трогаются.
    pub async fn switch_source(&mut self, source: MediaSource, mesh: &mut MeshCoordinator) -> Result<()> {
        log(&format!("Switching local media to {source}"));
        let tracks = match self.capture.acquire(source).await {
            Ok(tracks) if !tracks.is_empty() => tracks,
            Ok(_) => {
                return Err(Error::MediaAcquisitionFailed(format!(
                    "{source} produced no tracks"
                )))
            }
            Err(Error::MediaAcquisitionFailed(reason)) => {
                warn!("Keeping previous media, {source} unavailable: {}", reason);
                return Err(Error::MediaAcquisitionFailed(reason));
            }
            Err(e) => {
                warn!("Keeping previous media, {source} unavailable: {}", e);
                return Err(Error::MediaAcquisitionFailed(e.to_string()));
            }
        };

        self.sink.local_media(source, &tracks);
        self.active = Some(source);
        mesh.on_local_media_replaced(tracks).await;
        Ok(())
    }
}
