use crate::error::Error;
use crate::logger::log;
use crate::media::MediaSource;
use crate::peer::state::Presence;
use crate::peer::types::{LocalTrack, ParticipantId, RemoteStream};
use tracing::warn;

/// Получатель событий для отрисовки
pub trait PresentationSink: Send + Sync {
    /// Новый удалённый поток пира (по одному на stream id)
    fn stream_added(&self, peer: &ParticipantId, stream: &RemoteStream);
    /// Медиа пира нужно убрать
    fn peer_removed(&self, peer: &ParticipantId);
    /// Локальный источник сменился
    fn local_media(&self, source: MediaSource, tracks: &[LocalTrack]);
    fn negotiation_failed(&self, peer: &ParticipantId, error: &Error);
    fn presence_changed(&self, presence: Presence);
}

/// Headless UI: всё в лог
#[derive(Debug, Default)]
pub struct LogSink;

impl PresentationSink for LogSink {
    fn stream_added(&self, peer: &ParticipantId, stream: &RemoteStream) {
        log(&format!(
            "Rendering stream {} from {} (track {}, {:?})",
            stream.stream_id, peer, stream.track_id, stream.kind
        ));
    }

    fn peer_removed(&self, peer: &ParticipantId) {
        log(&format!("Removing media of {peer}"));
    }

    fn local_media(&self, source: MediaSource, tracks: &[LocalTrack]) {
        log(&format!("Local media is now {source}: {tracks:?}"));
    }

    fn negotiation_failed(&self, peer: &ParticipantId, error: &Error) {
        warn!("Negotiation with {} failed: {}", peer, error);
    }

    fn presence_changed(&self, presence: Presence) {
        log(&format!("Presence: {presence:?}"));
    }
}
