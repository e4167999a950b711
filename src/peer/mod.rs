pub mod buffer;
pub mod connection;
pub mod session;
pub mod state;
pub mod transport;
pub mod types;

pub use buffer::CandidateBuffer;
pub use connection::RtcTransportFactory;
pub use session::{AnswerOutcome, CandidateOutcome, PeerSession};
pub use state::{Presence, SessionState, DEFAULT_ICE_SERVERS, DEFAULT_RELAY_URL};
pub use transport::{ConnectionState, PeerTransport, TrackReplacement, TransportEvent, TransportEvents, TransportFactory};
pub use types::{IceCandidate, LocalTrack, MediaKind, ParticipantId, RemoteStream, SdpKind, SessionDescription, ServerConfig};
