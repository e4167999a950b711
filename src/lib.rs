pub mod config;
pub mod error;
pub mod logger;
pub mod media;
pub mod mesh;
pub mod peer;
pub mod presentation;
pub mod relay;
pub mod signaling;
pub mod utils;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use error::{Error, Result};
pub use media::{CaptureProvider, LocalMediaController, MediaSource, SyntheticCapture};
pub use mesh::{MeshCoordinator, MeshEvent, Participant};
pub use peer::types::ParticipantId;
