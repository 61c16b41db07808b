//! Real-time spatial audio mixing server.
//!
//! A centralized UDP mixer that ingests mono PCM streams tagged with 3-D
//! listener position/orientation from many clients and, on a fixed frame
//! cadence, computes a personalized spatialized stereo mix for every
//! listener. Structured as one mixer thread owning all mutable state and
//! one network thread doing parse-and-handoff, grounded throughout on
//! `bass-rtp`'s socket/thread/stats idiom.

pub mod config;
pub mod domain;
pub mod error;
pub mod kernel;
pub mod net;
pub mod protocol;
pub mod registry;
pub mod ring;
pub mod router;
pub mod scheduler;
pub mod source;
pub mod stats;

pub use config::MixerConfig;
pub use error::{MixerError, MixerResult};
pub use scheduler::Mixer;
