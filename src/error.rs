//! Crate-level error type.
//!
//! Most failure modes (malformed packets, overruns, starvation, transient
//! socket errors) are handled in place with a counter bump and never reach
//! a `Result` — they are not represented here. `MixerError` only covers the
//! handful of paths that must propagate out of `main` and end the process.

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum MixerError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to bind mixer socket on {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("mixer shut down: {0}")]
    Shutdown(String),
}

pub type MixerResult<T> = Result<T, MixerError>;
