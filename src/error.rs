//! Error types shared across the engine.
//!
//! Ambiguous queries are not errors: they come back as
//! [`ResolvedQuery`](crate::search::ResolvedQuery) variants. Everything here is
//! either surfaced to the caller (`ResolveError`, `QueueError`) or absorbed by
//! the guild player after logging (`DecodeError`, `CacheError`, `VoiceError`).

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failures while turning free text into something playable.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no match for `{0}`")]
    NotFound(String),

    #[error("remote search failed: {0}")]
    Remote(#[source] anyhow::Error),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue is full (max {max} tracks)")]
    Full { max: usize },
}

/// Failures while materializing a track into an audio resource.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("local file is missing: {}", .0.display())]
    MissingFile(PathBuf),

    #[error("remote listing `{0}` has no url")]
    MissingUrl(String),

    #[error("failed to spawn decoder `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("decoder produced no audio")]
    EmptyStream,

    #[error("decoder produced no audio within {0:?}")]
    FirstByteTimeout(Duration),

    #[error("decoder exited with {status}: {stderr}")]
    ProcessFailed { status: String, stderr: String },

    #[error("decoder stream error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage io error: {0}")]
    Io(#[from] io::Error),

    #[error("storage json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache io error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("source stream failed: {0}")]
    Stream(io::Error),

    #[error("cache write cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum VoiceError {
    #[error("failed to join voice channel: {0}")]
    Join(String),

    #[error("voice driver error: {0}")]
    Driver(String),

    #[error("voice connection already destroyed")]
    Destroyed,
}
