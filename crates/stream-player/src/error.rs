use thiserror::Error;

/// Errors surfaced by the playback controller.
#[derive(Debug, Error)]
pub enum PlayerError {
    /// Track index outside `0..count`.
    #[error("track index {index} out of range (track count {count})")]
    OutOfRange { index: usize, count: usize },
    /// Container or codec headers could not be parsed.
    #[error("decoder init failed: {0}")]
    DecodeInit(String),
    /// `play` called before `init` (or after `exit`).
    #[error("player is not initialized")]
    NotInitialized,
    #[error(transparent)]
    Output(#[from] OutputError),
}

/// Rejected cursor seek. The cursor position is left untouched.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("seek target {target} outside 0..={len}")]
pub struct SeekError {
    pub target: i128,
    pub len: u64,
}

/// Failures reported by a [`crate::channel::WaveOutput`] backend.
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("output device: {0}")]
    Device(String),
    #[error("unsupported output format: {0}")]
    Format(String),
    #[error("output stream: {0}")]
    Stream(String),
    /// A previous submission has not been taken by the hardware yet.
    #[error("wave buffer still queued")]
    Busy,
    #[error("output channel not configured")]
    NotConfigured,
}
