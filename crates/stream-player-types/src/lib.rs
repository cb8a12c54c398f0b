use serde::{Deserialize, Serialize};

/// Reason why the last playback session ended.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackEndReason {
    /// Decoder ran out of samples (end of track or unrecoverable decode error).
    Eof,
    /// The output channel rejected a resubmission.
    Error,
    /// Playback was explicitly stopped by a command or replaced by another track.
    Stopped,
}

/// Coarse playback status of the controller.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    #[default]
    Stopped,
    Playing,
}

/// Decoded-sample based position of the current session.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlaybackPosition {
    /// Index of the track the position refers to.
    pub track: usize,
    /// Frames handed to the output channel since the session started.
    pub frames: u64,
    /// `frames` converted to milliseconds at the output rate.
    pub elapsed_ms: u64,
}

/// Point-in-time status of the playback controller.
///
/// Track names and nominal lengths belong to the caller; this payload only carries
/// indices and what the engine itself knows.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerStatus {
    /// `true` between `init()` and `exit()`.
    pub initialized: bool,
    /// Current playback state.
    pub state: PlaybackState,
    /// Number of tracks in the registry.
    pub track_count: usize,
    /// Track named by the last `play` with a valid index, even if it failed to open.
    pub selected_track: Option<usize>,
    /// Position of the active session.
    pub position: Option<PlaybackPosition>,
    /// Total media duration in milliseconds, when the container reports it.
    pub duration_ms: Option<u64>,
    /// Source codec (for example `VORBIS`).
    pub source_codec: Option<String>,
    /// Source sample rate (Hz).
    pub source_sample_rate: Option<u32>,
    /// Source channel count.
    pub source_channels: Option<u16>,
    /// Output sample rate (Hz).
    pub output_sample_rate: u32,
    /// Output channel count.
    pub output_channels: u16,
    /// Frames per submission unit.
    pub buffer_frames: usize,
    /// Frames of silence emitted by the backend because no buffer was ready.
    pub underrun_frames: Option<u64>,
    /// Number of underrun incidents observed by the backend.
    pub underrun_events: Option<u64>,
    /// Why the last session ended, if it has.
    pub end_reason: Option<PlaybackEndReason>,
}

impl PlayerStatus {
    pub fn is_playing(&self) -> bool {
        self.state == PlaybackState::Playing
    }
}
