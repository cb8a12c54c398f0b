use stream_player_types::{PlaybackEndReason, PlaybackPosition, PlaybackState, PlayerStatus};

use crate::config::ChannelFormat;
use crate::decode::SourceInfo;

/// Track-level status maintained by the controller alongside the session.
#[derive(Debug, Default)]
pub struct PlayerStatusState {
    /// Track named by the last `play` with a valid index, even if it failed to open.
    pub selected_track: Option<usize>,
    /// Metadata of the active session's source.
    pub source: Option<SourceInfo>,
    /// Whether a session is currently bound.
    pub playing: bool,
    /// Terminal reason from the last session.
    pub end_reason: Option<PlaybackEndReason>,
}

/// Engine-side values folded into a snapshot.
#[derive(Clone, Copy, Debug)]
pub struct SnapshotContext {
    pub initialized: bool,
    pub track_count: usize,
    pub format: ChannelFormat,
    pub frames_submitted: u64,
    pub underruns: Option<(u64, u64)>,
}

impl PlayerStatusState {
    /// Record that `track` started playing from `source`.
    pub fn begin_session(&mut self, track: usize, source: SourceInfo) {
        self.selected_track = Some(track);
        self.source = Some(source);
        self.playing = true;
        self.end_reason = None;
    }

    /// Clear session fields and remember why it ended.
    pub fn end_session(&mut self, reason: PlaybackEndReason) {
        self.source = None;
        self.playing = false;
        self.end_reason = Some(reason);
    }

    pub fn position(&self, ctx: &SnapshotContext) -> Option<PlaybackPosition> {
        if !self.playing {
            return None;
        }
        let track = self.selected_track?;
        let rate = ctx.format.sample_rate as u64;
        let elapsed_ms = if rate == 0 {
            0
        } else {
            ctx.frames_submitted.saturating_mul(1000) / rate
        };
        Some(PlaybackPosition {
            track,
            frames: ctx.frames_submitted,
            elapsed_ms,
        })
    }

    /// Return a snapshot suitable for UI and JSON output.
    pub fn snapshot(&self, ctx: &SnapshotContext) -> PlayerStatus {
        let source = self.source.as_ref();
        PlayerStatus {
            initialized: ctx.initialized,
            state: if self.playing {
                PlaybackState::Playing
            } else {
                PlaybackState::Stopped
            },
            track_count: ctx.track_count,
            selected_track: self.selected_track,
            position: self.position(ctx),
            duration_ms: source.and_then(|s| s.duration_ms),
            source_codec: source.and_then(|s| s.codec.clone()),
            source_sample_rate: source.and_then(|s| s.sample_rate),
            source_channels: source.and_then(|s| s.channels),
            output_sample_rate: ctx.format.sample_rate,
            output_channels: ctx.format.channels,
            buffer_frames: ctx.format.buffer_frames,
            underrun_frames: ctx.underruns.map(|(frames, _)| frames),
            underrun_events: ctx.underruns.map(|(_, events)| events),
            end_reason: self.end_reason,
        }
    }
}
