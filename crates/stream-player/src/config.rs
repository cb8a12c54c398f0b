/// Output format the channel is configured with. Always interleaved signed 16-bit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelFormat {
    pub sample_rate: u32,
    pub channels: u16,
    /// Frames per submission unit.
    pub buffer_frames: usize,
}

impl ChannelFormat {
    /// Samples (not frames) in one submission unit.
    pub fn buffer_samples(&self) -> usize {
        self.buffer_frames.saturating_mul(self.channels as usize)
    }
}

/// Playback tuning parameters shared by decoder, driver and backend.
#[derive(Clone, Debug)]
pub struct PlayerConfig {
    /// Output sample rate in Hz. Sources are never resampled.
    pub sample_rate: u32,
    /// Frames per hardware submission (size of the staging buffer).
    pub buffer_frames: usize,
    /// Consecutive corrupt packets tolerated before the decoder reports end of stream.
    pub max_decode_errors: usize,
    /// Capacity of the drained-notification queue.
    pub notify_capacity: usize,
}

/// Output is always stereo.
pub const OUTPUT_CHANNELS: u16 = 2;

impl Default for PlayerConfig {
    /// 1024 frames at 44.1 kHz is roughly 23 ms per submission.
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            buffer_frames: 1024,
            max_decode_errors: 8,
            notify_capacity: 64,
        }
    }
}

impl PlayerConfig {
    /// Channel format derived from this config (stereo, 16-bit).
    pub fn channel_format(&self) -> ChannelFormat {
        ChannelFormat {
            sample_rate: self.sample_rate,
            channels: OUTPUT_CHANNELS,
            buffer_frames: self.buffer_frames.max(1),
        }
    }
}
