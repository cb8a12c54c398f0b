//! Output channel driver.
//!
//! Owns the PCM staging buffer and the single wave-buffer descriptor, and runs the
//! refill state machine:
//!
//! ```text
//!   Idle --prime--> Submitted --drained + samples--> Submitted
//!                       |
//!                       +--drained + 0 samples--> Idle (session ended)
//! ```
//!
//! The hardware side is abstracted by [`WaveOutput`]. A backend reports that it has taken
//! a submission by calling [`WaveCompletion::complete`], which flips the descriptor to
//! `Done` and posts a [`ChannelEvent::Drained`] message. The controller applies that
//! message to the driver under its lock.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use crossbeam_channel::Sender;

use crate::config::ChannelFormat;
use crate::decode::StreamDecoder;
use crate::error::OutputError;

/// Status of the wave-buffer descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum WaveStatus {
    Free = 0,
    Submitted = 1,
    Done = 2,
}

impl WaveStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => WaveStatus::Submitted,
            2 => WaveStatus::Done,
            _ => WaveStatus::Free,
        }
    }
}

/// Messages delivered from the hardware side to the controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The submission made in session `generation` was taken by the hardware.
    Drained { generation: u64 },
    /// Stop the notification dispatcher.
    Shutdown,
}

/// Handle given to the backend with each submission.
///
/// Completing is lock-free and never blocks: an atomic store plus a `try_send` on a
/// bounded channel. Dropping a completion without completing it (e.g. on reset) is fine.
#[derive(Debug)]
pub struct WaveCompletion {
    status: Arc<AtomicU8>,
    generation: u64,
    notify: Sender<ChannelEvent>,
}

impl WaveCompletion {
    /// Completion bound to a status cell no descriptor watches.
    #[cfg(test)]
    pub(crate) fn detached(generation: u64, notify: Sender<ChannelEvent>) -> Self {
        Self {
            status: Arc::new(AtomicU8::new(WaveStatus::Submitted as u8)),
            generation,
            notify,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Mark the submission as consumed and notify the controller.
    pub fn complete(self) {
        self.status.store(WaveStatus::Done as u8, Ordering::Release);
        let _ = self.notify.try_send(ChannelEvent::Drained {
            generation: self.generation,
        });
    }
}

/// Hardware-facing output channel.
pub trait WaveOutput: Send {
    /// Set up the channel for `format`. Called once per `init`.
    fn configure(&mut self, format: &ChannelFormat) -> Result<(), OutputError>;

    /// Queue `samples` (interleaved, `format.channels` wide) for playback.
    ///
    /// The backend must copy the samples before returning; the staging buffer is reused
    /// for the next refill. `completion` is completed once the submission is taken.
    fn submit(&mut self, samples: &[i16], completion: WaveCompletion) -> Result<(), OutputError>;

    /// Drop anything queued and return to an empty channel. Pending completions are
    /// discarded without firing.
    fn reset(&mut self);

    /// The session has no more audio. What is queued plays out, and the silence after
    /// it is not an underrun.
    fn drain(&mut self) {}

    /// Stop the channel. No completion may fire after this returns.
    fn release(&mut self);

    /// `(underrun_frames, underrun_events)` when the backend tracks them.
    fn underruns(&self) -> Option<(u64, u64)> {
        None
    }
}

/// Driver state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    Submitted,
}

/// Result of a prime or refill cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefillOutcome {
    /// Stale or duplicate notification; nothing happened.
    Ignored,
    /// A new buffer of `frames` was submitted.
    Submitted { frames: usize },
    /// The decoder had nothing more to give.
    Exhausted,
    /// The backend rejected the submission.
    Failed,
}

/// Wave-buffer descriptor. A fresh status cell is created per session so completions
/// from a previous session can never mark the current descriptor done.
#[derive(Debug)]
struct WaveBuffer {
    status: Arc<AtomicU8>,
    samples: usize,
}

impl WaveBuffer {
    fn fresh() -> Self {
        Self {
            status: Arc::new(AtomicU8::new(WaveStatus::Free as u8)),
            samples: 0,
        }
    }

    fn status(&self) -> WaveStatus {
        WaveStatus::from_u8(self.status.load(Ordering::Acquire))
    }
}

pub struct ChannelDriver<O: WaveOutput> {
    output: O,
    format: ChannelFormat,
    staging: Vec<i16>,
    wave: WaveBuffer,
    state: ChannelState,
    generation: u64,
    notify: Sender<ChannelEvent>,
    frames_submitted: u64,
}

impl<O: WaveOutput> ChannelDriver<O> {
    /// Configure `output` and allocate the staging buffer (one submission unit).
    pub fn new(mut output: O, format: ChannelFormat, notify: Sender<ChannelEvent>) -> Result<Self, (O, OutputError)> {
        if let Err(e) = output.configure(&format) {
            return Err((output, e));
        }
        Ok(Self {
            output,
            format,
            staging: vec![0; format.buffer_samples()],
            wave: WaveBuffer::fresh(),
            state: ChannelState::Idle,
            generation: 0,
            notify,
            frames_submitted: 0,
        })
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn format(&self) -> &ChannelFormat {
        &self.format
    }

    pub fn wave_status(&self) -> WaveStatus {
        self.wave.status()
    }

    /// Frames submitted since the current session was primed.
    pub fn frames_submitted(&self) -> u64 {
        self.frames_submitted
    }

    pub fn staging_capacity(&self) -> usize {
        self.staging.len()
    }

    pub fn underruns(&self) -> Option<(u64, u64)> {
        self.output.underruns()
    }

    /// Start a new session: fresh generation and descriptor, then one synchronous
    /// decode-and-submit. Leaves the driver `Submitted` unless the decoder is already
    /// exhausted or the backend refuses the buffer.
    pub fn prime(&mut self, decoder: &mut dyn StreamDecoder) -> RefillOutcome {
        self.output.reset();
        self.generation += 1;
        self.wave = WaveBuffer::fresh();
        self.frames_submitted = 0;
        self.state = ChannelState::Idle;
        self.refill(decoder)
    }

    /// Apply a drained notification from session `generation`.
    ///
    /// Ignored unless the notification belongs to the current session, the channel is
    /// `Submitted` and the descriptor reports `Done`.
    pub fn on_buffer_drained(&mut self, generation: u64, decoder: &mut dyn StreamDecoder) -> RefillOutcome {
        if generation != self.generation
            || self.state != ChannelState::Submitted
            || self.wave.status() != WaveStatus::Done
        {
            return RefillOutcome::Ignored;
        }
        self.refill(decoder)
    }

    /// Drop anything in flight and return to `Idle`.
    pub fn reset(&mut self) {
        self.output.reset();
        self.generation += 1;
        self.wave = WaveBuffer::fresh();
        self.state = ChannelState::Idle;
    }

    /// Stop the backend. The driver must not be primed again afterwards.
    pub fn release(&mut self) {
        self.reset();
        self.output.release();
    }

    /// Give the backend back, freeing the staging buffer.
    pub fn into_output(self) -> O {
        self.output
    }

    fn refill(&mut self, decoder: &mut dyn StreamDecoder) -> RefillOutcome {
        let channels = self.format.channels.max(1) as usize;
        let written = decoder.decode_next(&mut self.staging);
        let samples = written - written % channels;
        if samples == 0 {
            self.output.drain();
            self.state = ChannelState::Idle;
            self.wave.status.store(WaveStatus::Free as u8, Ordering::Release);
            return RefillOutcome::Exhausted;
        }

        self.wave.samples = samples;
        self.wave.status.store(WaveStatus::Submitted as u8, Ordering::Release);
        let completion = WaveCompletion {
            status: self.wave.status.clone(),
            generation: self.generation,
            notify: self.notify.clone(),
        };
        match self.output.submit(&self.staging[..self.wave.samples], completion) {
            Ok(()) => {
                let frames = samples / channels;
                self.frames_submitted += frames as u64;
                self.state = ChannelState::Submitted;
                RefillOutcome::Submitted { frames }
            }
            Err(e) => {
                tracing::warn!("wave buffer submit failed: {e}");
                self.state = ChannelState::Idle;
                self.wave.status.store(WaveStatus::Free as u8, Ordering::Release);
                RefillOutcome::Failed
            }
        }
    }
}
