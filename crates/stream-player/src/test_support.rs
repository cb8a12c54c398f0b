//! Shared fixtures for unit tests: a recording output backend, scripted decoders and
//! in-memory WAV assets.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::channel::{WaveCompletion, WaveOutput};
use crate::config::ChannelFormat;
use crate::cursor::ByteCursor;
use crate::decode::{DecoderOpener, SourceInfo, StreamDecoder};
use crate::error::{OutputError, PlayerError};

#[derive(Default)]
struct MockState {
    configured: Option<ChannelFormat>,
    pending: Option<WaveCompletion>,
    submitted: usize,
    overlapping: usize,
    resets: usize,
    drains: usize,
    released: bool,
    fail_configure: bool,
    fail_submit: bool,
    last_samples: Vec<i16>,
}

/// Output backend that records submissions and lets the test decide when the hardware
/// takes a buffer.
#[derive(Clone, Default)]
pub struct MockOutput {
    state: Arc<Mutex<MockState>>,
}

impl MockOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn configured(&self) -> Option<ChannelFormat> {
        self.state.lock().unwrap().configured
    }

    pub fn fail_configure(&self, fail: bool) {
        self.state.lock().unwrap().fail_configure = fail;
    }

    pub fn fail_submit(&self, fail: bool) {
        self.state.lock().unwrap().fail_submit = fail;
    }

    pub fn submitted(&self) -> usize {
        self.state.lock().unwrap().submitted
    }

    /// Submissions made while an earlier one was still queued.
    pub fn overlapping_submissions(&self) -> usize {
        self.state.lock().unwrap().overlapping
    }

    pub fn resets(&self) -> usize {
        self.state.lock().unwrap().resets
    }

    pub fn drains(&self) -> usize {
        self.state.lock().unwrap().drains
    }

    pub fn released(&self) -> bool {
        self.state.lock().unwrap().released
    }

    pub fn has_pending(&self) -> bool {
        self.state.lock().unwrap().pending.is_some()
    }

    pub fn last_samples(&self) -> Vec<i16> {
        self.state.lock().unwrap().last_samples.clone()
    }

    pub fn take_pending(&self) -> Option<WaveCompletion> {
        self.state.lock().unwrap().pending.take()
    }

    /// Simulate the hardware taking the queued buffer.
    pub fn complete_pending(&self) -> bool {
        match self.take_pending() {
            Some(c) => {
                c.complete();
                true
            }
            None => false,
        }
    }
}

impl WaveOutput for MockOutput {
    fn configure(&mut self, format: &ChannelFormat) -> Result<(), OutputError> {
        let mut st = self.state.lock().unwrap();
        if st.fail_configure {
            return Err(OutputError::Device("mock configure failure".to_string()));
        }
        st.configured = Some(*format);
        st.released = false;
        Ok(())
    }

    fn submit(&mut self, samples: &[i16], completion: WaveCompletion) -> Result<(), OutputError> {
        let mut st = self.state.lock().unwrap();
        if st.fail_submit {
            return Err(OutputError::Stream("mock submit failure".to_string()));
        }
        if st.pending.is_some() {
            st.overlapping += 1;
        }
        st.pending = Some(completion);
        st.submitted += 1;
        st.last_samples.clear();
        st.last_samples.extend_from_slice(samples);
        Ok(())
    }

    fn reset(&mut self) {
        let mut st = self.state.lock().unwrap();
        st.pending = None;
        st.resets += 1;
    }

    fn drain(&mut self) {
        self.state.lock().unwrap().drains += 1;
    }

    fn release(&mut self) {
        let mut st = self.state.lock().unwrap();
        st.pending = None;
        st.released = true;
    }
}

/// Decoder that yields `buffers` full chunks filled with `fill`, then 0.
pub struct ScriptedDecoder {
    remaining: usize,
    fill: i16,
    calls: Arc<AtomicUsize>,
    live: Arc<AtomicUsize>,
    info: SourceInfo,
}

impl ScriptedDecoder {
    pub fn new(buffers: usize) -> (Self, Arc<AtomicUsize>) {
        let live = Arc::new(AtomicUsize::new(0));
        let dec = Self::with_counters(buffers, 1, Arc::new(AtomicUsize::new(0)), live.clone());
        (dec, live)
    }

    fn with_counters(buffers: usize, fill: i16, calls: Arc<AtomicUsize>, live: Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        Self {
            remaining: buffers,
            fill,
            calls,
            live,
            info: SourceInfo {
                codec: Some("SCRIPTED".to_string()),
                sample_rate: Some(44_100),
                channels: Some(2),
                duration_ms: None,
            },
        }
    }
}

impl StreamDecoder for ScriptedDecoder {
    fn decode_next(&mut self, out: &mut [i16]) -> usize {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.remaining == 0 {
            return 0;
        }
        self.remaining -= 1;
        out.fill(self.fill);
        out.len()
    }

    fn info(&self) -> &SourceInfo {
        &self.info
    }
}

impl Drop for ScriptedDecoder {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Opener handing out [`ScriptedDecoder`]s. Track `i` yields `buffers[i]` chunks filled
/// with `i + 1`; tracks listed in `malformed` fail to open.
pub struct ScriptedOpener {
    pub buffers: Vec<usize>,
    pub malformed: Vec<usize>,
    /// Per-track decode call counters.
    pub calls: Vec<Arc<AtomicUsize>>,
    /// Decoders currently alive.
    pub live: Arc<AtomicUsize>,
    pub opened: AtomicUsize,
}

impl ScriptedOpener {
    pub fn new(buffers: Vec<usize>) -> Self {
        let calls = buffers.iter().map(|_| Arc::new(AtomicUsize::new(0))).collect();
        Self {
            buffers,
            malformed: Vec::new(),
            calls,
            live: Arc::new(AtomicUsize::new(0)),
            opened: AtomicUsize::new(0),
        }
    }

    pub fn with_malformed(mut self, index: usize) -> Self {
        self.malformed.push(index);
        self
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn calls(&self, track: usize) -> usize {
        self.calls[track].load(Ordering::SeqCst)
    }
}

impl DecoderOpener for ScriptedOpener {
    fn open(&self, source: ByteCursor, _hint: Option<&str>) -> Result<Box<dyn StreamDecoder>, PlayerError> {
        // Tracks in scripted registries store their own index as the first byte.
        let mut source = source;
        let mut tag = [0u8; 1];
        source.read_into(&mut tag);
        let index = tag[0] as usize;
        if self.malformed.contains(&index) {
            return Err(PlayerError::DecodeInit("scripted malformed asset".to_string()));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedDecoder::with_counters(
            self.buffers[index],
            index as i16 + 1,
            self.calls[index].clone(),
            self.live.clone(),
        )))
    }
}

/// Deterministic sample value for interleaved position `i`.
pub fn sample_at(i: usize) -> i16 {
    ((i as i32 * 37) % 2000 - 1000) as i16
}

/// Build a 16-bit PCM WAV file in memory with `frames` frames.
pub fn wav_bytes(rate: u32, channels: u16, frames: usize) -> Vec<u8> {
    let samples = frames * channels as usize;
    let data_len = (samples * 2) as u32;
    let block_align = channels * 2;
    let mut out = Vec::with_capacity(44 + data_len as usize);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&rate.to_le_bytes());
    out.extend_from_slice(&(rate * block_align as u32).to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    for i in 0..samples {
        out.extend_from_slice(&sample_at(i).to_le_bytes());
    }
    out
}

/// Poll `cond` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    cond()
}
