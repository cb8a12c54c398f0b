//! CPAL-backed output channel.
//!
//! The backend keeps a device-side pair of slots. A submission is copied into the back
//! slot; when the front slot has played out, the real-time callback swaps the slots and
//! completes the submission, so the driver refills while the promoted slot plays.
//!
//! ## Real-time constraints
//! The callback only holds the slot lock while copying samples, never allocates and
//! never waits. Completing a submission is an atomic store plus a non-blocking send.
//! Gaps are filled with silence and counted.
//!
//! The CPAL stream lives on its own thread for the whole `configure` → `release` span,
//! so the backend itself stays `Send`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use anyhow::{Result, anyhow};
use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::Sender;

use crate::channel::{WaveCompletion, WaveOutput};
use crate::config::ChannelFormat;
use crate::device;
use crate::error::OutputError;

/// Front/back slot pair shared with the CPAL callback.
#[derive(Default)]
struct DeviceSlots {
    front: Vec<i16>,
    front_len: usize,
    front_pos: usize,
    back: Vec<i16>,
    back_len: usize,
    back_completion: Option<WaveCompletion>,
    /// Channels of the staged samples (always the engine's output width).
    channels: usize,
    /// `true` while audio was being produced in the previous callback.
    sounding: bool,
    /// Set once the session has no more audio; running dry is then expected.
    draining: bool,
}

impl DeviceSlots {
    fn allocate(&mut self, format: &ChannelFormat) {
        let samples = format.buffer_samples();
        self.front = vec![0; samples];
        self.back = vec![0; samples];
        self.channels = format.channels.max(1) as usize;
        self.clear();
    }

    fn clear(&mut self) {
        self.front_len = 0;
        self.front_pos = 0;
        self.back_len = 0;
        self.back_completion = None;
        self.sounding = false;
        self.draining = false;
    }

    /// Move the back slot to the front and complete its submission.
    fn promote(&mut self) -> bool {
        if self.back_len == 0 {
            return false;
        }
        std::mem::swap(&mut self.front, &mut self.back);
        self.front_len = self.back_len;
        self.front_pos = 0;
        self.back_len = 0;
        if let Some(completion) = self.back_completion.take() {
            completion.complete();
        }
        true
    }

    /// Next stereo frame from the front slot.
    fn next_frame(&mut self) -> (i16, i16) {
        let base = self.front_pos;
        let l = self.front[base];
        let r = if self.channels > 1 { self.front[base + 1] } else { l };
        self.front_pos += self.channels;
        (l, r)
    }
}

/// Handle to the thread that owns the CPAL stream.
struct StreamThread {
    stop_tx: Sender<()>,
    join: JoinHandle<()>,
}

/// [`WaveOutput`] that plays through a CPAL output device.
pub struct CpalWaveOutput {
    device: Option<String>,
    slots: Arc<Mutex<DeviceSlots>>,
    underrun_frames: Arc<AtomicU64>,
    underrun_events: Arc<AtomicU64>,
    stream: Option<StreamThread>,
}

impl CpalWaveOutput {
    /// `device` selects an output by case-insensitive substring; `None` uses the default.
    pub fn new(device: Option<String>) -> Self {
        Self {
            device,
            slots: Arc::new(Mutex::new(DeviceSlots::default())),
            underrun_frames: Arc::new(AtomicU64::new(0)),
            underrun_events: Arc::new(AtomicU64::new(0)),
            stream: None,
        }
    }

    fn slots(&self) -> MutexGuard<'_, DeviceSlots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stop_stream(&mut self) {
        if let Some(st) = self.stream.take() {
            let _ = st.stop_tx.send(());
            if st.join.join().is_err() {
                tracing::warn!("output stream thread panicked");
            }
        }
    }
}

impl WaveOutput for CpalWaveOutput {
    fn configure(&mut self, format: &ChannelFormat) -> Result<(), OutputError> {
        self.stop_stream();
        self.slots().allocate(format);

        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<String, String>>(1);
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let needle = self.device.clone();
        let format = *format;
        let slots = self.slots.clone();
        let underrun_frames = self.underrun_frames.clone();
        let underrun_events = self.underrun_events.clone();

        let join = std::thread::spawn(move || {
            let stream = match open_stream(needle.as_deref(), &format, slots, underrun_frames, underrun_events) {
                Ok((stream, name)) => {
                    let _ = ready_tx.send(Ok(name));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(format!("{e:#}")));
                    return;
                }
            };
            let _ = stop_rx.recv();
            if let Err(e) = stream.pause() {
                tracing::debug!("stream pause on release: {e}");
            }
            drop(stream);
        });

        match ready_rx.recv() {
            Ok(Ok(name)) => {
                tracing::info!(device = %name, "output device");
                self.stream = Some(StreamThread { stop_tx, join });
                Ok(())
            }
            Ok(Err(msg)) => {
                let _ = join.join();
                Err(OutputError::Device(msg))
            }
            Err(_) => {
                let _ = join.join();
                Err(OutputError::Stream("output thread exited during setup".to_string()))
            }
        }
    }

    fn submit(&mut self, samples: &[i16], completion: WaveCompletion) -> Result<(), OutputError> {
        if self.stream.is_none() {
            return Err(OutputError::NotConfigured);
        }
        let mut slots = self.slots();
        if slots.back_len > 0 {
            return Err(OutputError::Busy);
        }
        if samples.len() > slots.back.len() {
            return Err(OutputError::Format(format!(
                "submission of {} samples exceeds slot of {}",
                samples.len(),
                slots.back.len()
            )));
        }
        slots.back[..samples.len()].copy_from_slice(samples);
        slots.back_len = samples.len();
        slots.back_completion = Some(completion);
        slots.draining = false;
        Ok(())
    }

    fn reset(&mut self) {
        self.slots().clear();
    }

    fn drain(&mut self) {
        self.slots().draining = true;
    }

    fn release(&mut self) {
        self.slots().clear();
        self.stop_stream();
    }

    fn underruns(&self) -> Option<(u64, u64)> {
        Some((
            self.underrun_frames.load(Ordering::Relaxed),
            self.underrun_events.load(Ordering::Relaxed),
        ))
    }
}

impl Drop for CpalWaveOutput {
    fn drop(&mut self) {
        self.stop_stream();
    }
}

/// Open the device, build the stream for its native sample format and start it.
fn open_stream(
    needle: Option<&str>,
    format: &ChannelFormat,
    slots: Arc<Mutex<DeviceSlots>>,
    underrun_frames: Arc<AtomicU64>,
    underrun_events: Arc<AtomicU64>,
) -> Result<(cpal::Stream, String)> {
    let host = cpal::default_host();
    let device = device::pick_device(&host, needle)?;
    let name = device
        .description()
        .map(|d| d.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    let config = device::pick_output_config(&device, format.sample_rate, format.channels)?;
    let mut stream_config: cpal::StreamConfig = config.clone().into();
    if let Some(buf) = device::pick_buffer_size(&config, format.buffer_frames as u32) {
        stream_config.buffer_size = buf;
    }
    if stream_config.sample_rate != format.sample_rate {
        tracing::warn!(
            device_rate_hz = stream_config.sample_rate,
            output_rate_hz = format.sample_rate,
            "device does not support the output rate; pitch will be off"
        );
    }
    tracing::info!(
        rate_hz = stream_config.sample_rate,
        channels = stream_config.channels,
        buffer_size = ?stream_config.buffer_size,
        sample_format = ?config.sample_format(),
        "device output config"
    );

    let counters = Counters {
        underrun_frames,
        underrun_events,
    };
    let stream = match config.sample_format() {
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &stream_config, slots, counters)?,
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &stream_config, slots, counters)?,
        cpal::SampleFormat::I32 => build_stream::<i32>(&device, &stream_config, slots, counters)?,
        cpal::SampleFormat::U16 => build_stream::<u16>(&device, &stream_config, slots, counters)?,
        other => return Err(anyhow!("Unsupported sample format: {other:?}")),
    };
    stream.play()?;
    Ok((stream, name))
}

struct Counters {
    underrun_frames: Arc<AtomicU64>,
    underrun_events: Arc<AtomicU64>,
}

/// Type-specialized stream builder for CPAL sample formats.
fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    slots: Arc<Mutex<DeviceSlots>>,
    counters: Counters,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<i16>,
{
    let channels_out = (config.channels as usize).max(1);
    let err_fn = |err| tracing::warn!("stream error: {err}");

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            let mut st = slots.lock().unwrap_or_else(PoisonError::into_inner);
            render(&mut st, data, channels_out, &counters);
        },
        err_fn,
        None,
    )?;

    Ok(stream)
}

/// Fill one device buffer from the slots, padding with silence once they run dry.
///
/// Running dry while audio was sounding counts as one underrun event, unless the slots
/// were cleared or the session said it was draining.
fn render<T>(st: &mut DeviceSlots, data: &mut [T], channels_out: usize, counters: &Counters)
where
    T: cpal::Sample + cpal::FromSample<i16>,
{
    let silence = <T as cpal::Sample>::from_sample::<i16>(0);
    let frames = data.len() / channels_out;

    for frame in 0..frames {
        if st.front_pos >= st.front_len && !st.promote() {
            if st.sounding && !st.draining {
                counters.underrun_events.fetch_add(1, Ordering::Relaxed);
                let remaining = frames - frame;
                counters
                    .underrun_frames
                    .fetch_add(remaining as u64, Ordering::Relaxed);
            }
            st.sounding = false;
            data[frame * channels_out..].fill(silence);
            return;
        }
        st.sounding = true;
        let (l, r) = st.next_frame();
        let out = &mut data[frame * channels_out..(frame + 1) * channels_out];
        write_frame(out, l, r);
    }
}

/// Map one stereo frame onto the device's channel layout.
///
/// - mono device: average L/R
/// - stereo and wider: L/R on the first two channels, silence elsewhere
fn write_frame<T>(out: &mut [T], l: i16, r: i16)
where
    T: cpal::Sample + cpal::FromSample<i16>,
{
    if out.len() == 1 {
        let mixed = ((l as i32 + r as i32) / 2) as i16;
        out[0] = <T as cpal::Sample>::from_sample::<i16>(mixed);
        return;
    }
    for (ch, slot) in out.iter_mut().enumerate() {
        let v = match ch {
            0 => l,
            1 => r,
            _ => 0,
        };
        *slot = <T as cpal::Sample>::from_sample::<i16>(v);
    }
}
