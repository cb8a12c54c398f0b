//! Pull-based decode stage.
//!
//! Uses Symphonia to:
//! - probe the container/codec through a [`ByteCursor`]
//! - decode packets on demand into interleaved stereo `i16`
//!
//! Nothing is decoded ahead of the caller; every `decode_next` pulls just enough packets
//! to fill the output slice.

use symphonia::core::audio::{SampleBuffer, SignalSpec};
use symphonia::core::codecs::{CodecParameters, Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::config::OUTPUT_CHANNELS;
use crate::cursor::ByteCursor;
use crate::error::PlayerError;

/// Metadata captured while probing the source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceInfo {
    /// Codec name (best-effort).
    pub codec: Option<String>,
    /// Source sample rate in Hz.
    pub sample_rate: Option<u32>,
    /// Source channel count.
    pub channels: Option<u16>,
    /// Total duration in milliseconds when the container reports it.
    pub duration_ms: Option<u64>,
}

/// A bound decoder producing interleaved stereo `i16` chunks.
///
/// Dropping the decoder closes it and releases the cursor it reads from.
pub trait StreamDecoder: Send {
    /// Fill `out` with whole stereo frames and return the number of samples written.
    ///
    /// `0` means end of stream or an unrecoverable decode error; nothing more will come.
    fn decode_next(&mut self, out: &mut [i16]) -> usize;

    fn info(&self) -> &SourceInfo;
}

/// Opens a [`StreamDecoder`] over a cursor.
pub trait DecoderOpener: Send + Sync {
    fn open(&self, source: ByteCursor, hint: Option<&str>) -> Result<Box<dyn StreamDecoder>, PlayerError>;
}

/// Production opener backed by Symphonia's default probe and codec registry.
#[derive(Clone, Debug)]
pub struct SymphoniaOpener {
    /// Output rate; sources at other rates are played as-is and logged.
    pub output_rate: u32,
    /// Consecutive corrupt packets tolerated before giving up.
    pub max_decode_errors: usize,
}

impl DecoderOpener for SymphoniaOpener {
    fn open(&self, source: ByteCursor, hint: Option<&str>) -> Result<Box<dyn StreamDecoder>, PlayerError> {
        let decoder = SymphoniaDecoder::open(source, hint, self.max_decode_errors)?;
        if let Some(rate) = decoder.info.sample_rate {
            if rate != self.output_rate {
                tracing::warn!(
                    source_rate_hz = rate,
                    output_rate_hz = self.output_rate,
                    "source rate differs from output rate; playing without resampling"
                );
            }
        }
        Ok(Box::new(decoder))
    }
}

/// Symphonia format reader + codec decoder bound to one cursor.
pub struct SymphoniaDecoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    info: SourceInfo,
    max_decode_errors: usize,
    /// Last decoded packet, interleaved at the source channel count.
    pending: Option<SampleBuffer<i16>>,
    pending_frames: usize,
    pending_channels: usize,
    pending_pos: usize,
    pending_len: usize,
    finished: bool,
}

impl SymphoniaDecoder {
    /// Probe the container and build a codec decoder for its default track.
    pub fn open(source: ByteCursor, hint: Option<&str>, max_decode_errors: usize) -> Result<Self, PlayerError> {
        let mss = MediaSourceStream::new(Box::new(source), Default::default());

        let mut probe_hint = Hint::new();
        if let Some(ext) = hint {
            probe_hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &probe_hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| PlayerError::DecodeInit(format!("probe: {e}")))?;

        let format = probed.format;
        let track = format
            .default_track()
            .ok_or_else(|| PlayerError::DecodeInit("no default audio track".to_string()))?;
        let track_id = track.id;
        let codec_params: CodecParameters = track.codec_params.clone();

        let decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| PlayerError::DecodeInit(format!("codec: {e}")))?;

        let info = SourceInfo {
            codec: codec_name_from_params(&codec_params),
            sample_rate: codec_params.sample_rate,
            channels: codec_params.channels.map(|c| c.count() as u16),
            duration_ms: duration_ms_from_codec_params(&codec_params),
        };
        tracing::debug!(
            codec = ?info.codec,
            rate_hz = ?info.sample_rate,
            channels = ?info.channels,
            "decoder opened"
        );

        Ok(Self {
            format,
            decoder,
            track_id,
            info,
            max_decode_errors,
            pending: None,
            pending_frames: 0,
            pending_channels: 0,
            pending_pos: 0,
            pending_len: 0,
            finished: false,
        })
    }

    /// Decode the next packet of our track into `pending`. Returns `false` at end.
    fn next_block(&mut self) -> bool {
        let mut errors = 0usize;
        loop {
            let packet = match self.format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::ResetRequired) => {
                    if !self.reset_decoder() {
                        return false;
                    }
                    continue;
                }
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return false;
                }
                Err(e) => {
                    tracing::warn!("demux error: {e}");
                    return false;
                }
            };
            if packet.track_id() != self.track_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec: SignalSpec = *decoded.spec();
                    let channels = spec.channels.count();
                    let frames = decoded.capacity();
                    let reuse = self.pending_channels == channels && self.pending_frames >= frames;
                    if !reuse || self.pending.is_none() {
                        self.pending = Some(SampleBuffer::<i16>::new(frames as u64, spec));
                        self.pending_frames = frames;
                        self.pending_channels = channels;
                    }
                    let Some(buf) = self.pending.as_mut() else {
                        return false;
                    };
                    buf.copy_interleaved_ref(decoded);
                    self.pending_len = buf.samples().len();
                    self.pending_pos = 0;
                    if self.pending_len == 0 {
                        continue;
                    }
                    return true;
                }
                Err(SymphoniaError::DecodeError(msg)) => {
                    errors += 1;
                    tracing::warn!(errors, "skipping corrupt packet: {msg}");
                    if errors >= self.max_decode_errors.max(1) {
                        return false;
                    }
                }
                Err(e) => {
                    tracing::warn!("decode error: {e}");
                    return false;
                }
            }
        }
    }

    /// Rebuild the codec decoder after a stream reset (chained Ogg streams).
    fn reset_decoder(&mut self) -> bool {
        let Some(track) = self.format.default_track() else {
            return false;
        };
        self.track_id = track.id;
        match symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default()) {
            Ok(decoder) => {
                self.decoder = decoder;
                true
            }
            Err(e) => {
                tracing::warn!("decoder reset failed: {e}");
                false
            }
        }
    }

    /// Copy pending frames into `out` as stereo. Returns samples written.
    fn drain_pending(&mut self, out: &mut [i16]) -> usize {
        let Some(buf) = self.pending.as_ref() else {
            return 0;
        };
        let src_channels = self.pending_channels.max(1);
        let src = &buf.samples()[self.pending_pos..self.pending_len];
        let frames = copy_stereo_frames(src, src_channels, out);
        self.pending_pos += frames * src_channels;
        frames * OUTPUT_CHANNELS as usize
    }
}

/// Copy whole frames from `src` (interleaved, `src_channels` wide) into stereo `out`.
///
/// Mono is duplicated to both sides; channels past the first two are dropped. Returns
/// the number of frames copied.
fn copy_stereo_frames(src: &[i16], src_channels: usize, out: &mut [i16]) -> usize {
    let out_channels = OUTPUT_CHANNELS as usize;
    let frames = (src.len() / src_channels).min(out.len() / out_channels);
    for (dst, frame) in out
        .chunks_exact_mut(out_channels)
        .zip(src.chunks_exact(src_channels))
        .take(frames)
    {
        dst[0] = frame[0];
        dst[1] = if src_channels == 1 { frame[0] } else { frame[1] };
    }
    frames
}

impl StreamDecoder for SymphoniaDecoder {
    fn decode_next(&mut self, out: &mut [i16]) -> usize {
        let out_channels = OUTPUT_CHANNELS as usize;
        let capacity = out.len() - out.len() % out_channels;
        let mut written = 0;

        while written < capacity && !self.finished {
            if self.pending_pos + self.pending_channels.max(1) <= self.pending_len {
                written += self.drain_pending(&mut out[written..capacity]);
                continue;
            }
            if !self.next_block() {
                self.finished = true;
            }
        }
        written
    }

    fn info(&self) -> &SourceInfo {
        &self.info
    }
}

/// Best-effort duration in milliseconds from codec metadata.
///
/// Returns `None` if the container does not provide total frames or sample rate.
fn duration_ms_from_codec_params(codec_params: &CodecParameters) -> Option<u64> {
    let frames = codec_params.n_frames?;
    let rate = codec_params.sample_rate? as u64;
    if rate == 0 {
        return None;
    }
    Some(frames.saturating_mul(1000) / rate)
}

/// Best-effort codec label used for status payloads.
fn codec_name_from_params(params: &CodecParameters) -> Option<String> {
    use symphonia::core::codecs::*;
    let name = match params.codec {
        CODEC_TYPE_VORBIS => "VORBIS",
        CODEC_TYPE_OPUS => "OPUS",
        CODEC_TYPE_FLAC => "FLAC",
        CODEC_TYPE_MP3 => "MP3",
        CODEC_TYPE_AAC => "AAC",
        CODEC_TYPE_ALAC => "ALAC",
        CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_S16BE => "PCM_S16",
        CODEC_TYPE_PCM_S24LE | CODEC_TYPE_PCM_S24BE => "PCM_S24",
        CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F32BE => "PCM_F32",
        _ => return None,
    };
    Some(name.to_string())
}
