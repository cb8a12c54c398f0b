//! Seekable read cursor over a track's immutable bytes.
//!
//! This is the byte source the decoder pulls from. It implements `Read`/`Seek` and
//! symphonia's [`MediaSource`], so the decoder never holds its own copy of the stream.

use std::io;
use std::sync::Arc;

use symphonia::core::io::MediaSource;

use crate::error::SeekError;
use crate::registry::Track;

/// Origin for [`ByteCursor::seek`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeekMode {
    Absolute,
    RelativeToCurrent,
    RelativeToEnd,
}

/// Read position over one track. Invariant: `offset <= data.len()`.
#[derive(Clone, Debug)]
pub struct ByteCursor {
    data: Arc<[u8]>,
    offset: u64,
}

impl ByteCursor {
    /// Open a cursor at offset 0.
    pub fn open(track: &Track) -> Self {
        Self {
            data: track.shared_bytes(),
            offset: 0,
        }
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Copy up to `buf.len()` bytes from the current offset and advance past them.
    ///
    /// Returns 0 at end of data; never fails.
    pub fn read_into(&mut self, buf: &mut [u8]) -> usize {
        let start = self.offset as usize;
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        self.offset += n as u64;
        n
    }

    /// Reposition the cursor. Targets outside `0..=len` fail and leave the offset unchanged.
    pub fn seek_to(&mut self, offset: i64, mode: SeekMode) -> Result<u64, SeekError> {
        let base: i128 = match mode {
            SeekMode::Absolute => 0,
            SeekMode::RelativeToCurrent => self.offset as i128,
            SeekMode::RelativeToEnd => self.len() as i128,
        };
        let target = base + offset as i128;
        if target < 0 || target > self.len() as i128 {
            return Err(SeekError {
                target,
                len: self.len(),
            });
        }
        self.offset = target as u64;
        Ok(self.offset)
    }

    pub fn tell(&self) -> u64 {
        self.offset
    }
}

impl io::Read for ByteCursor {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.read_into(buf))
    }
}

impl io::Seek for ByteCursor {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        let result = match pos {
            io::SeekFrom::Start(n) => match i64::try_from(n) {
                Ok(n) => self.seek_to(n, SeekMode::Absolute),
                Err(_) => Err(SeekError {
                    target: n as i128,
                    len: self.len(),
                }),
            },
            io::SeekFrom::Current(n) => self.seek_to(n, SeekMode::RelativeToCurrent),
            io::SeekFrom::End(n) => self.seek_to(n, SeekMode::RelativeToEnd),
        };
        result.map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
    }

    fn stream_position(&mut self) -> io::Result<u64> {
        Ok(self.tell())
    }
}

impl MediaSource for ByteCursor {
    fn is_seekable(&self) -> bool {
        true
    }

    fn byte_len(&self) -> Option<u64> {
        Some(self.len())
    }
}
