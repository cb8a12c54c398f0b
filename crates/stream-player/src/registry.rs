//! Immutable catalog of encoded tracks.

use std::sync::Arc;

use crate::error::PlayerError;

/// One selectable unit of encoded audio.
///
/// The bytes are shared read-only; cloning a `Track` only bumps a reference count.
#[derive(Clone, Debug)]
pub struct Track {
    data: Arc<[u8]>,
    hint: Option<String>,
}

impl Track {
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            data: data.into(),
            hint: None,
        }
    }

    /// Attach a container hint (file extension such as `ogg`) used when probing.
    pub fn with_hint(mut self, ext: impl Into<String>) -> Self {
        let ext = ext.into();
        let ext = ext.trim().trim_start_matches('.').to_ascii_lowercase();
        self.hint = (!ext.is_empty()).then_some(ext);
        self
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }

    pub(crate) fn shared_bytes(&self) -> Arc<[u8]> {
        self.data.clone()
    }
}

/// Tracks indexed `0..track_count`. Never mutated after construction.
#[derive(Clone, Debug, Default)]
pub struct TrackRegistry {
    tracks: Vec<Track>,
}

impl TrackRegistry {
    pub fn new(tracks: Vec<Track>) -> Self {
        Self { tracks }
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    /// Look up a track, failing with [`PlayerError::OutOfRange`] for invalid indices.
    pub fn get(&self, index: usize) -> Result<&Track, PlayerError> {
        self.tracks.get(index).ok_or(PlayerError::OutOfRange {
            index,
            count: self.tracks.len(),
        })
    }
}

impl FromIterator<Track> for TrackRegistry {
    fn from_iter<I: IntoIterator<Item = Track>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
