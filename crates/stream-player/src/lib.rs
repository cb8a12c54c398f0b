//! Memory-resident streaming playback engine.
//!
//! Tracks live in an immutable [`registry::TrackRegistry`]. Playing a track binds a
//! [`cursor::ByteCursor`] to a symphonia decoder ([`decode`]) and primes the
//! [`channel::ChannelDriver`], which refills one fixed-size PCM buffer every time the
//! output backend reports that the previous submission drained. [`player::Player`] is the
//! control surface tying these together.

pub mod channel;
pub mod config;
pub mod cursor;
pub mod decode;
pub mod device;
pub mod error;
pub mod output;
pub mod player;
pub mod registry;
pub mod status;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::PlayerConfig;
pub use error::{OutputError, PlayerError, SeekError};
pub use player::Player;
pub use registry::{Track, TrackRegistry};
