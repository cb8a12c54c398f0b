//! Playback controller.
//!
//! `Player` owns the engine state machine behind a single mutex. Control calls
//! (`play`/`stop`/`exit`) and drained notifications both go through that mutex, so a
//! notification either sees a fully bound session or none at all.
//!
//! Notifications arrive as [`ChannelEvent`] messages on a bounded channel and are applied
//! by a dispatcher thread that lives from `init()` to `exit()`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};
use stream_player_types::{PlaybackEndReason, PlaybackPosition, PlayerStatus};

use crate::channel::{ChannelDriver, ChannelEvent, RefillOutcome, WaveOutput};
use crate::config::PlayerConfig;
use crate::cursor::ByteCursor;
use crate::decode::{DecoderOpener, StreamDecoder, SymphoniaOpener};
use crate::error::{OutputError, PlayerError};
use crate::registry::TrackRegistry;
use crate::status::{PlayerStatusState, SnapshotContext};

/// One bound playback session. Dropping it closes the decoder and its cursor.
struct Session {
    track: usize,
    decoder: Box<dyn StreamDecoder>,
}

struct Engine<O: WaveOutput> {
    /// Backend while uninitialized; moved into the driver by `init`.
    output: Option<O>,
    driver: Option<ChannelDriver<O>>,
    session: Option<Session>,
    status: PlayerStatusState,
}

impl<O: WaveOutput> Engine<O> {
    /// Release the current session, if any. Returns `false` when nothing was playing.
    fn stop_session(&mut self, reason: PlaybackEndReason) -> bool {
        let Some(session) = self.session.take() else {
            return false;
        };
        let track = session.track;
        drop(session);
        if let Some(driver) = self.driver.as_mut() {
            driver.reset();
        }
        self.status.end_session(reason);
        tracing::info!(track, reason = ?reason, "playback stopped");
        true
    }

    fn handle_drained(&mut self, generation: u64) {
        let (Some(driver), Some(session)) = (self.driver.as_mut(), self.session.as_mut()) else {
            return;
        };
        match driver.on_buffer_drained(generation, session.decoder.as_mut()) {
            RefillOutcome::Ignored | RefillOutcome::Submitted { .. } => {}
            RefillOutcome::Exhausted => self.finish_session(PlaybackEndReason::Eof),
            RefillOutcome::Failed => {
                if let Some(driver) = self.driver.as_mut() {
                    driver.reset();
                }
                self.finish_session(PlaybackEndReason::Error);
            }
        }
    }

    /// End the session from the refill path. The last submitted buffer keeps playing.
    fn finish_session(&mut self, reason: PlaybackEndReason) {
        if let Some(session) = self.session.take() {
            tracing::info!(track = session.track, reason = ?reason, "playback ended");
        }
        self.status.end_session(reason);
    }

    fn snapshot_context(&self, track_count: usize, config: &PlayerConfig) -> SnapshotContext {
        SnapshotContext {
            initialized: self.driver.is_some(),
            track_count,
            format: self
                .driver
                .as_ref()
                .map(|d| *d.format())
                .unwrap_or_else(|| config.channel_format()),
            frames_submitted: self.driver.as_ref().map(|d| d.frames_submitted()).unwrap_or(0),
            underruns: self.driver.as_ref().and_then(|d| d.underruns()),
        }
    }
}

/// Notification dispatcher thread.
struct Dispatcher {
    tx: Sender<ChannelEvent>,
    join: JoinHandle<()>,
}

impl Dispatcher {
    fn spawn<O: WaveOutput + 'static>(
        engine: Arc<Mutex<Engine<O>>>,
        tx: Sender<ChannelEvent>,
        rx: Receiver<ChannelEvent>,
    ) -> Self {
        let join = std::thread::spawn(move || {
            while let Ok(event) = rx.recv() {
                match event {
                    ChannelEvent::Drained { generation } => {
                        lock(&engine).handle_drained(generation);
                    }
                    ChannelEvent::Shutdown => break,
                }
            }
            tracing::debug!("notification dispatcher stopped");
        });
        Self { tx, join }
    }

    /// Stop the thread and wait for it. Notifications queued before the shutdown message
    /// are still applied (and are no-ops once the session is gone).
    fn shutdown(self) {
        let _ = self.tx.send(ChannelEvent::Shutdown);
        if self.join.join().is_err() {
            tracing::warn!("notification dispatcher panicked");
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Public control surface: `init` / `play` / `stop` / `exit`.
pub struct Player<O: WaveOutput + 'static> {
    registry: Arc<TrackRegistry>,
    config: PlayerConfig,
    opener: Arc<dyn DecoderOpener>,
    engine: Arc<Mutex<Engine<O>>>,
    dispatcher: Mutex<Option<Dispatcher>>,
}

impl<O: WaveOutput + 'static> Player<O> {
    /// Create an uninitialized player decoding with Symphonia.
    pub fn new(registry: TrackRegistry, output: O, config: PlayerConfig) -> Self {
        let opener = SymphoniaOpener {
            output_rate: config.sample_rate,
            max_decode_errors: config.max_decode_errors,
        };
        Self::with_opener(registry, output, config, Arc::new(opener))
    }

    /// Create an uninitialized player with a custom decoder opener.
    pub fn with_opener(
        registry: TrackRegistry,
        output: O,
        config: PlayerConfig,
        opener: Arc<dyn DecoderOpener>,
    ) -> Self {
        Self {
            registry: Arc::new(registry),
            config,
            opener,
            engine: Arc::new(Mutex::new(Engine {
                output: Some(output),
                driver: None,
                session: None,
                status: PlayerStatusState::default(),
            })),
            dispatcher: Mutex::new(None),
        }
    }

    /// Configure the output channel, allocate the staging buffer and start the
    /// notification dispatcher. No-op when already initialized.
    pub fn init(&self) -> Result<(), PlayerError> {
        let mut dispatcher = lock(&self.dispatcher);
        let mut engine = lock(&self.engine);
        if engine.driver.is_some() {
            return Ok(());
        }
        let Some(output) = engine.output.take() else {
            return Err(OutputError::NotConfigured.into());
        };

        let format = self.config.channel_format();
        let (tx, rx) = crossbeam_channel::bounded(self.config.notify_capacity.max(1));
        match ChannelDriver::new(output, format, tx.clone()) {
            Ok(driver) => engine.driver = Some(driver),
            Err((output, e)) => {
                engine.output = Some(output);
                tracing::warn!("output channel init failed: {e}");
                return Err(e.into());
            }
        }
        drop(engine);

        *dispatcher = Some(Dispatcher::spawn(self.engine.clone(), tx, rx));
        tracing::info!(
            rate_hz = format.sample_rate,
            channels = format.channels,
            buffer_frames = format.buffer_frames,
            tracks = self.registry.track_count(),
            "player initialized"
        );
        Ok(())
    }

    /// Start playing track `index`, replacing any current session.
    ///
    /// Invalid indices fail with [`PlayerError::OutOfRange`] before anything changes. A
    /// track whose headers cannot be parsed fails with [`PlayerError::DecodeInit`] and
    /// leaves the player stopped.
    pub fn play(&self, index: usize) -> Result<(), PlayerError> {
        let track = self.registry.get(index)?;
        let mut guard = lock(&self.engine);
        let engine = &mut *guard;
        if engine.driver.is_none() {
            return Err(PlayerError::NotInitialized);
        }

        engine.stop_session(PlaybackEndReason::Stopped);
        engine.status.selected_track = Some(index);

        let mut decoder = match self.opener.open(ByteCursor::open(track), track.hint()) {
            Ok(decoder) => decoder,
            Err(e) => {
                tracing::warn!(track = index, "cannot open track: {e}");
                return Err(e);
            }
        };
        let info = decoder.info().clone();

        let Some(driver) = engine.driver.as_mut() else {
            return Err(PlayerError::NotInitialized);
        };
        match driver.prime(decoder.as_mut()) {
            RefillOutcome::Submitted { frames } => {
                engine.session = Some(Session {
                    track: index,
                    decoder,
                });
                tracing::info!(track = index, codec = ?info.codec, primed_frames = frames, "playback started");
                engine.status.begin_session(index, info);
                Ok(())
            }
            RefillOutcome::Exhausted => {
                engine.status.end_session(PlaybackEndReason::Eof);
                tracing::info!(track = index, "track produced no audio");
                Ok(())
            }
            RefillOutcome::Failed | RefillOutcome::Ignored => {
                driver.reset();
                engine.status.end_session(PlaybackEndReason::Error);
                Err(OutputError::Stream("initial submission rejected".to_string()).into())
            }
        }
    }

    /// Stop the current session. No-op when nothing is playing.
    pub fn stop(&self) {
        lock(&self.engine).stop_session(PlaybackEndReason::Stopped);
    }

    /// Stop playback, release the output channel and free the staging buffer.
    ///
    /// After this returns no notification can reach the engine. Safe to call repeatedly
    /// or before `init()`.
    pub fn exit(&self) {
        let mut dispatcher = lock(&self.dispatcher);
        let driver = {
            let mut engine = lock(&self.engine);
            engine.stop_session(PlaybackEndReason::Stopped);
            let Some(mut driver) = engine.driver.take() else {
                return;
            };
            driver.release();
            driver
        };

        if let Some(d) = dispatcher.take() {
            d.shutdown();
        }

        lock(&self.engine).output = Some(driver.into_output());
        tracing::info!("player exited");
    }

    pub fn is_initialized(&self) -> bool {
        lock(&self.engine).driver.is_some()
    }

    pub fn is_playing(&self) -> bool {
        lock(&self.engine).session.is_some()
    }

    pub fn track_count(&self) -> usize {
        self.registry.track_count()
    }

    /// Track named by the last `play` with a valid index, whether or not it could be opened.
    pub fn selected_track(&self) -> Option<usize> {
        lock(&self.engine).status.selected_track
    }

    /// Decoded-frame position of the active session.
    pub fn position(&self) -> Option<PlaybackPosition> {
        let engine = lock(&self.engine);
        let ctx = engine.snapshot_context(self.registry.track_count(), &self.config);
        engine.status.position(&ctx)
    }

    pub fn status(&self) -> PlayerStatus {
        let engine = lock(&self.engine);
        let ctx = engine.snapshot_context(self.registry.track_count(), &self.config);
        engine.status.snapshot(&ctx)
    }
}

impl<O: WaveOutput + 'static> Drop for Player<O> {
    fn drop(&mut self) {
        self.exit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Track;
    use crate::test_support::{MockOutput, ScriptedOpener, wait_until, wav_bytes};
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(5);

    fn scripted(buffers: Vec<usize>) -> (Player<MockOutput>, MockOutput, Arc<ScriptedOpener>) {
        scripted_with(ScriptedOpener::new(buffers))
    }

    fn scripted_with(opener: ScriptedOpener) -> (Player<MockOutput>, MockOutput, Arc<ScriptedOpener>) {
        let registry: TrackRegistry = (0..opener.buffers.len())
            .map(|i| Track::new(vec![i as u8, 0, 0, 0]))
            .collect();
        let opener = Arc::new(opener);
        let out = MockOutput::new();
        let config = PlayerConfig {
            buffer_frames: 16,
            ..PlayerConfig::default()
        };
        let player = Player::with_opener(registry, out.clone(), config, opener.clone());
        player.init().unwrap();
        (player, out, opener)
    }

    /// Let the hardware take the queued buffer and wait for the refill it triggers.
    fn drain_and_wait(player: &Player<MockOutput>, out: &MockOutput) {
        let before = out.submitted();
        assert!(out.complete_pending());
        assert!(wait_until(WAIT, || out.submitted() > before || !player.is_playing()));
    }

    #[test]
    fn play_then_is_playing() {
        let (player, out, opener) = scripted(vec![4, 4, 4]);
        for i in 0..3 {
            player.play(i).unwrap();
            assert!(player.is_playing());
            assert_eq!(player.selected_track(), Some(i));
            assert_eq!(opener.live(), 1);
        }
        assert_eq!(out.overlapping_submissions(), 0);
    }

    #[test]
    fn play_before_init_is_rejected() {
        let registry = TrackRegistry::new(vec![Track::new(vec![0u8])]);
        let opener = Arc::new(ScriptedOpener::new(vec![2]));
        let player = Player::with_opener(registry, MockOutput::new(), PlayerConfig::default(), opener);
        assert!(matches!(player.play(0), Err(PlayerError::NotInitialized)));
        player.stop();
        assert!(!player.is_playing());
    }

    #[test]
    fn out_of_range_leaves_playback_untouched() {
        let (player, out, opener) = scripted(vec![8, 8]);
        player.play(1).unwrap();
        let submitted = out.submitted();

        match player.play(2) {
            Err(PlayerError::OutOfRange { index, count }) => {
                assert_eq!((index, count), (2, 2));
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(player.is_playing());
        assert_eq!(player.selected_track(), Some(1));
        assert_eq!(out.submitted(), submitted);
        assert_eq!(opener.live(), 1);
    }

    #[test]
    fn malformed_track_stays_stopped_without_leaks() {
        let (player, _out, opener) = scripted_with(ScriptedOpener::new(vec![3, 3]).with_malformed(1));
        for _ in 0..50 {
            player.play(0).unwrap();
            assert!(player.is_playing());
            assert!(matches!(player.play(1), Err(PlayerError::DecodeInit(_))));
            assert!(!player.is_playing());
            assert_eq!(player.selected_track(), Some(1));
            assert_eq!(opener.live(), 0);
            player.stop();
        }
        assert_eq!(opener.live(), 0);
    }

    #[test]
    fn stop_is_idempotent() {
        let (player, out, opener) = scripted(vec![5]);
        player.play(0).unwrap();
        player.stop();
        assert!(!player.is_playing());
        assert_eq!(opener.live(), 0);
        let resets = out.resets();
        player.stop();
        assert_eq!(out.resets(), resets);
        assert_eq!(player.status().end_reason, Some(PlaybackEndReason::Stopped));
    }

    #[test]
    fn init_exit_exit_is_safe() {
        let (player, out, _opener) = scripted(vec![2]);
        player.init().unwrap();
        player.play(0).unwrap();
        player.exit();
        assert!(out.released());
        assert!(!player.is_initialized());
        assert!(!player.is_playing());
        player.exit();
        assert!(matches!(player.play(0), Err(PlayerError::NotInitialized)));

        // The output comes back on exit, so the player can be brought up again.
        player.init().unwrap();
        player.play(0).unwrap();
        assert!(player.is_playing());
    }

    #[test]
    fn exit_before_init_is_noop() {
        let registry = TrackRegistry::new(Vec::new());
        let out = MockOutput::new();
        let player = Player::new(registry, out.clone(), PlayerConfig::default());
        player.exit();
        assert!(!out.released());
    }

    #[test]
    fn init_failure_keeps_output_for_retry() {
        let registry = TrackRegistry::new(vec![Track::new(vec![0u8])]);
        let out = MockOutput::new();
        out.fail_configure(true);
        let opener = Arc::new(ScriptedOpener::new(vec![2]));
        let player = Player::with_opener(registry, out.clone(), PlayerConfig::default(), opener);
        assert!(matches!(player.init(), Err(PlayerError::Output(_))));
        out.fail_configure(false);
        player.init().unwrap();
        assert!(player.is_initialized());
    }

    #[test]
    fn track_plays_to_completion_and_stops_once() {
        let (player, out, opener) = scripted(vec![3]);
        player.play(0).unwrap();
        assert_eq!(out.submitted(), 1);

        drain_and_wait(&player, &out);
        drain_and_wait(&player, &out);
        assert_eq!(out.submitted(), 3);
        assert!(player.is_playing());

        // Third buffer taken: the refill finds nothing and the session ends.
        assert!(out.complete_pending());
        assert!(wait_until(WAIT, || !player.is_playing()));
        assert_eq!(opener.live(), 0);
        assert_eq!(player.status().end_reason, Some(PlaybackEndReason::Eof));
        assert_eq!(opener.calls(0), 4);

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(out.submitted(), 3);
        assert!(!out.has_pending());
        assert_eq!(opener.calls(0), 4);
    }

    #[test]
    fn switching_tracks_releases_previous_session() {
        let (player, out, opener) = scripted(vec![10, 10]);
        player.play(0).unwrap();
        drain_and_wait(&player, &out);
        let stale = out.take_pending().unwrap();

        player.play(1).unwrap();
        assert_eq!(opener.live(), 1);
        assert_eq!(player.selected_track(), Some(1));
        assert_eq!(out.last_samples()[0], 2);
        let calls_track0 = opener.calls(0);

        // A late completion from track 0 must not refill anything.
        let submitted = out.submitted();
        stale.complete();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(out.submitted(), submitted);
        assert_eq!(opener.calls(0), calls_track0);

        drain_and_wait(&player, &out);
        assert_eq!(out.submitted(), submitted + 1);
        assert_eq!(opener.calls(0), calls_track0);
        assert_eq!(out.overlapping_submissions(), 0);
    }

    #[test]
    fn position_counts_submitted_frames() {
        let (player, out, _opener) = scripted(vec![10]);
        assert!(player.position().is_none());
        player.play(0).unwrap();
        drain_and_wait(&player, &out);
        let pos = player.position().unwrap();
        assert_eq!(pos.track, 0);
        assert_eq!(pos.frames, 32);
        player.stop();
        assert!(player.position().is_none());
    }

    #[test]
    fn concurrent_stop_never_overlaps_submissions() {
        let (player, out, opener) = scripted(vec![usize::MAX, usize::MAX]);
        let player = Arc::new(player);
        let done = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let hw = {
            let out = out.clone();
            let done = done.clone();
            std::thread::spawn(move || {
                while !done.load(std::sync::atomic::Ordering::SeqCst) {
                    out.complete_pending();
                    std::thread::yield_now();
                }
            })
        };

        for round in 0..200 {
            player.play(round % 2).unwrap();
            std::thread::yield_now();
            player.stop();
            assert!(!player.is_playing());
            assert_eq!(opener.live(), 0);
        }
        done.store(true, std::sync::atomic::Ordering::SeqCst);
        hw.join().unwrap();

        assert_eq!(out.overlapping_submissions(), 0);
        player.exit();
    }

    #[test]
    fn wav_track_plays_through_symphonia() {
        let frames = 16 * 3 + 5;
        let registry = TrackRegistry::new(vec![
            Track::new(wav_bytes(44_100, 2, frames)).with_hint("wav"),
            Track::new(vec![0u8; 64]).with_hint("wav"),
        ]);
        let out = MockOutput::new();
        let config = PlayerConfig {
            buffer_frames: 16,
            ..PlayerConfig::default()
        };
        let player = Player::new(registry, out.clone(), config);
        player.init().unwrap();

        assert!(matches!(player.play(1), Err(PlayerError::DecodeInit(_))));
        assert!(!player.is_playing());

        player.play(0).unwrap();
        let status = player.status();
        assert_eq!(status.source_codec.as_deref(), Some("PCM_S16"));
        assert_eq!(status.source_channels, Some(2));

        while out.has_pending() {
            drain_and_wait(&player, &out);
        }
        assert!(wait_until(WAIT, || !player.is_playing()));
        assert_eq!(out.submitted(), 4);
        assert_eq!(out.last_samples().len(), 5 * 2);
        assert_eq!(player.status().end_reason, Some(PlaybackEndReason::Eof));
    }

    #[test]
    fn refill_submit_failure_ends_with_error() {
        let (player, out, opener) = scripted(vec![10]);
        player.play(0).unwrap();
        out.fail_submit(true);
        assert!(out.complete_pending());
        assert!(wait_until(WAIT, || !player.is_playing()));

        assert_eq!(player.status().end_reason, Some(PlaybackEndReason::Error));
        assert_eq!(opener.live(), 0);
        assert_eq!(out.submitted(), 1);
        assert!(!out.has_pending());
    }

    #[test]
    fn prime_submit_failure_is_reported() {
        let (player, out, opener) = scripted(vec![10, 10]);
        player.play(0).unwrap();
        out.fail_submit(true);

        assert!(matches!(player.play(1), Err(PlayerError::Output(_))));
        assert!(!player.is_playing());
        assert_eq!(opener.live(), 0);
        assert_eq!(player.status().end_reason, Some(PlaybackEndReason::Error));

        // The channel recovers once the backend accepts buffers again.
        out.fail_submit(false);
        player.play(1).unwrap();
        assert!(player.is_playing());
    }

    #[test]
    fn truncated_wav_plays_what_is_present() {
        let frames = 37;
        let mut bytes = wav_bytes(44_100, 2, 64);
        bytes.truncate(44 + frames * 4);
        let registry = TrackRegistry::new(vec![Track::new(bytes).with_hint("wav")]);
        let out = MockOutput::new();
        let config = PlayerConfig {
            buffer_frames: 16,
            ..PlayerConfig::default()
        };
        let player = Player::new(registry, out.clone(), config);
        player.init().unwrap();

        player.play(0).unwrap();
        while out.has_pending() {
            drain_and_wait(&player, &out);
        }
        assert!(wait_until(WAIT, || !player.is_playing()));
        assert_eq!(out.submitted(), 3);
        assert_eq!(out.last_samples().len(), 5 * 2);
        assert_eq!(out.drains(), 1);
        assert_eq!(player.status().end_reason, Some(PlaybackEndReason::Eof));
    }
}
