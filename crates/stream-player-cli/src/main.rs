//! Console front end for the stream-player engine.
//!
//! Loads every track given on the command line into memory, opens the output device and
//! then reads playback commands from stdin until `quit` or Ctrl-C.

mod cli;
mod command;

use std::io::BufRead;
use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use command::Command;
use crossbeam_channel::{Receiver, Sender};
use stream_player::output::CpalWaveOutput;
use stream_player::{Player, PlayerConfig, Track, TrackRegistry};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,stream_player=info")
        }))
        .init();

    if args.list_devices {
        let host = cpal::default_host();
        stream_player::device::list_devices(&host)?;
        return Ok(());
    }

    let registry = load_tracks(&args.tracks)?;
    let config = PlayerConfig {
        sample_rate: args.sample_rate,
        buffer_frames: args.buffer_frames,
        max_decode_errors: args.max_decode_errors,
        ..PlayerConfig::default()
    };
    let player = Player::new(registry, CpalWaveOutput::new(args.device.clone()), config);
    player.init().context("initialize output")?;

    let (tx, rx) = crossbeam_channel::unbounded();
    spawn_stdin_reader(tx.clone());
    let ctrlc_tx = tx;
    let _ = ctrlc::set_handler(move || {
        let _ = ctrlc_tx.send(Command::Quit);
    });

    if let Some(index) = args.start {
        run_command(&player, &args.tracks, Command::Play(index));
    }
    println!("{}", command::HELP);

    command_loop(&player, &args.tracks, &rx);
    player.exit();
    tracing::info!("player exited");
    Ok(())
}

fn load_tracks(paths: &[std::path::PathBuf]) -> Result<TrackRegistry> {
    let mut tracks = Vec::with_capacity(paths.len());
    for path in paths {
        let track = load_track(path)?;
        tracing::info!(
            index = tracks.len(),
            path = %path.display(),
            bytes = track.len(),
            "track loaded"
        );
        tracks.push(track);
    }
    Ok(TrackRegistry::new(tracks))
}

fn load_track(path: &Path) -> Result<Track> {
    let data = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let track = Track::new(data);
    Ok(match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => track.with_hint(ext),
        None => track,
    })
}

fn spawn_stdin_reader(tx: Sender<Command>) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            match Command::parse(&line) {
                Ok(Some(cmd)) => {
                    if tx.send(cmd).is_err() {
                        return;
                    }
                }
                Ok(None) => {}
                Err(msg) => eprintln!("{msg}"),
            }
        }
        let _ = tx.send(Command::Quit);
    });
}

fn command_loop(player: &Player<CpalWaveOutput>, paths: &[std::path::PathBuf], rx: &Receiver<Command>) {
    while let Ok(cmd) = rx.recv() {
        if cmd == Command::Quit {
            break;
        }
        run_command(player, paths, cmd);
    }
}

fn run_command(player: &Player<CpalWaveOutput>, paths: &[std::path::PathBuf], cmd: Command) {
    match cmd {
        Command::Play(index) => play(player, paths, index),
        Command::Next | Command::Prev => {
            let forward = cmd == Command::Next;
            match command::step_track(player.selected_track(), player.track_count(), forward) {
                Some(index) => play(player, paths, index),
                None => eprintln!("no tracks loaded"),
            }
        }
        Command::Stop => player.stop(),
        Command::Status => match serde_json::to_string_pretty(&player.status()) {
            Ok(json) => println!("{json}"),
            Err(e) => tracing::warn!("status encode failed: {e}"),
        },
        Command::Tracks => {
            for (i, path) in paths.iter().enumerate() {
                let marker = if player.selected_track() == Some(i) { '*' } else { ' ' };
                println!("{marker}{i}: {}", path.display());
            }
        }
        Command::Help => println!("{}", command::HELP),
        Command::Quit => {}
    }
}

fn play(player: &Player<CpalWaveOutput>, paths: &[std::path::PathBuf], index: usize) {
    match player.play(index) {
        Ok(()) => {
            let name = paths.get(index).map(|p| p.display().to_string()).unwrap_or_default();
            tracing::info!(index, track = %name, "playing");
        }
        Err(e) => eprintln!("play {index}: {e}"),
    }
}
