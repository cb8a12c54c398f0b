//! Interactive commands read from stdin.

/// A single console command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Play(usize),
    Next,
    Prev,
    Stop,
    Status,
    Tracks,
    Help,
    Quit,
}

impl Command {
    /// Parse one input line. Blank lines yield `Ok(None)`.
    pub fn parse(line: &str) -> Result<Option<Command>, String> {
        let mut parts = line.split_whitespace();
        let Some(word) = parts.next() else {
            return Ok(None);
        };
        let cmd = match word.to_ascii_lowercase().as_str() {
            "play" | "p" => {
                let arg = parts.next().ok_or("usage: play <index>")?;
                let index = arg
                    .parse::<usize>()
                    .map_err(|_| format!("invalid track index: {arg}"))?;
                Command::Play(index)
            }
            "next" | "n" => Command::Next,
            "prev" => Command::Prev,
            "stop" | "s" => Command::Stop,
            "status" => Command::Status,
            "tracks" | "ls" => Command::Tracks,
            "help" | "?" => Command::Help,
            "quit" | "exit" | "q" => Command::Quit,
            other => return Err(format!("unknown command: {other}")),
        };
        if parts.next().is_some() {
            return Err(format!("unexpected arguments after {word}"));
        }
        Ok(Some(cmd))
    }
}

pub const HELP: &str = "\
commands:
  play <n>   play track n
  next       play the track after the selected one
  prev       play the track before the selected one
  stop       stop playback
  status     print player status as JSON
  tracks     list loaded tracks
  quit       stop and exit";

/// Index of the track `next`/`prev` should select, wrapping around the playlist.
pub fn step_track(selected: Option<usize>, count: usize, forward: bool) -> Option<usize> {
    if count == 0 {
        return None;
    }
    Some(match (selected, forward) {
        (None, true) => 0,
        (None, false) => count - 1,
        (Some(i), true) => (i + 1) % count,
        (Some(i), false) => (i + count - 1) % count,
    })
}
