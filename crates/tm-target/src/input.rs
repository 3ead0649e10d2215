//! Line-buffered console input for `run`

use crate::commands::{InputSource, Key};
use std::io::BufRead;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;

/// Reads stdin on a background thread so the poll loop never blocks on it
///
/// A line consisting of a lone ESC (or `~.`) stops the run; any other line
/// is forwarded to the target followed by a newline.
pub struct StdinLines {
    rx: Receiver<String>,
    closed: bool,
}

impl StdinLines {
    pub fn spawn() -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("tm-stdin".into())
            .spawn(move || {
                for line in std::io::stdin().lock().lines() {
                    let Ok(line) = line else { break };
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            })?;
        Ok(Self { rx, closed: false })
    }

    #[cfg(test)]
    fn from_receiver(rx: Receiver<String>) -> Self {
        Self { rx, closed: false }
    }
}

fn parse_line(line: String) -> Key {
    match line.trim_end_matches('\r') {
        "\x1b" | "~." => Key::Escape,
        _ => Key::Line(line),
    }
}

impl InputSource for StdinLines {
    fn poll_input(&mut self) -> Option<Key> {
        if self.closed {
            return None;
        }
        match self.rx.try_recv() {
            Ok(line) => Some(parse_line(line)),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                tracing::debug!("Console input closed");
                self.closed = true;
                None
            }
        }
    }
}
