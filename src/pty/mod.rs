//! Pseudo-terminal processes behind a small trait seam, so the session
//! layer can be exercised without spawning real shells.

#[cfg(test)]
pub mod fake;
mod native;
pub mod probe;

pub use native::NativeSpawner;

use std::path::PathBuf;

use anyhow::Result;

/// What the reader side of a PTY reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PtyEvent {
    /// Decoded output, in the order the child produced it
    Output(String),
    /// EOF on the master side; the child is gone
    Exited,
}

/// Receives events from the PTY's reader thread, synchronously.
pub type OutputSink = Box<dyn FnMut(PtyEvent) + Send>;

#[derive(Debug, Clone)]
pub struct SpawnRequest {
    pub shell: String,
    pub cwd: PathBuf,
    pub cols: u16,
    pub rows: u16,
}

impl SpawnRequest {
    pub fn new(shell: impl Into<String>, cwd: PathBuf) -> Self {
        Self {
            shell: shell.into(),
            cwd,
            cols: 80,
            rows: 24,
        }
    }
}

/// A running shell attached to a PTY.
pub trait PtyHandle: Send {
    /// Queue bytes for the child's stdin. Never blocks on the child.
    fn write(&mut self, data: &[u8]) -> Result<()>;
    fn resize(&mut self, cols: u16, rows: u16) -> Result<()>;
    fn kill(&mut self);
    fn pid(&self) -> Option<u32>;
}

pub trait PtySpawner: Send + Sync {
    fn spawn(&self, request: SpawnRequest, sink: OutputSink) -> Result<Box<dyn PtyHandle>>;
}

/// Incremental UTF-8 decoding across read boundaries: a multi-byte
/// character split between two reads is held back until complete.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        match std::str::from_utf8(&self.pending) {
            Ok(text) => {
                let text = text.to_string();
                self.pending.clear();
                text
            }
            // Incomplete sequence at the end: emit the valid prefix only.
            Err(e) if e.error_len().is_none() => {
                let valid = e.valid_up_to();
                let text = String::from_utf8_lossy(&self.pending[..valid]).into_owned();
                self.pending.drain(..valid);
                text
            }
            Err(_) => {
                let text = String::from_utf8_lossy(&self.pending).into_owned();
                self.pending.clear();
                text
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_multibyte_char_is_held_back() {
        let mut decoder = Utf8Decoder::default();
        let bytes = "⏺ done".as_bytes();
        assert_eq!(decoder.decode(&bytes[..2]), "");
        assert_eq!(decoder.decode(&bytes[2..]), "⏺ done");
    }

    #[test]
    fn test_invalid_bytes_are_replaced() {
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.decode(b"ok\xff!"), "ok\u{fffd}!");
        assert_eq!(decoder.decode(b"next"), "next");
    }
}
