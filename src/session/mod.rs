//! Shell sessions and the per-client registry that multiplexes them over
//! a single socket.

mod history;
mod registry;

pub use history::History;
pub use registry::{Outbound, Registry, SessionTarget};

use std::path::PathBuf;

use crate::error::{AppError, AppResult};
use crate::pty::PtyHandle;
use crate::recording::Recorder;

/// Lifecycle of a session's shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    /// The shell exited; the session stays listed until closed.
    Exited,
}

/// One shell tab: a PTY, its redraw history and its recording.
pub struct Session {
    pub id: String,
    pub name: String,
    pub cwd: PathBuf,
    pub history: History,
    pty: Box<dyn PtyHandle>,
    recorder: Option<Recorder>,
    state: SessionState,
}

impl Session {
    pub fn new(
        id: String,
        name: String,
        cwd: PathBuf,
        history_cap: usize,
        pty: Box<dyn PtyHandle>,
        recorder: Option<Recorder>,
    ) -> Self {
        Self {
            id,
            name,
            cwd,
            history: History::new(history_cap),
            pty,
            recorder,
            state: SessionState::Active,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn pid(&self) -> Option<u32> {
        self.pty.pid()
    }

    pub fn recording_id(&self) -> Option<&str> {
        self.recorder.as_ref().map(|r| r.id())
    }

    /// Forward keystrokes to the shell. A no-op once the shell has exited.
    pub fn input(&mut self, data: &str) -> AppResult<()> {
        if self.state == SessionState::Exited {
            return Ok(());
        }
        self.pty
            .write(data.as_bytes())
            .map_err(|e| AppError::Pty(e.to_string()))?;
        if let Some(recorder) = self.recorder.as_mut() {
            if let Err(e) = recorder.record_input(data) {
                tracing::warn!(session_id = %self.id, error = %e, "Failed to record input");
            }
        }
        Ok(())
    }

    /// Resize the PTY. Recorded, but never written to history.
    pub fn resize(&mut self, cols: u16, rows: u16) -> AppResult<()> {
        if self.state == SessionState::Exited {
            return Ok(());
        }
        self.pty
            .resize(cols, rows)
            .map_err(|e| AppError::Pty(e.to_string()))?;
        if let Some(recorder) = self.recorder.as_mut() {
            if let Err(e) = recorder.record_resize(cols, rows) {
                tracing::warn!(session_id = %self.id, error = %e, "Failed to record resize");
            }
        }
        Ok(())
    }

    /// Output from the shell: into history and the recording, synchronously.
    pub fn on_output(&mut self, data: &str) {
        self.history.push(data.to_string());
        if let Some(recorder) = self.recorder.as_mut() {
            if let Err(e) = recorder.record_output(data) {
                tracing::warn!(session_id = %self.id, error = %e, "Failed to record output");
            }
        }
    }

    /// The shell exited on its own. Returns the finalized recording id.
    pub fn on_exit(&mut self) -> Option<String> {
        if self.state == SessionState::Exited {
            return None;
        }
        self.state = SessionState::Exited;
        tracing::info!(session_id = %self.id, "Shell exited");
        self.finish_recording()
    }

    /// Kill the shell and finalize the recording. Returns the recording id
    /// if this call finalized it.
    pub fn close(&mut self) -> Option<String> {
        self.pty.kill();
        self.state = SessionState::Exited;
        self.finish_recording()
    }

    fn finish_recording(&mut self) -> Option<String> {
        let recorder = self.recorder.as_mut()?;
        if recorder.is_finished() {
            return None;
        }
        if let Err(e) = recorder.finish() {
            tracing::warn!(session_id = %self.id, error = %e, "Failed to finalize recording");
        }
        Some(recorder.id().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pty::fake::FakeSpawner;
    use crate::pty::{PtySpawner, SpawnRequest};
    use crate::recording::RecordingStore;

    fn session(spawner: &FakeSpawner, store: &RecordingStore) -> Session {
        let pty = spawner
            .spawn(SpawnRequest::new("/bin/sh", "/".into()), Box::new(|_| {}))
            .unwrap();
        let recorder = store.start_recording("s1", "Main", "/".as_ref()).unwrap();
        Session::new("s1".into(), "Main".into(), "/".into(), 4, pty, Some(recorder))
    }

    #[test]
    fn test_exited_session_ignores_input() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordingStore::new(dir.path().to_path_buf());
        let spawner = FakeSpawner::default();
        let mut session = session(&spawner, &store);

        session.input("ls\r").unwrap();
        let recording_id = session.on_exit().unwrap();
        session.input("pwd\r").unwrap();
        session.resize(100, 30).unwrap();

        assert_eq!(spawner.written(0), "ls\r");
        assert_eq!(spawner.shell(0).lock().size, None);
        let recording = store.load(&recording_id).unwrap();
        assert_eq!(recording.events.len(), 1);
        assert!(recording.ended_at.is_some());
    }

    #[test]
    fn test_close_finalizes_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordingStore::new(dir.path().to_path_buf());
        let spawner = FakeSpawner::default();
        let mut session = session(&spawner, &store);

        session.on_output("hello");
        assert!(session.close().is_some());
        assert!(session.close().is_none());
        assert!(spawner.shell(0).lock().killed);
        assert_eq!(session.history.replay(), "hello");
    }
}
