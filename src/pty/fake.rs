//! In-memory PTY used by unit tests.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;

use super::{OutputSink, PtyEvent, PtyHandle, PtySpawner, SpawnRequest};

/// Observable state of one fake shell.
#[derive(Default)]
pub struct FakeShell {
    pub cwd: PathBuf,
    pub written: Vec<u8>,
    pub size: Option<(u16, u16)>,
    pub killed: bool,
    sink: Option<OutputSink>,
}

/// Records every spawn; tests drive output through [`FakeSpawner::emit`].
#[derive(Clone, Default)]
pub struct FakeSpawner {
    shells: Arc<Mutex<Vec<Arc<Mutex<FakeShell>>>>>,
}

impl FakeSpawner {
    pub fn count(&self) -> usize {
        self.shells.lock().len()
    }

    pub fn shell(&self, index: usize) -> Arc<Mutex<FakeShell>> {
        self.shells.lock()[index].clone()
    }

    pub fn written(&self, index: usize) -> String {
        String::from_utf8_lossy(&self.shell(index).lock().written).into_owned()
    }

    /// Deliver output as if the child had produced it.
    pub fn emit(&self, index: usize, text: &str) {
        self.deliver(index, PtyEvent::Output(text.to_string()));
    }

    pub fn exit(&self, index: usize) {
        self.deliver(index, PtyEvent::Exited);
    }

    fn deliver(&self, index: usize, event: PtyEvent) {
        // Take the sink out so the callback never runs under the shell lock.
        let shell = self.shell(index);
        let sink = shell.lock().sink.take();
        if let Some(mut sink) = sink {
            sink(event);
            shell.lock().sink = Some(sink);
        }
    }
}

impl PtySpawner for FakeSpawner {
    fn spawn(&self, request: SpawnRequest, sink: OutputSink) -> Result<Box<dyn PtyHandle>> {
        let shell = Arc::new(Mutex::new(FakeShell {
            cwd: request.cwd,
            sink: Some(sink),
            ..FakeShell::default()
        }));
        self.shells.lock().push(shell.clone());
        Ok(Box::new(FakeHandle { shell }))
    }
}

struct FakeHandle {
    shell: Arc<Mutex<FakeShell>>,
}

impl PtyHandle for FakeHandle {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.shell.lock().written.extend_from_slice(data);
        Ok(())
    }

    fn resize(&mut self, cols: u16, rows: u16) -> Result<()> {
        self.shell.lock().size = Some((cols, rows));
        Ok(())
    }

    fn kill(&mut self) {
        self.shell.lock().killed = true;
    }

    fn pid(&self) -> Option<u32> {
        None
    }
}
