use std::io::{Read, Write};
use std::sync::mpsc;
use std::thread;

use anyhow::{Context, Result};
use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};

use super::{OutputSink, PtyEvent, PtyHandle, PtySpawner, SpawnRequest, Utf8Decoder};

/// Spawns login shells on the host's native PTY system.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeSpawner;

impl PtySpawner for NativeSpawner {
    fn spawn(&self, request: SpawnRequest, sink: OutputSink) -> Result<Box<dyn PtyHandle>> {
        let pair = native_pty_system()
            .openpty(PtySize {
                rows: request.rows,
                cols: request.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .context("Failed to open PTY")?;

        let mut cmd = CommandBuilder::new(&request.shell);
        cmd.arg("-l");
        cmd.cwd(&request.cwd);
        cmd.env("TERM", "xterm-256color");
        cmd.env("COLORTERM", "truecolor");

        let child = pair
            .slave
            .spawn_command(cmd)
            .with_context(|| format!("Failed to spawn {}", request.shell))?;
        // The child holds its own copy of the slave side.
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .context("Failed to get PTY reader")?;
        let writer = pair.master.take_writer().context("Failed to get PTY writer")?;

        let pid = child.process_id();
        thread::Builder::new()
            .name(format!("pty-read-{}", pid.unwrap_or(0)))
            .spawn(move || read_loop(reader, sink))
            .context("Failed to start PTY reader thread")?;

        let (input_tx, input_rx) = mpsc::channel::<Vec<u8>>();
        thread::Builder::new()
            .name(format!("pty-write-{}", pid.unwrap_or(0)))
            .spawn(move || write_loop(writer, input_rx))
            .context("Failed to start PTY writer thread")?;

        tracing::debug!(pid = ?pid, cwd = %request.cwd.display(), "Spawned shell");
        Ok(Box::new(NativePty {
            master: pair.master,
            child,
            input_tx,
        }))
    }
}

fn read_loop(mut reader: Box<dyn Read + Send>, mut sink: OutputSink) {
    let mut decoder = Utf8Decoder::default();
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                let text = decoder.decode(&buf[..n]);
                if !text.is_empty() {
                    sink(PtyEvent::Output(text));
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }
    sink(PtyEvent::Exited);
}

fn write_loop(mut writer: Box<dyn Write + Send>, input: mpsc::Receiver<Vec<u8>>) {
    while let Ok(data) = input.recv() {
        if writer.write_all(&data).and_then(|_| writer.flush()).is_err() {
            break;
        }
    }
}

struct NativePty {
    master: Box<dyn MasterPty + Send>,
    child: Box<dyn Child + Send + Sync>,
    input_tx: mpsc::Sender<Vec<u8>>,
}

impl PtyHandle for NativePty {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.input_tx
            .send(data.to_vec())
            .map_err(|_| anyhow::anyhow!("PTY writer has stopped"))
    }

    fn resize(&mut self, cols: u16, rows: u16) -> Result<()> {
        self.master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .context("Failed to resize PTY")
    }

    fn kill(&mut self) {
        if let Err(e) = self.child.kill() {
            tracing::debug!(error = %e, "Shell already gone");
        }
        let _ = self.child.try_wait();
    }

    fn pid(&self) -> Option<u32> {
        self.child.process_id()
    }
}

impl Drop for NativePty {
    fn drop(&mut self) {
        self.kill();
    }
}
