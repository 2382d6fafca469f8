use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;

use super::{RecordingEvent, RecordingHeader};

/// Footer line written when a recording is finalized.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct Footer {
    pub ended_at: chrono::DateTime<Utc>,
}

/// Appends timestamped events for one session to a JSON-lines file.
///
/// The file starts with a header line, gets one line per event, and ends
/// with a footer carrying `endedAt` once [`Recorder::finish`] runs. A file
/// without a footer is an interrupted recording. Dropping a recorder does
/// not finalize it.
pub struct Recorder {
    id: String,
    writer: BufWriter<File>,
    start_time: Instant,
    event_count: usize,
    finished: bool,
    path: PathBuf,
}

impl Recorder {
    /// Create the recording file and write its header.
    pub fn create(path: PathBuf, header: &RecordingHeader) -> Result<Self> {
        let file = File::create(&path)
            .with_context(|| format!("Failed to create recording file: {:?}", path))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, header).context("Failed to write recording header")?;
        writer.write_all(b"\n")?;
        writer.flush().context("Failed to flush recording header")?;

        tracing::info!(
            recording_id = %header.id,
            session_id = %header.session_id,
            path = %path.display(),
            "Recording started"
        );

        Ok(Self {
            id: header.id.clone(),
            writer,
            start_time: Instant::now(),
            event_count: 0,
            finished: false,
            path,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    #[cfg(test)]
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    #[cfg(test)]
    pub fn event_count(&self) -> usize {
        self.event_count
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn elapsed_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    pub fn record_input(&mut self, data: &str) -> Result<()> {
        let event = RecordingEvent::input(self.elapsed_ms(), data);
        self.append(&event)
    }

    pub fn record_output(&mut self, data: &str) -> Result<()> {
        let event = RecordingEvent::output(self.elapsed_ms(), data);
        self.append(&event)
    }

    pub fn record_resize(&mut self, cols: u16, rows: u16) -> Result<()> {
        let event = RecordingEvent::resize(self.elapsed_ms(), cols, rows);
        self.append(&event)
    }

    fn append(&mut self, event: &RecordingEvent) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        serde_json::to_writer(&mut self.writer, event).context("Failed to write recording event")?;
        self.writer.write_all(b"\n")?;
        // Each line is flushed so an abrupt exit keeps everything appended so far.
        self.writer.flush().context("Failed to flush recording event")?;
        self.event_count += 1;
        Ok(())
    }

    /// Stamp `endedAt` and close the log. Further appends are ignored.
    pub fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        let footer = Footer {
            ended_at: Utc::now(),
        };
        serde_json::to_writer(&mut self.writer, &footer).context("Failed to write recording footer")?;
        self.writer.write_all(b"\n")?;
        self.writer.flush().context("Failed to flush recording")?;
        tracing::info!(
            recording_id = %self.id,
            path = %self.path.display(),
            events = self.event_count,
            duration_secs = self.start_time.elapsed().as_secs_f64(),
            "Recording finished"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::EventKind;

    fn header(id: &str) -> RecordingHeader {
        RecordingHeader {
            id: id.into(),
            session_id: "s1".into(),
            session_name: "Main".into(),
            cwd: "/home/me".into(),
            started_at: Utc::now(),
        }
    }

    #[test]
    fn test_events_are_appended_in_order() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("r1.jsonl");
        let mut recorder = Recorder::create(path.clone(), &header("r1"))?;
        recorder.record_input("ls\r")?;
        recorder.record_output("file.txt\r\n")?;
        recorder.record_resize(100, 30)?;
        assert_eq!(recorder.event_count(), 3);

        let content = std::fs::read_to_string(&path)?;
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 4);
        let kinds: Vec<EventKind> = lines[1..]
            .iter()
            .map(|l| serde_json::from_str::<RecordingEvent>(l).unwrap().kind)
            .collect();
        assert_eq!(kinds, vec![EventKind::Input, EventKind::Output, EventKind::Resize]);
        Ok(())
    }

    #[test]
    fn test_finish_writes_footer_once_and_freezes() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("r2.jsonl");
        let mut recorder = Recorder::create(path.clone(), &header("r2"))?;
        recorder.record_output("hello")?;
        recorder.finish()?;
        recorder.finish()?;
        recorder.record_output("ignored")?;
        assert!(recorder.is_finished());
        assert_eq!(recorder.event_count(), 1);

        let content = std::fs::read_to_string(&path)?;
        assert_eq!(content.lines().count(), 3);
        assert!(content.lines().last().unwrap().contains("endedAt"));
        Ok(())
    }

    #[test]
    fn test_drop_leaves_recording_unfinished() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("r3.jsonl");
        {
            let mut recorder = Recorder::create(path.clone(), &header("r3"))?;
            recorder.record_output("partial")?;
        }
        let content = std::fs::read_to_string(&path)?;
        assert!(!content.contains("endedAt"));
        Ok(())
    }
}
