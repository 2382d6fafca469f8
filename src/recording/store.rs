use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use super::{Recorder, Recording, RecordingEvent, RecordingHeader, Summary};
use crate::error::{AppError, AppResult};

const RECORDING_EXT: &str = "jsonl";
const SUMMARY_SUFFIX: &str = ".summary.json";

/// Body lines after the header: either an event or the closing footer.
#[derive(Deserialize)]
#[serde(untagged)]
enum BodyLine {
    Event(RecordingEvent),
    Footer {
        #[serde(rename = "endedAt")]
        ended_at: DateTime<Utc>,
    },
}

/// Listing entry for a stored recording.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingMeta {
    pub id: String,
    pub session_id: String,
    pub session_name: String,
    pub cwd: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub event_count: usize,
    pub has_summary: bool,
    pub summary_stale: bool,
}

/// Directory-backed store: `<id>.jsonl` event logs with
/// `<id>.summary.json` sidecars.
#[derive(Debug, Clone)]
pub struct RecordingStore {
    dir: PathBuf,
}

impl RecordingStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create recordings directory: {:?}", self.dir))
    }

    /// Ids are generated by us; anything else is rejected so an id can
    /// never be used to address a path outside the store.
    fn checked_id(id: &str) -> AppResult<&str> {
        if !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            Ok(id)
        } else {
            Err(AppError::UnknownRecording(id.to_string()))
        }
    }

    fn events_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", id, RECORDING_EXT))
    }

    fn summary_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}{}", id, SUMMARY_SUFFIX))
    }

    /// Begin a new recording for a session.
    pub fn start_recording(&self, session_id: &str, session_name: &str, cwd: &Path) -> Result<Recorder> {
        self.ensure_dir()?;
        let header = RecordingHeader {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            session_name: session_name.to_string(),
            cwd: cwd.to_string_lossy().to_string(),
            started_at: Utc::now(),
        };
        Recorder::create(self.events_path(&header.id), &header)
    }

    /// Load a recording. Malformed body lines are skipped so one bad line
    /// never hides the events around it.
    pub fn load(&self, id: &str) -> AppResult<Recording> {
        let id = Self::checked_id(id)?;
        let path = self.events_path(id);
        let file = fs::File::open(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => AppError::UnknownRecording(id.to_string()),
            _ => AppError::Storage(e.to_string()),
        })?;
        let mut lines = BufReader::new(file).lines();

        let header_line = lines
            .next()
            .ok_or_else(|| AppError::Storage(format!("recording {} is empty", id)))?
            .map_err(|e| AppError::Storage(e.to_string()))?;
        let header: RecordingHeader = serde_json::from_str(&header_line)
            .map_err(|e| AppError::Storage(format!("invalid recording header: {}", e)))?;

        let mut events = Vec::new();
        let mut ended_at = None;
        for (number, line) in lines.enumerate() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    tracing::warn!(recording_id = %id, error = %e, "Stopped reading recording");
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<BodyLine>(&line) {
                Ok(BodyLine::Event(event)) => events.push(event),
                Ok(BodyLine::Footer { ended_at: at }) => ended_at = Some(at),
                Err(e) => {
                    tracing::warn!(recording_id = %id, line = number + 2, error = %e, "Skipping malformed recording line");
                }
            }
        }

        Ok(Recording {
            id: header.id,
            session_id: header.session_id,
            session_name: header.session_name,
            cwd: header.cwd,
            started_at: header.started_at,
            ended_at,
            events,
        })
    }

    /// All recordings, newest first.
    pub fn list(&self) -> AppResult<Vec<RecordingMeta>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut metas = Vec::new();
        for entry in WalkDir::new(&self.dir).min_depth(1).max_depth(1).into_iter().flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORDING_EXT) {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match self.load(id) {
                Ok(recording) => {
                    let summary = self.load_summary(id).unwrap_or(None);
                    metas.push(RecordingMeta {
                        summary_stale: summary.as_ref().is_some_and(|s| s.is_stale(&recording)),
                        has_summary: summary.is_some(),
                        event_count: recording.events.len(),
                        id: recording.id,
                        session_id: recording.session_id,
                        session_name: recording.session_name,
                        cwd: recording.cwd,
                        started_at: recording.started_at,
                        ended_at: recording.ended_at,
                    });
                }
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable recording"),
            }
        }
        metas.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(metas)
    }

    /// Remove a recording together with its cached summary.
    pub fn delete(&self, id: &str) -> AppResult<()> {
        let id = Self::checked_id(id)?;
        fs::remove_file(self.events_path(id)).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => AppError::UnknownRecording(id.to_string()),
            _ => AppError::Storage(e.to_string()),
        })?;
        match fs::remove_file(self.summary_path(id)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(AppError::Storage(e.to_string())),
        }
        tracing::info!(recording_id = %id, "Recording deleted");
        Ok(())
    }

    pub fn load_summary(&self, id: &str) -> AppResult<Option<Summary>> {
        let id = Self::checked_id(id)?;
        match fs::read_to_string(self.summary_path(id)) {
            Ok(content) => serde_json::from_str(&content)
                .map(Some)
                .map_err(|e| AppError::Storage(format!("invalid summary: {}", e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Storage(e.to_string())),
        }
    }

    /// Write the sidecar via a temp file and rename, never touching the
    /// event log.
    pub fn save_summary(&self, id: &str, summary: &Summary) -> AppResult<()> {
        let id = Self::checked_id(id)?;
        if !self.events_path(id).exists() {
            return Err(AppError::UnknownRecording(id.to_string()));
        }
        let body = serde_json::to_string_pretty(summary).map_err(|e| AppError::Storage(e.to_string()))?;
        let target = self.summary_path(id);
        let tmp = target.with_extension("json.tmp");
        fs::write(&tmp, body).map_err(|e| AppError::Storage(e.to_string()))?;
        fs::rename(&tmp, &target).map_err(|e| AppError::Storage(e.to_string()))?;
        Ok(())
    }
}
