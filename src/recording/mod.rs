//! Session recordings: the append-only event log a session writes while it
//! runs, plus the summary sidecar derived from it.

mod recorder;
mod store;

pub use recorder::Recorder;
pub use store::{RecordingMeta, RecordingStore};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of a recorded event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    /// Keystrokes sent to the shell
    #[serde(rename = "i")]
    Input,
    /// Bytes the shell produced
    #[serde(rename = "o")]
    Output,
    /// Terminal resize
    #[serde(rename = "r")]
    Resize,
}

/// One immutable entry in a recording.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingEvent {
    /// Milliseconds since the recording started
    pub t: u64,
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cols: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<u16>,
}

impl RecordingEvent {
    pub fn input(t: u64, data: impl Into<String>) -> Self {
        Self {
            t,
            kind: EventKind::Input,
            data: Some(data.into()),
            cols: None,
            rows: None,
        }
    }

    pub fn output(t: u64, data: impl Into<String>) -> Self {
        Self {
            t,
            kind: EventKind::Output,
            data: Some(data.into()),
            cols: None,
            rows: None,
        }
    }

    pub fn resize(t: u64, cols: u16, rows: u16) -> Self {
        Self {
            t,
            kind: EventKind::Resize,
            data: None,
            cols: Some(cols),
            rows: Some(rows),
        }
    }
}

/// Metadata written once when a recording starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingHeader {
    pub id: String,
    pub session_id: String,
    pub session_name: String,
    pub cwd: String,
    pub started_at: DateTime<Utc>,
}

/// A fully loaded recording. `ended_at == None` means the session was
/// interrupted (or is still running).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Recording {
    pub id: String,
    pub session_id: String,
    pub session_name: String,
    pub cwd: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub events: Vec<RecordingEvent>,
}

/// Cached summary of a recording, stored beside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub detail: String,
    pub generated_at: DateTime<Utc>,
    /// Number of events present when the summary was generated
    pub event_count: usize,
}

impl Summary {
    /// A summary goes stale once the recording has grown past it.
    pub fn is_stale(&self, recording: &Recording) -> bool {
        recording.events.len() > self.event_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_format() {
        let json = serde_json::to_string(&RecordingEvent::resize(12, 80, 24)).unwrap();
        assert_eq!(json, r#"{"t":12,"type":"r","cols":80,"rows":24}"#);

        let event: RecordingEvent = serde_json::from_str(r#"{"t":3,"type":"i","data":"l"}"#).unwrap();
        assert_eq!(event, RecordingEvent::input(3, "l"));
    }

    #[test]
    fn test_summary_staleness() {
        let mut recording = Recording {
            id: "r".into(),
            session_id: "s".into(),
            session_name: "Main".into(),
            cwd: "/".into(),
            started_at: Utc::now(),
            ended_at: None,
            events: vec![RecordingEvent::output(0, "a"), RecordingEvent::output(1, "b")],
        };
        let summary = Summary {
            abstract_text: "x".into(),
            detail: "y".into(),
            generated_at: Utc::now(),
            event_count: 2,
        };
        assert!(!summary.is_stale(&recording));
        recording.events.push(RecordingEvent::input(2, "c"));
        assert!(summary.is_stale(&recording));
    }

    #[test]
    fn test_summary_uses_abstract_key() {
        let summary = Summary {
            abstract_text: "short".into(),
            detail: "long".into(),
            generated_at: Utc::now(),
            event_count: 0,
        };
        let value = serde_json::to_value(&summary).unwrap();
        assert_eq!(value["abstract"], "short");
        assert_eq!(value["eventCount"], 0);
    }
}
