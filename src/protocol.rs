use serde::{Deserialize, Serialize};

use crate::diff::DiffPart;
use crate::files::DirEntry;
use crate::replay::ReplayPhase;

/// Messages a browser sends over the socket
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Open a new shell tab
    CreateSession {
        #[serde(default)]
        name: Option<String>,
    },
    /// Make another tab the one whose output is forwarded
    SwitchSession { session_id: String },
    /// Kill a tab's shell and drop it
    CloseSession { session_id: String },
    RenameSession { session_id: String, name: String },
    /// Ask whether an assistant is running in the active tab
    CheckClaudeRunning,
    /// Grammar-correct a piece of text before it is typed
    CorrectEnglish {
        session_id: String,
        text: String,
        #[serde(default)]
        mode: Option<String>,
    },
    /// Keystrokes for a tab
    Input { session_id: String, data: String },
    Resize {
        session_id: String,
        cols: u16,
        rows: u16,
    },
    GetCwd { session_id: String },
    ListDirectory {
        path: String,
        #[serde(default)]
        show_hidden: bool,
    },
    ReadFile { path: String },
    WatchFile { path: String },
    UnwatchFile { path: String },
    /// Replay a past recording into a fresh tab
    BringBack {
        recording_id: String,
        #[serde(default)]
        use_summary: bool,
    },
    CancelBringBack,
}

/// Messages the server pushes to the attached socket
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    SessionCreated {
        id: String,
        name: String,
    },
    SessionSwitched {
        id: String,
    },
    SessionClosed {
        id: String,
    },
    SessionRenamed {
        id: String,
        name: String,
    },
    /// Wipe the visible terminal before a history replay
    Clear {
        session_id: String,
    },
    Output {
        session_id: String,
        data: String,
    },
    CorrectionResult {
        session_id: String,
        original: String,
        corrected: String,
        diff: Vec<DiffPart>,
    },
    CorrectionError {
        session_id: String,
        original: String,
        error: String,
    },
    ClaudeRunningStatus {
        running: bool,
    },
    CwdResult {
        cwd: String,
        home: String,
    },
    DirectoryListing {
        path: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        entries: Option<Vec<DirEntry>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    FileContent {
        path: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    FileUpdate {
        path: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    RecordingStarted {
        session_id: String,
        recording_id: String,
    },
    RecordingStopped {
        session_id: String,
        recording_id: String,
    },
    BringBackStatus {
        recording_id: String,
        state: ReplayPhase,
    },
    /// A frame could not be decoded; the socket stays open
    Error {
        message: String,
    },
}

impl ServerMessage {
    pub fn to_json(&self) -> String {
        // Every variant is plain strings/numbers, serialization cannot fail.
        serde_json::to_string(self).unwrap_or_else(|e| {
            serde_json::json!({ "type": "error", "message": e.to_string() }).to_string()
        })
    }
}
