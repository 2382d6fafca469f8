//! Turns a recording's raw terminal bytes into a readable transcript.
//!
//! Typed lines are rebuilt from keystrokes; output bursts are split into
//! assistant responses, tool calls, diagrams and source lists, with the
//! assistant UI's chrome filtered out.

mod ansi;
mod classify;
mod input;
mod rules;

pub use ansi::strip_ansi;
pub use classify::Classifier;
pub use rules::ClassifierConfig;

use serde::{Deserialize, Serialize};

/// Prefix placed in front of a transcript whose head was cut off.
pub const TRUNCATION_MARKER: &str = "... (truncated)\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SegmentKind {
    Input,
    Response,
    ToolUse,
    AsciiArt,
    Sources,
}

impl SegmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SegmentKind::Input => "input",
            SegmentKind::Response => "response",
            SegmentKind::ToolUse => "tool-use",
            SegmentKind::AsciiArt => "ascii-art",
            SegmentKind::Sources => "sources",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    #[serde(rename = "type")]
    pub kind: SegmentKind,
    pub text: String,
}

/// Plain-text rendering used as LLM context and for bring-back.
pub fn format_transcript(segments: &[TranscriptSegment]) -> String {
    let mut out = String::new();
    for segment in segments {
        out.push('[');
        out.push_str(segment.kind.as_str());
        out.push_str("] ");
        out.push_str(&segment.text);
        out.push('\n');
    }
    out
}

/// Keep whole lines from the most recent `ceiling` bytes. A line cut by the
/// window is dropped, so a final line longer than `ceiling` leaves only the
/// marker.
pub fn truncate_transcript(text: &str, ceiling: usize) -> String {
    if text.len() <= ceiling {
        return text.to_string();
    }
    let mut cut = text.len() - ceiling;
    while !text.is_char_boundary(cut) {
        cut += 1;
    }
    let tail = &text[cut..];
    let tail = if text[..cut].ends_with('\n') {
        tail
    } else {
        tail.find('\n').map_or("", |pos| &tail[pos + 1..])
    };
    format!("{}{}", TRUNCATION_MARKER, tail)
}
