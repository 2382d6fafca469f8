use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::transcript::strip_ansi;

/// What the assistant is showing in a freshly launched session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScreenState {
    /// Input box is up; context can be typed
    Prompt,
    /// A trust or permission dialog that a bare Enter accepts
    Intermediate,
    /// Still starting up
    #[default]
    Waiting,
}

/// Dialogs shown before the assistant accepts input.
static RE_INTERMEDIATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?mi)(do you trust the files in this folder|yes, proceed|press enter to continue|enter to confirm|trust this folder)",
    )
    .unwrap()
});

/// The assistant's input affordance.
static RE_PROMPT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)(^\s*│?\s*[>❯]\s*│?\s*$|\?\s*for\s*shortcuts|^\s*│\s*>\s)").unwrap()
});

/// Lines inspected, counted from the bottom of the screen.
const RECENT_LINES: usize = 20;

/// Infer the screen state from recent terminal output.
///
/// Dialogs take priority over the prompt since both may be drawn at once.
pub fn detect(output: &str) -> ScreenState {
    let plain = strip_ansi(output);
    let lines: Vec<&str> = plain.lines().rev().take(RECENT_LINES).collect();
    let recent = lines.into_iter().rev().collect::<Vec<_>>().join("\n");

    if RE_INTERMEDIATE.is_match(&recent) {
        return ScreenState::Intermediate;
    }
    if RE_PROMPT.is_match(&recent) {
        return ScreenState::Prompt;
    }
    ScreenState::Waiting
}
