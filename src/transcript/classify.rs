use once_cell::sync::Lazy;
use regex::Regex;

use super::ansi::strip_ansi;
use super::input::LineEditor;
use super::rules::{is_box_char, ClassifierConfig, LineContext, RuleScope, RuleSet};
use super::{SegmentKind, TranscriptSegment};
use crate::recording::{EventKind, RecordingEvent};

/// Marker the assistant prints before every response or tool call.
const RESPONSE_MARKER: char = '⏺';

/// `Bash(ls -la)`, `Read(src/main.rs)`, `Web Search("rust pty")`
static RE_TOOL_CALL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z][A-Za-z0-9_]*(?: [A-Z][A-Za-z0-9_]*)*\(.*\)$").unwrap());

static RE_SOURCE_ITEM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^-\s+(?:\[[^\]]*\]\()?<?https?://").unwrap());

const DIAGRAM_TOKENS: &[&str] = &["-->", "<--", "==>", "+--"];
const FLOW_GLYPHS: &[char] = &['│', '▼', '▲', '↓', '↑', '|'];

/// How a line of a content block is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineKind {
    Blank,
    Skip,
    Text,
    Diagram,
    SourcesHeading,
    SourceItem,
}

fn is_diagram_line(line: &str) -> bool {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return false;
    }
    trimmed.chars().any(is_box_char)
        || DIAGRAM_TOKENS.iter().any(|t| trimmed.contains(t))
        || trimmed.chars().all(|c| c.is_whitespace() || FLOW_GLYPHS.contains(&c))
}

/// Diagram content inside a box, ignoring the box's own left/right border.
fn has_diagram_content(line: &str) -> bool {
    let inner = line.trim().trim_start_matches('│').trim_end_matches('│');
    is_diagram_line(inner) && !inner.trim().chars().all(|c| c == '│')
}

/// Accumulates segments, merging consecutive ones of the same kind except
/// for typed lines and tool calls, which stay distinct.
#[derive(Default)]
struct SegmentSink {
    segments: Vec<TranscriptSegment>,
}

impl SegmentSink {
    fn push(&mut self, kind: SegmentKind, text: String) {
        if text.trim().is_empty() {
            return;
        }
        let mergeable = !matches!(kind, SegmentKind::Input | SegmentKind::ToolUse);
        match self.segments.last_mut() {
            Some(last) if mergeable && last.kind == kind => {
                last.text.push('\n');
                last.text.push_str(&text);
            }
            _ => self.segments.push(TranscriptSegment { kind, text }),
        }
    }
}

/// Turns a raw event log into classified transcript segments.
///
/// Pure and deterministic: the same events always give the same segments.
pub struct Classifier {
    config: ClassifierConfig,
    rules: RuleSet,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(ClassifierConfig::default())
    }
}

impl Classifier {
    pub fn new(config: ClassifierConfig) -> Self {
        let rules = RuleSet::new(&config);
        Self { config, rules }
    }

    pub fn classify(&self, events: &[RecordingEvent]) -> Vec<TranscriptSegment> {
        let mut sink = SegmentSink::default();
        let mut editor = LineEditor::new();
        let mut last_noise_line: Option<String> = None;
        let mut swallowed_echo: Option<usize> = None;

        for (idx, event) in events.iter().enumerate() {
            if swallowed_echo == Some(idx) {
                continue;
            }
            let Some(data) = event.data.as_deref() else {
                continue;
            };
            match event.kind {
                EventKind::Input => {
                    for line in editor.feed(data) {
                        if line.trim().is_empty() {
                            continue;
                        }
                        if is_echo_noise(&line, events.get(idx + 1)) {
                            swallowed_echo = Some(idx + 1);
                            continue;
                        }
                        sink.push(SegmentKind::Input, line.trim().to_string());
                    }
                }
                EventKind::Output => {
                    let text = strip_ansi(data);
                    if is_typing_echo(&text, editor.partial()) {
                        continue;
                    }
                    self.classify_burst(&text, &mut sink, &mut last_noise_line);
                }
                EventKind::Resize => {}
            }
        }

        if let Some(line) = editor.take_partial() {
            sink.push(SegmentKind::Input, line.trim().to_string());
        }
        sink.segments
    }

    fn classify_burst(&self, text: &str, sink: &mut SegmentSink, last_noise_line: &mut Option<String>) {
        let head = text.trim_start();
        if head.is_empty() {
            return;
        }
        if head.starts_with(RESPONSE_MARKER) || text.trim().len() >= self.config.content_threshold {
            *last_noise_line = None;
            self.classify_content(text, sink);
        } else {
            self.classify_noise(text, sink, last_noise_line);
        }
    }

    /// Short unmarked bursts: drop UI chrome line by line, keep the rest as
    /// response text.
    fn classify_noise(&self, text: &str, sink: &mut SegmentSink, last_line: &mut Option<String>) {
        let lines: Vec<&str> = text.lines().map(str::trim_end).collect();
        let mut kept = Vec::new();
        for ctx in LineContext::for_lines(&lines) {
            let trimmed = ctx.line.trim();
            if trimmed.is_empty() || !self.rules.keeps(&ctx, RuleScope::Noise, &self.config) {
                continue;
            }
            if last_line.as_deref() == Some(trimmed) {
                continue;
            }
            *last_line = Some(trimmed.to_string());
            kept.push(trimmed);
        }
        if !kept.is_empty() {
            sink.push(SegmentKind::Response, kept.join("\n"));
        }
    }

    /// Marked or large bursts: split into response/tool-use text, diagrams
    /// and source lists.
    fn classify_content(&self, text: &str, sink: &mut SegmentSink) {
        let lines: Vec<String> = text
            .lines()
            .map(|l| match l.trim_start().strip_prefix(RESPONSE_MARKER) {
                Some(rest) => rest.trim().to_string(),
                None => l.trim_end().to_string(),
            })
            .collect();
        let kinds = self.line_kinds(&lines);

        let block_kind = match kinds.iter().position(|k| *k == LineKind::Text) {
            Some(first) if RE_TOOL_CALL.is_match(lines[first].trim()) => SegmentKind::ToolUse,
            _ => SegmentKind::Response,
        };
        emit_blocks(&lines, &kinds, block_kind, sink);
    }

    fn line_kinds(&self, lines: &[String]) -> Vec<LineKind> {
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        let chrome = chrome_box_mask(&refs);

        let mut kinds: Vec<LineKind> = LineContext::for_lines(&refs)
            .iter()
            .zip(chrome)
            .map(|(ctx, in_chrome_box)| {
                let trimmed = ctx.line.trim();
                if trimmed.is_empty() {
                    LineKind::Blank
                } else if in_chrome_box || !self.rules.keeps(ctx, RuleScope::All, &self.config) {
                    LineKind::Skip
                } else if trimmed == "Sources:" {
                    LineKind::SourcesHeading
                } else if RE_SOURCE_ITEM.is_match(trimmed) {
                    LineKind::SourceItem
                } else if is_diagram_line(ctx.line) {
                    LineKind::Diagram
                } else {
                    LineKind::Text
                }
            })
            .collect();

        // Items only count as sources under a heading.
        let mut under_heading = false;
        for kind in kinds.iter_mut() {
            match kind {
                LineKind::SourcesHeading => under_heading = true,
                LineKind::SourceItem if !under_heading => *kind = LineKind::Text,
                LineKind::SourceItem | LineKind::Blank => {}
                _ => under_heading = false,
            }
        }

        absorb_diagram_labels(&mut kinds);
        kinds
    }
}

/// Walk classified lines and push one segment per run.
fn emit_blocks(lines: &[String], kinds: &[LineKind], block_kind: SegmentKind, sink: &mut SegmentSink) {
    let mut i = 0;
    while i < lines.len() {
        match kinds[i] {
            LineKind::Blank | LineKind::Skip => i += 1,
            LineKind::Diagram => {
                let start = i;
                while i < lines.len() && matches!(kinds[i], LineKind::Diagram) {
                    i += 1;
                }
                sink.push(SegmentKind::AsciiArt, dedent(&lines[start..i]));
            }
            LineKind::SourcesHeading | LineKind::SourceItem => {
                let mut items = Vec::new();
                while i < lines.len()
                    && matches!(
                        kinds[i],
                        LineKind::SourcesHeading | LineKind::SourceItem | LineKind::Blank
                    )
                {
                    if kinds[i] == LineKind::SourceItem {
                        items.push(lines[i].trim().to_string());
                    }
                    i += 1;
                }
                sink.push(SegmentKind::Sources, items.join("\n"));
            }
            LineKind::Text => {
                let mut paragraph: Vec<&str> = Vec::new();
                let mut pending_blank = false;
                while i < lines.len() && matches!(kinds[i], LineKind::Text | LineKind::Blank | LineKind::Skip) {
                    match kinds[i] {
                        LineKind::Text => {
                            if pending_blank && !paragraph.is_empty() {
                                paragraph.push("");
                            }
                            pending_blank = false;
                            paragraph.push(lines[i].trim().trim_start_matches('⎿').trim());
                        }
                        LineKind::Blank => pending_blank = true,
                        _ => {}
                    }
                    i += 1;
                }
                sink.push(block_kind, paragraph.join("\n"));
            }
        }
    }
}

/// Text and blank lines sandwiched between two diagram lines are labels
/// within the diagram.
fn absorb_diagram_labels(kinds: &mut [LineKind]) {
    let mut last_diagram: Option<usize> = None;
    for i in 0..kinds.len() {
        match kinds[i] {
            LineKind::Diagram => {
                if let Some(prev) = last_diagram {
                    let gap = &kinds[prev + 1..i];
                    if gap.iter().all(|k| matches!(k, LineKind::Text | LineKind::Blank)) {
                        for k in &mut kinds[prev + 1..i] {
                            *k = LineKind::Diagram;
                        }
                    }
                }
                last_diagram = Some(i);
            }
            LineKind::Text | LineKind::Blank => {}
            _ => last_diagram = None,
        }
    }
}

/// Marks rounded TUI boxes (`╭ … ╰`) whose interior holds no diagram.
fn chrome_box_mask(lines: &[&str]) -> Vec<bool> {
    let mut mask = vec![false; lines.len()];
    let mut i = 0;
    while i < lines.len() {
        if lines[i].trim_start().starts_with('╭') {
            if let Some(end) = (i + 1..lines.len()).find(|&j| lines[j].trim_start().starts_with('╰')) {
                if !lines[i + 1..end].iter().any(|l| has_diagram_content(l)) {
                    mask[i..=end].iter_mut().for_each(|m| *m = true);
                }
                i = end + 1;
                continue;
            }
        }
        i += 1;
    }
    mask
}

/// Remove the common indentation, keeping each line's relative offset.
fn dedent(lines: &[String]) -> String {
    let indent = lines
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.chars().take_while(|c| c.is_whitespace()).count())
        .min()
        .unwrap_or(0);
    let body: Vec<String> = lines
        .iter()
        .map(|l| l.chars().skip(indent).collect::<String>().trim_end().to_string())
        .collect();
    let start = body.iter().position(|l| !l.is_empty()).unwrap_or(body.len());
    let end = body.iter().rposition(|l| !l.is_empty()).map_or(start, |e| e + 1);
    body[start..end].join("\n")
}

/// A one-character line answered by the same single character on output
/// is the terminal echoing a keystroke, not something worth keeping.
fn is_echo_noise(line: &str, next: Option<&RecordingEvent>) -> bool {
    let mut chars = line.chars();
    let (Some(only), None) = (chars.next(), chars.next()) else {
        return false;
    };
    next.filter(|e| e.kind == EventKind::Output)
        .and_then(|e| e.data.as_deref())
        .is_some_and(|data| {
            let echoed = strip_ansi(data);
            let mut echoed = echoed.trim().chars();
            echoed.next() == Some(only) && echoed.next().is_none()
        })
}

/// Output that merely repeats what is being typed on the current line.
fn is_typing_echo(output: &str, partial: &str) -> bool {
    let visible = output.trim();
    !visible.is_empty() && !partial.is_empty() && partial.ends_with(visible)
}
