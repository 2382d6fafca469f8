//! Line-level noise rules, evaluated top to bottom; the first match decides.

use std::path::Path;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Tunable vocabulary and thresholds for the classifier.
///
/// The defaults follow the assistant CLI's current chrome; they are data
/// because that vocabulary keeps growing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClassifierConfig {
    /// Output bursts at least this long (after stripping escapes) are content.
    pub content_threshold: usize,
    /// Status verbs shown with a trailing ellipsis while the assistant works.
    pub spinner_words: Vec<String>,
    /// Glyphs the spinner cycles through.
    pub spinner_glyphs: String,
    /// Widest `│` table line still treated as tabular data.
    pub table_max_width: usize,
    /// Additional regexes whose matching lines are dropped from noise bursts.
    pub extra_noise_patterns: Vec<String>,
}

const DEFAULT_SPINNER_WORDS: &[&str] = &[
    "Accomplishing", "Actioning", "Actualizing", "Baking", "Booping", "Brewing",
    "Calculating", "Cerebrating", "Channelling", "Churning", "Clauding", "Coalescing",
    "Cogitating", "Combobulating", "Computing", "Concocting", "Conjuring", "Considering",
    "Contemplating", "Cooking", "Crafting", "Creating", "Crunching", "Deciphering",
    "Deliberating", "Determining", "Discombobulating", "Doing", "Effecting", "Elucidating",
    "Enchanting", "Envisioning", "Finagling", "Flibbertigibbeting", "Forging", "Forming",
    "Frolicking", "Generating", "Germinating", "Hatching", "Herding", "Honking", "Hustling",
    "Ideating", "Imagining", "Incubating", "Inferring", "Jiving", "Manifesting", "Marinating",
    "Meandering", "Moseying", "Mulling", "Musing", "Mustering", "Noodling", "Percolating",
    "Perusing", "Philosophising", "Pondering", "Pontificating", "Processing", "Puttering",
    "Puzzling", "Reticulating", "Ruminating", "Scheming", "Schlepping", "Shimmying",
    "Shucking", "Simmering", "Smooshing", "Spelunking", "Spinning", "Stewing", "Sussing",
    "Synthesizing", "Thinking", "Tinkering", "Transmuting", "Unfurling", "Vibing",
    "Wandering", "Whirring", "Wibbling", "Wizarding", "Working", "Wrangling",
];

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            content_threshold: 200,
            spinner_words: DEFAULT_SPINNER_WORDS.iter().map(|w| w.to_string()).collect(),
            spinner_glyphs: "✢✳✶✻✽✺·∗*".to_string(),
            table_max_width: 160,
            extra_noise_patterns: Vec::new(),
        }
    }
}

impl ClassifierConfig {
    /// Load overrides from JSON; missing keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {:?}", path))?;
        let config: Self = serde_json::from_str(&content).context("Invalid classifier config")?;
        for pattern in &config.extra_noise_patterns {
            Regex::new(pattern).with_context(|| format!("Invalid noise pattern {:?}", pattern))?;
        }
        Ok(config)
    }
}

/// What a matching rule does with the line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleAction {
    Keep,
    Drop,
}

/// Which bursts a rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleScope {
    /// Only short, unmarked bursts
    Noise,
    /// Noise bursts and content blocks alike
    All,
}

/// A line with its raw neighbours, for rules that need context.
#[derive(Debug, Clone, Copy)]
pub struct LineContext<'a> {
    pub line: &'a str,
    pub prev: Option<&'a str>,
    pub next: Option<&'a str>,
}

impl<'a> LineContext<'a> {
    /// Build contexts for every line of a burst.
    pub fn for_lines(lines: &'a [&'a str]) -> Vec<LineContext<'a>> {
        (0..lines.len())
            .map(|i| LineContext {
                line: lines[i],
                prev: i.checked_sub(1).map(|p| lines[p]),
                next: lines.get(i + 1).copied(),
            })
            .collect()
    }
}

type ShapeTest = fn(&LineContext<'_>, &ClassifierConfig) -> bool;

enum LineTest {
    Pattern(Regex),
    Shape(ShapeTest),
}

pub struct NoiseRule {
    pub name: &'static str,
    pub action: RuleAction,
    pub scope: RuleScope,
    test: LineTest,
}

impl NoiseRule {
    fn pattern(name: &'static str, scope: RuleScope, regex: Regex) -> Self {
        Self {
            name,
            action: RuleAction::Drop,
            scope,
            test: LineTest::Pattern(regex),
        }
    }

    fn shape(name: &'static str, action: RuleAction, scope: RuleScope, test: ShapeTest) -> Self {
        Self {
            name,
            action,
            scope,
            test: LineTest::Shape(test),
        }
    }

    fn matches(&self, ctx: &LineContext<'_>, config: &ClassifierConfig) -> bool {
        match &self.test {
            LineTest::Pattern(regex) => regex.is_match(ctx.line.trim()),
            LineTest::Shape(test) => test(ctx, config),
        }
    }
}

static RE_THINKING: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^\(?thinking\)?(…|\.\.\.)?$").unwrap());
static RE_INTERRUPT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)esc\s*to\s*interrupt").unwrap());
static RE_SHORTCUTS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\?\s*for\s*shortcuts").unwrap());
static RE_TOKENS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)[↑↓]\s*[\d.,]+\s*k?\s*tokens|^[(·\s]*[\d.,]+\s*k?\s+tokens\b").unwrap()
});
static RE_SEARCHES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Did \d+ search(es)? in [\d.]+\s*m?s").unwrap());
static RE_PERMISSION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(do you want to (proceed|make this edit|create|allow|fetch|run)\b|[❯>]?\s*\d\.\s+(yes|no)\b|.*don't ask again|.*tell claude what to do differently|esc to cancel)",
    )
    .unwrap()
});
static RE_FETCH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(⎿\s*)?(Fetching…?|Fetch\(|Received\s+[\d.]+\s*[KMG]?B\b)").unwrap()
});

pub fn is_box_char(c: char) -> bool {
    ('\u{2500}'..='\u{257f}').contains(&c)
}

/// Only box-drawing characters and whitespace.
pub fn is_border_only(line: &str) -> bool {
    let trimmed = line.trim();
    !trimmed.is_empty() && trimmed.chars().all(|c| is_box_char(c) || c.is_whitespace())
}

fn has_text(line: &str) -> bool {
    line.chars().any(|c| !is_box_char(c) && !c.is_whitespace())
}

/// `│ a │ b │`: bordered on both ends with at least two cells.
pub fn is_table_row(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.starts_with('│')
        && trimmed.ends_with('│')
        && trimmed.matches('│').count() >= 3
        && has_text(trimmed)
}

/// `│ text │`: a single bordered cell, as drawn by TUI info boxes.
fn is_box_line(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.chars().count() > 1
        && trimmed.starts_with('│')
        && trimmed.ends_with('│')
        && trimmed.matches('│').count() == 2
}

fn table_row(ctx: &LineContext<'_>, config: &ClassifierConfig) -> bool {
    ctx.line.trim().chars().count() <= config.table_max_width && is_table_row(ctx.line)
}

fn table_separator(ctx: &LineContext<'_>, config: &ClassifierConfig) -> bool {
    ctx.line.trim().chars().count() <= config.table_max_width
        && is_border_only(ctx.line)
        && (ctx.prev.is_some_and(is_table_row) || ctx.next.is_some_and(is_table_row))
}

fn prompt_glyph(ctx: &LineContext<'_>, _: &ClassifierConfig) -> bool {
    ctx.line.contains('❯')
}

/// The input line or a selection cursor: `❯` leads the line.
fn prompt_cursor(ctx: &LineContext<'_>, _: &ClassifierConfig) -> bool {
    ctx.line.trim_start().starts_with('❯')
}

fn spinner_glyph_only(ctx: &LineContext<'_>, config: &ClassifierConfig) -> bool {
    let trimmed = ctx.line.trim();
    !trimmed.is_empty()
        && trimmed
            .chars()
            .all(|c| c.is_whitespace() || config.spinner_glyphs.contains(c))
}

fn box_border(ctx: &LineContext<'_>, _: &ClassifierConfig) -> bool {
    is_border_only(ctx.line)
}

fn box_line(ctx: &LineContext<'_>, _: &ClassifierConfig) -> bool {
    is_box_line(ctx.line)
}

/// Mostly whitespace with scattered 1-3 character tokens, left behind by
/// cursor-addressed redraws.
fn cursor_fragment(ctx: &LineContext<'_>, _: &ClassifierConfig) -> bool {
    let line = ctx.line.trim_end();
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.is_empty() {
        return false;
    }
    if tokens.len() == 1 {
        let mut chars = tokens[0].chars();
        return matches!((chars.next(), chars.next()), (Some(c), None) if !c.is_alphanumeric());
    }
    let total = line.chars().count();
    let blank = line.chars().filter(|c| c.is_whitespace()).count();
    tokens.iter().all(|t| t.chars().count() <= 3) && blank * 2 >= total
}

/// The ordered rule table for one classifier configuration.
pub struct RuleSet {
    rules: Vec<NoiseRule>,
}

impl RuleSet {
    pub fn new(config: &ClassifierConfig) -> Self {
        use RuleAction::{Drop, Keep};
        use RuleScope::{All, Noise};

        let mut rules = vec![
            NoiseRule::shape("table-row", Keep, Noise, table_row),
            NoiseRule::shape("table-separator", Keep, Noise, table_separator),
            NoiseRule::shape("prompt-glyph", Drop, Noise, prompt_glyph),
            NoiseRule::shape("prompt-cursor", Drop, All, prompt_cursor),
        ];
        if let Some(spinner) = spinner_regex(config) {
            rules.push(NoiseRule::pattern("spinner", Noise, spinner));
        }
        if let Some(status) = spinner_status_regex(config) {
            rules.push(NoiseRule::pattern("spinner-status", All, status));
        }
        rules.extend([
            NoiseRule::shape("spinner-glyph", Drop, Noise, spinner_glyph_only),
            NoiseRule::pattern("thinking", Noise, RE_THINKING.clone()),
            NoiseRule::pattern("interrupt-hint", Noise, RE_INTERRUPT.clone()),
            NoiseRule::pattern("shortcuts-hint", Noise, RE_SHORTCUTS.clone()),
            NoiseRule::pattern("token-counter", Noise, RE_TOKENS.clone()),
            NoiseRule::pattern("search-progress", Noise, RE_SEARCHES.clone()),
            NoiseRule::pattern("permission-prompt", Noise, RE_PERMISSION.clone()),
            NoiseRule::pattern("fetch-progress", Noise, RE_FETCH.clone()),
            NoiseRule::shape("box-border", Drop, Noise, box_border),
            NoiseRule::shape("box-line", Drop, Noise, box_line),
            NoiseRule::shape("cursor-fragment", Drop, Noise, cursor_fragment),
        ]);
        for pattern in &config.extra_noise_patterns {
            match Regex::new(pattern) {
                Ok(regex) => rules.push(NoiseRule::pattern("configured", Noise, regex)),
                Err(e) => tracing::warn!(pattern = %pattern, error = %e, "Ignoring invalid noise pattern"),
            }
        }
        Self { rules }
    }

    /// First rule that matches, restricted to rules valid for `scope`.
    pub fn first_match(
        &self,
        ctx: &LineContext<'_>,
        scope: RuleScope,
        config: &ClassifierConfig,
    ) -> Option<&NoiseRule> {
        self.rules
            .iter()
            .filter(|rule| scope == RuleScope::Noise || rule.scope == RuleScope::All)
            .find(|rule| rule.matches(ctx, config))
    }

    pub fn keeps(&self, ctx: &LineContext<'_>, scope: RuleScope, config: &ClassifierConfig) -> bool {
        self.first_match(ctx, scope, config)
            .map_or(true, |rule| rule.action == RuleAction::Keep)
    }
}

/// `✻ Percolating… (3s · esc to interrupt)`: optional glyphs, a vocabulary
/// word, then an ellipsis. Case-sensitive.
fn spinner_regex(config: &ClassifierConfig) -> Option<Regex> {
    if config.spinner_words.is_empty() {
        return None;
    }
    let glyphs: String = config.spinner_glyphs.chars().map(|c| regex::escape(&c.to_string())).collect();
    let words: Vec<String> = config.spinner_words.iter().map(|w| regex::escape(w)).collect();
    let pattern = format!(r"^[{}\s]*(?:{})(?:…|\.\.\.)", glyphs, words.join("|"));
    match Regex::new(&pattern) {
        Ok(regex) => Some(regex),
        Err(e) => {
            tracing::warn!(error = %e, "Spinner vocabulary produced an invalid pattern");
            None
        }
    }
}

/// The live status line redrawn inside a larger burst: one spinner glyph, a
/// vocabulary word, an ellipsis and at most a parenthesized tail.
fn spinner_status_regex(config: &ClassifierConfig) -> Option<Regex> {
    let glyphs: String = config
        .spinner_glyphs
        .chars()
        .filter(|c| !matches!(c, '*' | '·'))
        .map(|c| regex::escape(&c.to_string()))
        .collect();
    if config.spinner_words.is_empty() || glyphs.is_empty() {
        return None;
    }
    let words: Vec<String> = config.spinner_words.iter().map(|w| regex::escape(w)).collect();
    let pattern = format!(r"^[{}]\s*(?:{})(?:…|\.\.\.)\s*(?:\(.*\))?$", glyphs, words.join("|"));
    match Regex::new(&pattern) {
        Ok(regex) => Some(regex),
        Err(e) => {
            tracing::warn!(error = %e, "Spinner vocabulary produced an invalid pattern");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drops(line: &str) -> Option<&'static str> {
        let config = ClassifierConfig::default();
        let rules = RuleSet::new(&config);
        let ctx = LineContext {
            line,
            prev: None,
            next: None,
        };
        rules
            .first_match(&ctx, RuleScope::Noise, &config)
            .filter(|r| r.action == RuleAction::Drop)
            .map(|r| r.name)
    }

    #[test]
    fn test_spinner_words_need_ellipsis_and_case() {
        assert_eq!(drops("✻ Percolating… (3s · esc to interrupt)"), Some("spinner"));
        assert_eq!(drops("Clauding..."), Some("spinner"));
        assert_eq!(drops("percolating…"), None);
        assert_eq!(drops("Percolating coffee is fun"), None);
    }

    #[test]
    fn test_hints_with_collapsed_spacing() {
        assert_eq!(drops("esctointerrupt"), Some("interrupt-hint"));
        assert_eq!(drops("?forshortcuts"), Some("shortcuts-hint"));
    }

    #[test]
    fn test_prompt_glyph_drops_whole_line() {
        assert_eq!(drops("❯ some typed text"), Some("prompt-glyph"));
    }

    #[test]
    fn test_progress_lines() {
        assert_eq!(drops("Did 2 searches in 3s"), Some("search-progress"));
        assert_eq!(drops("Did 1 search in 850ms"), Some("search-progress"));
        assert_eq!(drops("↓ 1.2k tokens"), Some("token-counter"));
        assert_eq!(drops("Received 12.4KB (200 OK)"), Some("fetch-progress"));
        assert_eq!(drops("Do you want to proceed?"), Some("permission-prompt"));
        assert_eq!(drops("❯ 1. Yes"), Some("prompt-glyph"));
        assert_eq!(drops("2. Yes, and don't ask again this session"), Some("permission-prompt"));
    }

    #[test]
    fn test_borders_and_fragments() {
        assert_eq!(drops("╭──────────────╮"), Some("box-border"));
        assert_eq!(drops("│ ✻ Welcome to the assistant! │"), Some("box-line"));
        assert_eq!(drops("  a     b      c   "), Some("cursor-fragment"));
        assert_eq!(drops("I am ok"), None);
        assert_eq!(drops("Real content"), None);
    }

    #[test]
    fn test_table_lines_survive_in_context() {
        let config = ClassifierConfig::default();
        let rules = RuleSet::new(&config);
        let lines = ["│ Name │ Size │", "├──────┼──────┤", "│ a.rs │ 12   │"];
        let contexts = LineContext::for_lines(&lines);
        assert!(contexts
            .iter()
            .all(|ctx| rules.keeps(ctx, RuleScope::Noise, &config)));

        let lone = ["├───┼───┤", "Real content"];
        let contexts = LineContext::for_lines(&lone);
        assert!(!rules.keeps(&contexts[0], RuleScope::Noise, &config));
        assert!(rules.keeps(&contexts[1], RuleScope::Noise, &config));
    }

    #[test]
    fn test_content_scope_skips_noise_only_rules() {
        let config = ClassifierConfig::default();
        let rules = RuleSet::new(&config);
        let ctx = LineContext {
            line: "┌────┐",
            prev: None,
            next: None,
        };
        assert!(rules.keeps(&ctx, RuleScope::All, &config));
        assert!(!rules.keeps(&ctx, RuleScope::Noise, &config));
    }

    #[test]
    fn test_content_keeps_prose_that_resembles_chrome() {
        let config = ClassifierConfig::default();
        let rules = RuleSet::new(&config);
        let content = |line: &str| {
            let ctx = LineContext {
                line,
                prev: None,
                next: None,
            };
            rules.first_match(&ctx, RuleScope::All, &config).map(|r| r.name)
        };
        assert_eq!(content("1. No schema change, just backfill the column."), None);
        assert_eq!(content("2. Yes, add a new table and copy rows."), None);
        assert_eq!(content("4096 tokens is the context we need per request."), None);
        assert_eq!(content("Thinking... about it, the cache is the problem."), None);
        assert_eq!(content("Press esc to interrupt a running command."), None);
        assert_eq!(content("The prompt shows ❯ when it is ready."), None);

        assert_eq!(content("❯ 1. Yes"), Some("prompt-cursor"));
        assert_eq!(content("✻ Percolating… (3s · esc to interrupt)"), Some("spinner-status"));
        assert_eq!(content("✶ Clauding..."), Some("spinner-status"));
    }

    #[test]
    fn test_extra_patterns_are_additive() {
        let config = ClassifierConfig {
            extra_noise_patterns: vec!["^Auto-update failed".into()],
            ..ClassifierConfig::default()
        };
        let rules = RuleSet::new(&config);
        let ctx = LineContext {
            line: "Auto-update failed · Try again later",
            prev: None,
            next: None,
        };
        assert_eq!(
            rules.first_match(&ctx, RuleScope::Noise, &config).map(|r| r.name),
            Some("configured")
        );
    }
}
