/// Escape parsing state carried across input events, since a key sequence
/// may be split between two writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Escape {
    #[default]
    None,
    /// Saw ESC
    Start,
    /// Inside `ESC [ ...` until the final byte
    Csi,
    /// After `ESC O`, one more byte to skip
    Ss3,
}

/// Rebuilds typed lines from raw keystrokes, emulating a line editor:
/// backspace pops, escape sequences vanish, CR/LF completes the line.
#[derive(Debug, Default)]
pub(crate) struct LineEditor {
    line: String,
    escape: Escape,
}

impl LineEditor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed keystrokes; returns every line completed by this chunk.
    pub fn feed(&mut self, data: &str) -> Vec<String> {
        let mut completed = Vec::new();
        for ch in data.chars() {
            match self.escape {
                Escape::Start => {
                    self.escape = match ch {
                        '[' => Escape::Csi,
                        'O' => Escape::Ss3,
                        _ => Escape::None,
                    };
                    continue;
                }
                Escape::Csi => {
                    if ('\u{40}'..='\u{7e}').contains(&ch) {
                        self.escape = Escape::None;
                    }
                    continue;
                }
                Escape::Ss3 => {
                    self.escape = Escape::None;
                    continue;
                }
                Escape::None => {}
            }

            match ch {
                '\r' | '\n' => completed.push(std::mem::take(&mut self.line)),
                '\x7f' | '\x08' => {
                    self.line.pop();
                }
                '\x1b' => self.escape = Escape::Start,
                c if c.is_control() => {}
                c => self.line.push(c),
            }
        }
        completed
    }

    /// The line typed so far but not yet submitted.
    pub fn partial(&self) -> &str {
        &self.line
    }

    pub fn take_partial(&mut self) -> Option<String> {
        let line = std::mem::take(&mut self.line);
        self.escape = Escape::None;
        if line.trim().is_empty() {
            None
        } else {
            Some(line)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backspace_edits() {
        let mut editor = LineEditor::new();
        let mut lines = Vec::new();
        for key in ["I", "c", "a", "\x7f", "\x7f", "\x7f", "W", "h", "a", "t", "\r"] {
            lines.extend(editor.feed(key));
        }
        assert_eq!(lines, vec!["What".to_string()]);
        assert_eq!(editor.partial(), "");
    }

    #[test]
    fn test_escape_sequences_dropped() {
        let mut editor = LineEditor::new();
        assert_eq!(editor.feed("ls\x1b[A\x1b[O -la\x1bOB\r"), vec!["ls -la".to_string()]);
    }

    #[test]
    fn test_escape_split_across_chunks() {
        let mut editor = LineEditor::new();
        assert!(editor.feed("git\x1b").is_empty());
        assert!(editor.feed("[1;5").is_empty());
        assert_eq!(editor.feed("D status\r"), vec!["git status".to_string()]);
    }

    #[test]
    fn test_backspace_on_empty_line_is_harmless() {
        let mut editor = LineEditor::new();
        assert_eq!(editor.feed("\x08\x7fok\r"), vec!["ok".to_string()]);
    }

    #[test]
    fn test_partial_line_is_kept() {
        let mut editor = LineEditor::new();
        editor.feed("unfinished");
        assert_eq!(editor.take_partial(), Some("unfinished".to_string()));
        assert_eq!(editor.take_partial(), None);
    }
}
