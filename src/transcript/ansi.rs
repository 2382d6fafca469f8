use once_cell::sync::Lazy;
use regex::Regex;

/// `ESC[nC` moves the cursor right; TUIs use it in place of spaces.
static RE_CURSOR_FORWARD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\x1b\[\d*C").unwrap());

/// CSI, OSC, DCS/APC/PM strings, charset selection, SS3 and two-byte escapes.
static RE_ESCAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\x1b\[[0-?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)?|\x1b[PX^_][^\x1b]*(?:\x1b\\)?|\x1b[()*+#].|\x1bO.|\x1b.",
    )
    .unwrap()
});

static RE_CONTROL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\x00-\x08\x0b\x0c\x0e-\x1f\x7f]").unwrap());

/// Remove terminal control sequences from PTY output.
///
/// Cursor-forward becomes a single space, carriage returns become line
/// breaks, and everything else that is not printable text is dropped.
pub fn strip_ansi(input: &str) -> String {
    let spaced = RE_CURSOR_FORWARD.replace_all(input, " ");
    let plain = RE_ESCAPE.replace_all(&spaced, "");
    let lines = plain.replace("\r\n", "\n").replace('\r', "\n");
    RE_CONTROL.replace_all(&lines, "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_colors_and_modes() {
        assert_eq!(strip_ansi("\x1b[1;32mok\x1b[0m"), "ok");
        assert_eq!(strip_ansi("\x1b[?25lhidden\x1b[?25h"), "hidden");
        assert_eq!(strip_ansi("\x1b]0;title\x07text"), "text");
        assert_eq!(strip_ansi("\x1b(Bplain"), "plain");
    }

    #[test]
    fn test_cursor_forward_becomes_space() {
        assert_eq!(strip_ansi("word\x1b[1Cnext\x1b[3Clast"), "word next last");
        assert_eq!(strip_ansi("a\x1b[Cb"), "a b");
    }

    #[test]
    fn test_line_endings_normalised() {
        assert_eq!(strip_ansi("one\r\ntwo\rthree"), "one\ntwo\nthree");
        assert_eq!(strip_ansi("bell\x07 back\x08"), "bell back");
    }

    #[test]
    fn test_unicode_survives() {
        assert_eq!(strip_ansi("\x1b[2K⏺ Done ✓"), "⏺ Done ✓");
    }
}
