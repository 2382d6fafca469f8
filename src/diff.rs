//! Word-level diff used to render correction results.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffKind {
    Same,
    Added,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffPart {
    pub kind: DiffKind,
    pub text: String,
}

/// Split into alternating word and whitespace tokens so that concatenating
/// the tokens reproduces the input exactly.
fn tokenize(text: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut start = 0;
    let mut in_space: Option<bool> = None;

    for (idx, ch) in text.char_indices() {
        let space = ch.is_whitespace();
        match in_space {
            Some(prev) if prev != space => {
                tokens.push(&text[start..idx]);
                start = idx;
            }
            _ => {}
        }
        in_space = Some(space);
    }
    if start < text.len() {
        tokens.push(&text[start..]);
    }
    tokens
}

/// Classic LCS diff over word tokens. Adjacent parts of the same kind are
/// merged; within a change, removals precede additions.
pub fn compute_word_diff(original: &str, corrected: &str) -> Vec<DiffPart> {
    let a = tokenize(original);
    let b = tokenize(corrected);

    // lcs[i][j] = LCS length of a[i..] and b[j..]
    let mut lcs = vec![vec![0usize; b.len() + 1]; a.len() + 1];
    for i in (0..a.len()).rev() {
        for j in (0..b.len()).rev() {
            lcs[i][j] = if a[i] == b[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let mut parts: Vec<DiffPart> = Vec::new();
    let mut push = |kind: DiffKind, text: &str| match parts.last_mut() {
        Some(last) if last.kind == kind => last.text.push_str(text),
        _ => parts.push(DiffPart {
            kind,
            text: text.to_string(),
        }),
    };

    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        if a[i] == b[j] {
            push(DiffKind::Same, a[i]);
            i += 1;
            j += 1;
        } else if lcs[i + 1][j] >= lcs[i][j + 1] {
            push(DiffKind::Removed, a[i]);
            i += 1;
        } else {
            push(DiffKind::Added, b[j]);
            j += 1;
        }
    }
    for token in &a[i..] {
        push(DiffKind::Removed, *token);
    }
    for token in &b[j..] {
        push(DiffKind::Added, *token);
    }

    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn joined(parts: &[DiffPart]) -> String {
        parts.iter().map(|p| p.text.as_str()).collect()
    }

    #[test]
    fn test_changed_word_is_removed_then_added() {
        let parts = compute_word_diff("I want to making", "I want to make");
        assert!(parts
            .iter()
            .any(|p| p.kind == DiffKind::Removed && p.text == "making"));
        assert!(parts
            .iter()
            .any(|p| p.kind == DiffKind::Added && p.text == "make"));
        assert_eq!(parts[0].kind, DiffKind::Same);
        assert_eq!(parts[0].text, "I want to ");
    }

    #[test]
    fn test_identical_input_is_all_same() {
        for s in ["", "one", "  leading and trailing  ", "tab\tand\nnewline", "héllo wörld"] {
            let parts = compute_word_diff(s, s);
            assert!(parts.iter().all(|p| p.kind == DiffKind::Same), "{:?}", s);
            assert_eq!(joined(&parts), s);
        }
    }

    #[test]
    fn test_sides_reconstruct() {
        let parts = compute_word_diff("the cat sat", "a cat sat down");
        let old: String = parts
            .iter()
            .filter(|p| p.kind != DiffKind::Added)
            .map(|p| p.text.as_str())
            .collect();
        let new: String = parts
            .iter()
            .filter(|p| p.kind != DiffKind::Removed)
            .map(|p| p.text.as_str())
            .collect();
        assert_eq!(old, "the cat sat");
        assert_eq!(new, "a cat sat down");
    }
}
