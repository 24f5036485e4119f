//! Span-level diff between an input text and its corrected rewrite.
//!
//! Both texts are split into tokens (runs of alphanumerics, runs of
//! whitespace, or single other characters) and compared with Myers' O(ND)
//! algorithm. Each maximal run of non-matching tokens becomes one
//! [`CorrectionChange`]; changes come out left to right and never overlap.

use serde::{Deserialize, Serialize};

/// One atomic edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrectionChange {
    /// Text as it appeared before correction (empty for a pure insertion).
    pub original: String,
    /// Replacement text (empty for a pure deletion).
    pub corrected: String,
    /// Byte offset of `original` in the input text.
    pub offset: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Equal,
    Delete,
    Insert,
}

#[derive(PartialEq, Eq)]
enum TokenClass {
    Word,
    Space,
    Other,
}

fn class_of(c: char) -> TokenClass {
    if c.is_alphanumeric() {
        TokenClass::Word
    } else if c.is_whitespace() {
        TokenClass::Space
    } else {
        TokenClass::Other
    }
}

/// Split text into word, whitespace and single-symbol tokens.
fn tokenize(text: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut start = 0;
    let mut current: Option<TokenClass> = None;

    for (i, c) in text.char_indices() {
        let class = class_of(c);
        let continues = match &current {
            Some(prev) => *prev == class && class != TokenClass::Other,
            None => false,
        };
        if !continues {
            if i > start {
                tokens.push(&text[start..i]);
            }
            start = i;
        }
        current = Some(class);
    }
    if start < text.len() {
        tokens.push(&text[start..]);
    }
    tokens
}

/// Edit distances beyond this are not worth an exact script; the whole
/// differing region is reported as one change instead.
const MAX_EDIT_DISTANCE: usize = 1000;

/// Shortest edit script from `a` to `b`, or `None` if it needs more than
/// `max_d` edits.
fn myers<T: PartialEq>(a: &[T], b: &[T], max_d: usize) -> Option<Vec<Op>> {
    let n = a.len() as isize;
    let m = b.len() as isize;
    let max = (n + m) as usize;
    let offset = max as isize + 1;
    let idx = |k: isize| (k + offset) as usize;

    let mut v = vec![0isize; 2 * max + 4];
    // Row d holds diagonals -(d+1)..=(d+1) as they stood before round d.
    let mut trace: Vec<Vec<isize>> = Vec::new();

    'search: for d in 0..=max as isize {
        if d as usize > max_d {
            return None;
        }
        trace.push(v[idx(-d - 1)..=idx(d + 1)].to_vec());
        let mut k = -d;
        while k <= d {
            let mut x = if k == -d || (k != d && v[idx(k - 1)] < v[idx(k + 1)]) {
                v[idx(k + 1)]
            } else {
                v[idx(k - 1)] + 1
            };
            let mut y = x - k;
            while x < n && y < m && a[x as usize] == b[y as usize] {
                x += 1;
                y += 1;
            }
            v[idx(k)] = x;
            if x >= n && y >= m {
                break 'search;
            }
            k += 2;
        }
    }

    // Walk the trace backwards from (n, m).
    let mut ops = Vec::with_capacity(max);
    let (mut x, mut y) = (n, m);
    for d in (0..trace.len() as isize).rev() {
        let row = &trace[d as usize];
        let at = |k: isize| row[(k + d + 1) as usize];
        let k = x - y;
        let prev_k = if k == -d || (k != d && at(k - 1) < at(k + 1)) {
            k + 1
        } else {
            k - 1
        };
        let prev_x = at(prev_k);
        let prev_y = prev_x - prev_k;

        while x > prev_x && y > prev_y {
            ops.push(Op::Equal);
            x -= 1;
            y -= 1;
        }
        if d > 0 {
            if x == prev_x {
                ops.push(Op::Insert);
            } else {
                ops.push(Op::Delete);
            }
        }
        x = prev_x;
        y = prev_y;
    }

    ops.reverse();
    Some(ops)
}

/// Compute the list of changes that turn `original` into `corrected`.
pub fn diff_changes(original: &str, corrected: &str) -> Vec<CorrectionChange> {
    if original == corrected {
        return Vec::new();
    }

    let a = tokenize(original);
    let b = tokenize(corrected);

    // Trim the common prefix and suffix before running Myers.
    let prefix = a.iter().zip(&b).take_while(|(x, y)| x == y).count();
    let suffix = a[prefix..]
        .iter()
        .rev()
        .zip(b[prefix..].iter().rev())
        .take_while(|(x, y)| x == y)
        .count();
    let a_mid = &a[prefix..a.len() - suffix];
    let b_mid = &b[prefix..b.len() - suffix];

    let mut byte_pos: usize = a[..prefix].iter().map(|t| t.len()).sum();
    let (mut ai, mut bi) = (0usize, 0usize);

    let mut changes = Vec::new();
    let mut pending: Option<CorrectionChange> = None;

    let ops = match myers(a_mid, b_mid, MAX_EDIT_DISTANCE) {
        Some(ops) => ops,
        None => {
            return vec![CorrectionChange {
                original: a_mid.concat(),
                corrected: b_mid.concat(),
                offset: byte_pos,
            }]
        }
    };

    for op in ops {
        match op {
            Op::Equal => {
                if let Some(change) = pending.take() {
                    changes.push(change);
                }
                byte_pos += a_mid[ai].len();
                ai += 1;
                bi += 1;
            }
            Op::Delete => {
                let change = pending.get_or_insert_with(|| CorrectionChange {
                    original: String::new(),
                    corrected: String::new(),
                    offset: byte_pos,
                });
                change.original.push_str(a_mid[ai]);
                byte_pos += a_mid[ai].len();
                ai += 1;
            }
            Op::Insert => {
                let change = pending.get_or_insert_with(|| CorrectionChange {
                    original: String::new(),
                    corrected: String::new(),
                    offset: byte_pos,
                });
                change.corrected.push_str(b_mid[bi]);
                bi += 1;
            }
        }
    }
    if let Some(change) = pending {
        changes.push(change);
    }

    changes
}

/// Re-apply `changes` to `original`. Used to check backend-reported edits.
pub fn apply_changes(original: &str, changes: &[CorrectionChange]) -> Option<String> {
    let mut out = String::with_capacity(original.len());
    let mut cursor = 0;
    for change in changes {
        let end = change.offset.checked_add(change.original.len())?;
        if change.offset < cursor || end > original.len() {
            return None;
        }
        if original.get(change.offset..end)? != change.original {
            return None;
        }
        out.push_str(original.get(cursor..change.offset)?);
        out.push_str(&change.corrected);
        cursor = end;
    }
    out.push_str(original.get(cursor..)?);
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(original: &str, corrected: &str, offset: usize) -> CorrectionChange {
        CorrectionChange {
            original: original.into(),
            corrected: corrected.into(),
            offset,
        }
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(
            tokenize("Hello,  wor1d!!"),
            vec!["Hello", ",", "  ", "wor1d", "!", "!"]
        );
        assert_eq!(tokenize(""), Vec::<&str>::new());
        assert_eq!(tokenize("مرحبا بك"), vec!["مرحبا", " ", "بك"]);
    }

    #[test]
    fn test_identical_texts_have_no_changes() {
        assert!(diff_changes("all good here", "all good here").is_empty());
        assert!(diff_changes("", "").is_empty());
    }

    #[test]
    fn test_single_word_substitution() {
        let changes = diff_changes("The qnick brown fox", "The quick brown fox");
        assert_eq!(changes, vec![change("qnick", "quick", 4)]);
    }

    #[test]
    fn test_multiple_changes_in_order() {
        let changes = diff_changes("Tbe cat sat on tbe rnat", "The cat sat on the mat");
        assert_eq!(
            changes,
            vec![
                change("Tbe", "The", 0),
                change("tbe", "the", 15),
                change("rnat", "mat", 19),
            ]
        );
    }

    #[test]
    fn test_insertion_and_deletion() {
        assert_eq!(
            diff_changes("hello world", "hello big world"),
            vec![change("", "big ", 6)]
        );
        assert_eq!(
            diff_changes("hello big world", "hello world"),
            vec![change("big ", "", 6)]
        );
    }

    #[test]
    fn test_edits_are_reported_per_token_run() {
        let changes = diff_changes("0CR resu1ts", "OCR results");
        assert_eq!(changes, vec![change("0CR", "OCR", 0), change("resu1ts", "results", 4)]);
    }

    #[test]
    fn test_changes_never_overlap_and_reapply() {
        let original = "Tlie   qu1ck brovvn fox , jumped";
        let corrected = "The quick brown fox, jumps";
        let changes = diff_changes(original, corrected);
        for pair in changes.windows(2) {
            assert!(pair[0].offset + pair[0].original.len() <= pair[1].offset);
        }
        assert_eq!(apply_changes(original, &changes).as_deref(), Some(corrected));
    }

    #[test]
    fn test_empty_sides() {
        assert_eq!(diff_changes("", "new text"), vec![change("", "new text", 0)]);
        assert_eq!(diff_changes("old", ""), vec![change("old", "", 0)]);
    }

    #[test]
    fn test_large_rewrites_collapse_into_one_change() {
        let original = (0..800).map(|i| format!("a{} ", i)).collect::<String>();
        let corrected = (0..800).map(|i| format!("b{} ", i)).collect::<String>();
        let text = format!("keep {}", original);
        let changes = diff_changes(&text, &format!("keep {}", corrected));
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].offset, 5);
        assert_eq!(
            apply_changes(&text, &changes),
            Some(format!("keep {}", corrected))
        );
    }

    #[test]
    fn test_apply_rejects_mismatched_spans() {
        assert!(apply_changes("abc", &[change("zz", "y", 0)]).is_none());
        assert!(apply_changes("abc", &[change("c", "d", 2), change("a", "b", 0)]).is_none());
        assert!(apply_changes("abc", &[change("c", "d", 7)]).is_none());
    }
}
