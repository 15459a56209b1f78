//! Normalization applied to the expected and replacement text before a
//! content-stream match is attempted.

use once_cell::sync::Lazy;
use regex::Regex;

static DATE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d{1,2}-[A-Za-z]{3}-\d{4}").expect("date pattern compiles"));

/// Appended by the display layer to truncated runs; never present in the PDF.
const ELLIPSIS: &str = "...";

/// What to look for inside the target operation and what to put there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchPair {
    pub needle: String,
    pub replacement: String,
    /// True when the pair was narrowed to a single date.
    pub narrowed: bool,
}

pub fn strip_ellipsis(text: &str) -> &str {
    text.strip_suffix(ELLIPSIS).unwrap_or(text)
}

pub fn prepare(original: &str, replacement: &str) -> MatchPair {
    let original = strip_ellipsis(original);
    let replacement = strip_ellipsis(replacement);

    match narrow_to_date(original, replacement) {
        Some((needle, replacement)) => MatchPair {
            needle: needle.to_string(),
            replacement: replacement.to_string(),
            narrowed: true,
        },
        None => MatchPair {
            needle: original.to_string(),
            replacement: replacement.to_string(),
            narrowed: false,
        },
    }
}

/// Both sides must hold exactly one date, and everything around the dates
/// must be identical, otherwise an edit outside the date would be lost.
fn narrow_to_date<'a>(original: &'a str, replacement: &'a str) -> Option<(&'a str, &'a str)> {
    let old = single_date(original)?;
    let new = single_date(replacement)?;
    let same_prefix = original[..old.start()] == replacement[..new.start()];
    let same_suffix = original[old.end()..] == replacement[new.end()..];
    (same_prefix && same_suffix).then(|| (old.as_str(), new.as_str()))
}

fn single_date(text: &str) -> Option<regex::Match<'_>> {
    let mut matches = DATE_PATTERN.find_iter(text);
    let first = matches.next()?;
    matches.next().is_none().then_some(first)
}
