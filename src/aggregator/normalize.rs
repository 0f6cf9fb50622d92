//! Query and candidate text normalization

/// Characters folded to a single space
const SEPARATORS: &[char] = &[
    '\u{2019}', '\'', '`', '\u{00B4}', '\u{2018}', '\u{201B}', '\u{201C}', '\u{201D}', '"', '-',
];

/// Sentence punctuation dropped outright
const PUNCTUATION: &[char] = &['.', ',', '!', '?', ';', ':', '\u{00BF}', '\u{00A1}', '\u{2026}'];

/// Normalize text for provider lookups and duplicate detection
///
/// Lowercases, turns quotes/apostrophes/dashes into spaces, drops sentence
/// punctuation, collapses whitespace runs and trims. Diacritics are kept.
pub fn normalize_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;

    for c in text.chars().flat_map(char::to_lowercase) {
        if PUNCTUATION.contains(&c) {
            continue;
        }
        if c.is_whitespace() || SEPARATORS.contains(&c) {
            pending_space = true;
            continue;
        }
        if pending_space && !out.is_empty() {
            out.push(' ');
        }
        pending_space = false;
        out.push(c);
    }

    out
}

// =============================================================================
// Tests
// =============================================================================
