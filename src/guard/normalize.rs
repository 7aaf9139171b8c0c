//! Canonicalization of raw user text before pattern matching.
//!
//! Attackers hide known phrasings behind Unicode compatibility characters,
//! zero-width joiners and odd spacing; quoted examples inside code fences or
//! URLs are the opposite problem and must not trigger the detector. This
//! module folds the former away and blanks the latter out.

use regex::Regex;
use std::sync::LazyLock;
use unicode_normalization::UnicodeNormalization;

/// Zero-width and format characters stripped outright (ZWSP, ZWNJ, ZWJ,
/// word joiner, BOM).
const ZERO_WIDTH: [char; 5] = ['\u{200B}', '\u{200C}', '\u{200D}', '\u{2060}', '\u{FEFF}'];

static RE_FENCED_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```.*?```").expect("fenced-code regex"));
static RE_INLINE_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`[^`\n]+`").expect("inline-code regex"));
static RE_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)https?://\S+").expect("url regex"));
static RE_HORIZONTAL_WS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t\r\x0B\x0C]+").expect("whitespace regex"));

/// Canonicalize raw input for detection: NFKC fold + lowercase, zero-width
/// strip, safe-zone removal (fenced code, inline code, URLs), whitespace
/// collapse and trim.
///
/// Total and side-effect free. The collapse runs last so the function is
/// idempotent: safe-zone removal substitutes spaces that a second pass would
/// otherwise re-collapse. The result is recomputed per call, never cached.
pub fn normalize(raw: &str) -> String {
    let folded: String = raw
        .nfkc()
        .filter(|c| !ZERO_WIDTH.contains(c))
        .collect::<String>()
        .to_lowercase();

    let without_zones = strip_safe_zones(&folded);
    RE_HORIZONTAL_WS
        .replace_all(&without_zones, " ")
        .trim()
        .to_string()
}

/// Blank out regions where attack phrasing is quoted rather than meant:
/// fenced code blocks, inline code spans, and bare URLs.
fn strip_safe_zones(text: &str) -> String {
    let t = RE_FENCED_CODE.replace_all(text, " ");
    let t = RE_INLINE_CODE.replace_all(&t, " ");
    RE_URL.replace_all(&t, " ").into_owned()
}
