//! Deterministic cleanup of backend-generated text.
//!
//! Vision models wrap answers in code fences and emit stray invisible
//! characters; the conversion service inlines figures as base64 data URIs
//! that would bloat the stored content. Each rule is a pure `&str → String`
//! pass.
//!
//! Order matters: fences are stripped before line endings are normalised
//! so the fence regex sees the raw answer, and inline images are replaced
//! before blank lines are collapsed.

use once_cell::sync::Lazy;
use regex::Regex;

/// Marker left where an inline image payload was removed.
pub const IMAGE_PLACEHOLDER: &str = "<!-- image -->";

/// Clean one page (or one document) of extracted text.
pub fn clean_text(input: &str) -> String {
    let s = strip_outer_fences(input);
    let s = normalise_line_endings(&s);
    let s = strip_inline_images(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    let s = remove_invisible_chars(&s);
    s.trim().to_string()
}

// ── Outer fences ─────────────────────────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^```(?:markdown|md|text|plaintext)?\r?\n(.*?)\r?\n```\s*$")
        .unwrap_or_else(|e| panic!("invalid fence regex: {e}"))
});

fn strip_outer_fences(input: &str) -> String {
    match RE_OUTER_FENCES.captures(input.trim()) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

// ── Whitespace ───────────────────────────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\n{4,}").unwrap_or_else(|e| panic!("invalid blank-line regex: {e}"))
});

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n\n").to_string()
}

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Inline images ────────────────────────────────────────────────────────────

static RE_MARKDOWN_DATA_IMAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"!\[[^\]]*\]\(\s*data:image/[A-Za-z0-9.+-]+;base64,[A-Za-z0-9+/=\s]*\)")
        .unwrap_or_else(|e| panic!("invalid image regex: {e}"))
});

static RE_BARE_DATA_URI: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"data:image/[A-Za-z0-9.+-]+;base64,[A-Za-z0-9+/=]+")
        .unwrap_or_else(|e| panic!("invalid data-uri regex: {e}"))
});

/// Replace embedded base64 images with [`IMAGE_PLACEHOLDER`].
///
/// Linked images (`![alt](https://…)`) are left untouched.
pub fn strip_inline_images(input: &str) -> String {
    let s = RE_MARKDOWN_DATA_IMAGE.replace_all(input, IMAGE_PLACEHOLDER);
    RE_BARE_DATA_URI.replace_all(&s, IMAGE_PLACEHOLDER).to_string()
}
