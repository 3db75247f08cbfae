//! OCR text cleanup
//!
//! Deterministic post-processing applied to every recognition result:
//! whitespace and line-break collapsing, rejoining of tokens the engine
//! split across lines, accent restoration for common Spanish label terms,
//! and tightening of known field formats. The whole pass is idempotent -
//! running it twice yields the same output as running it once.

use regex::Regex;
use std::sync::LazyLock;

static HORIZONTAL_WS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]+").unwrap());
static BLANK_RUNS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n\s*\n\s*\n+").unwrap());
static BLANK_LINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n\s*\n").unwrap());
static SPLIT_DIGITS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d)\n(\d)").unwrap());
// A newline before a capital usually starts a new label line; only
// lowercase-to-lowercase breaks are treated as a split word.
static SPLIT_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([a-záéíóúñü])\n([a-záéíóúñü])").unwrap());

static SHIPMENT_FORMAT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{7})[\s-]*(\d{4})").unwrap());
static POSTAL_FORMAT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:CP|C\.P\.)[\s:-]*(\d{4})").unwrap());
static DATE_FORMAT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d{1,2})[-\s]*(ene|feb|mar|abr|may|jun|jul|ago|sep|oct|nov|dic)").unwrap()
});

/// Misrecognized Spanish terms and their accented forms.
const TERM_CORRECTIONS: [(&str, &str); 5] = [
    ("envio", "envío"),
    ("numero", "número"),
    ("direccion", "dirección"),
    ("codigo", "código"),
    ("telefono", "teléfono"),
];

static TERM_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    TERM_CORRECTIONS
        .iter()
        .map(|(wrong, right)| {
            (
                Regex::new(&format!(r"(?i)\b{wrong}\b")).unwrap(),
                *right,
            )
        })
        .collect()
});

/// Collapse whitespace and rejoin tokens split across line breaks.
pub fn normalize_spacing(text: &str) -> String {
    let text = HORIZONTAL_WS.replace_all(text, " ");
    let text = BLANK_RUNS.replace_all(&text, "\n\n");
    let text = BLANK_LINE.replace_all(&text, "\n");
    // A token split across several lines needs repeated joining: each pass
    // consumes its match, so "1\n2\n3" only fully joins at the fixpoint.
    let text = replace_until_stable(&SPLIT_DIGITS, text.into_owned(), "$1$2");
    let text = replace_until_stable(&SPLIT_WORD, text, "$1 $2");
    text.trim().to_string()
}

fn replace_until_stable(pattern: &Regex, text: String, replacement: &str) -> String {
    let mut current = text;
    loop {
        let next = pattern.replace_all(&current, replacement).into_owned();
        if next == current {
            return current;
        }
        current = next;
    }
}

/// Restore accents on label terms the engine reads without them.
pub fn fix_spanish_terms(text: &str) -> String {
    let mut result = text.to_string();
    for (pattern, replacement) in TERM_PATTERNS.iter() {
        result = pattern.replace_all(&result, *replacement).into_owned();
    }
    result
}

/// Tighten known field formats: shipment ids get their hyphen, postal-code
/// prefixes canonicalize to `CP: NNNN`, dates get a day-month hyphen.
pub fn improve_field_format(text: &str) -> String {
    let text = SHIPMENT_FORMAT.replace_all(text, "$1-$2");
    let text = POSTAL_FORMAT.replace_all(&text, "CP: $1");
    let text = DATE_FORMAT.replace_all(&text, "$1-$2");
    text.into_owned()
}

/// Full normalization pass applied after every recognition.
pub fn normalize(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    improve_field_format(&fix_spanish_terms(&normalize_spacing(text)))
}
