//! Text normalization shared by the directory loader and search

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Remove diacritics: "Prénom" becomes "Prenom"
pub fn fold_accents(text: &str) -> String {
    text.nfkd().filter(|c| !is_combining_mark(*c)).collect()
}

/// Accent-folded, lower-cased, with runs of whitespace collapsed to one space
pub fn normalize_for_match(text: &str) -> String {
    fold_accents(text)
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Unwrap the `="..."` guard Excel puts around numeric-looking text, then trim
pub fn clean_cell(raw: &str) -> &str {
    let trimmed = raw.trim();
    trimmed
        .strip_prefix("=\"")
        .and_then(|rest| rest.strip_suffix('"'))
        .unwrap_or(trimmed)
        .trim()
}

fn digits_only(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// CIN numbers are 8 digits, left-padded with zeros
pub fn format_cin(raw: &str) -> String {
    let digits = digits_only(raw);
    if digits.is_empty() {
        return String::new();
    }
    format!("{:0>8}", digits)
}

/// CNSS number followed by its 2-digit key; anything shorter than 8
/// characters is not a usable number
pub fn format_cnss(number: &str, key: &str) -> String {
    let key_digits = digits_only(key);
    let key = if key_digits.is_empty() {
        String::new()
    } else {
        format!("{:0>2}", key_digits)
    };

    let full = format!("{}{}", number.trim(), key);
    if full.chars().count() >= 8 {
        full
    } else {
        String::new()
    }
}
