//! Small shared helpers.

use once_cell::sync::Lazy;
use regex::Regex;

/// Government uniform invoice track number: two uppercase letters, a hyphen,
/// eight digits.
static INVOICE_NUMBER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z]{2}-\d{8}$").expect("invalid invoice number regex"));

pub fn is_valid_invoice_number(s: &str) -> bool {
    INVOICE_NUMBER_RE.is_match(s)
}

/// Auto-format invoice input: uppercase, hyphen inserted after the second
/// character, truncated to 11 characters. Idempotent on already-formatted
/// values.
pub fn format_invoice_number(input: &str) -> String {
    let cleaned: String = input
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect();

    let mut formatted = if cleaned.len() <= 2 {
        cleaned
    } else {
        format!("{}-{}", &cleaned[..2], &cleaned[2..])
    };
    formatted.truncate(11);
    formatted
}
