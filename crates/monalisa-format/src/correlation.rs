//! Correlation identifiers embedded in decoded tickets.
//!
//! Tickets carry a `DCID-…` identifier in their plain-text portion. Its exact
//! text is hashed into a name-based UUID so the same ticket content always
//! yields the same key identifier.

use regex::Regex;
use std::sync::OnceLock;
use uuid::Uuid;

/// Field layout of a correlation identifier.
pub const CORRELATION_PATTERN: &str =
    r"DCID-[A-Z0-9]+-[A-Z0-9]+-[0-9]{8}-[0-9]{6}-[A-Z0-9]+-[0-9]{10}-[A-Z0-9]+";

fn pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(CORRELATION_PATTERN).expect("correlation pattern compiles"))
}

/// Decode ticket bytes as ASCII, dropping every byte outside the ASCII range.
pub fn ascii_text(raw: &[u8]) -> String {
    raw.iter()
        .filter(|b| b.is_ascii())
        .map(|&b| char::from(b))
        .collect()
}

/// Find the first correlation identifier in the ticket bytes.
pub fn find_correlation_id(raw: &[u8]) -> Option<String> {
    let text = ascii_text(raw);
    pattern().find(&text).map(|m| m.as_str().to_string())
}

/// Key identifier for a ticket: UUIDv5 (DNS namespace) of the correlation
/// identifier, or the nil UUID when the ticket carries none.
pub fn derive_key_id(raw: &[u8]) -> Uuid {
    match find_correlation_id(raw) {
        Some(cid) => Uuid::new_v5(&Uuid::NAMESPACE_DNS, cid.as_bytes()),
        None => Uuid::nil(),
    }
}
