use base64::{
    alphabet,
    engine::{general_purpose, GeneralPurpose, GeneralPurposeConfig},
    Engine as _,
};
use std::fmt;

/// A MonaLisa license ticket.
///
/// Both the raw ticket bytes and the canonical base64 form are computed once at
/// construction, so either representation can be handed out without
/// re-deriving it. The two always describe the same bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct License {
    raw: Vec<u8>,
    b64: String,
}

impl License {
    /// Build a license from ticket text.
    ///
    /// Text that decodes as standard base64 (surrounding and embedded ASCII
    /// whitespace ignored) is taken as an encoded ticket. Anything else is
    /// treated as a literal ticket whose UTF-8 bytes become the raw form.
    pub fn from_text(text: &str) -> Self {
        let compact: String = text
            .chars()
            .filter(|c| !c.is_ascii_whitespace())
            .collect();

        match decode_base64(&compact) {
            Some(raw) => Self::from_bytes(raw),
            None => Self::from_bytes(text.as_bytes().to_vec()),
        }
    }

    /// Build a license from raw ticket bytes.
    pub fn from_bytes(raw: impl Into<Vec<u8>>) -> Self {
        let raw = raw.into();
        let b64 = encode_base64(&raw);
        Self { raw, b64 }
    }

    /// Alias of [`License::from_text`] for ticket payloads.
    pub fn from_ticket(ticket: &str) -> Self {
        Self::from_text(ticket)
    }

    /// Raw ticket bytes.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Canonical base64 form, as submitted to the guest.
    pub fn b64(&self) -> &str {
        &self.b64
    }

    /// Consume the license and return the raw bytes.
    pub fn into_raw(self) -> Vec<u8> {
        self.raw
    }
}

impl fmt::Display for License {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.b64)
    }
}

impl From<&License> for License {
    fn from(license: &License) -> Self {
        license.clone()
    }
}

impl From<&str> for License {
    fn from(text: &str) -> Self {
        Self::from_text(text)
    }
}

impl From<String> for License {
    fn from(text: String) -> Self {
        Self::from_text(&text)
    }
}

impl From<&[u8]> for License {
    fn from(raw: &[u8]) -> Self {
        Self::from_bytes(raw.to_vec())
    }
}

impl From<Vec<u8>> for License {
    fn from(raw: Vec<u8>) -> Self {
        Self::from_bytes(raw)
    }
}

/// Standard alphabet, padded, tolerant of non-zero bits in the last symbol.
const TICKET_DECODER: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_allow_trailing_bits(true),
);

/// Encode ticket bytes as standard padded base64.
pub fn encode_base64(raw: &[u8]) -> String {
    general_purpose::STANDARD.encode(raw)
}

/// Decode standard padded base64, returning `None` on malformed input.
///
/// Unused bits in the final symbol are ignored, so `QR==` decodes to `A`.
pub fn decode_base64(value: &str) -> Option<Vec<u8>> {
    TICKET_DECODER.decode(value).ok()
}
