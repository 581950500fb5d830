//! # monalisa-format
//!
//! Data formats shared by the MonaLisa host bridge.
//!
//! This crate provides:
//! - License ticket normalization (raw bytes and canonical base64)
//! - The key model returned to callers
//! - Correlation identifier extraction and key identifier derivation
//! - Module descriptor (`.mld` / `.json` / `.toml`) reading and writing
//!
//! ## Example
//!
//! ```ignore
//! use monalisa_format::{derive_key_id, License, ModuleDescriptor};
//!
//! let descriptor = ModuleDescriptor::load("device.mld")?;
//! let license = License::from_text("AIUACgMAAAAAAAAAAAQChgACATADhwAn...");
//! let kid = derive_key_id(license.raw());
//! ```

mod correlation;
mod descriptor;
mod error;
mod key;
mod license;

pub use correlation::{ascii_text, derive_key_id, find_correlation_id, CORRELATION_PATTERN};
pub use descriptor::{
    DescriptorSyntax, MemoryLayout, ModuleDescriptor, DYNAMICTOP_PTR, DYNAMIC_BASE,
    LICENSE_KEY_LENGTH, LICENSE_KEY_OFFSET,
};
pub use error::{Error, Result};
pub use key::{bytes_to_hex, hex_to_bytes, Key, KeyType};
pub use license::{decode_base64, encode_base64, License};

// Re-export uuid so callers can name key identifiers without a direct dependency
pub use uuid::Uuid;

/// Environment strings the guest's runtime prelude reads during startup.
pub const GUEST_ENVIRONMENT: &[&str] = &[
    "USER=web_user",
    "LOGNAME=web_user",
    "PATH=/",
    "PWD=/",
    "HOME=/home/web_user",
    "LANG=zh_CN.UTF-8",
    "_=./this.program",
];

/// Owned copy of [`GUEST_ENVIRONMENT`].
pub fn default_environment() -> Vec<String> {
    GUEST_ENVIRONMENT.iter().map(|s| s.to_string()).collect()
}
