//! # monalisa-cdm
//!
//! Multi-session front end for the MonaLisa guest module.
//!
//! This crate provides:
//! - [`Cdm`], a registry of independent guest sessions over one compiled module
//! - [`extract_keys`], the open / submit / collect / close sequence in one call
//! - the `monalisa` command-line tool (feature `cli`)
//!
//! ## Example
//!
//! ```ignore
//! use monalisa_cdm::{Cdm, KeyType};
//!
//! let cdm = Cdm::new("device.mld")?;
//! let session_id = cdm.open()?;
//! cdm.parse_license(&session_id, ticket)?;
//! for key in cdm.get_keys(&session_id, Some(KeyType::Content))? {
//!     println!("{}", key);
//! }
//! cdm.close(&session_id);
//! ```

mod cdm;

pub use cdm::{extract_keys, Cdm, SessionHandle};

// Re-export the types callers need alongside the registry
pub use monalisa_format::{Key, KeyType, License};
pub use monalisa_wasm_engine::{Error, ErrorCategory, GuestModule, Result, SessionConfig};
