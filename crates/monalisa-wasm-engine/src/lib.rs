//! # monalisa-wasm-engine
//!
//! Host bridge for the MonaLisa guest module.
//!
//! This crate uses [wasmtime](https://wasmtime.dev/) to compile the guest once,
//! emulate the small Emscripten-style runtime surface it imports, and drive
//! its license protocol inside a per-session store:
//!
//! 1. [`GuestModule`] compiles the guest from a descriptor.
//! 2. [`GuestSession::initialize`] allocates the fixed-size linear memory,
//!    links [`HostImports`], runs the guest constructors and allocates the
//!    guest context.
//! 3. [`GuestSession::parse_license`] marshals the ticket onto the guest stack,
//!    calls the license setter and reads the recovered key from memory.
//!
//! Guest traps never unwind past a session: they come back as [`Error`]
//! values in the session or license category.
//!
//! ## Example
//!
//! ```ignore
//! use monalisa_format::{KeyType, License};
//! use monalisa_wasm_engine::{GuestModule, GuestSession};
//!
//! let module = GuestModule::load("device.mld")?;
//! let mut session = GuestSession::new("session-1", &module, module.session_config());
//! session.initialize()?;
//! session.parse_license(&License::from_text(ticket))?;
//! for key in session.get_keys(Some(KeyType::Content)) {
//!     println!("{}", key);
//! }
//! ```

pub mod config;
pub mod error;
pub mod host;
pub mod memory;
pub mod module;
pub mod session;

pub use config::{SessionConfig, LICENSE_SENTINEL, MEMORY_PAGES};
pub use error::{Error, ErrorCategory, Result};
pub use host::{HostImports, HostState, HOST_IMPORTS};
pub use memory::{MemoryError, MemoryView};
pub use module::GuestModule;
pub use session::{
    read_license_key, GuestArg, GuestSession, GuestValue, ReturnKind, SessionState,
};
