use std::fmt;
use thiserror::Error;

/// Errors from the guest execution bridge.
///
/// Every variant belongs to exactly one [`ErrorCategory`], which is what the
/// command-line surface reports.
#[derive(Error, Debug)]
pub enum Error {
    /// Descriptor missing or malformed, binary missing, or compilation failure.
    #[error("{0}")]
    Module(String),

    /// Instantiation, export resolution, guest trap, or unknown session.
    #[error("{0}")]
    Session(String),

    /// Failure while submitting a license or extracting its key.
    #[error("{0}")]
    License(String),

    /// The guest's license setter returned a non-zero code.
    #[error("License validation failed with code: {code}")]
    LicenseRejected {
        /// Code returned by the guest.
        code: i32,
    },
}

/// The three failure families surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Module loading.
    Module,
    /// Session lifecycle and guest execution.
    Session,
    /// License processing.
    License,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorCategory::Module => "Module error",
            ErrorCategory::Session => "Session error",
            ErrorCategory::License => "License error",
        })
    }
}

impl Error {
    /// Category of this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Module(_) => ErrorCategory::Module,
            Error::Session(_) => ErrorCategory::Session,
            Error::License(_) | Error::LicenseRejected { .. } => ErrorCategory::License,
        }
    }

    /// Wrap a wasmtime failure as a session error, keeping its cause chain.
    pub(crate) fn session(context: &str, err: anyhow::Error) -> Self {
        Error::Session(format!("{}: {:#}", context, err))
    }
}

impl From<monalisa_format::Error> for Error {
    fn from(err: monalisa_format::Error) -> Self {
        Error::Module(err.to_string())
    }
}

/// Result type for monalisa-wasm-engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_license_is_a_license_error() {
        let err = Error::LicenseRejected { code: 7 };
        assert_eq!(err.category(), ErrorCategory::License);
        assert_eq!(err.to_string(), "License validation failed with code: 7");
    }

    #[test]
    fn descriptor_errors_become_module_errors() {
        let err: Error = monalisa_format::Error::MissingField("wasm_path".to_string()).into();
        assert_eq!(err.category(), ErrorCategory::Module);
        assert!(err.to_string().contains("wasm_path"));
    }

    #[test]
    fn session_wrapper_keeps_cause_chain() {
        let cause = anyhow::anyhow!("out of bounds memory access").context("wasm trap");
        let err = Error::session("Failed to initialize session", cause);
        let text = err.to_string();
        assert!(text.starts_with("Failed to initialize session: wasm trap"));
        assert!(text.contains("out of bounds memory access"));
    }
}
