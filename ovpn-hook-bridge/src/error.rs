//! Error types for the hook bridge
//!
//! Only [`BridgeError`] ever leaves `initialize`. Dispatch-time failures
//! ([`InvokeError`]) are logged and collapsed into `Outcome::Error`.

use std::path::PathBuf;
use thiserror::Error;

/// Fallback text when a load failure has no printable diagnostic
pub const LOST_DIAGNOSTIC: &str = "error message is lost";

/// Invalid plugin configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Module identifier is missing or empty")]
    MissingModule,

    #[error("Invalid option '{option}': {reason}")]
    InvalidOption { option: String, reason: String },

    #[error("Plugin argument is not valid UTF-8")]
    InvalidUtf8,
}

impl ConfigError {
    pub fn invalid_option(option: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidOption {
            option: option.into(),
            reason: reason.into(),
        }
    }
}

/// Errors that can occur while importing the hook module
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Engine creation failed: {0}")]
    Runtime(#[source] anyhow::Error),

    #[error("Module '{module}' not found in {searched:?}")]
    NotFound {
        module: String,
        searched: Vec<PathBuf>,
    },

    #[error("Failed to read module {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Module compilation failed: {0}")]
    Compilation(#[source] anyhow::Error),

    #[error("Instantiation failed: {0}")]
    Instantiation(#[source] anyhow::Error),

    #[error("Required export not found: {0}")]
    MissingExport(&'static str),

    #[error("API version mismatch: expected {expected}, got {actual}")]
    ApiVersionMismatch { expected: u32, actual: i64 },
}

impl LoadError {
    /// Render the failure with its full cause chain, best-effort
    ///
    /// A cause that renders to nothing is reported as [`LOST_DIAGNOSTIC`]
    /// so the failure is never left unsignaled.
    pub fn diagnostic(&self) -> String {
        let (summary, detail) = match self {
            Self::Runtime(source) => ("Engine creation failed", format!("{source:#}")),
            Self::Compilation(source) => ("Module compilation failed", format!("{source:#}")),
            Self::Instantiation(source) => ("Instantiation failed", format!("{source:#}")),
            Self::Read { path, source } => {
                return format!(
                    "Failed to read module {}: {}",
                    path.display(),
                    or_lost(source.to_string())
                );
            }
            _ => return self.to_string(),
        };
        format!("{summary}: {}", or_lost(detail))
    }
}

fn or_lost(detail: String) -> String {
    if detail.trim().is_empty() {
        LOST_DIAGNOSTIC.to_string()
    } else {
        detail
    }
}

/// Errors that fail `initialize`
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to load hook module: {0}")]
    Load(#[from] LoadError),
}

/// Errors that can occur while invoking a handler
#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("Hook '{0}' has no bound handler")]
    Unsupported(&'static str),

    #[error("Module reload failed: {0}")]
    Load(#[from] LoadError),

    #[error("Environment encoding failed: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("Memory access error: {0}")]
    Memory(String),

    #[error("Handler call failed: {function} - {source}")]
    Trap {
        function: &'static str,
        #[source]
        source: anyhow::Error,
    },
}
