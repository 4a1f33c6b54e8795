//! Error types for script execution, purchases, saves and configuration.

use thiserror::Error;

/// Why a single script execution attempt failed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ErrorKind {
    /// The script raised an error, failed to parse, or the sandbox broke down.
    #[error("Script error: {0}")]
    ScriptError(String),

    /// The script ran past its wall-clock budget and was terminated.
    #[error("Maximum execution time exceeded ({deadline_ms}ms)")]
    DeadlineExceeded {
        /// Budget that was exceeded.
        deadline_ms: u64,
    },
}

/// A purchase that could not be applied to the simulation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PurchaseError {
    /// A cost entry exceeds what the register currently holds.
    #[error("Cannot afford {action}: need {required} {resource}, have {available}")]
    Unaffordable {
        /// Action that was attempted.
        action: String,
        /// Register the cost is drawn from.
        resource: String,
        /// Amount required.
        required: f64,
        /// Amount available at application time.
        available: f64,
    },

    /// The cost table names a register that is missing or still locked.
    #[error("Cannot afford {action}: register {resource} is not available")]
    UnknownRegister {
        /// Action that was attempted.
        action: String,
        /// Register named by the cost table.
        resource: String,
    },

    /// The upgrade is not purchasable right now.
    #[error("Upgrade {0} is not available")]
    NotAvailable(String),
}

/// Failure to decode or store a save file.
#[derive(Debug, Error)]
pub enum SaveError {
    #[error("Save data is empty")]
    Empty,

    #[error("Invalid base64 data: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Failed to decompress save data: {0}")]
    Decompress(std::io::Error),

    #[error("Invalid save JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Save file has no version or data")]
    MissingData,

    #[error("Unable to upgrade save from version {found} (current version {current})")]
    UnsupportedVersion { found: u32, current: u32 },

    #[error("Save file I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure to read the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}
