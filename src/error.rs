use thiserror::Error;

/// Per-advertisement failures (short payloads, malformed feed lines) never
/// abort a scan. Adapter-level failures reach the application through the
/// scanner's error subscribers.
#[derive(Debug, Error)]
pub enum Error {
    /// The radio adapter cannot be used (powered off, missing, unsupported).
    #[error("Bluetooth adapter unavailable: {0}")]
    AdapterUnavailable(String),

    /// The advertisement payload does not reach the byte offset a field lives at.
    #[error("advertisement payload too short for {field}: need {needed} bytes, got {actual}")]
    PayloadTooShort {
        field: &'static str,
        needed: usize,
        actual: usize,
    },

    /// Distance/accuracy are undefined for a zero reference power.
    #[error("reference power must be non-zero")]
    InvalidReferencePower,

    #[error("invalid hex payload {data:?}: {source}")]
    InvalidPayloadHex {
        data: String,
        source: hex::FromHexError,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[cfg(feature = "bluetooth")]
    #[error("BlueZ error: {0}")]
    Bluez(#[from] bluer::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
