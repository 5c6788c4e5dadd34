//! Unified error types for the provisioning core.
//!
//! Every fallible operation funnels into [`CoreError`], keeping the error
//! handling uniform across the Wi-Fi manager, the RFCOMM server, the HTTP
//! surface and the supervisor tasks. Each concern gets its own `thiserror`
//! enum; `CoreError` aggregates them with `#[from]` so `?` composes across
//! module boundaries without manual `map_err` chains.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = core::result::Result<T, CoreError>;

/// Top-level error taxonomy (`spec` §7).
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    InvalidArgument(#[from] InvalidArgumentError),

    #[error(transparent)]
    Unavailable(#[from] UnavailableError),

    #[error(transparent)]
    HostTool(#[from] HostToolError),

    #[error("reachability probe to {ip} failed after {attempts} attempts")]
    Unreachable { ip: String, attempts: u32 },

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("operation cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidArgumentError {
    #[error("SSID is missing or malformed")]
    InvalidSsid,
    #[error("'{0}' is not a valid IPv4 address")]
    InvalidIpv4(String),
    #[error("password must be 8-63 bytes for WPA-PSK")]
    WeakPsk,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnavailableError {
    #[error("Wi-Fi radio is disabled")]
    RadioDisabled,
    #[error("SSID '{requested}' not found in scan cache; nearby: {nearby}")]
    SsidNotFound { requested: String, nearby: String },
    #[error("Wi-Fi state mutex busy (acquisition timed out)")]
    MutexTimeout,
}

#[derive(Debug, Clone, Error)]
#[error("host tool '{command}' exited with status {exit_code}: {stderr}")]
pub struct HostToolError {
    pub command: String,
    pub exit_code: i32,
    pub stderr: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("private key file missing or unreadable")]
    KeyFileMissing,
    #[error("malformed PEM key material")]
    MalformedKey,
    #[error("signature verification failed")]
    VerificationFailed,
    #[error("decryption failed")]
    DecryptFailed,
    #[error("invalid base64 payload")]
    InvalidBase64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("unsupported message type {0}")]
    UnsupportedType(i64),
}
