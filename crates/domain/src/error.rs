/// Shared error type used across all Cerise crates.
///
/// Variants are error *kinds* rather than concrete causes: abilities and tool
/// calls convert these into `AbilityResult` failures, infrastructure code
/// logs and degrades.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("transport: {0}")]
    Transport(String),

    #[error("remote error {code}: {message}")]
    External {
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    #[error("corrupt state: {0}")]
    Corruption(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True when the error came from a remote JSON-RPC peer.
    pub fn is_external(&self) -> bool {
        matches!(self, Error::External { .. })
    }
}
