//! Error types for the Anima runtime

/// Result type alias using [`Error`]
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Main error type for the Anima runtime
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid inbound request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Route not found
    #[error("Route not found: {0}")]
    RouteNotFound(String),

    /// Duplicate route id within one application
    #[error("Duplicate route id: {0}")]
    DuplicateRoute(u32),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Middleware error
    #[error("Middleware error: {0}")]
    Middleware(String),

    /// The request context was cancelled before the chain completed
    #[error("Execution cancelled")]
    Cancelled,

    /// Malformed wire frame
    #[error("Invalid frame: {0}")]
    Frame(String),

    /// Queue subsystem error surfaced to a runner
    #[error("Queue error: {0}")]
    Queue(String),

    /// IoC container error
    #[error("Container error: {0}")]
    Container(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] http::Error),

    /// Runtime error
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// Graceful shutdown did not complete within its budget.
    ///
    /// Kept distinct so callers can tell a drained shutdown from a forced
    /// one.
    #[error("Shutdown wait timed out")]
    ShutdownTimeout,
}

impl Error {
    /// Convert error to HTTP status code
    pub fn to_status_code(&self) -> http::StatusCode {
        use http::StatusCode;
        match self {
            Error::InvalidRequest(_) | Error::Frame(_) => StatusCode::BAD_REQUEST,
            Error::RouteNotFound(_) => StatusCode::NOT_FOUND,
            Error::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
