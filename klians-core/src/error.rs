//! Error handling for the Klians client core
//!
//! Every fallible operation in this crate returns [`Result`], whose error
//! type is [`ClientError`]. Errors from the HTTP stack, the WebSocket
//! stack, JSON decoding and file I/O convert automatically through `?`.
//!
//! ## Error Handling Patterns
//!
//! ```rust
//! use klians_core::Result;
//!
//! fn parse_record(data: &[u8]) -> Result<serde_json::Value> {
//!     // serde_json::Error converts into ClientError::Json
//!     let value: serde_json::Value = serde_json::from_slice(data)?;
//!     Ok(value)
//! }
//! ```
//!
//! Nothing inside a session is fatal. Services catch their own errors and
//! turn them into one of:
//! - a fallback data set (feed refresh),
//! - an inline error string (announcements, conversation history),
//! - a compensated command (like toggles).
//!
//! Use [`ClientError::user_message`] for the text shown to the user and
//! [`ClientError::is_recoverable`] to decide whether a retry makes sense.
//!
//! ```rust
//! use klians_core::ClientError;
//!
//! let error = ClientError::Api { status: 503, message: "maintenance".to_string() };
//! assert!(error.is_recoverable());
//!
//! let error = ClientError::PermissionDenied("students cannot broadcast".to_string());
//! assert!(error.requires_user_action());
//! ```

use thiserror::Error;

/// Result type for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur in the client core
///
/// # Automatic Conversions
///
/// - `reqwest::Error` → `ClientError::Http`
/// - `serde_json::Error` → `ClientError::Json`
/// - `std::io::Error` → `ClientError::Io`
/// - `tungstenite::Error` → `ClientError::WebSocket`
#[derive(Error, Debug)]
pub enum ClientError {
    /// Transport-level HTTP failure (connect, TLS, body decode)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error (cache file, config directory)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket error on the realtime channel
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The REST API answered with a non-success status
    ///
    /// ```rust
    /// use klians_core::ClientError;
    ///
    /// let error = ClientError::Api { status: 404, message: "Post not found".to_string() };
    /// assert_eq!(error.to_string(), "API error: 404 - Post not found");
    /// ```
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// A record that was expected locally does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// A payload did not have the expected shape
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Operation attempted in a state that does not allow it
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Another operation on the same target is still in flight
    #[error("Busy: {0}")]
    Busy(String),

    /// The viewer's role or ownership does not allow the operation
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// User input rejected before any network call
    #[error("Validation error: {0}")]
    Validation(String),

    /// Local cache could not be read or written
    #[error("Cache error: {0}")]
    Cache(String),

    /// Realtime channel failure that is not a plain WebSocket error
    #[error("Realtime error: {0}")]
    Realtime(String),

    /// A network operation timed out
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Network connection failed or was interrupted
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Operation cancelled (session closed, channel shut down)
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// Invalid or missing configuration
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl ClientError {
    /// Check if this error is recoverable (transient error that can be retried)
    ///
    /// Server-side 5xx and 429 answers count as transient; other API
    /// statuses do not.
    pub fn is_recoverable(&self) -> bool {
        match self {
            ClientError::Api { status, .. } => *status >= 500 || *status == 429,
            ClientError::Http(e) => e.is_timeout() || e.is_connect(),
            ClientError::Timeout(_)
            | ClientError::NetworkError(_)
            | ClientError::Realtime(_)
            | ClientError::WebSocket(_)
            | ClientError::Busy(_) => true,
            _ => false,
        }
    }

    /// Check if this error cannot be resolved without the user
    pub fn requires_user_action(&self) -> bool {
        match self {
            ClientError::Api { status, .. } => *status == 401 || *status == 403,
            ClientError::PermissionDenied(_)
            | ClientError::Validation(_)
            | ClientError::Configuration(_) => true,
            _ => false,
        }
    }

    /// Get a user-friendly message suitable for an alert or inline error
    ///
    /// ```rust
    /// use klians_core::ClientError;
    ///
    /// let error = ClientError::Validation("Please fill in all fields".to_string());
    /// assert_eq!(error.user_message(), "Please fill in all fields");
    /// ```
    pub fn user_message(&self) -> String {
        match self {
            ClientError::Api { status: 401, .. } => {
                "Your session has expired. Please sign in again.".to_string()
            }
            ClientError::Api { status: 403, .. } => {
                "You are not allowed to do that.".to_string()
            }
            ClientError::Api { message, .. } => {
                format!("{}. Please try again.", message.trim_end_matches('.'))
            }
            ClientError::Http(_) | ClientError::NetworkError(_) => {
                "Unable to reach the server. Check your connection.".to_string()
            }
            ClientError::Timeout(_) => "The server took too long to answer.".to_string(),
            ClientError::Busy(_) => "Please wait for the previous action to finish.".to_string(),
            ClientError::PermissionDenied(msg) | ClientError::Validation(msg) => msg.clone(),
            ClientError::NotFound(what) => format!("{} no longer exists.", what),
            ClientError::Json(_) | ClientError::InvalidPayload(_) => {
                "Received data in an unexpected format.".to_string()
            }
            ClientError::Realtime(_) | ClientError::WebSocket(_) => {
                "Live updates are temporarily unavailable.".to_string()
            }
            ClientError::Configuration(msg) => {
                format!("Configuration error: {}. Check your settings.", msg)
            }
            ClientError::Io(_) | ClientError::Cache(_) => {
                "Local storage is unavailable.".to_string()
            }
            ClientError::InvalidState(msg) => format!("Invalid state: {}.", msg),
            ClientError::Cancelled(msg) => format!("Operation cancelled: {}.", msg),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        ClientError::InvalidState(msg.into())
    }

    /// Create an invalid payload error
    pub fn invalid_payload(msg: impl Into<String>) -> Self {
        ClientError::InvalidPayload(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        ClientError::Validation(msg.into())
    }
}
