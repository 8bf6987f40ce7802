use thiserror::Error;

#[derive(Error, Debug)]
pub enum RemoteError {
    /// Credential fetch or refresh failed. Fatal for the whole run.
    #[error("Authentication failed: {0}")]
    Auth(String),
    /// Non-success status or non-zero application code from the remote store
    #[error("Remote API error {code}: {message}")]
    Api { code: i64, message: String },
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Unexpected response payload: {0}")]
    Decode(String),
}

impl RemoteError {
    pub fn is_auth(&self) -> bool {
        matches!(self, RemoteError::Auth(_))
    }

    /// Numeric code for API errors, if any
    pub fn code(&self) -> Option<i64> {
        match self {
            RemoteError::Api { code, .. } => Some(*code),
            _ => None,
        }
    }
}
