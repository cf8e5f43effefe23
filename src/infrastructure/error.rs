use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Credential store error: {0}")]
    Credential(String),
    #[error("Request failed: {0}")]
    Transport(String),
    #[error("Session expired: {0}")]
    AuthExpired(String),
    #[error("Logout required: {0}")]
    LogoutRequired(String),
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("API error: http {status}; {message}")]
    Api { status: u16, message: String },
    #[error("Not authenticated; run `worktime login` first")]
    NotAuthenticated,
    #[error("Internal error: {0}")]
    Internal(String),
}

impl InfraError {
    /// Failures that leave the server-side work session unknown to us.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    pub fn requires_login(&self) -> bool {
        matches!(self, Self::LogoutRequired(_) | Self::NotAuthenticated)
    }
}
