//! Error type shared by every layer of the entry service.

use crate::login::Role;

/// Everything that can go wrong while serving a user action.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Username/password pair did not match the credential table
    #[error("Invalid username or password")]
    InvalidCredentials,

    /// No live session for the request
    #[error("not logged in")]
    Unauthenticated,

    /// Logged in, but the role may not perform this action
    #[error("role '{0}' is not allowed to do this")]
    Forbidden(Role),

    /// Malformed grid, date or request payload
    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    /// Fault reported by the remote spreadsheet service
    #[error("spreadsheet service error: {0}")]
    Remote(String),

    /// Reference template could not be read
    #[error("template error: {0}")]
    Template(String),

    #[error("configuration error: {0}")]
    Config(String),

    /// History download could not be produced
    #[error("export failed: {0}")]
    Export(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Short machine-readable kind, used in JSON error bodies and logs
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::InvalidCredentials => "invalid_credentials",
            AppError::Unauthenticated => "unauthenticated",
            AppError::Forbidden(_) => "forbidden",
            AppError::Validation(_) => "validation",
            AppError::NotFound(_) => "not_found",
            AppError::Remote(_) => "remote",
            AppError::Template(_) => "template",
            AppError::Config(_) => "config",
            AppError::Export(_) => "export",
            AppError::Io(_) => "io",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_message_carries_fault_text() {
        let err = AppError::Remote("quota exceeded".to_string());
        assert_eq!(err.to_string(), "spreadsheet service error: quota exceeded");
        assert_eq!(err.kind(), "remote");
    }

    #[test]
    fn forbidden_names_the_role() {
        let err = AppError::Forbidden(Role::Doctor);
        assert_eq!(err.to_string(), "role 'doctor' is not allowed to do this");
    }
}
