//! Error types for the reminder service

use thiserror::Error;

/// Main application error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Email error: {0}")]
    Email(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Short machine-friendly label, used as a structured log field
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Database(_) => "database",
            AppError::Migration(_) => "migration",
            AppError::Config(_) => "config",
            AppError::Validation(_) => "validation",
            AppError::Email(_) => "email",
            AppError::Timeout(_) => "timeout",
            AppError::Lifecycle(_) => "lifecycle",
            AppError::Internal(_) => "internal",
        }
    }
}

/// Result type alias for application operations
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_context() {
        let err = AppError::Email("Invalid to address: nope".to_string());
        assert_eq!(err.to_string(), "Email error: Invalid to address: nope");
        assert_eq!(err.kind(), "email");
    }

    #[test]
    fn test_sqlx_error_converts() {
        let err: AppError = sqlx::Error::RowNotFound.into();
        assert_eq!(err.kind(), "database");
    }
}
