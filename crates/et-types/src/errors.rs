use thiserror::Error;

/// Main error type for the enhancement tuner
#[derive(Error, Debug)]
pub enum TunerError {
    #[error("Unknown backend: {label}")]
    UnknownBackend { label: String },

    #[error("Invalid field {field}: {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid rating: {rating} is not a finite number")]
    InvalidRating { rating: f64 },

    #[error("Invalid suggestion count: {count} (expected 1..={max})")]
    InvalidSuggestionCount { count: usize, max: usize },

    #[error("Surrogate model error: {message}")]
    Surrogate { message: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for tuner operations
pub type TunerResult<T> = Result<T, TunerError>;

impl TunerError {
    pub fn invalid_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn surrogate(message: impl Into<String>) -> Self {
        Self::Surrogate {
            message: message.into(),
        }
    }

    /// Whether the error was caused by caller-supplied input rather than an
    /// internal fault.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownBackend { .. }
                | Self::InvalidField { .. }
                | Self::InvalidRating { .. }
                | Self::InvalidSuggestionCount { .. }
        )
    }
}
