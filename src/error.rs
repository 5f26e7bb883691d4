use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Type conversion error: field {field} has non-numeric value {value:?}")]
    TypeConversion { field: String, value: String },
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Instance spec lookup unavailable for {0}")]
    LookupUnavailable(String),
    #[error("Unknown column: {0}")]
    UnknownColumn(String),
    #[error("Missing required field {field} in {shape} finding")]
    MissingField { shape: &'static str, field: &'static str },
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl TrackerError {
    pub fn type_conversion(field: &str, value: impl ToString) -> Self {
        TrackerError::TypeConversion {
            field: field.to_string(),
            value: value.to_string(),
        }
    }

    /// True for failures that should degrade a single value rather than abort.
    pub fn is_soft(&self) -> bool {
        matches!(self, TrackerError::LookupUnavailable(_))
    }
}

impl From<String> for TrackerError {
    fn from(err: String) -> Self {
        TrackerError::Storage(err)
    }
}

impl From<&str> for TrackerError {
    fn from(err: &str) -> Self {
        TrackerError::Storage(err.to_string())
    }
}
