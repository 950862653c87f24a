use thiserror::Error;

/// Errors raised by the message substrate.
#[derive(Debug, Error)]
pub enum BusError {
    /// A consumed record has no `TENANT_ID` header.
    #[error("record is missing the TENANT_ID header")]
    MissingTenant,

    #[error("invalid header {name}: {value}")]
    InvalidHeader { name: &'static str, value: String },

    /// The length prefix does not match the payload.
    #[error("malformed record frame: {0}")]
    Frame(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("operation cancelled")]
    Cancelled,

    #[error("broker closed")]
    Closed,
}

impl BusError {
    /// Contract violations are unrecoverable for the record that caused them.
    pub fn is_poison(&self) -> bool {
        matches!(
            self,
            BusError::MissingTenant
                | BusError::InvalidHeader { .. }
                | BusError::Frame(_)
                | BusError::Serialization(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, BusError>;
