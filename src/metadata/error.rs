use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("invalid binary format: {reason}")]
    InvalidBinaryFormat { reason: String },

    #[error("runtime root type not found in {assembly}")]
    RuntimeTypeNotFound { assembly: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MetadataError {
    pub fn format(reason: impl Into<String>) -> Self {
        Self::InvalidBinaryFormat {
            reason: reason.into(),
        }
    }

    /// Short classification tag used in diagnostics and failed-file records.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidBinaryFormat { .. } => "InvalidBinaryFormat",
            Self::RuntimeTypeNotFound { .. } => "RuntimeTypeNotFound",
            Self::Io(_) => "Io",
        }
    }
}

pub type Result<T> = std::result::Result<T, MetadataError>;
