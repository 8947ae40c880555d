use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog unavailable: {reason}")]
    CatalogUnavailable { reason: String },

    #[error("malformed catalog: {reason}")]
    MalformedCatalog { reason: String },
}

pub type Result<T> = std::result::Result<T, CatalogError>;
