use crate::types::OfferId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum UpsellError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Offer {offer_id} not found")]
    NotFound { offer_id: OfferId },

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type UpsellResult<T> = Result<T, UpsellError>;
