use sqlx::migrate::MigrateError;
use thiserror::Error;

use crate::store::models::TransactionStatus;

/// Top-level error type for the entire application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Horizon error: {0}")]
    Horizon(String),

    #[error("Signing error: {0}")]
    Signing(#[from] SigningError),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("External error: {0}")]
    ExternalError(String),
}

/// Persistence-layer errors with domain meaning beyond a raw sqlx failure.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("record not found")]
    RecordNotFound,

    #[error("there are no channel accounts available to process transactions")]
    InsufficientChannelAccounts,

    #[error("cannot transition from {from} to {to}")]
    InvalidStatusTransition {
        from: TransactionStatus,
        to: TransactionStatus,
    },
}

/// Key handling and envelope signing errors
#[derive(Error, Debug)]
pub enum SigningError {
    #[error("invalid strkey: {0}")]
    InvalidStrkey(String),

    #[error("keypair error: {0}")]
    Keypair(String),

    #[error("seed encryption error: {0}")]
    SeedEncryption(String),

    #[error("XDR serialization error: {0}")]
    Xdr(String),
}

impl From<stellar_xdr::curr::Error> for AppError {
    fn from(error: stellar_xdr::curr::Error) -> Self {
        AppError::Signing(SigningError::Xdr(format!("{:?}", error)))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        AppError::Internal(format!("Error converting: {:?}", error))
    }
}

impl From<rust_decimal::Error> for AppError {
    fn from(error: rust_decimal::Error) -> Self {
        AppError::InvalidInput(format!("Decimal conversion error: {:?}", error))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(error: reqwest::Error) -> Self {
        AppError::ExternalError(format!("HTTP request error: {:?}", error))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(error: serde_json::Error) -> Self {
        AppError::Internal(format!("JSON serialization error: {:?}", error))
    }
}

impl From<MigrateError> for AppError {
    fn from(error: MigrateError) -> Self {
        AppError::Internal(format!("Migration error: {:?}", error))
    }
}

/// Result type alias for the application
pub type AppResult<T> = Result<T, AppError>;
