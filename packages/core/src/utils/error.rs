// Типы ошибок

use crate::error::CryptoError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum E2eeError {
    /// AEAD tag mismatch: wrong key or tampered data.
    #[error("Authentication failed: wrong key or tampered data")]
    AuthenticationError,

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Handshake failure: {0}")]
    HandshakeFailure(String),

    #[error("Chain key absent: {0}")]
    ChainKeyAbsent(String),

    /// A responder that has not sent yet received a ratchet key other than
    /// the one announced in the handshake.
    #[error("Unexpected ratchet key from {0}")]
    UnexpectedRatchetKey(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Cryptography error: {0}")]
    Crypto(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<CryptoError> for E2eeError {
    fn from(error: CryptoError) -> Self {
        match error {
            CryptoError::AeadDecryptionError(_) => E2eeError::AuthenticationError,
            CryptoError::InvalidInputError(msg) => E2eeError::InvalidKey(msg),
            other => E2eeError::Crypto(other.to_string()),
        }
    }
}

impl From<bincode::Error> for E2eeError {
    fn from(error: bincode::Error) -> Self {
        E2eeError::Serialization(error.to_string())
    }
}

impl From<serde_json::Error> for E2eeError {
    fn from(error: serde_json::Error) -> Self {
        E2eeError::Serialization(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, E2eeError>;
