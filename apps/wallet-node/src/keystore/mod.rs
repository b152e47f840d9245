//! Keystore module for secure storage of FROST key shares.
//!
//! Persists encrypted key-share records and the wallet metadata index,
//! enforces the locked/unlocked lifecycle, and interoperates byte-exactly
//! with the reference CLI keystore layout.

mod encryption;
mod models;
mod storage;

pub use encryption::{decrypt_data, encrypt_data, NONCE_LEN, SALT_LEN};
pub use models::{
    KeyShareRecord, KeystoreBackup, KeystoreIndex, WalletBackup, WalletEntry, WalletFile,
};
pub use storage::Keystore;

/// Error types that can occur during keystore operations
#[derive(Debug, thiserror::Error)]
pub enum KeystoreError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Encryption error: {0}")]
    EncryptionError(String),

    /// AEAD tag rejected: wrong password or tampered blob.
    #[error("Decryption failed")]
    DecryptionFailed,

    #[error("Keystore is locked")]
    Locked,

    #[error("Wallet not found: {0}")]
    WalletNotFound(String),

    #[error("Wallet already exists: {0}")]
    WalletAlreadyExists(String),

    #[error("Storage failure: {0}")]
    StorageFailure(String),
}

/// Result type for keystore operations
pub type Result<T> = std::result::Result<T, KeystoreError>;

/// Current keystore file format version
pub const KEYSTORE_VERSION: u8 = 1;
