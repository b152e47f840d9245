//! Origin-scoped permissions and the user-facing account view.
//!
//! Two sibling stores sharing one persistence idiom: a pretty-printed JSON
//! file per store, cached in memory, rewritten on every mutation.

pub mod accounts;
pub mod permissions;

pub use accounts::{Account, AccountEvent, AccountRegistry};
pub use permissions::{PermissionEntry, PermissionRegistry};

/// Error types for the registry stores
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Storage failure: {0}")]
    StorageFailure(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Account already exists: {0}")]
    DuplicateAccount(String),
}

pub type Result<T> = std::result::Result<T, RegistryError>;
