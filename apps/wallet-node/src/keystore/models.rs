//! Data models for the keystore module.

use serde::{Deserialize, Serialize};

use crate::keystore::KEYSTORE_VERSION;

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Decrypted per-device key-share payload. This is the plaintext inside an
/// encrypted share blob; it never touches disk unencrypted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KeyShareRecord {
    pub version: u8,
    /// "secp256k1" or "ed25519", stored verbatim
    pub curve: String,
    /// This device's 1-based participant index
    pub participant_index: u16,
    pub total_participants: u16,
    pub threshold: u16,
    /// Ordered participant device ids; position defines participant index
    pub participants: Vec<String>,
    /// Opaque ciphersuite-specific serialization (JSON)
    pub key_package: String,
    pub public_key_package: String,
    /// Hex of the serialized group verifying key
    pub group_public_key: String,
    pub session_id: String,
    pub device_id: String,
    /// RFC 3339
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ethereum_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub solana_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_date: Option<String>,
}

/// Indexed wallet view used for listing; never requires touching ciphertext.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WalletEntry {
    /// Stable id, equals the share record's wallet id
    pub id: String,
    pub display_name: String,
    pub blockchain: String,
    pub primary_address: String,
    pub curve_type: String,
    pub session_id: String,
    pub is_active: bool,
    pub has_backup: bool,
    pub threshold: u16,
    pub total_participants: u16,
    pub participant_index: u16,
    /// Ordered participant list, kept in the index so signing proposals can
    /// be verified against the wallet without decrypting anything
    pub participants: Vec<String>,
    pub group_public_key: String,
    pub created_at: String,
}

/// Master index, one per device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeystoreIndex {
    pub version: u8,
    pub device_id: String,
    pub wallets: Vec<WalletEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_wallet_id: Option<String>,
    pub is_encrypted: bool,
    /// "password" or "none"
    pub encryption_method: String,
    pub last_modified: String,
}

impl KeystoreIndex {
    pub fn new(device_id: String) -> Self {
        Self {
            version: KEYSTORE_VERSION,
            device_id,
            wallets: Vec::new(),
            active_wallet_id: None,
            is_encrypted: true,
            encryption_method: "password".to_string(),
            last_modified: now_rfc3339(),
        }
    }

    pub fn get_wallet(&self, wallet_id: &str) -> Option<&WalletEntry> {
        self.wallets.iter().find(|w| w.id == wallet_id)
    }

    pub fn touch(&mut self) {
        self.last_modified = now_rfc3339();
    }
}

/// Self-contained wallet file envelope used for transport. The `data`
/// field is base64 of the raw `salt || nonce || ciphertext` bytes, so the
/// inner layout is identical to the on-disk share file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletFile {
    pub version: String,
    pub encrypted: bool,
    pub algorithm: String,
    pub data: String,
    pub metadata: WalletEntry,
}

impl WalletFile {
    pub fn wrap(metadata: WalletEntry, encrypted_blob: &[u8]) -> Self {
        use base64::{engine::general_purpose, Engine as _};
        Self {
            version: "2.0".to_string(),
            encrypted: true,
            algorithm: "AES-256-GCM-PBKDF2".to_string(),
            data: general_purpose::STANDARD.encode(encrypted_blob),
            metadata,
        }
    }
}

/// One wallet inside a portable backup: metadata plus the unchanged
/// encrypted blob. The importer must know the original password.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletBackup {
    pub metadata: WalletEntry,
    /// base64 of the raw encrypted blob
    pub data: String,
}

/// Portable keystore backup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeystoreBackup {
    pub version: u8,
    pub device_id: String,
    pub exported_at: String,
    pub wallets: Vec<WalletBackup>,
}
