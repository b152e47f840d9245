//! Encryption utilities for the keystore module.
//!
//! AES-256-GCM under a PBKDF2-HMAC-SHA256 key. The iteration count is fixed
//! at 100 000 for interoperability with the reference CLI and the browser
//! extension; changing it breaks every existing share file.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use pbkdf2::pbkdf2_hmac_array;
use rand::{rngs::OsRng, RngCore};
use sha2::Sha256;

use crate::keystore::KeystoreError;

pub const SALT_LEN: usize = 16;
pub const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32; // 256 bits

const PBKDF2_ITERATIONS: u32 = 100_000;

fn derive_key(password: &str, salt: &[u8]) -> Key<Aes256Gcm> {
    let key_bytes: [u8; KEY_LEN] =
        pbkdf2_hmac_array::<Sha256, KEY_LEN>(password.as_bytes(), salt, PBKDF2_ITERATIONS);
    *Key::<Aes256Gcm>::from_slice(&key_bytes)
}

/// Encrypts data with a password.
///
/// The output format is: `salt (16 bytes) || nonce (12 bytes) || ciphertext`
/// with the GCM tag appended to the ciphertext. Salt and nonce are freshly
/// random for every call.
pub fn encrypt_data(data: &[u8], password: &str) -> crate::keystore::Result<Vec<u8>> {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    let key = derive_key(password, &salt);

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let cipher = Aes256Gcm::new(&key);
    let ciphertext = cipher
        .encrypt(nonce, data)
        .map_err(|e| KeystoreError::EncryptionError(format!("Encryption error: {e}")))?;

    let mut result = Vec::with_capacity(SALT_LEN + NONCE_LEN + ciphertext.len());
    result.extend_from_slice(&salt);
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);

    Ok(result)
}

/// Decrypts data that was encrypted with `encrypt_data`.
///
/// The input format is expected to be: `salt (16) || nonce (12) || ciphertext`.
/// A rejected GCM tag maps to `DecryptionFailed`; that rejection is also
/// what authenticates the password, since unlock itself never verifies it.
pub fn decrypt_data(encrypted_data: &[u8], password: &str) -> crate::keystore::Result<Vec<u8>> {
    if encrypted_data.len() < SALT_LEN + NONCE_LEN {
        return Err(KeystoreError::EncryptionError(
            "Invalid encrypted data format".to_string(),
        ));
    }

    let salt = &encrypted_data[0..SALT_LEN];
    let nonce_bytes = &encrypted_data[SALT_LEN..SALT_LEN + NONCE_LEN];
    let ciphertext = &encrypted_data[SALT_LEN + NONCE_LEN..];

    let key = derive_key(password, salt);
    let nonce = Nonce::from_slice(nonce_bytes);
    let cipher = Aes256Gcm::new(&key);
    let plaintext = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| KeystoreError::DecryptionFailed)?;

    Ok(plaintext)
}

#[cfg(test)]
#[path = "encryption_test.rs"]
mod tests;
