use super::*;
use crate::keystore::KeystoreError;
use std::collections::HashSet;

#[test]
fn test_encrypt_decrypt_roundtrip() {
    let data = b"frost key share bytes";
    let encrypted = encrypt_data(data, "correct horse").unwrap();
    let decrypted = decrypt_data(&encrypted, "correct horse").unwrap();
    assert_eq!(decrypted, data);
}

#[test]
fn test_wrong_password_is_decryption_failed() {
    let encrypted = encrypt_data(b"secret", "right").unwrap();
    match decrypt_data(&encrypted, "wrong") {
        Err(KeystoreError::DecryptionFailed) => {}
        other => panic!("expected DecryptionFailed, got {other:?}"),
    }
}

#[test]
fn test_layout_is_salt_nonce_ciphertext() {
    let data = b"layout probe";
    let encrypted = encrypt_data(data, "pw").unwrap();
    // salt(16) || nonce(12) || ciphertext || tag(16)
    assert_eq!(encrypted.len(), SALT_LEN + NONCE_LEN + data.len() + 16);
}

#[test]
fn test_salts_and_nonces_are_fresh_per_encryption() {
    let mut salts = HashSet::new();
    let mut nonces = HashSet::new();
    let mut ciphertexts = HashSet::new();
    for _ in 0..32 {
        let encrypted = encrypt_data(b"same plaintext", "same password").unwrap();
        salts.insert(encrypted[..SALT_LEN].to_vec());
        nonces.insert(encrypted[SALT_LEN..SALT_LEN + NONCE_LEN].to_vec());
        ciphertexts.insert(encrypted[SALT_LEN + NONCE_LEN..].to_vec());
    }
    assert_eq!(salts.len(), 32);
    assert_eq!(nonces.len(), 32);
    // Distinct salt/nonce pairs must yield distinct ciphertexts for the
    // same plaintext.
    assert_eq!(ciphertexts.len(), 32);
}

#[test]
fn test_tampered_ciphertext_rejected() {
    let mut encrypted = encrypt_data(b"integrity", "pw").unwrap();
    let last = encrypted.len() - 1;
    encrypted[last] ^= 0x01;
    match decrypt_data(&encrypted, "pw") {
        Err(KeystoreError::DecryptionFailed) => {}
        other => panic!("expected DecryptionFailed, got {other:?}"),
    }
}

#[test]
fn test_truncated_blob_rejected() {
    match decrypt_data(&[0u8; 10], "pw") {
        Err(KeystoreError::EncryptionError(_)) => {}
        other => panic!("expected format error, got {other:?}"),
    }
}

#[test]
fn test_empty_plaintext_roundtrip() {
    let encrypted = encrypt_data(b"", "pw").unwrap();
    assert_eq!(decrypt_data(&encrypted, "pw").unwrap(), Vec::<u8>::new());
}
