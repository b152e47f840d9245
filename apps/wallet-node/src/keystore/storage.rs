//! Storage functionality for the keystore module.
//!
//! Directory layout, shared with the reference CLI:
//!
//! ```text
//! <base>/<device_id>/index.json
//! <base>/<device_id>/<curve>/<wallet_id>.dat      raw salt||nonce||ciphertext
//! ```
//!
//! Commit order makes crashes recoverable without a journal: a new share
//! blob is fully written (tmp + rename) before the index references it, and
//! a removed wallet leaves the index before its blob is deleted. Blobs not
//! referenced by the index are swept at the next initialize.

use std::collections::HashMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose, Engine as _};
use zeroize::Zeroizing;

use super::{
    encryption::{decrypt_data, encrypt_data},
    models::{KeyShareRecord, KeystoreBackup, KeystoreIndex, WalletBackup, WalletEntry, WalletFile},
    KeystoreError, Result, KEYSTORE_VERSION,
};

const CURVE_DIRS: [&str; 2] = ["secp256k1", "ed25519"];

struct UnlockedState {
    password: Zeroizing<String>,
    /// wallet_id -> decrypted share bytes, kept for the unlock lifetime
    shares: HashMap<String, Zeroizing<Vec<u8>>>,
}

/// Main keystore interface. Locked on construction.
pub struct Keystore {
    base_path: PathBuf,
    device_id: String,
    index: KeystoreIndex,
    unlocked: Option<UnlockedState>,
}

impl Keystore {
    /// Opens (or creates) the keystore for a device and sweeps any blob the
    /// index does not reference (leftovers of interrupted commits).
    pub fn initialize(base_path: impl AsRef<Path>, device_id: &str) -> Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        let device_dir = base_path.join(device_id);
        for curve in CURVE_DIRS {
            fs::create_dir_all(device_dir.join(curve))?;
        }

        let index_path = device_dir.join("index.json");
        let index = if index_path.exists() {
            let file = File::open(&index_path)?;
            serde_json::from_reader(file)
                .map_err(|e| KeystoreError::SerializationError(format!("index.json: {e}")))?
        } else {
            let index = KeystoreIndex::new(device_id.to_string());
            write_index(&index_path, &index)?;
            index
        };

        let mut keystore = Self {
            base_path,
            device_id: device_id.to_string(),
            index,
            unlocked: None,
        };
        keystore.sweep_unreferenced_blobs()?;
        Ok(keystore)
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn is_unlocked(&self) -> bool {
        self.unlocked.is_some()
    }

    /// Records the password for this unlock interval. No verification
    /// happens here: the first AEAD decrypt of any share authenticates the
    /// password cryptographically. Always succeeds, even on an empty
    /// keystore.
    pub fn unlock(&mut self, password: &str) -> bool {
        self.unlocked = Some(UnlockedState {
            password: Zeroizing::new(password.to_string()),
            shares: HashMap::new(),
        });
        true
    }

    /// Drops the password and the plaintext share cache; both are zeroized.
    pub fn lock(&mut self) {
        self.unlocked = None;
    }

    pub fn get_wallets(&self) -> Vec<&WalletEntry> {
        self.index.wallets.iter().collect()
    }

    pub fn get_wallet(&self, wallet_id: &str) -> Option<&WalletEntry> {
        self.index.get_wallet(wallet_id)
    }

    pub fn active_wallet_id(&self) -> Option<&str> {
        self.index.active_wallet_id.as_deref()
    }

    pub fn set_active_wallet(&mut self, wallet_id: Option<String>) -> Result<()> {
        if let Some(id) = &wallet_id {
            if self.index.get_wallet(id).is_none() {
                return Err(KeystoreError::WalletNotFound(id.clone()));
            }
        }
        self.index.active_wallet_id = wallet_id;
        self.commit_index()
    }

    /// Encrypts and persists a key-share record under a new wallet id.
    /// Fails if the id already exists; there is no silent overwrite.
    pub fn add_wallet(
        &mut self,
        wallet_id: &str,
        record: &KeyShareRecord,
        display_name: &str,
    ) -> Result<WalletEntry> {
        if self.index.get_wallet(wallet_id).is_some() {
            return Err(KeystoreError::WalletAlreadyExists(wallet_id.to_string()));
        }
        let password = {
            let state = self.unlocked.as_ref().ok_or(KeystoreError::Locked)?;
            state.password.clone()
        };

        let plaintext = serde_json::to_vec(record)
            .map_err(|e| KeystoreError::SerializationError(e.to_string()))?;
        let encrypted = encrypt_data(&plaintext, &password)?;

        // Blob first (tmp + rename), index last.
        let path = self.share_path(&record.curve, wallet_id);
        let tmp_path = path.with_extension("dat.tmp");
        fs::write(&tmp_path, &encrypted)?;
        fs::rename(&tmp_path, &path)?;

        let entry = WalletEntry {
            id: wallet_id.to_string(),
            display_name: display_name.to_string(),
            blockchain: blockchain_for_curve(&record.curve).to_string(),
            primary_address: record
                .ethereum_address
                .clone()
                .or_else(|| record.solana_address.clone())
                .unwrap_or_default(),
            curve_type: record.curve.clone(),
            session_id: record.session_id.clone(),
            is_active: true,
            has_backup: false,
            threshold: record.threshold,
            total_participants: record.total_participants,
            participant_index: record.participant_index,
            participants: record.participants.clone(),
            group_public_key: record.group_public_key.clone(),
            created_at: record.created_at.clone(),
        };
        self.index.wallets.push(entry.clone());
        self.commit_index()?;

        if let Some(state) = self.unlocked.as_mut() {
            state
                .shares
                .insert(wallet_id.to_string(), Zeroizing::new(plaintext));
        }
        Ok(entry)
    }

    /// Returns the decrypted key-share record, caching the plaintext for
    /// the unlock lifetime. The first call with a wrong password surfaces
    /// `DecryptionFailed`.
    pub fn get_key_share(&mut self, wallet_id: &str) -> Result<KeyShareRecord> {
        let entry = self
            .index
            .get_wallet(wallet_id)
            .ok_or_else(|| KeystoreError::WalletNotFound(wallet_id.to_string()))?;
        let path = self.share_path(&entry.curve_type, wallet_id);

        let state = self.unlocked.as_mut().ok_or(KeystoreError::Locked)?;
        if let Some(cached) = state.shares.get(wallet_id) {
            return serde_json::from_slice(cached)
                .map_err(|e| KeystoreError::SerializationError(e.to_string()));
        }

        let encrypted = fs::read(&path)
            .map_err(|e| KeystoreError::StorageFailure(format!("share blob {wallet_id}: {e}")))?;
        let plaintext = decrypt_data(&encrypted, &state.password)?;
        let record = serde_json::from_slice(&plaintext)
            .map_err(|e| KeystoreError::SerializationError(e.to_string()))?;
        state
            .shares
            .insert(wallet_id.to_string(), Zeroizing::new(plaintext));
        Ok(record)
    }

    /// Removes a wallet's index entry and blob. The index commit comes
    /// first: a crash in between leaves only an unreferenced blob, which
    /// the next initialize sweeps.
    pub fn remove_wallet(&mut self, wallet_id: &str) -> Result<()> {
        let position = self
            .index
            .wallets
            .iter()
            .position(|w| w.id == wallet_id)
            .ok_or_else(|| KeystoreError::WalletNotFound(wallet_id.to_string()))?;
        let entry = self.index.wallets.remove(position);
        if self.index.active_wallet_id.as_deref() == Some(wallet_id) {
            self.index.active_wallet_id = None;
        }
        self.commit_index()?;

        let path = self.share_path(&entry.curve_type, wallet_id);
        if path.exists() {
            fs::remove_file(&path)?;
        }
        if let Some(state) = self.unlocked.as_mut() {
            state.shares.remove(wallet_id);
        }
        Ok(())
    }

    /// Exports one wallet: metadata plus the unchanged encrypted blob.
    pub fn export_wallet(&self, wallet_id: &str) -> Result<WalletBackup> {
        let entry = self
            .index
            .get_wallet(wallet_id)
            .ok_or_else(|| KeystoreError::WalletNotFound(wallet_id.to_string()))?;
        let blob = fs::read(self.share_path(&entry.curve_type, wallet_id))
            .map_err(|e| KeystoreError::StorageFailure(format!("share blob {wallet_id}: {e}")))?;
        Ok(WalletBackup {
            metadata: entry.clone(),
            data: general_purpose::STANDARD.encode(blob),
        })
    }

    /// Envelope form of `export_wallet`, for transport.
    pub fn export_wallet_envelope(&self, wallet_id: &str) -> Result<WalletFile> {
        let entry = self
            .index
            .get_wallet(wallet_id)
            .ok_or_else(|| KeystoreError::WalletNotFound(wallet_id.to_string()))?;
        let blob = fs::read(self.share_path(&entry.curve_type, wallet_id))
            .map_err(|e| KeystoreError::StorageFailure(format!("share blob {wallet_id}: {e}")))?;
        Ok(WalletFile::wrap(entry.clone(), &blob))
    }

    /// Produces a portable backup of every wallet and marks them backed up.
    pub fn create_backup(&mut self) -> Result<KeystoreBackup> {
        let ids: Vec<String> = self.index.wallets.iter().map(|w| w.id.clone()).collect();
        let mut wallets = Vec::with_capacity(ids.len());
        for id in &ids {
            wallets.push(self.export_wallet(id)?);
        }
        let now = chrono::Utc::now().to_rfc3339();
        for wallet in &mut self.index.wallets {
            wallet.has_backup = true;
        }
        self.commit_index()?;
        Ok(KeystoreBackup {
            version: KEYSTORE_VERSION,
            device_id: self.device_id.clone(),
            exported_at: now,
            wallets,
        })
    }

    /// Imports a backed-up wallet. The blob is decrypted once with the
    /// supplied password to verify it, then stored unchanged. An id
    /// collision is resolved by suffixing.
    pub fn import_wallet(&mut self, backup: &WalletBackup, password: &str) -> Result<String> {
        let blob = general_purpose::STANDARD
            .decode(&backup.data)
            .map_err(|e| KeystoreError::SerializationError(format!("backup data: {e}")))?;
        decrypt_data(&blob, password)?;

        let wallet_id = self.resolve_import_id(&backup.metadata.id);
        let path = self.share_path(&backup.metadata.curve_type, &wallet_id);
        let tmp_path = path.with_extension("dat.tmp");
        fs::write(&tmp_path, &blob)?;
        fs::rename(&tmp_path, &path)?;

        let mut entry = backup.metadata.clone();
        entry.id = wallet_id.clone();
        self.index.wallets.push(entry);
        self.commit_index()?;
        Ok(wallet_id)
    }

    /// Accepts the structured envelope form as well; the inner bytes are
    /// the same raw layout.
    pub fn import_wallet_file(&mut self, file: &WalletFile, password: &str) -> Result<String> {
        self.import_wallet(
            &WalletBackup {
                metadata: file.metadata.clone(),
                data: file.data.clone(),
            },
            password,
        )
    }

    pub fn import_backup(&mut self, backup: &KeystoreBackup, password: &str) -> Result<Vec<String>> {
        let mut imported = Vec::with_capacity(backup.wallets.len());
        for wallet in &backup.wallets {
            imported.push(self.import_wallet(wallet, password)?);
        }
        Ok(imported)
    }

    fn resolve_import_id(&self, wanted: &str) -> String {
        if self.index.get_wallet(wanted).is_none() {
            return wanted.to_string();
        }
        let mut n = 1;
        loop {
            let candidate = format!("{wanted}-imported-{n}");
            if self.index.get_wallet(&candidate).is_none() {
                return candidate;
            }
            n += 1;
        }
    }

    fn share_path(&self, curve: &str, wallet_id: &str) -> PathBuf {
        self.base_path
            .join(&self.device_id)
            .join(curve)
            .join(format!("{wallet_id}.dat"))
    }

    fn index_path(&self) -> PathBuf {
        self.base_path.join(&self.device_id).join("index.json")
    }

    fn commit_index(&mut self) -> Result<()> {
        self.index.touch();
        write_index(&self.index_path(), &self.index)
    }

    fn sweep_unreferenced_blobs(&mut self) -> Result<()> {
        let device_dir = self.base_path.join(&self.device_id);
        for curve in CURVE_DIRS {
            let curve_dir = device_dir.join(curve);
            if !curve_dir.exists() {
                continue;
            }
            for entry in fs::read_dir(&curve_dir)? {
                let path = entry?.path();
                let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                let referenced = name
                    .strip_suffix(".dat")
                    .map(|stem| {
                        self.index
                            .get_wallet(stem)
                            .map(|w| w.curve_type == curve)
                            .unwrap_or(false)
                    })
                    .unwrap_or(false);
                if !referenced && (name.ends_with(".dat") || name.ends_with(".dat.tmp")) {
                    tracing::warn!("sweeping unreferenced share blob {}", path.display());
                    fs::remove_file(&path)?;
                }
            }
        }
        Ok(())
    }
}

fn write_index(path: &Path, index: &KeystoreIndex) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    let file = File::create(&tmp)?;
    serde_json::to_writer_pretty(file, index)
        .map_err(|e| KeystoreError::SerializationError(format!("index.json: {e}")))?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn blockchain_for_curve(curve: &str) -> &'static str {
    match curve {
        "ed25519" => "solana",
        _ => "ethereum",
    }
}

#[cfg(test)]
#[path = "storage_test.rs"]
mod tests;
