//! Permission registry: which connected accounts an origin may observe.
//!
//! Addresses are lowercased on insertion and the per-origin set preserves
//! insertion order. Removing the last account for an origin removes the
//! entry entirely. A missing origin always yields empty results, never an
//! error.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::{RegistryError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PermissionEntry {
    /// URL authority, matched exactly as stored (callers normalize)
    pub origin: String,
    /// Lowercased addresses in insertion order
    pub connected_accounts: Vec<String>,
    pub chain_id: String,
    /// RFC 3339
    pub granted_at: String,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct PermissionsFile {
    version: u8,
    permissions: Vec<PermissionEntry>,
}

pub struct PermissionRegistry {
    path: PathBuf,
    entries: Vec<PermissionEntry>,
}

impl PermissionRegistry {
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let path = dir.as_ref().join("permissions.json");
        let file = if path.exists() {
            let text = fs::read_to_string(&path)
                .map_err(|e| RegistryError::StorageFailure(e.to_string()))?;
            serde_json::from_str::<PermissionsFile>(&text)
                .map_err(|e| RegistryError::SerializationError(e.to_string()))?
        } else {
            PermissionsFile {
                version: 1,
                ..Default::default()
            }
        };
        Ok(Self {
            path,
            entries: file.permissions,
        })
    }

    /// Grants an origin access to the given accounts, merging into any
    /// existing grant while preserving insertion order.
    pub fn connect_accounts(
        &mut self,
        origin: &str,
        accounts: &[String],
        chain_id: &str,
    ) -> Result<()> {
        if origin.is_empty() {
            return Ok(());
        }
        let normalized: Vec<String> = accounts.iter().map(|a| a.to_lowercase()).collect();
        match self.entries.iter_mut().find(|e| e.origin == origin) {
            Some(entry) => {
                for account in normalized {
                    if !entry.connected_accounts.contains(&account) {
                        entry.connected_accounts.push(account);
                    }
                }
                entry.chain_id = chain_id.to_string();
            }
            None => {
                let mut connected_accounts = Vec::new();
                for account in normalized {
                    if !connected_accounts.contains(&account) {
                        connected_accounts.push(account);
                    }
                }
                if connected_accounts.is_empty() {
                    return Ok(());
                }
                self.entries.push(PermissionEntry {
                    origin: origin.to_string(),
                    connected_accounts,
                    chain_id: chain_id.to_string(),
                    granted_at: chrono::Utc::now().to_rfc3339(),
                });
            }
        }
        self.persist()
    }

    pub fn add_account(&mut self, origin: &str, account: &str, chain_id: &str) -> Result<()> {
        self.connect_accounts(origin, &[account.to_string()], chain_id)
    }

    pub fn disconnect_account(&mut self, origin: &str, account: &str) -> Result<()> {
        let account = account.to_lowercase();
        let Some(position) = self.entries.iter().position(|e| e.origin == origin) else {
            return Ok(());
        };
        self.entries[position]
            .connected_accounts
            .retain(|a| a != &account);
        if self.entries[position].connected_accounts.is_empty() {
            self.entries.remove(position);
        }
        self.persist()
    }

    /// Revokes every grant for an origin.
    pub fn disconnect_accounts(&mut self, origin: &str) -> Result<()> {
        self.entries.retain(|e| e.origin != origin);
        self.persist()
    }

    pub fn get_connected_accounts(&self, origin: Option<&str>) -> Vec<String> {
        let Some(origin) = origin else {
            return Vec::new();
        };
        self.entries
            .iter()
            .find(|e| e.origin == origin)
            .map(|e| e.connected_accounts.clone())
            .unwrap_or_default()
    }

    pub fn is_account_connected(&self, origin: Option<&str>, account: &str) -> bool {
        let account = account.to_lowercase();
        self.get_connected_accounts(origin).contains(&account)
    }

    /// Origins that were granted access to an account.
    pub fn get_connected_dapps(&self, account: &str) -> Vec<String> {
        let account = account.to_lowercase();
        self.entries
            .iter()
            .filter(|e| e.connected_accounts.contains(&account))
            .map(|e| e.origin.clone())
            .collect()
    }

    pub fn get_all_permissions(&self) -> &[PermissionEntry] {
        &self.entries
    }

    /// No-op for an unknown origin.
    pub fn update_chain_id(&mut self, origin: &str, chain_id: &str) -> Result<()> {
        match self.entries.iter_mut().find(|e| e.origin == origin) {
            Some(entry) => {
                entry.chain_id = chain_id.to_string();
                self.persist()
            }
            None => Ok(()),
        }
    }

    pub fn clear_all_permissions(&mut self) -> Result<()> {
        self.entries.clear();
        self.persist()
    }

    fn persist(&self) -> Result<()> {
        let file = PermissionsFile {
            version: 1,
            permissions: self.entries.clone(),
        };
        let text = serde_json::to_string_pretty(&file)
            .map_err(|e| RegistryError::SerializationError(e.to_string()))?;
        fs::write(&self.path, text).map_err(|e| RegistryError::StorageFailure(e.to_string()))?;
        Ok(())
    }
}
