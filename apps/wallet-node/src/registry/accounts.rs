//! Account registry: the derived, user-facing view of keystore wallets.
//!
//! Accounts correspond 1:1 to wallet metadata entries; removing the wallet
//! removes the account. Hosts subscribe to change notifications to keep
//! their UI in sync.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::{RegistryError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Account {
    /// Equals the owning wallet id
    pub id: String,
    pub address: String,
    pub display_name: String,
    /// Cached display balance; the core never queries chains
    pub balance: String,
    pub blockchain: String,
    pub public_key: String,
    /// RFC 3339, set on add and immutable afterwards
    pub created: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub enum AccountEvent {
    Added(Account),
    Updated(Account),
    Removed(String),
    CurrentChanged(Option<String>),
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct AccountsFile {
    version: u8,
    accounts: Vec<Account>,
    #[serde(skip_serializing_if = "Option::is_none")]
    current_account_id: Option<String>,
}

pub struct AccountRegistry {
    path: PathBuf,
    accounts: Vec<Account>,
    current_account_id: Option<String>,
    events: broadcast::Sender<AccountEvent>,
}

impl AccountRegistry {
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let path = dir.as_ref().join("accounts.json");
        let file = if path.exists() {
            let text = fs::read_to_string(&path)
                .map_err(|e| RegistryError::StorageFailure(e.to_string()))?;
            serde_json::from_str::<AccountsFile>(&text)
                .map_err(|e| RegistryError::SerializationError(e.to_string()))?
        } else {
            AccountsFile {
                version: 1,
                ..Default::default()
            }
        };
        let (events, _) = broadcast::channel(64);
        Ok(Self {
            path,
            accounts: file.accounts,
            current_account_id: file.current_account_id,
            events,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AccountEvent> {
        self.events.subscribe()
    }

    pub fn add_account(&mut self, mut account: Account) -> Result<()> {
        if self.get_account_by_id(&account.id).is_some() {
            return Err(RegistryError::DuplicateAccount(account.id));
        }
        let address = account.address.to_lowercase();
        if self
            .accounts
            .iter()
            .any(|a| a.blockchain == account.blockchain && a.address.to_lowercase() == address)
        {
            return Err(RegistryError::DuplicateAccount(format!(
                "{}/{}",
                account.blockchain, account.address
            )));
        }
        account.created = chrono::Utc::now().to_rfc3339();
        self.accounts.push(account.clone());
        self.persist()?;
        let _ = self.events.send(AccountEvent::Added(account));
        Ok(())
    }

    pub fn update_account(&mut self, account: Account) -> Result<()> {
        let existing = self
            .accounts
            .iter_mut()
            .find(|a| a.id == account.id)
            .ok_or_else(|| RegistryError::AccountNotFound(account.id.clone()))?;
        // `created` is immutable after add
        let created = existing.created.clone();
        *existing = Account { created, ..account };
        let updated = existing.clone();
        self.persist()?;
        let _ = self.events.send(AccountEvent::Updated(updated));
        Ok(())
    }

    pub fn remove_account(&mut self, id: &str) -> Result<()> {
        let position = self
            .accounts
            .iter()
            .position(|a| a.id == id)
            .ok_or_else(|| RegistryError::AccountNotFound(id.to_string()))?;
        self.accounts.remove(position);

        if self.current_account_id.as_deref() == Some(id) {
            // Deterministic fallback: first remaining account, else none.
            self.current_account_id = self.accounts.first().map(|a| a.id.clone());
            let _ = self
                .events
                .send(AccountEvent::CurrentChanged(self.current_account_id.clone()));
        }
        self.persist()?;
        let _ = self.events.send(AccountEvent::Removed(id.to_string()));
        Ok(())
    }

    pub fn get_accounts(&self) -> &[Account] {
        &self.accounts
    }

    pub fn get_account_by_id(&self, id: &str) -> Option<&Account> {
        self.accounts.iter().find(|a| a.id == id)
    }

    pub fn get_account_by_address(&self, address: &str) -> Option<&Account> {
        let address = address.to_lowercase();
        self.accounts
            .iter()
            .find(|a| a.address.to_lowercase() == address)
    }

    pub fn get_accounts_by_blockchain(&self, blockchain: &str) -> Vec<&Account> {
        self.accounts
            .iter()
            .filter(|a| a.blockchain == blockchain)
            .collect()
    }

    pub fn set_current_account(&mut self, id: Option<String>) -> Result<()> {
        if let Some(id) = &id {
            if self.get_account_by_id(id).is_none() {
                return Err(RegistryError::AccountNotFound(id.clone()));
            }
        }
        self.current_account_id = id;
        self.persist()?;
        let _ = self
            .events
            .send(AccountEvent::CurrentChanged(self.current_account_id.clone()));
        Ok(())
    }

    pub fn get_current_account(&self) -> Option<&Account> {
        self.current_account_id
            .as_deref()
            .and_then(|id| self.get_account_by_id(id))
    }

    fn persist(&self) -> Result<()> {
        let file = AccountsFile {
            version: 1,
            accounts: self.accounts.clone(),
            current_account_id: self.current_account_id.clone(),
        };
        let text = serde_json::to_string_pretty(&file)
            .map_err(|e| RegistryError::SerializationError(e.to_string()))?;
        fs::write(&self.path, text).map_err(|e| RegistryError::StorageFailure(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn account(id: &str, address: &str, blockchain: &str) -> Account {
        Account {
            id: id.to_string(),
            address: address.to_string(),
            display_name: id.to_string(),
            balance: "0".to_string(),
            blockchain: blockchain.to_string(),
            public_key: "02ab".to_string(),
            created: String::new(),
            metadata: None,
        }
    }

    #[test]
    fn test_add_sets_created_and_persists() {
        let dir = TempDir::new().unwrap();
        let mut registry = AccountRegistry::load(dir.path()).unwrap();
        registry.add_account(account("w1", "0xAbC", "ethereum")).unwrap();
        let stored = registry.get_account_by_id("w1").unwrap();
        assert!(!stored.created.is_empty());

        let reloaded = AccountRegistry::load(dir.path()).unwrap();
        assert_eq!(reloaded.get_accounts().len(), 1);
    }

    #[test]
    fn test_duplicate_id_and_address_rejected() {
        let dir = TempDir::new().unwrap();
        let mut registry = AccountRegistry::load(dir.path()).unwrap();
        registry.add_account(account("w1", "0xAbC", "ethereum")).unwrap();

        assert!(registry.add_account(account("w1", "0xdef", "ethereum")).is_err());
        // Same address, case-folded, same chain: rejected.
        assert!(registry.add_account(account("w2", "0xABC", "ethereum")).is_err());
        // Same address on another chain is allowed.
        registry.add_account(account("w3", "0xAbC", "polygon")).unwrap();
    }

    #[test]
    fn test_created_is_immutable_on_update() {
        let dir = TempDir::new().unwrap();
        let mut registry = AccountRegistry::load(dir.path()).unwrap();
        registry.add_account(account("w1", "0xabc", "ethereum")).unwrap();
        let created = registry.get_account_by_id("w1").unwrap().created.clone();

        let mut updated = account("w1", "0xabc", "ethereum");
        updated.display_name = "renamed".to_string();
        updated.created = "2001-01-01T00:00:00Z".to_string();
        registry.update_account(updated).unwrap();

        let stored = registry.get_account_by_id("w1").unwrap();
        assert_eq!(stored.display_name, "renamed");
        assert_eq!(stored.created, created);
    }

    #[test]
    fn test_remove_current_reassigns_deterministically() {
        let dir = TempDir::new().unwrap();
        let mut registry = AccountRegistry::load(dir.path()).unwrap();
        registry.add_account(account("w1", "0x01", "ethereum")).unwrap();
        registry.add_account(account("w2", "0x02", "ethereum")).unwrap();
        registry.set_current_account(Some("w2".to_string())).unwrap();

        registry.remove_account("w2").unwrap();
        assert_eq!(registry.get_current_account().map(|a| a.id.as_str()), Some("w1"));

        registry.remove_account("w1").unwrap();
        assert!(registry.get_current_account().is_none());
    }

    #[test]
    fn test_lookup_by_address_is_case_insensitive() {
        let dir = TempDir::new().unwrap();
        let mut registry = AccountRegistry::load(dir.path()).unwrap();
        registry.add_account(account("w1", "0xAbCd", "ethereum")).unwrap();
        assert!(registry.get_account_by_address("0xABCD").is_some());
        assert!(registry.get_account_by_address("0xffff").is_none());
    }

    #[test]
    fn test_change_events_are_broadcast() {
        let dir = TempDir::new().unwrap();
        let mut registry = AccountRegistry::load(dir.path()).unwrap();
        let mut events = registry.subscribe();
        registry.add_account(account("w1", "0x01", "ethereum")).unwrap();
        match events.try_recv() {
            Ok(AccountEvent::Added(a)) => assert_eq!(a.id, "w1"),
            other => panic!("expected Added event, got {other:?}"),
        }
    }
}
