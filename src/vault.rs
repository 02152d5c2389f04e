use crate::types::{CredentialUse, VaultCredential};
use log::debug;
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

/// Usage-ranked store of host/protocol/username tuples.
pub trait CredentialVault: Send + Sync {
    /// Insert or refresh the entry keyed by `(host, protocol)`.
    fn upsert(&self, usage: CredentialUse) -> VaultCredential;

    /// Credentials for `host` (or all hosts), most used first.
    fn ranked(&self, host: Option<&str>) -> Vec<VaultCredential>;
}

#[derive(Debug, Default)]
pub struct InMemoryVault {
    entries: RwLock<HashMap<(String, String), VaultCredential>>,
}

impl InMemoryVault {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl CredentialVault for InMemoryVault {
    fn upsert(&self, usage: CredentialUse) -> VaultCredential {
        let key = (usage.host.clone(), usage.protocol.clone());
        let mut entries = self.entries.write();
        let entry = entries.entry(key).or_insert_with(|| VaultCredential {
            id: Uuid::new_v4().to_string(),
            host: usage.host.clone(),
            protocol: usage.protocol.clone(),
            username: usage.username.clone(),
            last_used_timestamp: usage.timestamp,
            use_count: 0,
        });
        entry.username = usage.username;
        entry.last_used_timestamp = usage.timestamp;
        entry.use_count += 1;
        debug!(
            "Vault entry {}/{} used {} time(s)",
            entry.host, entry.protocol, entry.use_count
        );
        entry.clone()
    }

    fn ranked(&self, host: Option<&str>) -> Vec<VaultCredential> {
        let mut credentials: Vec<VaultCredential> = self
            .entries
            .read()
            .values()
            .filter(|c| host.map_or(true, |h| c.host == h))
            .cloned()
            .collect();
        credentials.sort_by(|a, b| {
            b.use_count
                .cmp(&a.use_count)
                .then_with(|| b.last_used_timestamp.cmp(&a.last_used_timestamp))
        });
        credentials
    }
}
