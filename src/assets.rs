use crate::types::AssetUpdate;
use chrono::{DateTime, Utc};
use log::debug;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;

/// Catalog of discovered hosts. Fed by scan completion, read before correlation.
pub trait AssetRegistry: Send + Sync {
    fn ingest(&self, update: AssetUpdate);

    /// Currently known open ports of `host`; empty when unknown.
    fn open_ports(&self, host: &str) -> Vec<u16>;

    fn asset(&self, host: &str) -> Option<Asset>;
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub host: String,
    pub os_name: String,
    pub open_ports: Vec<u16>,
    pub hostname: Option<String>,
    pub vendor: Option<String>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct InMemoryAssetRegistry {
    assets: RwLock<HashMap<String, Asset>>,
    history: RwLock<Vec<AssetUpdate>>,
}

impl InMemoryAssetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, host: &str) -> Option<Asset> {
        self.assets.read().get(host).cloned()
    }

    pub fn all(&self) -> Vec<Asset> {
        let mut assets: Vec<Asset> = self.assets.read().values().cloned().collect();
        assets.sort_by(|a, b| a.host.cmp(&b.host));
        assets
    }

    /// Every ingestion event in arrival order.
    pub fn updates(&self) -> Vec<AssetUpdate> {
        self.history.read().clone()
    }

    /// Record ports for a host without a scan, e.g. from an earlier session.
    pub fn seed(&self, host: &str, open_ports: Vec<u16>) {
        let mut assets = self.assets.write();
        let asset = assets.entry(host.to_string()).or_insert_with(|| Asset {
            host: host.to_string(),
            os_name: "Unknown".to_string(),
            open_ports: Vec::new(),
            hostname: None,
            vendor: None,
            last_seen: Utc::now(),
        });
        asset.open_ports = open_ports;
    }
}

impl AssetRegistry for InMemoryAssetRegistry {
    fn ingest(&self, update: AssetUpdate) {
        debug!("Asset update for {}: {} open ports", update.host, update.open_ports.len());
        self.history.write().push(update.clone());

        let mut assets = self.assets.write();
        let entry = assets.entry(update.host.clone()).or_insert_with(|| Asset {
            host: update.host.clone(),
            os_name: update.os_name.clone(),
            open_ports: Vec::new(),
            hostname: None,
            vendor: None,
            last_seen: Utc::now(),
        });
        entry.os_name = update.os_name;
        entry.open_ports = update.open_ports;
        // A later scan that did not resolve these keeps the earlier values.
        if update.hostname.is_some() {
            entry.hostname = update.hostname;
        }
        if update.vendor.is_some() {
            entry.vendor = update.vendor;
        }
        entry.last_seen = Utc::now();
    }

    fn open_ports(&self, host: &str) -> Vec<u16> {
        self.assets
            .read()
            .get(host)
            .map(|a| a.open_ports.clone())
            .unwrap_or_default()
    }

    fn asset(&self, host: &str) -> Option<Asset> {
        self.get(host)
    }
}
