//! Execution Step Protocol: the named units of remote work and the
//! request/response shapes exchanged with the backend services.

use crate::types::{DetectedService, ExploitMetadata};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One unit of remote work. Used to label errors and log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionStep {
    ScanHost,
    ScanStatus,
    DetectVersions,
    LookupCve,
    LookupExploits,
    ExecutePayload,
    ShellCommand,
}

impl fmt::Display for ExecutionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ExecutionStep::ScanHost => "scan submit",
            ExecutionStep::ScanStatus => "scan status poll",
            ExecutionStep::DetectVersions => "version detection",
            ExecutionStep::LookupCve => "CVE lookup",
            ExecutionStep::LookupExploits => "exploit lookup",
            ExecutionStep::ExecutePayload => "exploit execution",
            ExecutionStep::ShellCommand => "shell command",
        };
        f.write_str(label)
    }
}

// ---------------------------------------------------------------------------
// scan/host, scan/status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScanHostRequest {
    pub host: String,
    pub scan_type: String,
    pub ports: String,
    #[serde(default)]
    pub timing: Option<u8>,
    #[serde(default)]
    pub aggressive: bool,
    #[serde(default)]
    pub service_detection: bool,
    #[serde(default)]
    pub os_detection: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanHostResponse {
    pub scan_id: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendScanStatus {
    Queued,
    Running,
    Completed,
    Failed,
    /// Any other label (`pending`, `starting`, ...). Treated as still running.
    #[serde(other)]
    Other,
}

impl BackendScanStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, BackendScanStatus::Completed | BackendScanStatus::Failed)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScanStatusResponse {
    pub status: BackendScanStatus,
    #[serde(default)]
    pub results: Option<ScanResults>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScanResults {
    #[serde(default)]
    pub hosts: Vec<HostResult>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HostResult {
    pub ip: String,
    #[serde(default)]
    pub ports: Vec<PortResult>,
    #[serde(default)]
    pub os: Option<OsField>,
    #[serde(default)]
    pub hostnames: Vec<HostnameField>,
    #[serde(default)]
    pub addresses: Vec<AddressEntry>,
}

impl HostResult {
    /// Open port numbers in the order the backend listed them.
    pub fn open_ports(&self) -> Vec<u16> {
        self.ports
            .iter()
            .filter(|p| p.state.eq_ignore_ascii_case("open"))
            .map(|p| p.port_id)
            .collect()
    }

    pub fn os_name(&self) -> Option<String> {
        self.os.as_ref().and_then(OsField::name)
    }

    pub fn hostname(&self) -> Option<String> {
        self.hostnames.iter().find_map(HostnameField::name)
    }

    pub fn vendor(&self) -> Option<String> {
        self.addresses
            .iter()
            .find_map(|a| a.vendor.clone().filter(|v| !v.is_empty()))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortResult {
    #[serde(alias = "portid", alias = "port")]
    pub port_id: u16,
    pub state: String,
    #[serde(default)]
    pub service: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OsMatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub accuracy: Option<serde_json::Value>,
}

/// Backends report OS information as a plain name, one match, or a list of matches.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OsField {
    Name(String),
    Match(OsMatch),
    Matches(Vec<OsMatch>),
}

impl OsField {
    pub fn name(&self) -> Option<String> {
        match self {
            OsField::Name(name) => Some(name.clone()).filter(|n| !n.is_empty()),
            OsField::Match(m) => m.name.clone(),
            OsField::Matches(list) => list.iter().find_map(|m| m.name.clone()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum HostnameField {
    Plain(String),
    Entry {
        name: String,
        #[serde(default, rename = "type")]
        kind: Option<String>,
    },
}

impl HostnameField {
    pub fn name(&self) -> Option<String> {
        let name = match self {
            HostnameField::Plain(name) => name,
            HostnameField::Entry { name, .. } => name,
        };
        Some(name.clone()).filter(|n| !n.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddressEntry {
    #[serde(default)]
    pub addr: Option<String>,
    #[serde(default, alias = "addrtype")]
    pub addr_type: Option<String>,
    #[serde(default)]
    pub vendor: Option<String>,
}

// ---------------------------------------------------------------------------
// version-detection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct VersionDetectionRequest<'a> {
    pub host: &'a str,
    pub ports: &'a [u16],
}

#[derive(Debug, Clone, Deserialize)]
pub struct VersionDetectionResponse {
    #[serde(default)]
    pub services: Vec<DetectedService>,
}

// ---------------------------------------------------------------------------
// lookup-cve, exploits/{cveId}
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct CveLookupRequest<'a> {
    pub product: &'a str,
    pub version: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CveLookupResponse {
    #[serde(default)]
    pub cves: Vec<CveRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CveRecord {
    pub cve_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub cvss_score: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExploitRecord {
    #[serde(default)]
    pub module_path: Option<String>,
    #[serde(default)]
    pub module_id: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub exploit_type: Option<String>,
    #[serde(default)]
    pub target_platform: Option<String>,
    #[serde(default)]
    pub rank: Option<String>,
    #[serde(default)]
    pub verified: Option<bool>,
    #[serde(default)]
    pub exploit_metadata: Option<ExploitMetadata>,
}

impl ExploitRecord {
    /// Reference used to pre-populate an exploit run.
    pub fn module_ref(&self) -> String {
        self.module_path
            .clone()
            .or_else(|| self.module_id.clone())
            .or_else(|| self.exploit_type.clone())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

/// The exploits endpoint answers with a bare list or a wrapped one.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ExploitLookupResponse {
    List(Vec<ExploitRecord>),
    Wrapped {
        #[serde(default)]
        exploits: Vec<ExploitRecord>,
    },
}

impl ExploitLookupResponse {
    pub fn into_records(self) -> Vec<ExploitRecord> {
        match self {
            ExploitLookupResponse::List(records) => records,
            ExploitLookupResponse::Wrapped { exploits } => exploits,
        }
    }
}

// ---------------------------------------------------------------------------
// exploit/execute
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    pub target_ip: String,
    pub target_port: u16,
    pub exploit_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteResponse {
    pub success: bool,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub shell_port: Option<u16>,
    #[serde(default)]
    pub error: Option<String>,
}
