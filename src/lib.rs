//! Rscan Orchestrator - Scan & Exploit Orchestration Engine
//!
//! Drives target hosts through a submit-then-poll port scan lifecycle,
//! turns open ports into an exploit-backed vulnerability list through a
//! batched, strictly sequential correlation pipeline, and manages remote
//! command sessions opened against a target (live backend or simulated).
//!
//! # Warning
//! This tool is designed for ethical penetration testing and security assessment
//! purposes only. Users are responsible for ensuring they have proper authorization
//! before scanning any networks or systems.

pub mod activity;
pub mod assets;
pub mod backend;
pub mod cli;
pub mod config;
pub mod correlator;
pub mod display;
pub mod engine;
pub mod error;
pub mod registry;
pub mod reporting;
pub mod scan_job;
pub mod shell;
pub mod step;
pub mod utils;
pub mod vault;
pub mod version_detect;

pub use engine::Orchestrator;
pub use error::{Result, ScanError};

/// Common types and traits used throughout the application
pub mod types {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};
    use std::fmt;

    /// Opaque id of a target tab (one job, one correlation run, its sessions).
    pub type TargetId = String;

    /// Opaque id of a shell session.
    pub type SessionId = String;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    #[serde(rename_all = "camelCase")]
    pub struct ScanTarget {
        pub id: TargetId,
        pub host: String,
        /// Non-empty means a multi-host job; it then takes precedence over `host`.
        #[serde(default)]
        pub host_set: Vec<String>,
        #[serde(default)]
        pub options: ScanOptions,
    }

    impl ScanTarget {
        pub fn single(id: impl Into<String>, host: impl Into<String>, options: ScanOptions) -> Self {
            Self {
                id: id.into(),
                host: host.into(),
                host_set: Vec::new(),
                options,
            }
        }

        pub fn multi<I, S>(id: impl Into<String>, hosts: I, options: ScanOptions) -> Self
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            Self {
                id: id.into(),
                host: String::new(),
                host_set: hosts.into_iter().map(Into::into).collect(),
                options,
            }
        }

        pub fn is_multi_host(&self) -> bool {
            !self.host_set.is_empty()
        }

        /// Hosts in scan order, taken from whichever field is authoritative.
        pub fn hosts(&self) -> Vec<String> {
            if self.is_multi_host() {
                self.host_set.clone()
            } else if self.host.trim().is_empty() {
                Vec::new()
            } else {
                vec![self.host.clone()]
            }
        }
    }

    #[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
    #[serde(rename_all = "lowercase")]
    pub enum ScanType {
        Basic,
        Comprehensive,
        Vuln,
        Custom,
    }

    impl fmt::Display for ScanType {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                ScanType::Basic => write!(f, "basic"),
                ScanType::Comprehensive => write!(f, "comprehensive"),
                ScanType::Vuln => write!(f, "vuln"),
                ScanType::Custom => write!(f, "custom"),
            }
        }
    }

    /// Timing template, 1 (paranoid) through 5 (insane).
    #[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
    #[serde(try_from = "u8", into = "u8")]
    pub struct Timing(u8);

    impl Timing {
        pub const MIN: u8 = 1;
        pub const MAX: u8 = 5;

        pub fn value(self) -> u8 {
            self.0
        }
    }

    impl Default for Timing {
        fn default() -> Self {
            Timing(3)
        }
    }

    impl TryFrom<u8> for Timing {
        type Error = String;

        fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
            if (Self::MIN..=Self::MAX).contains(&value) {
                Ok(Timing(value))
            } else {
                Err(format!("timing template must be between {} and {}, got {}", Self::MIN, Self::MAX, value))
            }
        }
    }

    impl From<Timing> for u8 {
        fn from(timing: Timing) -> u8 {
            timing.0
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    #[serde(rename_all = "camelCase")]
    pub struct ScanOptions {
        pub scan_type: ScanType,
        pub timing: Timing,
        /// Range expression such as `1-1000` or `22,80,443`; validated by the backend.
        pub ports: String,
        pub aggressive: bool,
        pub service_detection: bool,
        pub os_detection: bool,
    }

    impl Default for ScanOptions {
        fn default() -> Self {
            Self {
                scan_type: ScanType::Basic,
                timing: Timing::default(),
                ports: "1-1000".to_string(),
                aggressive: false,
                service_detection: true,
                os_detection: false,
            }
        }
    }

    #[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
    #[serde(rename_all = "lowercase")]
    pub enum JobStatus {
        Idle,
        Running,
        Completed,
        Failed,
    }

    impl JobStatus {
        pub fn is_terminal(self) -> bool {
            matches!(self, JobStatus::Completed | JobStatus::Failed)
        }
    }

    impl fmt::Display for JobStatus {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                JobStatus::Idle => write!(f, "idle"),
                JobStatus::Running => write!(f, "running"),
                JobStatus::Completed => write!(f, "completed"),
                JobStatus::Failed => write!(f, "failed"),
            }
        }
    }

    /// Point-in-time view of a scan job for display.
    #[derive(Debug, Clone, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ScanJob {
        pub target_id: TargetId,
        pub status: JobStatus,
        pub logs: Vec<String>,
        pub backend_scan_id: Option<String>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
    pub struct DetectedService {
        pub port: u16,
        #[serde(default)]
        pub product: Option<String>,
        #[serde(default)]
        pub version: Option<String>,
    }

    impl DetectedService {
        /// Product and version, when both are present and non-blank.
        pub fn fingerprint(&self) -> Option<(&str, &str)> {
            let product = self.product.as_deref().map(str::trim).filter(|p| !p.is_empty())?;
            let version = self.version.as_deref().map(str::trim).filter(|v| !v.is_empty())?;
            Some((product, version))
        }
    }

    #[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
    #[serde(rename_all = "lowercase")]
    pub enum Severity {
        Low,
        Medium,
        High,
        Critical,
    }

    impl Severity {
        /// Parse a backend label, falling back to the CVSS score bands.
        pub fn from_label(label: Option<&str>, cvss_score: f32) -> Self {
            match label.map(|l| l.trim().to_ascii_lowercase()).as_deref() {
                Some("critical") => Severity::Critical,
                Some("high") => Severity::High,
                Some("medium") | Some("moderate") => Severity::Medium,
                Some("low") => Severity::Low,
                _ => Self::from_cvss(cvss_score),
            }
        }

        pub fn from_cvss(score: f32) -> Self {
            if score >= 9.0 {
                Severity::Critical
            } else if score >= 7.0 {
                Severity::High
            } else if score >= 4.0 {
                Severity::Medium
            } else {
                Severity::Low
            }
        }
    }

    impl fmt::Display for Severity {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                Severity::Low => write!(f, "low"),
                Severity::Medium => write!(f, "medium"),
                Severity::High => write!(f, "high"),
                Severity::Critical => write!(f, "critical"),
            }
        }
    }

    /// Hint block copied from the first exploit record of a CVE.
    #[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
    #[serde(rename_all = "camelCase")]
    pub struct ExploitMetadata {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub shell_type: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub trigger_port: Option<u16>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub shell_port: Option<u16>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub default_payload_variant: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub payload_type: Option<String>,
        /// Any other fields the backend sent, kept verbatim.
        #[serde(flatten)]
        pub extra: serde_json::Map<String, serde_json::Value>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    #[serde(rename_all = "camelCase")]
    pub struct Vulnerability {
        pub id: String,
        pub cve_id: String,
        pub title: String,
        pub description: String,
        pub severity: Severity,
        pub cvss_score: f32,
        pub affected_service: String,
        pub affected_port: u16,
        /// Always true: only exploit-backed CVEs become vulnerabilities.
        pub exploit_available: bool,
        pub exploit_module_ref: String,
        pub exploit_metadata: Option<ExploitMetadata>,
    }

    #[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
    #[serde(rename_all = "lowercase")]
    pub enum ShellType {
        Reverse,
        Bind,
    }

    impl ShellType {
        pub fn parse(value: &str) -> Option<Self> {
            match value.trim().to_ascii_lowercase().as_str() {
                "reverse" | "reverse_shell" | "reverse-shell" => Some(ShellType::Reverse),
                "bind" | "bind_shell" | "bind-shell" => Some(ShellType::Bind),
                _ => None,
            }
        }
    }

    impl fmt::Display for ShellType {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                ShellType::Reverse => write!(f, "reverse"),
                ShellType::Bind => write!(f, "bind"),
            }
        }
    }

    #[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
    #[serde(rename_all = "lowercase")]
    pub enum SessionStatus {
        Connecting,
        Connected,
        Failed,
        Closed,
    }

    impl fmt::Display for SessionStatus {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                SessionStatus::Connecting => write!(f, "connecting"),
                SessionStatus::Connected => write!(f, "connected"),
                SessionStatus::Failed => write!(f, "failed"),
                SessionStatus::Closed => write!(f, "closed"),
            }
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    #[serde(rename_all = "camelCase")]
    pub struct ShellSession {
        pub id: SessionId,
        pub target_ip: String,
        pub target_port: u16,
        #[serde(rename = "type")]
        pub shell_type: ShellType,
        pub status: SessionStatus,
        pub created_at: DateTime<Utc>,
        pub commands_executed: u32,
    }

    /// Result-ingestion event handed to the asset registry when a host finishes.
    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    #[serde(rename_all = "camelCase")]
    pub struct AssetUpdate {
        pub host: String,
        pub os_name: String,
        pub open_ports: Vec<u16>,
        pub hostname: Option<String>,
        pub vendor: Option<String>,
    }

    /// Upsert request sent to the credential vault after a successful connect.
    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    #[serde(rename_all = "camelCase")]
    pub struct CredentialUse {
        pub host: String,
        pub protocol: String,
        pub username: String,
        pub timestamp: DateTime<Utc>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    #[serde(rename_all = "camelCase")]
    pub struct VaultCredential {
        pub id: String,
        pub host: String,
        pub protocol: String,
        pub username: String,
        pub last_used_timestamp: DateTime<Utc>,
        pub use_count: u32,
    }
}
