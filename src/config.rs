use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub backend: BackendConfig,
    pub scan: ScanConfig,
    pub version_detection: VersionDetectionConfig,
    pub correlation: CorrelationConfig,
    pub shell: ShellConfig,
    pub reporting: ReportingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub base_url: String,
    pub request_timeout: u64, // seconds
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    pub poll_interval_ms: u64, // milliseconds
    pub default_ports: String,
    pub default_timing: u8, // 1-5 (1=paranoid, 5=insane)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionDetectionConfig {
    pub batch_size: usize, // ports per version-detection call
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationConfig {
    pub max_cves_per_service: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellConfig {
    pub simulated_connect_delay_ms: u64, // milliseconds
    pub default_username: String,
    pub integrations: Vec<IntegratedExploit>,
}

/// An exploit class the backend can execute for real.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IntegratedExploit {
    pub name: String,
    pub cve_ids: Vec<String>,
    /// Case-insensitive substrings matched against the affected service name.
    pub service_patterns: Vec<String>,
    pub exploit_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportingConfig {
    pub output_dir: PathBuf,
    pub formats: Vec<OutputFormat>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Csv,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: BackendConfig {
                base_url: "http://127.0.0.1:8000/api".to_string(),
                request_timeout: 60,
                user_agent: "rscan-orchestrator/0.1".to_string(),
            },
            scan: ScanConfig {
                poll_interval_ms: 3000,
                default_ports: "1-1000".to_string(),
                default_timing: 3,
            },
            version_detection: VersionDetectionConfig { batch_size: 5 },
            correlation: CorrelationConfig { max_cves_per_service: 10 },
            shell: ShellConfig {
                simulated_connect_delay_ms: 1500,
                default_username: "root".to_string(),
                integrations: vec![IntegratedExploit {
                    name: "vsftpd 2.3.4 backdoor".to_string(),
                    cve_ids: vec!["CVE-2011-2523".to_string()],
                    service_patterns: vec!["vsftpd".to_string()],
                    exploit_type: "vsftpd_backdoor".to_string(),
                }],
            },
            reporting: ReportingConfig {
                output_dir: PathBuf::from("./reports"),
                formats: vec![OutputFormat::Json],
            },
        }
    }
}

impl Config {
    pub fn load_from_file(path: &str) -> crate::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    pub fn save_to_file(&self, path: &str) -> crate::Result<()> {
        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| crate::ScanError::InvalidInput(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, toml_string)?;
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.backend.request_timeout)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.scan.poll_interval_ms)
    }

    pub fn simulated_connect_delay(&self) -> Duration {
        Duration::from_millis(self.shell.simulated_connect_delay_ms)
    }

    /// Batch size used by version detection; never zero.
    pub fn batch_size(&self) -> usize {
        self.version_detection.batch_size.max(1)
    }
}
