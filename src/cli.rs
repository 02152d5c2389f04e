use crate::types::{ScanOptions, ScanType, ShellType, Timing};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rscan-orchestrator")]
#[command(about = "Scan and exploit orchestration against a scanning backend")]
#[command(long_about = r#"
Drives port scans, service version detection, CVE/exploit correlation and
shell sessions through a remote scanning backend.

WARNING: This tool should only be used on networks and systems you own or
have explicit permission to test. Unauthorized scanning may be illegal.

Usage Examples:
  rscan-orchestrator scan 10.0.0.5                        # Basic port scan
  rscan-orchestrator scan 10.0.0.5 10.0.0.6 -p 1-65535    # One tab per host
  rscan-orchestrator scan 10.0.0.5 10.0.0.6 --single-job  # One multi-host job
  rscan-orchestrator assess 10.0.0.5 --format csv         # Scan, correlate, export
  rscan-orchestrator assess 10.0.0.5 --open-ports 21,22   # Correlate known ports only
  rscan-orchestrator shell 10.0.0.5 -P 21 --cve CVE-2011-2523 -x id -x pwd
"#)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Base URL of the scanning backend API
    #[arg(long, global = true, value_name = "URL")]
    pub backend_url: Option<String>,

    /// Bearer token for the backend
    #[arg(long, global = true, env = "RSCAN_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Configuration file path
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Scan status poll interval in milliseconds
    #[arg(long, global = true, value_name = "MS")]
    pub poll_interval: Option<u64>,

    /// Output directory for reports
    #[arg(short, long, global = true)]
    pub output: Option<PathBuf>,

    /// Verbose output (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (suppress output)
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a port scan job and print the discovered assets
    Scan {
        /// Hosts to scan
        #[arg(required = true)]
        hosts: Vec<String>,

        /// Scan all hosts as one sequential job instead of one job per host
        #[arg(long)]
        single_job: bool,

        #[command(flatten)]
        scan: ScanArgs,
    },

    /// Scan a host, correlate its services with exploitable CVEs, export the result
    Assess {
        host: String,

        /// Skip the port scan and correlate these known open ports
        #[arg(long, value_name = "PORTS")]
        open_ports: Option<String>,

        /// Report formats (defaults to the configured ones)
        #[arg(long, value_enum)]
        format: Vec<ReportFormat>,

        #[command(flatten)]
        scan: ScanArgs,
    },

    /// Open a shell against a host, run commands, close it
    Shell {
        host: String,

        /// Port the exploit is triggered on
        #[arg(short = 'P', long)]
        port: u16,

        /// CVE the exploit targets
        #[arg(long)]
        cve: Option<String>,

        /// Service banner, e.g. "vsftpd 2.3.4"
        #[arg(long)]
        service: Option<String>,

        #[arg(long, value_enum, default_value = "reverse")]
        shell_type: ShellKind,

        /// Username recorded in the credential vault
        #[arg(short, long)]
        username: Option<String>,

        /// Command to run (repeatable)
        #[arg(short = 'x', long = "exec", value_name = "COMMAND")]
        commands: Vec<String>,
    },
}

#[derive(Args, Clone, Debug, Default)]
pub struct ScanArgs {
    /// Port range (e.g., 1-1000, 22,80,443)
    #[arg(short, long)]
    pub ports: Option<String>,

    #[arg(long, value_enum)]
    pub scan_type: Option<ScanKind>,

    /// Timing template 1-5
    #[arg(short = 'T', long, value_parser = clap::value_parser!(u8).range(1..=5))]
    pub timing: Option<u8>,

    #[arg(long)]
    pub aggressive: bool,

    #[arg(long)]
    pub no_service_detection: bool,

    #[arg(long)]
    pub os_detection: bool,
}

impl ScanArgs {
    /// Overlay the flags on `defaults`.
    pub fn apply(&self, mut defaults: ScanOptions) -> ScanOptions {
        if let Some(ports) = &self.ports {
            defaults.ports = ports.clone();
        }
        if let Some(kind) = self.scan_type {
            defaults.scan_type = kind.into();
        }
        if let Some(timing) = self.timing.and_then(|t| Timing::try_from(t).ok()) {
            defaults.timing = timing;
        }
        defaults.aggressive |= self.aggressive;
        defaults.os_detection |= self.os_detection;
        if self.no_service_detection {
            defaults.service_detection = false;
        }
        defaults
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanKind {
    Basic,
    Comprehensive,
    Vuln,
    Custom,
}

impl From<ScanKind> for ScanType {
    fn from(kind: ScanKind) -> Self {
        match kind {
            ScanKind::Basic => ScanType::Basic,
            ScanKind::Comprehensive => ScanType::Comprehensive,
            ScanKind::Vuln => ScanType::Vuln,
            ScanKind::Custom => ScanType::Custom,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShellKind {
    Reverse,
    Bind,
}

impl From<ShellKind> for ShellType {
    fn from(kind: ShellKind) -> Self {
        match kind {
            ShellKind::Reverse => ShellType::Reverse,
            ShellKind::Bind => ShellType::Bind,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReportFormat {
    Json,
    Csv,
}

impl From<ReportFormat> for crate::config::OutputFormat {
    fn from(format: ReportFormat) -> Self {
        match format {
            ReportFormat::Json => crate::config::OutputFormat::Json,
            ReportFormat::Csv => crate::config::OutputFormat::Csv,
        }
    }
}
