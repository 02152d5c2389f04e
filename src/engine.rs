use crate::activity::ActivityLog;
use crate::assets::{AssetRegistry, InMemoryAssetRegistry};
use crate::backend::{AuthContext, Backend, HttpBackend};
use crate::config::Config;
use crate::correlator::{CorrelationReport, VulnerabilityCorrelator};
use crate::scan_job::{ScanCoordinator, StartOutcome};
use crate::shell::{DriverRegistry, ExploitTarget, PayloadSpec, ShellSessionManager};
use crate::types::{
    JobStatus, ScanJob, ScanOptions, ScanTarget, SessionId, ShellSession, Timing, Vulnerability,
};
use crate::vault::{CredentialVault, InMemoryVault};
use crate::version_detect::VersionDetector;
use crate::{Result, ScanError};
use log::info;
use std::sync::Arc;

/// Entry point tying the scan, correlation and shell subsystems to one backend.
pub struct Orchestrator {
    config: Config,
    backend: Arc<dyn Backend>,
    assets: Arc<dyn AssetRegistry>,
    vault: Arc<dyn CredentialVault>,
    scans: ScanCoordinator,
    correlator: VulnerabilityCorrelator,
    shells: ShellSessionManager,
}

impl Orchestrator {
    pub fn new(
        config: Config,
        backend: Arc<dyn Backend>,
        assets: Arc<dyn AssetRegistry>,
        vault: Arc<dyn CredentialVault>,
    ) -> Self {
        let scans = ScanCoordinator::new(backend.clone(), assets.clone(), config.poll_interval());
        let correlator = VulnerabilityCorrelator::new(
            backend.clone(),
            assets.clone(),
            VersionDetector::new(backend.clone(), config.batch_size()),
            config.correlation.max_cves_per_service,
        );
        let shells = ShellSessionManager::new(
            DriverRegistry::from_config(&config.shell, backend.clone()),
            vault.clone(),
            config.shell.default_username.clone(),
        );

        Self {
            config,
            backend,
            assets,
            vault,
            scans,
            correlator,
            shells,
        }
    }

    /// HTTP backend with in-memory asset registry and vault.
    pub fn with_http_backend(config: Config) -> Result<Self> {
        let backend = Arc::new(HttpBackend::new(&config)?);
        info!("Using backend at {}", backend.base_url());
        Ok(Self::new(
            config,
            backend,
            Arc::new(InMemoryAssetRegistry::new()),
            Arc::new(InMemoryVault::new()),
        ))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn backend(&self) -> Arc<dyn Backend> {
        self.backend.clone()
    }

    pub fn assets(&self) -> Arc<dyn AssetRegistry> {
        self.assets.clone()
    }

    pub fn vault(&self) -> Arc<dyn CredentialVault> {
        self.vault.clone()
    }

    pub fn scans(&self) -> &ScanCoordinator {
        &self.scans
    }

    pub fn correlator(&self) -> &VulnerabilityCorrelator {
        &self.correlator
    }

    pub fn shells(&self) -> &ShellSessionManager {
        &self.shells
    }

    // Scan jobs

    pub fn register_target(&self, target: ScanTarget) -> Result<()> {
        self.scans.register(target)
    }

    /// Options seeded from the configured defaults.
    pub fn default_options(&self) -> ScanOptions {
        let mut options = ScanOptions {
            ports: self.config.scan.default_ports.clone(),
            ..ScanOptions::default()
        };
        if let Ok(timing) = Timing::try_from(self.config.scan.default_timing) {
            options.timing = timing;
        }
        options
    }

    pub fn update_options(&self, target_id: &str, options: ScanOptions) -> Result<()> {
        self.scans.update_options(target_id, options)
    }

    pub fn start_scan(&self, ctx: &AuthContext, target_id: &str) -> Result<StartOutcome> {
        self.scans.start(ctx, target_id)
    }

    pub fn cancel_scan(&self, target_id: &str) -> bool {
        self.scans.cancel(target_id)
    }

    pub async fn wait_for_scan(&self, target_id: &str) -> Option<JobStatus> {
        self.scans.wait(target_id).await
    }

    pub fn job(&self, target_id: &str) -> Option<ScanJob> {
        self.scans.snapshot(target_id)
    }

    pub fn scan_log(&self, target_id: &str) -> Option<ActivityLog> {
        self.scans.log(target_id)
    }

    // Vulnerability correlation

    /// Correlate the target's primary host against the asset registry's open ports.
    pub async fn correlate(&self, ctx: &AuthContext, target_id: &str) -> Result<Vec<Vulnerability>> {
        let host = self.primary_host(target_id)?;
        self.correlator.correlate(ctx, target_id, &host).await
    }

    /// Correlate a specific host under `target_id`.
    pub async fn correlate_host(&self, ctx: &AuthContext, target_id: &str, host: &str) -> Result<Vec<Vulnerability>> {
        self.correlator.correlate(ctx, target_id, host).await
    }

    pub fn cancel_correlation(&self, target_id: &str) -> bool {
        self.correlator.cancel(target_id)
    }

    pub fn vulnerabilities(&self, target_id: &str) -> Vec<Vulnerability> {
        self.correlator.vulnerabilities(target_id)
    }

    pub fn report(&self, target_id: &str) -> Option<CorrelationReport> {
        self.correlator.report(target_id)
    }

    pub fn correlation_log(&self, target_id: &str) -> Option<ActivityLog> {
        self.correlator.log(target_id)
    }

    // Shell sessions

    pub async fn open_shell(&self, ctx: &AuthContext, target: ExploitTarget, payload: PayloadSpec) -> Result<SessionId> {
        self.shells.open(ctx, target, payload).await
    }

    /// Open a session pre-populated from one of the target's correlated vulnerabilities.
    pub async fn exploit(&self, ctx: &AuthContext, target_id: &str, vulnerability_id: &str) -> Result<SessionId> {
        let vulnerability = self.correlator.find(target_id, vulnerability_id).ok_or_else(|| {
            ScanError::NotFound(format!("vulnerability {} on target {}", vulnerability_id, target_id))
        })?;
        let host = self
            .correlator
            .report(target_id)
            .map(|r| r.host)
            .map_or_else(|| self.primary_host(target_id), Ok)?;

        let target = ExploitTarget::from_vulnerability(&host, &vulnerability);
        let payload = PayloadSpec::from_vulnerability(&vulnerability);
        self.shells.open(ctx, target, payload).await
    }

    pub async fn send(&self, ctx: &AuthContext, session_id: &str, command: &str) -> Result<String> {
        self.shells.send(ctx, session_id, command).await
    }

    pub fn close(&self, session_id: &str) -> Result<ShellSession> {
        self.shells.close(session_id)
    }

    pub fn session(&self, session_id: &str) -> Option<ShellSession> {
        self.shells.session(session_id)
    }

    pub fn sessions(&self) -> Vec<ShellSession> {
        self.shells.sessions()
    }

    fn primary_host(&self, target_id: &str) -> Result<String> {
        let target = self
            .scans
            .target(target_id)
            .ok_or_else(|| ScanError::NotFound(format!("No scan target with id {}", target_id)))?;
        target
            .hosts()
            .into_iter()
            .next()
            .ok_or_else(|| ScanError::Precondition(format!("Target {} has no host", target_id)))
    }
}
