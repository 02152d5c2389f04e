use crate::activity::ActivityLog;
use crate::assets::AssetRegistry;
use crate::backend::{AuthContext, Backend};
use crate::registry::Registry;
use crate::step::{CveRecord, ExploitRecord};
use crate::types::{DetectedService, Severity, TargetId, Vulnerability};
use crate::version_detect::VersionDetector;
use crate::{Result, ScanError};
use chrono::{DateTime, Utc};
use log::debug;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Outcome of one correlation run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrelationReport {
    pub target_id: TargetId,
    pub host: String,
    pub services: Vec<DetectedService>,
    pub vulnerabilities: Vec<Vulnerability>,
    pub cves_examined: usize,
    /// CVEs probed for exploits that had none; they are not reported individually.
    pub cves_without_exploit: usize,
    pub generated_at: DateTime<Utc>,
}

/// Per-target correlation state.
pub struct CorrelationSlot {
    in_progress: AtomicBool,
    vulnerabilities: Mutex<Vec<Vulnerability>>,
    report: Mutex<Option<CorrelationReport>>,
    cancel: Mutex<Option<CancellationToken>>,
    log: ActivityLog,
}

impl CorrelationSlot {
    fn new(target_id: &str) -> Self {
        Self {
            in_progress: AtomicBool::new(false),
            vulnerabilities: Mutex::new(Vec::new()),
            report: Mutex::new(None),
            cancel: Mutex::new(None),
            log: ActivityLog::new(format!("vulns:{}", target_id)),
        }
    }
}

/// Releases a run's claim on its slot, including when the caller drops the future.
struct RunGuard(Arc<CorrelationSlot>);

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.0.cancel.lock().take();
        self.0.in_progress.store(false, Ordering::SeqCst);
    }
}

/// Maps a host's detected services to CVEs that have at least one known exploit.
pub struct VulnerabilityCorrelator {
    backend: Arc<dyn Backend>,
    assets: Arc<dyn AssetRegistry>,
    detector: VersionDetector,
    max_cves_per_service: usize,
    runs: Registry<CorrelationSlot>,
}

impl VulnerabilityCorrelator {
    pub fn new(
        backend: Arc<dyn Backend>,
        assets: Arc<dyn AssetRegistry>,
        detector: VersionDetector,
        max_cves_per_service: usize,
    ) -> Self {
        Self {
            backend,
            assets,
            detector,
            max_cves_per_service,
            runs: Registry::new(),
        }
    }

    /// Run the full pipeline for `host` and return the exploit-backed vulnerabilities.
    /// The previous list for `target_id` is replaced, never merged.
    pub async fn correlate(&self, ctx: &AuthContext, target_id: &str, host: &str) -> Result<Vec<Vulnerability>> {
        let slot = self
            .runs
            .get_or_insert_with(target_id, || CorrelationSlot::new(target_id));

        if let Err(e) = ctx.require_token() {
            slot.log.error("Authentication required to scan for vulnerabilities");
            return Err(e);
        }

        let ports = self.assets.open_ports(host);
        if ports.is_empty() {
            slot.log.error(format!("No open ports found for {}. Run a port scan first.", host));
            return Err(ScanError::Precondition(format!("No open ports known for {}, scan it first", host)));
        }

        if slot.in_progress.swap(true, Ordering::SeqCst) {
            return Err(ScanError::AlreadyRunning(format!("Vulnerability scan for {}", target_id)));
        }

        let _running = RunGuard(slot.clone());

        let cancel = CancellationToken::new();
        *slot.cancel.lock() = Some(cancel.clone());
        slot.vulnerabilities.lock().clear();
        *slot.report.lock() = None;

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ScanError::Cancelled("vulnerability scan".to_string())),
            result = self.run(ctx, &slot, target_id, host, &ports) => result,
        };

        let result = match outcome {
            Ok(report) => {
                slot.log.success(format!(
                    "Vulnerability scan complete: {} exploitable vulnerabilit{} found",
                    report.vulnerabilities.len(),
                    if report.vulnerabilities.len() == 1 { "y" } else { "ies" }
                ));
                let vulnerabilities = report.vulnerabilities.clone();
                *slot.report.lock() = Some(report);
                Ok(vulnerabilities)
            }
            Err(e) => {
                slot.log.error(format!("Vulnerability scan failed: {}", e));
                Err(e)
            }
        };

        result
    }

    async fn run(
        &self,
        ctx: &AuthContext,
        slot: &CorrelationSlot,
        target_id: &str,
        host: &str,
        ports: &[u16],
    ) -> Result<CorrelationReport> {
        slot.log.info(format!("Starting vulnerability scan of {} ({} open port(s))", host, ports.len()));

        let services = self.detector.detect(ctx, &slot.log, host, ports).await;
        let mut report = CorrelationReport {
            target_id: target_id.to_string(),
            host: host.to_string(),
            services: services.clone(),
            vulnerabilities: Vec::new(),
            cves_examined: 0,
            cves_without_exploit: 0,
            generated_at: Utc::now(),
        };

        for service in &services {
            let Some((product, version)) = service.fingerprint() else {
                debug!("Port {} on {} has no product/version, skipping CVE lookup", service.port, host);
                continue;
            };

            slot.log.info(format!("Looking up CVEs for {} {} (port {})", product, version, service.port));
            let cves = match self.backend.lookup_cves(ctx, product, version).await {
                Ok(cves) => cves,
                Err(e) => {
                    slot.log.warn(format!("CVE lookup failed for {} {}: {}", product, version, e));
                    continue;
                }
            };

            if cves.is_empty() {
                slot.log.info(format!("No known CVEs for {} {}", product, version));
                continue;
            }
            if cves.len() > self.max_cves_per_service {
                slot.log.info(format!(
                    "{} CVEs for {} {}, checking the first {} for exploits",
                    cves.len(),
                    product,
                    version,
                    self.max_cves_per_service
                ));
            }

            for cve in cves.into_iter().take(self.max_cves_per_service) {
                report.cves_examined += 1;

                let exploits = match self.backend.lookup_exploits(ctx, &cve.cve_id).await {
                    Ok(exploits) => exploits,
                    Err(e) => {
                        debug!("Exploit lookup for {} failed, treating as none: {}", cve.cve_id, e);
                        Vec::new()
                    }
                };

                let Some(first) = exploits.first() else {
                    report.cves_without_exploit += 1;
                    continue;
                };

                let vulnerability = build_vulnerability(&cve, service, product, version, first);
                slot.log.success(format!(
                    "Exploit available for {} on port {}: {}",
                    vulnerability.cve_id, vulnerability.affected_port, vulnerability.exploit_module_ref
                ));
                slot.vulnerabilities.lock().push(vulnerability.clone());
                report.vulnerabilities.push(vulnerability);
            }
        }

        report.generated_at = Utc::now();
        Ok(report)
    }

    /// Stop an in-flight run. Vulnerabilities found so far stay visible.
    pub fn cancel(&self, target_id: &str) -> bool {
        let Some(slot) = self.runs.get(target_id) else {
            return false;
        };
        let Some(token) = slot.cancel.lock().take() else {
            return false;
        };
        token.cancel();
        true
    }

    pub fn vulnerabilities(&self, target_id: &str) -> Vec<Vulnerability> {
        self.runs
            .get(target_id)
            .map(|s| s.vulnerabilities.lock().clone())
            .unwrap_or_default()
    }

    pub fn find(&self, target_id: &str, vulnerability_id: &str) -> Option<Vulnerability> {
        let slot = self.runs.get(target_id)?;
        let vulnerabilities = slot.vulnerabilities.lock();
        vulnerabilities.iter().find(|v| v.id == vulnerability_id).cloned()
    }

    pub fn report(&self, target_id: &str) -> Option<CorrelationReport> {
        self.runs.get(target_id).and_then(|s| s.report.lock().clone())
    }

    pub fn is_in_progress(&self, target_id: &str) -> bool {
        self.runs
            .get(target_id)
            .map_or(false, |s| s.in_progress.load(Ordering::SeqCst))
    }

    pub fn log(&self, target_id: &str) -> Option<ActivityLog> {
        self.runs.get(target_id).map(|s| s.log.clone())
    }
}

fn build_vulnerability(
    cve: &CveRecord,
    service: &DetectedService,
    product: &str,
    version: &str,
    exploit: &ExploitRecord,
) -> Vulnerability {
    let cvss_score = cve.cvss_score.unwrap_or(0.0);
    Vulnerability {
        id: Uuid::new_v4().to_string(),
        cve_id: cve.cve_id.clone(),
        title: cve.title.clone().unwrap_or_else(|| cve.cve_id.clone()),
        description: cve.description.clone().unwrap_or_default(),
        severity: Severity::from_label(cve.severity.as_deref(), cvss_score),
        cvss_score,
        affected_service: format!("{} {}", product, version),
        affected_port: service.port,
        exploit_available: true,
        exploit_module_ref: exploit.module_ref(),
        exploit_metadata: exploit.exploit_metadata.clone(),
    }
}
