use crate::activity::ActivityLog;
use crate::assets::AssetRegistry;
use crate::backend::{AuthContext, Backend};
use crate::registry::Registry;
use crate::step::{BackendScanStatus, ScanHostRequest, ScanResults};
use crate::types::{AssetUpdate, JobStatus, ScanJob, ScanOptions, ScanTarget};
use crate::{Result, ScanError};
use log::{debug, info};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// A poll loop is already live for this target; nothing was done.
    AlreadyRunning,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobState {
    pub status: JobStatus,
    pub backend_scan_id: Option<String>,
    /// True while a poll loop owns this job.
    pub active: bool,
    pub runs: u32,
    generation: u64,
}

impl Default for JobState {
    fn default() -> Self {
        Self {
            status: JobStatus::Idle,
            backend_scan_id: None,
            active: false,
            runs: 0,
            generation: 0,
        }
    }
}

struct PollHandle {
    generation: u64,
    cancel: CancellationToken,
}

/// Per-target scan state. At most one poll loop owns it at a time.
pub struct JobSlot {
    target: Mutex<ScanTarget>,
    state: watch::Sender<JobState>,
    log: ActivityLog,
    handle: Mutex<Option<PollHandle>>,
}

impl JobSlot {
    fn new(target: ScanTarget) -> Self {
        let (state, _) = watch::channel(JobState::default());
        Self {
            log: ActivityLog::new(format!("scan:{}", target.id)),
            target: Mutex::new(target),
            state,
            handle: Mutex::new(None),
        }
    }

    pub fn state(&self) -> JobState {
        self.state.borrow().clone()
    }

    pub fn target(&self) -> ScanTarget {
        self.target.lock().clone()
    }

    pub fn log(&self) -> &ActivityLog {
        &self.log
    }

    fn is_current(&self, generation: u64) -> bool {
        matches!(self.handle.lock().as_ref(), Some(h) if h.generation == generation)
    }

    fn set_backend_scan_id(&self, generation: u64, scan_id: &str) {
        if self.is_current(generation) {
            self.state
                .send_modify(|s| s.backend_scan_id = Some(scan_id.to_string()));
        }
    }

    /// Terminal transition: write the closing line, dispose of the poll handle,
    /// then publish the status. A stale generation changes nothing.
    fn finish(&self, generation: u64, status: JobStatus, summary: String) -> bool {
        let mut handle = self.handle.lock();
        match handle.as_ref() {
            Some(h) if h.generation == generation => *handle = None,
            _ => return false,
        }
        match status {
            JobStatus::Completed => self.log.success(summary),
            _ => self.log.error(summary),
        }
        self.state.send_modify(|s| {
            s.status = status;
            s.active = false;
        });
        true
    }
}

enum HostOutcome {
    Completed,
    Failed,
    TransportFailed,
    Cancelled,
}

/// Drives scan jobs: hosts strictly one after another, each submitted and then
/// polled until the backend reports a terminal status.
#[derive(Clone)]
pub struct ScanCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    backend: Arc<dyn Backend>,
    assets: Arc<dyn AssetRegistry>,
    poll_interval: Duration,
    jobs: Registry<JobSlot>,
}

impl ScanCoordinator {
    pub fn new(backend: Arc<dyn Backend>, assets: Arc<dyn AssetRegistry>, poll_interval: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                assets,
                poll_interval,
                jobs: Registry::new(),
            }),
        }
    }

    /// Register a target as an idle job. Re-registering is allowed only while idle.
    pub fn register(&self, target: ScanTarget) -> Result<()> {
        if target.hosts().is_empty() {
            return Err(ScanError::InvalidInput(format!("Target {} has no host", target.id)));
        }

        let id = target.id.clone();
        match self.inner.jobs.get(&id) {
            Some(slot) => {
                if slot.state().status != JobStatus::Idle || slot.handle.lock().is_some() {
                    return Err(ScanError::Precondition(format!(
                        "Target {} already has a scan job; only its options can change",
                        id
                    )));
                }
                *slot.target.lock() = target;
            }
            None => {
                self.inner.jobs.insert(id, JobSlot::new(target));
            }
        }
        Ok(())
    }

    /// Options are editable only while the job is idle.
    pub fn update_options(&self, target_id: &str, options: ScanOptions) -> Result<()> {
        let slot = self.slot(target_id)?;
        let state = slot.state();
        if state.status != JobStatus::Idle || state.active {
            return Err(ScanError::Precondition(format!(
                "Scan options for {} can only be changed while idle (status: {})",
                target_id, state.status
            )));
        }
        slot.target.lock().options = options;
        Ok(())
    }

    /// Start (or restart) the job for `target_id`. Must be called within a Tokio runtime.
    pub fn start(&self, ctx: &AuthContext, target_id: &str) -> Result<StartOutcome> {
        let slot = self.slot(target_id)?;

        if let Err(e) = ctx.require_token() {
            slot.log.error("Authentication required to start a scan");
            return Err(e);
        }

        let target = slot.target();
        let hosts = target.hosts();
        if hosts.is_empty() {
            slot.log.error("No target host selected");
            return Err(ScanError::Precondition(format!("Target {} has no host", target_id)));
        }

        let mut handle = slot.handle.lock();
        if handle.is_some() {
            debug!("Scan for {} already running, ignoring start", target_id);
            return Ok(StartOutcome::AlreadyRunning);
        }

        let previous = slot.state();
        if previous.runs > 0 {
            slot.log.info("---- scan restarted ----");
        }

        let generation = previous.generation + 1;
        let cancel = CancellationToken::new();
        *handle = Some(PollHandle {
            generation,
            cancel: cancel.clone(),
        });
        slot.state.send_modify(|s| {
            s.status = JobStatus::Running;
            s.active = true;
            s.runs += 1;
            s.generation = generation;
        });
        drop(handle);

        info!("Starting scan job {} over {} host(s)", target_id, hosts.len());
        let inner = self.inner.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move {
            inner
                .run_job(slot, ctx, hosts, target.options, cancel, generation)
                .await;
        });

        Ok(StartOutcome::Started)
    }

    /// Stop the live poll loop. The last observed status is kept as final.
    pub fn cancel(&self, target_id: &str) -> bool {
        let Some(slot) = self.inner.jobs.get(target_id) else {
            return false;
        };
        // Held across the state update; start() takes the same lock.
        let mut guard = slot.handle.lock();
        let Some(handle) = guard.take() else {
            return false;
        };

        handle.cancel.cancel();
        slot.log.warn(format!(
            "Scan cancelled (last status: {})",
            slot.state().status
        ));
        slot.state.send_modify(|s| s.active = false);
        true
    }

    /// Wait until no poll loop owns the job, then return its status.
    pub async fn wait(&self, target_id: &str) -> Option<JobStatus> {
        let slot = self.inner.jobs.get(target_id)?;
        let mut rx = slot.state.subscribe();
        loop {
            {
                let state = rx.borrow_and_update();
                if !state.active {
                    return Some(state.status);
                }
            }
            if rx.changed().await.is_err() {
                return Some(slot.state().status);
            }
        }
    }

    pub fn snapshot(&self, target_id: &str) -> Option<ScanJob> {
        let slot = self.inner.jobs.get(target_id)?;
        let state = slot.state();
        Some(ScanJob {
            target_id: target_id.to_string(),
            status: state.status,
            logs: slot.log.rendered(),
            backend_scan_id: state.backend_scan_id,
        })
    }

    pub fn status(&self, target_id: &str) -> Option<JobStatus> {
        self.inner.jobs.get(target_id).map(|s| s.state().status)
    }

    pub fn is_polling(&self, target_id: &str) -> bool {
        self.inner
            .jobs
            .get(target_id)
            .map_or(false, |s| s.handle.lock().is_some())
    }

    pub fn target(&self, target_id: &str) -> Option<ScanTarget> {
        self.inner.jobs.get(target_id).map(|s| s.target())
    }

    pub fn log(&self, target_id: &str) -> Option<ActivityLog> {
        self.inner.jobs.get(target_id).map(|s| s.log.clone())
    }

    pub fn target_ids(&self) -> Vec<String> {
        self.inner.jobs.ids()
    }

    /// Drop an idle or finished job. Cancels it first if it is still polling.
    pub fn remove(&self, target_id: &str) -> bool {
        self.cancel(target_id);
        self.inner.jobs.remove(target_id).is_some()
    }

    fn slot(&self, target_id: &str) -> Result<Arc<JobSlot>> {
        self.inner
            .jobs
            .get(target_id)
            .ok_or_else(|| ScanError::NotFound(format!("No scan target with id {}", target_id)))
    }
}

impl Inner {
    async fn run_job(
        &self,
        slot: Arc<JobSlot>,
        ctx: AuthContext,
        hosts: Vec<String>,
        options: ScanOptions,
        cancel: CancellationToken,
        generation: u64,
    ) {
        let total = hosts.len();
        slot.log.info(format!(
            "Starting {} scan of {} host(s), ports {}",
            options.scan_type, total, options.ports
        ));

        let mut transport_failed = false;

        for (index, host) in hosts.iter().enumerate() {
            if cancel.is_cancelled() {
                return;
            }
            slot.log.info(format!("[{}/{}] Submitting scan for {}", index + 1, total, host));

            let request = scan_request(host, &options);
            let submitted = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                result = self.backend.submit_scan(&ctx, &request) => result,
            };

            let scan_id = match submitted {
                Ok(scan_id) => scan_id,
                Err(e) => {
                    transport_failed |= e.is_transport();
                    slot.log.error(format!("Failed to start scan for {}: {}", host, e));
                    continue;
                }
            };

            slot.set_backend_scan_id(generation, &scan_id);
            slot.log.info(format!("Scan started for {} (scan id {})", host, scan_id));

            match self.poll_host(&slot, &ctx, host, &scan_id, &cancel).await {
                HostOutcome::Completed | HostOutcome::Failed => {}
                HostOutcome::TransportFailed => transport_failed = true,
                HostOutcome::Cancelled => return,
            }
        }

        let status = if transport_failed {
            JobStatus::Failed
        } else {
            JobStatus::Completed
        };

        let summary = match status {
            JobStatus::Completed => format!("Scan job finished: {} host(s) attempted", total),
            _ => format!("Scan job failed after {} host(s)", total),
        };
        if !slot.finish(generation, status, summary) {
            debug!("Scan job generation {} superseded before it finished", generation);
        }
    }

    async fn poll_host(
        &self,
        slot: &JobSlot,
        ctx: &AuthContext,
        host: &str,
        scan_id: &str,
        cancel: &CancellationToken,
    ) -> HostOutcome {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return HostOutcome::Cancelled,
                _ = sleep(self.poll_interval) => {}
            }

            let polled = tokio::select! {
                biased;
                _ = cancel.cancelled() => return HostOutcome::Cancelled,
                result = self.backend.scan_status(ctx, scan_id) => result,
            };

            match polled {
                Ok(response) => match response.status {
                    BackendScanStatus::Completed => {
                        self.ingest(slot, host, response.results);
                        return HostOutcome::Completed;
                    }
                    BackendScanStatus::Failed => {
                        let reason = response.error.unwrap_or_else(|| "unknown error".to_string());
                        slot.log.error(format!("Scan failed for {}: {}", host, reason));
                        return HostOutcome::Failed;
                    }
                    BackendScanStatus::Queued | BackendScanStatus::Running | BackendScanStatus::Other => {
                        slot.log.info(format!("Scan still running for {}...", host));
                    }
                },
                Err(e) => {
                    slot.log.error(format!("Status check failed for {}: {}", host, e));
                    return if e.is_transport() {
                        HostOutcome::TransportFailed
                    } else {
                        HostOutcome::Failed
                    };
                }
            }
        }
    }

    fn ingest(&self, slot: &JobSlot, host: &str, results: Option<ScanResults>) {
        let hosts = results.map(|r| r.hosts).unwrap_or_default();
        if hosts.is_empty() {
            slot.log.warn(format!("Scan completed for {} with no host results (host may be down)", host));
            return;
        }

        for result in hosts {
            let open_ports = result.open_ports();
            let update = AssetUpdate {
                host: if result.ip.is_empty() { host.to_string() } else { result.ip.clone() },
                os_name: result.os_name().unwrap_or_else(|| "Unknown".to_string()),
                open_ports,
                hostname: result.hostname(),
                vendor: result.vendor(),
            };
            slot.log.success(format!(
                "Scan completed for {}: {} open port(s) {:?}",
                update.host,
                update.open_ports.len(),
                update.open_ports
            ));
            self.assets.ingest(update);
        }
    }
}

fn scan_request(host: &str, options: &ScanOptions) -> ScanHostRequest {
    ScanHostRequest {
        host: host.to_string(),
        scan_type: options.scan_type.to_string(),
        ports: options.ports.clone(),
        timing: Some(options.timing.value()),
        aggressive: options.aggressive,
        service_detection: options.service_detection,
        os_detection: options.os_detection,
    }
}
