#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use rscan_orchestrator::{
    backend::{AuthContext, Backend},
    step::{
        CveRecord, ExecuteRequest, ExecuteResponse, ExecutionStep, ExploitRecord, ScanHostRequest,
        ScanStatusResponse,
    },
    types::DetectedService,
    Result, ScanError,
};
use serde_json::json;
use std::collections::{HashMap, HashSet, VecDeque};

/// One recorded backend call.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Submit(String),
    Status(String),
    Detect(Vec<u16>),
    Cves(String, String),
    Exploits(String),
    Execute(ExecuteRequest),
}

#[derive(Debug, Clone)]
pub enum Poll {
    Running,
    Completed(Vec<u16>),
    CompletedEmpty,
    /// A non-terminal status outside the usual queued/running pair.
    Other(&'static str),
    Failed(&'static str),
    Rejected(&'static str),
    Transport,
}

#[derive(Debug, Clone, Copy)]
pub enum Failure {
    Backend,
    Transport,
}

/// A reqwest error that never touched the network.
pub fn transport_error(step: ExecutionStep) -> ScanError {
    let err = reqwest::Client::new()
        .get("http://")
        .build()
        .expect_err("an empty host must not build");
    ScanError::transport(step, err)
}

/// In-process backend driven by per-host scripts. Records every call in order.
#[derive(Default)]
pub struct ScriptedBackend {
    calls: Mutex<Vec<Call>>,
    scan_hosts: Mutex<HashMap<String, String>>,
    polls: Mutex<HashMap<String, VecDeque<Poll>>>,
    submit_failures: Mutex<HashMap<String, Failure>>,
    services: Mutex<HashMap<u16, DetectedService>>,
    failing_batches: Mutex<HashSet<usize>>,
    detect_calls: Mutex<usize>,
    cves: Mutex<HashMap<(String, String), Vec<CveRecord>>>,
    cve_failures: Mutex<HashSet<(String, String)>>,
    exploits: Mutex<HashMap<String, Vec<ExploitRecord>>>,
    execute_failure: Mutex<Option<String>>,
    exploit_failures: Mutex<HashSet<String>>,
    stalled_exploits: Mutex<HashSet<String>>,
    stall_detection: Mutex<bool>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn count(&self, matcher: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| matcher(c)).count()
    }

    /// Responses for successive status polls of `host`. Once exhausted the scan stays running.
    pub fn script_polls(&self, host: &str, polls: Vec<Poll>) {
        self.polls.lock().insert(host.to_string(), polls.into());
    }

    pub fn fail_submit(&self, host: &str, failure: Failure) {
        self.submit_failures.lock().insert(host.to_string(), failure);
    }

    pub fn add_service(&self, port: u16, product: Option<&str>, version: Option<&str>) {
        self.services.lock().insert(
            port,
            DetectedService {
                port,
                product: product.map(str::to_string),
                version: version.map(str::to_string),
            },
        );
    }

    /// Fail the n-th (0-based) version-detection call.
    pub fn fail_batch(&self, index: usize) {
        self.failing_batches.lock().insert(index);
    }

    pub fn add_cves(&self, product: &str, version: &str, cves: Vec<CveRecord>) {
        self.cves
            .lock()
            .insert((product.to_string(), version.to_string()), cves);
    }

    pub fn fail_cve_lookup(&self, product: &str, version: &str) {
        self.cve_failures
            .lock()
            .insert((product.to_string(), version.to_string()));
    }

    pub fn add_exploits(&self, cve_id: &str, exploits: Vec<ExploitRecord>) {
        self.exploits.lock().insert(cve_id.to_string(), exploits);
    }

    pub fn fail_exploit_lookup(&self, cve_id: &str) {
        self.exploit_failures.lock().insert(cve_id.to_string());
    }

    /// Exploit lookups for `cve_id` never answer.
    pub fn stall_exploit_lookup(&self, cve_id: &str) {
        self.stalled_exploits.lock().insert(cve_id.to_string());
    }

    /// While set, version detection never answers.
    pub fn stall_detection(&self, stalled: bool) {
        *self.stall_detection.lock() = stalled;
    }

    pub fn fail_execute(&self, message: &str) {
        *self.execute_failure.lock() = Some(message.to_string());
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }
}

pub fn cve(id: &str, cvss: f32) -> CveRecord {
    CveRecord {
        cve_id: id.to_string(),
        title: Some(format!("{} title", id)),
        description: Some(format!("{} description", id)),
        severity: None,
        cvss_score: Some(cvss),
    }
}

pub fn exploit(module_path: &str, metadata: serde_json::Value) -> ExploitRecord {
    ExploitRecord {
        module_path: Some(module_path.to_string()),
        module_id: None,
        platform: Some("unix".to_string()),
        exploit_type: None,
        target_platform: None,
        rank: Some("excellent".to_string()),
        verified: Some(true),
        exploit_metadata: serde_json::from_value(metadata).ok(),
    }
}

fn status(value: serde_json::Value) -> ScanStatusResponse {
    serde_json::from_value(value).expect("scripted status must decode")
}

#[async_trait]
impl Backend for ScriptedBackend {
    async fn submit_scan(&self, ctx: &AuthContext, request: &ScanHostRequest) -> Result<String> {
        ctx.require_token()?;
        self.record(Call::Submit(request.host.clone()));

        match self.submit_failures.lock().get(&request.host) {
            Some(Failure::Backend) => {
                return Err(ScanError::backend(ExecutionStep::ScanHost, Some(400), "bad host"))
            }
            Some(Failure::Transport) => return Err(transport_error(ExecutionStep::ScanHost)),
            None => {}
        }

        let scan_id = format!("scan-{}", request.host);
        self.scan_hosts
            .lock()
            .insert(scan_id.clone(), request.host.clone());
        Ok(scan_id)
    }

    async fn scan_status(&self, ctx: &AuthContext, scan_id: &str) -> Result<ScanStatusResponse> {
        ctx.require_token()?;
        self.record(Call::Status(scan_id.to_string()));

        let host = self
            .scan_hosts
            .lock()
            .get(scan_id)
            .cloned()
            .unwrap_or_default();
        let next = self
            .polls
            .lock()
            .get_mut(&host)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Poll::Running);

        match next {
            Poll::Running => Ok(status(json!({ "status": "running" }))),
            Poll::Completed(ports) => {
                let ports: Vec<_> = ports
                    .iter()
                    .map(|p| json!({ "portid": p, "state": "open", "service": { "name": "tcp" } }))
                    .collect();
                Ok(status(json!({
                    "status": "completed",
                    "results": { "hosts": [{
                        "ip": host,
                        "ports": ports,
                        "os": [{ "name": "Linux 2.6.X", "accuracy": "95" }],
                        "hostnames": [{ "name": "target.local", "type": "PTR" }],
                        "addresses": [{ "addr": "00:0C:29:00:00:01", "addrtype": "mac", "vendor": "VMware" }]
                    }]}
                })))
            }
            Poll::CompletedEmpty => Ok(status(json!({ "status": "completed", "results": { "hosts": [] } }))),
            Poll::Other(name) => Ok(status(json!({ "status": name }))),
            Poll::Failed(reason) => Ok(status(json!({ "status": "failed", "error": reason }))),
            Poll::Rejected(reason) => Err(ScanError::backend(ExecutionStep::ScanStatus, Some(500), reason)),
            Poll::Transport => Err(transport_error(ExecutionStep::ScanStatus)),
        }
    }

    async fn detect_versions(&self, ctx: &AuthContext, _host: &str, ports: &[u16]) -> Result<Vec<DetectedService>> {
        ctx.require_token()?;
        self.record(Call::Detect(ports.to_vec()));
        let stalled = *self.stall_detection.lock();
        if stalled {
            std::future::pending::<()>().await;
        }

        let index = {
            let mut count = self.detect_calls.lock();
            let index = *count;
            *count += 1;
            index
        };
        if self.failing_batches.lock().contains(&index) {
            return Err(ScanError::backend(ExecutionStep::DetectVersions, Some(504), "gateway timeout"));
        }

        let services = self.services.lock();
        Ok(ports.iter().filter_map(|p| services.get(p).cloned()).collect())
    }

    async fn lookup_cves(&self, ctx: &AuthContext, product: &str, version: &str) -> Result<Vec<CveRecord>> {
        ctx.require_token()?;
        self.record(Call::Cves(product.to_string(), version.to_string()));

        let key = (product.to_string(), version.to_string());
        if self.cve_failures.lock().contains(&key) {
            return Err(transport_error(ExecutionStep::LookupCve));
        }
        Ok(self.cves.lock().get(&key).cloned().unwrap_or_default())
    }

    async fn lookup_exploits(&self, ctx: &AuthContext, cve_id: &str) -> Result<Vec<ExploitRecord>> {
        ctx.require_token()?;
        self.record(Call::Exploits(cve_id.to_string()));
        let stalled = self.stalled_exploits.lock().contains(cve_id);
        if stalled {
            std::future::pending::<()>().await;
        }
        if self.exploit_failures.lock().contains(cve_id) {
            return Err(ScanError::backend(ExecutionStep::LookupExploits, Some(502), "exploit database unavailable"));
        }
        Ok(self.exploits.lock().get(cve_id).cloned().unwrap_or_default())
    }

    async fn execute_exploit(&self, ctx: &AuthContext, request: &ExecuteRequest) -> Result<ExecuteResponse> {
        ctx.require_token()?;
        self.record(Call::Execute(request.clone()));

        let failure = self.execute_failure.lock().clone();
        let response = match (failure, &request.command) {
            (Some(error), _) => json!({ "success": false, "error": error }),
            (None, None) => json!({ "success": true, "output": "Backdoor triggered", "shellPort": 6200 }),
            (None, Some(command)) => json!({ "success": true, "output": format!("live: {}", command) }),
        };
        Ok(serde_json::from_value(response).expect("scripted execute response must decode"))
    }
}

pub struct Harness {
    pub backend: std::sync::Arc<ScriptedBackend>,
    pub assets: std::sync::Arc<rscan_orchestrator::assets::InMemoryAssetRegistry>,
    pub vault: std::sync::Arc<rscan_orchestrator::vault::InMemoryVault>,
    pub orchestrator: rscan_orchestrator::Orchestrator,
}

/// Fast polling, no simulated connect delay.
pub fn test_config() -> rscan_orchestrator::config::Config {
    let mut config = rscan_orchestrator::config::Config::default();
    config.scan.poll_interval_ms = 10;
    config.shell.simulated_connect_delay_ms = 0;
    config
}

pub fn ctx() -> AuthContext {
    AuthContext::new("test-token")
}

pub fn harness() -> Harness {
    harness_with(test_config())
}

pub fn harness_with(config: rscan_orchestrator::config::Config) -> Harness {
    use std::sync::Arc;

    let backend = Arc::new(ScriptedBackend::new());
    let assets = Arc::new(rscan_orchestrator::assets::InMemoryAssetRegistry::new());
    let vault = Arc::new(rscan_orchestrator::vault::InMemoryVault::new());
    let orchestrator = rscan_orchestrator::Orchestrator::new(config, backend.clone(), assets.clone(), vault.clone());
    Harness {
        backend,
        assets,
        vault,
        orchestrator,
    }
}
