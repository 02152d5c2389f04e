use crate::activity::ActivityLog;
use crate::backend::{AuthContext, Backend};
use crate::config::ShellConfig;
use crate::registry::Registry;
use crate::step::{ExecuteRequest, ExecutionStep};
use crate::types::{
    CredentialUse, ExploitMetadata, SessionId, SessionStatus, ShellSession, ShellType, Vulnerability,
};
use crate::vault::CredentialVault;
use crate::{Result, ScanError};
use async_trait::async_trait;
use chrono::Utc;
use lazy_static::lazy_static;
use log::debug;
use parking_lot::Mutex;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

lazy_static! {
    static ref CVE_ID: Regex = Regex::new(r"(?i)\bCVE-(\d{4})-(\d{4,})\b").unwrap();
}

/// Canonical upper-case CVE id found in `value`, if any.
pub fn normalize_cve_id(value: &str) -> Option<String> {
    CVE_ID
        .captures(value)
        .map(|caps| format!("CVE-{}-{}", &caps[1], &caps[2]))
}

/// Where an exploit is aimed.
#[derive(Debug, Clone, PartialEq)]
pub struct ExploitTarget {
    pub target_ip: String,
    pub target_port: u16,
    pub cve_id: Option<String>,
    pub service: Option<String>,
}

impl ExploitTarget {
    pub fn new(target_ip: impl Into<String>, target_port: u16) -> Self {
        Self {
            target_ip: target_ip.into(),
            target_port,
            cve_id: None,
            service: None,
        }
    }

    pub fn with_cve(mut self, cve_id: impl Into<String>) -> Self {
        self.cve_id = Some(cve_id.into());
        self
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    /// Aim at the port the exploit triggers on, falling back to the affected port.
    pub fn from_vulnerability(host: &str, vulnerability: &Vulnerability) -> Self {
        let port = vulnerability
            .exploit_metadata
            .as_ref()
            .and_then(|m| m.trigger_port)
            .unwrap_or(vulnerability.affected_port);

        Self {
            target_ip: host.to_string(),
            target_port: port,
            cve_id: Some(vulnerability.cve_id.clone()),
            service: Some(vulnerability.affected_service.clone()),
        }
    }
}

/// How the shell should come back to us.
#[derive(Debug, Clone, PartialEq)]
pub struct PayloadSpec {
    pub shell_type: ShellType,
    pub payload_variant: Option<String>,
    pub payload_type: Option<String>,
    pub shell_port: Option<u16>,
    pub username: Option<String>,
}

impl Default for PayloadSpec {
    fn default() -> Self {
        Self {
            shell_type: ShellType::Reverse,
            payload_variant: None,
            payload_type: None,
            shell_port: None,
            username: None,
        }
    }
}

impl PayloadSpec {
    pub fn from_metadata(metadata: Option<&ExploitMetadata>) -> Self {
        let Some(meta) = metadata else {
            return Self::default();
        };

        Self {
            shell_type: meta
                .shell_type
                .as_deref()
                .and_then(ShellType::parse)
                .unwrap_or(ShellType::Reverse),
            payload_variant: meta.default_payload_variant.clone(),
            payload_type: meta.payload_type.clone(),
            shell_port: meta.shell_port,
            username: None,
        }
    }

    pub fn from_vulnerability(vulnerability: &Vulnerability) -> Self {
        Self::from_metadata(vulnerability.exploit_metadata.as_ref())
    }
}

/// A way of obtaining and driving a remote shell.
#[async_trait]
pub trait ExploitDriver: Send + Sync {
    fn name(&self) -> &str;

    /// Live drivers touch the backend; simulated ones never do.
    fn is_live(&self) -> bool {
        false
    }

    /// Establish the shell. Returns narration lines for the session log.
    async fn open(&self, ctx: &AuthContext, target: &ExploitTarget, payload: &PayloadSpec) -> Result<Vec<String>>;

    async fn send(&self, ctx: &AuthContext, target: &ExploitTarget, command: &str) -> Result<String>;
}

/// Drives a real exploit through the backend's execution endpoint.
pub struct LiveExploitDriver {
    name: String,
    exploit_type: String,
    backend: Arc<dyn Backend>,
}

impl LiveExploitDriver {
    pub fn new(name: impl Into<String>, exploit_type: impl Into<String>, backend: Arc<dyn Backend>) -> Self {
        Self {
            name: name.into(),
            exploit_type: exploit_type.into(),
            backend,
        }
    }

    pub fn exploit_type(&self) -> &str {
        &self.exploit_type
    }

    fn request(&self, target: &ExploitTarget, command: Option<&str>) -> ExecuteRequest {
        ExecuteRequest {
            target_ip: target.target_ip.clone(),
            target_port: target.target_port,
            exploit_type: self.exploit_type.clone(),
            command: command.map(str::to_string),
        }
    }
}

#[async_trait]
impl ExploitDriver for LiveExploitDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_live(&self) -> bool {
        true
    }

    async fn open(&self, ctx: &AuthContext, target: &ExploitTarget, payload: &PayloadSpec) -> Result<Vec<String>> {
        let response = self.backend.execute_exploit(ctx, &self.request(target, None)).await?;
        if !response.success {
            let message = response
                .error
                .or_else(|| Some(response.output.trim().to_string()).filter(|o| !o.is_empty()))
                .unwrap_or_else(|| "exploit did not succeed".to_string());
            return Err(ScanError::backend(ExecutionStep::ExecutePayload, None, message));
        }

        let mut lines = vec![format!(
            "[*] {} ({}) executed against {}:{}",
            self.name, self.exploit_type, target.target_ip, target.target_port
        )];
        lines.extend(
            response
                .output
                .lines()
                .filter(|l| !l.trim().is_empty())
                .map(str::to_string),
        );
        if let Some(port) = response.shell_port.or(payload.shell_port) {
            lines.push(format!("[+] {} shell available on port {}", payload.shell_type, port));
        }
        Ok(lines)
    }

    async fn send(&self, ctx: &AuthContext, target: &ExploitTarget, command: &str) -> Result<String> {
        let response = self
            .backend
            .execute_exploit(ctx, &self.request(target, Some(command)))
            .await?;
        if !response.success {
            let message = response
                .error
                .unwrap_or_else(|| format!("command '{}' was not executed", command));
            return Err(ScanError::backend(ExecutionStep::ShellCommand, None, message));
        }
        Ok(response.output)
    }
}

/// Scripted stand-in used when no integrated exploit matches the target.
pub struct SimulatedDriver {
    connect_delay: Duration,
}

impl SimulatedDriver {
    pub fn new(connect_delay: Duration) -> Self {
        Self { connect_delay }
    }
}

#[async_trait]
impl ExploitDriver for SimulatedDriver {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn open(&self, _ctx: &AuthContext, target: &ExploitTarget, payload: &PayloadSpec) -> Result<Vec<String>> {
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }

        let mut lines = vec![
            format!("[*] Started {} handler", payload.shell_type),
            format!("[*] Sending payload to {}:{}", target.target_ip, target.target_port),
        ];
        if let Some(variant) = &payload.payload_variant {
            lines.push(format!("[*] Payload variant: {}", variant));
        }
        lines.push(format!(
            "[+] Command shell session opened ({} -> {}:{})",
            payload.shell_type, target.target_ip, target.target_port
        ));
        Ok(lines)
    }

    async fn send(&self, _ctx: &AuthContext, _target: &ExploitTarget, command: &str) -> Result<String> {
        Ok(simulated_response(command))
    }
}

/// Canned output for the simulated shell. Unknown commands are echoed back.
pub fn simulated_response(command: &str) -> String {
    let command = command.trim();
    let output = match command {
        "whoami" => "root",
        "pwd" => "/root",
        "id" => "uid=0(root) gid=0(root) groups=0(root)",
        "hostname" => "target",
        "uname -a" => "Linux target 2.6.24-16-server #1 SMP i686 GNU/Linux",
        "cat flag.txt" => "FLAG{simulated_shell_access}",
        c if c.starts_with("ls") => "Desktop\nDocuments\nDownloads\nflag.txt\nexploit.sh",
        other => other,
    };
    output.to_string()
}

struct DriverEntry {
    cve_ids: Vec<String>,
    service_patterns: Vec<String>,
    driver: Arc<dyn ExploitDriver>,
}

impl DriverEntry {
    fn matches(&self, target: &ExploitTarget) -> bool {
        let cve_hit = target
            .cve_id
            .as_deref()
            .and_then(normalize_cve_id)
            .map_or(false, |id| self.cve_ids.iter().any(|c| *c == id));
        if cve_hit {
            return true;
        }

        target.service.as_deref().map_or(false, |service| {
            let service = service.to_lowercase();
            self.service_patterns.iter().any(|p| service.contains(p.as_str()))
        })
    }
}

/// Picks the driver for a target: first matching integrated exploit, else the fallback.
pub struct DriverRegistry {
    entries: Vec<DriverEntry>,
    fallback: Arc<dyn ExploitDriver>,
}

impl DriverRegistry {
    pub fn new(fallback: Arc<dyn ExploitDriver>) -> Self {
        Self {
            entries: Vec::new(),
            fallback,
        }
    }

    /// Live driver per configured integration, simulated fallback.
    pub fn from_config(config: &ShellConfig, backend: Arc<dyn Backend>) -> Self {
        let fallback = Arc::new(SimulatedDriver::new(Duration::from_millis(
            config.simulated_connect_delay_ms,
        )));
        let mut registry = Self::new(fallback);
        for integration in &config.integrations {
            registry.register(
                &integration.cve_ids,
                &integration.service_patterns,
                Arc::new(LiveExploitDriver::new(
                    integration.name.clone(),
                    integration.exploit_type.clone(),
                    backend.clone(),
                )),
            );
        }
        registry
    }

    pub fn register<S: AsRef<str>>(&mut self, cve_ids: &[S], service_patterns: &[S], driver: Arc<dyn ExploitDriver>) {
        self.entries.push(DriverEntry {
            cve_ids: cve_ids.iter().filter_map(|c| normalize_cve_id(c.as_ref())).collect(),
            service_patterns: service_patterns
                .iter()
                .map(|p| p.as_ref().trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
            driver,
        });
    }

    pub fn resolve(&self, target: &ExploitTarget) -> Arc<dyn ExploitDriver> {
        self.entries
            .iter()
            .find(|e| e.matches(target))
            .map(|e| e.driver.clone())
            .unwrap_or_else(|| self.fallback.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

struct SessionSlot {
    session: Mutex<ShellSession>,
    target: ExploitTarget,
    driver: Arc<dyn ExploitDriver>,
}

/// Opens, drives and closes shell sessions. Sessions are only reachable by id.
pub struct ShellSessionManager {
    drivers: DriverRegistry,
    vault: Arc<dyn CredentialVault>,
    default_username: String,
    sessions: Registry<SessionSlot>,
    log: ActivityLog,
}

impl ShellSessionManager {
    pub fn new(drivers: DriverRegistry, vault: Arc<dyn CredentialVault>, default_username: impl Into<String>) -> Self {
        Self {
            drivers,
            vault,
            default_username: default_username.into(),
            sessions: Registry::new(),
            log: ActivityLog::new("shell"),
        }
    }

    /// Create a session and try to establish it. The id is returned whether or not
    /// the shell came up; a failed attempt leaves the session in `Failed`.
    pub async fn open(&self, ctx: &AuthContext, target: ExploitTarget, payload: PayloadSpec) -> Result<SessionId> {
        if target.target_ip.trim().is_empty() {
            self.log.error("No target selected for exploitation");
            return Err(ScanError::Precondition("a target IP is required to open a shell".to_string()));
        }
        if let Err(e) = ctx.require_token() {
            self.log.error("Authentication required to open a shell");
            return Err(e);
        }

        let driver = self.drivers.resolve(&target);
        let id = Uuid::new_v4().to_string();
        let session = ShellSession {
            id: id.clone(),
            target_ip: target.target_ip.clone(),
            target_port: target.target_port,
            shell_type: payload.shell_type,
            status: SessionStatus::Connecting,
            created_at: Utc::now(),
            commands_executed: 0,
        };

        self.log.info(format!(
            "[{}] Opening {} shell to {}:{} via {}",
            short_id(&id),
            payload.shell_type,
            target.target_ip,
            target.target_port,
            driver.name()
        ));

        let slot = Arc::new(SessionSlot {
            session: Mutex::new(session),
            target,
            driver: driver.clone(),
        });
        self.sessions.insert(id.clone(), slot.clone());

        match driver.open(ctx, &slot.target, &payload).await {
            Ok(lines) => {
                for line in lines {
                    self.log.info(format!("[{}] {}", short_id(&id), line));
                }
                if !self.transition(&slot, SessionStatus::Connected) {
                    debug!("Session {} was closed while connecting", id);
                    return Ok(id);
                }
                self.vault.upsert(CredentialUse {
                    host: slot.target.target_ip.clone(),
                    protocol: format!("{}-shell", payload.shell_type),
                    username: payload
                        .username
                        .clone()
                        .unwrap_or_else(|| self.default_username.clone()),
                    timestamp: Utc::now(),
                });
                self.log.success(format!("[{}] Session established", short_id(&id)));
            }
            Err(e) => {
                self.transition(&slot, SessionStatus::Failed);
                self.log.error(format!("[{}] Failed to open shell: {}", short_id(&id), e));
            }
        }

        Ok(id)
    }

    /// Moves a still-connecting session to `status`. False if it left `Connecting` already.
    fn transition(&self, slot: &SessionSlot, status: SessionStatus) -> bool {
        let mut session = slot.session.lock();
        if session.status != SessionStatus::Connecting {
            return false;
        }
        session.status = status;
        true
    }

    /// Run one command. Counted as soon as it is accepted, whatever the driver returns.
    pub async fn send(&self, ctx: &AuthContext, session_id: &str, command: &str) -> Result<String> {
        let slot = self
            .sessions
            .get(session_id)
            .ok_or_else(|| ScanError::NotFound(format!("shell session {}", session_id)))?;

        let command = command.trim();
        if command.is_empty() {
            return Err(ScanError::InvalidInput("empty command".to_string()));
        }

        {
            let mut session = slot.session.lock();
            if session.status != SessionStatus::Connected {
                return Err(ScanError::SessionInactive {
                    id: session_id.to_string(),
                    status: session.status,
                });
            }
            session.commands_executed += 1;
        }

        self.log.info(format!("[{}] $ {}", short_id(session_id), command));
        match slot.driver.send(ctx, &slot.target, command).await {
            Ok(output) => {
                for line in output.lines() {
                    self.log.info(format!("[{}] {}", short_id(session_id), line));
                }
                Ok(output)
            }
            Err(e) => {
                self.log.error(format!("[{}] Command failed: {}", short_id(session_id), e));
                Err(e)
            }
        }
    }

    /// Close and forget a session. Returns its final snapshot.
    pub fn close(&self, session_id: &str) -> Result<ShellSession> {
        let slot = self
            .sessions
            .remove(session_id)
            .ok_or_else(|| ScanError::NotFound(format!("shell session {}", session_id)))?;

        let mut session = slot.session.lock();
        session.status = SessionStatus::Closed;
        self.log.info(format!(
            "[{}] Session closed ({} command(s) executed)",
            short_id(session_id),
            session.commands_executed
        ));
        Ok(session.clone())
    }

    pub fn session(&self, session_id: &str) -> Option<ShellSession> {
        self.sessions.get(session_id).map(|s| s.session.lock().clone())
    }

    pub fn sessions(&self) -> Vec<ShellSession> {
        let mut sessions: Vec<ShellSession> = self
            .sessions
            .values()
            .iter()
            .map(|s| s.session.lock().clone())
            .collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        sessions
    }

    /// Name of the driver serving a session.
    pub fn driver_name(&self, session_id: &str) -> Option<String> {
        self.sessions.get(session_id).map(|s| s.driver.name().to_string())
    }

    pub fn drivers(&self) -> &DriverRegistry {
        &self.drivers
    }

    pub fn log(&self) -> &ActivityLog {
        &self.log
    }
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}
