mod common;

use common::{ctx, cve, exploit, harness, Call};
use rscan_orchestrator::{
    backend::AuthContext,
    config::Config,
    shell::{
        normalize_cve_id, simulated_response, DriverRegistry, ExploitDriver, ExploitTarget, PayloadSpec,
        SimulatedDriver,
    },
    types::{ScanOptions, ScanTarget, SessionStatus, ShellType},
    vault::CredentialVault,
    ScanError,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn execute_calls(h: &common::Harness) -> Vec<rscan_orchestrator::step::ExecuteRequest> {
    h.backend
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            Call::Execute(request) => Some(request),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_simulated_session_answers_scripted_commands() {
    let h = harness();
    let id = h
        .orchestrator
        .open_shell(&ctx(), ExploitTarget::new("10.0.0.5", 4444), PayloadSpec::default())
        .await
        .unwrap();

    assert_eq!(h.orchestrator.session(&id).unwrap().status, SessionStatus::Connected);
    assert_eq!(h.orchestrator.shells().driver_name(&id).as_deref(), Some("simulated"));

    assert_eq!(h.orchestrator.send(&ctx(), &id, "whoami").await.unwrap(), "root");
    assert_eq!(h.orchestrator.send(&ctx(), &id, "pwd").await.unwrap(), "/root");
    assert_eq!(
        h.orchestrator.send(&ctx(), &id, "ls").await.unwrap(),
        "Desktop\nDocuments\nDownloads\nflag.txt\nexploit.sh"
    );

    assert_eq!(h.orchestrator.session(&id).unwrap().commands_executed, 3);
    assert!(h.backend.calls().is_empty());
}

#[test]
fn test_simulated_responses() {
    assert_eq!(simulated_response("ls -la /tmp"), "Desktop\nDocuments\nDownloads\nflag.txt\nexploit.sh");
    assert_eq!(simulated_response("  whoami "), "root");
    assert_eq!(simulated_response("cat flag.txt"), "FLAG{simulated_shell_access}");
    assert_eq!(simulated_response("echo hello"), "echo hello");
}

#[tokio::test]
async fn test_closed_session_rejects_commands() {
    let h = harness();
    let id = h
        .orchestrator
        .open_shell(&ctx(), ExploitTarget::new("10.0.0.5", 4444), PayloadSpec::default())
        .await
        .unwrap();
    h.orchestrator.send(&ctx(), &id, "id").await.unwrap();

    let closed = h.orchestrator.close(&id).unwrap();
    assert_eq!(closed.status, SessionStatus::Closed);
    assert_eq!(closed.commands_executed, 1);

    let err = h.orchestrator.send(&ctx(), &id, "whoami").await.unwrap_err();
    assert!(matches!(err, ScanError::NotFound(_)));
    assert!(h.orchestrator.session(&id).is_none());
    assert!(h.orchestrator.close(&id).is_err());
    assert!(h
        .orchestrator
        .shells()
        .log()
        .messages()
        .iter()
        .any(|m| m.ends_with("Session closed (1 command(s) executed)")));
}

#[tokio::test]
async fn test_empty_target_ip_is_rejected_before_any_call() {
    let h = harness();
    let err = h
        .orchestrator
        .open_shell(&ctx(), ExploitTarget::new("  ", 21), PayloadSpec::default())
        .await
        .unwrap_err();

    assert!(err.is_precondition());
    assert!(h.orchestrator.sessions().is_empty());
    assert!(h.backend.calls().is_empty());
}

#[tokio::test]
async fn test_open_requires_a_token() {
    let h = harness();
    let err = h
        .orchestrator
        .open_shell(
            &AuthContext::anonymous(),
            ExploitTarget::new("10.0.0.5", 21),
            PayloadSpec::default(),
        )
        .await
        .unwrap_err();

    assert!(err.is_precondition());
    assert!(h.orchestrator.sessions().is_empty());
}

#[tokio::test]
async fn test_integrated_exploit_is_driven_through_the_backend() {
    let h = harness();
    let target = ExploitTarget::new("10.0.0.5", 21).with_cve("cve-2011-2523");
    let id = h
        .orchestrator
        .open_shell(&ctx(), target, PayloadSpec::default())
        .await
        .unwrap();

    assert_eq!(h.orchestrator.session(&id).unwrap().status, SessionStatus::Connected);
    assert_eq!(
        h.orchestrator.shells().driver_name(&id).as_deref(),
        Some("vsftpd 2.3.4 backdoor")
    );

    let output = h.orchestrator.send(&ctx(), &id, "id").await.unwrap();
    assert_eq!(output, "live: id");

    let calls = execute_calls(&h);
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].exploit_type, "vsftpd_backdoor");
    assert_eq!(calls[0].target_port, 21);
    assert_eq!(calls[0].command, None);
    assert_eq!(calls[1].command.as_deref(), Some("id"));

    let log = h.orchestrator.shells().log().messages();
    assert!(log.iter().any(|m| m.ends_with("Backdoor triggered")));
    assert!(log.iter().any(|m| m.ends_with("shell available on port 6200")));
}

#[tokio::test]
async fn test_service_pattern_selects_integrated_exploit() {
    let h = harness();
    let target = ExploitTarget::new("10.0.0.5", 21).with_service("vsFTPd 2.3.4");
    let id = h
        .orchestrator
        .open_shell(&ctx(), target, PayloadSpec::default())
        .await
        .unwrap();

    assert_eq!(
        h.orchestrator.shells().driver_name(&id).as_deref(),
        Some("vsftpd 2.3.4 backdoor")
    );
    assert_eq!(execute_calls(&h).len(), 1);
}

#[tokio::test]
async fn test_failed_exploit_leaves_session_failed() {
    let h = harness();
    h.backend.fail_execute("target not vulnerable");

    let target = ExploitTarget::new("10.0.0.5", 21).with_cve("CVE-2011-2523");
    let id = h
        .orchestrator
        .open_shell(&ctx(), target, PayloadSpec::default())
        .await
        .unwrap();

    let session = h.orchestrator.session(&id).unwrap();
    assert_eq!(session.status, SessionStatus::Failed);

    let err = h.orchestrator.send(&ctx(), &id, "whoami").await.unwrap_err();
    assert!(matches!(
        err,
        ScanError::SessionInactive {
            status: SessionStatus::Failed,
            ..
        }
    ));
    assert_eq!(h.orchestrator.session(&id).unwrap().commands_executed, 0);
    assert!(h.vault.is_empty());
}

#[tokio::test]
async fn test_failed_command_still_counts() {
    let h = harness();
    let target = ExploitTarget::new("10.0.0.5", 21).with_cve("CVE-2011-2523");
    let id = h
        .orchestrator
        .open_shell(&ctx(), target, PayloadSpec::default())
        .await
        .unwrap();

    h.backend.fail_execute("connection reset");
    assert!(h.orchestrator.send(&ctx(), &id, "uname -a").await.is_err());
    assert_eq!(h.orchestrator.session(&id).unwrap().commands_executed, 1);
    assert_eq!(h.orchestrator.session(&id).unwrap().status, SessionStatus::Connected);
}

#[tokio::test]
async fn test_successful_connect_upserts_vault_credential() {
    let h = harness();
    for _ in 0..2 {
        h.orchestrator
            .open_shell(&ctx(), ExploitTarget::new("10.0.0.5", 4444), PayloadSpec::default())
            .await
            .unwrap();
    }
    let payload = PayloadSpec {
        shell_type: ShellType::Bind,
        username: Some("msfadmin".to_string()),
        ..PayloadSpec::default()
    };
    h.orchestrator
        .open_shell(&ctx(), ExploitTarget::new("10.0.0.5", 4444), payload)
        .await
        .unwrap();

    let ranked = h.vault.ranked(Some("10.0.0.5"));
    assert_eq!(ranked.len(), 2);
    assert_eq!(ranked[0].protocol, "reverse-shell");
    assert_eq!(ranked[0].username, "root");
    assert_eq!(ranked[0].use_count, 2);
    assert_eq!(ranked[1].protocol, "bind-shell");
    assert_eq!(ranked[1].username, "msfadmin");
    assert_eq!(ranked[1].use_count, 1);

    assert_eq!(h.orchestrator.sessions().len(), 3);
}

#[tokio::test]
async fn test_exploit_prepopulates_from_vulnerability() {
    let h = harness();
    h.orchestrator
        .register_target(ScanTarget::single("10.0.0.5", "10.0.0.5", ScanOptions::default()))
        .unwrap();
    h.assets.seed("10.0.0.5", vec![21]);
    h.backend.add_service(21, Some("vsftpd"), Some("2.3.4"));
    h.backend
        .add_cves("vsftpd", "2.3.4", vec![cve("CVE-2011-2523", 9.8)]);
    h.backend.add_exploits(
        "CVE-2011-2523",
        vec![exploit(
            "exploit/unix/ftp/vsftpd_234_backdoor",
            json!({ "shellType": "bind", "triggerPort": 21, "shellPort": 6200 }),
        )],
    );

    let vulns = h.orchestrator.correlate(&ctx(), "10.0.0.5").await.unwrap();
    let id = h
        .orchestrator
        .exploit(&ctx(), "10.0.0.5", &vulns[0].id)
        .await
        .unwrap();

    let session = h.orchestrator.session(&id).unwrap();
    assert_eq!(session.status, SessionStatus::Connected);
    assert_eq!(session.shell_type, ShellType::Bind);
    assert_eq!(session.target_ip, "10.0.0.5");
    assert_eq!(session.target_port, 21);
    assert_eq!(execute_calls(&h)[0].exploit_type, "vsftpd_backdoor");

    let err = h
        .orchestrator
        .exploit(&ctx(), "10.0.0.5", "no-such-vulnerability")
        .await
        .unwrap_err();
    assert!(matches!(err, ScanError::NotFound(_)));
}

#[test]
fn test_payload_spec_from_metadata() {
    let metadata = serde_json::from_value(json!({
        "shellType": "bind_shell",
        "shellPort": 6200,
        "defaultPayloadVariant": "cmd/unix/interact",
        "payloadType": "cmd"
    }))
    .unwrap();
    let payload = PayloadSpec::from_metadata(Some(&metadata));

    assert_eq!(payload.shell_type, ShellType::Bind);
    assert_eq!(payload.shell_port, Some(6200));
    assert_eq!(payload.payload_variant.as_deref(), Some("cmd/unix/interact"));
    assert_eq!(payload.payload_type.as_deref(), Some("cmd"));
    assert_eq!(PayloadSpec::from_metadata(None), PayloadSpec::default());
}

#[test]
fn test_cve_id_normalization() {
    assert_eq!(normalize_cve_id("cve-2011-2523").as_deref(), Some("CVE-2011-2523"));
    assert_eq!(
        normalize_cve_id("vsftpd backdoor (CVE-2011-2523)").as_deref(),
        Some("CVE-2011-2523")
    );
    assert_eq!(normalize_cve_id("CVE-21-1"), None);
}

#[test]
fn test_simulated_driver_narrates_without_a_token() {
    let driver = SimulatedDriver::new(Duration::ZERO);
    let payload = PayloadSpec {
        payload_variant: Some("cmd/unix/interact".to_string()),
        ..PayloadSpec::default()
    };
    let lines = tokio_test::block_on(driver.open(
        &AuthContext::anonymous(),
        &ExploitTarget::new("10.0.0.5", 4444),
        &payload,
    ))
    .unwrap();

    assert!(!driver.is_live());
    assert_eq!(lines[0], "[*] Started reverse handler");
    assert!(lines.contains(&"[*] Payload variant: cmd/unix/interact".to_string()));
    assert_eq!(
        lines.last().map(String::as_str),
        Some("[+] Command shell session opened (reverse -> 10.0.0.5:4444)")
    );
}

#[test]
fn test_driver_resolution_falls_back_to_simulation() {
    let backend = Arc::new(common::ScriptedBackend::new());
    let registry = DriverRegistry::from_config(&Config::default().shell, backend);
    assert_eq!(registry.len(), 1);

    let by_cve = registry.resolve(&ExploitTarget::new("10.0.0.5", 21).with_cve("CVE-2011-2523"));
    assert!(by_cve.is_live());

    let unmatched = registry.resolve(
        &ExploitTarget::new("10.0.0.5", 22)
            .with_cve("CVE-2008-0166")
            .with_service("OpenSSH 4.7p1"),
    );
    assert_eq!(unmatched.name(), "simulated");
    assert!(!unmatched.is_live());
}
