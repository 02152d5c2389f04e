mod common;

use common::{ctx, harness, Call, Failure, Poll};
use rscan_orchestrator::{
    assets::AssetRegistry,
    backend::AuthContext,
    scan_job::StartOutcome,
    types::{JobStatus, ScanOptions, ScanTarget},
    ScanError,
};
use std::time::Duration;

fn single(host: &str) -> ScanTarget {
    ScanTarget::single(host, host, ScanOptions::default())
}

fn messages(h: &common::Harness, target_id: &str) -> Vec<String> {
    h.orchestrator
        .scan_log(target_id)
        .map(|log| log.messages())
        .unwrap_or_default()
}

#[tokio::test]
async fn test_scan_polls_until_completed_and_ingests_once() {
    let h = harness();
    h.backend.script_polls(
        "10.0.0.5",
        vec![Poll::Running, Poll::Running, Poll::Completed(vec![22, 80])],
    );

    h.orchestrator.register_target(single("10.0.0.5")).unwrap();
    let outcome = h.orchestrator.start_scan(&ctx(), "10.0.0.5").unwrap();
    assert_eq!(outcome, StartOutcome::Started);

    let status = h.orchestrator.wait_for_scan("10.0.0.5").await;
    assert_eq!(status, Some(JobStatus::Completed));

    let updates = h.assets.updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].host, "10.0.0.5");
    assert_eq!(updates[0].open_ports, vec![22, 80]);
    assert_eq!(updates[0].os_name, "Linux 2.6.X");
    assert_eq!(updates[0].hostname.as_deref(), Some("target.local"));
    assert_eq!(updates[0].vendor.as_deref(), Some("VMware"));
    assert_eq!(h.assets.open_ports("10.0.0.5"), vec![22, 80]);

    assert_eq!(h.backend.count(|c| matches!(c, Call::Status(_))), 3);

    let job = h.orchestrator.job("10.0.0.5").unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.backend_scan_id.as_deref(), Some("scan-10.0.0.5"));

    let log = messages(&h, "10.0.0.5");
    let still_running = log
        .iter()
        .filter(|m| m.as_str() == "Scan still running for 10.0.0.5...")
        .count();
    assert_eq!(still_running, 2);
}

#[tokio::test]
async fn test_multi_host_job_scans_hosts_one_at_a_time() {
    let h = harness();
    let hosts = ["10.0.0.1", "10.0.0.2", "10.0.0.3"];
    for host in hosts {
        h.backend
            .script_polls(host, vec![Poll::Running, Poll::Completed(vec![22])]);
    }

    let target = ScanTarget::multi("lab", hosts, ScanOptions::default());
    h.orchestrator.register_target(target).unwrap();
    h.orchestrator.start_scan(&ctx(), "lab").unwrap();
    assert_eq!(h.orchestrator.wait_for_scan("lab").await, Some(JobStatus::Completed));

    let mut expected = Vec::new();
    for host in hosts {
        expected.push(Call::Submit(host.to_string()));
        expected.push(Call::Status(format!("scan-{}", host)));
        expected.push(Call::Status(format!("scan-{}", host)));
    }
    assert_eq!(h.backend.calls(), expected);
    assert_eq!(h.assets.updates().len(), 3);
}

#[tokio::test]
async fn test_start_without_token_is_rejected() {
    let h = harness();
    h.orchestrator.register_target(single("10.0.0.5")).unwrap();

    let err = h
        .orchestrator
        .start_scan(&AuthContext::anonymous(), "10.0.0.5")
        .unwrap_err();
    assert!(err.is_precondition());
    assert!(h.backend.calls().is_empty());
    assert_eq!(h.orchestrator.job("10.0.0.5").unwrap().status, JobStatus::Idle);
    assert!(messages(&h, "10.0.0.5")
        .iter()
        .any(|m| m.contains("Authentication required")));
}

#[tokio::test]
async fn test_start_while_polling_is_a_no_op() {
    let h = harness();
    h.orchestrator.register_target(single("10.0.0.5")).unwrap();

    assert_eq!(h.orchestrator.start_scan(&ctx(), "10.0.0.5").unwrap(), StartOutcome::Started);
    assert_eq!(
        h.orchestrator.start_scan(&ctx(), "10.0.0.5").unwrap(),
        StartOutcome::AlreadyRunning
    );

    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(h.backend.count(|c| matches!(c, Call::Submit(_))), 1);

    assert!(h.orchestrator.cancel_scan("10.0.0.5"));
    assert_eq!(h.orchestrator.wait_for_scan("10.0.0.5").await, Some(JobStatus::Running));
}

#[tokio::test]
async fn test_cancel_stops_polling_and_keeps_last_status() {
    let h = harness();
    h.orchestrator.register_target(single("10.0.0.5")).unwrap();
    h.orchestrator.start_scan(&ctx(), "10.0.0.5").unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.orchestrator.cancel_scan("10.0.0.5"));
    assert!(!h.orchestrator.scans().is_polling("10.0.0.5"));
    assert!(!h.orchestrator.cancel_scan("10.0.0.5"));

    let polls = h.backend.count(|c| matches!(c, Call::Status(_)));
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(h.backend.count(|c| matches!(c, Call::Status(_))), polls);

    let job = h.orchestrator.job("10.0.0.5").unwrap();
    assert_eq!(job.status, JobStatus::Running);
    assert!(h.assets.updates().is_empty());
    assert!(messages(&h, "10.0.0.5")
        .iter()
        .any(|m| m.starts_with("Scan cancelled")));
}

#[tokio::test]
async fn test_restart_appends_boundary_and_keeps_history() {
    let h = harness();
    h.backend
        .script_polls("10.0.0.5", vec![Poll::Completed(vec![22])]);
    h.orchestrator.register_target(single("10.0.0.5")).unwrap();
    h.orchestrator.start_scan(&ctx(), "10.0.0.5").unwrap();
    assert_eq!(h.orchestrator.wait_for_scan("10.0.0.5").await, Some(JobStatus::Completed));
    let first_run = messages(&h, "10.0.0.5");

    h.backend
        .script_polls("10.0.0.5", vec![Poll::Completed(vec![22, 443])]);
    assert_eq!(h.orchestrator.start_scan(&ctx(), "10.0.0.5").unwrap(), StartOutcome::Started);
    assert_eq!(h.orchestrator.wait_for_scan("10.0.0.5").await, Some(JobStatus::Completed));

    let log = messages(&h, "10.0.0.5");
    assert_eq!(&log[..first_run.len()], &first_run[..]);
    assert_eq!(log[first_run.len()], "---- scan restarted ----");
    assert_eq!(h.assets.open_ports("10.0.0.5"), vec![22, 443]);
    assert_eq!(h.assets.updates().len(), 2);
}

#[tokio::test]
async fn test_transport_failure_fails_job_but_later_hosts_still_run() {
    let h = harness();
    h.backend.fail_submit("10.0.0.1", Failure::Transport);
    h.backend
        .script_polls("10.0.0.2", vec![Poll::Completed(vec![80])]);

    let target = ScanTarget::multi("lab", ["10.0.0.1", "10.0.0.2"], ScanOptions::default());
    h.orchestrator.register_target(target).unwrap();
    h.orchestrator.start_scan(&ctx(), "lab").unwrap();

    assert_eq!(h.orchestrator.wait_for_scan("lab").await, Some(JobStatus::Failed));
    assert!(h.backend.calls().contains(&Call::Submit("10.0.0.2".to_string())));
    assert_eq!(h.assets.open_ports("10.0.0.2"), vec![80]);
}

#[tokio::test]
async fn test_backend_reported_host_failure_does_not_fail_job() {
    let h = harness();
    h.backend
        .script_polls("10.0.0.1", vec![Poll::Failed("host unreachable")]);
    h.backend.fail_submit("10.0.0.3", Failure::Backend);
    h.backend
        .script_polls("10.0.0.2", vec![Poll::Completed(vec![22])]);

    let target = ScanTarget::multi(
        "lab",
        ["10.0.0.1", "10.0.0.2", "10.0.0.3"],
        ScanOptions::default(),
    );
    h.orchestrator.register_target(target).unwrap();
    h.orchestrator.start_scan(&ctx(), "lab").unwrap();

    assert_eq!(h.orchestrator.wait_for_scan("lab").await, Some(JobStatus::Completed));
    let log = messages(&h, "lab");
    assert!(log.contains(&"Scan failed for 10.0.0.1: host unreachable".to_string()));
    assert!(log.iter().any(|m| m.starts_with("Failed to start scan for 10.0.0.3")));
    assert_eq!(h.assets.updates().len(), 1);
}

#[tokio::test]
async fn test_transport_failure_while_polling_fails_job() {
    let h = harness();
    h.backend
        .script_polls("10.0.0.5", vec![Poll::Running, Poll::Transport]);
    h.orchestrator.register_target(single("10.0.0.5")).unwrap();
    h.orchestrator.start_scan(&ctx(), "10.0.0.5").unwrap();

    assert_eq!(h.orchestrator.wait_for_scan("10.0.0.5").await, Some(JobStatus::Failed));
    assert_eq!(h.backend.count(|c| matches!(c, Call::Status(_))), 2);
}

#[tokio::test]
async fn test_rejected_status_poll_ends_host_without_failing_job() {
    let h = harness();
    h.backend
        .script_polls("10.0.0.5", vec![Poll::Rejected("scan not found")]);
    h.orchestrator.register_target(single("10.0.0.5")).unwrap();
    h.orchestrator.start_scan(&ctx(), "10.0.0.5").unwrap();

    assert_eq!(h.orchestrator.wait_for_scan("10.0.0.5").await, Some(JobStatus::Completed));
    assert!(messages(&h, "10.0.0.5")
        .iter()
        .any(|m| m.contains("scan not found")));
}

#[tokio::test]
async fn test_completed_scan_without_hosts_emits_no_asset_update() {
    let h = harness();
    h.backend
        .script_polls("10.0.0.9", vec![Poll::CompletedEmpty]);
    h.orchestrator.register_target(single("10.0.0.9")).unwrap();
    h.orchestrator.start_scan(&ctx(), "10.0.0.9").unwrap();

    assert_eq!(h.orchestrator.wait_for_scan("10.0.0.9").await, Some(JobStatus::Completed));
    assert!(h.assets.updates().is_empty());
    assert!(messages(&h, "10.0.0.9")
        .iter()
        .any(|m| m.contains("no host results")));
}

#[tokio::test]
async fn test_options_editable_only_while_idle() {
    let h = harness();
    h.orchestrator.register_target(single("10.0.0.5")).unwrap();

    let mut options = ScanOptions::default();
    options.ports = "22,80,443".to_string();
    h.orchestrator.update_options("10.0.0.5", options.clone()).unwrap();
    assert_eq!(
        h.orchestrator.scans().target("10.0.0.5").unwrap().options.ports,
        "22,80,443"
    );

    h.orchestrator.start_scan(&ctx(), "10.0.0.5").unwrap();
    let err = h.orchestrator.update_options("10.0.0.5", options).unwrap_err();
    assert!(err.is_precondition());
    h.orchestrator.cancel_scan("10.0.0.5");
}

#[tokio::test]
async fn test_register_requires_a_host() {
    let h = harness();
    let err = h
        .orchestrator
        .register_target(ScanTarget::single("empty", "", ScanOptions::default()))
        .unwrap_err();
    assert!(matches!(err, ScanError::InvalidInput(_)));

    let err = h.orchestrator.start_scan(&ctx(), "missing").unwrap_err();
    assert!(matches!(err, ScanError::NotFound(_)));
}

#[tokio::test]
async fn test_unlisted_backend_status_keeps_polling() {
    let h = harness();
    h.backend.script_polls(
        "10.0.0.5",
        vec![Poll::Other("pending"), Poll::Other("starting"), Poll::Completed(vec![21])],
    );
    h.orchestrator.register_target(single("10.0.0.5")).unwrap();
    h.orchestrator.start_scan(&ctx(), "10.0.0.5").unwrap();

    assert_eq!(h.orchestrator.wait_for_scan("10.0.0.5").await, Some(JobStatus::Completed));
    assert_eq!(h.backend.count(|c| matches!(c, Call::Status(_))), 3);
    assert_eq!(h.assets.open_ports("10.0.0.5"), vec![21]);

    let log = messages(&h, "10.0.0.5");
    let still_running = log
        .iter()
        .filter(|m| m.as_str() == "Scan still running for 10.0.0.5...")
        .count();
    assert_eq!(still_running, 2);
    assert!(!log.iter().any(|m| m.starts_with("Status check failed")));
}

#[tokio::test]
async fn test_restart_right_after_cancel_stays_active() {
    let h = harness();
    h.orchestrator.register_target(single("10.0.0.5")).unwrap();

    h.orchestrator.start_scan(&ctx(), "10.0.0.5").unwrap();
    assert!(h.orchestrator.cancel_scan("10.0.0.5"));
    assert_eq!(h.orchestrator.start_scan(&ctx(), "10.0.0.5").unwrap(), StartOutcome::Started);

    assert!(h.orchestrator.scans().is_polling("10.0.0.5"));
    let waited = tokio::time::timeout(
        Duration::from_millis(60),
        h.orchestrator.wait_for_scan("10.0.0.5"),
    )
    .await;
    assert!(waited.is_err(), "wait returned while the restarted job was still polling");

    assert!(h.orchestrator.cancel_scan("10.0.0.5"));
    assert_eq!(h.orchestrator.wait_for_scan("10.0.0.5").await, Some(JobStatus::Running));
}
