use clap::Parser;
use env_logger::Env;
use futures::future::join_all;
use rscan_orchestrator::{
    backend::AuthContext,
    cli::{Cli, Commands, ReportFormat, ScanArgs, ShellKind},
    config::Config,
    display::DisplayManager,
    reporting::ReportGenerator,
    shell::{ExploitTarget, PayloadSpec},
    types::{AssetUpdate, JobStatus, ScanTarget, SessionStatus},
    utils::{network, ports, progress, time},
    Orchestrator, Result, ScanError,
};
use std::process;
use std::time::Instant;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };

    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_timestamp_secs()
        .init();

    let display = DisplayManager::with_quiet(cli.quiet);

    if !cli.quiet {
        display.print_banner("RSCAN ORCHESTRATOR", Some("Authorized Testing Only"));
        display.print_warning("Ensure you have proper permission before scanning any networks.");
        println!();
    }

    let mut config = if let Some(config_path) = &cli.config {
        match Config::load_from_file(&config_path.to_string_lossy()) {
            Ok(config) => {
                display.print_success(&format!("Loaded configuration from {}", config_path.display()));
                config
            }
            Err(e) => {
                display.print_warning(&format!("Failed to load configuration: {}, using defaults", e));
                Config::default()
            }
        }
    } else {
        Config::default()
    };

    // Apply CLI overrides to config
    if let Some(url) = &cli.backend_url {
        config.backend.base_url = url.clone();
    }
    if let Some(interval) = cli.poll_interval {
        config.scan.poll_interval_ms = interval;
    }
    if let Some(output) = &cli.output {
        config.reporting.output_dir = output.clone();
    }

    let ctx = AuthContext::from_option(cli.token.clone());
    if !ctx.is_authenticated() {
        display.print_warning("No backend token given (--token or RSCAN_TOKEN); backend calls will be refused.");
    }

    let orchestrator = match Orchestrator::with_http_backend(config) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            display.print_error(&format!("Failed to initialise backend client: {}", e));
            process::exit(1);
        }
    };

    let start_time = Instant::now();

    let result = match &cli.command {
        Commands::Scan { hosts, single_job, scan } => {
            execute_scan(&orchestrator, &display, &ctx, hosts, *single_job, scan).await
        }
        Commands::Assess {
            host,
            open_ports,
            format,
            scan,
        } => execute_assess(&orchestrator, &display, &ctx, host, open_ports.as_deref(), format, scan).await,
        Commands::Shell {
            host,
            port,
            cve,
            service,
            shell_type,
            username,
            commands,
        } => {
            let request = ShellRequest {
                host,
                port: *port,
                cve: cve.as_deref(),
                service: service.as_deref(),
                shell_type: *shell_type,
                username: username.as_deref(),
                commands,
            };
            execute_shell(&orchestrator, &display, &ctx, request).await
        }
    };

    let elapsed = start_time.elapsed();

    match result {
        Ok(_) => {
            display.print_success(&format!("Finished in {}", time::format_duration(elapsed)));
        }
        Err(e) => {
            display.print_error(&format!("Failed: {}", e));
            process::exit(1);
        }
    }
}

fn spinner(display: &DisplayManager, message: &str) -> indicatif::ProgressBar {
    if display.is_quiet() {
        progress::hidden()
    } else {
        progress::create_spinner(message)
    }
}

/// Register and start one job per host (or one for all), then wait for every job.
async fn run_scans(
    orchestrator: &Orchestrator,
    display: &DisplayManager,
    ctx: &AuthContext,
    targets: Vec<ScanTarget>,
) -> Result<Vec<(String, JobStatus)>> {
    let mut ids = Vec::with_capacity(targets.len());
    for target in targets {
        let id = target.id.clone();
        orchestrator.register_target(target)?;
        orchestrator.start_scan(ctx, &id)?;
        ids.push(id);
    }

    let pb = spinner(display, &format!("Scanning {} target(s)", ids.len()));
    let statuses = join_all(ids.iter().map(|id| orchestrator.wait_for_scan(id))).await;
    pb.finish_and_clear();

    let mut results = Vec::with_capacity(ids.len());
    for (id, status) in ids.into_iter().zip(statuses) {
        if let Some(job) = orchestrator.job(&id) {
            display.print_job(&job);
        }
        if let Some(log) = orchestrator.scan_log(&id) {
            display.print_log(&log.entries());
        }
        results.push((id, status.unwrap_or(JobStatus::Idle)));
    }
    Ok(results)
}

async fn execute_scan(
    orchestrator: &Orchestrator,
    display: &DisplayManager,
    ctx: &AuthContext,
    hosts: &[String],
    single_job: bool,
    scan: &ScanArgs,
) -> Result<()> {
    display.print_section_header("PORT SCAN");

    let hosts: Vec<String> = hosts.iter().flat_map(|h| network::split_hosts(h)).collect();
    for host in &hosts {
        network::validate_host(host)?;
    }

    let options = scan.apply(orchestrator.default_options());
    let targets = if single_job {
        vec![ScanTarget::multi("scan-1", hosts.clone(), options)]
    } else {
        hosts
            .iter()
            .map(|h| ScanTarget::single(h.clone(), h.clone(), options.clone()))
            .collect()
    };

    let results = run_scans(orchestrator, display, ctx, targets).await?;

    println!();
    display.print_section_header("ASSETS");
    let assets: Vec<_> = hosts
        .iter()
        .filter_map(|h| orchestrator.assets().asset(h))
        .collect();
    display.print_assets(&assets);

    let failed = results.iter().filter(|(_, s)| *s == JobStatus::Failed).count();
    if failed > 0 {
        display.print_warning(&format!("{} of {} scan job(s) failed", failed, results.len()));
    }
    Ok(())
}

async fn execute_assess(
    orchestrator: &Orchestrator,
    display: &DisplayManager,
    ctx: &AuthContext,
    host: &str,
    open_ports: Option<&str>,
    formats: &[ReportFormat],
    scan: &ScanArgs,
) -> Result<()> {
    network::validate_host(host)?;

    let options = scan.apply(orchestrator.default_options());
    orchestrator.register_target(ScanTarget::single(host, host, options))?;

    match open_ports {
        Some(expr) => {
            let known = ports::parse_list(expr)?;
            display.print_info(&format!("Using {} known open port(s), skipping the port scan", known.len()));
            orchestrator.assets().ingest(AssetUpdate {
                host: host.to_string(),
                os_name: "Unknown".to_string(),
                open_ports: known,
                hostname: None,
                vendor: None,
            });
        }
        None => {
            display.print_section_header("PORT SCAN");
            orchestrator.start_scan(ctx, host)?;
            let pb = spinner(display, &format!("Scanning {}", host));
            let status = orchestrator.wait_for_scan(host).await;
            pb.finish_and_clear();
            if let Some(log) = orchestrator.scan_log(host) {
                display.print_log(&log.entries());
            }
            if status == Some(JobStatus::Failed) {
                display.print_warning("Port scan failed; correlating whatever ports are known");
            }
        }
    }

    println!();
    display.print_section_header("VULNERABILITY CORRELATION");
    let batches = ports::batch_count(
        orchestrator.assets().open_ports(host).len(),
        orchestrator.config().batch_size(),
    );
    let pb = spinner(display, &format!("Correlating services on {} ({} batch(es))", host, batches));
    let outcome = orchestrator.correlate(ctx, host).await;
    pb.finish_and_clear();

    if let Some(log) = orchestrator.correlation_log(host) {
        display.print_log(&log.entries());
    }
    let vulnerabilities = outcome?;

    println!();
    for vuln in &vulnerabilities {
        display.print_vulnerability(vuln);
    }
    display.print_severity_summary(host, &vulnerabilities);

    let Some(report) = orchestrator.report(host) else {
        return Ok(());
    };

    let mut reporting = orchestrator.config().reporting.clone();
    if !formats.is_empty() {
        reporting.formats = formats.iter().map(|f| (*f).into()).collect();
    }
    let files = ReportGenerator::new(reporting).generate_report(&report).await?;
    for file in files {
        display.print_success(&format!("Report written to {}", file.display()));
    }
    Ok(())
}

struct ShellRequest<'a> {
    host: &'a str,
    port: u16,
    cve: Option<&'a str>,
    service: Option<&'a str>,
    shell_type: ShellKind,
    username: Option<&'a str>,
    commands: &'a [String],
}

async fn execute_shell(
    orchestrator: &Orchestrator,
    display: &DisplayManager,
    ctx: &AuthContext,
    request: ShellRequest<'_>,
) -> Result<()> {
    display.print_section_header("SHELL SESSION");
    network::validate_host(request.host)?;

    let mut target = ExploitTarget::new(request.host, request.port);
    if let Some(cve) = request.cve {
        target = target.with_cve(cve);
    }
    if let Some(service) = request.service {
        target = target.with_service(service);
    }
    let payload = PayloadSpec {
        shell_type: request.shell_type.into(),
        username: request.username.map(str::to_string),
        ..PayloadSpec::default()
    };

    let log = orchestrator.shells().log().clone();
    let offset = log.len();

    let pb = spinner(display, &format!("Opening shell on {}:{}", request.host, request.port));
    let opened = orchestrator.open_shell(ctx, target, payload).await;
    pb.finish_and_clear();
    display.print_log(&log.since(offset));
    let session_id = opened?;

    let Some(session) = orchestrator.session(&session_id) else {
        return Err(ScanError::NotFound(format!("shell session {}", session_id)));
    };
    display.print_session(&session);
    if session.status != SessionStatus::Connected {
        return Err(ScanError::SessionInactive {
            id: session.id,
            status: session.status,
        });
    }

    let defaults = ["whoami".to_string()];
    let commands = if request.commands.is_empty() {
        &defaults[..]
    } else {
        request.commands
    };

    println!();
    for command in commands {
        match orchestrator.send(ctx, &session_id, command).await {
            Ok(output) => display.print_shell_exchange(command, &output),
            Err(e) => {
                display.print_error(&format!("{}: {}", command, e));
                break;
            }
        }
    }

    println!();
    let closed = orchestrator.close(&session_id)?;
    display.print_session(&closed);
    Ok(())
}
