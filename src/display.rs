use crate::activity::{LogEntry, LogLevel};
use crate::assets::Asset;
use crate::types::{JobStatus, ScanJob, Severity, ShellSession, SessionStatus, Vulnerability};
use colored::*;

/// Colored terminal output for jobs, vulnerabilities and shell sessions
pub struct DisplayManager {
    use_colors: bool,
    quiet_mode: bool,
}

impl DisplayManager {
    pub fn new() -> Self {
        Self::with_quiet(false)
    }

    pub fn with_quiet(quiet: bool) -> Self {
        let use_colors = std::env::var("NO_COLOR").is_err()
            && std::env::var("TERM").map_or(true, |term| term != "dumb");

        Self {
            use_colors,
            quiet_mode: quiet,
        }
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet_mode
    }

    /// Print one exploit-backed vulnerability
    pub fn print_vulnerability(&self, vuln: &Vulnerability) {
        if self.quiet_mode {
            return;
        }

        let severity_color = self.get_severity_color(vuln.severity);

        if self.use_colors {
            println!(
                "  {} {} {}",
                format!("[{}]", vuln.severity.to_string().to_uppercase())
                    .color(severity_color)
                    .bold(),
                vuln.cve_id.bright_white().bold(),
                format!("({} on port {})", vuln.affected_service, vuln.affected_port).bright_black()
            );

            if vuln.title != vuln.cve_id {
                println!("    └─ {}", vuln.title.white());
            }
            if !vuln.description.is_empty() {
                println!("    └─ {}", vuln.description.truncate_with_ellipsis(100).white());
            }
            println!(
                "    └─ CVSS {} | {} {}",
                format!("{:.1}", vuln.cvss_score)
                    .color(self.get_cvss_color(vuln.cvss_score))
                    .bold(),
                "Exploit".blue().bold(),
                vuln.exploit_module_ref.cyan()
            );
        } else {
            println!(
                "  [{}] {} ({} on port {})",
                vuln.severity.to_string().to_uppercase(),
                vuln.cve_id,
                vuln.affected_service,
                vuln.affected_port
            );
            if vuln.title != vuln.cve_id {
                println!("    Title: {}", vuln.title);
            }
            if !vuln.description.is_empty() {
                println!("    Description: {}", vuln.description.truncate_with_ellipsis(100));
            }
            println!("    CVSS: {:.1}", vuln.cvss_score);
            println!("    Exploit: {}", vuln.exploit_module_ref);
        }
        println!();
    }

    /// Severity breakdown of a vulnerability list
    pub fn print_severity_summary(&self, host: &str, vulnerabilities: &[Vulnerability]) {
        if self.quiet_mode {
            return;
        }

        let count = |severity: Severity| vulnerabilities.iter().filter(|v| v.severity == severity).count();
        let counts = [
            ("Critical", count(Severity::Critical), Color::BrightRed),
            ("High", count(Severity::High), Color::Red),
            ("Medium", count(Severity::Medium), Color::Yellow),
            ("Low", count(Severity::Low), Color::Green),
        ];

        if self.use_colors {
            println!();
            self.print_section_header("EXPLOITABLE VULNERABILITIES");
            println!("  {}: {}", "Host".bright_white().bold(), host.cyan().bold());

            if vulnerabilities.is_empty() {
                println!("  {}", "No exploitable vulnerabilities found".bright_green().bold());
                println!();
                return;
            }

            println!("  ┌──────────┬───────┐");
            println!(
                "  │ {} │ {} │",
                "Severity".bright_white().bold(),
                "Count".bright_white().bold()
            );
            println!("  ├──────────┼───────┤");
            for (name, count, color) in counts.iter().filter(|(_, c, _)| *c > 0) {
                println!(
                    "  │ {} │ {:>5} │",
                    format!("{:<8}", name).color(*color).bold(),
                    count.to_string().color(*color).bold()
                );
            }
            println!("  └──────────┴───────┘");
        } else {
            println!("\n=== EXPLOITABLE VULNERABILITIES ===");
            println!("Host: {}", host);
            if vulnerabilities.is_empty() {
                println!("No exploitable vulnerabilities found");
                println!();
                return;
            }
            for (name, count, _) in &counts {
                println!("{}: {}", name, count);
            }
        }
        println!();
    }

    /// Replay a job log with level-coded markers
    pub fn print_log(&self, entries: &[LogEntry]) {
        if self.quiet_mode {
            return;
        }

        for entry in entries {
            let line = entry.render();
            if !self.use_colors {
                println!("  {}", line);
                continue;
            }
            match entry.level {
                LogLevel::Info => println!("  {}", line.white()),
                LogLevel::Success => println!("  {}", line.green()),
                LogLevel::Warning => println!("  {}", line.yellow()),
                LogLevel::Error => println!("  {}", line.red()),
            }
        }
    }

    pub fn print_job(&self, job: &ScanJob) {
        if self.quiet_mode {
            return;
        }

        let scan_id = job.backend_scan_id.as_deref().unwrap_or("-");
        if self.use_colors {
            let status = job.status.to_string();
            let status = match job.status {
                JobStatus::Completed => status.bright_green().bold(),
                JobStatus::Failed => status.bright_red().bold(),
                JobStatus::Running => status.yellow().bold(),
                JobStatus::Idle => status.bright_black(),
            };
            println!(
                "  {} {} {} {}",
                "•".bright_blue().bold(),
                job.target_id.bright_white().bold(),
                status,
                format!("(backend scan {})", scan_id).bright_black()
            );
        } else {
            println!("  • {} {} (backend scan {})", job.target_id, job.status, scan_id);
        }
    }

    /// Assets known after a scan, one line per host
    pub fn print_assets(&self, assets: &[Asset]) {
        if self.quiet_mode {
            return;
        }

        if assets.is_empty() {
            self.print_warning("No hosts reported by the backend");
            return;
        }

        for asset in assets {
            let name = asset
                .hostname
                .as_ref()
                .map(|h| format!(" ({})", h))
                .unwrap_or_default();
            let ports = if asset.open_ports.is_empty() {
                "no open ports".to_string()
            } else {
                format!("{:?}", asset.open_ports)
            };

            if self.use_colors {
                println!(
                    "  {} {}{} {} {}",
                    "•".bright_green().bold(),
                    asset.host.cyan().bold(),
                    name.bright_black(),
                    asset.os_name.white(),
                    ports.yellow()
                );
            } else {
                println!("  • {}{} {} {}", asset.host, name, asset.os_name, ports);
            }
        }
    }

    pub fn print_session(&self, session: &ShellSession) {
        if self.quiet_mode {
            return;
        }

        let status = session.status.to_string();
        if self.use_colors {
            let status = match session.status {
                SessionStatus::Connected => status.bright_green().bold(),
                SessionStatus::Connecting => status.yellow().bold(),
                SessionStatus::Failed => status.bright_red().bold(),
                SessionStatus::Closed => status.bright_black(),
            };
            println!(
                "  {} {} {}:{} {} {}",
                "»".bright_magenta().bold(),
                session.shell_type.to_string().magenta(),
                session.target_ip.cyan().bold(),
                session.target_port.to_string().yellow(),
                status,
                format!("({} command(s))", session.commands_executed).bright_black()
            );
        } else {
            println!(
                "  » {} {}:{} {} ({} command(s))",
                session.shell_type, session.target_ip, session.target_port, status, session.commands_executed
            );
        }
    }

    /// Echo a shell command and what came back
    pub fn print_shell_exchange(&self, command: &str, output: &str) {
        if self.quiet_mode {
            return;
        }

        if self.use_colors {
            println!("  {} {}", "$".bright_green().bold(), command.bright_white().bold());
            for line in output.lines() {
                println!("    {}", line.white());
            }
        } else {
            println!("  $ {}", command);
            for line in output.lines() {
                println!("    {}", line);
            }
        }
    }

    pub fn print_section_header(&self, title: &str) {
        if self.quiet_mode {
            return;
        }

        if self.use_colors {
            println!("{}", title.bright_cyan().bold());
            println!("{}", "─".repeat(title.chars().count()).bright_cyan());
        } else {
            println!("{}", title);
            println!("{}", "=".repeat(title.len()));
        }
    }

    pub fn print_success(&self, message: &str) {
        if self.quiet_mode {
            return;
        }

        if self.use_colors {
            println!("  {} {}", "✓".bright_green().bold(), message.green());
        } else {
            println!("[✓] {}", message);
        }
    }

    pub fn print_warning(&self, message: &str) {
        if self.quiet_mode {
            return;
        }

        if self.use_colors {
            println!("  {} {}", "!".bright_yellow().bold(), message.yellow());
        } else {
            println!("[!] {}", message);
        }
    }

    /// Errors are printed even in quiet mode
    pub fn print_error(&self, message: &str) {
        if self.use_colors {
            eprintln!("  {} {}", "✗".bright_red().bold(), message.red().bold());
        } else {
            eprintln!("[✗] {}", message);
        }
    }

    pub fn print_info(&self, message: &str) {
        if self.quiet_mode {
            return;
        }

        if self.use_colors {
            println!("  {} {}", "i".bright_blue().bold(), message.blue());
        } else {
            println!("[i] {}", message);
        }
    }

    fn get_severity_color(&self, severity: Severity) -> Color {
        match severity {
            Severity::Critical => Color::BrightRed,
            Severity::High => Color::Red,
            Severity::Medium => Color::Yellow,
            Severity::Low => Color::Green,
        }
    }

    fn get_cvss_color(&self, cvss: f32) -> Color {
        match cvss {
            score if score >= 9.0 => Color::BrightRed,
            score if score >= 7.0 => Color::Red,
            score if score >= 4.0 => Color::Yellow,
            _ => Color::Green,
        }
    }

    pub fn print_banner(&self, title: &str, subtitle: Option<&str>) {
        if self.quiet_mode {
            return;
        }

        let width = title.chars().count();
        if self.use_colors {
            println!();
            println!("  {}", "┌─".bright_cyan().to_string() + &"─".repeat(width + 2) + "─┐");
            println!("  {} {} {}", "│".bright_cyan(), title.bright_white().bold(), "│".bright_cyan());
            if let Some(sub) = subtitle {
                println!(
                    "  {} {} {}",
                    "│".bright_cyan(),
                    format!("{:^width$}", sub, width = width).bright_black(),
                    "│".bright_cyan()
                );
            }
            println!("  {}", "└─".bright_cyan().to_string() + &"─".repeat(width + 2) + "─┘");
            println!();
        } else {
            let border = "=".repeat(width + 4);
            println!("\n{}", border);
            println!("  {}  ", title);
            if let Some(sub) = subtitle {
                println!("  {}  ", sub);
            }
            println!("{}\n", border);
        }
    }
}

impl Default for DisplayManager {
    fn default() -> Self {
        Self::new()
    }
}

trait StringExt {
    fn truncate_with_ellipsis(&self, max_len: usize) -> String;
}

impl StringExt for str {
    fn truncate_with_ellipsis(&self, max_len: usize) -> String {
        if self.chars().count() <= max_len {
            self.to_string()
        } else {
            let kept: String = self.chars().take(max_len.saturating_sub(3)).collect();
            format!("{}...", kept)
        }
    }
}
