use crate::{Result, ScanError};

/// Host argument helpers
pub mod network {
    use super::*;
    use std::net::IpAddr;

    /// Check if an IP address is valid for scanning
    pub fn is_valid_scan_target(ip: &IpAddr) -> bool {
        match ip {
            IpAddr::V4(ipv4) => !ipv4.is_unspecified() && !ipv4.is_broadcast() && !ipv4.is_multicast(),
            IpAddr::V6(ipv6) => !ipv6.is_unspecified() && !ipv6.is_multicast(),
        }
    }

    /// Accept an IP literal or a DNS-style hostname.
    pub fn validate_host(host: &str) -> Result<()> {
        let host = host.trim();
        if host.is_empty() {
            return Err(ScanError::InvalidInput("host must not be empty".to_string()));
        }

        if let Ok(ip) = host.parse::<IpAddr>() {
            if is_valid_scan_target(&ip) {
                return Ok(());
            }
            return Err(ScanError::InvalidInput(format!("{} is not a scannable address", host)));
        }

        let valid_label = |label: &str| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        };
        if host.len() <= 253 && host.split('.').all(valid_label) {
            Ok(())
        } else {
            Err(ScanError::InvalidInput(format!("{} is neither an IP address nor a hostname", host)))
        }
    }

    /// Split a comma/whitespace separated host list, dropping blanks and duplicates.
    pub fn split_hosts(value: &str) -> Vec<String> {
        let mut hosts: Vec<String> = Vec::new();
        for host in value.split(|c: char| c == ',' || c.is_whitespace()) {
            let host = host.trim();
            if !host.is_empty() && !hosts.iter().any(|h| h == host) {
                hosts.push(host.to_string());
            }
        }
        hosts
    }
}

/// Port expression helpers
pub mod ports {
    use super::*;

    /// Expand `22,80,8000-8010` into individual ports, in order of appearance.
    pub fn parse_list(expr: &str) -> Result<Vec<u16>> {
        let mut ports = Vec::new();
        for part in expr.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            match part.split_once('-') {
                Some((start, end)) => {
                    let start = parse_port(start)?;
                    let end = parse_port(end)?;
                    if start > end {
                        return Err(ScanError::InvalidInput(format!("port range {} is reversed", part)));
                    }
                    ports.extend(start..=end);
                }
                None => ports.push(parse_port(part)?),
            }
        }

        if ports.is_empty() {
            return Err(ScanError::InvalidInput(format!("no ports in '{}'", expr)));
        }
        Ok(ports)
    }

    fn parse_port(value: &str) -> Result<u16> {
        match value.trim().parse::<u16>() {
            Ok(0) | Err(_) => Err(ScanError::InvalidInput(format!("invalid port '{}'", value.trim()))),
            Ok(port) => Ok(port),
        }
    }

    /// Number of version-detection calls `port_count` ports will take.
    pub fn batch_count(port_count: usize, batch_size: usize) -> usize {
        let batch_size = batch_size.max(1);
        (port_count + batch_size - 1) / batch_size
    }
}

/// Progress bar utilities
pub mod progress {
    use indicatif::{ProgressBar, ProgressStyle};
    use std::time::Duration;

    pub fn create_spinner(message: &str) -> ProgressBar {
        let pb = ProgressBar::new_spinner();

        let style = ProgressStyle::default_spinner()
            .template("  {spinner:.cyan} {msg} {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        pb.set_style(style);

        pb.set_message(message.to_string());
        pb.enable_steady_tick(Duration::from_millis(120));
        pb
    }

    /// Spinner that renders nothing, for quiet mode.
    pub fn hidden() -> ProgressBar {
        ProgressBar::hidden()
    }
}

/// Time and formatting utilities
pub mod time {
    use chrono::{DateTime, Utc};
    use std::time::Duration;

    pub fn now_utc() -> DateTime<Utc> {
        Utc::now()
    }

    /// Format duration as human readable string
    pub fn format_duration(duration: Duration) -> String {
        let secs = duration.as_secs();
        let hours = secs / 3600;
        let minutes = (secs % 3600) / 60;
        let seconds = secs % 60;

        if hours > 0 {
            format!("{}h {}m {}s", hours, minutes, seconds)
        } else if minutes > 0 {
            format!("{}m {}s", minutes, seconds)
        } else if secs > 0 {
            format!("{}s", seconds)
        } else {
            format!("{}ms", duration.as_millis())
        }
    }
}
