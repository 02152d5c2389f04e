use crate::config::{OutputFormat, ReportingConfig};
use crate::correlator::CorrelationReport;
use crate::types::{Severity, Vulnerability};
use crate::{Result, ScanError};
use log::{debug, info};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;

pub struct ReportGenerator {
    config: ReportingConfig,
}

impl ReportGenerator {
    pub fn new(config: ReportingConfig) -> Self {
        Self { config }
    }

    pub fn output_dir(&self) -> &Path {
        &self.config.output_dir
    }

    /// Write `report` once per configured format. Returns the files written.
    pub async fn generate_report(&self, report: &CorrelationReport) -> Result<Vec<PathBuf>> {
        let mut generated_files = Vec::new();

        fs::create_dir_all(&self.config.output_dir)
            .await
            .map_err(|e| ScanError::Reporting(format!("Failed to create output directory: {}", e)))?;

        let timestamp = report.generated_at.format("%Y%m%d_%H%M%S");
        let base_filename = format!("rscan_{}_{}", sanitize(&report.target_id), timestamp);

        for format in &self.config.formats {
            let file_path = match format {
                OutputFormat::Json => {
                    let path = self.config.output_dir.join(format!("{}.json", base_filename));
                    self.generate_json_report(report, &path).await?;
                    path
                }
                OutputFormat::Csv => {
                    let path = self.config.output_dir.join(format!("{}.csv", base_filename));
                    self.generate_csv_report(&report.vulnerabilities, &path).await?;
                    path
                }
            };

            generated_files.push(file_path);
        }

        info!("Generated {} report files", generated_files.len());
        Ok(generated_files)
    }

    async fn generate_json_report(&self, report: &CorrelationReport, path: &Path) -> Result<()> {
        debug!("Generating JSON report: {}", path.display());

        let document = ReportDocument {
            summary: ReportSummary::from_report(report),
            report,
        };
        let json_data = serde_json::to_string_pretty(&document)?;

        fs::write(path, json_data)
            .await
            .map_err(|e| ScanError::Reporting(format!("Failed to write JSON report: {}", e)))?;

        Ok(())
    }

    async fn generate_csv_report(&self, vulnerabilities: &[Vulnerability], path: &Path) -> Result<()> {
        debug!("Generating CSV report: {}", path.display());

        let csv_content = vulnerabilities_to_csv(vulnerabilities)?;
        fs::write(path, csv_content)
            .await
            .map_err(|e| ScanError::Reporting(format!("Failed to write CSV report: {}", e)))?;

        Ok(())
    }
}

/// One row per vulnerability, header first.
pub fn vulnerabilities_to_csv(vulnerabilities: &[Vulnerability]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record([
        "CVE",
        "Title",
        "Severity",
        "CVSS",
        "Service",
        "Port",
        "Exploit Module",
        "Shell Type",
    ])?;

    for vuln in vulnerabilities {
        let shell_type = vuln
            .exploit_metadata
            .as_ref()
            .and_then(|m| m.shell_type.clone())
            .unwrap_or_default();
        writer.write_record([
            vuln.cve_id.as_str(),
            vuln.title.as_str(),
            &vuln.severity.to_string(),
            &format!("{:.1}", vuln.cvss_score),
            vuln.affected_service.as_str(),
            &vuln.affected_port.to_string(),
            vuln.exploit_module_ref.as_str(),
            shell_type.as_str(),
        ])?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| ScanError::Reporting(format!("Failed to flush CSV writer: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| ScanError::Reporting(format!("CSV output is not UTF-8: {}", e)))
}

#[derive(Serialize)]
struct ReportDocument<'a> {
    summary: ReportSummary,
    report: &'a CorrelationReport,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    pub host: String,
    pub services_identified: usize,
    pub cves_examined: usize,
    pub exploitable: usize,
    pub by_severity: BTreeMap<Severity, usize>,
    pub highest_cvss: Option<f32>,
}

impl ReportSummary {
    pub fn from_report(report: &CorrelationReport) -> Self {
        let mut by_severity = BTreeMap::new();
        for vuln in &report.vulnerabilities {
            *by_severity.entry(vuln.severity).or_insert(0) += 1;
        }

        Self {
            host: report.host.clone(),
            services_identified: report.services.len(),
            cves_examined: report.cves_examined,
            exploitable: report.vulnerabilities.len(),
            by_severity,
            highest_cvss: report
                .vulnerabilities
                .iter()
                .map(|v| v.cvss_score)
                .fold(None, |max: Option<f32>, s| Some(max.map_or(s, |m| m.max(s)))),
        }
    }
}

fn sanitize(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
