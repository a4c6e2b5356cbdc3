//! Unified analysis report and its text/JSON renderings.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use guardpkg_core::{
    DependencyRiskEntry, FileFinding, PackageMetadata, PackageRef, RiskScore, SecurityMetrics,
    Severity, SuspiciousPattern, VulnerabilityReport,
};
use serde::Serialize;

use crate::dependency_walker::kind_label;

/// Scores at or above this need no recommendations.
const RECOMMENDATION_SCORE_CEILING: u8 = 80;
const RULE_WIDTH: usize = 50;

#[derive(Debug, Clone, Serialize)]
pub struct BasicInfo {
    pub description: Option<String>,
    pub author: Option<String>,
    pub license: Option<String>,
    pub maintainers: Vec<String>,
    pub latest: String,
    pub published: Option<DateTime<Utc>>,
    pub monthly_downloads: u64,
}

impl BasicInfo {
    pub fn from_metadata(metadata: &PackageMetadata, monthly_downloads: u64) -> Self {
        Self {
            description: metadata.description.clone(),
            author: metadata.author.clone(),
            license: metadata.license.clone(),
            maintainers: metadata.maintainers.clone(),
            latest: metadata.latest.clone(),
            published: metadata.published,
            monthly_downloads,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Recommendation {
    pub title: String,
    pub description: String,
}

impl Recommendation {
    fn new(title: &str, description: impl Into<String>) -> Self {
        Self {
            title: title.to_string(),
            description: description.into(),
        }
    }
}

/// A direct dependency that resolves below its registry `latest`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutdatedDependency {
    pub name: String,
    pub current: String,
    pub latest: String,
}

/// Everything known about one analyzed package.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub package: PackageRef,
    pub info: BasicInfo,
    pub metrics: SecurityMetrics,
    pub publisher_trust: u8,
    pub vulnerabilities: VulnerabilityReport,
    pub file_findings: Vec<FileFinding>,
    pub suspicious_patterns: Vec<SuspiciousPattern>,
    pub dependencies: Vec<DependencyRiskEntry>,
    pub outdated_dependencies: Vec<OutdatedDependency>,
    pub score: RiskScore,
    pub risk_level: Severity,
    pub recommendations: Vec<Recommendation>,
    /// Auxiliary lookups that failed and were scored without.
    pub warnings: Vec<String>,
}

/// All file-level pattern matches in file order.
pub fn flatten_patterns(findings: &[FileFinding]) -> Vec<SuspiciousPattern> {
    findings
        .iter()
        .flat_map(|finding| finding.patterns.iter().cloned())
        .collect()
}

/// Direct dependencies whose resolved version is not the registry's `latest`.
pub fn outdated_dependencies(entries: &[DependencyRiskEntry]) -> Vec<OutdatedDependency> {
    entries
        .iter()
        .filter(|entry| entry.depth == 1)
        .filter_map(|entry| {
            let latest = entry.latest.as_deref().filter(|latest| !latest.is_empty())?;
            (entry.version != latest).then(|| OutdatedDependency {
                name: entry.name.clone(),
                current: entry.version.clone(),
                latest: latest.to_string(),
            })
        })
        .collect()
}

pub fn recommendations(
    score: &RiskScore,
    metrics: &SecurityMetrics,
    vulnerabilities: &VulnerabilityReport,
    findings: &[FileFinding],
) -> Vec<Recommendation> {
    if score.value >= RECOMMENDATION_SCORE_CEILING {
        return Vec::new();
    }

    let mut recs = Vec::new();
    if score.malware_detected {
        recs.push(Recommendation::new(
            "Known Malware",
            "Package or one of its dependencies matches a known malware fingerprint. Do not install it.",
        ));
    }
    let critical = vulnerabilities.bucket(Severity::Critical).len();
    if critical > 0 {
        recs.push(Recommendation::new(
            "Critical Vulnerabilities",
            format!(
                "{critical} critical security vulnerabilities detected. Strongly recommend finding an alternative package."
            ),
        ));
    }
    if metrics.has_suspicious_scripts {
        let names = metrics
            .suspicious_scripts
            .iter()
            .map(|script| script.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        recs.push(Recommendation::new(
            "Suspicious Scripts",
            format!("Package contains potentially dangerous npm scripts ({names}). Review them carefully."),
        ));
    }
    if !metrics.has_lock_file {
        recs.push(Recommendation::new(
            "Missing Lock File",
            "Package lacks a lock file. Dependencies may be unstable.",
        ));
    }
    let obfuscated = findings
        .iter()
        .filter(|finding| finding.obfuscated)
        .count();
    if obfuscated > 0 {
        recs.push(Recommendation::new(
            "Obfuscated Code",
            format!("{obfuscated} file(s) look obfuscated. Inspect them manually before trusting this package."),
        ));
    }
    recs
}

/// Bare score line for `--score-only`.
pub fn render_score(report: &AnalysisReport) -> String {
    report.score.value.to_string()
}

pub fn render_json(report: &AnalysisReport) -> serde_json::Result<String> {
    serde_json::to_string_pretty(report)
}

/// Renders the report for a terminal. `detailed` adds dependencies, metrics and files.
pub fn render_text(report: &AnalysisReport, detailed: bool) -> String {
    let mut lines = Vec::new();
    render_summary(report, &mut lines);
    render_security(report, &mut lines);
    if detailed {
        render_details(report, &mut lines);
    }
    render_recommendations(report, &mut lines);
    if !report.warnings.is_empty() {
        section(&mut lines, "Warnings");
        for warning in &report.warnings {
            lines.push(format!("- {warning}"));
        }
    }
    lines.join("\n")
}

fn section(lines: &mut Vec<String>, title: &str) {
    if !lines.is_empty() {
        lines.push(String::new());
    }
    lines.push(title.to_string());
    lines.push("-".repeat(RULE_WIDTH));
}

fn render_summary(report: &AnalysisReport, lines: &mut Vec<String>) {
    section(lines, "Package Analysis Summary");
    let info = &report.info;
    lines.push(format!("Package:        {}", report.package.name));
    lines.push(format!("Version:        {}", report.package.version));
    lines.push(format!(
        "Security Score: {}/100 ({} risk)",
        report.score.value,
        report.risk_level.label()
    ));
    lines.push(format!(
        "Author:         {}",
        info.author.as_deref().unwrap_or("Unknown")
    ));
    lines.push(format!(
        "License:        {}",
        info.license.as_deref().unwrap_or("Not specified")
    ));
    lines.push(format!("Downloads:      {} last month", info.monthly_downloads));
}

fn render_security(report: &AnalysisReport, lines: &mut Vec<String>) {
    section(lines, "Security Analysis");
    let vulns = &report.vulnerabilities;
    for severity in [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
    ] {
        lines.push(format!(
            "{:<9} {}",
            format!("{}:", bucket_title(severity)),
            vulns.bucket(severity).len()
        ));
    }
    lines.push(format!("Publisher trust: {}/100", report.publisher_trust));

    if !report.score.deductions.is_empty() {
        lines.push(String::new());
        lines.push("Deductions:".to_string());
        for deduction in &report.score.deductions {
            lines.push(format!("  -{:<3} {}", deduction.points, deduction.reason));
        }
    }
}

fn render_details(report: &AnalysisReport, lines: &mut Vec<String>) {
    section(lines, "Detailed Analysis");

    for severity in [Severity::Critical, Severity::High] {
        let bucket = report.vulnerabilities.bucket(severity);
        if bucket.is_empty() {
            continue;
        }
        lines.push(format!("{} Vulnerabilities:", bucket_title(severity)));
        for vulnerability in bucket {
            lines.push(format!(
                "- {}: {} [{}]",
                vulnerability.id,
                vulnerability.title,
                vulnerability.sources.join(", ")
            ));
        }
        lines.push(String::new());
    }

    lines.push("Dependencies:".to_string());
    if report.dependencies.is_empty() {
        lines.push("- none".to_string());
    }
    for entry in &report.dependencies {
        let score = entry
            .score
            .map_or_else(|| "n/a".to_string(), |score| score.to_string());
        let mut line = format!(
            "{}- {}@{} ({}, score {score})",
            "  ".repeat(entry.depth.saturating_sub(1)),
            entry.name,
            entry.version,
            kind_label(entry.kind),
        );
        if entry.malware_detected {
            line.push_str(" MALWARE");
        }
        if let Some(info) = &entry.missing_info {
            line.push_str(&format!(" [{info}]"));
        }
        lines.push(line);
    }
    let counts = &report.metrics.dependency_count;
    lines.push(format!(
        "Total: {} ({} direct, {} dev, {} peer)",
        counts.total, counts.direct, counts.dev, counts.peer
    ));
    if !report.outdated_dependencies.is_empty() {
        lines.push("Outdated:".to_string());
        for outdated in &report.outdated_dependencies {
            lines.push(format!(
                "- {}: {} (latest {})",
                outdated.name, outdated.current, outdated.latest
            ));
        }
    }

    lines.push(String::new());
    lines.push("Security Metrics:".to_string());
    let metrics = &report.metrics;
    lines.push(format!(
        "Suspicious scripts: {}",
        yes_no(metrics.has_suspicious_scripts)
    ));
    for script in &metrics.suspicious_scripts {
        lines.push(format!("  {}: {}", script.name, script.command));
    }
    lines.push(format!("Exec scripts: {}", yes_no(metrics.has_exec_scripts)));
    lines.push(format!("Minified code: {}", yes_no(metrics.has_minified_code)));
    lines.push(format!("Lock file: {}", yes_no(metrics.has_lock_file)));
    lines.push(format!(
        "Security policy: {}",
        yes_no(metrics.has_security_policy)
    ));
    lines.push(format!(
        "Publisher verified: {}",
        yes_no(metrics.publisher_verified)
    ));
    lines.push(format!("Script count: {}", metrics.script_count));
    lines.push(format!(
        "Last update: {}",
        metrics
            .last_update_age_days
            .map_or_else(|| "unknown".to_string(), |days| format!("{days} days ago"))
    ));

    let risky = report
        .file_findings
        .iter()
        .filter(|finding| finding.has_risk() || finding.error.is_some())
        .collect::<Vec<_>>();
    lines.push(String::new());
    lines.push(format!(
        "Files: {} inspected, {} flagged",
        report.file_findings.len(),
        risky.len()
    ));
    for finding in risky {
        lines.push(format!("- {}: {}", finding.path, file_flags(finding).join(", ")));
        for pattern in &finding.patterns {
            if let Some(context) = &pattern.context {
                lines.push(format!("    {}: {context}", pattern.description));
            }
        }
    }
}

fn render_recommendations(report: &AnalysisReport, lines: &mut Vec<String>) {
    section(lines, "Recommendations");
    if report.recommendations.is_empty() {
        lines.push("No security concerns found for this package.".to_string());
        return;
    }
    for (index, rec) in report.recommendations.iter().enumerate() {
        if index > 0 {
            lines.push(String::new());
        }
        lines.push(rec.title.clone());
        lines.push(rec.description.clone());
    }
}

fn file_flags(finding: &FileFinding) -> Vec<String> {
    let mut flags = Vec::new();
    if finding.is_known_malware {
        flags.push("known malware".to_string());
    }
    if finding.suspicious_filename {
        flags.push("suspicious filename".to_string());
    }
    if finding.obfuscated {
        flags.push(format!(
            "obfuscated (density {:.3})",
            finding.obfuscation_density
        ));
    }
    if finding.dangerous_permissions {
        flags.push("dangerous permissions".to_string());
    }
    let categories = finding
        .patterns
        .iter()
        .map(|pattern| pattern.category.label())
        .collect::<BTreeSet<_>>();
    flags.extend(categories.into_iter().map(str::to_string));
    flags.extend(finding.network_issues.iter().map(|issue| issue.description()));
    if let Some(error) = &finding.error {
        flags.push(error.clone());
    }
    flags
}

fn bucket_title(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "Critical",
        Severity::High => "High",
        Severity::Medium => "Moderate",
        Severity::Low => "Low",
    }
}

fn yes_no(value: bool) -> &'static str {
    if value { "Yes" } else { "No" }
}

#[cfg(test)]
#[path = "tests/report.rs"]
mod tests;
