use std::collections::BTreeSet;

use guardpkg_core::{
    Deduction, DependencyRiskEntry, FileFinding, RiskScore, SecurityMetrics, VulnerabilityReport,
};

pub const MAX_SCORE: u32 = 100;

pub const CRITICAL_VULNERABILITY_POINTS: u32 = 20;
pub const HIGH_VULNERABILITY_POINTS: u32 = 10;
pub const SUSPICIOUS_SCRIPT_POINTS: u32 = 15;
pub const EXEC_SCRIPT_POINTS: u32 = 20;
pub const LARGE_DEPENDENCY_TREE_POINTS: u32 = 10;
pub const LARGE_DEPENDENCY_TREE_THRESHOLD: usize = 100;
pub const STALE_PACKAGE_POINTS: u32 = 10;
pub const STALE_PACKAGE_DAYS: i64 = 365;
pub const MISSING_LOCK_FILE_POINTS: u32 = 5;
pub const PATTERN_CATEGORY_POINTS: u32 = 5;
pub const PATTERN_CATEGORY_CAP: u32 = 40;
pub const SUSPICIOUS_FILENAME_POINTS: u32 = 30;
pub const OBFUSCATED_FILE_POINTS: u32 = 20;
pub const DANGEROUS_PERMISSION_POINTS: u32 = 20;
pub const NETWORK_ISSUE_POINTS: u32 = 10;
pub const VULNERABLE_DEPENDENCY_POINTS: u32 = 5;
pub const VULNERABLE_DEPENDENCY_CAP: u32 = 20;
/// Dependencies scoring below this are counted against the parent.
pub const VULNERABLE_DEPENDENCY_THRESHOLD: u8 = 50;

/// Everything the engine consumes for one package.
#[derive(Debug, Clone, Copy)]
pub struct ScoreInput<'a> {
    pub metrics: &'a SecurityMetrics,
    pub vulnerabilities: &'a VulnerabilityReport,
    pub file_findings: &'a [FileFinding],
    pub dependencies: &'a [DependencyRiskEntry],
}

/// Deterministic mapping of findings to a 0..=100 score. Higher is safer.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScoreEngine;

impl ScoreEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn score(&self, input: ScoreInput<'_>) -> RiskScore {
        let mut files = input.file_findings.iter().collect::<Vec<_>>();
        files.sort_by(|left, right| left.path.cmp(&right.path));
        let mut dependencies = input.dependencies.iter().collect::<Vec<_>>();
        dependencies.sort_by(|left, right| {
            (&left.name, &left.version, left.depth).cmp(&(&right.name, &right.version, right.depth))
        });

        if let Some(reason) = malware_reason(&files, &dependencies) {
            return RiskScore {
                value: 0,
                deductions: vec![Deduction {
                    reason,
                    points: MAX_SCORE,
                }],
                malware_detected: true,
            };
        }

        let mut ledger = Ledger::default();
        vulnerability_deductions(&mut ledger, input.vulnerabilities);
        metrics_deductions(&mut ledger, input.metrics);
        pattern_deductions(&mut ledger, &files);
        file_deductions(&mut ledger, &files);
        dependency_deductions(&mut ledger, &dependencies);

        ledger.finish()
    }
}

#[derive(Default)]
struct Ledger {
    deductions: Vec<Deduction>,
}

impl Ledger {
    fn deduct(&mut self, reason: impl Into<String>, points: u32) {
        if points > 0 {
            self.deductions.push(Deduction {
                reason: reason.into(),
                points,
            });
        }
    }

    fn finish(self) -> RiskScore {
        let total = self
            .deductions
            .iter()
            .fold(0_u32, |total, deduction| total.saturating_add(deduction.points));
        let value = MAX_SCORE.saturating_sub(total);
        RiskScore {
            value: u8::try_from(value).unwrap_or(100),
            deductions: self.deductions,
            malware_detected: false,
        }
    }
}

fn malware_reason(files: &[&FileFinding], dependencies: &[&DependencyRiskEntry]) -> Option<String> {
    if let Some(file) = files.iter().find(|file| file.is_known_malware) {
        return Some(format!("known malware detected in {}", file.path));
    }
    dependencies
        .iter()
        .find(|entry| entry.malware_detected)
        .map(|entry| {
            format!(
                "known malware detected in dependency {}@{}",
                entry.name, entry.version
            )
        })
}

fn vulnerability_deductions(ledger: &mut Ledger, vulnerabilities: &VulnerabilityReport) {
    for (bucket, label, points) in [
        (&vulnerabilities.critical, "critical vulnerability", CRITICAL_VULNERABILITY_POINTS),
        (&vulnerabilities.high, "high severity vulnerability", HIGH_VULNERABILITY_POINTS),
    ] {
        let mut ids = bucket
            .iter()
            .map(|vulnerability| vulnerability.id.as_str())
            .collect::<Vec<_>>();
        ids.sort_unstable();
        for id in ids {
            ledger.deduct(format!("{label} {id}"), points);
        }
    }
}

fn metrics_deductions(ledger: &mut Ledger, metrics: &SecurityMetrics) {
    if metrics.has_suspicious_scripts {
        let names = metrics
            .suspicious_scripts
            .iter()
            .map(|script| script.name.as_str())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect::<Vec<_>>()
            .join(", ");
        ledger.deduct(
            format!("suspicious install scripts ({names})"),
            SUSPICIOUS_SCRIPT_POINTS,
        );
    }
    if metrics.has_exec_scripts {
        ledger.deduct("scripts invoke package executors", EXEC_SCRIPT_POINTS);
    }
    if metrics.dependency_count.total > LARGE_DEPENDENCY_TREE_THRESHOLD {
        ledger.deduct(
            format!(
                "large dependency set ({} packages)",
                metrics.dependency_count.total
            ),
            LARGE_DEPENDENCY_TREE_POINTS,
        );
    }
    match metrics.last_update_age_days {
        Some(days) if days > STALE_PACKAGE_DAYS => {
            ledger.deduct(
                format!("not updated for {days} days"),
                STALE_PACKAGE_POINTS,
            );
        }
        Some(_) => {}
        None => ledger.deduct("publish date unknown", STALE_PACKAGE_POINTS),
    }
    if !metrics.has_lock_file {
        ledger.deduct("no lock file published", MISSING_LOCK_FILE_POINTS);
    }
}

fn pattern_deductions(ledger: &mut Ledger, files: &[&FileFinding]) {
    let categories = files
        .iter()
        .flat_map(|file| file.patterns.iter().map(|pattern| pattern.category))
        .collect::<BTreeSet<_>>();
    if categories.is_empty() {
        return;
    }

    let count = u32::try_from(categories.len()).unwrap_or(u32::MAX);
    let labels = categories
        .iter()
        .map(|category| category.label())
        .collect::<Vec<_>>()
        .join(", ");
    ledger.deduct(
        format!("suspicious code patterns ({labels})"),
        count
            .saturating_mul(PATTERN_CATEGORY_POINTS)
            .min(PATTERN_CATEGORY_CAP),
    );
}

fn file_deductions(ledger: &mut Ledger, files: &[&FileFinding]) {
    for file in files {
        if file.suspicious_filename {
            ledger.deduct(
                format!("suspicious filename {}", file.path),
                SUSPICIOUS_FILENAME_POINTS,
            );
        }
        if file.obfuscated {
            ledger.deduct(
                format!("obfuscated code in {}", file.path),
                OBFUSCATED_FILE_POINTS,
            );
        }
        if file.dangerous_permissions {
            ledger.deduct(
                format!("dangerous file permission operation in {}", file.path),
                DANGEROUS_PERMISSION_POINTS,
            );
        }
        let mut issues = file.network_issues.iter().collect::<Vec<_>>();
        issues.sort();
        issues.dedup();
        for issue in issues {
            ledger.deduct(
                format!("{} in {}", issue.description(), file.path),
                NETWORK_ISSUE_POINTS,
            );
        }
    }
}

fn dependency_deductions(ledger: &mut Ledger, dependencies: &[&DependencyRiskEntry]) {
    let vulnerable = dependencies
        .iter()
        .filter(|entry| {
            entry
                .score
                .is_some_and(|score| score < VULNERABLE_DEPENDENCY_THRESHOLD)
        })
        .map(|entry| format!("{}@{}", entry.name, entry.version))
        .collect::<BTreeSet<_>>();
    if vulnerable.is_empty() {
        return;
    }

    let count = u32::try_from(vulnerable.len()).unwrap_or(u32::MAX);
    ledger.deduct(
        format!(
            "high-risk dependencies ({})",
            vulnerable.into_iter().collect::<Vec<_>>().join(", ")
        ),
        count
            .saturating_mul(VULNERABLE_DEPENDENCY_POINTS)
            .min(VULNERABLE_DEPENDENCY_CAP),
    );
}

#[cfg(test)]
#[path = "tests/engine.rs"]
mod tests;
