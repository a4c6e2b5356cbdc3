//! Package-wide signals derived from registry metadata alone.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use guardpkg_core::{
    DependencyCount, NEUTRAL_SCORE, PackageMetadata, PublisherInfo, ScriptEntry, SecurityMetrics,
};
use regex::Regex;

pub const SUSPICIOUS_COMMANDS: &[&str] = &[
    "curl",
    "wget",
    "eval",
    "exec",
    "download",
    "http",
    "env",
    "export",
    "npm explore",
    "npm hook",
    "npm prefix",
    "npm root",
    "npm config",
    "npm get",
    "npm set",
];

pub const LOCK_FILES: &[&str] = &["package-lock.json", "yarn.lock", "pnpm-lock.yaml"];

/// Average published file size under which a package is treated as shipping minified code.
pub const MINIFIED_AVERAGE_FILE_BYTES: u64 = 1024;

static EXEC_SCRIPT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bnpm\s+exec\b|\bnpx\s|\byarn\s+exec\b|\bpnpm\s+(exec|dlx)\b")
        .expect("exec script pattern must compile")
});

pub fn derive_metrics(
    metadata: &PackageMetadata,
    publisher: Option<&PublisherInfo>,
    now: DateTime<Utc>,
) -> SecurityMetrics {
    let suspicious_scripts = suspicious_scripts(metadata);
    SecurityMetrics {
        has_suspicious_scripts: !suspicious_scripts.is_empty(),
        suspicious_scripts,
        has_exec_scripts: metadata
            .scripts
            .values()
            .any(|command| EXEC_SCRIPT.is_match(command)),
        has_minified_code: has_minified_code(metadata),
        has_lock_file: has_lock_file(metadata),
        has_security_policy: has_security_policy(metadata),
        dependency_count: dependency_count(metadata),
        last_update_age_days: metadata
            .published
            .map(|published| (now - published).num_days().max(0)),
        publisher_verified: publisher.is_some_and(|info| info.verified),
        script_count: metadata.scripts.len(),
    }
}

pub fn suspicious_scripts(metadata: &PackageMetadata) -> Vec<ScriptEntry> {
    metadata
        .scripts
        .iter()
        .filter(|(_, command)| {
            let command = command.to_ascii_lowercase();
            SUSPICIOUS_COMMANDS
                .iter()
                .any(|needle| command.contains(needle))
        })
        .map(|(name, command)| ScriptEntry {
            name: name.clone(),
            command: command.clone(),
        })
        .collect()
}

pub fn has_minified_code(metadata: &PackageMetadata) -> bool {
    match (metadata.dist.size, metadata.dist.file_count) {
        (Some(size), Some(file_count)) if file_count > 0 => {
            size / file_count < MINIFIED_AVERAGE_FILE_BYTES
        }
        _ => false,
    }
}

pub fn has_lock_file(metadata: &PackageMetadata) -> bool {
    metadata.dist.files.iter().any(|file| {
        let name = file.rsplit('/').next().unwrap_or(file);
        LOCK_FILES.contains(&name)
    })
}

/// A `SECURITY.md` (any case, any directory) in the published file manifest.
pub fn has_security_policy(metadata: &PackageMetadata) -> bool {
    metadata.dist.files.iter().any(|file| {
        let name = file.rsplit('/').next().unwrap_or(file);
        name.eq_ignore_ascii_case("security.md")
    })
}

/// `total` counts each name once even when it appears in several maps.
pub fn dependency_count(metadata: &PackageMetadata) -> DependencyCount {
    let union = metadata
        .dependencies
        .keys()
        .chain(metadata.dev_dependencies.keys())
        .chain(metadata.peer_dependencies.keys())
        .collect::<BTreeSet<_>>();
    DependencyCount {
        total: union.len(),
        direct: metadata.dependencies.len(),
        dev: metadata.dev_dependencies.len(),
        peer: metadata.peer_dependencies.len(),
    }
}

/// Publisher reputation in 0..=100. Unknown publishers get the neutral score.
pub fn publisher_trust_score(publisher: Option<&PublisherInfo>, now: DateTime<Utc>) -> u8 {
    let Some(publisher) = publisher else {
        return NEUTRAL_SCORE;
    };

    let mut score = u32::from(NEUTRAL_SCORE);
    if publisher.verified {
        score += 35;
    }
    if let Some(created) = publisher.created {
        let years = (now - created).num_days().max(0) / 365;
        score += u32::try_from((years * 2).min(10)).unwrap_or(0);
    }
    score += u32::try_from((publisher.package_count / 2).min(5)).unwrap_or(0);

    u8::try_from(score.min(100)).unwrap_or(100)
}
