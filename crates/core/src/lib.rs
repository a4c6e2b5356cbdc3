use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use thiserror::Error;

/// Score reported for auxiliary lookups that could not be completed.
pub const NEUTRAL_SCORE: u8 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    #[serde(alias = "moderate")]
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn from_label(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" | "moderate" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PackageRef {
    pub name: String,
    pub version: String,
}

impl PackageRef {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for PackageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
    Production,
    Development,
    Peer,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DistInfo {
    pub tarball: Option<String>,
    pub size: Option<u64>,
    pub file_count: Option<u64>,
    pub files: Vec<String>,
}

/// Registry record for one resolved version of a package.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackageMetadata {
    pub name: String,
    pub version: String,
    pub latest: String,
    pub description: Option<String>,
    pub author: Option<String>,
    pub license: Option<String>,
    pub maintainers: Vec<String>,
    pub scripts: BTreeMap<String, String>,
    pub dependencies: BTreeMap<String, String>,
    pub dev_dependencies: BTreeMap<String, String>,
    pub peer_dependencies: BTreeMap<String, String>,
    pub published: Option<DateTime<Utc>>,
    pub dist: DistInfo,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyRequest {
    pub name: String,
    pub spec: String,
    pub kind: DependencyKind,
}

impl PackageMetadata {
    pub fn package_ref(&self) -> PackageRef {
        PackageRef::new(self.name.clone(), self.version.clone())
    }

    /// Merges production, development and peer dependencies into one list.
    ///
    /// A name declared in more than one map is reported once, with production taking
    /// precedence over development and development over peer.
    pub fn dependency_requests(&self) -> Vec<DependencyRequest> {
        let mut merged = BTreeMap::<&str, DependencyRequest>::new();
        let maps = [
            (&self.peer_dependencies, DependencyKind::Peer),
            (&self.dev_dependencies, DependencyKind::Development),
            (&self.dependencies, DependencyKind::Production),
        ];
        for (map, kind) in maps {
            for (name, spec) in map {
                merged.insert(
                    name.as_str(),
                    DependencyRequest {
                        name: name.clone(),
                        spec: spec.clone(),
                        kind,
                    },
                );
            }
        }
        merged.into_values().collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherInfo {
    pub username: String,
    pub verified: bool,
    pub created: Option<DateTime<Utc>>,
    pub package_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyCount {
    pub total: usize,
    pub direct: usize,
    pub dev: usize,
    pub peer: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptEntry {
    pub name: String,
    pub command: String,
}

/// Package-wide signals derived from registry metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityMetrics {
    pub has_suspicious_scripts: bool,
    pub suspicious_scripts: Vec<ScriptEntry>,
    pub has_exec_scripts: bool,
    pub has_minified_code: bool,
    pub has_lock_file: bool,
    /// Reported only; never deducted.
    #[serde(default)]
    pub has_security_policy: bool,
    pub dependency_count: DependencyCount,
    /// `None` when the registry has no publish timestamp for the version.
    pub last_update_age_days: Option<i64>,
    pub publisher_verified: bool,
    pub script_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vulnerability {
    pub id: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub title: String,
    pub severity: Severity,
    #[serde(default)]
    pub sources: Vec<String>,
}

impl Vulnerability {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        severity: Severity,
        source: &str,
    ) -> Self {
        Self {
            id: id.into(),
            aliases: Vec::new(),
            title: title.into(),
            severity,
            sources: vec![source.to_string()],
        }
    }
}

/// Vulnerabilities bucketed by severity. Buckets are always present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VulnerabilityReport {
    pub critical: Vec<Vulnerability>,
    pub high: Vec<Vulnerability>,
    pub moderate: Vec<Vulnerability>,
    pub low: Vec<Vulnerability>,
}

impl VulnerabilityReport {
    pub fn push(&mut self, vulnerability: Vulnerability) {
        self.bucket_mut(vulnerability.severity).push(vulnerability);
    }

    pub fn bucket(&self, severity: Severity) -> &[Vulnerability] {
        match severity {
            Severity::Critical => &self.critical,
            Severity::High => &self.high,
            Severity::Medium => &self.moderate,
            Severity::Low => &self.low,
        }
    }

    fn bucket_mut(&mut self, severity: Severity) -> &mut Vec<Vulnerability> {
        match severity {
            Severity::Critical => &mut self.critical,
            Severity::High => &mut self.high,
            Severity::Medium => &mut self.moderate,
            Severity::Low => &mut self.low,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Vulnerability> {
        self.critical
            .iter()
            .chain(self.high.iter())
            .chain(self.moderate.iter())
            .chain(self.low.iter())
    }

    pub fn total(&self) -> usize {
        self.critical.len() + self.high.len() + self.moderate.len() + self.low.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PatternCategory {
    CodeExecution,
    DataExfiltration,
    Obfuscation,
    SystemAccess,
    CryptoMining,
    Persistence,
    AntiDebugging,
    Fingerprinting,
    KnownExploits,
}

impl PatternCategory {
    pub const ALL: [PatternCategory; 9] = [
        Self::CodeExecution,
        Self::DataExfiltration,
        Self::Obfuscation,
        Self::SystemAccess,
        Self::CryptoMining,
        Self::Persistence,
        Self::AntiDebugging,
        Self::Fingerprinting,
        Self::KnownExploits,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::CodeExecution => "code-execution",
            Self::DataExfiltration => "data-exfiltration",
            Self::Obfuscation => "obfuscation",
            Self::SystemAccess => "system-access",
            Self::CryptoMining => "crypto-mining",
            Self::Persistence => "persistence",
            Self::AntiDebugging => "anti-debugging",
            Self::Fingerprinting => "fingerprinting",
            Self::KnownExploits => "known-exploits",
        }
    }

    pub fn severity(self) -> Severity {
        match self {
            Self::CodeExecution | Self::CryptoMining | Self::KnownExploits => Severity::Critical,
            Self::DataExfiltration | Self::SystemAccess | Self::Persistence => Severity::High,
            Self::Obfuscation => Severity::Medium,
            Self::AntiDebugging | Self::Fingerprinting => Severity::Low,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuspiciousPattern {
    pub category: PatternCategory,
    pub description: String,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Source excerpt around the match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NetworkIssue {
    SuspiciousUrl { host: String },
    SocketConnection,
    EnvExfiltration,
}

impl NetworkIssue {
    pub fn severity(&self) -> Severity {
        match self {
            Self::SuspiciousUrl { .. } => Severity::Medium,
            Self::SocketConnection => Severity::Medium,
            Self::EnvExfiltration => Severity::Critical,
        }
    }

    pub fn description(&self) -> String {
        match self {
            Self::SuspiciousUrl { host } => format!("request to untrusted host {host}"),
            Self::SocketConnection => "live socket connection, verify legitimacy".to_string(),
            Self::EnvExfiltration => {
                "critical: environment variables read alongside network access".to_string()
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Complexity {
    pub cyclomatic: u32,
    pub is_complex: bool,
}

/// Result of inspecting one file from an extracted package.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileFinding {
    pub path: String,
    pub content_hash: Option<String>,
    pub patterns: Vec<SuspiciousPattern>,
    pub suspicious_filename: bool,
    pub obfuscated: bool,
    pub obfuscation_density: f64,
    pub network_issues: Vec<NetworkIssue>,
    pub dangerous_permissions: bool,
    pub complexity: Option<Complexity>,
    pub is_known_malware: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FileFinding {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn has_risk(&self) -> bool {
        self.is_known_malware
            || self.suspicious_filename
            || self.obfuscated
            || self.dangerous_permissions
            || !self.patterns.is_empty()
            || !self.network_issues.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deduction {
    pub reason: String,
    pub points: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskScore {
    pub value: u8,
    pub deductions: Vec<Deduction>,
    pub malware_detected: bool,
}

impl RiskScore {
    /// Bands the score into a severity, higher scores meaning lower risk.
    pub fn risk_level(&self) -> Severity {
        match self.value {
            80..=100 => Severity::Low,
            50..=79 => Severity::Medium,
            30..=49 => Severity::High,
            _ => Severity::Critical,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyRiskEntry {
    pub name: String,
    /// Resolved version, or the declared spec when resolution failed.
    pub version: String,
    pub depth: usize,
    pub kind: DependencyKind,
    pub score: Option<u8>,
    pub malware_detected: bool,
    /// Registry `latest` for this dependency, when it resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing_info: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Network,
    MetadataNotFound,
    InvalidScanResult,
    InvalidConfiguration,
    ExtractionFailure,
}

#[derive(Debug, Clone, Error)]
pub enum AnalysisError {
    #[error("network error: {message}")]
    Network { message: String },
    #[error("{package} was not found in the registry")]
    MetadataNotFound { package: String },
    #[error("invalid scan result: {message}")]
    InvalidScanResult { message: String },
    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },
    #[error("failed to extract {package}: {message}")]
    ExtractionFailure { package: String, message: String },
    #[error("failed to analyze package {package}: {source}")]
    Failed {
        package: String,
        #[source]
        source: Box<AnalysisError>,
    },
}

impl AnalysisError {
    /// Wraps an error with package context. Network errors pass through unchanged.
    pub fn wrap(package: &str, error: AnalysisError) -> Self {
        match error {
            error @ (Self::Network { .. } | Self::Failed { .. }) => error,
            other => Self::Failed {
                package: package.to_string(),
                source: Box::new(other),
            },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network { .. } => ErrorKind::Network,
            Self::MetadataNotFound { .. } => ErrorKind::MetadataNotFound,
            Self::InvalidScanResult { .. } => ErrorKind::InvalidScanResult,
            Self::InvalidConfiguration { .. } => ErrorKind::InvalidConfiguration,
            Self::ExtractionFailure { .. } => ErrorKind::ExtractionFailure,
            Self::Failed { source, .. } => source.kind(),
        }
    }

    pub fn is_network(&self) -> bool {
        self.kind() == ErrorKind::Network
    }
}

/// An unpacked package tree. A temp workspace, when present, is removed on drop.
#[derive(Debug)]
pub struct ExtractedPackage {
    root: PathBuf,
    _workspace: Option<TempDir>,
}

impl ExtractedPackage {
    pub fn new(workspace: TempDir, root: PathBuf) -> Self {
        Self {
            root,
            _workspace: Some(workspace),
        }
    }

    pub fn from_dir(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            _workspace: None,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Fetches metadata for `version`, which may be `latest`, an exact version or a range.
    async fn fetch_metadata(
        &self,
        package: &str,
        version: &str,
    ) -> Result<PackageMetadata, AnalysisError>;
    async fn fetch_publisher(&self, _username: &str) -> Result<Option<PublisherInfo>, AnalysisError> {
        Ok(None)
    }
    async fn fetch_monthly_downloads(&self, _package: &str) -> Result<u64, AnalysisError> {
        Ok(0)
    }
    async fn download_package(
        &self,
        metadata: &PackageMetadata,
    ) -> Result<ExtractedPackage, AnalysisError>;
}

#[async_trait]
pub trait AdvisorySource: Send + Sync {
    fn name(&self) -> &'static str;
    async fn query(&self, package: &PackageRef) -> Result<VulnerabilityReport, AnalysisError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DummyClient;

    #[async_trait]
    impl RegistryClient for DummyClient {
        async fn fetch_metadata(
            &self,
            package: &str,
            _version: &str,
        ) -> Result<PackageMetadata, AnalysisError> {
            Err(AnalysisError::MetadataNotFound {
                package: package.to_string(),
            })
        }

        async fn download_package(
            &self,
            metadata: &PackageMetadata,
        ) -> Result<ExtractedPackage, AnalysisError> {
            Err(AnalysisError::ExtractionFailure {
                package: metadata.name.clone(),
                message: "no tarball".to_string(),
            })
        }
    }

    #[test]
    fn severity_labels_accept_moderate_alias() {
        assert_eq!(Severity::from_label("moderate"), Some(Severity::Medium));
        assert_eq!(Severity::from_label(" CRITICAL "), Some(Severity::Critical));
        assert_eq!(Severity::from_label("unknown"), None);
        assert!(Severity::Critical > Severity::High);
    }

    #[test]
    fn dependency_requests_merge_maps_with_production_precedence() {
        let mut metadata = PackageMetadata::default();
        metadata
            .dependencies
            .insert("shared".to_string(), "^1.0.0".to_string());
        metadata
            .dev_dependencies
            .insert("shared".to_string(), "^2.0.0".to_string());
        metadata
            .dev_dependencies
            .insert("jest".to_string(), "^29.0.0".to_string());
        metadata
            .peer_dependencies
            .insert("react".to_string(), ">=17".to_string());

        let requests = metadata.dependency_requests();
        assert_eq!(requests.len(), 3);
        let shared = requests
            .iter()
            .find(|request| request.name == "shared")
            .expect("shared dependency");
        assert_eq!(shared.kind, DependencyKind::Production);
        assert_eq!(shared.spec, "^1.0.0");
    }

    #[test]
    fn vulnerability_report_buckets_by_severity() {
        let mut report = VulnerabilityReport::default();
        report.push(Vulnerability::new("A", "a", Severity::Critical, "test"));
        report.push(Vulnerability::new("B", "b", Severity::Medium, "test"));

        assert_eq!(report.critical.len(), 1);
        assert_eq!(report.moderate.len(), 1);
        assert_eq!(report.bucket(Severity::High).len(), 0);
        assert_eq!(report.total(), 2);
    }

    #[test]
    fn wrap_keeps_network_errors_unchanged() {
        let network = AnalysisError::Network {
            message: "connection refused".to_string(),
        };
        let wrapped = AnalysisError::wrap("demo", network);
        assert!(matches!(wrapped, AnalysisError::Network { .. }));

        let missing = AnalysisError::MetadataNotFound {
            package: "demo@9.9.9".to_string(),
        };
        let wrapped = AnalysisError::wrap("demo", missing);
        assert!(matches!(wrapped, AnalysisError::Failed { .. }));
        assert_eq!(wrapped.kind(), ErrorKind::MetadataNotFound);
        assert!(
            wrapped
                .to_string()
                .starts_with("failed to analyze package demo:")
        );
    }

    #[test]
    fn risk_level_bands_score() {
        let score = |value| RiskScore {
            value,
            deductions: Vec::new(),
            malware_detected: false,
        };
        assert_eq!(score(100).risk_level(), Severity::Low);
        assert_eq!(score(80).risk_level(), Severity::Low);
        assert_eq!(score(50).risk_level(), Severity::Medium);
        assert_eq!(score(30).risk_level(), Severity::High);
        assert_eq!(score(0).risk_level(), Severity::Critical);
    }

    #[tokio::test]
    async fn registry_client_default_methods_return_empty_values() {
        let client = DummyClient;
        assert!(
            client
                .fetch_publisher("someone")
                .await
                .expect("default publisher lookup")
                .is_none()
        );
        assert_eq!(
            client
                .fetch_monthly_downloads("demo")
                .await
                .expect("default downloads"),
            0
        );
        let err = client
            .fetch_metadata("demo", "latest")
            .await
            .expect_err("dummy client has no packages");
        assert_eq!(err.kind(), ErrorKind::MetadataNotFound);
    }
}
