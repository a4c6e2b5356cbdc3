//! Package analysis orchestration.
//!
//! Sequences metadata fetch, file inspection, advisory lookups and the dependency walk, then
//! hands everything to the score engine. Only the root metadata fetch is fatal; every other
//! lookup degrades to a warning on the report.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use guardpkg_core::{
    AdvisorySource, AnalysisError, DependencyRiskEntry, FileFinding, PackageMetadata, PackageRef,
    PublisherInfo, RegistryClient, VulnerabilityReport,
};
use guardpkg_detect::{FileInspector, InspectorOptions, MalwareHashRegistry, PatternCatalog};
use guardpkg_npm::{NpmAuditSource, NpmRegistryClient};
use guardpkg_osv::OsvAdvisorySource;
use guardpkg_score::vulnerabilities::merge as merge_reports;
use guardpkg_score::{ScoreEngine, ScoreInput, derive_metrics, publisher_trust_score};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::GuardPkgConfig;
use crate::dependency_walker::{
    DependencyAssessment, DependencyAssessor, DependencyRiskWalker, with_timeout,
};
use crate::report::{
    AnalysisReport, BasicInfo, flatten_patterns, outdated_dependencies, recommendations,
};

/// Runtime knobs taken from [`GuardPkgConfig`].
#[derive(Debug, Clone)]
pub struct AnalyzerSettings {
    pub max_dependency_depth: usize,
    pub fetch_timeout: Duration,
    pub max_concurrent_fetches: usize,
    pub inspect_dependency_files: bool,
    pub file_extensions: Vec<String>,
}

impl AnalyzerSettings {
    pub fn from_config(config: &GuardPkgConfig) -> Self {
        Self {
            max_dependency_depth: config.analysis.max_dependency_depth,
            fetch_timeout: config.analysis.fetch_timeout(),
            max_concurrent_fetches: config.analysis.max_concurrent_fetches,
            inspect_dependency_files: config.analysis.inspect_dependency_files,
            file_extensions: config.inspection.file_extensions.clone(),
        }
    }
}

/// Produces [`AnalysisReport`]s. Cheap to clone; all collaborators are shared.
#[derive(Clone)]
pub struct PackageAnalyzer {
    registry: Arc<dyn RegistryClient>,
    advisories: Vec<Arc<dyn AdvisorySource>>,
    inspector: Arc<FileInspector>,
    engine: ScoreEngine,
    settings: Arc<AnalyzerSettings>,
}

impl PackageAnalyzer {
    pub fn new(
        registry: Arc<dyn RegistryClient>,
        advisories: Vec<Arc<dyn AdvisorySource>>,
        inspector: Arc<FileInspector>,
        settings: AnalyzerSettings,
    ) -> Self {
        Self {
            registry,
            advisories,
            inspector,
            engine: ScoreEngine::new(),
            settings: Arc::new(settings),
        }
    }

    /// Wires the npm registry, npm audit, optional OSV and a malware registry seeded from config.
    pub fn from_config(config: &GuardPkgConfig) -> Self {
        let registry = NpmRegistryClient::new();
        let http = registry.http().clone();

        let mut advisories: Vec<Arc<dyn AdvisorySource>> =
            vec![Arc::new(NpmAuditSource::new(http.clone()))];
        if config.advisories.osv {
            advisories.push(Arc::new(OsvAdvisorySource::new(http)));
        }

        let malware = Arc::new(MalwareHashRegistry::from_hashes(&config.malware.hashes));
        debug!(known_hashes = malware.len(), "seeded malware hash registry");
        let inspector = FileInspector::new(
            PatternCatalog::builtin(),
            malware,
            InspectorOptions::with_extras(
                &config.inspection.trusted_domains,
                &config.inspection.malicious_filenames,
            ),
        );

        Self::new(
            Arc::new(registry),
            advisories,
            Arc::new(inspector),
            AnalyzerSettings::from_config(config),
        )
    }

    /// Runs the full analysis for `name` at `version` (`latest`, an exact version or a range).
    ///
    /// # Errors
    ///
    /// Fails only when the root metadata cannot be fetched or names no package. Network
    /// errors pass through unchanged; everything else is wrapped as [`AnalysisError::Failed`].
    pub async fn analyze(&self, name: &str, version: &str) -> Result<AnalysisReport, AnalysisError> {
        let requested = if version.trim().is_empty() {
            "latest"
        } else {
            version.trim()
        };
        info!(package = %name, version = %requested, "starting package analysis");

        let metadata = with_timeout(
            self.settings.fetch_timeout,
            format!("fetching metadata for {name}@{requested}"),
            self.registry.fetch_metadata(name, requested),
        )
        .await
        .map_err(|err| AnalysisError::wrap(name, err))?;

        if metadata.name.trim().is_empty() || metadata.version.trim().is_empty() {
            return Err(AnalysisError::wrap(
                name,
                AnalysisError::InvalidScanResult {
                    message: "registry returned a package without name or version".to_string(),
                },
            ));
        }
        let package = metadata.package_ref();
        debug!(package = %package, "resolved package metadata");

        let (publisher, downloads, advisory_reports, inspection, dependencies) = tokio::join!(
            self.lookup_publisher(&metadata),
            with_timeout(
                self.settings.fetch_timeout,
                format!("fetching download counts for {}", metadata.name),
                self.registry.fetch_monthly_downloads(&metadata.name),
            ),
            self.query_advisories(&package),
            self.inspect_package(&metadata),
            self.walk_dependencies(&metadata),
        );

        let mut warnings = Vec::new();
        let publisher = publisher.unwrap_or_else(|err| {
            degrade(&mut warnings, "publisher lookup failed", &err);
            None
        });
        let monthly_downloads = downloads.unwrap_or_else(|err| {
            degrade(&mut warnings, "download count unavailable", &err);
            0
        });
        let reports = collect_reports(advisory_reports, &mut warnings);
        let file_findings = inspection.unwrap_or_else(|err| {
            degrade(&mut warnings, "package contents not inspected", &err);
            Vec::new()
        });
        for entry in &dependencies {
            if let Some(info) = &entry.missing_info {
                warnings.push(format!(
                    "dependency {}@{} incomplete: {info}",
                    entry.name, entry.version
                ));
            }
        }

        let now = Utc::now();
        let metrics = derive_metrics(&metadata, publisher.as_ref(), now);
        let publisher_trust = publisher_trust_score(publisher.as_ref(), now);
        let vulnerabilities = merge_reports(&reports);
        let score = self.engine.score(ScoreInput {
            metrics: &metrics,
            vulnerabilities: &vulnerabilities,
            file_findings: &file_findings,
            dependencies: &dependencies,
        });
        info!(
            package = %package,
            score = score.value,
            malware = score.malware_detected,
            "package analysis finished"
        );

        let recommendations =
            recommendations(&score, &metrics, &vulnerabilities, &file_findings);
        Ok(AnalysisReport {
            info: BasicInfo::from_metadata(&metadata, monthly_downloads),
            risk_level: score.risk_level(),
            suspicious_patterns: flatten_patterns(&file_findings),
            outdated_dependencies: outdated_dependencies(&dependencies),
            package,
            metrics,
            publisher_trust,
            vulnerabilities,
            file_findings,
            dependencies,
            score,
            recommendations,
            warnings,
        })
    }

    async fn lookup_publisher(
        &self,
        metadata: &PackageMetadata,
    ) -> Result<Option<PublisherInfo>, AnalysisError> {
        let Some(username) = metadata
            .maintainers
            .first()
            .or(metadata.author.as_ref())
            .filter(|username| !username.trim().is_empty())
        else {
            return Ok(None);
        };
        with_timeout(
            self.settings.fetch_timeout,
            format!("fetching publisher {username}"),
            self.registry.fetch_publisher(username),
        )
        .await
    }

    /// Queries every advisory source concurrently. Results keep source order.
    async fn query_advisories(
        &self,
        package: &PackageRef,
    ) -> Vec<(&'static str, Result<VulnerabilityReport, AnalysisError>)> {
        let mut tasks = JoinSet::new();
        for (index, source) in self.advisories.iter().enumerate() {
            let source = Arc::clone(source);
            let package = package.clone();
            let timeout = self.settings.fetch_timeout;
            tasks.spawn(async move {
                let name = source.name();
                let result = with_timeout(
                    timeout,
                    format!("querying {name} advisories for {package}"),
                    source.query(&package),
                )
                .await;
                (index, name, result)
            });
        }

        let mut results = Vec::with_capacity(self.advisories.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(err) => warn!(error = %err, "advisory task failed"),
            }
        }
        results.sort_by_key(|(index, _, _)| *index);
        results
            .into_iter()
            .map(|(_, name, result)| (name, result))
            .collect()
    }

    /// Downloads the package tarball and inspects it on a blocking thread.
    async fn inspect_package(
        &self,
        metadata: &PackageMetadata,
    ) -> Result<Vec<FileFinding>, AnalysisError> {
        let package = metadata.package_ref();
        let extracted = with_timeout(
            self.settings.fetch_timeout,
            format!("downloading {package}"),
            self.registry.download_package(metadata),
        )
        .await?;

        let inspector = Arc::clone(&self.inspector);
        let settings = Arc::clone(&self.settings);
        let findings = tokio::task::spawn_blocking(move || {
            inspector.inspect_tree(extracted.root(), &settings.file_extensions)
        })
        .await
        .map_err(|err| AnalysisError::ExtractionFailure {
            package: package.to_string(),
            message: format!("file inspection task failed: {err}"),
        })?;
        debug!(package = %package, files = findings.len(), "inspected package files");
        Ok(findings)
    }

    async fn walk_dependencies(&self, metadata: &PackageMetadata) -> Vec<DependencyRiskEntry> {
        DependencyRiskWalker::new(
            Arc::new(self.clone()),
            self.settings.max_concurrent_fetches,
            self.settings.fetch_timeout,
        )
        .walk_from(metadata, self.settings.max_dependency_depth)
        .await
    }
}

#[async_trait]
impl DependencyAssessor for PackageAnalyzer {
    async fn resolve(&self, name: &str, spec: &str) -> Result<PackageMetadata, AnalysisError> {
        self.registry.fetch_metadata(name, spec).await
    }

    /// Scores one dependency from its own metadata, advisories and (optionally) files.
    /// Its dependencies are not consulted; the walker covers them separately.
    async fn assess(&self, metadata: &PackageMetadata) -> DependencyAssessment {
        let package = metadata.package_ref();
        let (advisory_reports, file_findings) = tokio::join!(
            self.query_advisories(&package),
            async {
                if !self.settings.inspect_dependency_files {
                    return Vec::new();
                }
                self.inspect_package(metadata).await.unwrap_or_else(|err| {
                    debug!(package = %package, error = %err, "dependency files not inspected");
                    Vec::new()
                })
            }
        );

        let mut ignored = Vec::new();
        let reports = collect_reports(advisory_reports, &mut ignored);
        let vulnerabilities = merge_reports(&reports);
        let metrics = derive_metrics(metadata, None, Utc::now());
        let score = self.engine.score(ScoreInput {
            metrics: &metrics,
            vulnerabilities: &vulnerabilities,
            file_findings: &file_findings,
            dependencies: &[],
        });
        debug!(package = %package, score = score.value, "assessed dependency");

        DependencyAssessment {
            score: score.value,
            malware_detected: score.malware_detected,
        }
    }
}

fn collect_reports(
    results: Vec<(&'static str, Result<VulnerabilityReport, AnalysisError>)>,
    warnings: &mut Vec<String>,
) -> Vec<VulnerabilityReport> {
    results
        .into_iter()
        .filter_map(|(source, result)| match result {
            Ok(report) => Some(report),
            Err(err) => {
                degrade(warnings, &format!("{source} advisories unavailable"), &err);
                None
            }
        })
        .collect()
}

fn degrade(warnings: &mut Vec<String>, what: &str, err: &AnalysisError) {
    warn!(error = %err, "{what}");
    warnings.push(format!("{what}: {err}"));
}

#[cfg(test)]
#[path = "tests/analyzer.rs"]
mod tests;
