use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;

use guardpkg_core::{
    AdvisorySource, AnalysisError, PackageRef, Severity, Vulnerability, VulnerabilityReport,
};

use crate::registry::DEFAULT_REGISTRY_BASE_URL;
use crate::transport::{decode_error, reqwest_transport_error, status_error};

const SOURCE_NAME: &str = "npm-audit";

/// Advisories from the registry's bulk audit endpoint.
#[derive(Debug, Clone)]
pub struct NpmAuditSource {
    http: Client,
    base_url: String,
}

impl NpmAuditSource {
    pub fn new(http: Client) -> Self {
        let base_url = env::var("GUARDPKG_NPM_REGISTRY_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_REGISTRY_BASE_URL.to_string());
        Self::with_base_url(http, base_url)
    }

    pub fn with_base_url(http: Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl AdvisorySource for NpmAuditSource {
    fn name(&self) -> &'static str {
        SOURCE_NAME
    }

    async fn query(&self, package: &PackageRef) -> Result<VulnerabilityReport, AnalysisError> {
        let url = format!(
            "{}/-/npm/v1/security/audits",
            self.base_url.trim_end_matches('/')
        );
        let body = AuditRequest {
            name: &package.name,
            version: &package.version,
            requires: BTreeMap::from([(package.name.as_str(), package.version.as_str())]),
        };

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| reqwest_transport_error("unable to query npm audit API", &url, e))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(VulnerabilityReport::default());
        }
        if !response.status().is_success() {
            return Err(status_error("npm audit API", response.status()));
        }

        let body: AuditResponse = response
            .json()
            .await
            .map_err(|e| decode_error("npm audit", e))?;

        let Some(buckets) = body.metadata.and_then(|metadata| metadata.vulnerabilities) else {
            return Ok(VulnerabilityReport::default());
        };

        let mut report = VulnerabilityReport::default();
        for (severity, bucket) in [
            (Severity::Critical, buckets.critical),
            (Severity::High, buckets.high),
            (Severity::Medium, buckets.moderate),
            (Severity::Low, buckets.low),
        ] {
            for vulnerability in bucket.into_vulnerabilities(package, severity) {
                report.push(vulnerability);
            }
        }
        Ok(report)
    }
}

#[derive(Debug, Serialize)]
struct AuditRequest<'a> {
    name: &'a str,
    version: &'a str,
    requires: BTreeMap<&'a str, &'a str>,
}

#[derive(Debug, Deserialize)]
struct AuditResponse {
    metadata: Option<AuditMetadata>,
}

#[derive(Debug, Deserialize)]
struct AuditMetadata {
    vulnerabilities: Option<AuditBuckets>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AuditBuckets {
    critical: AuditBucket,
    high: AuditBucket,
    moderate: AuditBucket,
    low: AuditBucket,
}

/// The endpoint reports each bucket either as a bare count or as a list of advisories.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AuditBucket {
    Count(u64),
    Entries(Vec<AuditEntry>),
}

impl Default for AuditBucket {
    fn default() -> Self {
        Self::Count(0)
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AuditEntry {
    Id(String),
    Advisory {
        id: Option<serde_json::Value>,
        source: Option<serde_json::Value>,
        title: Option<String>,
        #[serde(default)]
        cves: Vec<String>,
    },
}

impl AuditBucket {
    fn into_vulnerabilities(self, package: &PackageRef, severity: Severity) -> Vec<Vulnerability> {
        let synthetic_id =
            |index: usize| format!("npm-audit:{}:{}:{}", package, severity.label(), index + 1);
        match self {
            Self::Count(count) => (0..usize::try_from(count).unwrap_or(0))
                .map(|index| {
                    Vulnerability::new(
                        synthetic_id(index),
                        format!("{} severity advisory reported by npm audit", severity.label()),
                        severity,
                        SOURCE_NAME,
                    )
                })
                .collect(),
            Self::Entries(entries) => entries
                .into_iter()
                .enumerate()
                .map(|(index, entry)| match entry {
                    AuditEntry::Id(id) => Vulnerability::new(id.clone(), id, severity, SOURCE_NAME),
                    AuditEntry::Advisory {
                        id,
                        source,
                        title,
                        cves,
                    } => {
                        let id = match id.or(source) {
                            Some(serde_json::Value::String(id)) => id,
                            Some(serde_json::Value::Number(id)) => id.to_string(),
                            _ => synthetic_id(index),
                        };
                        let title = title.unwrap_or_else(|| id.clone());
                        let mut vulnerability =
                            Vulnerability::new(id, title, severity, SOURCE_NAME);
                        vulnerability.aliases = cves;
                        vulnerability
                    }
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use guardpkg_core::ErrorKind;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn demo() -> PackageRef {
        PackageRef::new("demo", "1.0.0")
    }

    async fn audit_with_body(body: &str) -> Result<VulnerabilityReport, AnalysisError> {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/-/npm/v1/security/audits"))
            .and(body_partial_json(serde_json::json!({
                "name": "demo",
                "version": "1.0.0",
                "requires": {"demo": "1.0.0"}
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(body.to_string(), "application/json"),
            )
            .mount(&mock_server)
            .await;

        NpmAuditSource::with_base_url(Client::new(), mock_server.uri())
            .query(&demo())
            .await
    }

    #[tokio::test]
    async fn bare_counts_become_synthetic_entries() {
        let report = audit_with_body(
            r#"{"metadata":{"vulnerabilities":{"critical":1,"high":2,"moderate":0,"low":0}}}"#,
        )
        .await
        .expect("count buckets should parse");

        assert_eq!(report.critical.len(), 1);
        assert_eq!(report.high.len(), 2);
        assert_ne!(report.high[0].id, report.high[1].id);
        assert_eq!(report.critical[0].sources, vec!["npm-audit"]);
    }

    #[tokio::test]
    async fn advisory_lists_keep_ids_and_titles() {
        let report = audit_with_body(
            r#"{"metadata":{"vulnerabilities":{
                "high":[{"id":"GHSA-xxxx","title":"Command injection","cves":["CVE-2024-1"]}],
                "low":["GHSA-yyyy"]
            }}}"#,
        )
        .await
        .expect("list buckets should parse");

        assert_eq!(report.high[0].id, "GHSA-xxxx");
        assert_eq!(report.high[0].title, "Command injection");
        assert_eq!(report.high[0].aliases, vec!["CVE-2024-1"]);
        assert_eq!(report.low[0].id, "GHSA-yyyy");
        assert!(report.critical.is_empty());
    }

    #[tokio::test]
    async fn missing_metadata_is_an_empty_report() {
        let report = audit_with_body("{}").await.expect("empty body parses");
        assert!(report.is_empty());
    }

    #[tokio::test]
    async fn server_errors_are_network_errors() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&mock_server)
            .await;

        let err = NpmAuditSource::with_base_url(Client::new(), mock_server.uri())
            .query(&demo())
            .await
            .expect_err("502 should fail");
        assert_eq!(err.kind(), ErrorKind::Network);
    }
}
