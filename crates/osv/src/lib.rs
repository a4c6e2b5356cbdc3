use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::env;

use guardpkg_core::{
    AdvisorySource, AnalysisError, PackageRef, Severity, Vulnerability, VulnerabilityReport,
};

const OSV_API_URL: &str = "https://api.osv.dev/v1/query";
const SOURCE_NAME: &str = "osv";

/// OSV.dev advisory lookups for the npm ecosystem.
#[derive(Debug, Clone)]
pub struct OsvAdvisorySource {
    client: Client,
    api_url: String,
}

impl OsvAdvisorySource {
    pub fn new(client: Client) -> Self {
        let api_url =
            env::var("GUARDPKG_OSV_API_BASE_URL").unwrap_or_else(|_| OSV_API_URL.to_string());
        Self::with_api_url(client, api_url)
    }

    pub fn with_api_url(client: Client, api_url: impl Into<String>) -> Self {
        Self {
            client,
            api_url: api_url.into(),
        }
    }
}

#[async_trait]
impl AdvisorySource for OsvAdvisorySource {
    fn name(&self) -> &'static str {
        SOURCE_NAME
    }

    async fn query(&self, package: &PackageRef) -> Result<VulnerabilityReport, AnalysisError> {
        let body = OsvQueryRequest {
            package: OsvPackage {
                name: package.name.clone(),
                ecosystem: "npm".to_string(),
            },
            version: package.version.clone(),
        };

        let response = self
            .client
            .post(&self.api_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AnalysisError::Network {
                message: format!("unable to query OSV advisory API: {e}"),
            })?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(VulnerabilityReport::default());
        }

        if response.status().is_server_error() {
            return Err(AnalysisError::Network {
                message: format!("OSV advisory API server error {}", response.status()),
            });
        }

        if !response.status().is_success() {
            return Err(AnalysisError::Network {
                message: format!("OSV advisory API returned status {}", response.status()),
            });
        }

        let body: OsvQueryResponse =
            response
                .json()
                .await
                .map_err(|e| AnalysisError::InvalidScanResult {
                    message: format!("failed to parse OSV advisory response JSON: {e}"),
                })?;

        let mut report = VulnerabilityReport::default();
        for vuln in body.vulns {
            let severity = vuln.severity();
            let title = vuln.summary.unwrap_or_else(|| vuln.id.clone());
            let mut vulnerability = Vulnerability::new(vuln.id, title, severity, SOURCE_NAME);
            vulnerability.aliases = vuln.aliases;
            report.push(vulnerability);
        }
        Ok(report)
    }
}

#[derive(Debug, Serialize)]
struct OsvQueryRequest {
    package: OsvPackage,
    version: String,
}

#[derive(Debug, Serialize)]
struct OsvPackage {
    name: String,
    ecosystem: String,
}

#[derive(Debug, Deserialize)]
struct OsvQueryResponse {
    #[serde(default)]
    vulns: Vec<OsvVulnerability>,
}

#[derive(Debug, Deserialize)]
struct OsvVulnerability {
    id: String,
    #[serde(default)]
    aliases: Vec<String>,
    summary: Option<String>,
    #[serde(default)]
    database_specific: Option<OsvDatabaseSpecific>,
}

impl OsvVulnerability {
    /// OSV records without a recognised severity label are treated as moderate.
    fn severity(&self) -> Severity {
        self.database_specific
            .as_ref()
            .and_then(|specific| specific.severity.as_deref())
            .and_then(Severity::from_label)
            .unwrap_or(Severity::Medium)
    }
}

#[derive(Debug, Deserialize)]
struct OsvDatabaseSpecific {
    severity: Option<String>,
}
