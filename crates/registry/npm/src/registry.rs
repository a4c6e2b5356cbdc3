use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::env;
use tracing::debug;

use guardpkg_core::{
    AnalysisError, DistInfo, ExtractedPackage, PackageMetadata, PublisherInfo, RegistryClient,
};

use crate::tarball::download_and_extract;
use crate::transport::{decode_error, reqwest_transport_error, status_error};
use crate::version::resolve_version;

pub const DEFAULT_REGISTRY_BASE_URL: &str = "https://registry.npmjs.org";
pub const DEFAULT_DOWNLOADS_API_BASE_URL: &str = "https://api.npmjs.org";

#[derive(Debug, Clone)]
pub struct NpmRegistryClient {
    http: Client,
    base_url: String,
    downloads_api_base_url: String,
}

impl Default for NpmRegistryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl NpmRegistryClient {
    pub fn new() -> Self {
        Self::with_http_client(Client::new())
    }

    pub fn with_http_client(http: Client) -> Self {
        Self {
            http,
            base_url: env::var("GUARDPKG_NPM_REGISTRY_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_REGISTRY_BASE_URL.to_string()),
            downloads_api_base_url: env::var("GUARDPKG_NPM_DOWNLOADS_API_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_DOWNLOADS_API_BASE_URL.to_string()),
        }
    }

    pub fn with_base_urls(
        http: Client,
        base_url: impl Into<String>,
        downloads_api_base_url: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            downloads_api_base_url: downloads_api_base_url.into(),
        }
    }

    pub fn http(&self) -> &Client {
        &self.http
    }

    fn encode_package_name(package: &str) -> String {
        package.replace('@', "%40").replace('/', "%2f")
    }

    fn registry_url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl RegistryClient for NpmRegistryClient {
    async fn fetch_metadata(
        &self,
        package: &str,
        version: &str,
    ) -> Result<PackageMetadata, AnalysisError> {
        let url = self.registry_url(&Self::encode_package_name(package));

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| reqwest_transport_error("unable to query npm registry", &url, e))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(AnalysisError::MetadataNotFound {
                package: package.to_string(),
            });
        }
        if !response.status().is_success() {
            return Err(status_error("npm registry", response.status()));
        }

        let body: NpmPackageResponse = response
            .json()
            .await
            .map_err(|e| decode_error("npm registry", e))?;

        let latest = body
            .dist_tags
            .get("latest")
            .cloned()
            .ok_or_else(|| AnalysisError::InvalidScanResult {
                message: format!("missing dist-tags.latest for {package}"),
            })?;

        let resolved = resolve_version(
            version,
            &body.dist_tags,
            body.versions.keys().map(String::as_str),
        )
        .ok_or_else(|| AnalysisError::MetadataNotFound {
            package: format!("{package}@{version}"),
        })?;
        debug!(package, requested = version, resolved = %resolved, "resolved version");

        let published = body
            .time
            .get(&resolved)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|value| value.with_timezone(&Utc));

        let mut versions = body.versions;
        let metadata = versions
            .remove(&resolved)
            .ok_or_else(|| AnalysisError::MetadataNotFound {
                package: format!("{package}@{resolved}"),
            })?;

        Ok(metadata.into_package_metadata(package, resolved, latest, published))
    }

    async fn fetch_publisher(&self, username: &str) -> Result<Option<PublisherInfo>, AnalysisError> {
        let url = self.registry_url(&format!(
            "-/user/org.couchdb.user:{}",
            Self::encode_package_name(username)
        ));

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| reqwest_transport_error("unable to query npm user API", &url, e))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(status_error("npm user API", response.status()));
        }

        let body: NpmUserResponse = response
            .json()
            .await
            .map_err(|e| decode_error("npm user", e))?;

        Ok(Some(PublisherInfo {
            username: body.name.unwrap_or_else(|| username.to_string()),
            verified: body.verified.unwrap_or(false),
            created: body
                .created
                .as_deref()
                .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                .map(|value| value.with_timezone(&Utc)),
            package_count: body.packages.map(PackageCount::count).unwrap_or(0),
        }))
    }

    async fn fetch_monthly_downloads(&self, package: &str) -> Result<u64, AnalysisError> {
        let url = format!(
            "{}/downloads/point/last-month/{}",
            self.downloads_api_base_url.trim_end_matches('/'),
            Self::encode_package_name(package)
        );

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| reqwest_transport_error("unable to query npm downloads API", &url, e))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(0);
        }
        if !response.status().is_success() {
            return Err(status_error("npm downloads API", response.status()));
        }

        let body: NpmDownloadsResponse = response
            .json()
            .await
            .map_err(|e| decode_error("npm downloads", e))?;
        Ok(body.downloads.unwrap_or(0))
    }

    async fn download_package(
        &self,
        metadata: &PackageMetadata,
    ) -> Result<ExtractedPackage, AnalysisError> {
        download_and_extract(&self.http, metadata).await
    }
}

#[derive(Debug, Deserialize)]
struct NpmPackageResponse {
    #[serde(rename = "dist-tags", default)]
    dist_tags: BTreeMap<String, String>,
    #[serde(default)]
    versions: BTreeMap<String, NpmVersionMetadata>,
    #[serde(default)]
    time: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NpmVersionMetadata {
    description: Option<String>,
    author: Option<NpmPerson>,
    license: Option<NpmLicense>,
    #[serde(default)]
    maintainers: Vec<NpmPerson>,
    #[serde(default)]
    scripts: BTreeMap<String, String>,
    #[serde(default)]
    dependencies: BTreeMap<String, String>,
    #[serde(default)]
    dev_dependencies: BTreeMap<String, String>,
    #[serde(default)]
    peer_dependencies: BTreeMap<String, String>,
    #[serde(default)]
    dist: NpmDist,
}

impl NpmVersionMetadata {
    fn into_package_metadata(
        self,
        name: &str,
        version: String,
        latest: String,
        published: Option<DateTime<Utc>>,
    ) -> PackageMetadata {
        PackageMetadata {
            name: name.to_string(),
            version,
            latest,
            description: self.description,
            author: self.author.and_then(NpmPerson::into_name),
            license: self.license.and_then(NpmLicense::into_label),
            maintainers: self
                .maintainers
                .into_iter()
                .filter_map(NpmPerson::into_name)
                .collect(),
            scripts: self.scripts,
            dependencies: self.dependencies,
            dev_dependencies: self.dev_dependencies,
            peer_dependencies: self.peer_dependencies,
            published,
            dist: DistInfo {
                tarball: self.dist.tarball,
                size: self.dist.size,
                file_count: self.dist.file_count,
                files: self.dist.files,
            },
        }
    }
}

/// `author` and `maintainers` entries are either `"Name <mail>"` strings or objects.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NpmPerson {
    Text(String),
    Object { name: Option<String> },
}

impl NpmPerson {
    fn into_name(self) -> Option<String> {
        let raw = match self {
            Self::Text(text) => text,
            Self::Object { name } => name?,
        };
        let name = raw
            .split(['<', '('])
            .next()
            .unwrap_or_default()
            .trim()
            .to_string();
        (!name.is_empty()).then_some(name)
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NpmLicense {
    Text(String),
    Object {
        #[serde(rename = "type")]
        kind: Option<String>,
    },
}

impl NpmLicense {
    fn into_label(self) -> Option<String> {
        match self {
            Self::Text(text) => Some(text),
            Self::Object { kind } => kind,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NpmDist {
    tarball: Option<String>,
    #[serde(alias = "unpackedSize")]
    size: Option<u64>,
    file_count: Option<u64>,
    #[serde(default)]
    files: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct NpmUserResponse {
    name: Option<String>,
    verified: Option<bool>,
    created: Option<String>,
    packages: Option<PackageCount>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PackageCount {
    Count(usize),
    List(Vec<serde_json::Value>),
}

impl PackageCount {
    fn count(self) -> usize {
        match self {
            Self::Count(count) => count,
            Self::List(list) => list.len(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct NpmDownloadsResponse {
    downloads: Option<u64>,
}

#[cfg(test)]
#[path = "tests/registry.rs"]
mod tests;
