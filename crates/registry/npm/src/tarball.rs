use std::fs::File;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use guardpkg_core::{AnalysisError, ExtractedPackage, PackageMetadata};
use reqwest::Client;
use tar::Archive;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::transport::{reqwest_transport_error, status_error};

const ARCHIVE_NAME: &str = "package.tgz";
const EXTRACT_DIR: &str = "extracted";

/// Streams the version's tarball into a temp workspace and unpacks it there.
///
/// The archive is deleted once extracted; the unpacked tree lives until the returned
/// [`ExtractedPackage`] is dropped.
pub async fn download_and_extract(
    http: &Client,
    metadata: &PackageMetadata,
) -> Result<ExtractedPackage, AnalysisError> {
    let package = metadata.package_ref().to_string();
    let tarball_url = metadata
        .dist
        .tarball
        .as_deref()
        .ok_or_else(|| AnalysisError::ExtractionFailure {
            package: package.clone(),
            message: "registry metadata has no tarball url".to_string(),
        })?;

    let workspace = TempDir::new().map_err(|e| extraction_failure(&package, e))?;
    let archive_path = workspace.path().join(ARCHIVE_NAME);

    let mut response = http
        .get(tarball_url)
        .send()
        .await
        .map_err(|e| reqwest_transport_error("unable to download package tarball", tarball_url, e))?;
    if !response.status().is_success() {
        return Err(status_error("package tarball download", response.status()));
    }

    let mut archive = tokio::fs::File::create(&archive_path)
        .await
        .map_err(|e| extraction_failure(&package, e))?;
    let mut written = 0_u64;
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| reqwest_transport_error("unable to read package tarball", tarball_url, e))?
    {
        archive
            .write_all(&chunk)
            .await
            .map_err(|e| extraction_failure(&package, e))?;
        written += chunk.len() as u64;
    }
    archive
        .flush()
        .await
        .map_err(|e| extraction_failure(&package, e))?;
    drop(archive);
    debug!(package = %package, bytes = written, "tarball downloaded");

    let extract_root = workspace.path().join(EXTRACT_DIR);
    let unpack_archive = archive_path.clone();
    let unpack_root = extract_root.clone();
    tokio::task::spawn_blocking(move || unpack(&unpack_archive, &unpack_root))
        .await
        .map_err(|e| extraction_failure(&package, e))?
        .map_err(|e| extraction_failure(&package, e))?;

    tokio::fs::remove_file(&archive_path)
        .await
        .map_err(|e| extraction_failure(&package, e))?;

    Ok(ExtractedPackage::new(workspace, extract_root))
}

/// Unpacks a gzipped tarball into `destination`, creating it when missing.
pub fn unpack(archive: &Path, destination: &Path) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(destination)?;
    let file = File::open(archive)?;
    let mut archive = Archive::new(GzDecoder::new(file));
    archive.set_preserve_permissions(false);
    archive.unpack(destination)?;
    Ok(destination.to_path_buf())
}

fn extraction_failure(package: &str, error: impl std::fmt::Display) -> AnalysisError {
    AnalysisError::ExtractionFailure {
        package: package.to_string(),
        message: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use guardpkg_core::ErrorKind;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn tarball(files: &[(&str, &str)]) -> Vec<u8> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, content) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, name, content.as_bytes())
                .expect("append tar entry");
        }
        builder
            .into_inner()
            .expect("finish tar")
            .finish()
            .expect("finish gzip")
    }

    fn metadata_for(url: Option<String>) -> PackageMetadata {
        let mut metadata = PackageMetadata {
            name: "demo".to_string(),
            version: "1.0.0".to_string(),
            ..PackageMetadata::default()
        };
        metadata.dist.tarball = url;
        metadata
    }

    #[tokio::test]
    async fn downloads_and_extracts_then_removes_archive() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/demo/-/demo-1.0.0.tgz"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(tarball(&[
                ("package/package.json", r#"{"name":"demo"}"#),
                ("package/index.js", "module.exports = 1;"),
            ])))
            .mount(&mock_server)
            .await;

        let metadata = metadata_for(Some(format!(
            "{}/demo/-/demo-1.0.0.tgz",
            mock_server.uri()
        )));
        let extracted = download_and_extract(&Client::new(), &metadata)
            .await
            .expect("tarball should extract");

        assert!(extracted.root().join("package/index.js").is_file());
        let workspace = extracted
            .root()
            .parent()
            .expect("extract dir has a parent")
            .to_path_buf();
        assert!(!workspace.join(ARCHIVE_NAME).exists());

        drop(extracted);
        assert!(!workspace.exists());
    }

    #[tokio::test]
    async fn corrupt_archive_is_an_extraction_failure() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/broken.tgz"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"not a tarball".to_vec()))
            .mount(&mock_server)
            .await;

        let metadata = metadata_for(Some(format!("{}/broken.tgz", mock_server.uri())));
        let err = download_and_extract(&Client::new(), &metadata)
            .await
            .expect_err("garbage should not extract");
        assert_eq!(err.kind(), ErrorKind::ExtractionFailure);
    }

    #[tokio::test]
    async fn missing_tarball_url_is_an_extraction_failure() {
        let err = download_and_extract(&Client::new(), &metadata_for(None))
            .await
            .expect_err("no url");
        assert_eq!(err.kind(), ErrorKind::ExtractionFailure);
    }

    #[tokio::test]
    async fn tarball_http_error_is_a_network_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&mock_server)
            .await;

        let metadata = metadata_for(Some(format!("{}/demo.tgz", mock_server.uri())));
        let err = download_and_extract(&Client::new(), &metadata)
            .await
            .expect_err("503 should fail");
        assert_eq!(err.kind(), ErrorKind::Network);
    }
}
