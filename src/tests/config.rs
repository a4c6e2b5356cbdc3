use super::*;
use guardpkg_core::ErrorKind;
use tempfile::TempDir;

fn write_config(dir: &TempDir, file_name: &str, raw: &str) -> PathBuf {
    let path = dir.path().join(file_name);
    fs::write(&path, raw).expect("write config");
    path
}

fn error_kind(err: &anyhow::Error) -> Option<ErrorKind> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<AnalysisError>())
        .map(AnalysisError::kind)
}

#[test]
fn missing_config_uses_defaults() {
    let dir = TempDir::new().expect("tempdir");
    let config =
        GuardPkgConfig::load_with_paths(Some(dir.path().join("missing.toml")), None)
            .expect("default config");

    assert_eq!(config.score_threshold, DEFAULT_SCORE_THRESHOLD);
    assert!(config.block_install);
    assert!(!config.auto_check);
    assert_eq!(
        config.analysis.max_dependency_depth,
        DEFAULT_MAX_DEPENDENCY_DEPTH
    );
    assert_eq!(config.analysis.fetch_timeout_secs, DEFAULT_FETCH_TIMEOUT_SECS);
    assert_eq!(
        config.analysis.max_concurrent_fetches,
        DEFAULT_MAX_CONCURRENT_FETCHES
    );
    assert!(config.analysis.inspect_dependency_files);
    assert!(config.inspection.file_extensions.contains(&"js".to_string()));
    assert!(config.malware.hashes.is_empty());
    assert!(config.advisories.osv);
}

#[test]
fn parses_config_values_and_lists() {
    let dir = TempDir::new().expect("tempdir");
    let path = write_config(
        &dir,
        "config.toml",
        r#"
score_threshold = 70
block_install = false
auto_check = true

[analysis]
max_dependency_depth = 1
fetch_timeout_secs = 5
max_concurrent_fetches = 2
inspect_dependency_files = false

[inspection]
file_extensions = ["vue"]
trusted_domains = ["CDN.Example.com"]
malicious_filenames = ["grabber.js"]

[malware]
hashes = ["ABCDEF0123"]

[advisories]
osv = false
"#,
    );

    let config = GuardPkgConfig::load_with_paths(Some(path), None).expect("parsed config");

    assert_eq!(config.score_threshold, 70);
    assert!(!config.block_install);
    assert!(config.auto_check);
    assert_eq!(config.analysis.max_dependency_depth, 1);
    assert_eq!(config.analysis.fetch_timeout(), Duration::from_secs(5));
    assert_eq!(config.analysis.max_concurrent_fetches, 2);
    assert!(!config.analysis.inspect_dependency_files);
    assert!(config.inspection.file_extensions.contains(&"vue".to_string()));
    assert!(config.inspection.file_extensions.contains(&"js".to_string()));
    assert!(
        config
            .inspection
            .trusted_domains
            .contains(&"cdn.example.com".to_string())
    );
    assert!(
        config
            .inspection
            .malicious_filenames
            .contains(&"grabber.js".to_string())
    );
    assert_eq!(config.malware.hashes, vec!["abcdef0123"]);
    assert!(!config.advisories.osv);
}

#[test]
fn project_overrides_global_config() {
    let dir = TempDir::new().expect("tempdir");
    let global = write_config(
        &dir,
        "global.toml",
        "score_threshold = 60\nblock_install = false\n[malware]\nhashes = [\"aa\"]\n",
    );
    let project = write_config(
        &dir,
        "project.toml",
        "score_threshold = 85\n[malware]\nhashes = [\"bb\", \"aa\"]\n",
    );

    let config =
        GuardPkgConfig::load_with_paths(Some(global), Some(project)).expect("merged config");

    assert_eq!(config.score_threshold, 85);
    assert!(!config.block_install);
    assert_eq!(config.malware.hashes, vec!["aa", "bb"]);
}

#[test]
fn zero_limits_fall_back_to_defaults() {
    let dir = TempDir::new().expect("tempdir");
    let path = write_config(
        &dir,
        "config.toml",
        "[analysis]\nfetch_timeout_secs = 0\nmax_concurrent_fetches = 0\nmax_dependency_depth = 0\n",
    );

    let config = GuardPkgConfig::load_with_paths(Some(path), None).expect("parsed config");
    assert_eq!(config.analysis.fetch_timeout_secs, DEFAULT_FETCH_TIMEOUT_SECS);
    assert_eq!(
        config.analysis.max_concurrent_fetches,
        DEFAULT_MAX_CONCURRENT_FETCHES
    );
    assert_eq!(config.analysis.max_dependency_depth, 0);
}

#[test]
fn out_of_range_threshold_is_invalid_configuration() {
    let dir = TempDir::new().expect("tempdir");
    for raw in ["score_threshold = 150\n", "score_threshold = -1\n"] {
        let path = write_config(&dir, "config.toml", raw);
        let err = GuardPkgConfig::load_with_paths(Some(path), None)
            .expect_err("threshold outside 0..=100 must fail");
        assert_eq!(error_kind(&err), Some(ErrorKind::InvalidConfiguration));
    }
}

#[test]
fn malformed_toml_reports_the_file() {
    let dir = TempDir::new().expect("tempdir");
    let path = write_config(&dir, "config.toml", "score_threshold = [");

    let err = GuardPkgConfig::load_with_paths(Some(path), None).expect_err("invalid toml");
    assert!(err.to_string().contains("failed to parse config file"));
}

#[test]
fn save_updates_only_requested_keys() {
    let dir = TempDir::new().expect("tempdir");
    let path = write_config(
        &dir,
        "config.toml",
        "block_install = true\n\n[analysis]\nmax_dependency_depth = 2\n",
    );

    save_to_path(
        &path,
        ConfigUpdate {
            score_threshold: Some(75),
            auto_check: Some(true),
            ..ConfigUpdate::default()
        },
    )
    .expect("save config");

    let config = GuardPkgConfig::load_with_paths(Some(path), None).expect("reload");
    assert_eq!(config.score_threshold, 75);
    assert!(config.auto_check);
    assert!(config.block_install);
    assert_eq!(config.analysis.max_dependency_depth, 2);
}

#[test]
fn save_creates_missing_directories() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("nested").join("guardpkg").join("config.toml");

    save_to_path(
        &path,
        ConfigUpdate {
            block_install: Some(false),
            ..ConfigUpdate::default()
        },
    )
    .expect("save config");

    let config = GuardPkgConfig::load_with_paths(Some(path), None).expect("reload");
    assert!(!config.block_install);
}

#[test]
fn save_rejects_out_of_range_threshold() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("config.toml");

    let err = save_to_path(
        &path,
        ConfigUpdate {
            score_threshold: Some(101),
            ..ConfigUpdate::default()
        },
    )
    .expect_err("101 is out of range");
    assert_eq!(error_kind(&err), Some(ErrorKind::InvalidConfiguration));
    assert!(!path.exists());
}
