use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(super) struct ConfigOverlay {
    /// Signed so negative values reach range validation.
    pub score_threshold: Option<i64>,
    pub block_install: Option<bool>,
    pub auto_check: Option<bool>,
    pub analysis: Option<AnalysisOverlay>,
    pub inspection: Option<InspectionOverlay>,
    pub malware: Option<MalwareOverlay>,
    pub advisories: Option<AdvisoriesOverlay>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub(super) struct AnalysisOverlay {
    pub max_dependency_depth: Option<usize>,
    pub fetch_timeout_secs: Option<u64>,
    pub max_concurrent_fetches: Option<usize>,
    pub inspect_dependency_files: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub(super) struct InspectionOverlay {
    pub file_extensions: Option<Vec<String>>,
    pub trusted_domains: Option<Vec<String>>,
    pub malicious_filenames: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub(super) struct MalwareOverlay {
    pub hashes: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub(super) struct AdvisoriesOverlay {
    pub osv: Option<bool>,
}
