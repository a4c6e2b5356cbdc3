use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use guardpkg_core::{FileFinding, SuspiciousPattern};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::heuristics;
use crate::malware::{MalwareHashRegistry, content_hash};
use crate::patterns::PatternCatalog;

pub const DEFAULT_FILE_EXTENSIONS: &[&str] = &["js", "json", "ts", "jsx", "tsx", "mjs", "cjs"];

pub const DEFAULT_MALICIOUS_FILENAMES: &[&str] = &[
    "eval.js",
    "crypto-miner.js",
    "mining.js",
    "inject.js",
    "backdoor.js",
    "payload.js",
    "exploit.js",
    "shell.js",
    "hack.js",
    "trojan.js",
    "malware.js",
    "keylogger.js",
    "stealer.js",
    "cipher.js",
    "encrypt.js",
    "decrypt.js",
    "ransom.js",
    "payload.min.js",
    "hidden.js",
    "secret.js",
    "botnet.js",
    "rat.js",
];

pub const DEFAULT_TRUSTED_DOMAINS: &[&str] = &[
    "registry.npmjs.org",
    "npmjs.com",
    "github.com",
    "api.github.com",
    "githubusercontent.com",
    "unpkg.com",
    "cdnjs.cloudflare.com",
];

#[derive(Debug, Clone)]
pub struct InspectorOptions {
    pub trusted_domains: Vec<String>,
    pub malicious_filenames: Vec<String>,
}

impl Default for InspectorOptions {
    fn default() -> Self {
        Self {
            trusted_domains: to_owned_list(DEFAULT_TRUSTED_DOMAINS),
            malicious_filenames: to_owned_list(DEFAULT_MALICIOUS_FILENAMES),
        }
    }
}

impl InspectorOptions {
    /// Built-in lists extended with configured extras.
    pub fn with_extras(trusted_domains: &[String], malicious_filenames: &[String]) -> Self {
        let mut options = Self::default();
        extend_unique(&mut options.trusted_domains, trusted_domains);
        extend_unique(&mut options.malicious_filenames, malicious_filenames);
        options
    }
}

/// Per-file static inspection of an extracted package tree.
#[derive(Debug, Clone)]
pub struct FileInspector {
    catalog: Arc<PatternCatalog>,
    registry: Arc<MalwareHashRegistry>,
    options: InspectorOptions,
    denylist: HashSet<String>,
}

impl FileInspector {
    pub fn new(
        catalog: Arc<PatternCatalog>,
        registry: Arc<MalwareHashRegistry>,
        options: InspectorOptions,
    ) -> Self {
        let denylist = options
            .malicious_filenames
            .iter()
            .map(|name| name.trim().to_ascii_lowercase())
            .filter(|name| !name.is_empty())
            .collect();
        Self {
            catalog,
            registry,
            options,
            denylist,
        }
    }

    pub fn registry(&self) -> &Arc<MalwareHashRegistry> {
        &self.registry
    }

    /// Inspects files in order. A known-malware hit ends the walk early; every other
    /// failure is recorded on that file's finding.
    pub fn inspect(&self, files: &[PathBuf]) -> Vec<FileFinding> {
        self.inspect_with_labels(files.iter().map(|path| (path.as_path(), display_path(path))))
    }

    /// Collects and inspects the tree under `root`, labelling findings with root-relative paths.
    pub fn inspect_tree(&self, root: &Path, extensions: &[String]) -> Vec<FileFinding> {
        let files = collect_source_files(root, extensions);
        debug!(root = %root.display(), files = files.len(), "inspecting package tree");
        self.inspect_with_labels(files.iter().map(|path| {
            let label = path
                .strip_prefix(root)
                .map(display_path)
                .unwrap_or_else(|_| display_path(path));
            (path.as_path(), label)
        }))
    }

    fn inspect_with_labels<'a>(
        &self,
        files: impl Iterator<Item = (&'a Path, String)>,
    ) -> Vec<FileFinding> {
        let mut findings = Vec::new();
        for (path, label) in files {
            let finding = self.inspect_file(path, label);
            let is_malware = finding.is_known_malware;
            findings.push(finding);
            if is_malware {
                break;
            }
        }
        findings
    }

    fn inspect_file(&self, path: &Path, label: String) -> FileFinding {
        let mut finding = FileFinding::new(label);
        finding.suspicious_filename = self.is_denylisted(path);

        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) => {
                debug!(file = %finding.path, error = %err, "file could not be read");
                finding.error = Some(format!("failed to analyze file: {err}"));
                return finding;
            }
        };

        let hash = content_hash(&bytes);
        if self.registry.contains(&hash) {
            warn!(file = %finding.path, hash = %hash, "known malware fingerprint matched");
            finding.content_hash = Some(hash);
            finding.is_known_malware = true;
            return finding;
        }
        finding.content_hash = Some(hash);

        let content = String::from_utf8_lossy(&bytes);

        let mut seen_categories = HashSet::new();
        for found in self.catalog.find_matches(&content) {
            if seen_categories.insert(found.category) {
                finding.patterns.push(SuspiciousPattern {
                    category: found.category,
                    description: found.description.to_string(),
                    severity: found.severity,
                    file: Some(finding.path.clone()),
                    context: Some(found.context),
                });
            }
        }

        let obfuscation = heuristics::obfuscation_score(&content);
        finding.obfuscated = obfuscation.obfuscated;
        finding.obfuscation_density = obfuscation.density;
        finding.network_issues = heuristics::network_issues(&content, &self.options.trusted_domains);
        finding.dangerous_permissions = heuristics::has_dangerous_permissions(&content);
        finding.complexity = Some(heuristics::complexity(&content));

        finding
    }

    fn is_denylisted(&self, path: &Path) -> bool {
        path.file_name()
            .map(|name| name.to_string_lossy().to_ascii_lowercase())
            .is_some_and(|name| self.denylist.contains(&name))
    }
}

/// Regular files under `root` whose extension is in `extensions`, sorted by path.
pub fn collect_source_files(root: &Path, extensions: &[String]) -> Vec<PathBuf> {
    let wanted = extensions
        .iter()
        .map(|extension| extension.trim_start_matches('.').to_ascii_lowercase())
        .collect::<HashSet<_>>();

    let mut files = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .map(|extension| extension.to_string_lossy().to_ascii_lowercase())
                .is_some_and(|extension| wanted.contains(&extension))
        })
        .collect::<Vec<_>>();
    files.sort();
    files
}

pub fn default_extensions() -> Vec<String> {
    to_owned_list(DEFAULT_FILE_EXTENSIONS)
}

fn display_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn to_owned_list(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

fn extend_unique(target: &mut Vec<String>, extras: &[String]) {
    for extra in extras {
        let extra = extra.trim().to_ascii_lowercase();
        if !extra.is_empty() && !target.contains(&extra) {
            target.push(extra);
        }
    }
}
