//! Static detection over extracted package sources: regex rules, malware fingerprints and
//! per-file heuristics.

pub mod heuristics;
pub mod inspector;
pub mod malware;
pub mod patterns;

pub use inspector::{
    DEFAULT_FILE_EXTENSIONS, DEFAULT_MALICIOUS_FILENAMES, DEFAULT_TRUSTED_DOMAINS, FileInspector,
    InspectorOptions, collect_source_files, default_extensions,
};
pub use malware::{MalwareHashRegistry, content_hash};
pub use patterns::{PatternCatalog, PatternMatch};
