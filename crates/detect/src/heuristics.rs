//! Statistical and co-occurrence heuristics applied to single file contents.

use std::sync::LazyLock;

use guardpkg_core::{Complexity, NetworkIssue};
use regex::Regex;

/// Indicator-per-character ratio above which content counts as obfuscated.
pub const OBFUSCATION_DENSITY_THRESHOLD: f64 = 0.05;
/// Cyclomatic complexity above which a file is reported as complex.
pub const COMPLEXITY_THRESHOLD: u32 = 10;

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("built-in heuristic pattern must compile")
}

static OBFUSCATION_INDICATORS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)\\x[0-9a-f]{2}",
        r"(?i)\\u[0-9a-f]{4}",
        r"(?i)\b_?[a-z0-9]{1,2}\b",
        r"(?i)0x[0-9a-f]+",
        r#"\[['"]\w+['"]\]"#,
        r"(?i)base64|fromCharCode|unescape|\batob\b",
    ]
    .into_iter()
    .map(compile)
    .collect()
});

static URL_LITERAL: LazyLock<Regex> = LazyLock::new(|| compile(r#"https?://[^/"'`\s]+"#));
static SOCKET_CONSTRUCTION: LazyLock<Regex> = LazyLock::new(|| {
    compile(r"new\s+WebSocket\s*\(|new\s+net\.Socket\s*\(|\bnet\.(connect|createConnection)\s*\(")
});
static ENV_ACCESS: LazyLock<Regex> = LazyLock::new(|| compile(r"process\.env\b"));
static NETWORK_PRIMITIVE: LazyLock<Regex> = LazyLock::new(|| {
    compile(
        r#"\bfetch\s*\(|XMLHttpRequest|WebSocket|\baxios\b|\bhttps?\.(request|get)\s*\(|require\(\s*['"](https?|net|request)['"]\s*\)|sendBeacon"#,
    )
});
static DANGEROUS_PERMISSIONS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"fs\.chmod(Sync)?\s*\([^)]*\b(777|666)\b",
        r"fs\.writeFile(Sync)?\s*\([^)]*/(etc|usr|bin)\b",
        r"fs\.unlink(Sync)?\s*\([^)]*/(etc|usr|bin)\b",
    ]
    .into_iter()
    .map(compile)
    .collect()
});
static BRANCHING: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\bif\s*\(",
        r"\belse\s*\{",
        r"\}\s*else\s*\{",
        r"\bfor\s*\(",
        r"\bwhile\s*\(",
        r"\bswitch\s*\(",
        r"\?\s*[^:;?]+\s*:",
        r"&&",
        r"\|\|",
        r"\?\?",
        r"\bfunction\s+\w+\s*\(",
        r"=>\s*\{",
        r"\bcatch\s*\(",
        r"\bcase\s+",
    ]
    .into_iter()
    .map(compile)
    .collect()
});
static FUNCTION_KEYWORD: LazyLock<Regex> = LazyLock::new(|| compile(r"\bfunction\b"));

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObfuscationScore {
    pub indicators: usize,
    pub density: f64,
    pub obfuscated: bool,
}

/// Normalizes indicator counts by non-whitespace length so file size does not skew the result.
pub fn obfuscation_score(content: &str) -> ObfuscationScore {
    let indicators = OBFUSCATION_INDICATORS
        .iter()
        .map(|pattern| pattern.find_iter(content).count())
        .sum::<usize>();
    let code_length = content.chars().filter(|ch| !ch.is_whitespace()).count();
    let density = if code_length == 0 {
        0.0
    } else {
        indicators as f64 / code_length as f64
    };

    ObfuscationScore {
        indicators,
        density,
        obfuscated: indicators > 0 && density > OBFUSCATION_DENSITY_THRESHOLD,
    }
}

pub fn network_issues(content: &str, trusted_domains: &[String]) -> Vec<NetworkIssue> {
    let mut issues = Vec::new();

    let untrusted_host = URL_LITERAL
        .find_iter(content)
        .filter_map(|found| url_host(found.as_str()))
        .find(|host| !is_trusted_host(host, trusted_domains));
    if let Some(host) = untrusted_host {
        issues.push(NetworkIssue::SuspiciousUrl { host });
    }

    if SOCKET_CONSTRUCTION.is_match(content) {
        issues.push(NetworkIssue::SocketConnection);
    }

    if ENV_ACCESS.is_match(content) && NETWORK_PRIMITIVE.is_match(content) {
        issues.push(NetworkIssue::EnvExfiltration);
    }

    issues
}

pub fn has_dangerous_permissions(content: &str) -> bool {
    DANGEROUS_PERMISSIONS
        .iter()
        .any(|pattern| pattern.is_match(content))
}

pub fn complexity(content: &str) -> Complexity {
    let branches = BRANCHING
        .iter()
        .map(|pattern| pattern.find_iter(content).count())
        .sum::<usize>();
    let functions = FUNCTION_KEYWORD.find_iter(content).count();
    let nesting_penalty = if functions > 1 { functions } else { 0 };

    let cyclomatic = u32::try_from(1 + branches + nesting_penalty).unwrap_or(u32::MAX);
    Complexity {
        cyclomatic,
        is_complex: cyclomatic > COMPLEXITY_THRESHOLD,
    }
}

/// Extracts the lowercase host from an `http(s)://` literal.
pub fn url_host(url: &str) -> Option<String> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))?;
    let authority = rest
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();
    let host_port = authority.rsplit('@').next().unwrap_or(authority);
    let host = host_port.split(':').next().unwrap_or(host_port);
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    (!host.is_empty()).then_some(host)
}

/// A host is trusted when it equals a trusted domain or is one of its subdomains.
pub fn is_trusted_host(host: &str, trusted_domains: &[String]) -> bool {
    trusted_domains.iter().any(|domain| {
        let domain = domain.trim().to_ascii_lowercase();
        !domain.is_empty()
            && (host == domain
                || host
                    .strip_suffix(domain.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.')))
    })
}
