//! Declarative regex rule table for suspicious source patterns.

use std::sync::{Arc, LazyLock};

use guardpkg_core::{PatternCategory, Severity};
use regex::Regex;

type RuleSpec = (PatternCategory, &'static str, &'static str);

/// Bytes of surrounding source kept on each side of a match.
const CONTEXT_RADIUS: usize = 40;

const BUILTIN_RULES: &[RuleSpec] = &[
    // code execution
    (PatternCategory::CodeExecution, r"\beval\s*\(", "eval() call"),
    (
        PatternCategory::CodeExecution,
        r"new\s+Function\s*\(",
        "dynamic Function constructor",
    ),
    (
        PatternCategory::CodeExecution,
        r#"require\(\s*['"]child_process['"]\s*\)"#,
        "child_process import",
    ),
    (
        PatternCategory::CodeExecution,
        r"\b(execSync|spawnSync|execFileSync)\s*\(",
        "synchronous process spawn",
    ),
    (
        PatternCategory::CodeExecution,
        r#"\bset(Timeout|Interval)\s*\(\s*['"`]"#,
        "string-evaluated timer",
    ),
    // data exfiltration
    (
        PatternCategory::DataExfiltration,
        r"navigator\.sendBeacon",
        "beacon upload",
    ),
    (
        PatternCategory::DataExfiltration,
        r#"require\(\s*['"](https?|net|dgram|request|axios)['"]\s*\)"#,
        "network module import",
    ),
    (
        PatternCategory::DataExfiltration,
        r"document\.cookie",
        "cookie access",
    ),
    (
        PatternCategory::DataExfiltration,
        r"discord(app)?\.com/api/webhooks|webhook\.site|pastebin\.com|ngrok\.io",
        "known exfiltration endpoint",
    ),
    // obfuscation
    (
        PatternCategory::Obfuscation,
        r#"\[['"]\w+['"]\]\[['"]\w+['"]\]"#,
        "nested bracket notation",
    ),
    (
        PatternCategory::Obfuscation,
        r"String\.fromCharCode\s*\(\s*\d+(\s*,\s*\d+)+",
        "character code array",
    ),
    (
        PatternCategory::Obfuscation,
        r"\b(atob|btoa)\s*\(",
        "base64 decoding",
    ),
    (
        PatternCategory::Obfuscation,
        r#"Buffer\.from\s*\([^)]*,\s*['"](base64|hex)['"]"#,
        "buffer-decoded payload",
    ),
    (
        PatternCategory::Obfuscation,
        r"(\\x[0-9a-fA-F]{2}){8,}",
        "long hex escape sequence",
    ),
    (
        PatternCategory::Obfuscation,
        r"\b_0x[0-9a-fA-F]{4,}\b",
        "obfuscator-style identifiers",
    ),
    (
        PatternCategory::Obfuscation,
        r"[A-Za-z0-9+/]{200,}={0,2}",
        "large encoded blob",
    ),
    // system access
    (
        PatternCategory::SystemAccess,
        r"process\.binding\s*\(",
        "native binding access",
    ),
    (
        PatternCategory::SystemAccess,
        r#"require\(\s*['"](sudo-prompt|systeminformation|registry-js)['"]\s*\)"#,
        "privileged system module",
    ),
    (
        PatternCategory::SystemAccess,
        r"/etc/(passwd|shadow|sudoers)",
        "sensitive system file path",
    ),
    (
        PatternCategory::SystemAccess,
        r"\.ssh/|\bid_rsa\b|\.npmrc\b|\.aws/credentials",
        "credential file access",
    ),
    // crypto mining
    (
        PatternCategory::CryptoMining,
        r"stratum\+(tcp|ssl)://",
        "mining pool protocol",
    ),
    (
        PatternCategory::CryptoMining,
        r"(?i)\b(coinhive|cryptonight|xmrig|minergate|nicehash)\b",
        "known miner",
    ),
    (
        PatternCategory::CryptoMining,
        r"(?i)pool\.supportxmr|mining-pool|\bhashrate\b|\bminerAddress\b",
        "mining configuration",
    ),
    // persistence
    (
        PatternCategory::Persistence,
        r"[/~]\.(bashrc|bash_profile|zshrc)\b|/\.profile\b",
        "shell profile modification",
    ),
    (
        PatternCategory::Persistence,
        r"\bcrontab\b",
        "cron job installation",
    ),
    (
        PatternCategory::Persistence,
        r"\bsystemctl\s+enable\b|\blaunchctl\s+load\b",
        "service registration",
    ),
    (
        PatternCategory::Persistence,
        r"(?i)CurrentVersion\\+Run|\breg\s+add\b",
        "windows autorun registration",
    ),
    // anti-debugging
    (
        PatternCategory::AntiDebugging,
        r"\bdebugger\s*;",
        "debugger statement",
    ),
    (
        PatternCategory::AntiDebugging,
        r"console\s*\.\s*clear\s*\(",
        "console clearing",
    ),
    (
        PatternCategory::AntiDebugging,
        r"chrome\s*\.\s*debugger|process\.execArgv",
        "debugger detection",
    ),
    // fingerprinting
    (
        PatternCategory::Fingerprinting,
        r"navigator\.(userAgent|platform|hardwareConcurrency|languages?)",
        "browser fingerprinting",
    ),
    (
        PatternCategory::Fingerprinting,
        r#"canvas\.toDataURL|getContext\s*\(\s*['"]webgl"#,
        "canvas fingerprinting",
    ),
    (
        PatternCategory::Fingerprinting,
        r"\bos\.(hostname|userInfo|networkInterfaces)\s*\(",
        "host identity collection",
    ),
    // known exploits
    (
        PatternCategory::KnownExploits,
        r#"\.__proto__\b|\[\s*['"]__proto__['"]\s*\]"#,
        "prototype pollution",
    ),
    (
        PatternCategory::KnownExploits,
        r#"constructor\.prototype|\[\s*['"]constructor['"]\s*\]"#,
        "constructor prototype access",
    ),
    (
        PatternCategory::KnownExploits,
        r"Object\.prototype\.\w+\s*=[^=]",
        "Object.prototype mutation",
    ),
    (
        PatternCategory::KnownExploits,
        r"Buffer\.allocUnsafe\s*\(",
        "uninitialized buffer allocation",
    ),
    (
        PatternCategory::KnownExploits,
        r"vm\.runIn(New|This)?Context\s*\(",
        "vm context escape",
    ),
];

static BUILTIN_CATALOG: LazyLock<Arc<PatternCatalog>> = LazyLock::new(|| {
    Arc::new(
        PatternCatalog::from_specs(BUILTIN_RULES).expect("built-in pattern table must compile"),
    )
});

#[derive(Debug)]
pub struct PatternRule {
    pub category: PatternCategory,
    pub pattern: Regex,
    pub description: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternMatch {
    pub category: PatternCategory,
    pub description: &'static str,
    pub severity: Severity,
    /// Source around the first occurrence.
    pub context: String,
}

/// Immutable set of compiled rules, evaluated rule by rule.
#[derive(Debug)]
pub struct PatternCatalog {
    rules: Vec<PatternRule>,
}

impl PatternCatalog {
    /// Shared catalog compiled from the built-in rule table on first use.
    pub fn builtin() -> Arc<PatternCatalog> {
        Arc::clone(&BUILTIN_CATALOG)
    }

    pub fn from_specs(specs: &[RuleSpec]) -> Result<Self, regex::Error> {
        let rules = specs
            .iter()
            .map(|(category, pattern, description)| {
                Ok(PatternRule {
                    category: *category,
                    pattern: Regex::new(pattern)?,
                    description,
                })
            })
            .collect::<Result<Vec<_>, regex::Error>>()?;
        Ok(Self { rules })
    }

    /// Returns one match per rule that fires, however many times it occurs.
    pub fn find_matches(&self, content: &str) -> Vec<PatternMatch> {
        self.rules
            .iter()
            .filter_map(|rule| {
                let found = rule.pattern.find(content)?;
                Some(PatternMatch {
                    category: rule.category,
                    description: rule.description,
                    severity: rule.category.severity(),
                    context: context_snippet(content, found.start(), found.end()),
                })
            })
            .collect()
    }

    pub fn rules(&self) -> &[PatternRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Up to [`CONTEXT_RADIUS`] bytes either side of `start..end`, widened to char boundaries,
/// with runs of whitespace collapsed.
fn context_snippet(content: &str, start: usize, end: usize) -> String {
    let mut from = start.saturating_sub(CONTEXT_RADIUS);
    while !content.is_char_boundary(from) {
        from -= 1;
    }
    let mut to = end.saturating_add(CONTEXT_RADIUS).min(content.len());
    while !content.is_char_boundary(to) {
        to += 1;
    }
    content[from..to].split_whitespace().collect::<Vec<_>>().join(" ")
}
