use guardpkg_core::{Vulnerability, VulnerabilityReport};

/// Merges advisory reports from several sources.
///
/// Two entries describe the same advisory when they share an id or any alias. The merged
/// entry keeps the first id seen, the highest severity and the union of aliases and sources.
pub fn merge<'a, I>(reports: I) -> VulnerabilityReport
where
    I: IntoIterator<Item = &'a VulnerabilityReport>,
{
    let mut merged: Vec<Vulnerability> = Vec::new();

    for vulnerability in reports.into_iter().flat_map(|report| report.iter()) {
        match merged
            .iter_mut()
            .find(|existing| same_advisory(existing, vulnerability))
        {
            Some(existing) => absorb(existing, vulnerability),
            None => merged.push(normalized(vulnerability)),
        }
    }

    let mut report = VulnerabilityReport::default();
    for vulnerability in merged {
        report.push(vulnerability);
    }
    for bucket in [
        &mut report.critical,
        &mut report.high,
        &mut report.moderate,
        &mut report.low,
    ] {
        bucket.sort_by(|left, right| left.id.cmp(&right.id));
    }
    report
}

fn identifiers(vulnerability: &Vulnerability) -> impl Iterator<Item = &str> {
    std::iter::once(vulnerability.id.as_str()).chain(vulnerability.aliases.iter().map(String::as_str))
}

fn same_advisory(left: &Vulnerability, right: &Vulnerability) -> bool {
    identifiers(left).any(|id| identifiers(right).any(|other| other.eq_ignore_ascii_case(id)))
}

fn absorb(existing: &mut Vulnerability, incoming: &Vulnerability) {
    if incoming.severity > existing.severity {
        existing.severity = incoming.severity;
    }
    if existing.title.is_empty() {
        existing.title = incoming.title.clone();
    }
    for id in identifiers(incoming) {
        if !identifiers(existing).any(|known| known.eq_ignore_ascii_case(id)) {
            existing.aliases.push(id.to_string());
        }
    }
    for source in &incoming.sources {
        if !existing.sources.contains(source) {
            existing.sources.push(source.clone());
        }
    }
    existing.aliases.sort();
    existing.sources.sort();
}

fn normalized(vulnerability: &Vulnerability) -> Vulnerability {
    let mut vulnerability = vulnerability.clone();
    vulnerability
        .aliases
        .retain(|alias| !alias.eq_ignore_ascii_case(&vulnerability.id));
    vulnerability.aliases.sort();
    vulnerability.aliases.dedup();
    vulnerability.sources.sort();
    vulnerability.sources.dedup();
    vulnerability
}

#[cfg(test)]
mod tests {
    use super::*;
    use guardpkg_core::Severity;

    fn with_aliases(mut vulnerability: Vulnerability, aliases: &[&str]) -> Vulnerability {
        vulnerability.aliases = aliases.iter().map(|alias| alias.to_string()).collect();
        vulnerability
    }

    #[test]
    fn shared_alias_merges_and_keeps_highest_severity() {
        let mut audit = VulnerabilityReport::default();
        audit.push(with_aliases(
            Vulnerability::new("GHSA-1234", "prototype pollution", Severity::Medium, "npm-audit"),
            &["CVE-2024-0001"],
        ));
        let mut osv = VulnerabilityReport::default();
        osv.push(with_aliases(
            Vulnerability::new("CVE-2024-0001", "prototype pollution", Severity::High, "osv"),
            &[],
        ));

        let merged = merge([&audit, &osv]);
        assert_eq!(merged.total(), 1);
        assert_eq!(merged.high.len(), 1);
        let entry = &merged.high[0];
        assert_eq!(entry.id, "GHSA-1234");
        assert_eq!(entry.sources, vec!["npm-audit".to_string(), "osv".to_string()]);
        assert_eq!(entry.aliases, vec!["CVE-2024-0001".to_string()]);
    }

    #[test]
    fn distinct_advisories_stay_separate_and_sorted() {
        let mut report = VulnerabilityReport::default();
        report.push(Vulnerability::new("B-2", "b", Severity::Critical, "osv"));
        report.push(Vulnerability::new("A-1", "a", Severity::Critical, "osv"));
        report.push(Vulnerability::new("C-3", "c", Severity::Low, "osv"));

        let merged = merge([&report]);
        assert_eq!(merged.total(), 3);
        let ids = merged
            .critical
            .iter()
            .map(|vulnerability| vulnerability.id.as_str())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["A-1", "B-2"]);
    }

    #[test]
    fn empty_sources_produce_empty_buckets() {
        let merged = merge([&VulnerabilityReport::default(), &VulnerabilityReport::default()]);
        assert!(merged.is_empty());
    }

    #[test]
    fn merging_is_order_independent_for_bucket_contents() {
        let mut first = VulnerabilityReport::default();
        first.push(Vulnerability::new("X", "x", Severity::Low, "a"));
        let mut second = VulnerabilityReport::default();
        second.push(Vulnerability::new("X", "x", Severity::Critical, "b"));

        let forward = merge([&first, &second]);
        let backward = merge([&second, &first]);
        assert_eq!(forward.critical.len(), 1);
        assert_eq!(forward, backward);
    }
}
