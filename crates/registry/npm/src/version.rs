//! Resolution of requested versions (tags, exact versions, npm ranges) against the
//! versions a package has published.

use std::collections::BTreeMap;

use semver::{Version, VersionReq};

const COMPARISON_OPERATORS: &[&str] = &[">=", "<=", ">", "<", "=", "^", "~"];

/// Picks the published version a request refers to.
///
/// Tags resolve through `dist_tags`; everything else is treated as an exact version
/// first and then as a range, taking the highest satisfying version.
pub fn resolve_version<'a, I>(
    requested: &str,
    dist_tags: &BTreeMap<String, String>,
    published: I,
) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let requested = requested.trim();
    let requested = if requested.is_empty() || requested == "*" || requested == "x" {
        "latest"
    } else {
        requested
    };

    let published = published.into_iter().collect::<Vec<_>>();

    if let Some(tagged) = dist_tags.get(requested) {
        return published
            .contains(&tagged.as_str())
            .then(|| tagged.clone());
    }

    let exact = requested.trim_start_matches(['v', '=']);
    if published.contains(&exact) {
        return Some(exact.to_string());
    }

    let alternatives = parse_range(requested)?;
    published
        .iter()
        .filter_map(|raw| Version::parse(raw).ok().map(|version| (version, *raw)))
        .filter(|(version, _)| alternatives.iter().any(|req| req.matches(version)))
        .max_by(|(left, _), (right, _)| left.cmp(right))
        .map(|(_, raw)| raw.to_string())
}

/// Parses an npm range into `||`-separated alternatives.
pub fn parse_range(raw: &str) -> Option<Vec<VersionReq>> {
    raw.split("||")
        .map(|alternative| VersionReq::parse(&normalize_alternative(alternative)).ok())
        .collect()
}

fn normalize_alternative(alternative: &str) -> String {
    let tokens = alternative.split_whitespace().collect::<Vec<_>>();

    if let [low, "-", high] = tokens.as_slice() {
        return format!(">={low}, <={high}");
    }
    if tokens.is_empty() {
        return "*".to_string();
    }

    let mut comparators = Vec::new();
    let mut pending_operator: Option<&str> = None;
    for token in tokens {
        if COMPARISON_OPERATORS.contains(&token) {
            pending_operator = Some(token);
            continue;
        }
        let token = token.trim_start_matches('v');
        match pending_operator.take() {
            Some(operator) => comparators.push(format!("{operator}{token}")),
            None => comparators.push(token.to_string()),
        }
    }
    comparators.join(", ")
}
