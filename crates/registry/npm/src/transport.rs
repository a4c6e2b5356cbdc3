use std::error::Error as StdError;

use guardpkg_core::AnalysisError;

/// Converts a reqwest failure into a network error that records the URL, error kinds and
/// the first few entries of the source chain.
pub fn reqwest_transport_error(
    context: &str,
    request_url: &str,
    error: reqwest::Error,
) -> AnalysisError {
    let mut details = Vec::new();

    let effective_url = error
        .url()
        .map(|url| url.as_str().to_string())
        .unwrap_or_else(|| request_url.to_string());
    details.push(format!("request_url={effective_url}"));

    let mut kinds = Vec::new();
    if error.is_timeout() {
        kinds.push("timeout");
    }
    if error.is_connect() {
        kinds.push("connect");
    }
    if error.is_request() {
        kinds.push("request");
    }
    if error.is_body() {
        kinds.push("body");
    }
    if error.is_decode() {
        kinds.push("decode");
    }
    if error.is_redirect() {
        kinds.push("redirect");
    }
    if let Some(status) = error.status() {
        details.push(format!("http_status={status}"));
    }
    if kinds.is_empty() {
        kinds.push("unknown");
    }
    details.push(format!("kinds={}", kinds.join(",")));

    let mut sources = Vec::new();
    let mut current = error.source();
    while let Some(source) = current {
        sources.push(source.to_string());
        if sources.len() >= 4 {
            break;
        }
        current = source.source();
    }
    if !sources.is_empty() {
        details.push(format!("source_chain={}", sources.join(" | ")));
    }

    AnalysisError::Network {
        message: format!("{context}: {error} ({})", details.join("; ")),
    }
}

pub fn status_error(context: &str, status: reqwest::StatusCode) -> AnalysisError {
    AnalysisError::Network {
        message: format!("{context} returned status {status}"),
    }
}

pub fn decode_error(context: &str, error: impl std::fmt::Display) -> AnalysisError {
    AnalysisError::InvalidScanResult {
        message: format!("failed to parse {context} response JSON: {error}"),
    }
}
