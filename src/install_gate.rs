//! Install-block decision for the `preinstall` hook.

use std::env;

use guardpkg_core::AnalysisError;
use serde::Deserialize;

use crate::config::{GuardPkgConfig, validate_score_threshold};

/// Env var npm exposes for `npm config set guardpkg:<key>` values, as JSON.
pub const POLICY_ENV_VAR: &str = "npm_package_config_guardpkg";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstallPolicy {
    pub score_threshold: u8,
    pub block_install: bool,
}

/// npm stores config values as strings, so both shapes are accepted.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Loose<T> {
    Typed(T),
    Text(String),
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawPolicy {
    score_threshold: Option<Loose<i64>>,
    block_install: Option<Loose<bool>>,
}

impl InstallPolicy {
    pub fn from_config(config: &GuardPkgConfig) -> Self {
        Self {
            score_threshold: config.score_threshold,
            block_install: config.block_install,
        }
    }

    /// Reads [`POLICY_ENV_VAR`], falling back to `config` for anything it does not set.
    pub fn resolve(config: &GuardPkgConfig) -> Result<Self, AnalysisError> {
        let raw = env::var(POLICY_ENV_VAR).ok();
        Self::from_env_value(raw.as_deref(), config)
    }

    /// # Errors
    ///
    /// Returns [`AnalysisError::InvalidConfiguration`] for malformed JSON, a non-numeric or
    /// out-of-range threshold, or a non-boolean `blockInstall`.
    pub fn from_env_value(
        raw: Option<&str>,
        config: &GuardPkgConfig,
    ) -> Result<Self, AnalysisError> {
        let mut policy = Self::from_config(config);
        let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
            return Ok(policy);
        };

        let parsed: RawPolicy =
            serde_json::from_str(raw).map_err(|err| AnalysisError::InvalidConfiguration {
                message: format!("{POLICY_ENV_VAR} is not valid JSON: {err}"),
            })?;

        if let Some(threshold) = parsed.score_threshold {
            let value = match threshold {
                Loose::Typed(value) => value,
                Loose::Text(text) => {
                    text.trim()
                        .parse::<i64>()
                        .map_err(|_| AnalysisError::InvalidConfiguration {
                            message: format!("scoreThreshold must be a number, got {text:?}"),
                        })?
                }
            };
            policy.score_threshold = validate_score_threshold(value)?;
        }
        if let Some(block) = parsed.block_install {
            policy.block_install = match block {
                Loose::Typed(value) => value,
                Loose::Text(text) => match text.trim() {
                    "true" => true,
                    "false" => false,
                    other => {
                        return Err(AnalysisError::InvalidConfiguration {
                            message: format!(
                                "blockInstall must be \"true\" or \"false\", got {other:?}"
                            ),
                        });
                    }
                },
            };
        }
        Ok(policy)
    }

    pub fn should_block(&self, score: u8) -> bool {
        self.block_install && score < self.score_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(threshold: u8, block: bool) -> GuardPkgConfig {
        GuardPkgConfig {
            score_threshold: threshold,
            block_install: block,
            ..GuardPkgConfig::default()
        }
    }

    #[test]
    fn falls_back_to_config_without_env_value() {
        let policy = InstallPolicy::from_env_value(None, &config(60, true)).expect("policy");
        assert_eq!(
            policy,
            InstallPolicy {
                score_threshold: 60,
                block_install: true
            }
        );

        let blank = InstallPolicy::from_env_value(Some("  "), &config(60, true)).expect("policy");
        assert_eq!(blank, policy);
    }

    #[test]
    fn env_value_overrides_config() {
        let policy = InstallPolicy::from_env_value(
            Some(r#"{"scoreThreshold": 75, "blockInstall": false}"#),
            &config(50, true),
        )
        .expect("policy");
        assert_eq!(policy.score_threshold, 75);
        assert!(!policy.block_install);
    }

    #[test]
    fn string_values_from_npm_config_are_accepted() {
        let policy = InstallPolicy::from_env_value(
            Some(r#"{"scoreThreshold": "90", "blockInstall": "true"}"#),
            &config(50, false),
        )
        .expect("policy");
        assert_eq!(policy.score_threshold, 90);
        assert!(policy.block_install);
    }

    #[test]
    fn partial_env_value_keeps_remaining_config() {
        let policy =
            InstallPolicy::from_env_value(Some(r#"{"scoreThreshold": 30}"#), &config(50, false))
                .expect("policy");
        assert_eq!(policy.score_threshold, 30);
        assert!(!policy.block_install);
    }

    #[test]
    fn malformed_or_out_of_range_values_are_configuration_errors() {
        for raw in [
            "{not json",
            r#"{"scoreThreshold": 101}"#,
            r#"{"scoreThreshold": -5}"#,
            r#"{"scoreThreshold": "high"}"#,
            r#"{"blockInstall": "maybe"}"#,
        ] {
            let err = InstallPolicy::from_env_value(Some(raw), &config(50, true))
                .expect_err("invalid policy");
            assert_eq!(
                err.kind(),
                guardpkg_core::ErrorKind::InvalidConfiguration,
                "{raw}"
            );
        }
    }

    #[test]
    fn blocks_only_when_enabled_and_below_threshold() {
        let policy = InstallPolicy {
            score_threshold: 50,
            block_install: true,
        };
        assert!(policy.should_block(49));
        assert!(!policy.should_block(50));
        assert!(!policy.should_block(100));

        let permissive = InstallPolicy {
            block_install: false,
            ..policy
        };
        assert!(!permissive.should_block(0));
    }
}
