//! CLI entrypoint for analyzing npm packages and gating their installation.

mod analyzer;
mod config;
mod dependency_walker;
mod install_gate;
mod report;

use std::process::ExitCode;

use analyzer::PackageAnalyzer;
use clap::{Parser, Subcommand};
use config::{ConfigUpdate, GuardPkgConfig};
use guardpkg_core::{AnalysisError, ErrorKind};
use install_gate::InstallPolicy;
use tracing::level_filters::LevelFilter;

const EXIT_SECURITY_FAIL: u8 = 1;
const EXIT_CONFIG_ERROR: u8 = 2;
const EXIT_NETWORK_ERROR: u8 = 3;

#[derive(Parser)]
#[command(
    name = "guardpkg",
    version,
    about = "Pre-install risk scoring for npm packages"
)]
struct Cli {
    /// Log every analysis stage to stderr
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze an npm package and print its risk report
    Analyze {
        package: String,
        /// Show dependencies, metrics and per-file findings
        #[arg(short, long)]
        detailed: bool,
        /// Print only the 0-100 score
        #[arg(short, long, conflicts_with = "json")]
        score_only: bool,
        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
        /// Version, dist-tag or semver range to analyze
        #[arg(short = 'v', long = "version", default_value = "latest")]
        version: String,
    },
    /// Persist settings into the global config file
    Config {
        #[arg(long)]
        auto_check: Option<bool>,
        #[arg(long, value_parser = clap::value_parser!(i64))]
        score_threshold: Option<i64>,
        #[arg(long)]
        block_install: Option<bool>,
    },
    /// Decide whether installing a package should be blocked
    Preinstall {
        package: String,
        #[arg(short = 'v', long = "version", default_value = "latest")]
        version: String,
        /// Skip the check and allow the install
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // stdout carries reports and JSON; logs go to stderr.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_max_level(if cli.verbose {
            LevelFilter::DEBUG
        } else {
            LevelFilter::WARN
        })
        .init();

    match run(cli.command).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{}: {err:#}", error_label(&err));
            ExitCode::from(exit_code_for(&err))
        }
    }
}

async fn run(command: Commands) -> anyhow::Result<ExitCode> {
    match command {
        Commands::Analyze {
            package,
            detailed,
            score_only,
            json,
            version,
        } => {
            let config = load_config()?;
            let analyzer = PackageAnalyzer::from_config(&config);
            let report = analyzer.analyze(&package, &version).await?;

            let rendered = if json {
                report::render_json(&report)?
            } else if score_only {
                report::render_score(&report)
            } else {
                report::render_text(&report, detailed)
            };
            println!("{rendered}");
            Ok(ExitCode::SUCCESS)
        }
        Commands::Config {
            auto_check,
            score_threshold,
            block_install,
        } => {
            let update = ConfigUpdate {
                auto_check,
                score_threshold: score_threshold
                    .map(config::validate_score_threshold)
                    .transpose()?,
                block_install,
            };
            if update.is_empty() {
                println!("No configuration changes made");
                return Ok(ExitCode::SUCCESS);
            }

            let path = GuardPkgConfig::save(update)?;
            println!("Configuration updated ({}):", path.display());
            if let Some(value) = update.auto_check {
                println!("- Auto-check: {value}");
            }
            if let Some(value) = update.score_threshold {
                println!("- Score threshold: {value}");
            }
            if let Some(value) = update.block_install {
                println!("- Block install: {value}");
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Preinstall {
            package,
            version,
            force,
        } => {
            if force {
                eprintln!("Force install requested, skipping security check for {package}");
                return Ok(ExitCode::SUCCESS);
            }

            let config = load_config()?;
            let policy = InstallPolicy::resolve(&config)?;
            let report = PackageAnalyzer::from_config(&config)
                .analyze(&package, &version)
                .await?;

            let score = report.score.value;
            if policy.should_block(score) {
                eprintln!(
                    "Security warning for {}: score {score}/100 is below the threshold of {}",
                    report.package, policy.score_threshold
                );
                for deduction in &report.score.deductions {
                    eprintln!("- {} (-{})", deduction.reason, deduction.points);
                }
                eprintln!("To install anyway, rerun with --force");
                return Ok(ExitCode::from(EXIT_SECURITY_FAIL));
            }

            println!(
                "{} passed security check (score {score}/100)",
                report.package
            );
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Config files that fail to load are configuration errors regardless of cause.
fn load_config() -> anyhow::Result<GuardPkgConfig> {
    GuardPkgConfig::load().map_err(|err| {
        if analysis_error(&err).is_some() {
            err
        } else {
            anyhow::Error::new(AnalysisError::InvalidConfiguration {
                message: format!("{err:#}"),
            })
        }
    })
}

fn analysis_error(err: &anyhow::Error) -> Option<&AnalysisError> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<AnalysisError>())
}

fn exit_code_for(err: &anyhow::Error) -> u8 {
    match analysis_error(err).map(AnalysisError::kind) {
        Some(ErrorKind::InvalidConfiguration) => EXIT_CONFIG_ERROR,
        Some(ErrorKind::Network) => EXIT_NETWORK_ERROR,
        _ => EXIT_SECURITY_FAIL,
    }
}

fn error_label(err: &anyhow::Error) -> &'static str {
    match exit_code_for(err) {
        EXIT_CONFIG_ERROR => "Configuration error",
        EXIT_NETWORK_ERROR => "Network error",
        _ => "Security check failed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn analyze_flags_parse() {
        let cli = Cli::try_parse_from([
            "guardpkg",
            "--verbose",
            "analyze",
            "left-pad",
            "--detailed",
            "-v",
            "^1.2.0",
        ])
        .expect("parse");
        assert!(cli.verbose);
        match cli.command {
            Commands::Analyze {
                package,
                detailed,
                version,
                json,
                score_only,
            } => {
                assert_eq!(package, "left-pad");
                assert!(detailed);
                assert_eq!(version, "^1.2.0");
                assert!(!json && !score_only);
            }
            _ => panic!("expected analyze"),
        }
    }

    #[test]
    fn score_only_conflicts_with_json() {
        assert!(
            Cli::try_parse_from(["guardpkg", "analyze", "x", "--json", "--score-only"]).is_err()
        );
    }

    #[test]
    fn error_kinds_map_to_exit_codes() {
        let network = anyhow::Error::new(AnalysisError::Network {
            message: "reset".to_string(),
        });
        assert_eq!(exit_code_for(&network), EXIT_NETWORK_ERROR);

        let config = anyhow::Error::new(AnalysisError::InvalidConfiguration {
            message: "bad".to_string(),
        })
        .context("while loading");
        assert_eq!(exit_code_for(&config), EXIT_CONFIG_ERROR);

        let wrapped = anyhow::Error::new(AnalysisError::wrap(
            "pkg",
            AnalysisError::MetadataNotFound {
                package: "pkg".to_string(),
            },
        ));
        assert_eq!(exit_code_for(&wrapped), EXIT_SECURITY_FAIL);

        let other = anyhow::anyhow!("unexpected");
        assert_eq!(exit_code_for(&other), EXIT_SECURITY_FAIL);
    }
}
