//! Configuration conversion utilities for CLI arguments

use crate::cli::main_impl::Cli;
use crate::{AnalyzerKind, ImageMime, PipelineConfig, PipelineConfigBuilder, RefineOptions};
use anyhow::{Context, Result};
use std::time::Duration;

/// Convert CLI arguments to a pipeline configuration
pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Build a `PipelineConfig` from CLI arguments over the environment defaults
    pub(crate) fn from_cli(cli: &Cli) -> Result<PipelineConfig> {
        let mut builder = PipelineConfigBuilder::from_env()
            .max_retries(cli.max_retries)
            .poll_timeout(Duration::from_secs(cli.poll_timeout))
            // A one-shot run never reads from its own cache
            .cache_enabled(false)
            .prefetch_enabled(false);

        if let Some(token) = &cli.api_token {
            builder = builder.api_token(token.trim());
        }
        if let Some(url) = &cli.api_url {
            builder = builder.api_base_url(url.trim());
        }
        if let Some(version) = &cli.model_version {
            builder = builder.model_version(version.trim());
        }
        if cli.inline_analysis {
            builder = builder.analyzer(AnalyzerKind::Inline);
        }

        builder.build().context("Invalid pipeline settings")
    }

    /// Refinement passes requested on the command line
    pub(crate) fn refine_options(cli: &Cli) -> RefineOptions {
        let mut options = RefineOptions::new().dilate(cli.dilate).erode(cli.erode);
        if let Some(radius) = cli.blur {
            options = options.blur(radius);
        }
        if let Some(cutoff) = cli.threshold {
            options = options.threshold(cutoff);
        }
        options
    }

    /// Validate CLI arguments for consistency
    pub(crate) fn validate_cli(cli: &Cli) -> Result<()> {
        if ImageMime::from_path(&cli.input).is_none() {
            anyhow::bail!(
                "Unsupported input '{}'; expected a .jpg, .jpeg, .png or .webp file",
                cli.input.display()
            );
        }
        if !(0.0..=1.0).contains(&cli.opacity) {
            anyhow::bail!("Opacity must be between 0.0 and 1.0, got {}", cli.opacity);
        }
        if let Some(radius) = cli.blur {
            if !radius.is_finite() || radius < 0.0 {
                anyhow::bail!("Blur radius must be a non-negative number, got {radius}");
            }
        }
        if cli.poll_timeout == 0 {
            anyhow::bail!("Poll timeout must be at least 1 second");
        }
        if cli.preview_output.is_some() && cli.preview.is_none() {
            anyhow::bail!("--preview-output requires --preview");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["segmask"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_cli_config_conversion() {
        let cli = parse(&[
            "photo.jpg",
            "--api-url",
            "http://localhost:8080/v1/",
            "--model-version",
            "test-version",
            "--max-retries",
            "5",
            "--poll-timeout",
            "10",
            "--inline-analysis",
        ]);
        let config = CliConfigBuilder::from_cli(&cli).unwrap();

        assert_eq!(config.api_base_url, "http://localhost:8080/v1");
        assert_eq!(config.model_version, "test-version");
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.poll_timeout, Duration::from_secs(10));
        assert_eq!(config.analyzer, AnalyzerKind::Inline);
        assert!(!config.cache_enabled);
    }

    #[test]
    fn test_refine_options() {
        let cli = parse(&["photo.png", "--blur", "1.5", "--dilate", "2", "--threshold", "128"]);
        let options = CliConfigBuilder::refine_options(&cli);

        assert_eq!(options.blur_radius, Some(1.5));
        assert_eq!(options.dilate, 2);
        assert_eq!(options.erode, 0);
        assert_eq!(options.threshold, Some(128));
        assert!(CliConfigBuilder::refine_options(&parse(&["photo.png"])).is_noop());
    }

    #[test]
    fn test_cli_validation() {
        assert!(CliConfigBuilder::validate_cli(&parse(&["photo.webp"])).is_ok());
        assert!(CliConfigBuilder::validate_cli(&parse(&["photo.gif"])).is_err());
        assert!(CliConfigBuilder::validate_cli(&parse(&["photo.png", "--opacity", "1.5"])).is_err());
        assert!(CliConfigBuilder::validate_cli(&parse(&["photo.png", "--blur=-1"])).is_err());
        assert!(
            CliConfigBuilder::validate_cli(&parse(&["photo.png", "--preview-output", "p.png"]))
                .is_err()
        );
        assert!(CliConfigBuilder::validate_cli(&parse(&[
            "photo.png",
            "--preview",
            "side-by-side"
        ]))
        .is_ok());
    }
}
