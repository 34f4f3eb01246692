//! segmask command-line tool
//!
//! Generates a mask for a single image, optionally refines it and renders a preview.

use super::config::CliConfigBuilder;
use crate::{
    encode_data_url,
    preview::{render_preview, PreviewMode, PreviewOptions},
    tracing_config::{init_cli_tracing, TracingFormat},
    ImageMime, MaskGenerator, MaskResult, SegmentationError,
};
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use image::{ImageFormat, RgbaImage};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Background-removal mask generator
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "segmask")]
#[allow(clippy::struct_excessive_bools)]
pub struct Cli {
    /// Input image (JPEG, PNG or WebP)
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Output mask file [default: <INPUT stem>_mask.png]
    #[arg(short, long, value_name = "OUTPUT")]
    pub output: Option<PathBuf>,

    /// API token for the segmentation service
    #[arg(long, env = "SEGMASK_API_TOKEN", hide_env_values = true)]
    pub api_token: Option<String>,

    /// Base URL of the segmentation service
    #[arg(long, env = "SEGMASK_API_URL")]
    pub api_url: Option<String>,

    /// Model version identifier
    #[arg(long, env = "SEGMASK_MODEL_VERSION")]
    pub model_version: Option<String>,

    /// Attempts at creating the prediction job
    #[arg(long, default_value_t = 3)]
    pub max_retries: u32,

    /// Seconds to wait for the prediction to finish
    #[arg(long, default_value_t = 45)]
    pub poll_timeout: u64,

    /// Blur radius applied to the mask
    #[arg(long)]
    pub blur: Option<f32>,

    /// Dilation passes
    #[arg(long, default_value_t = 0)]
    pub dilate: u32,

    /// Erosion passes
    #[arg(long, default_value_t = 0)]
    pub erode: u32,

    /// Alpha threshold (0-255); pixels at or above become opaque
    #[arg(long)]
    pub threshold: Option<u8>,

    /// Write the alpha channel as a grayscale image instead of the RGBA mask
    #[arg(long)]
    pub alpha_only: bool,

    /// Render a preview of the mask
    #[arg(long, value_enum)]
    pub preview: Option<CliPreviewMode>,

    /// Preview output file [default: <INPUT stem>_preview.png]
    #[arg(long, value_name = "PATH")]
    pub preview_output: Option<PathBuf>,

    /// Mask opacity for overlay previews (0.0-1.0)
    #[arg(long, default_value_t = 0.5)]
    pub opacity: f32,

    /// Run pixel analysis on the async runtime instead of the blocking pool
    #[arg(long)]
    pub inline_analysis: bool,

    /// Enable verbose logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Plain log output without colors
    #[arg(long)]
    pub compact_logs: bool,

    /// Log events as JSON
    #[cfg(feature = "tracing-json")]
    #[arg(long, conflicts_with = "compact_logs")]
    pub json_logs: bool,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliPreviewMode {
    Overlay,
    SideBySide,
    Checkerboard,
}

impl From<CliPreviewMode> for PreviewMode {
    fn from(mode: CliPreviewMode) -> Self {
        match mode {
            CliPreviewMode::Overlay => Self::Overlay,
            CliPreviewMode::SideBySide => Self::SideBySide,
            CliPreviewMode::Checkerboard => Self::Checkerboard,
        }
    }
}

impl Cli {
    fn tracing_format(&self) -> TracingFormat {
        #[cfg(feature = "tracing-json")]
        if self.json_logs {
            return TracingFormat::Json;
        }
        if self.compact_logs {
            TracingFormat::Compact
        } else {
            TracingFormat::Console
        }
    }
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_cli_tracing(cli.verbose, cli.tracing_format())
        .context("Failed to initialize tracing")?;

    CliConfigBuilder::validate_cli(&cli).context("Invalid CLI arguments")?;
    let config = CliConfigBuilder::from_cli(&cli).context("Failed to build configuration")?;
    let refine = CliConfigBuilder::refine_options(&cli);

    let mime = ImageMime::from_path(&cli.input).with_context(|| {
        format!(
            "Unsupported file type for {}; expected .jpg, .jpeg, .png or .webp",
            cli.input.display()
        )
    })?;
    let bytes = std::fs::read(&cli.input)
        .with_context(|| format!("Failed to read {}", cli.input.display()))?;
    let data_url = encode_data_url(&bytes, mime);

    info!(input = %cli.input.display(), %mime, bytes = bytes.len(), "Generating mask");
    let generator = MaskGenerator::new(config)?;

    let spinner = spinner("Generating mask...")?;
    let start_time = Instant::now();
    let result = tokio::select! {
        result = generator.generate(&data_url) => result,
        _ = tokio::signal::ctrl_c() => {
            spinner.set_message("Canceling...");
            generator.abort().await;
            Err(SegmentationError::canceled())
        }
    };

    let result = match result {
        Ok(result) => result,
        Err(e) => {
            spinner.abandon_with_message("Mask generation failed");
            report_failure(&e);
            std::process::exit(1);
        },
    };
    spinner.finish_with_message(format!(
        "Mask ready in {:.2}s",
        start_time.elapsed().as_secs_f64()
    ));

    let mask = if refine.is_noop() {
        Arc::clone(&result.mask_image)
    } else {
        debug!(?refine, "Refining mask");
        generator.processor().refine(&result.mask_image, &refine).await
    };

    let output = cli
        .output
        .clone()
        .unwrap_or_else(|| sibling_path(&cli.input, "mask"));
    let saved = if cli.alpha_only {
        generator
            .processor()
            .extract_alpha_channel(&mask)
            .save_with_format(&output, ImageFormat::Png)
    } else {
        mask.save_with_format(&output, ImageFormat::Png)
    };
    saved.with_context(|| format!("Failed to write {}", output.display()))?;

    if let Some(mode) = cli.preview {
        let path = cli
            .preview_output
            .clone()
            .unwrap_or_else(|| sibling_path(&cli.input, "preview"));
        write_preview(&bytes, &mask, mode, cli.opacity, &path)?;
        println!("Preview: {}", path.display());
    }

    print_summary(&result, &output);
    Ok(())
}

fn spinner(message: &'static str) -> Result<ProgressBar> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")?,
    );
    spinner.set_message(message);
    spinner.enable_steady_tick(Duration::from_millis(100));
    Ok(spinner)
}

fn report_failure(error: &SegmentationError) {
    warn!(kind = %error.kind(), retryable = error.is_retryable(), "Mask generation failed");
    eprintln!("Error: {error}");
    if let Some(seconds) = error.retry_after() {
        eprintln!("You can retry in about {seconds} seconds.");
    } else if error.is_retryable() {
        eprintln!("This is usually temporary. Running the command again may succeed.");
    }
}

fn write_preview(
    source_bytes: &[u8],
    mask: &RgbaImage,
    mode: CliPreviewMode,
    opacity: f32,
    path: &Path,
) -> Result<()> {
    let source = image::load_from_memory(source_bytes)
        .context("Failed to decode the input image for the preview")?
        .to_rgba8();
    let options = PreviewOptions::new(mode.into()).opacity(opacity);

    let mut target = RgbaImage::new(0, 0);
    render_preview(&mut target, &source, mask, &options);
    target
        .save_with_format(path, ImageFormat::Png)
        .with_context(|| format!("Failed to write {}", path.display()))
}

fn print_summary(result: &MaskResult, output: &Path) {
    let (width, height) = result.dimensions();
    println!("Mask: {}", output.display());
    println!(
        "Quality: {} ({width}x{height}, generated in {}ms)",
        result.quality, result.generation_time_ms
    );
}

/// `<dir>/<stem>_<suffix>.png` next to the input
fn sibling_path(input: &Path, suffix: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("image");
    input.with_file_name(format!("{stem}_{suffix}.png"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sibling_path() {
        assert_eq!(
            sibling_path(Path::new("photos/cat.jpg"), "mask"),
            PathBuf::from("photos/cat_mask.png")
        );
        assert_eq!(sibling_path(Path::new("dog.webp"), "preview"), PathBuf::from("dog_preview.png"));
    }

    #[test]
    fn test_preview_mode_conversion() {
        assert_eq!(PreviewMode::from(CliPreviewMode::SideBySide), PreviewMode::SideBySide);
        assert_eq!(PreviewMode::from(CliPreviewMode::Checkerboard), PreviewMode::Checkerboard);
    }

    #[test]
    fn test_tracing_format_selection() {
        let cli = Cli::try_parse_from(["segmask", "in.png", "--compact-logs"]).unwrap();
        assert_eq!(cli.tracing_format(), TracingFormat::Compact);
        let cli = Cli::try_parse_from(["segmask", "in.png"]).unwrap();
        assert_eq!(cli.tracing_format(), TracingFormat::Console);
    }
}
