//! segmask CLI tool
//!
//! Generates a background-removal mask for one image through the remote
//! segmentation service, with optional refinement and preview output.

#[cfg(feature = "cli")]
use segmask::cli;

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::main().await
}

#[cfg(not(feature = "cli"))]
fn main() {
    panic!("CLI feature not enabled. Please rebuild with --features cli");
}
