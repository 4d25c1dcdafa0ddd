//! ID photo CLI
//!
//! Creates ID and passport photos with background removal and face-anchored
//! framing, using ONNX Runtime or Tract for segmentation.

#[cfg(feature = "cli")]
use idphoto_studio::cli;

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::main().await
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("CLI feature not enabled. Please rebuild with --features cli");
    std::process::exit(1);
}
