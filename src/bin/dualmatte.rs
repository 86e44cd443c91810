//! dualmatte CLI
//!
//! Command-line interface for generating transparent assets with the dualmatte
//! library.

#[cfg(feature = "cli")]
use dualmatte::cli;

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
