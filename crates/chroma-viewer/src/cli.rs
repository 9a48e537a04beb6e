use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "chroma-viewer",
    author,
    version,
    about = "Show an image and scale its red, green and blue channels live"
)]
pub struct Cli {
    /// Image to display (PNG, JPEG, BMP or GIF). Overrides the config file.
    #[arg(long, value_name = "PATH")]
    pub image: Option<PathBuf>,

    /// JSON config file.
    #[arg(long, value_name = "PATH", env = "CHROMA_CONFIG")]
    pub config: Option<PathBuf>,

    /// Listen for `/filter/<red|green|blue> <number>` OSC messages on this UDP address.
    #[arg(long, value_name = "HOST:PORT")]
    pub osc: Option<String>,

    /// Window title. Overrides the config file.
    #[arg(long)]
    pub title: Option<String>,

    /// Render once, write the surface to this PNG and exit.
    #[arg(long, value_name = "PATH")]
    pub snapshot: Option<PathBuf>,
}

pub fn parse() -> Cli {
    Cli::parse()
}
