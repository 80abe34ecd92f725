use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(
    name = "kofi-bridge-discord",
    about = "Bridges Ko-fi donations to Discord membership roles",
    version
)]
pub struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, env = "CONFIG_PATH", default_value = "config.yaml")]
    pub config: PathBuf,
}
