use clap::{Parser, Subcommand};
use relaybox::config::Config;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "relaybox")]
#[command(about = "Fetches queued magnet links and republishes them", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Consume the inbound queue until interrupted
    Run(ConfigArgs),
    /// Load and validate the configuration, then print a summary
    CheckConfig(ConfigArgs),
    /// Print the job a payload normalizes to
    Normalize(NormalizeArgs),
}

#[derive(clap::Args, Debug)]
pub struct ConfigArgs {
    /// Configuration file (default: $RELAYBOX_CONFIG or config/config.toml)
    #[arg(long, short)]
    pub config: Option<PathBuf>,
}

impl ConfigArgs {
    pub fn path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(Config::default_path)
    }
}

#[derive(clap::Args, Debug)]
pub struct NormalizeArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Raw message body; read from stdin when omitted
    pub payload: Option<String>,
}
