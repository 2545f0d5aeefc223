mod cli;
mod service;

use clap::Parser;
use cli::{Cli, Commands};
use relaybox::config::Config;
use relaybox::job::Normalizer;
use relaybox::observability;
use tokio::io::AsyncReadExt;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    observability::init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => {
            let config = Config::load_from_path(args.path())?;
            service::run(config).await?
        }
        Commands::CheckConfig(args) => {
            let config = Config::load_from_path(args.path())?;
            println!("{}", service::describe(&config));
        }
        Commands::Normalize(args) => {
            let config = Config::load_offline(args.config.path())?;
            let normalizer = Normalizer::new(&config.normalizer)?;

            let payload = match args.payload {
                Some(payload) => payload.into_bytes(),
                None => {
                    let mut buf = Vec::new();
                    tokio::io::stdin().read_to_end(&mut buf).await?;
                    buf
                }
            };

            let job = normalizer.normalize(&payload)?;
            println!("{}", serde_json::to_string_pretty(&job)?);
        }
    }

    Ok(())
}
