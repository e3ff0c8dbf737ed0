//! pushwarden: operator CLI for the liveness runtime.

use clap::Parser;

mod cli;
mod cmd_pending;
mod cmd_probe;
mod cmd_replay;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    let filter = std::env::var("PUSHWARDEN_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    let config = pushwarden_runtime::config::load(args.config.as_deref())?;

    let exit_code = match args.command {
        cli::Command::Probe(opts) => cmd_probe::cmd_probe(&config, &opts).await?,
        cli::Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            0
        }
        cli::Command::Replay(opts) => cmd_replay::cmd_replay(&config, &opts)?,
        cli::Command::Pending(opts) => cmd_pending::cmd_pending(&opts).await?,
    };
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}
