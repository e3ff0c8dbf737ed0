//! CLI definition using clap derive.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "pushwarden", about = "push notification and realtime liveness toolkit")]
pub struct Cli {
    /// TOML config file (defaults apply to missing keys)
    #[arg(long, short = 'c', global = true, env = "PUSHWARDEN_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run one health probe (HEAD) and print the result as JSON
    Probe(ProbeOpts),
    /// Print the effective configuration as JSON
    Config,
    /// Replay a trigger scenario through the dispatch table
    Replay(ReplayOpts),
    /// Run one pending-notification check against a server
    Pending(PendingOpts),
}

#[derive(clap::Args)]
pub struct ProbeOpts {
    /// URL to probe
    #[arg(long)]
    pub url: String,

    /// Override probe_timeout_ms
    #[arg(long)]
    pub timeout_ms: Option<u64>,
}

#[derive(clap::Args)]
pub struct ReplayOpts {
    /// Scenario JSON file
    pub file: PathBuf,

    /// Exit non-zero when a step's planned actions differ from its expectation
    #[arg(long)]
    pub strict: bool,
}

#[derive(clap::Args)]
pub struct PendingOpts {
    /// Notification server base URL
    #[arg(long)]
    pub server: String,

    /// Tenant identifier
    #[arg(long)]
    pub tenant: String,

    /// Only notifications newer than this epoch-millisecond timestamp
    #[arg(long, default_value = "0")]
    pub since_ms: i64,

    /// Source tag sent to the server
    #[arg(long, default_value = "cli")]
    pub source: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_probe_with_override() {
        let cli = Cli::parse_from(["pushwarden", "probe", "--url", "https://x.test/health", "--timeout-ms", "800"]);
        match cli.command {
            Command::Probe(opts) => {
                assert_eq!(opts.url, "https://x.test/health");
                assert_eq!(opts.timeout_ms, Some(800));
            }
            _ => panic!("expected probe"),
        }
    }

    #[test]
    fn config_flag_is_global() {
        let cli = Cli::parse_from(["pushwarden", "replay", "s.json", "--config", "tuned.toml", "--strict"]);
        assert_eq!(cli.config, Some(PathBuf::from("tuned.toml")));
        match cli.command {
            Command::Replay(opts) => {
                assert_eq!(opts.file, PathBuf::from("s.json"));
                assert!(opts.strict);
            }
            _ => panic!("expected replay"),
        }
    }

    #[test]
    fn pending_defaults() {
        let cli = Cli::parse_from(["pushwarden", "pending", "--server", "https://api.test", "--tenant", "r1"]);
        match cli.command {
            Command::Pending(opts) => {
                assert_eq!(opts.since_ms, 0);
                assert_eq!(opts.source, "cli");
            }
            _ => panic!("expected pending"),
        }
    }
}
