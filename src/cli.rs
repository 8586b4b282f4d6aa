use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "rotaproxyd")]
#[command(version = concat!("Ver:", env!("CARGO_PKG_VERSION")))]
#[command(about = "Control-plane daemon for a rotating outbound proxy, HTTP link tester, and Cloudflare edge scanner")]
pub struct Cli {
    /// Path to a TOML config file. Missing file falls back to compiled defaults.
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Override the API façade's listen address (host:port).
    #[arg(long = "listen")]
    pub listen: Option<String>,

    /// Override the tracing filter (e.g. "info", "rotaproxyd=debug").
    #[arg(long = "log-level")]
    pub log_level: Option<String>,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
