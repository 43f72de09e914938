use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "stove")]
#[command(version)]
#[command(about = "Hot-reload front end: a fixed port relayed to respawned workers", long_about = None)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Serve the configured port and respawn workers on every change
    Run {
        #[command(flatten)]
        target: ConfigArgs,

        /// Do not watch the filesystem; reload only on SIGHUP
        #[arg(long)]
        no_watch: bool,
    },

    /// Validate a config profile and print the resolved settings
    Check {
        #[command(flatten)]
        target: ConfigArgs,

        /// Print as JSON instead of TOML
        #[arg(long)]
        json: bool,
    },
}

#[derive(clap::Args)]
pub(crate) struct ConfigArgs {
    /// Config file (default: stove.toml)
    #[arg(env = "STOVE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Profile to use from the config file (default: main)
    #[arg(short, long, env = "STOVE_PROFILE")]
    pub name: Option<String>,
}

impl ConfigArgs {
    pub fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(stove::clienv::config_path)
    }

    pub fn profile(&self) -> String {
        self.name.clone().unwrap_or_else(stove::clienv::profile)
    }
}
