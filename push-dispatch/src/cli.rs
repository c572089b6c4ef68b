use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "push-dispatch", version, about = "Push notification dispatch for farm visitor alerts")]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Send one notification described by a JSON request file
    Send {
        /// Path to the dispatch request JSON
        #[arg(short, long)]
        file: PathBuf,

        /// Restrict the audience to members of this farm
        #[arg(long)]
        farm: Option<String>,
    },

    /// Print a freshly generated VAPID keypair
    GenerateKeys,

    /// Deactivate subscriptions that keep failing
    Janitor {
        /// Run a single pass and exit
        #[arg(long)]
        once: bool,
    },
}
