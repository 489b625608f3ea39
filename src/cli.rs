use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "autosaver")]
#[command(about = "Periodic autosaves with retention and keep-protection")]
#[command(version)]
pub struct Cli {
    /// Config file (defaults to the platform config dir)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Host save directory, overrides the config file
    #[arg(long, global = true)]
    pub save_root: Option<PathBuf>,

    /// Show debug logging
    #[arg(long, short = 'v', global = true, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run as a plugin, speaking JSON-RPC over stdin/stdout
    Run,

    /// List autosaves, newest first
    List(ListArgs),

    /// Rescan the autosave folder and report what was found
    Scan,

    /// Toggle keep-protection on an autosave
    Keep(KeepArgs),

    /// Remove old non-keep autosaves
    Cull(CullArgs),
}

#[derive(Parser)]
pub struct ListArgs {
    /// Page to show
    #[arg(long, default_value_t = 1)]
    pub page: usize,

    /// Output as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Parser)]
pub struct KeepArgs {
    /// Save id as shown by `list`
    pub id: u64,
}

#[derive(Parser)]
pub struct CullArgs {
    /// Non-keep saves to leave behind (defaults to num-saves from the config)
    #[arg(long)]
    pub floor: Option<usize>,
}
