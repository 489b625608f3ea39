use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::Utc;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use autosaver::cli::{Cli, Command};
use autosaver::config::Config;
use autosaver::host::DirectoryHost;
use autosaver::plugin;
use autosaver::report::{self, plural};
use autosaver::service::Autosaver;
use autosaver::store;

fn init_logging(verbose: bool) {
    // stdout belongs to the host protocol in plugin mode
    let filter = if verbose {
        EnvFilter::new("autosaver=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn offline(config: Config) -> anyhow::Result<Autosaver> {
    let host = Arc::new(DirectoryHost::new(config.save_root.clone()));
    Autosaver::new(config, host).context("failed to open the autosave folder")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = Config::from_cli(&cli).context("failed to load config")?;
    config
        .resolve_root()
        .with_context(|| format!("failed to open save root {}", config.save_root.display()))?;

    match cli.command {
        Command::Run => plugin::run(config).await?,
        Command::List(args) => {
            let autosaver = offline(config)?;
            let registry = store::lock(autosaver.registry());
            let page = registry.page(args.page, autosaver::commands::PAGE_SIZE);

            if args.json {
                println!("{}", report::json::render(&page));
            } else {
                for line in report::table::render_page(&page, Utc::now()) {
                    println!("{line}");
                }
            }
        }
        Command::Scan => {
            let autosaver = offline(config)?;
            let count = autosaver.rescan()?;
            let registry = store::lock(autosaver.registry());

            println!("Found {} in {}", plural(count as u64, "save"), autosaver.paths().dest_dir.display());
            if let Some(latest) = registry.latest() {
                println!("Latest: {} ({})", latest.name, report::format_date(latest.date, Utc::now()));
            }
        }
        Command::Keep(args) => {
            let autosaver = offline(config)?;
            let save = autosaver.toggle_keep(args.id)?;
            let state = if save.keep { "Enabled" } else { "Disabled" };
            println!("{state} keep on {}", save.name);
        }
        Command::Cull(args) => {
            let floor = args.floor.unwrap_or(config.num_saves);
            if floor == 0 {
                bail!("culling is disabled, pass --floor or set num-saves");
            }

            let autosaver = offline(config)?;
            let result = autosaver.cull(floor);

            println!("Removed {}.", plural(result.evicted as u64, "old save"));
            for (path, error) in &result.failures {
                eprintln!("  could not delete {}: {error}", path.display());
            }
            if !result.failures.is_empty() {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
