use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use taskboard::{
    cli::{self, RootCommand},
    logging::{init_logging, print_log_location},
    settings::Settings,
    store::HttpTaskStore,
};

#[derive(Parser, Debug)]
#[command(
    name = "taskboard",
    about = "Kanban task board client",
    long_about = "Lists, creates, edits, moves and deletes tasks on a remote task store, using the same optimistic board engine as the interactive view.",
    version = env!("TASKBOARD_BUILD_VERSION"),
    author
)]
struct Cli {
    /// Task store base URL; overrides TASKBOARD_API_URL and settings.toml.
    #[arg(long, global = true, value_name = "URL")]
    api_url: Option<String>,

    #[arg(long, global = true)]
    json: bool,

    #[arg(long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: RootCommand,
}

#[tokio::main]
async fn main() -> Result<()> {
    let (log_path, log_guard) = match init_logging() {
        Ok((path, guard)) => (Some(path), Some(guard)),
        Err(err) => {
            eprintln!("warning: failed to initialize logging: {err}");
            (None, None)
        }
    };

    let cli = Cli::parse();

    let mut settings = Settings::load();
    settings.apply_overrides(cli.api_url.as_deref());

    let store = HttpTaskStore::new(&settings.api_url, settings.request_timeout())
        .context("failed to build task store client")?;

    let code = cli::run(Arc::new(store), &settings, cli.command, cli.json, cli.quiet).await;
    if code != 0 {
        // process::exit skips destructors, so flush the log writer first.
        drop(log_guard);
        if let Some(path) = log_path.as_ref()
            && !cli.json
        {
            print_log_location(path);
        }
        std::process::exit(code);
    }

    Ok(())
}
