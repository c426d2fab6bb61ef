mod app;
mod commands;
mod render;

use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "scribe-sync",
    about = "Mirror cloud handwritten notebooks to local PDFs",
    version
)]
struct Cli {
    /// Config file (default: <config dir>/scribe-sync/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, global = true, default_value = "plain")]
    format: OutputFormat,

    /// Disable ANSI colors
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Plain,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Sync now and then on every interval until interrupted.
    /// SIGUSR1 forces a sync, SIGUSR2 logs the last result.
    Run,

    /// Run a single sync pass
    Sync,

    /// Show the last sync result and the mirrored tree
    Status,

    /// Forget the cached session cookies
    Logout,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let use_color = !cli.no_color && std::io::stdout().is_terminal();

    let app = app::App::new(cli.config.as_deref())?;
    app.init_logging();

    let runtime = tokio::runtime::Runtime::new()?;
    let result = runtime.block_on(async {
        match cli.command {
            Command::Run => commands::run::run(&app).await,
            Command::Sync => commands::sync::run(&app, &cli.format, use_color).await,
            Command::Status => commands::status::run(&app, &cli.format, use_color),
            Command::Logout => commands::logout::run(&app),
        }
    });

    // A pass abandoned after the Ctrl-C grace period may still be materializing
    runtime.shutdown_timeout(Duration::from_millis(250));
    result
}
