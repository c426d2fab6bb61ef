use anyhow::{Context, Result};

use crate::app::App;
use crate::render::terminal::{paint, Color};
use crate::OutputFormat;

pub async fn run(app: &App, format: &OutputFormat, use_color: bool) -> Result<()> {
    let manager = app.manager()?;
    let result = manager.sync_now().await.context("Sync failed")?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        OutputFormat::Plain => {
            println!(
                "{} {}",
                paint("Synced", Color::GREEN, use_color),
                manager.sync_dir().display()
            );
            println!("  updated:   {} item(s)", result.updated);
            println!("  rendered:  {}", result.materialized);
            println!("  removed:   {}", result.pruned);
            if result.prune_failures > 0 {
                println!(
                    "  {}",
                    paint(
                        &format!("{} removal(s) failed, see the log", result.prune_failures),
                        Color::RED,
                        use_color
                    )
                );
            }
            println!("  took:      {}ms", result.duration_ms);
        }
    }

    Ok(())
}
