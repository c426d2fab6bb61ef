use anyhow::Result;

use crate::app::App;
use crate::render::terminal::{format_epoch, paint, render_tree, Color};
use crate::OutputFormat;

pub fn run(app: &App, format: &OutputFormat, use_color: bool) -> Result<()> {
    let status = app.last_status()?;
    let snapshot = app.snapshot_store()?.load();
    let sync_dir = app.config.sync_dir()?;
    let (folders, notebooks) = snapshot.counts();

    match format {
        OutputFormat::Json => {
            let output = serde_json::json!({
                "syncDir": sync_dir.to_string_lossy(),
                "status": status,
                "folders": folders,
                "notebooks": notebooks,
                "latestUpdate": snapshot.latest_update(),
                "snapshot": snapshot,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Plain => {
            let summary = match &status {
                Some(status) if status.error.is_some() => paint(&status.summary(), Color::RED, use_color),
                Some(status) => status.summary(),
                None => "Never synced".to_string(),
            };
            println!("{}", summary);
            println!(
                "{} ({} folder(s), {} notebook(s))",
                paint(&sync_dir.display().to_string(), Color::BOLD, use_color),
                folders,
                notebooks
            );
            if let Some(latest) = snapshot.latest_update() {
                println!("Newest PDF rendered {}", format_epoch(latest));
            }
            for line in render_tree(&snapshot, use_color) {
                println!("{}", line);
            }
        }
    }

    Ok(())
}
