use anyhow::{Context, Result};

use crate::app::App;

pub fn run(app: &App) -> Result<()> {
    let store = app.cookie_store()?;
    store
        .clear()
        .with_context(|| format!("Failed to delete {}", store.path().display()))?;
    log::info!("Cleared cached session at {}", store.path().display());
    println!("Signed out. The next sync will ask for a new session.");
    Ok(())
}
