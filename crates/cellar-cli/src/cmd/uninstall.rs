//! Uninstall command

use anyhow::Result;
use tracing::warn;

use cellar_core::Reporter;
use cellar_core::pipeline::{EXIT_FAILURE, EXIT_SUCCESS};

use crate::ops::{Context, package_name};
use crate::store::db::{Action, HistoryEvent};

/// Remove installed packages. Formulae are not needed.
pub async fn uninstall(packages: &[String], force: bool, quiet: bool, dry_run: bool) -> Result<i32> {
    let ctx = Context::load(None, quiet)?;
    let output = &ctx.output;
    let names = packages
        .iter()
        .map(|raw| package_name(raw))
        .collect::<Result<Vec<_>>>()?;

    if dry_run {
        for name in &names {
            match ctx.installer.receipts().get(&name)? {
                Some(receipt) => output.info(&format!("Would remove {name} {}", receipt.version)),
                None => output.warning(&format!("'{name}' is not installed")),
            }
        }
        return Ok(EXIT_SUCCESS);
    }

    let _lock = ctx.installer.lock().await?;
    let db = ctx.history()?;
    let mut code = EXIT_SUCCESS;
    let mut removed = 0;
    let started = std::time::Instant::now();

    output.section("Removing");
    for name in names {
        let event = match ctx.installer.uninstall(&name, force) {
            Ok(receipt) => {
                removed += 1;
                HistoryEvent::now(Action::Remove, name.as_str(), true).with_from(&receipt.version)
            }
            Err(e) => {
                output.error(&e.to_string());
                code = EXIT_FAILURE;
                HistoryEvent::now(Action::Remove, name.as_str(), false).with_detail(e.to_string())
            }
        };
        if let Err(e) = db.add_history(event).await {
            warn!(package = %name, error = %e, "failed to record history");
        }
    }
    db.shutdown();

    if removed > 0 {
        output.summary(removed, "removed", started.elapsed().as_secs_f64());
    }
    Ok(code)
}
