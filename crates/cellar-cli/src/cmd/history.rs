//! History command

use anyhow::Result;
use chrono::DateTime;

use cellar_core::Reporter;
use cellar_core::pipeline::EXIT_SUCCESS;

use crate::ops::Context;
use crate::store::db::HistoryEvent;

/// Entries shown when no package is given.
const RECENT_LIMIT: usize = 20;

pub async fn history(package: Option<&str>, quiet: bool) -> Result<i32> {
    let ctx = Context::load(None, quiet)?;
    let db = ctx.history()?;
    let events = match package {
        Some(name) => db.get_history(name.to_string()).await?,
        None => db.recent_history(RECENT_LIMIT).await?,
    };
    db.shutdown();

    let output = &ctx.output;
    if events.is_empty() {
        match package {
            Some(name) => output.info(&format!("No history found for '{name}'")),
            None => output.info("No history recorded yet"),
        }
        return Ok(EXIT_SUCCESS);
    }

    match package {
        Some(name) => output.section(&format!("History for '{name}'")),
        None => output.section("Recent history"),
    }
    output.wait_async().await;

    for event in &events {
        println!("{}", format_event(event, package.is_none()));
    }
    println!();

    Ok(EXIT_SUCCESS)
}

/// One line per entry: `[time] description`.
pub fn format_event(event: &HistoryEvent, with_name: bool) -> String {
    let time = DateTime::from_timestamp_millis(event.timestamp)
        .unwrap_or_default()
        .with_timezone(&chrono::Local)
        .format("%Y-%m-%d %H:%M:%S");

    let to = event.version_to.as_deref().unwrap_or("?");
    let mut desc = match (event.action.as_str(), event.success) {
        ("install", true) => format!("Installed {to}"),
        ("upgrade", true) => {
            let from = event.version_from.as_deref().unwrap_or("?");
            format!("Upgraded from {from} to {to}")
        }
        ("install" | "upgrade", false) => format!("Failed to install {to}"),
        ("remove", true) => {
            format!("Removed {}", event.version_from.as_deref().unwrap_or("?"))
        }
        ("remove", false) => "Failed to remove".to_string(),
        ("test", _) => format!("Tested {to}"),
        (action, _) => action.to_string(),
    };
    if let Some(detail) = &event.detail {
        desc.push_str(&format!(": {detail}"));
    }
    if with_name {
        format!("[{time}] {} {desc}", event.package)
    } else {
        format!("[{time}] {desc}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::db::Action;

    #[test]
    fn test_format_upgrade() {
        let event = HistoryEvent::now(Action::Upgrade, "jq", true)
            .with_from("1.6")
            .with_to("1.7.1");
        let line = format_event(&event, false);
        assert!(line.ends_with("] Upgraded from 1.6 to 1.7.1"));
    }

    #[test]
    fn test_format_failed_install_with_name() {
        let event = HistoryEvent::now(Action::Install, "foo", false)
            .with_to("1.0")
            .with_detail("install step 2 failed");
        let line = format_event(&event, true);
        assert!(line.ends_with("] foo Failed to install 1.0: install step 2 failed"));
    }
}
