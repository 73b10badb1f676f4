//! List command

use anyhow::{Context as _, Result};
use comfy_table::{Cell, Color, Table, presets::UTF8_FULL};

use cellar_core::pipeline::EXIT_SUCCESS;
use cellar_core::receipt::{Receipt, TestStatus};

use crate::ops::Context;
use crate::ui::theme::format_size;

/// List all installed packages
pub fn list(quiet: bool) -> Result<i32> {
    let ctx = Context::load(None, quiet)?;
    let receipts = ctx
        .installer
        .receipts()
        .list()
        .context("Failed to read receipts")?;

    if receipts.is_empty() {
        println!();
        println!("  No packages installed.");
        println!("  Run 'cellar install <package>' to get started.");
        return Ok(EXIT_SUCCESS);
    }

    println!("{}", table(&receipts));
    let total: u64 = receipts.iter().map(|r| keg_size(&r.keg)).sum();
    println!(
        "  {} package{}, {}",
        receipts.len(),
        if receipts.len() == 1 { "" } else { "s" },
        format_size(total)
    );
    Ok(EXIT_SUCCESS)
}

fn table(receipts: &[Receipt]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec![
        Cell::new("Name").fg(Color::Cyan),
        Cell::new("Version").fg(Color::Cyan),
        Cell::new("Installed").fg(Color::Cyan),
        Cell::new("Test").fg(Color::Cyan),
        Cell::new("Size").fg(Color::Cyan),
    ]);

    for r in receipts {
        let test_color = match r.test {
            TestStatus::Passed => Color::Green,
            TestStatus::Failed { .. } => Color::Red,
            TestStatus::Skipped => Color::DarkGrey,
        };
        table.add_row(vec![
            Cell::new(&r.name).fg(Color::White),
            Cell::new(&r.version),
            Cell::new(
                r.installed_at
                    .with_timezone(&chrono::Local)
                    .format("%Y-%m-%d")
                    .to_string(),
            )
            .fg(Color::DarkGrey),
            Cell::new(&r.test).fg(test_color),
            Cell::new(format_size(keg_size(&r.keg))).fg(Color::DarkGrey),
        ]);
    }
    table
}

/// Total size of regular files in a keg.
pub fn keg_size(keg: &std::path::Path) -> u64 {
    walkdir::WalkDir::new(keg)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}
