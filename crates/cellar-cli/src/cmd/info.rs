//! Info command

use std::path::PathBuf;

use anyhow::{Result, bail};
use crossterm::style::Stylize;

use cellar_core::formula::{formula_path, load_file};
use cellar_core::pipeline::EXIT_SUCCESS;
use cellar_schema::DependencyKind;

use crate::ops::{Context, package_name};

/// Show formula metadata and install state of a package
pub fn info(package: &str, formulae: Option<PathBuf>, quiet: bool) -> Result<i32> {
    let name = package_name(package)?;
    let ctx = Context::load(formulae, quiet)?;

    let path = formula_path(ctx.formula_dir(), &name);
    let formula = if path.is_file() {
        Some(load_file(&path)?)
    } else {
        None
    };
    let receipt = ctx.installer.receipts().get(&name)?;

    if formula.is_none() && receipt.is_none() {
        bail!("Package '{name}' not found");
    }

    let lw = 12;
    println!();
    if let Some(f) = &formula {
        println!(
            "  {} {}",
            f.name.as_str().white().bold(),
            f.version.as_str().dark_grey()
        );
        if !f.description.is_empty() {
            println!("  {}", f.description);
        }
        println!();
        if !f.homepage.is_empty() {
            println!("  {:<lw$}{}", "homepage", f.homepage);
        }
        if !f.license.is_empty() {
            println!("  {:<lw$}{}", "license", f.license);
        }
        if let Some(source) = f.primary_source() {
            println!("  {:<lw$}{}", "source", source.url());
        }
        for kind in DependencyKind::ALL {
            let deps: Vec<String> = f
                .dependencies
                .iter()
                .filter(|d| d.kind == kind)
                .map(|d| match &d.requirement {
                    Some(req) => format!("{} {req}", d.name),
                    None => d.name.to_string(),
                })
                .collect();
            if !deps.is_empty() {
                println!("  {:<lw$}{}", kind.as_str(), deps.join(", "));
            }
        }
    } else if let Some(r) = &receipt {
        println!(
            "  {} {}",
            r.name.as_str().white().bold(),
            r.version.as_str().dark_grey()
        );
        println!();
    }

    match &receipt {
        Some(r) => {
            let date = r
                .installed_at
                .with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M");
            println!("  {:<lw$}{} ({date})", "installed", r.version);
            println!("  {:<lw$}{}", "keg", r.keg.display());
            println!("  {:<lw$}{}", "self-test", r.test);
            if let Some(f) = formula.as_ref().filter(|f| f.version != r.version) {
                println!("  {:<lw$}{}", "formula", f.version.as_str().yellow());
            }
            if !r.caveats.is_empty() {
                println!();
                println!("  {}", r.caveats);
            }
        }
        None => println!("  {:<lw$}{}", "installed", "no".dark_grey()),
    }
    println!();

    Ok(EXIT_SUCCESS)
}
