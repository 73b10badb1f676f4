//! Plan command

use std::path::PathBuf;

use anyhow::Result;

use cellar_core::Reporter;
use cellar_core::pipeline::EXIT_SUCCESS;
use cellar_core::resolver::{BuildPlan, PlanAction, ResolveOptions};

use crate::ops::{Context, package_name};
use crate::ui::Output;

/// Print the build plan for `package` without building anything.
pub fn plan(
    package: &str,
    with_optional: bool,
    with_test_deps: bool,
    formulae: Option<PathBuf>,
    quiet: bool,
) -> Result<i32> {
    let name = package_name(package)?;
    let ctx = Context::load(formulae, quiet)?;
    let formulae = ctx.formulae_for(&name)?;
    let options = ResolveOptions {
        include_optional: with_optional,
        include_test: with_test_deps,
        reinstall: false,
    };
    let plan = ctx.installer.plan(&name, &formulae, options)?;
    print_plan(&plan, &ctx.output);
    Ok(EXIT_SUCCESS)
}

/// One line per plan entry, in build order.
pub fn plan_lines(plan: &BuildPlan) -> Vec<String> {
    let mut lines = Vec::with_capacity(plan.packages.len());
    for (i, pkg) in plan.packages.iter().enumerate() {
        let action = match &pkg.action {
            PlanAction::Build => "build".to_string(),
            PlanAction::Upgrade { from } => format!("upgrade from {from}"),
            PlanAction::Skip { installed } => format!("skip ({installed} installed)"),
        };
        let mut line = format!("{:>3}. {} {} [{action}]", i + 1, pkg.name, pkg.version);
        if !pkg.dependencies.is_empty() {
            let deps: Vec<&str> = pkg.dependencies.iter().map(|d| d.name.as_str()).collect();
            line.push_str(&format!(" <- {}", deps.join(", ")));
        }
        lines.push(line);
    }
    lines
}

pub fn print_plan(plan: &BuildPlan, output: &Output) {
    output.section(&format!("Plan for '{}'", plan.target));
    for line in plan_lines(plan) {
        output.info(&line);
    }
    for edge in &plan.dropped_edges {
        output.warning(&format!(
            "dropped dependency {} -> {} (would form a cycle)",
            edge.from, edge.to
        ));
    }
    if plan.is_satisfied() {
        output.success("Nothing to do.");
    } else {
        let count = plan.to_build().count();
        output.info(&format!(
            "{count} package{} to build in {} wave{}",
            if count == 1 { "" } else { "s" },
            plan.layers().len(),
            if plan.layers().len() == 1 { "" } else { "s" },
        ));
    }
}
