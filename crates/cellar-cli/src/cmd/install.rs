//! Install command

use std::path::PathBuf;

use anyhow::{Result, bail};
use tracing::warn;

use cellar_core::builder::BuildError;
use cellar_core::pipeline::{
    EXIT_FAILURE, EXIT_SUCCESS, EXIT_TEST_FAILED, InstallError, InstallOptions, InstallReport,
    Outcome,
};
use cellar_core::tester::TestPolicy;
use cellar_core::Reporter;

use crate::InstallArgs;
use crate::ops::{Context, package_name};
use crate::store::DbHandle;
use crate::store::db::{Action, HistoryEvent};

/// Build the installer options from config plus command-line flags.
pub fn options(ctx: &Context, args: &InstallArgs) -> Result<InstallOptions> {
    let mut options = InstallOptions::from_config(&ctx.config);
    options.resolve.include_optional = args.with_optional;
    options.resolve.include_test = args.with_test_deps;
    options.resolve.reinstall = args.reinstall;
    options.run_tests = !args.no_test;
    if args.strict_tests {
        options.tests = TestPolicy::Strict;
    }
    options.keep_going |= args.keep_going;
    if let Some(jobs) = args.jobs {
        if jobs == 0 {
            bail!("--jobs must be at least 1");
        }
        options.workers = jobs;
    }
    Ok(options)
}

/// Install packages, one plan per requested name.
pub async fn install(
    packages: &[String],
    args: &InstallArgs,
    formulae: Option<PathBuf>,
    quiet: bool,
    dry_run: bool,
) -> Result<i32> {
    let ctx = Context::load(formulae, quiet)?;
    let options = options(&ctx, args)?;
    let names = packages
        .iter()
        .map(|raw| package_name(raw))
        .collect::<Result<Vec<_>>>()?;
    let _lock = if dry_run {
        None
    } else {
        Some(ctx.installer.lock().await?)
    };
    let history = if dry_run { None } else { Some(ctx.history()?) };

    let mut code = EXIT_SUCCESS;
    for name in names {
        let formulae = ctx.formulae_for(&name)?;

        if dry_run {
            let plan = ctx.installer.plan(&name, &formulae, options.resolve)?;
            super::plan::print_plan(&plan, &ctx.output);
            continue;
        }

        let report = ctx.installer.install(&name, &formulae, options).await?;
        if let Some(db) = &history {
            record(db, &report).await;
        }
        report_failures(&ctx, &report);

        code = worst(code, report.exit_code());
        if code == EXIT_FAILURE && !options.keep_going {
            break;
        }
    }

    if let Some(db) = history {
        db.shutdown();
    }
    Ok(code)
}

/// Combine exit codes: a fatal error beats a test failure beats success.
pub fn worst(a: i32, b: i32) -> i32 {
    if a == EXIT_FAILURE || b == EXIT_FAILURE {
        EXIT_FAILURE
    } else if a == EXIT_TEST_FAILED || b == EXIT_TEST_FAILED {
        EXIT_TEST_FAILED
    } else {
        EXIT_SUCCESS
    }
}

async fn record(db: &DbHandle, report: &InstallReport) {
    for pkg in &report.packages {
        let event = match &pkg.outcome {
            Outcome::Installed {
                upgraded_from,
                test,
                ..
            } => {
                let action = if upgraded_from.is_some() {
                    Action::Upgrade
                } else {
                    Action::Install
                };
                let mut event = HistoryEvent::now(action, pkg.name.as_str(), true)
                    .with_to(&pkg.version)
                    .with_detail(format!("self-test {test}"));
                if let Some(from) = upgraded_from {
                    event = event.with_from(from);
                }
                event
            }
            Outcome::Failed(e) => HistoryEvent::now(Action::Install, pkg.name.as_str(), false)
                .with_to(&pkg.version)
                .with_detail(e.to_string()),
            Outcome::Skipped { .. } | Outcome::Cancelled => continue,
        };
        if let Err(e) = db.add_history(event).await {
            warn!(package = %pkg.name, error = %e, "failed to record history");
        }
    }
}

fn report_failures(ctx: &Context, report: &InstallReport) {
    for (name, err) in report.failures() {
        for line in failure_details(err) {
            ctx.output.error(&format!("{name}: {line}"));
        }
    }
}

/// Extra lines explaining a failure beyond its message: captured output,
/// log location, and the preserved scratch directory.
pub fn failure_details(err: &InstallError) -> Vec<String> {
    let mut lines = Vec::new();
    match err {
        InstallError::Build(build) => {
            if let BuildError::StepFailed { output, log, .. } = build {
                if !output.trim().is_empty() {
                    lines.push(format!("output:\n{}", output.trim_end()));
                }
                lines.push(format!("build log: {}", log.display()));
            }
            if let Some(scratch) = build.scratch() {
                lines.push(format!("build directory kept at {}", scratch.display()));
            }
        }
        InstallError::TestFailed { log, .. } => {
            lines.push(format!("test log: {}", log.display()));
        }
        _ => {}
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellar_schema::PackageName;

    #[test]
    fn test_worst_exit_code() {
        assert_eq!(worst(EXIT_SUCCESS, EXIT_SUCCESS), EXIT_SUCCESS);
        assert_eq!(worst(EXIT_SUCCESS, EXIT_TEST_FAILED), EXIT_TEST_FAILED);
        assert_eq!(worst(EXIT_TEST_FAILED, EXIT_FAILURE), EXIT_FAILURE);
        assert_eq!(worst(EXIT_FAILURE, EXIT_SUCCESS), EXIT_FAILURE);
    }

    #[test]
    fn test_failure_details_for_step_failure() {
        let err = InstallError::Build(BuildError::StepFailed {
            package: PackageName::new("foo"),
            step: 2,
            description: "make".into(),
            status: cellar_core::process::StepStatus::Exited(2),
            output: "make: *** [all] Error 1\n".into(),
            scratch: PathBuf::from("/tmp/build-foo"),
            log: PathBuf::from("/logs/build-foo.log"),
        });
        let lines = failure_details(&err);
        assert!(lines[0].contains("Error 1"));
        assert!(lines.iter().any(|l| l.contains("/logs/build-foo.log")));
        assert!(lines.iter().any(|l| l.contains("/tmp/build-foo")));
    }

    #[test]
    fn test_not_installed_has_no_details() {
        let err = InstallError::NotInstalled(PackageName::new("foo"));
        assert!(failure_details(&err).is_empty());
    }
}
