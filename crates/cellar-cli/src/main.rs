//! cellar - build packages from source formulae

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cellar_cli::cmd;
use cellar_cli::ui::Output;
use cellar_cli::{Cli, Commands, FormulaCommands};
use cellar_core::Reporter;
use cellar_core::pipeline::EXIT_FAILURE;

#[tokio::main]
async fn main() {
    // Logs go to stderr so they never mix with command output
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output = Output::new(cli.quiet);

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            output.error(&format!("{e:#}"));
            EXIT_FAILURE
        }
    };

    output.wait_async().await;
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    let dry_run = cli.dry_run;
    let quiet = cli.quiet;
    let formulae = cli.formulae;

    match cli.command {
        Commands::Install { packages, args } => {
            cmd::install::install(&packages, &args, formulae, quiet, dry_run).await
        }
        Commands::Uninstall { packages, force } => {
            cmd::uninstall::uninstall(&packages, force, quiet, dry_run).await
        }
        Commands::Test { package } => cmd::test::test(&package, formulae, quiet).await,
        Commands::Plan {
            package,
            with_optional,
            with_test_deps,
        } => cmd::plan::plan(&package, with_optional, with_test_deps, formulae, quiet),
        Commands::List => cmd::list::list(quiet),
        Commands::Info { package } => cmd::info::info(&package, formulae, quiet),
        Commands::History { package } => cmd::history::history(package.as_deref(), quiet).await,
        Commands::Clean => cmd::clean::clean(quiet, dry_run).await,
        Commands::Formula { command } => match command {
            FormulaCommands::Check { path } => cmd::formula::check(&path, quiet),
        },
        Commands::Completions { shell } => {
            cmd::completions::completions(shell);
            Ok(0)
        }
    }
}
