//! Shared command context.
//!
//! Groups the state every command needs: the cellar layout, the loaded
//! configuration, an installer wired to the console reporter, and the
//! history database.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result, bail};

use cellar_core::formula::FormulaSet;
use cellar_core::{Config, Installer, Layout};
use cellar_schema::PackageName;

use crate::store::DbHandle;
use crate::ui::Output;

/// Parse a package name given on the command line.
///
/// Names end up in keg and receipt paths, so anything that is not a plain
/// file name is rejected.
pub fn package_name(raw: &str) -> Result<PackageName> {
    let name = PackageName::new(raw);
    if !name.is_valid() {
        bail!("Invalid package name '{raw}'");
    }
    Ok(name)
}

/// Groups common state used by commands.
#[derive(Clone)]
pub struct Context {
    pub layout: Layout,
    pub config: Config,
    pub installer: Installer,
    pub output: Output,
    formula_dir: PathBuf,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("layout", &self.layout)
            .field("formula_dir", &self.formula_dir)
            .finish_non_exhaustive()
    }
}

impl Context {
    /// Load the layout and config and open the installer.
    ///
    /// `formulae` overrides the configured formula directory.
    pub fn load(formulae: Option<PathBuf>, quiet: bool) -> Result<Self> {
        let layout = Layout::from_env().context("Could not determine the cellar home directory")?;
        let config = Config::load(&layout)?;
        let output = Output::new(quiet);
        let installer = Installer::new(layout.clone(), &config, Arc::new(output.clone()))
            .with_context(|| format!("Failed to open cellar at {}", layout.root().display()))?;
        let formula_dir = formulae.unwrap_or_else(|| config.formula_dir(&layout));

        Ok(Self {
            layout,
            config,
            installer,
            output,
            formula_dir,
        })
    }

    /// Directory formulae are loaded from.
    pub fn formula_dir(&self) -> &std::path::Path {
        &self.formula_dir
    }

    /// Load `name` and every formula it can reach.
    pub fn formulae_for(&self, name: &PackageName) -> Result<FormulaSet> {
        FormulaSet::load_closure(&self.formula_dir, name)
            .with_context(|| format!("Failed to load formulae for '{name}'"))
    }

    /// Spawn the history database actor.
    pub fn history(&self) -> Result<DbHandle> {
        DbHandle::spawn(&self.layout.db_path()).context("Failed to open history database")
    }
}
