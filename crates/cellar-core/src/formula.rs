//! TOML formula loading.
//!
//! Human-readable formula definitions are parsed into a raw serde shape and
//! then validated into a [`Formula`]. Loading is a pure transformation;
//! [`FormulaSet`] adds the directory walking on top.
//!
//! ```toml
//! [formula]
//! name = "jq"
//! version = "1.7.1"
//! description = "Lightweight and flexible command-line JSON processor"
//! homepage = "https://jqlang.github.io/jq/"
//! license = "MIT"
//!
//! [source]
//! url = "https://github.com/jqlang/jq/releases/download/jq-1.7.1/jq-1.7.1.tar.gz"
//! sha256 = "478c9ca129fd2e3443fe27314b455e211e0d8c60bc8ff7df703873deeee580c2"
//!
//! [[resource]]
//! name = "oniguruma"
//! url = "https://example.com/onig-6.9.9.tar.gz"
//! checksum = "blake3:..."
//!
//! [dependencies]
//! build = ["autoconf", "automake"]
//! runtime = ["oniguruma >= 6.9"]
//! test = ["expect"]
//!
//! [install]
//! steps = [
//!     "./configure --prefix=$PREFIX --disable-docs",
//!     "make install",
//!     { action = "symlink", target = "jq", link = "bin/jq1" },
//! ]
//!
//! [test]
//! steps = ["$PREFIX/bin/jq --version"]
//! ```

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use cellar_schema::{
    Checksum, ChecksumAlgorithm, ChecksumParseError, Dependency, DependencyKind, Formula,
    PackageName, SourceRef, Step, TestStep, Version,
};

/// File extension of formula definitions.
pub const FORMULA_EXTENSION: &str = "toml";

/// Errors that can occur when loading or parsing a formula.
#[derive(Error, Debug)]
pub enum LoadError {
    /// The formula file could not be read.
    #[error("failed to read formula {path}: {source}")]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The declaration is malformed: bad TOML, a missing or duplicate field,
    /// an unknown dependency kind, or no usable source.
    #[error("invalid formula '{formula}': {message}")]
    Parse {
        /// Formula name (or file stem when the name is unreadable).
        formula: String,
        /// What was wrong.
        message: String,
    },

    /// A checksum is present but is not a recognized hash encoding.
    #[error("invalid checksum in formula '{formula}': {source}")]
    ChecksumFormat {
        /// Formula name.
        formula: String,
        /// Parse failure.
        #[source]
        source: ChecksumParseError,
    },

    /// Two loaded formulae share a name.
    #[error("duplicate formula '{0}'")]
    Duplicate(PackageName),

    /// The requested formula file does not exist.
    #[error("formula '{name}' not found in {dir}")]
    NotFound {
        /// Requested formula.
        name: PackageName,
        /// Directory that was searched.
        dir: PathBuf,
    },
}

impl LoadError {
    fn parse(formula: &str, message: impl Into<String>) -> Self {
        Self::Parse {
            formula: formula.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawFormula {
    formula: RawMeta,
    #[serde(default)]
    source: Option<RawSource>,
    #[serde(default)]
    head: Option<RawSource>,
    #[serde(default)]
    resource: Vec<RawSource>,
    #[serde(default)]
    dependencies: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    install: RawSteps,
    #[serde(default)]
    test: RawTestSteps,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawMeta {
    name: String,
    version: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    homepage: String,
    #[serde(default)]
    license: String,
    #[serde(default)]
    caveats: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSource {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    git: Option<String>,
    #[serde(default)]
    revision: Option<String>,
    #[serde(default)]
    sha256: Option<String>,
    #[serde(default)]
    blake3: Option<String>,
    #[serde(default)]
    checksum: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSteps {
    #[serde(default)]
    steps: Vec<RawStep>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTestSteps {
    #[serde(default)]
    steps: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawStep {
    Command(String),
    Action(Step),
}

/// Parse a formula from TOML text.
///
/// `expected_name` is the identifier the formula was looked up by (usually
/// the file stem); when given, the declared name must match it.
///
/// # Errors
///
/// Returns [`LoadError::Parse`] for malformed declarations and
/// [`LoadError::ChecksumFormat`] for unrecognized checksum encodings.
pub fn parse_formula(expected_name: Option<&str>, text: &str) -> Result<Formula, LoadError> {
    let label = expected_name.unwrap_or("<unnamed>");
    let raw: RawFormula =
        toml::from_str(text).map_err(|e| LoadError::parse(label, e.message().to_string()))?;

    let name = PackageName::new(&raw.formula.name);
    let label = name.as_str();
    if !name.is_valid() {
        return Err(LoadError::parse(label, "name contains invalid characters"));
    }
    if let Some(expected) = expected_name {
        if name != PackageName::new(expected) {
            return Err(LoadError::parse(
                label,
                format!("declared name does not match its identifier '{expected}'"),
            ));
        }
    }
    if raw.formula.version.trim().is_empty() {
        return Err(LoadError::parse(label, "missing required field 'version'"));
    }

    let mut sources = Vec::new();
    match (raw.source, raw.head) {
        (Some(_), Some(_)) => {
            return Err(LoadError::parse(
                label,
                "declare either [source] or [head], not both",
            ));
        }
        (Some(primary), None) | (None, Some(primary)) => {
            if primary.name.is_some() {
                return Err(LoadError::parse(label, "the primary source cannot be named"));
            }
            sources.push(convert_source(label, primary)?);
        }
        (None, None) => {
            return Err(LoadError::parse(
                label,
                "no source: declare a [source] archive or a [head] repository",
            ));
        }
    }

    let mut resource_names = Vec::new();
    for resource in raw.resource {
        let Some(resource_name) = resource.name.clone() else {
            return Err(LoadError::parse(label, "every [[resource]] needs a name"));
        };
        if resource_name.contains(['/', '\\']) || resource_name.starts_with('.') {
            return Err(LoadError::parse(
                label,
                format!("invalid resource name '{resource_name}'"),
            ));
        }
        if resource_names.contains(&resource_name) {
            return Err(LoadError::parse(
                label,
                format!("duplicate resource '{resource_name}'"),
            ));
        }
        resource_names.push(resource_name);
        sources.push(convert_source(label, resource)?);
    }

    let mut dependencies = Vec::new();
    for (kind, entries) in raw.dependencies {
        let kind: DependencyKind = kind.parse().map_err(|e: String| LoadError::parse(label, e))?;
        for entry in entries {
            let dep = parse_dependency(label, &entry, kind)?;
            if dep.name == name {
                return Err(LoadError::parse(label, "a formula cannot depend on itself"));
            }
            if dependencies
                .iter()
                .any(|d: &Dependency| d.name == dep.name && d.kind == dep.kind)
            {
                return Err(LoadError::parse(
                    label,
                    format!("duplicate {kind} dependency '{}'", dep.name),
                ));
            }
            dependencies.push(dep);
        }
    }

    let mut install = Vec::with_capacity(raw.install.steps.len());
    for (i, step) in raw.install.steps.into_iter().enumerate() {
        let step = match step {
            RawStep::Command(command) => Step::Shell { command },
            RawStep::Action(step) => step,
        };
        if let Step::Shell { command } = &step {
            if command.trim().is_empty() {
                return Err(LoadError::parse(
                    label,
                    format!("install step {} is empty", i + 1),
                ));
            }
        }
        install.push(step);
    }
    if install.is_empty() {
        return Err(LoadError::parse(label, "missing required field 'install.steps'"));
    }

    let test = raw
        .test
        .steps
        .into_iter()
        .map(|command| TestStep { command })
        .collect();

    Ok(Formula {
        name,
        version: Version::new(&raw.formula.version),
        description: raw.formula.description,
        homepage: raw.formula.homepage,
        license: raw.formula.license,
        caveats: raw.formula.caveats,
        sources,
        dependencies,
        install,
        test,
    })
}

fn convert_source(formula: &str, raw: RawSource) -> Result<SourceRef, LoadError> {
    match (raw.url, raw.git) {
        (Some(_), Some(_)) => Err(LoadError::parse(
            formula,
            "a source declares either 'url' or 'git', not both",
        )),
        (None, None) => Err(LoadError::parse(
            formula,
            "a source needs a 'url' or a 'git' locator",
        )),
        (None, Some(git)) => {
            if raw.sha256.is_some() || raw.blake3.is_some() || raw.checksum.is_some() {
                return Err(LoadError::parse(
                    formula,
                    "repository sources cannot carry a checksum",
                ));
            }
            Ok(SourceRef::Vcs {
                name: raw.name,
                url: git,
                revision: raw.revision,
            })
        }
        (Some(url), None) => {
            if raw.revision.is_some() {
                return Err(LoadError::parse(
                    formula,
                    "'revision' only applies to 'git' sources",
                ));
            }
            let checksum = match (raw.sha256, raw.blake3, raw.checksum) {
                (Some(hex), None, None) => Checksum::new(ChecksumAlgorithm::Sha256, hex.trim()),
                (None, Some(hex), None) => Checksum::new(ChecksumAlgorithm::Blake3, hex.trim()),
                (None, None, Some(text)) => text.parse(),
                (None, None, None) => {
                    return Err(LoadError::parse(
                        formula,
                        format!("source '{url}' is missing a checksum"),
                    ));
                }
                _ => {
                    return Err(LoadError::parse(
                        formula,
                        format!("source '{url}' declares more than one checksum"),
                    ));
                }
            }
            .map_err(|source| LoadError::ChecksumFormat {
                formula: formula.to_string(),
                source,
            })?;
            Ok(SourceRef::Archive {
                name: raw.name,
                url,
                checksum,
            })
        }
    }
}

/// Parse `name`, `name >= 1.2`, or `name^3` into a dependency edge.
fn parse_dependency(
    formula: &str,
    entry: &str,
    kind: DependencyKind,
) -> Result<Dependency, LoadError> {
    let entry = entry.trim();
    let (name, requirement) = match entry.find(['<', '>', '=', '^', '~']) {
        Some(idx) => (entry[..idx].trim(), Some(entry[idx..].trim().to_string())),
        None => (entry, None),
    };

    let name = PackageName::new(name);
    if !name.is_valid() {
        return Err(LoadError::parse(
            formula,
            format!("invalid dependency '{entry}'"),
        ));
    }

    Ok(Dependency {
        name,
        kind,
        requirement,
    })
}

/// Load a single formula file; the file stem is its identifier.
///
/// # Errors
///
/// Returns [`LoadError::Io`] if the file cannot be read, otherwise the
/// errors of [`parse_formula`].
pub fn load_file(path: &Path) -> Result<Formula, LoadError> {
    let text = fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let stem = path.file_stem().and_then(|s| s.to_str());
    parse_formula(stem, &text)
}

/// Name-to-formula lookup passed explicitly to the resolver.
pub trait FormulaLookup {
    /// Find a formula by name.
    fn lookup(&self, name: &PackageName) -> Option<&Formula>;
}

impl FormulaLookup for HashMap<PackageName, Formula> {
    fn lookup(&self, name: &PackageName) -> Option<&Formula> {
        self.get(name)
    }
}

impl FormulaLookup for BTreeMap<PackageName, Formula> {
    fn lookup(&self, name: &PackageName) -> Option<&Formula> {
        self.get(name)
    }
}

/// A set of loaded formulae with unique names.
#[derive(Debug, Clone, Default)]
pub struct FormulaSet {
    formulae: BTreeMap<PackageName, Formula>,
}

impl FormulaSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a formula.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::Duplicate`] if the name is already present.
    pub fn insert(&mut self, formula: Formula) -> Result<(), LoadError> {
        if self.formulae.contains_key(&formula.name) {
            return Err(LoadError::Duplicate(formula.name));
        }
        self.formulae.insert(formula.name.clone(), formula);
        Ok(())
    }

    /// Number of formulae.
    pub fn len(&self) -> usize {
        self.formulae.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.formulae.is_empty()
    }

    /// Iterate formulae in name order.
    pub fn iter(&self) -> impl Iterator<Item = &Formula> {
        self.formulae.values()
    }

    /// Load every `*.toml` file in `dir`.
    ///
    /// # Errors
    ///
    /// Fails on the first unreadable or invalid formula, or on a duplicate name.
    pub fn load_dir(dir: &Path) -> Result<Self, LoadError> {
        let entries = fs::read_dir(dir).map_err(|source| LoadError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == FORMULA_EXTENSION))
            .collect();
        paths.sort();

        let mut set = Self::new();
        for path in paths {
            set.insert(load_file(&path)?)?;
        }
        debug!(count = set.len(), dir = %dir.display(), "loaded formula directory");
        Ok(set)
    }

    /// Load `target` from `dir` together with every formula reachable through
    /// its dependency declarations (all kinds).
    ///
    /// Dependencies without a file are left out; the resolver reports them
    /// as unknown if they end up on a required edge.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::NotFound`] if the target itself has no file, or
    /// the first load failure encountered.
    pub fn load_closure(dir: &Path, target: &PackageName) -> Result<Self, LoadError> {
        let target_path = formula_path(dir, target);
        if !target_path.is_file() {
            return Err(LoadError::NotFound {
                name: target.clone(),
                dir: dir.to_path_buf(),
            });
        }

        let mut set = Self::new();
        let mut queue = VecDeque::from([target.clone()]);
        while let Some(name) = queue.pop_front() {
            if set.formulae.contains_key(&name) {
                continue;
            }
            let path = formula_path(dir, &name);
            if !path.is_file() {
                debug!(formula = %name, "no formula file for dependency");
                continue;
            }
            let formula = load_file(&path)?;
            for dep in &formula.dependencies {
                if !set.formulae.contains_key(&dep.name) {
                    queue.push_back(dep.name.clone());
                }
            }
            set.insert(formula)?;
        }
        Ok(set)
    }
}

impl FormulaLookup for FormulaSet {
    fn lookup(&self, name: &PackageName) -> Option<&Formula> {
        self.formulae.get(name)
    }
}

/// Location of a formula file inside a formula directory.
pub fn formula_path(dir: &Path, name: &PackageName) -> PathBuf {
    dir.join(format!("{name}.{FORMULA_EXTENSION}"))
}
