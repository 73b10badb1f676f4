//! In-memory formula model.
//!
//! A [`Formula`] is the validated form of one package definition. It is
//! produced by the loader in `cellar-core` and never mutated afterwards.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::hash::Checksum;
use crate::types::{PackageName, Version};

/// When a dependency is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
    /// Needed while building only.
    Build,
    /// Needed while the package runs; blocks uninstall of the dependency.
    Runtime,
    /// Extra functionality, only resolved on request.
    Optional,
    /// Needed by the self-test only.
    Test,
}

impl DependencyKind {
    /// All kinds, in declaration order.
    pub const ALL: [Self; 4] = [Self::Build, Self::Runtime, Self::Optional, Self::Test];

    /// Build and runtime edges must form an acyclic graph.
    pub fn is_hard(self) -> bool {
        matches!(self, Self::Build | Self::Runtime)
    }

    /// Lowercase identifier as written in formula files.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Build => "build",
            Self::Runtime => "runtime",
            Self::Optional => "optional",
            Self::Test => "test",
        }
    }
}

impl fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DependencyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown dependency kind '{s}'"))
    }
}

/// A single dependency edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    /// Name of the required formula.
    pub name: PackageName,
    /// Edge kind.
    pub kind: DependencyKind,
    /// Minimum or range requirement (`>=1.2`), if declared.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirement: Option<String>,
}

/// Where a formula's source comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceRef {
    /// A downloadable archive or file, verified by checksum.
    Archive {
        /// Resource name; `None` for the primary source.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        /// Download URL (`https://`, `http://`, `file://`, or a local path).
        url: String,
        /// Expected content checksum.
        checksum: Checksum,
    },
    /// A version-control checkout ("head" builds).
    Vcs {
        /// Resource name; `None` for the primary source.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        /// Repository URL.
        url: String,
        /// Branch, tag, or commit to check out.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        revision: Option<String>,
    },
}

impl SourceRef {
    /// The source URL or repository locator.
    pub fn url(&self) -> &str {
        match self {
            Self::Archive { url, .. } | Self::Vcs { url, .. } => url,
        }
    }

    /// Resource name, if this is a secondary source.
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Archive { name, .. } | Self::Vcs { name, .. } => name.as_deref(),
        }
    }

    /// Content checksum, present for archives only.
    pub fn checksum(&self) -> Option<&Checksum> {
        match self {
            Self::Archive { checksum, .. } => Some(checksum),
            Self::Vcs { .. } => None,
        }
    }

    /// Human-readable locator recorded in receipts.
    pub fn locator(&self) -> String {
        match self {
            Self::Archive { url, .. } => url.clone(),
            Self::Vcs { url, revision, .. } => match revision {
                Some(rev) => format!("{url}#{rev}"),
                None => url.clone(),
            },
        }
    }
}

/// One install step. The set is closed so every step stays auditable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum Step {
    /// Run a command through `/bin/sh -c` in the source directory.
    Shell {
        /// Command line.
        command: String,
    },
    /// Copy a file or directory from the source tree into the prefix.
    Copy {
        /// Path relative to the source directory.
        from: String,
        /// Path relative to the install prefix.
        to: String,
    },
    /// Create a symlink inside the prefix.
    Symlink {
        /// Link target, written as-is (usually relative).
        target: String,
        /// Link path relative to the install prefix.
        link: String,
    },
    /// Write a file into the prefix, expanding `{{name}}`, `{{version}}`
    /// and `{{prefix}}`.
    Template {
        /// Path relative to the install prefix.
        path: String,
        /// File contents before expansion.
        contents: String,
    },
}

impl Step {
    /// Short description used in logs and failure reports.
    pub fn describe(&self) -> String {
        match self {
            Self::Shell { command } => command.clone(),
            Self::Copy { from, to } => format!("copy {from} -> {to}"),
            Self::Symlink { target, link } => format!("symlink {link} -> {target}"),
            Self::Template { path, .. } => format!("template {path}"),
        }
    }
}

/// A self-test command; success means exit status zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestStep {
    /// Command line run through `/bin/sh -c`.
    pub command: String,
}

/// A validated package definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Formula {
    /// Unique formula name.
    pub name: PackageName,
    /// Version built from the primary source.
    pub version: Version,
    /// One-line summary.
    #[serde(default)]
    pub description: String,
    /// Project homepage.
    #[serde(default)]
    pub homepage: String,
    /// SPDX license expression.
    #[serde(default)]
    pub license: String,
    /// Message shown after install (printed, never executed).
    #[serde(default)]
    pub caveats: String,
    /// Ordered sources; the first is the primary source.
    pub sources: Vec<SourceRef>,
    /// Dependency edges, possibly with parallel entries for one name.
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    /// Ordered install steps.
    #[serde(default)]
    pub install: Vec<Step>,
    /// Ordered self-test steps.
    #[serde(default)]
    pub test: Vec<TestStep>,
}

impl Formula {
    /// The primary source (the loader guarantees at least one).
    pub fn primary_source(&self) -> Option<&SourceRef> {
        self.sources.first()
    }

    /// Secondary sources staged under `resources/<name>`.
    pub fn resources(&self) -> &[SourceRef] {
        self.sources.get(1..).unwrap_or(&[])
    }

    /// Dependency edges of the given kinds.
    pub fn dependencies_of<'a>(
        &'a self,
        kinds: &'a [DependencyKind],
    ) -> impl Iterator<Item = &'a Dependency> + 'a {
        self.dependencies
            .iter()
            .filter(move |d| kinds.contains(&d.kind))
    }
}
