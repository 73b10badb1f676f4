//! Formula authoring commands

use std::path::Path;

use anyhow::{Context as _, Result};

use cellar_core::Reporter;
use cellar_core::formula::load_file;
use cellar_core::pipeline::EXIT_SUCCESS;
use cellar_schema::{Formula, SourceRef};

use crate::ui::Output;

/// Validate a formula file
pub fn check(path: &Path, quiet: bool) -> Result<i32> {
    let formula = load_file(path).with_context(|| format!("{} is not valid", path.display()))?;
    let output = Output::new(quiet);

    output.success(&format!("Formula '{}' is valid", formula.name));
    for line in summary(&formula) {
        output.info(&line);
    }
    if formula.test.is_empty() {
        output.warning("No test steps defined; installs will not be verified");
    }
    Ok(EXIT_SUCCESS)
}

fn summary(formula: &Formula) -> Vec<String> {
    let mut lines = vec![format!("Version: {}", formula.version)];
    for source in &formula.sources {
        let line = match source {
            SourceRef::Archive { checksum, .. } => {
                format!("Source: {} ({})", source.url(), checksum.algorithm())
            }
            SourceRef::Vcs { .. } => format!("Source: {} (git)", source.url()),
        };
        lines.push(line);
    }
    if !formula.dependencies.is_empty() {
        let deps: Vec<String> = formula
            .dependencies
            .iter()
            .map(|d| format!("{} ({})", d.name, d.kind))
            .collect();
        lines.push(format!("Dependencies: {}", deps.join(", ")));
    }
    lines.push(format!(
        "Steps: {} install, {} test",
        formula.install.len(),
        formula.test.len()
    ));
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellar_core::formula::parse_formula;

    #[test]
    fn test_summary_lists_sources_and_dependencies() {
        let formula = parse_formula(
            Some("foo"),
            r#"
[formula]
name = "foo"
version = "1.0"

[source]
url = "https://example.com/foo-1.0.tar.gz"
sha256 = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"

[dependencies]
runtime = ["bar"]

[install]
steps = ["make install"]
"#,
        )
        .unwrap();

        let lines = summary(&formula);
        assert_eq!(lines[0], "Version: 1.0");
        assert_eq!(
            lines[1],
            "Source: https://example.com/foo-1.0.tar.gz (sha256)"
        );
        assert_eq!(lines[2], "Dependencies: bar (runtime)");
        assert_eq!(lines[3], "Steps: 1 install, 0 test");
    }
}
