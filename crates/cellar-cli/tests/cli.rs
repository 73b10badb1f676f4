//! End-to-end tests for the `cellar` command-line interface.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use cellar_schema::{Checksum, ChecksumAlgorithm};
use tempfile::TempDir;

/// A temporary cellar home with its own formula directory.
struct TestContext {
    temp_dir: TempDir,
    home: PathBuf,
    formulae: PathBuf,
}

impl TestContext {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let home = temp_dir.path().join(".cellar");
        let formulae = temp_dir.path().join("formulae");
        std::fs::create_dir_all(&formulae).expect("failed to create formula dir");
        std::fs::create_dir_all(temp_dir.path().join("archives"))
            .expect("failed to create archive dir");
        Self {
            temp_dir,
            home,
            formulae,
        }
    }

    fn cellar(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_cellar"))
            .args(args)
            .env("HOME", self.temp_dir.path())
            .env("CELLAR_HOME", &self.home)
            .env("CELLAR_FORMULAE", &self.formulae)
            .env("NO_COLOR", "1")
            .env_remove("CELLAR_JOBS")
            .output()
            .expect("failed to run cellar")
    }

    /// Write a one-file source archive and return its URL and sha256.
    fn archive(&self, name: &str) -> (String, String) {
        let path = self.temp_dir.path().join("archives").join(format!("{name}.tar.gz"));
        let encoder = flate2::write::GzEncoder::new(
            File::create(&path).unwrap(),
            flate2::Compression::default(),
        );
        let mut builder = tar::Builder::new(encoder);
        let data = format!("hello from {name}\n");
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, format!("{name}-src/hello.txt"), data.as_bytes())
            .unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        let sha = Checksum::of_bytes(ChecksumAlgorithm::Sha256, &bytes)
            .hex()
            .to_string();
        (format!("file://{}", path.display()), sha)
    }

    /// Write `<formulae>/<name>.toml`.
    fn formula(&self, name: &str, runtime: &[&str], install: &[&str], test: &[&str]) -> PathBuf {
        let (url, sha) = self.archive(name);
        let mut text = format!(
            "[formula]\nname = \"{name}\"\nversion = \"1.0\"\n\n\
             [source]\nurl = \"{url}\"\nsha256 = \"{sha}\"\n\n"
        );
        if !runtime.is_empty() {
            text.push_str(&format!("[dependencies]\nruntime = [{}]\n\n", toml_list(runtime)));
        }
        text.push_str(&format!("[install]\nsteps = [{}]\n", toml_list(install)));
        if !test.is_empty() {
            text.push_str(&format!("\n[test]\nsteps = [{}]\n", toml_list(test)));
        }
        let path = self.formulae.join(format!("{name}.toml"));
        std::fs::write(&path, text).unwrap();
        path
    }

    fn keg(&self, name: &str) -> PathBuf {
        self.home.join("cellar").join(name).join("1.0")
    }

    fn receipt(&self, name: &str) -> PathBuf {
        self.home.join("receipts").join(format!("{name}.toml"))
    }
}

fn toml_list(items: &[&str]) -> String {
    items
        .iter()
        .map(|s| format!("{s:?}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

const INSTALL_HELLO: &str =
    "mkdir -p \"$PREFIX/share\" && cp hello.txt \"$PREFIX/share/$CELLAR_NAME.txt\"";

fn exists(path: &Path) -> bool {
    path.exists()
}

#[test]
fn test_help_command() {
    let ctx = TestContext::new();
    let output = ctx.cellar(&["--help"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("Usage:"));
}

#[test]
fn test_formula_check() {
    let ctx = TestContext::new();
    let path = ctx.formula("hello", &[], &[INSTALL_HELLO], &["true"]);
    let output = ctx.cellar(&["formula", "check", path.to_str().unwrap()]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(stdout(&output).contains("Formula 'hello' is valid"));

    let broken = ctx.formulae.join("broken.toml");
    std::fs::write(&broken, "[formula]\nname = \"broken\"\n").unwrap();
    let output = ctx.cellar(&["formula", "check", broken.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn test_plan_lists_dependencies_first() {
    let ctx = TestContext::new();
    ctx.formula("bar", &[], &[INSTALL_HELLO], &[]);
    ctx.formula("foo", &["bar"], &[INSTALL_HELLO], &[]);

    let output = ctx.cellar(&["plan", "foo"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let out = stdout(&output);
    let bar = out.find("1. bar 1.0 [build]").expect("bar in plan");
    let foo = out.find("2. foo 1.0 [build] <- bar").expect("foo in plan");
    assert!(bar < foo);
    assert!(!exists(&ctx.keg("bar")), "plan must not build");
}

#[test]
fn test_install_list_and_history() {
    let ctx = TestContext::new();
    ctx.formula("bar", &[], &[INSTALL_HELLO], &[]);
    ctx.formula(
        "foo",
        &["bar"],
        &[INSTALL_HELLO],
        &["test -f \"$PREFIX/share/foo.txt\""],
    );

    let output = ctx.cellar(&["install", "foo"]);
    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));
    assert!(ctx.keg("foo").join("share/foo.txt").is_file());
    assert!(ctx.keg("bar").join("share/bar.txt").is_file());
    assert!(ctx.receipt("foo").is_file());
    assert!(ctx.receipt("bar").is_file());

    let list = ctx.cellar(&["list"]);
    assert!(list.status.success());
    let out = stdout(&list);
    assert!(out.contains("foo"));
    assert!(out.contains("bar"));
    assert!(out.contains("passed"));

    let history = ctx.cellar(&["history", "foo"]);
    assert!(history.status.success());
    assert!(stdout(&history).contains("Installed 1.0"));

    // Installing again is a no-op.
    let again = ctx.cellar(&["install", "foo"]);
    assert_eq!(again.status.code(), Some(0));
}

#[test]
fn test_failing_self_test_exits_3() {
    let ctx = TestContext::new();
    ctx.formula("flaky", &[], &[INSTALL_HELLO], &["exit 1"]);

    let output = ctx.cellar(&["install", "flaky"]);
    assert_eq!(output.status.code(), Some(3), "stderr: {}", stderr(&output));
    assert!(ctx.receipt("flaky").is_file());
    let receipt = std::fs::read_to_string(ctx.receipt("flaky")).unwrap();
    assert!(receipt.contains("failed"));

    let retest = ctx.cellar(&["test", "flaky"]);
    assert_eq!(retest.status.code(), Some(3));
}

#[test]
fn test_strict_tests_exit_1() {
    let ctx = TestContext::new();
    ctx.formula("flaky", &[], &[INSTALL_HELLO], &["exit 1"]);

    let output = ctx.cellar(&["install", "--strict-tests", "flaky"]);
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn test_failed_build_exits_1_and_keeps_nothing() {
    let ctx = TestContext::new();
    ctx.formula(
        "broken",
        &[],
        &["echo step one", "echo compiler exploded; exit 2"],
        &[],
    );

    let output = ctx.cellar(&["install", "broken"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("compiler exploded"));
    assert!(!ctx.receipt("broken").exists());
    assert!(!ctx.keg("broken").exists());
}

#[test]
fn test_unknown_package_exits_1() {
    let ctx = TestContext::new();
    let output = ctx.cellar(&["install", "nope"]);
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn test_path_like_package_names_are_rejected() {
    let ctx = TestContext::new();
    for args in [
        ["install", "../escape"],
        ["uninstall", "a/b"],
        ["info", ".."],
    ] {
        let output = ctx.cellar(&args);
        assert_eq!(output.status.code(), Some(1), "{args:?}");
        assert!(stderr(&output).contains("Invalid package name"), "{args:?}");
    }
    assert!(!ctx.temp_dir.path().join("escape").exists());
}

#[test]
fn test_cycle_is_rejected_before_building() {
    let ctx = TestContext::new();
    ctx.formula("a", &["b"], &[INSTALL_HELLO], &[]);
    ctx.formula("b", &["a"], &[INSTALL_HELLO], &[]);

    let output = ctx.cellar(&["install", "a"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(!ctx.keg("a").exists());
    assert!(!ctx.keg("b").exists());
}

#[test]
fn test_uninstall_respects_dependents() {
    let ctx = TestContext::new();
    ctx.formula("bar", &[], &[INSTALL_HELLO], &[]);
    ctx.formula("foo", &["bar"], &[INSTALL_HELLO], &[]);
    assert_eq!(ctx.cellar(&["install", "foo"]).status.code(), Some(0));

    let blocked = ctx.cellar(&["uninstall", "bar"]);
    assert_eq!(blocked.status.code(), Some(1));
    assert!(ctx.receipt("bar").is_file());

    let output = ctx.cellar(&["uninstall", "foo", "bar"]);
    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));
    assert!(!ctx.keg("foo").exists());
    assert!(!ctx.receipt("bar").exists());
}

#[test]
fn test_clean_removes_preserved_build_dirs() {
    let ctx = TestContext::new();
    ctx.formula("broken", &[], &["exit 1"], &[]);
    assert_eq!(ctx.cellar(&["install", "broken"]).status.code(), Some(1));

    let scratch = ctx.home.join("tmp");
    let kept = std::fs::read_dir(&scratch).unwrap().count();
    assert!(kept > 0, "failed build should leave its directory");

    let output = ctx.cellar(&["clean"]);
    assert!(output.status.success());
    assert_eq!(std::fs::read_dir(&scratch).unwrap().count(), 0);
}
