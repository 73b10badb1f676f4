//! UI Actor - Single-threaded event processing
//!
//! All output is channeled through one thread so concurrent build workers
//! never interleave partial lines. Output is line-oriented: a package gets
//! a new line whenever its phase changes, which keeps logs readable when
//! stdout is not a terminal.

use std::collections::HashMap;
use std::io::Write;
use std::sync::mpsc;
use std::thread;

use super::theme::{Theme, format_size};

/// Phase of one package, as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Fetching { current: u64, total: Option<u64> },
    Building { step: usize, total: usize },
    Testing,
    Removing,
    Skipped(String),
    Done(String),
    Failed(String),
    Cancelled,
}

impl Phase {
    /// Whether a new event of this phase deserves its own line after `prev`.
    fn supersedes(&self, prev: Option<&Phase>) -> bool {
        match (prev, self) {
            (Some(Phase::Fetching { .. }), Phase::Fetching { .. }) => false,
            (Some(p), next) => p != next,
            (None, _) => true,
        }
    }
}

/// Events that can be sent to the UI actor
#[derive(Debug)]
pub enum UiEvent {
    Section(String),
    Package {
        name: String,
        version: String,
        phase: Phase,
    },
    Info(String),
    Success(String),
    Warning(String),
    Error(String),
    Summary {
        count: usize,
        action: String,
        elapsed_secs: f64,
    },
    /// Acknowledged once every earlier event has been rendered.
    Sync(tokio::sync::oneshot::Sender<()>),
    Shutdown,
}

/// Handle to the UI actor thread
pub struct UiActor {
    sender: mpsc::Sender<UiEvent>,
    _handle: thread::JoinHandle<()>,
}

impl std::fmt::Debug for UiActor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UiActor").finish_non_exhaustive()
    }
}

impl UiActor {
    /// Spawn a new UI actor thread
    pub fn spawn() -> Self {
        let (sender, receiver) = mpsc::channel();
        let handle = thread::spawn(move || run_event_loop(&receiver));
        Self {
            sender,
            _handle: handle,
        }
    }

    /// Get a cloneable sender for this actor
    pub fn sender(&self) -> mpsc::Sender<UiEvent> {
        self.sender.clone()
    }
}

impl Drop for UiActor {
    fn drop(&mut self) {
        let _ = self.sender.send(UiEvent::Shutdown);
    }
}

/// Line renderer with per-package phase memory.
#[derive(Debug)]
pub struct Renderer {
    theme: Theme,
    phases: HashMap<String, Phase>,
}

impl Renderer {
    pub fn new(theme: Theme) -> Self {
        Self {
            theme,
            phases: HashMap::new(),
        }
    }

    /// Text to print for `event`, if any. Errors and warnings are flagged
    /// with `true` so they go to stderr.
    pub fn render(&mut self, event: &UiEvent) -> Option<(String, bool)> {
        let theme = &self.theme;
        let c = &theme.colors;
        let line = match event {
            UiEvent::Section(title) => (format!("\n{title}"), false),
            UiEvent::Package {
                name,
                version,
                phase,
            } => {
                if !phase.supersedes(self.phases.get(name)) {
                    return None;
                }
                self.phases.insert(name.clone(), phase.clone());
                return Some((self.package_line(name, version, phase), false));
            }
            UiEvent::Info(msg) => (format!("  {} {msg}", theme.icons.info), false),
            UiEvent::Success(msg) => (
                format!("  {} {msg}", theme.paint(theme.icons.success, c.success)),
                false,
            ),
            UiEvent::Warning(msg) => (
                format!("  {} {msg}", theme.paint(theme.icons.warning, c.warning)),
                true,
            ),
            UiEvent::Error(msg) => (
                format!("  {} {msg}", theme.paint(theme.icons.error, c.error)),
                true,
            ),
            UiEvent::Summary {
                count,
                action,
                elapsed_secs,
            } => (
                format!(
                    "\n  {} {count} package{} {action} in {elapsed_secs:.1}s",
                    theme.paint(theme.icons.success, c.success),
                    if *count == 1 { "" } else { "s" },
                ),
                false,
            ),
            UiEvent::Sync(_) | UiEvent::Shutdown => return None,
        };
        Some(line)
    }

    fn package_line(&self, name: &str, version: &str, phase: &Phase) -> String {
        let theme = &self.theme;
        let c = &theme.colors;
        let (icon, color, detail) = match phase {
            Phase::Fetching { total, .. } => (
                theme.icons.active,
                c.active,
                match total {
                    Some(t) => format!("fetching ({})", format_size(*t)),
                    None => "fetching".to_string(),
                },
            ),
            Phase::Building { step, total } => (
                theme.icons.active,
                c.active,
                format!("building (step {step}/{total})"),
            ),
            Phase::Testing => (theme.icons.active, c.active, "testing".to_string()),
            Phase::Removing => (theme.icons.active, c.active, "removing".to_string()),
            Phase::Skipped(reason) => (theme.icons.success, c.secondary, reason.clone()),
            Phase::Done(detail) => (theme.icons.success, c.success, detail.clone()),
            Phase::Failed(reason) => (theme.icons.error, c.error, reason.clone()),
            Phase::Cancelled => (theme.icons.pending, c.warning, "cancelled".to_string()),
        };
        let name = format!("{name:<width$}", width = theme.name_width);
        let version = format!("{version:<width$}", width = theme.version_width);
        format!(
            "  {} {} {} {detail}",
            theme.paint(icon, color),
            theme.paint(&name, c.package_name),
            theme.paint(&version, c.version),
        )
        .trim_end()
        .to_string()
    }
}

/// Main event loop for the UI actor
fn run_event_loop(receiver: &mpsc::Receiver<UiEvent>) {
    let mut renderer = Renderer::new(Theme::default());
    while let Ok(event) = receiver.recv() {
        match event {
            UiEvent::Sync(tx) => {
                let _ = std::io::stdout().flush();
                let _ = tx.send(());
            }
            UiEvent::Shutdown => break,
            event => {
                if let Some((line, to_stderr)) = renderer.render(&event) {
                    if to_stderr {
                        eprintln!("{line}");
                    } else {
                        println!("{line}");
                    }
                }
            }
        }
    }
}
