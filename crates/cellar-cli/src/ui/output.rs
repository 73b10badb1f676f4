//! Unified UI output interface.
//!
//! All operations are sent as events to the UI actor for sequential
//! processing.

use std::sync::{OnceLock, mpsc};

use cellar_core::Reporter;
use cellar_schema::{PackageName, Version};

use super::actor::{Phase, UiActor, UiEvent};

/// Singleton instance of the UI actor channel.
static UI_ACTOR: OnceLock<mpsc::Sender<UiEvent>> = OnceLock::new();

/// Lazily initializes the UI actor and returns a sender handle.
fn get_actor_sender() -> mpsc::Sender<UiEvent> {
    UI_ACTOR
        .get_or_init(|| {
            let actor = UiActor::spawn();
            let sender = actor.sender();

            // Keep actor alive for program duration
            std::mem::forget(actor);

            sender
        })
        .clone()
}

/// A cloneable handle for sending UI events to the terminal actor.
///
/// In quiet mode only warnings, errors, and failed packages are shown.
#[derive(Clone, Debug)]
pub struct Output {
    sender: mpsc::Sender<UiEvent>,
    quiet: bool,
}

impl Output {
    /// Create a new output handle.
    pub fn new(quiet: bool) -> Self {
        Self {
            sender: get_actor_sender(),
            quiet,
        }
    }

    fn send(&self, event: UiEvent) {
        let _ = self.sender.send(event);
    }

    fn package(&self, name: &PackageName, version: &Version, phase: Phase) {
        if self.quiet && !matches!(phase, Phase::Failed(_)) {
            return;
        }
        self.send(UiEvent::Package {
            name: name.to_string(),
            version: version.to_string(),
            phase,
        });
    }

    /// Block until all pending UI events are processed.
    pub fn wait(&self) {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.send(UiEvent::Sync(tx));
        let _ = rx.blocking_recv();
    }

    /// Async version of wait.
    pub async fn wait_async(&self) {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.send(UiEvent::Sync(tx));
        let _ = rx.await;
    }
}

impl Reporter for Output {
    fn section(&self, title: &str) {
        if !self.quiet {
            self.send(UiEvent::Section(title.to_string()));
        }
    }

    fn fetching(&self, name: &PackageName, version: &Version, current: u64, total: Option<u64>) {
        self.package(name, version, Phase::Fetching { current, total });
    }

    fn building(&self, name: &PackageName, version: &Version, step: usize, total: usize) {
        self.package(name, version, Phase::Building { step, total });
    }

    fn testing(&self, name: &PackageName, version: &Version) {
        self.package(name, version, Phase::Testing);
    }

    fn removing(&self, name: &PackageName, version: &Version) {
        self.package(name, version, Phase::Removing);
    }

    fn skipped(&self, name: &PackageName, version: &Version, reason: &str) {
        self.package(name, version, Phase::Skipped(reason.to_string()));
    }

    fn done(&self, name: &PackageName, version: &Version, detail: &str) {
        self.package(name, version, Phase::Done(detail.to_string()));
    }

    fn failed(&self, name: &PackageName, version: &Version, reason: &str) {
        self.package(name, version, Phase::Failed(reason.to_string()));
    }

    fn cancelled(&self, name: &PackageName, version: &Version) {
        self.package(name, version, Phase::Cancelled);
    }

    fn info(&self, msg: &str) {
        if !self.quiet {
            self.send(UiEvent::Info(msg.to_string()));
        }
    }

    fn success(&self, msg: &str) {
        if !self.quiet {
            self.send(UiEvent::Success(msg.to_string()));
        }
    }

    fn warning(&self, msg: &str) {
        self.send(UiEvent::Warning(msg.to_string()));
    }

    fn error(&self, msg: &str) {
        self.send(UiEvent::Error(msg.to_string()));
    }

    fn summary(&self, count: usize, action: &str, elapsed_secs: f64) {
        if !self.quiet {
            self.send(UiEvent::Summary {
                count,
                action: action.to_string(),
                elapsed_secs,
            });
        }
    }
}
