use std::sync::Arc;

use crate::notification::{ConsoleNotifier, Notifier};

/// The mode in which the pipeline is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// A one-time run of the requested task.
    Build,
    /// A continuous watch mode for development.
    Watch,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Build => "build",
            Mode::Watch => "watch",
        }
    }
}

/// Process-wide state available to every stage.
///
/// Constructed once in the entry point and shared by reference with the
/// scheduler, so stages never reach for ambient global state.
#[derive(Clone)]
pub struct Environment {
    /// The name of the generator.
    pub generator: &'static str,
    /// The current run mode (Build or Watch).
    pub mode: Mode,
    /// The port of the live-reload socket (if running).
    pub live_port: Option<u16>,
    /// Sink for human-readable progress and error messages.
    pub notifier: Arc<dyn Notifier>,
}

impl Environment {
    pub fn new(mode: Mode) -> Self {
        Self {
            generator: "tsumugi",
            mode,
            live_port: None,
            notifier: Arc::new(ConsoleNotifier),
        }
    }

    pub fn with_live_port(mut self, port: u16) -> Self {
        self.live_port = Some(port);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("generator", &self.generator)
            .field("mode", &self.mode)
            .field("live_port", &self.live_port)
            .finish_non_exhaustive()
    }
}
