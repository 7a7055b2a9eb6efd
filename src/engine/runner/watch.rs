//! Watch mode is implemented as a set of independent bindings:
//!
//! 1. **File watcher**: `notify` (through `notify-debouncer-full`) monitors
//!    the static roots of every watched pattern and forwards changed paths.
//! 2. **Dispatcher**: matches each path against the patterns of every
//!    [`Binding`] and signals the matching ones.
//! 3. **Binding workers**: one thread per binding, each running its own
//!    [`State`] machine, so a slow script rebuild never delays a style patch.
//!
//! ## The state machine
//!
//! ```text
//!   Idle --change--> Debouncing --quiet window--> Rebuilding --done--> Idle
//!                     ^     |                          |
//!                     +-----+ change restarts window   | change queued
//!                                                      v
//!                                                 Debouncing
//! ```
//!
//! A change arriving during a rebuild never cancels it; it is coalesced into
//! a single follow-up debounce once the rebuild finishes. A failed rebuild is
//! logged and the binding goes back to Idle.
//!
//! [`Supervisor::watch`] runs until its [`Shutdown`] is triggered, then moves
//! every binding to Stopped.

use std::collections::HashSet;
use std::env;
use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, channel};
use std::thread::JoinHandle;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use glob::Pattern;
use notify::{EventKind, RecursiveMode};
use notify_debouncer_full::{DebounceEventResult, new_debouncer};

use crate::engine::runner::live::{ReloadEvent, ReloadSink, Resource};
use crate::engine::runner::{Report, Runner};
use crate::error::{RunError, WatchError};
use crate::io::href;
use crate::notification::{Notifier, failure_title};

/// What connected browsers are told after a successful rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Hot-swap the produced files of this kind.
    Patch(Resource),
    /// Reload the whole page.
    Reload,
}

/// A set of watched patterns and the task re-run when one of them changes.
#[derive(Debug, Clone)]
pub struct Binding {
    pub task: String,
    pub patterns: Vec<String>,
    pub signal: Signal,
}

impl Binding {
    pub fn new<I, S>(task: impl Into<String>, patterns: I, signal: Signal) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            task: task.into(),
            patterns: patterns.into_iter().map(Into::into).collect(),
            signal,
        }
    }

    /// The reload events announcing a successful rebuild.
    pub fn events(&self, report: &Report, public: &Utf8Path) -> Vec<ReloadEvent> {
        let Signal::Patch(resource) = self.signal else {
            return vec![ReloadEvent::Reload];
        };

        let events: Vec<_> = report
            .output(&self.task)
            .into_iter()
            .flat_map(|output| output.with_extension(resource.extension()))
            .map(|path| ReloadEvent::Inject {
                resource,
                path: href(path, public),
            })
            .collect();

        if events.is_empty() {
            vec![ReloadEvent::Reload]
        } else {
            events
        }
    }
}

/// The state of a single binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Debouncing,
    Rebuilding,
    Stopped,
}

/// The transition rules, kept apart from threads and timers.
#[derive(Debug)]
pub struct Machine {
    state: State,
    /// A change arrived while rebuilding.
    queued: bool,
}

impl Default for Machine {
    fn default() -> Self {
        Self {
            state: State::Idle,
            queued: false,
        }
    }
}

impl Machine {
    pub fn state(&self) -> State {
        self.state
    }

    /// A matching file changed. Returns `true` if the quiet window should
    /// (re)start.
    pub fn on_change(&mut self) -> bool {
        match self.state {
            State::Idle | State::Debouncing => {
                self.state = State::Debouncing;
                true
            }
            State::Rebuilding => {
                self.queued = true;
                false
            }
            State::Stopped => false,
        }
    }

    /// The quiet window expired. Returns `true` if a rebuild should start.
    pub fn on_quiet(&mut self) -> bool {
        if self.state == State::Debouncing {
            self.state = State::Rebuilding;
            true
        } else {
            false
        }
    }

    /// The rebuild finished, successfully or not.
    pub fn on_rebuilt(&mut self) {
        if self.state != State::Rebuilding {
            return;
        }

        self.state = if std::mem::take(&mut self.queued) {
            State::Debouncing
        } else {
            State::Idle
        };
    }

    pub fn on_stop(&mut self) {
        self.state = State::Stopped;
    }
}

enum Input {
    Change,
    Stop,
}

/// Re-runs a task for a binding.
pub trait Rebuild: Send + Sync {
    fn rebuild(&self, task: &str) -> Result<Report, RunError>;
}

impl Rebuild for Runner {
    fn rebuild(&self, task: &str) -> Result<Report, RunError> {
        self.run(task)
    }
}

struct Worker {
    binding: Binding,
    rx: Receiver<Input>,
    debounce: Duration,
    public: Utf8PathBuf,
    rebuild: Arc<dyn Rebuild>,
    sink: Arc<dyn ReloadSink>,
    notifier: Arc<dyn Notifier>,
}

impl Worker {
    fn run(self) {
        let mut machine = Machine::default();

        loop {
            match machine.state() {
                State::Idle => match self.rx.recv() {
                    Ok(Input::Change) => {
                        machine.on_change();
                    }
                    Ok(Input::Stop) | Err(_) => machine.on_stop(),
                },
                State::Debouncing => match self.rx.recv_timeout(self.debounce) {
                    Ok(Input::Change) => {
                        machine.on_change();
                    }
                    Ok(Input::Stop) | Err(RecvTimeoutError::Disconnected) => machine.on_stop(),
                    Err(RecvTimeoutError::Timeout) => {
                        machine.on_quiet();
                    }
                },
                State::Rebuilding => {
                    self.rebuild_once();

                    let mut stop = false;
                    while let Ok(input) = self.rx.try_recv() {
                        match input {
                            Input::Change => {
                                machine.on_change();
                            }
                            Input::Stop => stop = true,
                        }
                    }

                    machine.on_rebuilt();
                    if stop {
                        machine.on_stop();
                    }
                }
                State::Stopped => break,
            }
        }

        tracing::debug!("stopped watching for {}", self.binding.task);
    }

    fn rebuild_once(&self) {
        let task = &self.binding.task;
        tracing::info!("change detected, re-running {task}...");

        match self.rebuild.rebuild(task) {
            Ok(report) => {
                for event in self.binding.events(&report, &self.public) {
                    self.sink.send(event);
                }
                tracing::info!("rebuilt {task}, watching for changes...");
            }
            // The runner has already notified about failed stages.
            Err(RunError::Stage(e)) => {
                tracing::warn!("{} failed, watching for changes...", e.stage);
            }
            Err(e) => self.notifier.failure(&failure_title(task), &e.to_string()),
        }
    }
}

enum Wake {
    Files(DebounceEventResult),
    Shutdown,
}

/// Ends a [`Supervisor::watch`] loop from another thread.
#[derive(Clone)]
pub struct Shutdown(Sender<Wake>);

impl Shutdown {
    pub fn trigger(&self) {
        self.0.send(Wake::Shutdown).ok();
    }
}

/// Runs the watch bindings of a development session.
pub struct Supervisor {
    bindings: Vec<Binding>,
    debounce: Duration,
    public: Utf8PathBuf,
    wake: (Sender<Wake>, Receiver<Wake>),
}

impl Supervisor {
    /// `public` is the directory served to the browser; produced files are
    /// announced relative to it.
    pub fn new(bindings: Vec<Binding>, debounce: Duration, public: impl Into<Utf8PathBuf>) -> Self {
        Self {
            bindings,
            debounce,
            public: public.into(),
            wake: channel(),
        }
    }

    /// A handle which makes [`watch`](Self::watch) return.
    pub fn shutdown(&self) -> Shutdown {
        Shutdown(self.wake.0.clone())
    }

    /// Starts one worker per binding.
    pub fn spawn(
        self,
        rebuild: Arc<dyn Rebuild>,
        sink: Arc<dyn ReloadSink>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<SupervisorHandle, WatchError> {
        let mut routes = Vec::with_capacity(self.bindings.len());
        let mut threads = Vec::with_capacity(self.bindings.len());

        for binding in self.bindings {
            let patterns = binding
                .patterns
                .iter()
                .map(|p| Pattern::new(p))
                .collect::<Result<Vec<_>, _>>()?;

            let (tx, rx) = channel();
            let worker = Worker {
                binding: binding.clone(),
                rx,
                debounce: self.debounce,
                public: self.public.clone(),
                rebuild: rebuild.clone(),
                sink: sink.clone(),
                notifier: notifier.clone(),
            };

            threads.push(std::thread::spawn(move || worker.run()));
            routes.push(Route {
                binding,
                patterns,
                tx,
            });
        }

        Ok(SupervisorHandle { routes, threads })
    }

    /// Watches the file system until [`Shutdown::trigger`] is called, then
    /// stops every binding, letting in-flight rebuilds finish.
    pub fn watch(
        self,
        rebuild: Arc<dyn Rebuild>,
        sink: Arc<dyn ReloadSink>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<(), WatchError> {
        let pwd = Utf8PathBuf::try_from(env::current_dir()?)?;

        let mut roots = HashSet::new();
        for pattern in self.bindings.iter().flat_map(|b| &b.patterns) {
            match watch_root(pattern) {
                Ok(root) => {
                    roots.insert(root);
                }
                Err(e) => tracing::warn!("not watching {pattern}: {e}"),
            }
        }

        let Self {
            bindings,
            debounce,
            public,
            wake: (tx, rx),
        } = self;
        let handle = Supervisor::new(bindings, debounce, public).spawn(rebuild, sink, notifier)?;

        let forward = move |result: DebounceEventResult| {
            tx.send(Wake::Files(result)).ok();
        };
        let mut debouncer = new_debouncer(Duration::from_millis(50), None, forward)?;

        for root in collapse_watch_roots(roots) {
            tracing::info!("watching {root}");
            debouncer.watch(root.as_std_path(), RecursiveMode::Recursive)?;
        }

        loop {
            match rx.recv() {
                Ok(Wake::Files(Ok(events))) => {
                    let paths = events
                        .iter()
                        .filter(|de| {
                            matches!(
                                de.event.kind,
                                EventKind::Create(..) | EventKind::Modify(..) | EventKind::Remove(..)
                            )
                        })
                        .flat_map(|de| &de.event.paths)
                        .filter_map(|path| Utf8Path::from_path(path))
                        .map(|path| path.strip_prefix(&pwd).unwrap_or(path).to_path_buf())
                        .collect::<HashSet<_>>();

                    for path in paths {
                        handle.dispatch(&path);
                    }
                }
                Ok(Wake::Files(Err(errors))) => {
                    for e in errors {
                        tracing::error!("watch error: {e:?}");
                    }
                }
                Ok(Wake::Shutdown) | Err(_) => break,
            }
        }

        tracing::info!("shutting down, waiting for running rebuilds...");
        drop(debouncer);
        handle.stop();
        Ok(())
    }
}

struct Route {
    binding: Binding,
    patterns: Vec<Pattern>,
    tx: Sender<Input>,
}

/// Controls the workers started by [`Supervisor::spawn`].
pub struct SupervisorHandle {
    routes: Vec<Route>,
    threads: Vec<JoinHandle<()>>,
}

impl SupervisorHandle {
    /// Signals every binding whose patterns match `path`. Returns the number
    /// of bindings signalled.
    pub fn dispatch(&self, path: &Utf8Path) -> usize {
        let mut hits = 0;

        for route in &self.routes {
            if route.patterns.iter().any(|p| p.matches_path(path.as_std_path())) {
                tracing::debug!("{path} changed, signalling {}", route.binding.task);
                if route.tx.send(Input::Change).is_ok() {
                    hits += 1;
                }
            }
        }

        hits
    }

    /// Moves every binding to Stopped and waits for the workers to exit.
    /// An in-flight rebuild is allowed to finish first.
    pub fn stop(self) {
        for route in &self.routes {
            route.tx.send(Input::Stop).ok();
        }

        for thread in self.threads {
            if thread.join().is_err() {
                tracing::error!("watch worker panicked");
            }
        }
    }
}

/// The static directory prefix of a glob, the part before the first
/// component with a wildcard. Must exist on disk.
pub fn watch_root(pattern: &str) -> Result<Utf8PathBuf, WatchError> {
    let path = Utf8Path::new(pattern);

    let components: Vec<_> = path.components().collect();
    let split = components
        .iter()
        .position(|c| c.as_str().contains(['*', '?', '[']))
        .unwrap_or(components.len());

    let mut root: Utf8PathBuf = components.iter().take(split).collect();

    // A concrete file is watched through its directory to catch atomic saves.
    if split == components.len() && root.is_file() {
        root = root.parent().map(Utf8Path::to_path_buf).unwrap_or_default();
    }

    if root.as_str().is_empty() {
        root = Utf8PathBuf::from(".");
    }

    Ok(root.canonicalize_utf8()?)
}

/// Reduces a set of paths to the minimal set of recursive watch roots.
fn collapse_watch_roots(paths: HashSet<Utf8PathBuf>) -> Vec<Utf8PathBuf> {
    let mut paths: Vec<_> = paths.into_iter().collect();
    paths.sort();

    let mut filtered: Vec<Utf8PathBuf> = Vec::new();
    for path in paths {
        if let Some(last) = filtered.last()
            && path.starts_with(last)
        {
            continue;
        }
        filtered.push(path);
    }

    filtered
}
