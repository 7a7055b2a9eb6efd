#[cfg(feature = "live")]
use std::sync::mpsc::RecvError;

use thiserror::Error;

/// Errors raised while loading the route and credentials configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Couldn't read config file '{0}'.\n{1}")]
    Read(camino::Utf8PathBuf, std::io::Error),

    #[error("Couldn't parse config file '{0}'.\n{1}")]
    Parse(camino::Utf8PathBuf, toml::de::Error),

    #[error("Invalid glob pattern '{0}'.\n{1}")]
    Pattern(String, glob::PatternError),
}

/// Errors raised while registering or resolving tasks.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    /// A task name was registered twice.
    #[error("Task '{0}' is already defined")]
    Duplicate(String),

    /// The prerequisite relation reachable from a task is not acyclic.
    #[error("Task '{0}' is part of a prerequisite cycle")]
    Cycle(String),

    /// A requested task, or one of its prerequisites, was never registered.
    #[error("Task '{task}' is not defined{}", required_by_suffix(.required_by))]
    Unknown {
        task: String,
        required_by: Option<String>,
    },
}

fn required_by_suffix(required_by: &Option<String>) -> String {
    match required_by {
        Some(by) => format!(" (required by '{by}')"),
        None => String::new(),
    }
}

/// A stage reported an error, or panicked.
#[derive(Debug, Error)]
#[error("Stage '{stage}' failed:\n{error:#}")]
pub struct StageFailure {
    pub stage: String,
    pub error: anyhow::Error,
}

impl StageFailure {
    pub fn new(stage: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self {
            stage: stage.into(),
            error: source.into(),
        }
    }
}

/// An external program invoked by a stage did not succeed.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("'{program}' was not found, is it installed?")]
    Missing { program: String },

    #[error("Couldn't run '{program}'")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' exited with {status}:\n{stderr}")]
    Failed {
        program: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
}

/// Errors surfaced by a scheduler run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Stage(#[from] StageFailure),
}

impl RunError {
    /// The name of the stage which failed, if the run reached execution.
    pub fn stage(&self) -> Option<&str> {
        match self {
            RunError::Stage(failure) => Some(&failure.stage),
            RunError::Pipeline(_) => None,
        }
    }
}

#[cfg(feature = "live")]
#[derive(Debug, Error)]
pub enum WatchError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Notify(#[from] notify::Error),

    #[error(transparent)]
    Pattern(#[from] glob::PatternError),

    #[error(transparent)]
    Recv(#[from] RecvError),

    #[error("Path is not valid UTF-8: {0}")]
    Utf8(#[from] camino::FromPathBufError),
}

#[derive(Debug, Error)]
pub enum TsumugiError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Run(#[from] RunError),

    #[cfg(feature = "live")]
    #[error("Error while watching for file changes:\n{0}")]
    Watch(#[from] WatchError),

    #[error("Failed to bind a socket")]
    Bind(#[source] std::io::Error),
}
