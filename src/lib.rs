#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod blueprint;
pub mod config;
mod core;
mod engine;
mod error;
pub mod io;
mod notification;
pub mod stages;
mod utils;

pub use crate::blueprint::{Blueprint, Group, Plan, Step, Task};
pub use crate::config::{Config, Credentials};
pub use crate::core::{Environment, Mode};
pub use crate::engine::runner::{Diagnostics, Report, Runner, TaskExecution};
pub use crate::engine::{Stage, StageContext, StageOutput};
pub use crate::error::*;
pub use crate::notification::{ConsoleNotifier, DesktopNotifier, Notifier};

#[cfg(feature = "server")]
pub use crate::engine::runner::http;

/// Live reload and watch mode.
#[cfg(feature = "live")]
pub mod live {
    pub use crate::engine::runner::live::{
        LiveReload, ReloadEvent, ReloadSink, Resource, client_script, inject_client,
    };
    pub use crate::engine::runner::watch::{
        Binding, Machine, Rebuild, Shutdown, Signal, State, Supervisor, SupervisorHandle,
        watch_root,
    };
}
