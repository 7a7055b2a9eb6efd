mod diagnostics;
#[cfg(feature = "server")]
pub mod http;
#[cfg(feature = "live")]
pub mod live;
#[cfg(feature = "live")]
pub mod watch;

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{Level, Span};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::blueprint::{Blueprint, Step};
use crate::core::Environment;
use crate::engine::{StageContext, StageOutput};
use crate::error::{RunError, StageFailure};
use crate::notification::{failure_title, success_title};
use crate::utils::{STYLE_RUN, STYLE_STAGE, as_overhead, panic_message};

pub use diagnostics::Diagnostics;

#[derive(Debug, Clone)]
pub struct TaskExecution {
    pub start: Instant,
    pub duration: Duration,
}

/// The outcome of a successful run.
#[derive(Debug, Default)]
pub struct Report {
    /// Files produced by each executed stage.
    pub outputs: HashMap<String, StageOutput>,
    pub diagnostics: Diagnostics,
}

impl Report {
    pub fn output(&self, task: &str) -> Option<&StageOutput> {
        self.outputs.get(task)
    }
}

type StageResult = Result<StageOutput, StageFailure>;

/// Executes tasks of a blueprint in dependency order.
///
/// The runner is cheap to clone, so the watch supervisor can hand a copy to
/// every binding.
#[derive(Clone)]
pub struct Runner {
    blueprint: Arc<Blueprint>,
    env: Environment,
}

impl Runner {
    pub fn new(blueprint: Arc<Blueprint>, env: Environment) -> Self {
        Self { blueprint, env }
    }

    pub fn blueprint(&self) -> &Blueprint {
        &self.blueprint
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    /// Runs `name` after all of its transitive prerequisites.
    ///
    /// Steps run one after another. Every task of a multi-task step is started
    /// on its own thread before any of them is awaited, and the step ends once
    /// all of them have returned. The first failing task (in declaration
    /// order) fails the whole run and no later step is started.
    pub fn run(&self, name: &str) -> Result<Report, RunError> {
        let plan = self.blueprint.plan(name)?;
        let start = Instant::now();

        let total = plan.steps.iter().map(|s| s.tasks.len()).sum::<usize>();

        let root_span = tracing::span!(Level::INFO, "run", task = name);
        root_span.pb_set_style(&STYLE_RUN);
        root_span.pb_set_length(total as u64);
        root_span.pb_set_message(&format!("Running {name}..."));
        let _enter = root_span.enter();

        let mut report = Report::default();

        for step in &plan.steps {
            let mut failure = None;

            for (task, result, execution) in self.run_step(step, &root_span) {
                root_span.pb_inc(1);
                report
                    .diagnostics
                    .execution_times
                    .insert(task.clone(), execution);

                match result {
                    Ok(output) => {
                        report.outputs.insert(task, output);
                    }
                    Err(e) if failure.is_none() => failure = Some(e),
                    Err(e) => tracing::debug!("discarding concurrent failure: {e}"),
                }
            }

            if let Some(failure) = failure {
                return Err(failure.into());
            }
        }

        tracing::info!("finished {name} {}", as_overhead(start));
        Ok(report)
    }

    fn run_step(&self, step: &Step, parent: &Span) -> Vec<(String, StageResult, TaskExecution)> {
        if let [task] = step.tasks.as_slice() {
            let (result, execution) = self.execute(task, parent);
            return vec![(task.clone(), result, execution)];
        }

        std::thread::scope(|s| {
            let handles: Vec<_> = step
                .tasks
                .iter()
                .map(|task| (task, s.spawn(move || self.execute(task, parent))))
                .collect();

            handles
                .into_iter()
                .map(|(task, handle)| {
                    let (result, execution) = handle.join().unwrap_or_else(|panic| {
                        let error = anyhow::anyhow!(panic_message(panic.as_ref()));
                        let execution = TaskExecution {
                            start: Instant::now(),
                            duration: Duration::ZERO,
                        };
                        (Err(StageFailure::new(task.as_str(), error)), execution)
                    });
                    (task.clone(), result, execution)
                })
                .collect()
        })
    }

    fn execute(&self, name: &str, parent: &Span) -> (StageResult, TaskExecution) {
        let start = Instant::now();

        let stage = match self.blueprint.get(name) {
            Some(task) => task.stage.clone(),
            None => {
                let error = anyhow::anyhow!("task is not defined");
                let execution = TaskExecution {
                    start,
                    duration: Duration::ZERO,
                };
                return (Err(StageFailure::new(name, error)), execution);
            }
        };

        let Some(stage) = stage else {
            tracing::debug!("{name} complete");
            let execution = TaskExecution {
                start,
                duration: start.elapsed(),
            };
            return (Ok(StageOutput::default()), execution);
        };

        let span = tracing::span!(parent: parent, Level::INFO, "stage", name = name);
        span.pb_set_style(&STYLE_STAGE);
        span.pb_set_message(&format!("Running {name}"));
        let _enter = span.enter();

        let context = StageContext {
            task: name,
            env: &self.env,
            span: span.clone(),
        };

        let result = match catch_unwind(AssertUnwindSafe(|| stage.execute(&context))) {
            Ok(result) => result,
            Err(panic) => Err(anyhow::anyhow!(panic_message(panic.as_ref()))),
        };

        let duration = start.elapsed();
        let notifier = &self.env.notifier;

        let result = match result {
            Ok(output) => {
                let message = format!(
                    "{name} wrote {} file(s) in {duration:.2?}",
                    output.files.len()
                );
                notifier.success(&success_title(name), &message);
                Ok(output)
            }
            Err(error) => {
                notifier.failure(&failure_title(name), &format!("{error:#}"));
                Err(StageFailure::new(name, error))
            }
        };

        (result, TaskExecution { start, duration })
    }
}
