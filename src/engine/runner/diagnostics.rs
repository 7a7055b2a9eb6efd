use std::collections::HashMap;
use std::fmt::Write;
use std::time::Duration;

use crate::blueprint::Blueprint;
use crate::engine::runner::TaskExecution;

/// Run diagnostics and timing.
///
/// Returned as part of every [`Report`](super::Report); contains the start
/// time and duration of each task that was executed.
#[derive(Debug, Default)]
pub struct Diagnostics {
    /// Task name to its execution metrics.
    pub execution_times: HashMap<String, TaskExecution>,
}

impl Diagnostics {
    /// Tasks in the order they were started.
    pub fn timeline(&self) -> Vec<(&str, &TaskExecution)> {
        let mut entries: Vec<_> = self
            .execution_times
            .iter()
            .map(|(name, exec)| (name.as_str(), exec))
            .collect();
        entries.sort_by(|a, b| a.1.start.cmp(&b.1.start).then(a.0.cmp(b.0)));
        entries
    }

    /// The sum of all stage durations.
    pub fn busy(&self) -> Duration {
        self.execution_times.values().map(|e| e.duration).sum()
    }

    /// A plain-text table of task durations, in start order.
    pub fn summary(&self) -> String {
        let timeline = self.timeline();
        let width = timeline.iter().map(|(n, _)| n.len()).max().unwrap_or(0);

        let mut f = String::new();
        for (name, exec) in timeline {
            let _ = writeln!(f, "  {name:<width$}  {:>10.2?}", exec.duration);
        }
        f
    }

    /// Renders the task graph as a Mermaid diagram, color-coded by execution
    /// duration.
    ///
    /// * **Green**: Fast
    /// * **Yellow**: Moderate
    /// * **Red**: Slow
    /// * **Grey**: Not part of this run
    pub fn render_mermaid(&self, blueprint: &Blueprint) -> String {
        let mut f = blueprint.to_string();

        let secs: Vec<f64> = self
            .execution_times
            .values()
            .map(|t| t.duration.as_secs_f64())
            .collect();
        let min_time = secs.iter().copied().fold(f64::MAX, f64::min);
        let mut max_time = secs.iter().copied().fold(f64::MIN, f64::max);

        // Avoid divide by zero if all tasks took same time
        if secs.is_empty() || (max_time - min_time).abs() < f64::EPSILON {
            max_time = min_time + 1.0;
        }

        for (i, name) in blueprint.tasks().enumerate() {
            let color = match self.execution_times.get(name) {
                Some(exec) => {
                    let t = (exec.duration.as_secs_f64() - min_time) / (max_time - min_time);
                    let (r, g) = if t < 0.5 {
                        ((255.0 * t * 2.0) as u8, 255)
                    } else {
                        (255, (255.0 * (1.0 - (t - 0.5) * 2.0)) as u8)
                    };
                    format!("#{r:02X}{g:02X}00")
                }
                None => "#D3D3D3".to_string(),
            };
            let _ = writeln!(f, "    style {i} fill:{color}");
        }

        f
    }
}
