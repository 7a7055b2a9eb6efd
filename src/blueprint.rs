//! The task graph.
//!
//! A [`Blueprint`] maps task names to a stage and an ordered list of
//! prerequisite [`Group`]s. Groups are either run in series, one task after
//! another, or in parallel, all members started together. Tasks without a
//! stage are aggregates: they complete as soon as their prerequisites do.
//!
//! Prerequisites are referenced by name, so tasks can be declared in any
//! order. Names are only checked when a task is resolved into a [`Plan`].

use std::collections::{HashMap, HashSet};
use std::fmt::{self, Display};
use std::sync::Arc;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::engine::Stage;
use crate::error::PipelineError;

/// A set of prerequisites sharing one ordering rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Group {
    /// Members run one after another, in declaration order.
    Series(Vec<String>),
    /// Members are started together once their own prerequisites are done.
    Parallel(Vec<String>),
}

impl Group {
    pub fn series<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Group::Series(names.into_iter().map(Into::into).collect())
    }

    pub fn parallel<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Group::Parallel(names.into_iter().map(Into::into).collect())
    }

    pub fn names(&self) -> &[String] {
        match self {
            Group::Series(names) | Group::Parallel(names) => names,
        }
    }

    pub fn is_parallel(&self) -> bool {
        matches!(self, Group::Parallel(_))
    }
}

/// A named node of the graph.
pub struct Task {
    pub(crate) name: String,
    pub(crate) prerequisites: Vec<Group>,
    pub(crate) stage: Option<Arc<dyn Stage>>,
}

impl Task {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn prerequisites(&self) -> &[Group] {
        &self.prerequisites
    }

    pub fn is_aggregate(&self) -> bool {
        self.stage.is_none()
    }

    fn dependencies(&self) -> impl Iterator<Item = &str> {
        self.prerequisites
            .iter()
            .flat_map(Group::names)
            .map(String::as_str)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("prerequisites", &self.prerequisites)
            .field("aggregate", &self.is_aggregate())
            .finish()
    }
}

/// A set of tasks the scheduler starts together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub tasks: Vec<String>,
}

impl Step {
    pub fn is_parallel(&self) -> bool {
        self.tasks.len() > 1
    }
}

/// The resolved execution order of a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub steps: Vec<Step>,
}

impl Plan {
    /// Every task of the plan, in execution order.
    pub fn order(&self) -> Vec<String> {
        self.steps
            .iter()
            .flat_map(|step| step.tasks.iter().cloned())
            .collect()
    }

    pub fn contains(&self, task: &str) -> bool {
        self.steps
            .iter()
            .any(|step| step.tasks.iter().any(|t| t == task))
    }
}

/// The blueprint of the pipeline: every task and its prerequisites.
///
/// # Example
///
/// ```rust
/// use tsumugi::{Blueprint, Group, StageContext, StageOutput};
///
/// fn noop(_: &StageContext) -> anyhow::Result<StageOutput> {
///     Ok(StageOutput::default())
/// }
///
/// let mut pipeline = Blueprint::new();
/// pipeline.define("styles", [], noop)?;
/// pipeline.define("scripts", [], noop)?;
/// pipeline.aggregate("build", [Group::parallel(["styles", "scripts"])])?;
///
/// assert_eq!(pipeline.resolve_order("build")?, ["styles", "scripts", "build"]);
/// # Ok::<(), tsumugi::PipelineError>(())
/// ```
#[derive(Default)]
pub struct Blueprint {
    tasks: HashMap<String, Task>,
    /// Declaration order.
    names: Vec<String>,
}

impl Blueprint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a task backed by a stage.
    pub fn define<S>(
        &mut self,
        name: impl Into<String>,
        prerequisites: impl IntoIterator<Item = Group>,
        stage: S,
    ) -> Result<&mut Self, PipelineError>
    where
        S: Stage + 'static,
    {
        self.insert(name.into(), prerequisites, Some(Arc::new(stage)))
    }

    /// Registers a task without a stage of its own.
    pub fn aggregate(
        &mut self,
        name: impl Into<String>,
        prerequisites: impl IntoIterator<Item = Group>,
    ) -> Result<&mut Self, PipelineError> {
        self.insert(name.into(), prerequisites, None)
    }

    fn insert(
        &mut self,
        name: String,
        prerequisites: impl IntoIterator<Item = Group>,
        stage: Option<Arc<dyn Stage>>,
    ) -> Result<&mut Self, PipelineError> {
        if self.tasks.contains_key(&name) {
            return Err(PipelineError::Duplicate(name));
        }

        let task = Task {
            name: name.clone(),
            prerequisites: prerequisites.into_iter().collect(),
            stage,
        };

        self.names.push(name.clone());
        self.tasks.insert(name, task);
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&Task> {
        self.tasks.get(name)
    }

    /// Task names in declaration order.
    pub fn tasks(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// Every transitive prerequisite of `name` followed by `name` itself.
    pub fn resolve_order(&self, name: &str) -> Result<Vec<String>, PipelineError> {
        Ok(self.plan(name)?.order())
    }

    /// Resolves `name` into steps, checking the reachable subgraph first.
    pub fn plan(&self, name: &str) -> Result<Plan, PipelineError> {
        self.check(name)?;

        let mut planner = Planner {
            blueprint: self,
            done: HashSet::new(),
            steps: Vec::new(),
        };
        planner.visit(name);

        Ok(Plan {
            steps: planner.steps,
        })
    }

    /// Verifies that every task reachable from `name` exists and that the
    /// reachable subgraph is acyclic.
    fn check(&self, name: &str) -> Result<(), PipelineError> {
        let mut graph = DiGraphMap::<&str, ()>::new();
        let mut stack = vec![(name, None::<&str>)];
        let mut seen = HashSet::new();

        while let Some((current, required_by)) = stack.pop() {
            let Some(task) = self.tasks.get(current) else {
                return Err(PipelineError::Unknown {
                    task: current.to_string(),
                    required_by: required_by.map(str::to_string),
                });
            };

            if !seen.insert(current) {
                continue;
            }

            graph.add_node(current);
            for dependency in task.dependencies() {
                graph.add_edge(dependency, current, ());
                stack.push((dependency, Some(current)));
            }
        }

        toposort(&graph, None)
            .map(|_| ())
            .map_err(|cycle| PipelineError::Cycle(cycle.node_id().to_string()))
    }
}

/// Depth-first linearization over an already checked, acyclic subgraph.
struct Planner<'a> {
    blueprint: &'a Blueprint,
    done: HashSet<&'a str>,
    steps: Vec<Step>,
}

impl<'a> Planner<'a> {
    fn visit(&mut self, name: &'a str) {
        if self.done.contains(name) {
            return;
        }

        self.visit_prerequisites(name);
        self.done.insert(name);
        self.steps.push(Step {
            tasks: vec![name.to_string()],
        });
    }

    fn visit_prerequisites(&mut self, name: &'a str) {
        let blueprint = self.blueprint;
        let task = &blueprint.tasks[name];

        for group in &task.prerequisites {
            match group {
                Group::Series(names) => {
                    for member in names {
                        self.visit(member);
                    }
                }
                Group::Parallel(names) => {
                    for member in names {
                        if !self.done.contains(member.as_str()) {
                            self.visit_prerequisites(member);
                        }
                    }

                    let mut tasks = Vec::new();
                    for member in names {
                        if self.done.insert(member.as_str()) {
                            tasks.push(member.clone());
                        }
                    }

                    if !tasks.is_empty() {
                        self.steps.push(Step { tasks });
                    }
                }
            }
        }
    }
}

impl Display for Blueprint {
    /// Renders the graph as a Mermaid diagram.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "graph LR")?;

        let index: HashMap<&str, usize> = self
            .names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
            .collect();

        for (i, name) in self.names.iter().enumerate() {
            let task = &self.tasks[name];
            let label = name.replace('"', "\\\"");
            if task.is_aggregate() {
                writeln!(f, "    {i}([\"{label}\"])")?;
            } else {
                writeln!(f, "    {i}[\"{label}\"]")?;
            }
        }

        for name in &self.names {
            let task = &self.tasks[name];
            for group in &task.prerequisites {
                let arrow = if group.is_parallel() { "-.->" } else { "-->" };
                for member in group.names() {
                    if let Some(source) = index.get(member.as_str()) {
                        writeln!(f, "    {source} {arrow} {}", index[name.as_str()])?;
                    }
                }
            }
        }

        Ok(())
    }
}

impl fmt::Debug for Blueprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Blueprint")
            .field("tasks", &self.names)
            .finish()
    }
}
