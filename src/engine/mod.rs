//! Stage contract and execution.
//!
//! A [`Stage`] is an opaque unit of work: it reads its sources, writes its
//! outputs and reports the files it produced. The scheduler in [`runner`]
//! only sequences stages; everything a stage does on disk or over the
//! network is its own business.

pub mod runner;

use camino::{Utf8Path, Utf8PathBuf};

use crate::core::{Environment, Mode};

/// Files produced by a successful stage run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageOutput {
    pub files: Vec<Utf8PathBuf>,
}

impl StageOutput {
    pub fn new(files: Vec<Utf8PathBuf>) -> Self {
        Self { files }
    }

    pub fn single(file: impl Into<Utf8PathBuf>) -> Self {
        Self {
            files: vec![file.into()],
        }
    }

    /// Produced files with the given extension.
    pub fn with_extension<'a>(&'a self, ext: &'a str) -> impl Iterator<Item = &'a Utf8Path> {
        self.files
            .iter()
            .map(Utf8PathBuf::as_path)
            .filter(move |path| path.extension() == Some(ext))
    }
}

/// Everything a stage gets to see while it runs.
pub struct StageContext<'a> {
    pub task: &'a str,
    pub env: &'a Environment,
    pub span: tracing::Span,
}

impl StageContext<'_> {
    pub fn mode(&self) -> Mode {
        self.env.mode
    }

    /// Forwards a progress message to the notifier.
    pub fn notify(&self, title: &str, message: &str) {
        self.env.notifier.success(title, message);
    }
}

/// A unit of work registered under a task name.
///
/// Any `Fn(&StageContext) -> anyhow::Result<StageOutput>` is a stage.
pub trait Stage: Send + Sync {
    fn execute(&self, ctx: &StageContext) -> anyhow::Result<StageOutput>;
}

impl<F> Stage for F
where
    F: Fn(&StageContext) -> anyhow::Result<StageOutput> + Send + Sync,
{
    fn execute(&self, ctx: &StageContext) -> anyhow::Result<StageOutput> {
        self(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_filters_by_extension() {
        let output = StageOutput::new(vec![
            "dist/assets/css/style.css".into(),
            "dist/assets/css/style.css.map".into(),
            "dist/index.html".into(),
        ]);

        let css: Vec<_> = output.with_extension("css").collect();
        assert_eq!(css, [Utf8Path::new("dist/assets/css/style.css")]);
    }
}
