use anyhow::anyhow;
use grass::{Options, OutputStyle};

use crate::config;
use crate::engine::{Stage, StageContext, StageOutput};
use crate::io;

/// Compiles the entry stylesheets and joins them into a single file.
pub struct Styles {
    config: config::Styles,
}

impl Styles {
    pub fn new(config: &config::Styles) -> Self {
        Self {
            config: config.clone(),
        }
    }
}

impl Stage for Styles {
    fn execute(&self, _: &StageContext) -> anyhow::Result<StageOutput> {
        let options = Options::default()
            .style(OutputStyle::Compressed)
            .load_path(self.config.load_path.as_std_path());

        let mut css = String::new();
        for path in io::expand(&self.config.entries, &[])? {
            // Sass partials are only ever pulled in by `@use` or `@import`.
            if path.file_name().is_some_and(|name| name.starts_with('_')) {
                continue;
            }

            let out = grass::from_path(path.as_std_path(), &options)
                .map_err(|e| anyhow!("{path}: {e}"))?;

            if !css.is_empty() {
                css.push('\n');
            }
            css.push_str(out.trim_end());
        }

        let path = self.config.dest.join(&self.config.output);
        io::write(&path, css)?;

        Ok(StageOutput::single(path))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use camino::{Utf8Path, Utf8PathBuf};

    use super::*;
    use crate::core::{Environment, Mode};

    fn setup(files: &[(&str, &str)]) -> (tempfile::TempDir, config::Styles) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap().to_path_buf();

        for (name, body) in files {
            let path = root.join("styles").join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, body).unwrap();
        }

        let config = config::Styles {
            entries: vec![format!("{root}/styles/*.scss")],
            watch: vec![],
            load_path: root.join("styles"),
            dest: root.join("dist/css"),
            output: "style.css".into(),
        };

        (dir, config)
    }

    fn run(config: &config::Styles) -> anyhow::Result<StageOutput> {
        Styles::new(config).execute(&StageContext {
            task: "styles",
            env: &Environment::new(Mode::Build),
            span: tracing::Span::none(),
        })
    }

    #[test]
    fn entries_are_compiled_and_joined() {
        let (_dir, config) = setup(&[
            ("_sizes.scss", "$gap: 4px;"),
            ("a.scss", "@import 'sizes';\n.a { margin: $gap; }"),
            ("b.scss", ".b { .c { margin: 0; } }"),
        ]);

        let output = run(&config).unwrap();
        let path: Utf8PathBuf = config.dest.join("style.css");
        assert_eq!(output.files, [path.clone()]);

        let css = fs::read_to_string(path).unwrap();
        let (a, b) = css.split_once('\n').unwrap();
        assert_eq!(a, ".a{margin:4px}");
        assert_eq!(b, ".b .c{margin:0}");
    }

    #[test]
    fn syntax_errors_fail_the_stage() {
        let (_dir, config) = setup(&[("main.scss", ".a { color: }")]);

        let err = run(&config).unwrap_err();
        assert!(err.to_string().contains("main.scss"));
    }
}
