use std::fs;

use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};

use crate::config;
use crate::engine::{Stage, StageContext, StageOutput};
use crate::io;
use crate::stages::tool::Tool;

/// Concatenates vendor libraries and project scripts into one bundle, then
/// minifies it with `esbuild`.
pub struct Scripts {
    config: config::Scripts,
    node: Utf8PathBuf,
}

impl Scripts {
    pub fn new(config: &config::Scripts, node: &Utf8Path) -> Self {
        Self {
            config: config.clone(),
            node: node.to_path_buf(),
        }
    }

    fn bundle(&self) -> anyhow::Result<String> {
        let sources = self
            .config
            .vendor
            .iter()
            .cloned()
            .chain(io::expand(&self.config.entries, &[])?);

        let mut bundle = String::new();
        for path in sources {
            let text = fs::read_to_string(&path).with_context(|| format!("couldn't read {path}"))?;
            let text = text.trim_end();
            bundle.push_str(text);
            // A file without a trailing semicolon would run into the next one.
            if !text.ends_with(';') {
                bundle.push(';');
            }
            bundle.push('\n');
        }

        Ok(bundle)
    }
}

impl Stage for Scripts {
    fn execute(&self, _: &StageContext) -> anyhow::Result<StageOutput> {
        let bundle = self.bundle()?;

        let data = if self.config.minify {
            Tool::node(&self.node, "esbuild")
                .arg("--minify")
                .arg("--loader=js")
                .arg(format!("--target={}", self.config.target))
                .input(bundle)
                .run()?
        } else {
            bundle.into_bytes()
        };

        let path = self.config.dest.join(&self.config.output);
        io::write(&path, data)?;

        Ok(StageOutput::single(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Environment, Mode};

    fn setup() -> (tempfile::TempDir, config::Scripts) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap().to_path_buf();

        fs::create_dir_all(root.join("vendor")).unwrap();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::write(root.join("vendor/lib.js"), "var lib = 1").unwrap();
        fs::write(root.join("src/b.js"), "console.log(lib + 2);").unwrap();
        fs::write(root.join("src/a.js"), "console.log(lib + 1);").unwrap();

        let config = config::Scripts {
            vendor: vec![root.join("vendor/lib.js")],
            entries: vec![format!("{root}/src/*.js")],
            dest: root.join("dist/js"),
            output: "script.js".into(),
            minify: false,
            target: "es2015".into(),
        };

        (dir, config)
    }

    fn run(stage: &Scripts) -> anyhow::Result<StageOutput> {
        stage.execute(&StageContext {
            task: "scripts",
            env: &Environment::new(Mode::Build),
            span: tracing::Span::none(),
        })
    }

    #[test]
    fn vendor_files_come_first() {
        let (_dir, config) = setup();
        let output = run(&Scripts::new(&config, Utf8Path::new("node_modules"))).unwrap();

        let js = fs::read_to_string(&output.files[0]).unwrap();
        assert_eq!(
            js,
            "var lib = 1;\nconsole.log(lib + 1);\nconsole.log(lib + 2);\n"
        );
    }

    #[test]
    fn missing_vendor_file_fails() {
        let (_dir, mut config) = setup();
        config.vendor.push("does/not/exist.js".into());

        let err = run(&Scripts::new(&config, Utf8Path::new("node_modules"))).unwrap_err();
        assert!(format!("{err:#}").contains("does/not/exist.js"));
    }
}
