use anyhow::Context;
use camino::Utf8PathBuf;
use minijinja::{Environment, context, path_loader};

use crate::config;
#[cfg(feature = "live")]
use crate::core::Mode;
use crate::engine::{Stage, StageContext, StageOutput};
use crate::io;

/// Renders every page template into the public directory.
///
/// Partials live next to the pages and can be pulled in with
/// `{% include "_includes/nav.html" %}`, but are never rendered on their own.
pub struct Templates {
    config: config::Templates,
}

impl Templates {
    pub fn new(config: &config::Templates) -> Self {
        Self {
            config: config.clone(),
        }
    }
}

impl Stage for Templates {
    fn execute(&self, ctx: &StageContext) -> anyhow::Result<StageOutput> {
        let root = &self.config.root;
        let pages = io::expand(&self.config.entries, &self.config.partials)?;

        let mut env = Environment::new();
        env.set_loader(path_loader(root.as_std_path()));

        let mut files = Vec::with_capacity(pages.len());
        for page in pages {
            let name = page
                .strip_prefix(root)
                .with_context(|| format!("{page} is outside of the template root {root}"))?;

            // minijinja names templates with forward slashes
            let key = name
                .components()
                .map(|c| c.as_str())
                .collect::<Vec<_>>()
                .join("/");

            let html = env
                .get_template(&key)
                .and_then(|template| {
                    template.render(context! {
                        generator => ctx.env.generator,
                        mode => ctx.mode().as_str(),
                    })
                })
                .with_context(|| format!("couldn't render {page}"))?;

            let html = with_live_client(html, ctx);

            let path: Utf8PathBuf = self.config.dest.join(name);
            io::write(&path, html)?;
            files.push(path);
        }

        tracing::debug!("rendered {} page(s)", files.len());
        Ok(StageOutput::new(files))
    }
}

#[cfg(feature = "live")]
fn with_live_client(html: String, ctx: &StageContext) -> String {
    match (ctx.mode(), ctx.env.live_port) {
        (Mode::Watch, Some(port)) => crate::engine::runner::live::inject_client(&html, port),
        _ => html,
    }
}

#[cfg(not(feature = "live"))]
fn with_live_client(html: String, _: &StageContext) -> String {
    html
}

#[cfg(test)]
mod tests {
    use std::fs;

    use camino::Utf8Path;

    use super::*;
    use crate::core::{Environment, Mode};

    fn site() -> (tempfile::TempDir, config::Templates) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap().to_path_buf();

        fs::create_dir_all(root.join("src/_includes")).unwrap();
        fs::write(root.join("src/_includes/nav.html"), "<nav>menu</nav>").unwrap();
        fs::write(
            root.join("src/index.html"),
            "<html><body>{% include \"_includes/nav.html\" %}<p>{{ mode }}</p></body></html>",
        )
        .unwrap();

        let config = config::Templates {
            root: root.join("src"),
            entries: vec![format!("{root}/src/*.html")],
            partials: vec![format!("{root}/src/_includes/*.html")],
            dest: root.join("dist"),
        };

        (dir, config)
    }

    fn run(stage: &Templates, env: &Environment) -> anyhow::Result<StageOutput> {
        stage.execute(&StageContext {
            task: "templates",
            env,
            span: tracing::Span::none(),
        })
    }

    #[test]
    fn renders_pages_with_partials() {
        let (_dir, config) = site();
        let stage = Templates::new(&config);

        let output = run(&stage, &Environment::new(Mode::Build)).unwrap();

        assert_eq!(output.files, [config.dest.join("index.html")]);
        let html = fs::read_to_string(&output.files[0]).unwrap();
        assert_eq!(html, "<html><body><nav>menu</nav><p>build</p></body></html>");
    }

    #[cfg(feature = "live")]
    #[test]
    fn watch_mode_injects_live_client() {
        let (_dir, config) = site();
        let stage = Templates::new(&config);
        let env = Environment::new(Mode::Watch).with_live_port(1337);

        let output = run(&stage, &env).unwrap();

        let html = fs::read_to_string(&output.files[0]).unwrap();
        assert!(html.contains("<script>"));
        assert!(html.ends_with("</script></body></html>"));
    }

    #[test]
    fn syntax_errors_name_the_page() {
        let (_dir, config) = site();
        fs::write(config.root.join("broken.html"), "{% if %}").unwrap();

        let err = run(&Templates::new(&config), &Environment::new(Mode::Build)).unwrap_err();
        assert!(format!("{err:#}").contains("broken.html"));
    }
}
