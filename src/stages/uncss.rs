use std::fs;

use anyhow::{Context, bail};
use camino::{Utf8Path, Utf8PathBuf};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::config;
use crate::engine::{Stage, StageContext, StageOutput};
use crate::io;
use crate::stages::tool::Tool;

/// Strips selectors no built page uses with `purgecss`, then re-minifies the
/// result with `esbuild`. Stylesheets are rewritten in place.
pub struct Uncss {
    config: config::Uncss,
    node: Utf8PathBuf,
}

impl Uncss {
    pub fn new(config: &config::Uncss, node: &Utf8Path) -> Self {
        Self {
            config: config.clone(),
            node: node.to_path_buf(),
        }
    }

    fn purge(&self, css: &Utf8Path, pages: &[Utf8PathBuf]) -> anyhow::Result<()> {
        let out = css.parent().unwrap_or(Utf8Path::new("."));

        let mut tool = Tool::node(&self.node, "purgecss")
            .arg("--css")
            .arg(css)
            .arg("--content")
            .args(pages)
            .arg("--output")
            .arg(out);

        if !self.config.safelist.is_empty() {
            tool = tool.arg("--safelist").args(&self.config.safelist);
        }

        tool.run()?;
        Ok(())
    }

    fn minify(&self, css: &Utf8Path) -> anyhow::Result<()> {
        let text = fs::read_to_string(css).with_context(|| format!("couldn't read {css}"))?;

        let data = Tool::node(&self.node, "esbuild")
            .arg("--minify")
            .arg("--loader=css")
            .input(text)
            .run()?;

        io::write(css, data)
    }
}

impl Stage for Uncss {
    fn execute(&self, ctx: &StageContext) -> anyhow::Result<StageOutput> {
        let pages = io::expand(&self.config.html, &[])?;
        if pages.is_empty() {
            bail!("no pages match {:?}, build the site first", self.config.html);
        }

        let sheets = io::expand(&self.config.css, &[])?;
        ctx.span.pb_set_length(sheets.len() as u64);

        for css in &sheets {
            ctx.span.pb_set_message(&format!("Purging {css}"));
            let before = fs::metadata(css).map(|m| m.len()).unwrap_or(0);

            self.purge(css, &pages)?;
            self.minify(css)?;

            let after = fs::metadata(css).map(|m| m.len()).unwrap_or(0);
            ctx.notify(
                "Purged stylesheet",
                &format!("{css}: {before} -> {after} bytes against {} page(s)", pages.len()),
            );
            ctx.span.pb_inc(1);
        }

        Ok(StageOutput::new(sheets))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Environment, Mode};

    #[test]
    fn refuses_to_run_without_pages() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();

        let config = config::Uncss {
            css: vec![format!("{root}/*.css")],
            html: vec![format!("{root}/*.html")],
            safelist: vec![],
        };

        let err = Uncss::new(&config, root)
            .execute(&StageContext {
                task: "uncss",
                env: &Environment::new(Mode::Build),
                span: tracing::Span::none(),
            })
            .unwrap_err();

        assert!(err.to_string().contains("build the site first"));
    }
}
