use camino::{Utf8Path, Utf8PathBuf};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::config;
use crate::engine::{Stage, StageContext, StageOutput};
use crate::io;
use crate::stages::tool::Tool;

/// Inlines the above-the-fold CSS of every page with the `critical` CLI.
pub struct Critical {
    config: config::Critical,
    public: Utf8PathBuf,
    node: Utf8PathBuf,
}

impl Critical {
    pub fn new(config: &config::Critical, public: &Utf8Path, node: &Utf8Path) -> Self {
        Self {
            config: config.clone(),
            public: public.to_path_buf(),
            node: node.to_path_buf(),
        }
    }

    fn args(&self, page: &Utf8Path) -> Vec<String> {
        let mut args = vec![
            page.to_string(),
            format!("--base={}", self.public),
            format!("--css={}", self.config.css),
            format!("--width={}", self.config.width),
            format!("--height={}", self.config.height),
            "--inline".to_string(),
        ];

        for ignore in &self.config.ignore {
            if ignore.starts_with('@') {
                args.push(format!("--ignore-atrule={ignore}"));
            } else {
                args.push(format!("--ignore-rule={ignore}"));
            }
        }

        for decl in &self.config.ignore_decl {
            args.push(format!("--ignore-decl={decl}"));
        }

        args
    }
}

impl Stage for Critical {
    fn execute(&self, ctx: &StageContext) -> anyhow::Result<StageOutput> {
        let pages = io::expand(&self.config.pages, &[])?;
        ctx.span.pb_set_length(pages.len() as u64);

        for page in &pages {
            ctx.span.pb_set_message(&format!("Inlining critical CSS into {page}"));
            let html = Tool::node(&self.node, "critical").args(self.args(page)).run()?;
            io::write(page, html)?;

            ctx.notify("Inlined critical CSS", page.as_str());
            ctx.span.pb_inc(1);
        }

        Ok(StageOutput::new(pages))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignores_are_split_by_kind() {
        let config = config::Critical {
            ignore: vec!["@font-face".into(), ".carousel".into()],
            ..Default::default()
        };
        let stage = Critical::new(&config, Utf8Path::new("dist"), Utf8Path::new("node_modules"));

        let args = stage.args(Utf8Path::new("dist/index.html"));
        assert_eq!(args[0], "dist/index.html");
        assert!(args.contains(&"--base=dist".to_string()));
        assert!(args.contains(&"--css=dist/assets/css/style.css".to_string()));
        assert!(args.contains(&"--ignore-atrule=@font-face".to_string()));
        assert!(args.contains(&"--ignore-rule=.carousel".to_string()));
    }

    #[test]
    fn url_declarations_are_left_out_by_default() {
        let stage = Critical::new(
            &config::Critical::default(),
            Utf8Path::new("dist"),
            Utf8Path::new("node_modules"),
        );

        let args = stage.args(Utf8Path::new("dist/index.html"));
        assert!(args.contains(&r"--ignore-decl=/url\(/".to_string()));
        assert!(args.contains(&"--ignore-atrule=@font-face".to_string()));
    }
}
