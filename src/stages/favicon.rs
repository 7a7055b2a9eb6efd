//! Favicon generation and markup injection.
//!
//! `generate-favicon` renders the source image at the sizes browsers and
//! home-screen launchers ask for, plus a web manifest. `inject-favicon-markups`
//! then links them from the `<head>` of every built page.

use std::fs;

use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};
use image::ImageFormat;
use image::imageops::FilterType;
use serde::Serialize;

use crate::config;
use crate::engine::{Stage, StageContext, StageOutput};
use crate::io;

struct Icon {
    file: &'static str,
    size: u32,
    rel: &'static str,
}

const ICONS: &[Icon] = &[
    Icon {
        file: "favicon-16x16.png",
        size: 16,
        rel: "icon",
    },
    Icon {
        file: "favicon-32x32.png",
        size: 32,
        rel: "icon",
    },
    Icon {
        file: "apple-touch-icon.png",
        size: 180,
        rel: "apple-touch-icon",
    },
    Icon {
        file: "android-chrome-192x192.png",
        size: 192,
        rel: "",
    },
    Icon {
        file: "android-chrome-512x512.png",
        size: 512,
        rel: "",
    },
];

const MANIFEST: &str = "site.webmanifest";

/// Marks the injected block so pages are never patched twice.
const MARKER: &str = "<!-- favicons -->";

#[derive(Serialize)]
struct Manifest<'a> {
    icons: Vec<ManifestIcon<'a>>,
    display: &'static str,
}

#[derive(Serialize)]
struct ManifestIcon<'a> {
    src: String,
    sizes: String,
    #[serde(rename = "type")]
    kind: &'a str,
}

pub struct GenerateFavicon {
    config: config::Favicon,
    public: Utf8PathBuf,
}

impl GenerateFavicon {
    pub fn new(config: &config::Favicon, public: &Utf8Path) -> Self {
        Self {
            config: config.clone(),
            public: public.to_path_buf(),
        }
    }
}

impl Stage for GenerateFavicon {
    fn execute(&self, _: &StageContext) -> anyhow::Result<StageOutput> {
        let source = &self.config.source;
        let img = image::open(source).with_context(|| format!("couldn't open {source}"))?;

        let mut files = Vec::with_capacity(ICONS.len() + 1);
        for icon in ICONS {
            let mut data = Vec::new();
            img.resize_exact(icon.size, icon.size, FilterType::Lanczos3)
                .write_to(&mut std::io::Cursor::new(&mut data), ImageFormat::Png)?;

            let path = self.config.dest.join(icon.file);
            io::write(&path, data)?;
            files.push(path);
        }

        let manifest = Manifest {
            icons: ICONS
                .iter()
                .filter(|icon| icon.rel.is_empty())
                .map(|icon| ManifestIcon {
                    src: io::href(&self.config.dest.join(icon.file), &self.public),
                    sizes: format!("{0}x{0}", icon.size),
                    kind: "image/png",
                })
                .collect(),
            display: "standalone",
        };

        let path = self.config.dest.join(MANIFEST);
        io::write(&path, serde_json::to_string_pretty(&manifest)?)?;
        files.push(path);

        Ok(StageOutput::new(files))
    }
}

pub struct InjectFavicon {
    config: config::Favicon,
    public: Utf8PathBuf,
}

impl InjectFavicon {
    pub fn new(config: &config::Favicon, public: &Utf8Path) -> Self {
        Self {
            config: config.clone(),
            public: public.to_path_buf(),
        }
    }

    fn markup(&self) -> String {
        let href = |file: &str| io::href(&self.config.dest.join(file), &self.public);

        let mut markup = String::from(MARKER);
        for icon in ICONS.iter().filter(|icon| !icon.rel.is_empty()) {
            let sizes = format!("{0}x{0}", icon.size);
            let kind = if icon.rel == "icon" {
                r#" type="image/png""#
            } else {
                ""
            };
            markup.push_str(&format!(
                r#"<link rel="{}"{kind} sizes="{sizes}" href="{}">"#,
                icon.rel,
                href(icon.file)
            ));
        }
        markup.push_str(&format!(r#"<link rel="manifest" href="{}">"#, href(MANIFEST)));
        markup
    }
}

impl Stage for InjectFavicon {
    fn execute(&self, _: &StageContext) -> anyhow::Result<StageOutput> {
        let markup = self.markup();
        let mut files = Vec::new();

        for page in io::expand(&self.config.pages, &[])? {
            let html = fs::read_to_string(&page).with_context(|| format!("couldn't read {page}"))?;

            if html.contains(MARKER) {
                continue;
            }

            let Some(i) = html.find("</head>") else {
                tracing::warn!("{page} has no </head>, skipping favicon markup");
                continue;
            };

            io::write(&page, format!("{}{markup}{}", &html[..i], &html[i..]))?;
            files.push(page);
        }

        Ok(StageOutput::new(files))
    }
}

#[cfg(test)]
mod tests {
    use image::{DynamicImage, Rgba, RgbaImage};

    use super::*;
    use crate::core::{Environment, Mode};

    fn setup() -> (tempfile::TempDir, Utf8PathBuf, config::Favicon) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap().to_path_buf();
        let public = root.join("dist");

        fs::create_dir_all(&public).unwrap();
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(600, 600, Rgba([200, 40, 40, 255])))
            .save(root.join("favicon.png"))
            .unwrap();

        let config = config::Favicon {
            source: root.join("favicon.png"),
            dest: public.join("assets/favicons"),
            pages: vec![format!("{public}/*.html")],
        };

        (dir, public, config)
    }

    fn run(stage: &dyn Stage) -> anyhow::Result<StageOutput> {
        stage.execute(&StageContext {
            task: "favicon",
            env: &Environment::new(Mode::Build),
            span: tracing::Span::none(),
        })
    }

    #[test]
    fn icons_are_rendered_at_every_size() {
        let (_dir, public, config) = setup();
        let output = run(&GenerateFavicon::new(&config, &public)).unwrap();

        assert_eq!(output.files.len(), ICONS.len() + 1);
        let apple = image::open(config.dest.join("apple-touch-icon.png")).unwrap();
        assert_eq!((apple.width(), apple.height()), (180, 180));

        let manifest = fs::read_to_string(config.dest.join(MANIFEST)).unwrap();
        assert!(manifest.contains("/assets/favicons/android-chrome-512x512.png"));
    }

    #[test]
    fn markup_is_injected_once() {
        let (_dir, public, config) = setup();
        fs::write(public.join("index.html"), "<html><head><title>x</title></head></html>").unwrap();
        fs::write(public.join("fragment.html"), "<p>no head</p>").unwrap();

        let stage = InjectFavicon::new(&config, &public);
        let output = run(&stage).unwrap();
        assert_eq!(output.files, [public.join("index.html")]);

        let html = fs::read_to_string(public.join("index.html")).unwrap();
        assert!(html.contains(r#"href="/assets/favicons/favicon-32x32.png""#));
        assert!(html.ends_with("</head></html>"));

        let again = run(&stage).unwrap();
        assert!(again.files.is_empty());
        assert_eq!(fs::read_to_string(public.join("index.html")).unwrap(), html);
    }
}
