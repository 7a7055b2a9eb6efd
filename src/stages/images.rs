use std::fs;

use anyhow::{Context, anyhow};
use camino::{Utf8Path, Utf8PathBuf};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{DynamicImage, ImageFormat};
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::config;
use crate::engine::{Stage, StageContext, StageOutput};
use crate::io;

/// Re-encodes raster images, keeping whichever version is smaller.
///
/// Formats without a lossless win (gif, svg, webp, ...) are copied as is.
pub struct Images {
    config: config::Images,
}

impl Images {
    pub fn new(config: &config::Images) -> Self {
        Self {
            config: config.clone(),
        }
    }
}

impl Stage for Images {
    fn execute(&self, ctx: &StageContext) -> anyhow::Result<StageOutput> {
        let sources = io::expand(&self.config.source, &[])?;
        ctx.span.pb_set_length(sources.len() as u64);

        let results = sources
            .par_iter()
            .map(|path| {
                let result = self.optimize(path);
                ctx.span.pb_inc(1);
                result
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let shrunk = results.iter().filter(|r| r.shrunk).count();
        ctx.notify(
            "Optimized images",
            &format!("{shrunk} of {} image(s) shrunk", results.len()),
        );

        Ok(StageOutput::new(results.into_iter().map(|r| r.dest).collect()))
    }
}

struct Optimized {
    dest: Utf8PathBuf,
    shrunk: bool,
}

impl Images {
    fn optimize(&self, path: &Utf8Path) -> anyhow::Result<Optimized> {
        let name = path
            .file_name()
            .ok_or_else(|| anyhow!("{path} has no file name"))?;
        let dest = self.config.dest.join(name);

        let Ok(format) = ImageFormat::from_path(path) else {
            io::copy(path, &dest)?;
            return Ok(Optimized { dest, shrunk: false });
        };

        let original = fs::read(path).with_context(|| format!("couldn't read {path}"))?;
        let encoded = match format {
            ImageFormat::Jpeg | ImageFormat::Png => {
                let img = image::load_from_memory_with_format(&original, format)
                    .with_context(|| format!("couldn't decode {path}"))?;
                encode(&img, format, self.config.quality)
                    .with_context(|| format!("couldn't encode {path}"))?
            }
            _ => original.clone(),
        };

        let shrunk = encoded.len() < original.len();
        if shrunk {
            tracing::debug!("{path}: {} -> {} bytes", original.len(), encoded.len());
            io::write(&dest, encoded)?;
        } else {
            io::write(&dest, original)?;
        }

        Ok(Optimized { dest, shrunk })
    }
}

fn encode(img: &DynamicImage, format: ImageFormat, quality: u8) -> image::ImageResult<Vec<u8>> {
    let mut out = Vec::new();

    match format {
        ImageFormat::Jpeg => {
            // JPEG has no alpha channel
            let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
            rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut out, quality))?;
        }
        _ => {
            img.write_with_encoder(PngEncoder::new_with_quality(
                &mut out,
                CompressionType::Best,
                FilterType::Adaptive,
            ))?;
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use image::{Rgb, RgbImage};

    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::core::{Environment, Mode};
    use crate::notification::Notifier;

    #[derive(Default)]
    struct Messages(Mutex<Vec<String>>);

    impl Notifier for Messages {
        fn success(&self, _: &str, message: &str) {
            self.0.lock().unwrap().push(message.to_string());
        }

        fn failure(&self, _: &str, _: &str) {}
    }

    fn setup() -> (tempfile::TempDir, config::Images) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap().to_path_buf();
        fs::create_dir_all(root.join("img")).unwrap();

        let config = config::Images {
            source: vec![format!("{root}/img/*")],
            dest: root.join("dist/img"),
            quality: 80,
        };

        (dir, config)
    }

    fn run(config: &config::Images) -> anyhow::Result<StageOutput> {
        Images::new(config).execute(&StageContext {
            task: "images",
            env: &Environment::new(Mode::Build),
            span: tracing::Span::none(),
        })
    }

    fn gradient() -> DynamicImage {
        let img = RgbImage::from_fn(64, 64, |x, y| Rgb([(x * 4) as u8, (y * 4) as u8, 128]));
        DynamicImage::ImageRgb8(img)
    }

    #[test]
    fn output_is_never_larger_than_input() {
        let (dir, config) = setup();
        let src = Utf8Path::from_path(dir.path()).unwrap().join("img/photo.png");

        // fastest compression leaves room for the optimizer
        let mut data = Vec::new();
        gradient()
            .write_with_encoder(PngEncoder::new_with_quality(
                &mut data,
                CompressionType::Fast,
                FilterType::NoFilter,
            ))
            .unwrap();
        fs::write(&src, &data).unwrap();

        let output = run(&config).unwrap();
        assert_eq!(output.files, [config.dest.join("photo.png")]);

        let optimized = fs::read(&output.files[0]).unwrap();
        assert!(optimized.len() <= data.len());
        assert!(image::load_from_memory(&optimized).is_ok());
    }

    #[test]
    fn unknown_formats_are_copied() {
        let (dir, config) = setup();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        fs::write(root.join("img/logo.svg"), "<svg/>").unwrap();

        let output = run(&config).unwrap();
        assert_eq!(fs::read_to_string(&output.files[0]).unwrap(), "<svg/>");
    }

    #[test]
    fn reports_how_many_images_shrunk() {
        let (dir, config) = setup();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        fs::write(root.join("img/logo.svg"), "<svg/>").unwrap();
        fs::write(root.join("img/icon.gif"), "GIF89a").unwrap();

        let messages = Arc::new(Messages::default());
        let env = Environment::new(Mode::Build).with_notifier(messages.clone());

        Images::new(&config)
            .execute(&StageContext {
                task: "images",
                env: &env,
                span: tracing::Span::none(),
            })
            .unwrap();

        assert_eq!(*messages.0.lock().unwrap(), ["0 of 2 image(s) shrunk"]);
    }

    #[test]
    fn corrupt_images_fail_the_stage() {
        let (dir, config) = setup();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        fs::write(root.join("img/broken.jpg"), "not a jpeg").unwrap();

        let err = run(&config).unwrap_err();
        assert!(format!("{err:#}").contains("broken.jpg"));
    }
}
