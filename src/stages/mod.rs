//! The standard asset pipeline.
//!
//! | task                     | prerequisites                                    |
//! |--------------------------|--------------------------------------------------|
//! | `build`                  | templates, styles, scripts (parallel)            |
//! | `dev`                    | templates → styles → scripts → serve             |
//! | `inject-favicon-markups` | generate-favicon                                 |
//! | `optimize`               | inject-favicon-markups → uncss, critical, images |
//! | `deploy`                 | optimize → surge                                 |
//!
//! `ftp` is a standalone alternative to `surge`.

mod critical;
mod deploy;
mod favicon;
mod images;
mod scripts;
#[cfg(feature = "server")]
mod serve;
mod styles;
mod templates;
pub mod tool;
mod uncss;

use crate::blueprint::{Blueprint, Group};
use crate::config::{Config, Credentials};
use crate::error::PipelineError;

pub use critical::Critical;
pub use deploy::{Ftp, Surge};
pub use favicon::{GenerateFavicon, InjectFavicon};
pub use images::Images;
pub use scripts::Scripts;
#[cfg(feature = "server")]
pub use serve::Serve;
pub use styles::Styles;
pub use templates::Templates;
pub use uncss::Uncss;

/// The task the CLI runs when none is named.
pub const DEFAULT_TASK: &str = "dev";

/// Wires every stage of the standard pipeline into a blueprint.
pub fn blueprint(config: &Config, credentials: &Credentials) -> Result<Blueprint, PipelineError> {
    let public = &config.dirs.dist;
    let node = &config.dirs.node;

    let mut bp = Blueprint::new();

    bp.define("templates", [], Templates::new(&config.templates))?
        .define("styles", [], Styles::new(&config.styles))?
        .define("scripts", [], Scripts::new(&config.scripts, node))?
        .define("images", [], Images::new(&config.images))?
        .define("generate-favicon", [], GenerateFavicon::new(&config.favicon, public))?
        .define(
            "inject-favicon-markups",
            [Group::series(["generate-favicon"])],
            InjectFavicon::new(&config.favicon, public),
        )?
        .define("uncss", [], Uncss::new(&config.uncss, node))?
        .define("critical", [], Critical::new(&config.critical, public, node))?
        .define("surge", [], Surge::new(&config.deploy, credentials, node))?
        .define("ftp", [], Ftp::new(&config.deploy, credentials))?;

    #[cfg(feature = "server")]
    bp.define("serve", [], Serve::new(public, config.server.port))?;

    bp.aggregate("build", [Group::parallel(["templates", "styles", "scripts"])])?
        .aggregate(
            "optimize",
            [
                Group::series(["inject-favicon-markups", "uncss"]),
                Group::parallel(["critical", "images"]),
            ],
        )?
        .aggregate("deploy", [Group::series(["optimize", "surge"])])?
        .aggregate(
            "dev",
            [Group::series(["templates", "styles", "scripts", "serve"])],
        )?;

    Ok(bp)
}

/// The watch bindings of a development session. Each one re-runs only the
/// task owning the changed files.
#[cfg(feature = "live")]
pub fn bindings(config: &Config) -> Vec<crate::engine::runner::watch::Binding> {
    use crate::engine::runner::live::Resource;
    use crate::engine::runner::watch::{Binding, Signal};

    let styles = &config.styles;
    let templates = &config.templates;

    vec![
        Binding::new(
            "styles",
            styles.entries.iter().chain(&styles.watch).cloned(),
            Signal::Patch(Resource::Css),
        ),
        Binding::new(
            "templates",
            templates.entries.iter().chain(&templates.partials).cloned(),
            Signal::Patch(Resource::Html),
        ),
        Binding::new("scripts", config.scripts.entries.iter().cloned(), Signal::Reload),
    ]
}
