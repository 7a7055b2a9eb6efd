//! Route and credentials configuration.
//!
//! The configuration is read once at start-up from `tsumugi.toml` (if
//! present) and is immutable afterwards. Every field has a default matching
//! the conventional layout:
//!
//! ```text
//! src/templates/*.html          -> dist/
//! src/styles/*.scss             -> dist/assets/css/style.css
//! src/scripts/*.js (+ vendor)   -> dist/assets/js/script.js
//! src/images/*                  -> dist/assets/files/img/
//! ```
//!
//! Deployment credentials never live in this file. They are read from an
//! untracked `.credentials.toml` and from `TSUMUGI_*` environment variables.

use std::env;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use glob::Pattern;
use serde::Deserialize;

use crate::error::ConfigError;

pub const CONFIG_FILE: &str = "tsumugi.toml";
pub const CREDENTIALS_FILE: &str = ".credentials.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub dirs: Dirs,
    pub styles: Styles,
    pub templates: Templates,
    pub scripts: Scripts,
    pub images: Images,
    pub favicon: Favicon,
    pub uncss: Uncss,
    pub critical: Critical,
    pub deploy: Deploy,
    pub server: Server,
    pub notifications: Notifications,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Dirs {
    pub src: Utf8PathBuf,
    pub dist: Utf8PathBuf,
    pub node: Utf8PathBuf,
}

impl Default for Dirs {
    fn default() -> Self {
        Self {
            src: "src".into(),
            dist: "dist".into(),
            node: "node_modules".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Styles {
    /// Entry stylesheets, compiled and joined into `output`.
    pub entries: Vec<String>,
    /// Additional files (partials) which trigger a rebuild.
    pub watch: Vec<String>,
    /// Search path for `@use` and `@import`.
    pub load_path: Utf8PathBuf,
    pub dest: Utf8PathBuf,
    pub output: String,
}

impl Default for Styles {
    fn default() -> Self {
        Self {
            entries: vec!["src/styles/*.scss".into()],
            watch: vec!["src/styles/**/*.scss".into(), "src/styles/**/*.sass".into()],
            load_path: "src/styles".into(),
            dest: "dist/assets/css".into(),
            output: "style.css".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Templates {
    /// Template root, used as the name space for `{% include %}`.
    pub root: Utf8PathBuf,
    pub entries: Vec<String>,
    /// Included fragments; never rendered as pages on their own.
    pub partials: Vec<String>,
    pub dest: Utf8PathBuf,
}

impl Default for Templates {
    fn default() -> Self {
        Self {
            root: "src/templates".into(),
            entries: vec!["src/templates/*.html".into()],
            partials: vec!["src/templates/_includes/*.html".into()],
            dest: "dist".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Scripts {
    /// Prebuilt libraries prepended to the bundle, in order.
    pub vendor: Vec<Utf8PathBuf>,
    pub entries: Vec<String>,
    pub dest: Utf8PathBuf,
    pub output: String,
    pub minify: bool,
    /// Syntax target passed to the minifier.
    pub target: String,
}

impl Default for Scripts {
    fn default() -> Self {
        Self {
            vendor: vec![
                "node_modules/jquery/dist/jquery.slim.min.js".into(),
                "node_modules/bootstrap/dist/js/bootstrap.bundle.min.js".into(),
            ],
            entries: vec!["src/scripts/*.js".into()],
            dest: "dist/assets/js".into(),
            output: "script.js".into(),
            minify: true,
            target: "es2015".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Images {
    pub source: Vec<String>,
    pub dest: Utf8PathBuf,
    /// JPEG quality used when re-encoding.
    pub quality: u8,
}

impl Default for Images {
    fn default() -> Self {
        Self {
            source: vec!["src/images/*".into()],
            dest: "dist/assets/files/img".into(),
            quality: 80,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Favicon {
    pub source: Utf8PathBuf,
    pub dest: Utf8PathBuf,
    /// Pages which receive the `<link>` markups.
    pub pages: Vec<String>,
}

impl Default for Favicon {
    fn default() -> Self {
        Self {
            source: "src/images/favicon.png".into(),
            dest: "dist/assets/favicons".into(),
            pages: vec!["dist/*.html".into()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Uncss {
    pub css: Vec<String>,
    pub html: Vec<String>,
    /// Selectors kept even if no page uses them, typically toggled by scripts.
    pub safelist: Vec<String>,
}

impl Default for Uncss {
    fn default() -> Self {
        Self {
            css: vec!["dist/assets/css/*.css".into()],
            html: vec!["dist/*.html".into()],
            safelist: DEFAULT_SAFELIST.iter().map(|s| s.to_string()).collect(),
        }
    }
}

const DEFAULT_SAFELIST: &[&str] = &[
    "show",
    "active",
    "btn",
    "focus",
    "slide",
    "collapse",
    "collapsed",
    "collapsing",
    "disabled",
    "position-static",
    "fade",
    "dropup",
    "dropdown",
    "dropleft",
    "dropright",
    "dropdown-menu",
    "dropdown-menu-left",
    "dropdown-menu-right",
    "dropdown-divider",
    "dropdown-item",
    "dropdown-toggle-split",
    "nav-link",
    "navbar-nav",
    "navbar-collapse",
    "navbar-toggler",
    "alert",
    "alert-dismissible",
    "close",
    "modal",
    "modal-open",
    "modal-dialog",
    "modal-backdrop",
    "modal-header",
    "modal-scrollbar-measure",
    "carousel",
    "carousel-inner",
    "carousel-item",
    "carousel-item-next",
    "carousel-item-prev",
    "carousel-item-left",
    "carousel-item-right",
    "carousel-control-prev",
    "carousel-control-next",
    "carousel-control-prev-icon",
    "carousel-control-next-icon",
    "carousel-caption",
    "carousel-fade",
    "carousel-indicators",
];

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Critical {
    pub pages: Vec<String>,
    pub css: Utf8PathBuf,
    pub width: u32,
    pub height: u32,
    /// At-rules (`@font-face`) and selectors left out of the inlined CSS.
    pub ignore: Vec<String>,
    /// Declarations left out of the inlined CSS, as `/regex/` or plain text.
    pub ignore_decl: Vec<String>,
}

impl Default for Critical {
    fn default() -> Self {
        Self {
            pages: vec!["dist/*.html".into()],
            css: "dist/assets/css/style.css".into(),
            width: 1300,
            height: 900,
            ignore: vec!["@font-face".into()],
            ignore_decl: vec![r"/url\(/".into()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Deploy {
    /// Directory published by the deploy stages.
    pub dir: Utf8PathBuf,
    pub surge_domain: String,
    pub ftp_dir: String,
}

impl Default for Deploy {
    fn default() -> Self {
        Self {
            dir: "dist".into(),
            surge_domain: "example.surge.sh".into(),
            ftp_dir: "public_html".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Server {
    pub port: u16,
    /// Preferred live-reload socket port; an ephemeral one is used if taken.
    pub live_port: u16,
    /// Quiet window before a watched change triggers a rebuild.
    pub debounce_ms: u64,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            port: 3000,
            live_port: 1337,
            debounce_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Notifications {
    pub desktop: bool,
}

impl Config {
    /// Loads the configuration from `path`, or from `tsumugi.toml` in the
    /// working directory. A missing default file yields the default routes;
    /// a missing explicit file is an error.
    pub fn load(path: Option<&Utf8Path>) -> Result<Self, ConfigError> {
        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (Utf8PathBuf::from(CONFIG_FILE), false),
        };

        if !required && !path.exists() {
            tracing::debug!("no {CONFIG_FILE} found, using default routes");
            return Ok(Self::default());
        }

        let text = fs::read_to_string(&path).map_err(|e| ConfigError::Read(path.clone(), e))?;
        let config = Self::parse(&text).map_err(|e| match e {
            ConfigError::Parse(_, e) => ConfigError::Parse(path.clone(), e),
            other => other,
        })?;

        tracing::debug!("loaded configuration from {path}");
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(text).map_err(|e| ConfigError::Parse(CONFIG_FILE.into(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that every glob pattern compiles.
    fn validate(&self) -> Result<(), ConfigError> {
        let patterns = self
            .styles
            .entries
            .iter()
            .chain(&self.styles.watch)
            .chain(&self.templates.entries)
            .chain(&self.templates.partials)
            .chain(&self.scripts.entries)
            .chain(&self.images.source)
            .chain(&self.favicon.pages)
            .chain(&self.uncss.css)
            .chain(&self.uncss.html)
            .chain(&self.critical.pages);

        for pattern in patterns {
            Pattern::new(pattern).map_err(|e| ConfigError::Pattern(pattern.clone(), e))?;
        }

        Ok(())
    }
}

/// Deployment secrets.
#[derive(Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Credentials {
    pub surge_login: Option<String>,
    pub surge_token: Option<String>,
    pub ftp_host: Option<String>,
    pub ftp_user: Option<String>,
    pub ftp_password: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "***");
        f.debug_struct("Credentials")
            .field("surge_login", &self.surge_login)
            .field("surge_token", &redact(&self.surge_token))
            .field("ftp_host", &self.ftp_host)
            .field("ftp_user", &self.ftp_user)
            .field("ftp_password", &redact(&self.ftp_password))
            .finish()
    }
}

impl Credentials {
    /// Reads `.credentials.toml` if it exists, then applies environment
    /// overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Utf8PathBuf::from(CREDENTIALS_FILE);
        let mut credentials = if path.exists() {
            let text =
                fs::read_to_string(&path).map_err(|e| ConfigError::Read(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::Parse(path.clone(), e))?
        } else {
            Self::default()
        };

        credentials.apply_overrides(|key| env::var(key).ok());
        Ok(credentials)
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let fields = [
            ("TSUMUGI_SURGE_LOGIN", &mut self.surge_login),
            ("TSUMUGI_SURGE_TOKEN", &mut self.surge_token),
            ("TSUMUGI_FTP_HOST", &mut self.ftp_host),
            ("TSUMUGI_FTP_USER", &mut self.ftp_user),
            ("TSUMUGI_FTP_PASSWORD", &mut self.ftp_password),
        ];

        for (key, field) in fields {
            if let Some(value) = lookup(key).filter(|v| !v.is_empty()) {
                *field = Some(value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_conventional_layout() {
        let config = Config::default();
        assert_eq!(config.dirs.dist, "dist");
        assert_eq!(config.styles.output, "style.css");
        assert_eq!(config.scripts.dest, "dist/assets/js");
        assert_eq!(config.critical.width, 1300);
        assert_eq!(config.server.port, 3000);
        assert!(config.uncss.safelist.iter().any(|s| s == "carousel-item"));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config = Config::parse(
            r#"
            [styles]
            output = "main.css"

            [server]
            port = 8080
            "#,
        )
        .unwrap();

        assert_eq!(config.styles.output, "main.css");
        assert_eq!(config.styles.entries, vec!["src/styles/*.scss"]);
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.live_port, 1337);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = Config::parse("[styles]\nouput = \"x.css\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(..)));
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        let err = Config::parse("[scripts]\nentries = [\"src/[*.js\"]").unwrap_err();
        assert!(matches!(err, ConfigError::Pattern(p, _) if p == "src/[*.js"));
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let err = Config::load(Some(Utf8Path::new("does/not/exist.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read(..)));
    }

    #[test]
    fn environment_overrides_credentials() {
        let mut credentials = Credentials {
            ftp_host: Some("old.example.com".into()),
            ..Default::default()
        };

        credentials.apply_overrides(|key| match key {
            "TSUMUGI_FTP_HOST" => Some("ftp.example.com".into()),
            "TSUMUGI_FTP_PASSWORD" => Some(String::new()),
            _ => None,
        });

        assert_eq!(credentials.ftp_host.as_deref(), Some("ftp.example.com"));
        assert_eq!(credentials.ftp_password, None);
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let credentials = Credentials {
            surge_token: Some("secret".into()),
            ..Default::default()
        };
        assert!(!format!("{credentials:?}").contains("secret"));
    }
}
