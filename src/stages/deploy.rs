use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};

use crate::config::{self, Credentials};
use crate::engine::{Stage, StageContext, StageOutput};
use crate::io;
use crate::stages::tool::Tool;

fn required<'a>(value: &'a Option<String>, env: &str) -> anyhow::Result<&'a str> {
    value
        .as_deref()
        .with_context(|| format!("missing credential, set {env} or add it to .credentials.toml"))
}

/// Publishes the built site with the `surge` CLI.
pub struct Surge {
    config: config::Deploy,
    credentials: Credentials,
    node: Utf8PathBuf,
}

impl Surge {
    pub fn new(config: &config::Deploy, credentials: &Credentials, node: &Utf8Path) -> Self {
        Self {
            config: config.clone(),
            credentials: credentials.clone(),
            node: node.to_path_buf(),
        }
    }
}

impl Stage for Surge {
    fn execute(&self, _: &StageContext) -> anyhow::Result<StageOutput> {
        let login = required(&self.credentials.surge_login, "TSUMUGI_SURGE_LOGIN")?;
        let token = required(&self.credentials.surge_token, "TSUMUGI_SURGE_TOKEN")?;

        let out = Tool::node(&self.node, "surge")
            .arg("--project")
            .arg(&self.config.dir)
            .arg("--domain")
            .arg(&self.config.surge_domain)
            .env("SURGE_LOGIN", login)
            .env("SURGE_TOKEN", token)
            .run()?;

        tracing::debug!("{}", String::from_utf8_lossy(&out).trim());
        tracing::info!("published {} to {}", self.config.dir, self.config.surge_domain);
        Ok(StageOutput::default())
    }
}

/// Uploads every file of the built site over FTP using `curl`.
///
/// The whole transfer is described in a single curl config fed through stdin,
/// so the password never shows up in the process list.
pub struct Ftp {
    config: config::Deploy,
    credentials: Credentials,
}

impl Ftp {
    pub fn new(config: &config::Deploy, credentials: &Credentials) -> Self {
        Self {
            config: config.clone(),
            credentials: credentials.clone(),
        }
    }

    fn curl_config(&self, files: &[Utf8PathBuf]) -> anyhow::Result<String> {
        let host = required(&self.credentials.ftp_host, "TSUMUGI_FTP_HOST")?;
        let user = required(&self.credentials.ftp_user, "TSUMUGI_FTP_USER")?;
        let password = required(&self.credentials.ftp_password, "TSUMUGI_FTP_PASSWORD")?;

        let remote = self.config.ftp_dir.trim_matches('/');
        let mut text = format!("user = {}\nftp-create-dirs\n", quote(&format!("{user}:{password}")));

        for file in files {
            let url = format!("ftp://{host}/{remote}{}", io::href(file, &self.config.dir));
            text.push_str(&format!("upload-file = {}\n", quote(file.as_str())));
            text.push_str(&format!("url = {}\n", quote(&url)));
        }

        Ok(text)
    }
}

impl Stage for Ftp {
    fn execute(&self, _: &StageContext) -> anyhow::Result<StageOutput> {
        let files = io::walk(&self.config.dir)?;
        let config = self.curl_config(&files)?;

        Tool::new("curl")
            .args(["--silent", "--show-error", "--config", "-"])
            .input(config)
            .run()?;

        tracing::info!("uploaded {} file(s)", files.len());
        Ok(StageOutput::new(files))
    }
}

/// Quotes a value for a curl config file.
fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Environment, Mode};

    fn credentials() -> Credentials {
        Credentials {
            ftp_host: Some("ftp.example.com".into()),
            ftp_user: Some("ann".into()),
            ftp_password: Some("p\"w".into()),
            ..Default::default()
        }
    }

    #[test]
    fn curl_config_lists_every_upload() {
        let config = config::Deploy::default();
        let ftp = Ftp::new(&config, &credentials());

        let files = vec![
            Utf8PathBuf::from("dist/index.html"),
            Utf8PathBuf::from("dist/assets/css/style.css"),
        ];
        let text = ftp.curl_config(&files).unwrap();

        assert_eq!(
            text,
            concat!(
                "user = \"ann:p\\\"w\"\n",
                "ftp-create-dirs\n",
                "upload-file = \"dist/index.html\"\n",
                "url = \"ftp://ftp.example.com/public_html/index.html\"\n",
                "upload-file = \"dist/assets/css/style.css\"\n",
                "url = \"ftp://ftp.example.com/public_html/assets/css/style.css\"\n",
            )
        );
    }

    #[test]
    fn missing_credentials_fail_before_any_upload() {
        let ftp = Ftp::new(&config::Deploy::default(), &Credentials::default());
        let err = ftp.curl_config(&[]).unwrap_err();
        assert!(err.to_string().contains("TSUMUGI_FTP_HOST"));
    }

    #[test]
    fn surge_requires_a_token() {
        let credentials = Credentials {
            surge_login: Some("ann@example.com".into()),
            ..Default::default()
        };
        let surge = Surge::new(
            &config::Deploy::default(),
            &credentials,
            Utf8Path::new("node_modules"),
        );

        let err = surge
            .execute(&StageContext {
                task: "surge",
                env: &Environment::new(Mode::Build),
                span: tracing::Span::none(),
            })
            .unwrap_err();
        assert!(err.to_string().contains("TSUMUGI_SURGE_TOKEN"));
    }
}
