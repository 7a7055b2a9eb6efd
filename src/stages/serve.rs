use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};

use crate::engine::runner::http;
use crate::engine::{Stage, StageContext, StageOutput};

/// Starts the development server and returns right away; the server lives
/// for the rest of the process.
pub struct Serve {
    root: Utf8PathBuf,
    port: u16,
}

impl Serve {
    pub fn new(root: &Utf8Path, port: u16) -> Self {
        Self {
            root: root.to_path_buf(),
            port,
        }
    }
}

impl Stage for Serve {
    fn execute(&self, _: &StageContext) -> anyhow::Result<StageOutput> {
        let port = self.port;
        let _server = http::start(self.root.clone(), port)
            .with_context(|| format!("couldn't bind the HTTP server to port {port}"))?;

        Ok(StageOutput::default())
    }
}
