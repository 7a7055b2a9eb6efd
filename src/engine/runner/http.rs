//! Static file server for the development session.

use std::net::{SocketAddr, TcpListener};
use std::thread;

use axum::Router;
use camino::Utf8PathBuf;
use console::style;
use tower_http::services::ServeDir;
use tracing::info;

/// Serves `root` on `127.0.0.1:port` from a dedicated thread.
///
/// The socket is bound before the thread is spawned, so a port already in
/// use is reported to the caller instead of being lost in the background.
pub fn start(
    root: Utf8PathBuf,
    port: u16,
) -> std::io::Result<thread::JoinHandle<Result<(), anyhow::Error>>> {
    let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], port)))?;
    listener.set_nonblocking(true)?;

    let port = listener.local_addr()?.port();
    info!(url = %style(format!("http://localhost:{port}/")).yellow(), "starting a HTTP server");

    Ok(thread::spawn(move || {
        let result = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(anyhow::Error::from)
            .and_then(|rt| rt.block_on(serve(root, listener)));

        if let Err(e) = &result {
            tracing::error!("HTTP server stopped: {e:#}");
        }
        result
    }))
}

async fn serve(root: Utf8PathBuf, listener: TcpListener) -> Result<(), anyhow::Error> {
    let listener = tokio::net::TcpListener::from_std(listener)?;
    let router = Router::new().fallback_service(ServeDir::new(root.as_std_path()));

    axum::serve(listener, router).await?;

    Ok(())
}
