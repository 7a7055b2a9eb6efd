//! Live-reload channel.
//!
//! A small WebSocket server (`tungstenite`) keeps a list of connected
//! browser tabs. Rebuilds push [`ReloadEvent`]s to it, serialized as JSON:
//!
//! ```text
//! {"kind":"reload"}
//! {"kind":"inject","resource":"css","path":"/assets/css/style.css"}
//! ```
//!
//! The [`client_script`] is injected into every page rendered in watch mode.
//! It swaps stylesheets in place, re-renders the body of the current page on
//! html injects, and reloads the page on anything else.

use std::net::{TcpListener, TcpStream};
use std::sync::mpsc::{Sender, channel};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use serde::Serialize;
use tungstenite::{Message, WebSocket};

use crate::error::TsumugiError;

/// Kind of asset that can be patched without a full reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Resource {
    Css,
    Html,
}

impl Resource {
    pub fn extension(self) -> &'static str {
        match self {
            Resource::Css => "css",
            Resource::Html => "html",
        }
    }
}

/// A message for connected browsers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ReloadEvent {
    Reload,
    Inject { resource: Resource, path: String },
}

/// Anything that accepts reload events.
pub trait ReloadSink: Send + Sync {
    fn send(&self, event: ReloadEvent);
}

/// Maximum number of browser connections kept open.
const MAX_CLIENTS: usize = 10;

type Clients = Arc<Mutex<Vec<WebSocket<TcpStream>>>>;

/// The WebSocket side of live reload.
pub struct LiveReload {
    port: u16,
    tx: Sender<ReloadEvent>,
    _threads: (JoinHandle<()>, JoinHandle<()>),
}

impl LiveReload {
    /// Binds `127.0.0.1:preferred`, falling back to an ephemeral port, and
    /// starts the accept and broadcast threads.
    pub fn start(preferred: u16) -> Result<Self, TsumugiError> {
        let (tcp, port) = reserve_port(preferred).map_err(TsumugiError::Bind)?;
        let clients = Clients::default();

        let incoming = new_thread_ws_incoming(tcp, clients.clone());
        let (tx, outgoing) = new_thread_ws_broadcast(clients);

        tracing::info!("live reload listening on ws://127.0.0.1:{port}");

        Ok(Self {
            port,
            tx,
            _threads: (incoming, outgoing),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl ReloadSink for LiveReload {
    fn send(&self, event: ReloadEvent) {
        if self.tx.send(event).is_err() {
            tracing::error!("live reload broadcast thread has stopped");
        }
    }
}

fn reserve_port(preferred: u16) -> std::io::Result<(TcpListener, u16)> {
    let listener = match TcpListener::bind(("127.0.0.1", preferred)) {
        Ok(sock) => sock,
        Err(_) => TcpListener::bind("127.0.0.1:0")?,
    };

    let port = listener.local_addr()?.port();
    Ok((listener, port))
}

fn new_thread_ws_incoming(server: TcpListener, clients: Clients) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for stream in server.incoming() {
            let socket = match stream.map_err(anyhow::Error::from).and_then(|s| {
                tungstenite::accept(s).map_err(|e| anyhow::anyhow!("handshake failed: {e}"))
            }) {
                Ok(socket) => socket,
                Err(e) => {
                    tracing::warn!("rejected live reload client: {e}");
                    continue;
                }
            };

            if let Ok(mut clients) = clients.lock() {
                clients.push(socket);
            }
        }
    })
}

fn new_thread_ws_broadcast(clients: Clients) -> (Sender<ReloadEvent>, JoinHandle<()>) {
    let (tx, rx) = channel::<ReloadEvent>();

    let thread = std::thread::spawn(move || {
        while let Ok(event) = rx.recv() {
            let payload = match serde_json::to_string(&event) {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::error!("couldn't encode {event:?}: {e}");
                    continue;
                }
            };

            let Ok(mut clients) = clients.lock() else {
                break;
            };
            let mut broken = vec![];

            for (i, socket) in clients.iter_mut().enumerate() {
                match socket.send(Message::text(payload.clone())) {
                    Ok(_) => {}
                    Err(tungstenite::Error::Io(e)) => {
                        if e.kind() == std::io::ErrorKind::BrokenPipe {
                            broken.push(i);
                        }
                    }
                    Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                        broken.push(i);
                    }
                    Err(e) => {
                        tracing::error!("live reload send failed: {e:?}");
                    }
                }
            }

            for i in broken.into_iter().rev() {
                clients.remove(i);
            }

            // Close all but the most recent connections
            let len = clients.len();
            if len > MAX_CLIENTS {
                for mut socket in clients.drain(0..len - MAX_CLIENTS) {
                    socket.close(None).ok();
                }
            }

            tracing::debug!("sent {payload} to {} client(s)", clients.len());
        }
    });

    (tx, thread)
}

const CLIENT_SCRIPT: &str = r#"
(() => {
  const socket = new WebSocket("ws://" + location.hostname + ":__PORT__");
  socket.addEventListener("message", async (message) => {
    const event = JSON.parse(message.data);
    if (event.kind === "inject" && event.resource === "css") {
      for (const link of document.querySelectorAll('link[rel="stylesheet"]')) {
        const url = new URL(link.href);
        if (url.pathname === event.path) {
          url.searchParams.set("v", Date.now());
          link.href = url.toString();
        }
      }
      return;
    }
    const here = location.pathname.endsWith("/") ? location.pathname + "index.html" : location.pathname;
    if (event.kind === "inject" && event.resource === "html") {
      if (event.path !== here) return;
      const response = await fetch(event.path, { cache: "no-store" });
      const page = new DOMParser().parseFromString(await response.text(), "text/html");
      document.body.replaceWith(page.body);
      return;
    }
    location.reload();
  });
})();
"#;

/// The browser side of live reload, connecting to `port`.
pub fn client_script(port: u16) -> String {
    format!(
        "<script>{}</script>",
        CLIENT_SCRIPT.replace("__PORT__", &port.to_string())
    )
}

/// Inserts the client script before `</body>`, or appends it.
pub fn inject_client(html: &str, port: u16) -> String {
    let script = client_script(port);
    match html.rfind("</body>") {
        Some(i) => format!("{}{}{}", &html[..i], script, &html[i..]),
        None => format!("{html}{script}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_as_tagged_json() {
        assert_eq!(
            serde_json::to_string(&ReloadEvent::Reload).unwrap(),
            r#"{"kind":"reload"}"#
        );
        assert_eq!(
            serde_json::to_string(&ReloadEvent::Inject {
                resource: Resource::Css,
                path: "/assets/css/style.css".into(),
            })
            .unwrap(),
            r#"{"kind":"inject","resource":"css","path":"/assets/css/style.css"}"#
        );
    }

    #[test]
    fn client_is_injected_before_body_end() {
        let html = "<html><body><p>hi</p></body></html>";
        let out = inject_client(html, 4321);
        assert!(out.starts_with("<html><body><p>hi</p><script>"));
        assert!(out.ends_with("</script></body></html>"));
        assert!(out.contains(":4321"));
    }

    #[test]
    fn client_is_appended_without_body() {
        let out = inject_client("<p>fragment</p>", 1337);
        assert!(out.starts_with("<p>fragment</p><script>"));
    }

    #[test]
    fn falls_back_to_an_ephemeral_port() {
        let taken = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();

        let (_listener, got) = reserve_port(port).unwrap();
        assert_ne!(got, port);
    }
}
