// =============================================================================
// Feed transport — the socket seam under StreamConnection
// =============================================================================
//
// `Connector` opens sessions, `Session` moves text frames. The production
// implementation is a tokio-tungstenite WebSocket; tests substitute an
// in-memory venue.
// =============================================================================

use anyhow::{Context, Result};
use futures_util::future::BoxFuture;
use futures_util::{FutureExt, SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

/// In-flight transport open. Resolves once the transport signals "open".
pub type OpenFuture<S> = BoxFuture<'static, Result<S>>;

/// Factory for transport sessions.
pub trait Connector: Send + Sync + 'static {
    type Session: Session;

    /// Start opening a new session.
    ///
    /// An `Err` here is a synchronous construction failure (bad endpoint,
    /// unusable request); an `Err` from the returned future is a failure to
    /// reach the venue.
    fn open(&self) -> Result<OpenFuture<Self::Session>>;
}

/// One open transport.
pub trait Session: Send + 'static {
    fn send(&mut self, text: String) -> BoxFuture<'_, Result<()>>;

    /// Next inbound text frame.
    ///
    /// `None` means the transport closed. The returned future must be safe to
    /// drop before completion.
    fn recv(&mut self) -> BoxFuture<'_, Option<Result<String>>>;

    fn close(&mut self) -> BoxFuture<'_, ()>;
}

// ---------------------------------------------------------------------------
// WebSocket implementation
// ---------------------------------------------------------------------------

/// Opens WebSocket sessions against a fixed endpoint URL.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl Connector for WsConnector {
    type Session = WsSession;

    fn open(&self) -> Result<OpenFuture<WsSession>> {
        let request = self
            .url
            .as_str()
            .into_client_request()
            .with_context(|| format!("invalid feed URL '{}'", self.url))?;
        let url = self.url.clone();

        Ok(async move {
            info!(url = %url, "connecting to feed WebSocket");
            let (ws, _response) = connect_async(request)
                .await
                .context("failed to connect to feed WebSocket")?;
            info!(url = %url, "feed WebSocket connected");
            Ok(WsSession { ws })
        }
        .boxed())
    }
}

pub struct WsSession {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl Session for WsSession {
    fn send(&mut self, text: String) -> BoxFuture<'_, Result<()>> {
        async move {
            self.ws
                .send(Message::Text(text))
                .await
                .context("failed to send feed frame")
        }
        .boxed()
    }

    fn recv(&mut self) -> BoxFuture<'_, Option<Result<String>>> {
        async move {
            loop {
                match self.ws.next().await {
                    Some(Ok(Message::Text(text))) => return Some(Ok(text)),
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame.map(|f| f.reason.into_owned()).unwrap_or_default();
                        info!(reason = %reason, "feed WebSocket close frame received");
                        return None;
                    }
                    // tungstenite answers pings itself.
                    Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                    Some(Ok(Message::Binary(data))) => {
                        debug!(len = data.len(), "ignoring binary feed frame");
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "feed WebSocket read error");
                        return Some(Err(e.into()));
                    }
                    None => return None,
                }
            }
        }
        .boxed()
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        async move {
            if let Err(e) = self.ws.close(None).await {
                debug!(error = %e, "feed WebSocket close failed");
            }
        }
        .boxed()
    }
}
