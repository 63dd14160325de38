// =============================================================================
// StreamConnection — self-healing streaming session to the quote venue
// =============================================================================
//
// A single actor task owns the transport, the subscription set and the
// pending-reconnect deadline. Callers hold a cheap `StreamConnection` handle
// and talk to the actor through an unbounded command channel, so `connect`,
// `subscribe`, `unsubscribe` and `close` never block.
//
// Every decoded inbound batch is pushed, in arrival order, onto one consumer
// channel. The channel closes when the actor stops, so nothing is delivered
// after `close()` has been processed.
//
// Transport failures are never surfaced to the caller: the session drops to
// Disconnected, a single reconnect deadline is armed, and the actor reconnects
// after the fixed delay, forever, until closed.
// =============================================================================

use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::feed::message::{decode_batch, Channel, ControlRequest, FeedMessage};
use crate::feed::transport::{Connector, OpenFuture, Session};
use crate::types::ConnectionState;

/// Delay between a disconnect and the next connection attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(3000);

/// Point-in-time view of the connection, published on every change.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConnectionSnapshot {
    pub state: ConnectionState,
    /// The venue acknowledged the credential on the current session.
    pub authenticated: bool,
    /// Subscription set, sorted.
    pub symbols: Vec<String>,
    /// Number of times the reconnect deadline has fired.
    pub reconnect_attempts: u64,
    /// Most recent transport failure. Cleared once a session opens.
    pub last_error: Option<String>,
}

#[derive(Debug)]
enum Command {
    Connect(String),
    Subscribe(Vec<String>),
    Unsubscribe(Vec<String>),
    Close,
}

/// Handle to a running streaming session.
#[derive(Clone)]
pub struct StreamConnection {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ConnectionSnapshot>,
}

impl StreamConnection {
    /// Start the connection actor in the `Idle` state.
    ///
    /// Returns the handle together with the consumer side of the feed. Must be
    /// called from within a tokio runtime.
    pub fn spawn<C: Connector>(
        connector: C,
        reconnect_delay: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<Vec<FeedMessage>>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (feed_tx, feed_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionSnapshot::default());

        let actor = ConnectionActor {
            connector,
            reconnect_delay,
            credential: None,
            subscriptions: BTreeSet::new(),
            session: None,
            opening: None,
            reconnect_at: None,
            authenticated: false,
            reconnect_attempts: 0,
            last_error: None,
            state: ConnectionState::Idle,
            feed: feed_tx,
            status: status_tx,
        };
        tokio::spawn(actor.run(cmd_rx));

        let handle = Self {
            commands: cmd_tx,
            status: status_rx,
        };
        (handle, feed_rx)
    }

    /// Open the session with `credential`. No-op if a session is already open
    /// or opening, in which case the credential is discarded and the live
    /// session keeps its own. An empty credential is rejected.
    pub fn connect(&self, credential: impl Into<String>) -> Result<()> {
        let credential = credential.into();
        anyhow::ensure!(
            !credential.trim().is_empty(),
            "feed credential must not be empty"
        );
        self.send(Command::Connect(credential));
        Ok(())
    }

    /// Add symbols to the subscription set. Applied immediately when the
    /// session is subscribed, otherwise on the next authentication.
    pub fn subscribe<I, S>(&self, symbols: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let symbols = normalise(symbols);
        if !symbols.is_empty() {
            self.send(Command::Subscribe(symbols));
        }
    }

    pub fn unsubscribe<I, S>(&self, symbols: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let symbols = normalise(symbols);
        if !symbols.is_empty() {
            self.send(Command::Unsubscribe(symbols));
        }
    }

    /// Tear the session down for good. Idempotent.
    pub fn close(&self) {
        self.send(Command::Close);
    }

    pub fn state(&self) -> ConnectionState {
        self.status.borrow().state
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.status.borrow().clone()
    }

    /// Receiver that wakes on every published change.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.status.clone()
    }

    fn send(&self, cmd: Command) {
        if let Err(e) = self.commands.send(cmd) {
            debug!(command = ?e.0, "stream connection closed, command ignored");
        }
    }
}

fn normalise<I, S>(symbols: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    symbols
        .into_iter()
        .map(|s| {
            let s: String = s.into();
            s.trim().to_string()
        })
        .filter(|s| !s.is_empty())
        .collect()
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

enum Event<S> {
    Command(Option<Command>),
    Opened(Result<S>),
    Frame(Option<Result<String>>),
    ReconnectDue,
}

struct ConnectionActor<C: Connector> {
    connector: C,
    reconnect_delay: Duration,
    credential: Option<String>,
    subscriptions: BTreeSet<String>,
    session: Option<C::Session>,
    opening: Option<OpenFuture<C::Session>>,
    /// Pending reconnect. At most one exists; cleared on every connect attempt.
    reconnect_at: Option<Instant>,
    authenticated: bool,
    reconnect_attempts: u64,
    last_error: Option<String>,
    state: ConnectionState,
    feed: mpsc::UnboundedSender<Vec<FeedMessage>>,
    status: watch::Sender<ConnectionSnapshot>,
}

impl<C: Connector> ConnectionActor<C> {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            let event = tokio::select! {
                biased;
                cmd = commands.recv() => Event::Command(cmd),
                opened = wait_open(&mut self.opening) => Event::Opened(opened),
                frame = next_frame(&mut self.session) => Event::Frame(frame),
                _ = wait_deadline(self.reconnect_at) => Event::ReconnectDue,
            };

            match event {
                Event::Command(Some(Command::Connect(credential))) => {
                    if self.state.is_live() {
                        debug!(state = %self.state, "connect ignored, session already live");
                    } else {
                        self.credential = Some(credential);
                        self.start_connect();
                    }
                }
                Event::Command(Some(Command::Subscribe(symbols))) => {
                    self.subscribe(symbols).await;
                }
                Event::Command(Some(Command::Unsubscribe(symbols))) => {
                    self.unsubscribe(symbols).await;
                }
                Event::Command(Some(Command::Close)) | Event::Command(None) => {
                    self.shutdown().await;
                    return;
                }
                Event::Opened(result) => {
                    self.opening = None;
                    self.on_opened(result).await;
                }
                Event::Frame(Some(Ok(text))) => self.on_frame(&text),
                Event::Frame(Some(Err(e))) => {
                    warn!(error = %e, "feed transport error");
                    self.fail(&e);
                }
                Event::Frame(None) => {
                    info!("feed transport closed");
                    self.on_disconnect();
                }
                Event::ReconnectDue => {
                    self.reconnect_at = None;
                    self.reconnect_attempts += 1;
                    info!(attempt = self.reconnect_attempts, "reconnecting to feed");
                    self.start_connect();
                }
            }
        }
    }

    // ── Transitions ──────────────────────────────────────────────────────

    /// Callers check `is_live` first.
    fn start_connect(&mut self) {
        self.reconnect_at = None;
        self.set_state(ConnectionState::Connecting);

        match self.connector.open() {
            Ok(fut) => self.opening = Some(fut),
            Err(e) => {
                error!(error = %e, "failed to construct feed transport");
                self.fail(&e);
            }
        }
    }

    async fn on_opened(&mut self, result: Result<C::Session>) {
        let session = match result {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "feed transport failed to open");
                self.fail(&e);
                return;
            }
        };
        self.session = Some(session);
        self.last_error = None;
        self.set_state(ConnectionState::Authenticating);

        let credential = self.credential.clone().unwrap_or_default();
        if !self.send_request(ControlRequest::Auth(credential)).await {
            return;
        }

        // Subscriptions are replayed without waiting for the auth ack.
        if !self.subscriptions.is_empty() {
            let symbols: Vec<String> = self.subscriptions.iter().cloned().collect();
            if !self.send_subscribe(&symbols).await {
                return;
            }
            info!(count = symbols.len(), "subscriptions replayed");
        }
        self.set_state(ConnectionState::Subscribed);
    }

    /// Record a transport failure, then disconnect.
    fn fail(&mut self, cause: &anyhow::Error) {
        self.last_error = Some(format!("Failed to connect to market data: {cause:#}"));
        self.on_disconnect();
    }

    fn on_disconnect(&mut self) {
        self.session = None;
        self.opening = None;
        self.authenticated = false;
        self.set_state(ConnectionState::Disconnected);

        self.reconnect_at = Some(Instant::now() + self.reconnect_delay);
        info!(
            delay_ms = self.reconnect_delay.as_millis() as u64,
            "feed reconnect scheduled"
        );
        self.set_state(ConnectionState::ReconnectPending);
    }

    async fn shutdown(&mut self) {
        self.reconnect_at = None;
        self.opening = None;
        if let Some(mut session) = self.session.take() {
            session.close().await;
        }
        self.authenticated = false;
        self.set_state(ConnectionState::Closed);
        info!("stream connection closed");
    }

    // ── Subscriptions ────────────────────────────────────────────────────

    async fn subscribe(&mut self, symbols: Vec<String>) {
        // Only symbols new to the set go on the wire.
        let symbols: Vec<String> = symbols
            .into_iter()
            .filter(|s| self.subscriptions.insert(s.clone()))
            .collect();
        if symbols.is_empty() {
            debug!("subscribe ignored, symbols already in the set");
            return;
        }
        self.publish();

        if self.state != ConnectionState::Subscribed {
            warn!(
                symbols = ?symbols,
                state = %self.state,
                "cannot subscribe, feed not connected; will apply on next authentication"
            );
            return;
        }
        if self.send_subscribe(&symbols).await {
            debug!(symbols = ?symbols, "subscribed");
        }
    }

    async fn unsubscribe(&mut self, symbols: Vec<String>) {
        for s in &symbols {
            self.subscriptions.remove(s);
        }
        self.publish();

        if self.state != ConnectionState::Subscribed {
            warn!(
                symbols = ?symbols,
                state = %self.state,
                "cannot unsubscribe, feed not connected"
            );
            return;
        }
        let mut topics = Channel::Aggregate.topics(&symbols);
        topics.extend(Channel::Trade.topics(&symbols));
        if self.send_request(ControlRequest::Unsubscribe(topics)).await {
            debug!(symbols = ?symbols, "unsubscribed");
        }
    }

    /// One aggregate request then one trade request.
    async fn send_subscribe(&mut self, symbols: &[String]) -> bool {
        self.send_request(ControlRequest::Subscribe(Channel::Aggregate.topics(symbols)))
            .await
            && self
                .send_request(ControlRequest::Subscribe(Channel::Trade.topics(symbols)))
                .await
    }

    /// Send on the current session. A send failure counts as a disconnect.
    async fn send_request(&mut self, request: ControlRequest) -> bool {
        let text = match request.to_text() {
            Ok(text) => text,
            Err(e) => {
                error!(error = %e, "control request not sent");
                return false;
            }
        };
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        match session.send(text).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "feed send failed");
                self.fail(&e);
                false
            }
        }
    }

    // ── Inbound ──────────────────────────────────────────────────────────

    fn on_frame(&mut self, text: &str) {
        let batch = match decode_batch(text) {
            Ok(batch) => batch,
            Err(e) => {
                warn!(error = %e, "dropping malformed feed frame");
                return;
            }
        };

        if batch.iter().any(FeedMessage::is_auth_success) {
            info!("feed authenticated");
            self.authenticated = true;
            self.publish();
        } else if batch.iter().any(FeedMessage::is_auth_failure) {
            warn!("feed rejected the credential");
        }

        if batch.is_empty() {
            return;
        }
        if self.feed.send(batch).is_err() {
            debug!("feed consumer gone, batch discarded");
        }
    }

    // ── Status ───────────────────────────────────────────────────────────

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            debug!(from = %self.state, to = %state, "connection state change");
            self.state = state;
        }
        self.publish();
    }

    fn publish(&self) {
        self.status.send_replace(ConnectionSnapshot {
            state: self.state,
            authenticated: self.authenticated,
            symbols: self.subscriptions.iter().cloned().collect(),
            reconnect_attempts: self.reconnect_attempts,
            last_error: self.last_error.clone(),
        });
    }
}

async fn wait_open<S>(opening: &mut Option<OpenFuture<S>>) -> Result<S> {
    match opening {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

async fn next_frame<S: Session>(session: &mut Option<S>) -> Option<Result<String>> {
    match session {
        Some(s) => s.recv().await,
        None => std::future::pending().await,
    }
}

async fn wait_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
