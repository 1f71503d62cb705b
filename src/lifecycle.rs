//! Subscriber Session Lifecycle
//!
//! Every subscriber connection walks the same path:
//!
//! ```text
//!   Pending → Authenticated → Registered → Active → Closed
//!      ↓            ↓              ↓
//!    Closed       Closed         Closed
//! ```
//!
//! A failed credential check goes straight from `Pending` to `Closed` with a
//! policy-violation close frame and never touches the registry. Leaving any
//! registered state unregisters the connection exactly once.

use futures::stream::SplitStream;
use futures::StreamExt;
use serde::Serialize;
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

use crate::config::KeepaliveConfig;
use crate::connection::{CloseReason, ConnectionHandle, WsConnection};
use crate::error::RelayError;
use crate::metrics;
use crate::model::{ConnectParams, SubscriberId};
use crate::registry::ConnectionRegistry;
use crate::security::AuthGate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    /// Transport accepted, no identity claimed yet
    Pending,
    /// Credentials accepted
    Authenticated,
    /// Handle stored in the registry
    Registered,
    /// Keepalive loop running
    Active,
    /// Terminal
    Closed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }

    pub fn valid_transitions(&self) -> &'static [SessionState] {
        use SessionState::*;
        match self {
            Pending => &[Authenticated, Closed],
            Authenticated => &[Registered, Closed],
            Registered => &[Active, Closed],
            Active => &[Closed],
            Closed => &[],
        }
    }

    pub fn can_transition_to(&self, next: &SessionState) -> bool {
        self.valid_transitions().contains(next)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("Illegal session transition {from} -> {to}")]
pub struct LifecycleError {
    pub from: SessionState,
    pub to: SessionState,
}

/// Guards session state changes.
#[derive(Debug)]
pub struct SessionFsm {
    state: SessionState,
}

impl Default for SessionFsm {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionFsm {
    pub fn new() -> Self {
        Self {
            state: SessionState::Pending,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn transition(&mut self, next: SessionState) -> Result<(), LifecycleError> {
        if !self.state.can_transition_to(&next) {
            error!("🚫 {} -> {} rejected", self.state, next);
            return Err(LifecycleError {
                from: self.state,
                to: next,
            });
        }
        debug!("Session {} -> {}", self.state, next);
        self.state = next;
        Ok(())
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseCause {
    /// Credentials rejected before registration.
    Rejected,
    PeerClosed,
    /// Nothing heard from the peer within the idle timeout.
    IdleTimeout,
    TransportError,
    Superseded,
    Evicted,
    Shutdown,
}

impl CloseCause {
    fn close_frame(&self) -> Option<CloseFrame<'static>> {
        let (code, reason) = match self {
            CloseCause::Rejected => (CloseCode::Policy, "invalid credentials"),
            CloseCause::IdleTimeout => (CloseCode::Away, "idle timeout"),
            CloseCause::Superseded => (CloseCode::Normal, "superseded"),
            CloseCause::Evicted => (CloseCode::Error, "delivery failed"),
            CloseCause::Shutdown => (CloseCode::Away, "server shutdown"),
            CloseCause::PeerClosed | CloseCause::TransportError => return None,
        };
        Some(CloseFrame {
            code,
            reason: Cow::Borrowed(reason),
        })
    }
}

impl From<CloseReason> for CloseCause {
    fn from(reason: CloseReason) -> Self {
        match reason {
            CloseReason::Superseded => CloseCause::Superseded,
            CloseReason::Evicted => CloseCause::Evicted,
            CloseReason::Shutdown => CloseCause::Shutdown,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionOutcome {
    pub subscriber: Option<SubscriberId>,
    pub cause: CloseCause,
    pub final_state: SessionState,
}

/// Runs subscriber sessions against the shared registry.
pub struct LifecycleManager {
    gate: AuthGate,
    registry: Arc<ConnectionRegistry>,
    keepalive: KeepaliveConfig,
    shutdown_tx: watch::Sender<bool>,
}

impl LifecycleManager {
    pub fn new(gate: AuthGate, registry: Arc<ConnectionRegistry>, keepalive: KeepaliveConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            gate,
            registry,
            keepalive,
            shutdown_tx,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Tells every running session to close and unregister.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Drives one accepted WebSocket from `Pending` to `Closed`.
    pub async fn run<S>(&self, mut ws: WebSocketStream<S>, params: ConnectParams) -> SessionOutcome
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let mut fsm = SessionFsm::new();

        let id = match self
            .gate
            .check_subscriber(params.client_id.as_deref(), params.token.as_deref())
        {
            Ok(id) => id,
            Err(e) => {
                let _ = fsm.transition(SessionState::Closed);
                info!("🚪 Connection rejected: {}", e);
                reject(&mut ws).await;
                return SessionOutcome {
                    subscriber: None,
                    cause: CloseCause::Rejected,
                    final_state: fsm.state(),
                };
            }
        };
        let _ = fsm.transition(SessionState::Authenticated);

        let (sink, stream) = ws.split();
        let (conn, mut close_rx) = WsConnection::new(sink, self.keepalive.send_timeout());
        let conn = Arc::new(conn);
        let connection_id = conn.connection_id();

        if let Some(previous) = self.registry.register(id.clone(), conn.clone()) {
            metrics::inc_superseded();
            info!(subscriber = %id, superseded = %previous.connection_id(), "♻️ Replacing previous connection");
            previous.close(CloseReason::Superseded);
        }
        let _ = fsm.transition(SessionState::Registered);
        let _ = fsm.transition(SessionState::Active);

        let cause = self.keepalive_loop(&id, &conn, stream, &mut close_rx).await;

        self.registry.unregister_connection(&id, connection_id);
        let _ = fsm.transition(SessionState::Closed);
        conn.shutdown(cause.close_frame()).await;

        info!(subscriber = %id, connection = %connection_id, cause = ?cause, "Session closed");
        SessionOutcome {
            subscriber: Some(id),
            cause,
            final_state: fsm.state(),
        }
    }

    async fn keepalive_loop<S>(
        &self,
        id: &SubscriberId,
        conn: &WsConnection<S>,
        mut stream: SplitStream<WebSocketStream<S>>,
        close_rx: &mut watch::Receiver<Option<CloseReason>>,
    ) -> CloseCause
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let idle_timeout = self.keepalive.idle_timeout();
        let mut ticker = interval(self.keepalive.ping_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick fires immediately.
        ticker.tick().await;

        let mut shutdown = self.shutdown_tx.subscribe();
        let mut last_seen = Instant::now();

        loop {
            tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(Message::Close(_))) | None => return CloseCause::PeerClosed,
                    Some(Ok(msg)) => {
                        last_seen = Instant::now();
                        if let Message::Text(text) = msg {
                            debug!(subscriber = %id, len = text.len(), "Ignoring inbound text frame");
                        }
                    }
                    Some(Err(e)) => {
                        let err = RelayError::TransportDrop(e.to_string());
                        warn!(subscriber = %id, "{}", err);
                        return CloseCause::TransportError;
                    }
                },
                _ = ticker.tick() => {
                    if last_seen.elapsed() >= idle_timeout {
                        warn!(subscriber = %id, "💤 No traffic for {:?}, closing", idle_timeout);
                        return CloseCause::IdleTimeout;
                    }
                    if let Err(e) = conn.send_frame(Message::Ping(Vec::new())).await {
                        let err = RelayError::TransportDrop(format!("keepalive ping: {}", e));
                        warn!(subscriber = %id, "{}", err);
                        return CloseCause::TransportError;
                    }
                },
                changed = close_rx.changed() => {
                    let reason = *close_rx.borrow();
                    match (changed, reason) {
                        (_, Some(reason)) => return reason.into(),
                        // Sender lives in `conn`, which outlives this loop.
                        (Err(_), None) => return CloseCause::TransportError,
                        (Ok(()), None) => {}
                    }
                },
                _ = wait_for_shutdown(&mut shutdown) => return CloseCause::Shutdown,
            }
        }
    }
}

async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

async fn reject<S>(ws: &mut WebSocketStream<S>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if let Err(e) = ws.close(CloseCause::Rejected.close_frame()).await {
        debug!("Close frame on rejected connection failed: {}", e);
        return;
    }
    // Give the peer a moment to acknowledge the close.
    let _ = tokio::time::timeout(Duration::from_secs(1), async {
        while let Some(Ok(_)) = ws.next().await {}
    })
    .await;
}
