use async_trait::async_trait;
use futures::stream::SplitSink;
use futures::SinkExt;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{watch, Mutex};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::WebSocketStream;

use crate::error::DeliveryError;
use crate::model::ConnectionId;

/// Why a connection's owner was asked to shut it down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// A newer connection registered under the same identity.
    Superseded,
    /// A dispatch to this connection failed.
    Evicted,
    /// The server is going away.
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CloseReason::Superseded => "superseded",
            CloseReason::Evicted => "evicted",
            CloseReason::Shutdown => "server shutdown",
        };
        f.write_str(s)
    }
}

/// A live, send-capable channel to one subscriber.
#[async_trait]
pub trait ConnectionHandle: Send + Sync {
    fn connection_id(&self) -> ConnectionId;

    /// Sends one text frame.
    async fn send_text(&self, payload: &str) -> Result<(), DeliveryError>;

    /// Signals the owning session to close the connection. Does not block and
    /// never touches the transport itself.
    fn close(&self, reason: CloseReason);
}

pub type SharedHandle = Arc<dyn ConnectionHandle>;

/// Write half of a subscriber WebSocket.
///
/// Dispatch and the keepalive loop both write through `sink`; the mutex keeps
/// frames whole. The read half stays with the session that owns the handle.
pub struct WsConnection<S> {
    id: ConnectionId,
    sink: Mutex<SplitSink<WebSocketStream<S>, Message>>,
    close_tx: watch::Sender<Option<CloseReason>>,
    send_timeout: Duration,
}

impl<S> WsConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(
        sink: SplitSink<WebSocketStream<S>, Message>,
        send_timeout: Duration,
    ) -> (Self, watch::Receiver<Option<CloseReason>>) {
        let (close_tx, close_rx) = watch::channel(None);
        let conn = Self {
            id: ConnectionId::generate(),
            sink: Mutex::new(sink),
            close_tx,
            send_timeout,
        };
        (conn, close_rx)
    }

    pub async fn send_frame(&self, msg: Message) -> Result<(), DeliveryError> {
        if self.close_tx.borrow().is_some() {
            return Err(DeliveryError::Closed);
        }

        let send = async {
            let mut sink = self.sink.lock().await;
            sink.send(msg).await
        };

        match tokio::time::timeout(self.send_timeout, send).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(tungstenite::Error::ConnectionClosed))
            | Ok(Err(tungstenite::Error::AlreadyClosed)) => Err(DeliveryError::Closed),
            Ok(Err(e)) => Err(DeliveryError::Transport(e.to_string())),
            Err(_) => Err(DeliveryError::Timeout),
        }
    }

    /// Best-effort close frame, used by the owning session on the way out.
    pub async fn shutdown(&self, frame: Option<tungstenite::protocol::CloseFrame<'static>>) {
        let mut sink = self.sink.lock().await;
        let _ = tokio::time::timeout(self.send_timeout, async {
            let _ = sink.send(Message::Close(frame)).await;
            let _ = sink.close().await;
        })
        .await;
    }
}

#[async_trait]
impl<S> ConnectionHandle for WsConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn connection_id(&self) -> ConnectionId {
        self.id
    }

    async fn send_text(&self, payload: &str) -> Result<(), DeliveryError> {
        self.send_frame(Message::Text(payload.to_string())).await
    }

    fn close(&self, reason: CloseReason) {
        self.close_tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        });
    }
}
