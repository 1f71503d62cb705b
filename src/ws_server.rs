use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tracing::{debug, error, info, warn};

use crate::error::RelayError;
use crate::lifecycle::LifecycleManager;
use crate::model::ConnectParams;

pub const WS_PATH: &str = "/ws";

pub async fn bind(addr: &str) -> Result<TcpListener, RelayError> {
    Ok(TcpListener::bind(addr).await?)
}

/// Accepts subscriber connections until the task is dropped.
pub async fn serve(listener: TcpListener, manager: Arc<LifecycleManager>) {
    match listener.local_addr() {
        Ok(addr) => info!("🚀 Subscriber WebSocket listening on ws://{}{}", addr, WS_PATH),
        Err(e) => warn!("Subscriber listener address unknown: {}", e),
    }

    loop {
        match listener.accept().await {
            Ok((tcp, peer)) => {
                let manager = manager.clone();
                tokio::spawn(async move {
                    handle_connection(tcp, peer, manager).await;
                });
            }
            Err(e) => {
                // Typically fd exhaustion; keep serving.
                error!("❌ Accept failed: {}", e);
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        }
    }
}

async fn handle_connection(tcp: TcpStream, peer: SocketAddr, manager: Arc<LifecycleManager>) {
    let mut params = ConnectParams::default();

    let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        let path = req.uri().path().trim_end_matches('/');
        if path != WS_PATH {
            let mut not_found = ErrorResponse::new(Some(format!("unknown path {}", path)));
            *not_found.status_mut() = StatusCode::NOT_FOUND;
            return Err(not_found);
        }
        params = ConnectParams::from_query(req.uri().query());
        Ok(resp)
    };

    let ws = match accept_hdr_async(tcp, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!(%peer, "WebSocket handshake failed: {}", e);
            return;
        }
    };

    debug!(%peer, client_id = ?params.client_id, "WebSocket handshake complete");
    let outcome = manager.run(ws, params).await;
    debug!(%peer, cause = ?outcome.cause, "Connection finished");
}
