use futures::future::join_all;
use std::sync::Arc;
use tracing::{info, warn};

use crate::connection::{CloseReason, SharedHandle};
use crate::error::RelayError;
use crate::metrics;
use crate::model::{DispatchReport, SignalRequest, SubscriberId};
use crate::registry::ConnectionRegistry;
use crate::security::AuthGate;

/// Fans a control-plane signal out to registered subscribers.
///
/// Every send in a pass is independent: a failed subscriber is remembered and
/// evicted once the whole pass has finished, so it cannot disturb delivery to
/// the others in the same call.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<ConnectionRegistry>,
    gate: AuthGate,
}

impl Dispatcher {
    pub fn new(registry: Arc<ConnectionRegistry>, gate: AuthGate) -> Self {
        Self { registry, gate }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn gate(&self) -> &AuthGate {
        &self.gate
    }

    /// Checks the control-plane secret, then delivers. A bad secret returns
    /// `Forbidden` before the registry is touched.
    pub async fn dispatch(
        &self,
        presented_secret: Option<&str>,
        request: SignalRequest,
    ) -> Result<DispatchReport, RelayError> {
        self.gate.check_control_plane(presented_secret)?;
        self.deliver(request).await
    }

    async fn deliver(&self, request: SignalRequest) -> Result<DispatchReport, RelayError> {
        let (signal, targets) = request.into_parts();
        let payload = serde_json::to_string(&signal)?;
        metrics::inc_signals_dispatched();

        let snapshot = self.registry.snapshot_targets(targets.as_ref());

        // --- 1. Delivery pass ---
        let attempts = snapshot.iter().map(|(id, handle)| {
            let payload = payload.as_str();
            async move { (id, handle, handle.send_text(payload).await) }
        });
        let results = join_all(attempts).await;

        let mut delivered = 0usize;
        let mut failed: Vec<(SubscriberId, SharedHandle)> = Vec::new();
        for (id, handle, result) in results {
            match result {
                Ok(()) => delivered += 1,
                Err(source) => {
                    let err = RelayError::DeliveryFailure {
                        subscriber: id.clone(),
                        source,
                    };
                    warn!(subscriber = %id, "❌ {}", err);
                    failed.push((id.clone(), handle.clone()));
                }
            }
        }

        // --- 2. Eviction, strictly after the pass ---
        for (id, handle) in &failed {
            if self
                .registry
                .unregister_connection(id, handle.connection_id())
            {
                metrics::inc_evictions();
            }
            handle.close(CloseReason::Evicted);
        }

        metrics::inc_deliveries(delivered as u64);
        metrics::inc_delivery_failures(failed.len() as u64);

        let clients = self.registry.count();
        info!(
            action = %signal.action,
            symbol = %signal.symbol,
            targeted = targets.is_some(),
            delivered,
            failed = failed.len(),
            clients,
            "📡 Signal dispatched"
        );

        Ok(DispatchReport {
            delivered,
            failed: failed.into_iter().map(|(id, _)| id).collect(),
            clients,
        })
    }
}
