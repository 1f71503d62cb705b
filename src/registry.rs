use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use prometheus::IntGauge;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

use crate::connection::SharedHandle;
use crate::metrics;
use crate::model::{ConnectionId, SubscriberId};

struct Entry {
    handle: SharedHandle,
    connected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscriberInfo {
    pub id: SubscriberId,
    pub connection: String,
    pub connected_at: DateTime<Utc>,
}

/// Live subscriber connections keyed by identity.
///
/// Every operation takes the lock for a short, synchronous section only; no
/// I/O ever happens while it is held. Snapshots clone the `Arc` handles out so
/// delivery runs without the lock.
///
/// The connected gauge is written under the same write lock as the map, so
/// it always ends on the last committed size.
pub struct ConnectionRegistry {
    entries: RwLock<HashMap<SubscriberId, Entry>>,
    connected: IntGauge,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::with_gauge(metrics::CONNECTED_SUBSCRIBERS.clone())
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_gauge(connected: IntGauge) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            connected,
        }
    }

    /// Inserts or replaces the entry for `id` (last registration wins).
    ///
    /// The previous handle is handed back untouched; closing it is up to the
    /// caller.
    pub fn register(&self, id: SubscriberId, handle: SharedHandle) -> Option<SharedHandle> {
        let conn = handle.connection_id();
        let (previous, count) = {
            let mut entries = self.entries.write();
            let previous = entries.insert(
                id.clone(),
                Entry {
                    handle,
                    connected_at: Utc::now(),
                },
            );
            self.connected.set(entries.len() as i64);
            (previous.map(|e| e.handle), entries.len())
        };

        info!(subscriber = %id, connection = %conn, clients = count, "🔌 Subscriber registered");
        previous
    }

    /// Removes the entry for `id`. No-op if absent.
    pub fn unregister(&self, id: &SubscriberId) -> bool {
        let (removed, count) = {
            let mut entries = self.entries.write();
            let removed = entries.remove(id).is_some();
            if removed {
                self.connected.set(entries.len() as i64);
            }
            (removed, entries.len())
        };

        if removed {
            info!(subscriber = %id, clients = count, "Subscriber unregistered");
        }
        removed
    }

    /// Removes the entry for `id` only while it still points at `connection`.
    ///
    /// A session that was superseded must not take its replacement down with it.
    pub fn unregister_connection(&self, id: &SubscriberId, connection: ConnectionId) -> bool {
        let (removed, count) = {
            let mut entries = self.entries.write();
            let matches = entries
                .get(id)
                .is_some_and(|e| e.handle.connection_id() == connection);
            if matches {
                entries.remove(id);
                self.connected.set(entries.len() as i64);
            }
            (matches, entries.len())
        };

        if removed {
            info!(subscriber = %id, connection = %connection, clients = count, "Subscriber unregistered");
        } else {
            debug!(subscriber = %id, connection = %connection, "Unregister skipped, entry absent or replaced");
        }
        removed
    }

    /// Point-in-time view of the registered handles, sorted by identity.
    ///
    /// With `ids` set, only those identities that are currently registered are
    /// returned; unknown ones are skipped.
    pub fn snapshot_targets(
        &self,
        ids: Option<&HashSet<SubscriberId>>,
    ) -> Vec<(SubscriberId, SharedHandle)> {
        let mut snapshot: Vec<_> = {
            let entries = self.entries.read();
            match ids {
                None => entries
                    .iter()
                    .map(|(id, e)| (id.clone(), e.handle.clone()))
                    .collect(),
                Some(ids) => ids
                    .iter()
                    .filter_map(|id| entries.get(id).map(|e| (id.clone(), e.handle.clone())))
                    .collect(),
            }
        };
        snapshot.sort_by(|a, b| a.0.cmp(&b.0));
        snapshot
    }

    pub fn count(&self) -> usize {
        self.entries.read().len()
    }

    pub fn subscribers(&self) -> Vec<SubscriberInfo> {
        let mut list: Vec<_> = self
            .entries
            .read()
            .iter()
            .map(|(id, e)| SubscriberInfo {
                id: id.clone(),
                connection: e.handle.connection_id().to_string(),
                connected_at: e.connected_at,
            })
            .collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }
}
