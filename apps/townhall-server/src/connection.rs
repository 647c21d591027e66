use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;
use townhall_events::{Bus, SubscriberId};
use uuid::Uuid;

use crate::security::Principal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Open,
            _ => ConnectionState::Closed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) enum CloseReason {
    /// The response body was dropped: tab closed, network gone, or a write failed.
    ClientGone,
    /// The bus deregistered the channel because it fell behind.
    BusDropped,
    EncodeFailed,
}

impl CloseReason {
    fn as_str(self) -> &'static str {
        match self {
            CloseReason::ClientGone => "client-gone",
            CloseReason::BusDropped => "bus-dropped",
            CloseReason::EncodeFailed => "encode-failed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ConnectionInfo {
    pub id: Uuid,
    pub principal: Principal,
    pub opened_at: String,
    pub state: ConnectionState,
}

struct LiveEntry {
    info: ConnectionInfo,
    conn: Weak<Connection>,
}

/// One live push session. Owns exactly one bus subscription.
///
/// Teardown runs once: the first caller of [`Connection::close`] wins the state
/// transition, deregisters the subscriber and updates the registry; later
/// callers see `false` and do nothing.
pub(crate) struct Connection {
    id: Uuid,
    principal: Principal,
    state: AtomicU8,
    subscriber: Mutex<Option<SubscriberId>>,
    bus: Bus,
    registry: Arc<ConnectionRegistry>,
}

impl Connection {
    pub(crate) fn id(&self) -> Uuid {
        self.id
    }

    pub(crate) fn principal(&self) -> &Principal {
        &self.principal
    }

    pub(crate) fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Record the bus subscription and move to `Open`. Returns false when the
    /// connection was closed before it finished connecting.
    pub(crate) fn attach(&self, subscriber: SubscriberId) -> bool {
        *self.subscriber.lock() = Some(subscriber);
        let opened = self
            .state
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if !opened {
            self.bus.unsubscribe(subscriber);
        }
        opened
    }

    pub(crate) fn close(&self, reason: CloseReason) -> bool {
        let prev = self.state.swap(2, Ordering::AcqRel);
        if prev == 2 {
            return false;
        }
        if let Some(sub) = self.subscriber.lock().take() {
            self.bus.unsubscribe(sub);
        }
        self.registry.forget(self.id, reason);
        tracing::info!(
            connection_id = %self.id,
            principal = %self.principal.name,
            reason = reason.as_str(),
            "push connection closed"
        );
        true
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RegistrySnapshot {
    pub open: usize,
    pub opened_total: u64,
    pub closed_total: u64,
    pub items: Vec<ConnectionInfo>,
}

/// Live connections, for operators and tests.
#[derive(Default)]
pub(crate) struct ConnectionRegistry {
    live: Mutex<HashMap<Uuid, LiveEntry>>,
    opened: AtomicU64,
    closed: AtomicU64,
}

impl ConnectionRegistry {
    pub(crate) fn open(self: &Arc<Self>, bus: Bus, principal: Principal) -> Arc<Connection> {
        let id = Uuid::new_v4();
        let info = ConnectionInfo {
            id,
            principal: principal.clone(),
            opened_at: townhall_events::now_rfc3339(),
            state: ConnectionState::Connecting,
        };
        let conn = Arc::new(Connection {
            id,
            principal,
            state: AtomicU8::new(0),
            subscriber: Mutex::new(None),
            bus,
            registry: Arc::clone(self),
        });
        self.live.lock().insert(
            id,
            LiveEntry {
                info,
                conn: Arc::downgrade(&conn),
            },
        );
        self.opened.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("townhall_events_sse_connections_total").increment(1);
        conn
    }

    fn forget(&self, id: Uuid, reason: CloseReason) {
        self.live.lock().remove(&id);
        self.closed.fetch_add(1, Ordering::Relaxed);
        if reason != CloseReason::ClientGone {
            metrics::counter!("townhall_events_sse_errors_total", "reason" => reason.as_str())
                .increment(1);
        }
    }

    pub(crate) fn open_count(&self) -> usize {
        self.live.lock().len()
    }

    pub(crate) fn snapshot(&self) -> RegistrySnapshot {
        let mut items: Vec<ConnectionInfo> = self
            .live
            .lock()
            .values()
            .map(|entry| ConnectionInfo {
                state: entry
                    .conn
                    .upgrade()
                    .map_or(ConnectionState::Closed, |c| c.state()),
                ..entry.info.clone()
            })
            .collect();
        items.sort_by(|a, b| a.opened_at.cmp(&b.opened_at));
        RegistrySnapshot {
            open: items.len(),
            opened_total: self.opened.load(Ordering::Relaxed),
            closed_total: self.closed.load(Ordering::Relaxed),
            items,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::Role;

    fn principal() -> Principal {
        Principal {
            name: "alice".into(),
            role: Role::Official,
        }
    }

    #[test]
    fn close_runs_once() {
        let bus = Bus::new(4);
        let registry = Arc::new(ConnectionRegistry::default());
        let conn = registry.open(bus.clone(), principal());
        assert_eq!(conn.state(), ConnectionState::Connecting);
        let sub = bus.subscribe();
        assert!(conn.attach(sub.id()));
        assert_eq!(conn.state(), ConnectionState::Open);
        assert_eq!(registry.open_count(), 1);
        assert_eq!(registry.snapshot().items[0].state, ConnectionState::Open);

        assert!(conn.close(CloseReason::ClientGone));
        assert!(!conn.close(CloseReason::EncodeFailed));
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(!bus.is_subscribed(sub.id()));
        let snap = registry.snapshot();
        assert_eq!((snap.open, snap.opened_total, snap.closed_total), (0, 1, 1));
    }

    #[test]
    fn concurrent_close_tears_down_once() {
        let bus = Bus::new(4);
        let registry = Arc::new(ConnectionRegistry::default());
        let conn = registry.open(bus.clone(), principal());
        let sub = bus.subscribe();
        conn.attach(sub.id());

        let winners: usize = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let conn = &conn;
                    s.spawn(move || {
                        let reason = if i % 2 == 0 {
                            CloseReason::ClientGone
                        } else {
                            CloseReason::BusDropped
                        };
                        usize::from(conn.close(reason))
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap_or(0)).sum()
        });
        assert_eq!(winners, 1);
        assert_eq!(registry.snapshot().closed_total, 1);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn attach_after_close_releases_subscription() {
        let bus = Bus::new(4);
        let registry = Arc::new(ConnectionRegistry::default());
        let conn = registry.open(bus.clone(), principal());
        conn.close(CloseReason::ClientGone);
        let sub = bus.subscribe();
        assert!(!conn.attach(sub.id()));
        assert!(!bus.is_subscribed(sub.id()));
    }
}
