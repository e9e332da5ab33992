//! The order-id translation table.
//!
//! One mutex guards both directions of the mapping plus the sequence
//! counter, so every `bind`/`resolve`/`assign_local` call is totally ordered
//! across all sessions sharing the map. The lock is held across the
//! persistence write on `bind` (and nothing else), so a loaded file always
//! reflects a consistent snapshot.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::persist;

/// Gateway-issued order key, unique within one trading day.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocalOrderKey {
    /// Trading day the key was issued on (`YYYYMMDD`).
    pub trading_day: String,
    /// Sequence number within the trading day, starting at 1.
    pub seq: u64,
}

impl fmt::Display for LocalOrderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.trading_day, self.seq)
    }
}

/// Venue-issued order key.
///
/// Assigned asynchronously after submission; `order_sys_id` may arrive in a
/// later confirmation than the one that established the binding, in which
/// case the binding is refreshed via a re-`bind`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteOrderKey {
    /// Exchange identifier (e.g. `SHFE`, or `SIM` for the simulated venue).
    pub exchange_id: String,
    /// Venue order-system id within that exchange.
    pub order_sys_id: String,
}

impl fmt::Display for RemoteOrderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.exchange_id, self.order_sys_id)
    }
}

pub(crate) struct MapInner {
    pub(crate) trading_day: String,
    pub(crate) next_seq: u64,
    pub(crate) local_to_remote: HashMap<LocalOrderKey, RemoteOrderKey>,
    pub(crate) remote_to_local: HashMap<RemoteOrderKey, LocalOrderKey>,
    /// Set when the last persistence write failed; cleared on the next
    /// successful write. In-memory state stays authoritative throughout.
    persist_degraded: bool,
}

#[cfg(test)]
impl MapInner {
    pub(crate) fn for_test(
        trading_day: &str,
        next_seq: u64,
        local_to_remote: HashMap<LocalOrderKey, RemoteOrderKey>,
        remote_to_local: HashMap<RemoteOrderKey, LocalOrderKey>,
    ) -> Self {
        Self {
            trading_day: trading_day.to_string(),
            next_seq,
            local_to_remote,
            remote_to_local,
            persist_degraded: false,
        }
    }
}

/// Mutex-guarded bidirectional order-id map with file persistence.
pub struct OrderIdMap {
    path: PathBuf,
    inner: Mutex<MapInner>,
}

impl OrderIdMap {
    /// Open the map backed by `path`, loading any persisted state for
    /// `trading_day`.
    ///
    /// A missing, unreadable, or prior-day file yields an empty map; loading
    /// never fails the session.
    pub fn open(path: PathBuf, trading_day: &str) -> Self {
        let mut inner = MapInner {
            trading_day: trading_day.to_string(),
            next_seq: 1,
            local_to_remote: HashMap::new(),
            remote_to_local: HashMap::new(),
            persist_degraded: false,
        };

        match persist::load(&path, trading_day) {
            Ok(Some(snapshot)) => {
                inner.next_seq = snapshot.next_seq;
                for (local, remote) in snapshot.bindings {
                    inner.remote_to_local.insert(remote.clone(), local.clone());
                    inner.local_to_remote.insert(local, remote);
                }
                tracing::info!(
                    path = %path.display(),
                    trading_day,
                    bindings = inner.local_to_remote.len(),
                    "loaded order-id map"
                );
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to load order-id map; starting empty"
                );
            }
        }

        Self {
            path,
            inner: Mutex::new(inner),
        }
    }

    /// Produce the next sequential local key for `trading_day`.
    ///
    /// Keys are strictly increasing within one trading day. When the day
    /// changes, the counter resets and all prior-day bindings are dropped.
    pub fn assign_local(&self, trading_day: &str) -> LocalOrderKey {
        let mut inner = self.inner.lock();
        if inner.trading_day != trading_day {
            tracing::info!(
                from = %inner.trading_day,
                to = trading_day,
                "trading day changed; resetting order-id map"
            );
            inner.trading_day = trading_day.to_string();
            inner.next_seq = 1;
            inner.local_to_remote.clear();
            inner.remote_to_local.clear();
        }
        let key = LocalOrderKey {
            trading_day: inner.trading_day.clone(),
            seq: inner.next_seq,
        };
        inner.next_seq += 1;
        key
    }

    /// Insert a binding into both directions atomically and persist the
    /// full mapping.
    ///
    /// Re-binding the same local key is idempotent and allowed (the venue
    /// may confirm the same order twice, or fill in `order_sys_id` late).
    /// Binding a remote key already held by a *different* local key is an
    /// inconsistency: it is logged and the newer binding wins.
    pub fn bind(&self, local: LocalOrderKey, remote: RemoteOrderKey) {
        let mut inner = self.inner.lock();

        if let Some(prev_local) = inner.remote_to_local.get(&remote).cloned() {
            if prev_local != local {
                tracing::warn!(
                    remote = %remote,
                    prev_local = %prev_local,
                    new_local = %local,
                    "remote order key rebound to a different local key; last writer wins"
                );
                inner.local_to_remote.remove(&prev_local);
            }
        }
        // A local key re-bound to a new remote must not leave its old
        // reverse entry behind.
        if let Some(prev_remote) = inner.local_to_remote.get(&local).cloned() {
            if prev_remote != remote {
                inner.remote_to_local.remove(&prev_remote);
            }
        }

        inner.remote_to_local.insert(remote.clone(), local.clone());
        inner.local_to_remote.insert(local, remote);

        self.persist(&mut inner);
    }

    /// Look up the remote key bound to `local`.
    pub fn resolve_remote(&self, local: &LocalOrderKey) -> Option<RemoteOrderKey> {
        self.inner.lock().local_to_remote.get(local).cloned()
    }

    /// Look up the local key bound to `remote`.
    pub fn resolve_local(&self, remote: &RemoteOrderKey) -> Option<LocalOrderKey> {
        self.inner.lock().remote_to_local.get(remote).cloned()
    }

    /// Find the local key for a late-arriving venue confirmation that only
    /// carries exchange and order-system identifiers.
    pub fn find_local_by_venue_id(
        &self,
        exchange_id: &str,
        order_sys_id: &str,
    ) -> Option<LocalOrderKey> {
        let inner = self.inner.lock();
        inner
            .remote_to_local
            .iter()
            .find(|(remote, _)| {
                remote.exchange_id == exchange_id && remote.order_sys_id == order_sys_id
            })
            .map(|(_, local)| local.clone())
    }

    /// Number of bindings currently held.
    pub fn len(&self) -> usize {
        self.inner.lock().local_to_remote.len()
    }

    /// True when the map holds no bindings.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True while the last persistence write has failed and not yet been
    /// retried successfully. The in-memory mapping remains authoritative.
    pub fn persist_degraded(&self) -> bool {
        self.inner.lock().persist_degraded
    }

    fn persist(&self, inner: &mut MapInner) {
        match persist::save(&self.path, inner) {
            Ok(()) => {
                if inner.persist_degraded {
                    tracing::info!(path = %self.path.display(), "order-id map persistence recovered");
                    inner.persist_degraded = false;
                }
            }
            Err(e) => {
                if !inner.persist_degraded {
                    tracing::warn!(
                        path = %self.path.display(),
                        error = %e,
                        "failed to persist order-id map; will retry on next bind"
                    );
                    inner.persist_degraded = true;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_map(day: &str) -> (tempfile::TempDir, OrderIdMap) {
        let dir = tempfile::tempdir().unwrap();
        let map = OrderIdMap::open(dir.path().join("u1.ordermap.json"), day);
        (dir, map)
    }

    fn remote(sys_id: &str) -> RemoteOrderKey {
        RemoteOrderKey {
            exchange_id: "SIM".into(),
            order_sys_id: sys_id.into(),
        }
    }

    #[test]
    fn test_assign_local_strictly_increasing() {
        let (_dir, map) = temp_map("20260830");
        let keys: Vec<_> = (0..5).map(|_| map.assign_local("20260830")).collect();
        for pair in keys.windows(2) {
            assert!(pair[1].seq > pair[0].seq);
        }
        assert_eq!(keys[0].seq, 1);
        assert_eq!(keys[4].seq, 5);
    }

    #[test]
    fn test_day_change_resets_counter_and_drops_bindings() {
        let (_dir, map) = temp_map("20260830");
        let local = map.assign_local("20260830");
        map.bind(local.clone(), remote("1"));
        assert_eq!(map.len(), 1);

        let next = map.assign_local("20260831");
        assert_eq!(next.seq, 1);
        assert_eq!(next.trading_day, "20260831");
        assert!(map.is_empty());
        assert!(map.resolve_remote(&local).is_none());
    }

    #[test]
    fn test_bind_resolves_both_directions() {
        let (_dir, map) = temp_map("20260830");
        let local = map.assign_local("20260830");
        let rem = remote("42");
        map.bind(local.clone(), rem.clone());

        assert_eq!(map.resolve_remote(&local), Some(rem.clone()));
        assert_eq!(map.resolve_local(&rem), Some(local));
    }

    #[test]
    fn test_rebind_same_local_is_idempotent() {
        let (_dir, map) = temp_map("20260830");
        let local = map.assign_local("20260830");
        map.bind(local.clone(), remote("42"));
        map.bind(local.clone(), remote("42"));
        assert_eq!(map.len(), 1);
        assert_eq!(map.resolve_remote(&local), Some(remote("42")));
    }

    #[test]
    fn test_rebind_local_to_new_remote_drops_stale_reverse_entry() {
        let (_dir, map) = temp_map("20260830");
        let local = map.assign_local("20260830");
        map.bind(local.clone(), remote("42"));
        // Venue fills in the real order_sys_id later.
        map.bind(local.clone(), remote("990042"));

        assert_eq!(map.resolve_remote(&local), Some(remote("990042")));
        assert!(map.resolve_local(&remote("42")).is_none());
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_remote_conflict_last_writer_wins() {
        let (_dir, map) = temp_map("20260830");
        let a = map.assign_local("20260830");
        let b = map.assign_local("20260830");
        let rem = remote("7");

        map.bind(a.clone(), rem.clone());
        map.bind(b.clone(), rem.clone());

        assert_eq!(map.resolve_local(&rem), Some(b.clone()));
        assert_eq!(map.resolve_remote(&b), Some(rem));
        // The loser's forward entry is gone; directions stay consistent.
        assert!(map.resolve_remote(&a).is_none());
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_find_local_by_venue_id() {
        let (_dir, map) = temp_map("20260830");
        let local = map.assign_local("20260830");
        map.bind(local.clone(), remote("555"));

        assert_eq!(map.find_local_by_venue_id("SIM", "555"), Some(local));
        assert!(map.find_local_by_venue_id("SIM", "556").is_none());
        assert!(map.find_local_by_venue_id("SHFE", "555").is_none());
    }

    #[test]
    fn test_persists_and_reloads_same_day() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("u1.ordermap.json");

        let mut locals = Vec::new();
        {
            let map = OrderIdMap::open(path.clone(), "20260830");
            for i in 0..3 {
                let local = map.assign_local("20260830");
                map.bind(local.clone(), remote(&format!("{}", 100 + i)));
                locals.push(local);
            }
        }

        let reloaded = OrderIdMap::open(path, "20260830");
        assert_eq!(reloaded.len(), 3);
        for (i, local) in locals.iter().enumerate() {
            assert_eq!(
                reloaded.resolve_remote(local),
                Some(remote(&format!("{}", 100 + i)))
            );
        }
        // The counter continues where it left off; no reuse after restart.
        let next = reloaded.assign_local("20260830");
        assert_eq!(next.seq, 4);
    }

    #[test]
    fn test_prior_day_file_discarded_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("u1.ordermap.json");

        {
            let map = OrderIdMap::open(path.clone(), "20260829");
            let local = map.assign_local("20260829");
            map.bind(local, remote("1"));
        }

        let reloaded = OrderIdMap::open(path, "20260830");
        assert!(reloaded.is_empty());
        assert_eq!(reloaded.assign_local("20260830").seq, 1);
    }

    #[test]
    fn test_corrupt_file_yields_empty_map() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("u1.ordermap.json");
        std::fs::write(&path, "{not json at all").unwrap();

        let map = OrderIdMap::open(path, "20260830");
        assert!(map.is_empty());
    }

    #[test]
    fn test_persist_failure_is_degraded_not_fatal() {
        // A directory path can be opened as a map but never written to.
        let dir = tempfile::tempdir().unwrap();
        let map = OrderIdMap::open(dir.path().to_path_buf(), "20260830");

        let local = map.assign_local("20260830");
        map.bind(local.clone(), remote("1"));

        assert!(map.persist_degraded());
        // In-memory mapping is still authoritative.
        assert_eq!(map.resolve_remote(&local), Some(remote("1")));
    }

    #[test]
    fn test_concurrent_binds_stay_consistent() {
        use std::sync::Arc;

        let dir = tempfile::tempdir().unwrap();
        let map = Arc::new(OrderIdMap::open(
            dir.path().join("u1.ordermap.json"),
            "20260830",
        ));

        let mut handles = Vec::new();
        for t in 0..4 {
            let map = map.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..25 {
                    let local = map.assign_local("20260830");
                    let rem = RemoteOrderKey {
                        exchange_id: "SIM".into(),
                        order_sys_id: format!("{}-{}", t, local.seq),
                    };
                    map.bind(local.clone(), rem.clone());
                    assert_eq!(map.resolve_remote(&local), Some(rem.clone()));
                    assert_eq!(map.resolve_local(&rem), Some(local));
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(map.len(), 100);
    }
}
