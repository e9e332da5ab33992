//! Per-user order-id map registry.
//!
//! Mapping state is scoped per user account, not per connection: two
//! concurrent sessions logged in as the same user share one map and one
//! persistence file, serialized by that map's internal mutex.

use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;

use crate::map::OrderIdMap;

/// Hands out `Arc`-shared [`OrderIdMap`]s keyed by user name.
pub struct OrderMapRegistry {
    dir: PathBuf,
    maps: DashMap<String, Arc<OrderIdMap>>,
}

impl OrderMapRegistry {
    /// Create a registry persisting maps under `dir`.
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            maps: DashMap::new(),
        }
    }

    /// Get the map for `user`, creating (and loading) it on first use.
    pub fn get_or_create(&self, user: &str, trading_day: &str) -> Arc<OrderIdMap> {
        self.maps
            .entry(user.to_string())
            .or_insert_with(|| {
                let file = format!("{}.ordermap.json", sanitize_file_stem(user));
                Arc::new(OrderIdMap::open(self.dir.join(file), trading_day))
            })
            .clone()
    }

    /// Number of users with an open map.
    pub fn user_count(&self) -> usize {
        self.maps.len()
    }
}

/// User names come from the wire; anything that is not a safe file-name
/// character is replaced before building the persistence path.
fn sanitize_file_stem(user: &str) -> String {
    user.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
