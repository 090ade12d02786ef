// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Read-through TTL cache for cluster views.
//!
//! Strictly an accelerator: every mutation that affects a cached view calls
//! [`ClusterCache::invalidate_cluster`], misses fall through to a full
//! recomputation, and the cache is never consulted as a fallback when the
//! backend fails. Entries are process-local and carry no semantic weight.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

/// TTL for the cluster info view.
pub const INFO_TTL: Duration = Duration::from_secs(300);
/// TTL for the cluster stats view.
pub const STATS_TTL: Duration = Duration::from_secs(30);
/// TTL for the replication status view.
pub const REPLICATION_TTL: Duration = Duration::from_secs(10);

struct Entry {
    expires_at: Instant,
    value: serde_json::Value,
}

/// Process-local TTL cache keyed by cluster view.
#[derive(Default)]
pub struct ClusterCache {
    entries: DashMap<String, Entry>,
}

impl ClusterCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache key for a cluster's info view.
    pub fn info_key(cluster_id: Uuid) -> String {
        format!("info:{cluster_id}")
    }

    /// Cache key for a cluster's stats view.
    pub fn stats_key(cluster_id: Uuid) -> String {
        format!("stats:{cluster_id}")
    }

    /// Cache key for a cluster's replication status view.
    pub fn replication_key(cluster_id: Uuid) -> String {
        format!("repl:{cluster_id}")
    }

    /// Read a cached value; expired entries are dropped and report a miss.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let hit = match self.entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                serde_json::from_value(entry.value.clone()).ok()
            }
            Some(_) => None,
            None => return None,
        };
        if hit.is_none() {
            self.entries.remove(key);
        }
        hit
    }

    /// Store a value under a TTL. Serialization failures drop the entry.
    pub fn put<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        if let Ok(json) = serde_json::to_value(value) {
            self.entries.insert(
                key.to_string(),
                Entry {
                    expires_at: Instant::now() + ttl,
                    value: json,
                },
            );
        }
    }

    /// Drop every cached view of a cluster.
    pub fn invalidate_cluster(&self, cluster_id: Uuid) {
        self.entries.remove(&Self::info_key(cluster_id));
        self.entries.remove(&Self::stats_key(cluster_id));
        self.entries.remove(&Self::replication_key(cluster_id));
    }
}
