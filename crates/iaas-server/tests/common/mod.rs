// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for iaas-server integration tests.
//!
//! Builds every service over the in-memory store and the mock runtime
//! with zeroed stage timings, so clusters provision instantly and no
//! Docker daemon or database is needed.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use iaas_core::cache::ClusterCache;
use iaas_core::events::MemoryEventBus;
use iaas_core::store::{MemoryStore, MetadataStore};
use iaas_runtime::{ExecResult, MockRuntime};

use iaas_server::context::Ctx;
use iaas_server::services::{
    ClusterTimings, GenericContainerService, NginxClusterService, NginxSingleService,
    PostgresClusterService, PostgresSingleService, ServiceDeps, StackService,
};

/// Test context wiring every service over mock collaborators.
pub struct TestContext {
    pub store: Arc<MemoryStore>,
    pub runtime: Arc<MockRuntime>,
    pub events: Arc<MemoryEventBus>,
    pub cache: Arc<ClusterCache>,
    pub postgres_single: Arc<PostgresSingleService>,
    pub postgres_cluster: Arc<PostgresClusterService>,
    pub nginx_single: Arc<NginxSingleService>,
    pub nginx_cluster: Arc<NginxClusterService>,
    pub generic: Arc<GenericContainerService>,
    pub stacks: Arc<StackService>,
    pub ctx: Ctx,
}

impl TestContext {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let runtime = Arc::new(MockRuntime::new());
        let events = Arc::new(MemoryEventBus::new(64));
        let cache = Arc::new(ClusterCache::new());

        let deps = ServiceDeps {
            store: store.clone() as Arc<dyn MetadataStore>,
            runtime: runtime.clone(),
            cache: cache.clone(),
            events: events.clone(),
        };

        let postgres_single = Arc::new(PostgresSingleService::new(deps.clone()));
        let postgres_cluster = Arc::new(PostgresClusterService::new(
            deps.clone(),
            ClusterTimings::zero(),
        ));
        let nginx_single = Arc::new(NginxSingleService::new(deps.clone()));
        let nginx_cluster = Arc::new(NginxClusterService::new(deps.clone()));
        let generic = Arc::new(GenericContainerService::new(deps.clone()));
        let stacks = Arc::new(StackService::new(
            deps,
            postgres_single.clone(),
            postgres_cluster.clone(),
            nginx_single.clone(),
            nginx_cluster.clone(),
            generic.clone(),
        ));

        Self {
            store,
            runtime,
            events,
            cache,
            postgres_single,
            postgres_cluster,
            nginx_single,
            nginx_cluster,
            generic,
            stacks,
            ctx: Ctx::new("test-user"),
        }
    }

    /// Script the Patroni REST probes: node 1 answers as the leader, every
    /// other node as a replica. Call before operations that resolve the
    /// primary.
    pub fn script_patroni_roles(&self, leader_index: u32) {
        self.runtime.script_exec(
            format!("patroni-node-{leader_index}"),
            "curl -s http://localhost:8008",
            ExecResult::ok(r#"{"state": "running", "role": "master"}"#),
        );
        self.runtime.script_exec(
            "patroni-node",
            "curl -s http://localhost:8008",
            ExecResult::ok(r#"{"state": "running", "role": "replica"}"#),
        );
    }

    /// Script the replication-test count probe to report one row on every
    /// patroni node.
    pub fn script_replication_counts(&self, count: &str) {
        self.runtime.script_exec(
            "patroni-node",
            "SELECT count(*) FROM replication_test",
            ExecResult::ok(format!("{count}\n")),
        );
    }
}

/// Poll until `check` passes or the timeout elapses.
pub async fn wait_for<F>(what: &str, mut check: F)
where
    F: AsyncFnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if check().await {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
