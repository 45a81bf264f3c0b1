// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common fixtures for sandkeep-core integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use sandkeep_core::object_store::{MemoryObjectStore, ObjectStore};
use sandkeep_core::replication::{ReplicationConfig, ReplicationEngine};
use sandkeep_core::sandbox::MockSandbox;
use sandkeep_core::tenant::Tenant;

pub const TENANT: &str = "acme";
pub const CONFIG_DIR: &str = "/root/.gateway";
pub const WORKSPACE_DIR: &str = "/root/workspace";
pub const DURABLE_DIR: &str = "/data/durable/tenants/acme";

/// A sandbox holding a valid configuration tree and a workspace.
pub fn seeded_sandbox() -> Arc<MockSandbox> {
    let sandbox = Arc::new(MockSandbox::new(TENANT));
    sandbox.set_file(
        "/root/.gateway/gateway.json",
        r#"{"gateway": {"port": 18789}, "agents": {"default": "main"}}"#,
    );
    sandbox.set_file("/root/.gateway/credentials/slack.json", r#"{"token": "xoxb"}"#);
    sandbox.set_file("/root/.gateway/.registered", "2025-06-01T00:00:00Z");
    sandbox.set_file("/root/.gateway/channels/slack/config.json", "{}");
    sandbox.set_file("/root/.gateway/sessions/main.jsonl", "{}\n");
    sandbox.set_file("/root/.gateway/gateway.lock", "pid 42");
    sandbox.set_file("/root/workspace/memory/2025-06-01.md", "# notes");
    sandbox.set_file("/root/workspace/skills/search/SKILL.md", "search");
    sandbox.set_file("/root/workspace/run.log", "noise");
    sandbox
}

pub fn tenant(sandbox: &Arc<MockSandbox>) -> Tenant {
    Tenant::new(TENANT, sandbox.clone())
}

/// Engine with default config backed by a fresh in-memory store.
pub fn engine() -> (Arc<ReplicationEngine>, MemoryObjectStore) {
    engine_with(ReplicationConfig::default())
}

pub fn engine_with(config: ReplicationConfig) -> (Arc<ReplicationEngine>, MemoryObjectStore) {
    let store = MemoryObjectStore::new();
    let shared: Arc<dyn ObjectStore> = Arc::new(store.clone());
    (Arc::new(ReplicationEngine::new(config, Some(shared))), store)
}
