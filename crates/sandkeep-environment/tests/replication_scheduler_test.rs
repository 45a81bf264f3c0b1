// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Replication scheduler tests.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::MockProvider;
use sandkeep_core::object_store::{MemoryObjectStore, ObjectStore};
use sandkeep_core::replication::{ReplicationConfig, ReplicationEngine};
use sandkeep_environment::replication_scheduler::{
    ReplicationScheduler, ReplicationSchedulerConfig, SchedulerPass,
};
use sandkeep_environment::tenants::TenantRegistry;

struct Fixture {
    provider: Arc<MockProvider>,
    registry: Arc<TenantRegistry>,
    engine: Arc<ReplicationEngine>,
    store: MemoryObjectStore,
}

fn fixture(tenants: &[&str]) -> Fixture {
    let provider = Arc::new(MockProvider::default());
    let registry = Arc::new(TenantRegistry::new(provider.clone()));
    for tenant in tenants {
        registry.get_or_create(tenant).unwrap();
    }
    let store = MemoryObjectStore::new();
    let shared: Arc<dyn ObjectStore> = Arc::new(store.clone());
    let engine = Arc::new(ReplicationEngine::new(
        ReplicationConfig::default(),
        Some(shared),
    ));
    Fixture {
        provider,
        registry,
        engine,
        store,
    }
}

fn scheduler(fixture: &Fixture, interval: Duration) -> ReplicationScheduler {
    ReplicationScheduler::new(
        fixture.registry.clone(),
        fixture.engine.clone(),
        ReplicationSchedulerConfig {
            interval,
            ..ReplicationSchedulerConfig::default()
        },
    )
}

#[tokio::test(start_paused = true)]
async fn test_only_awake_tenants_are_replicated() {
    let fixture = fixture(&["awake", "asleep", "stopped"]);
    fixture
        .provider
        .sandbox("awake")
        .spawn_running("start-service.sh");
    fixture.provider.sandbox("asleep").set_hibernating(true);

    let pass = scheduler(&fixture, Duration::from_secs(300)).run_once().await;

    assert_eq!(
        pass,
        SchedulerPass {
            replicated: 1,
            failed: 0,
            skipped: 2,
        }
    );
    let result = fixture.engine.last_result("awake").unwrap();
    assert!(result.success);
    let marker = fixture
        .store
        .get("tenants/awake/.last-sync")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        marker.meta.metadata.get("trigger").map(String::as_str),
        Some("scheduled")
    );
    assert!(fixture.engine.last_result("asleep").is_none());
    // Hibernating tenants are never woken by the scheduler.
    assert_eq!(
        fixture
            .provider
            .sandbox("asleep")
            .count_commands("start-service.sh"),
        0
    );
}

#[tokio::test(start_paused = true)]
async fn test_failed_replication_is_counted() {
    let fixture = fixture(&["acme"]);
    let sandbox = fixture.provider.sandbox("acme");
    sandbox.spawn_running("start-service.sh");
    sandbox.remove_file("/root/.gateway/gateway.json");

    let pass = scheduler(&fixture, Duration::from_secs(300)).run_once().await;

    assert_eq!(pass.failed, 1);
    assert_eq!(pass.replicated, 0);
    assert!(fixture.store.is_empty().await);
}

#[tokio::test(start_paused = true)]
async fn test_run_loop_replicates_on_interval_until_shutdown() {
    let fixture = fixture(&["acme"]);
    fixture
        .provider
        .sandbox("acme")
        .spawn_running("start-service.sh");
    let scheduler = scheduler(&fixture, Duration::from_secs(60));
    let shutdown = scheduler.shutdown_handle();
    let handle = tokio::spawn(scheduler.run());

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(fixture.engine.history("acme").is_empty());

    tokio::time::sleep(Duration::from_secs(95)).await;
    let history = fixture.engine.history("acme");
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|r| r.success));

    shutdown.notify_one();
    handle.await.unwrap();
}
