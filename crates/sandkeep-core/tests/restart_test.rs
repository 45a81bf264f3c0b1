// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Restart sequencing tests.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{engine, seeded_sandbox, tenant};
use sandkeep_core::health::HealthProbe;
use sandkeep_core::replication::{ReplicationErrorKind, SyncOutcome};
use sandkeep_core::sandbox::{ProcessStatus, Sandbox};
use sandkeep_core::shutdown::{RestartOrchestrator, ShutdownConfig, ShutdownCoordinator};
use sandkeep_core::wake::{WakeConfig, WakeController};
use tokio::time::Instant;

fn orchestrator(config: ShutdownConfig) -> RestartOrchestrator {
    let (engine, _store) = engine();
    let wake = Arc::new(WakeController::with_config(
        WakeConfig::default(),
        HealthProbe::default(),
    ));
    RestartOrchestrator::new(ShutdownCoordinator::new(engine, config), wake)
}

#[tokio::test(start_paused = true)]
async fn test_restart_syncs_kills_and_rewakes() {
    let sandbox = seeded_sandbox();
    let old = sandbox.spawn_running("start-service.sh");
    let orchestrator = orchestrator(ShutdownConfig::default());

    let handle = orchestrator.restart(&tenant(&sandbox)).await;

    assert!(handle.response.success);
    let sync = handle.response.sync_result.clone().unwrap();
    assert_eq!(sync.outcome, SyncOutcome::Complete);
    assert!(handle.response.message.contains("state synced"));

    handle.rewake.await.unwrap();
    let processes = sandbox.list_processes().await.unwrap();
    let old = processes.iter().find(|p| p.id == old).unwrap();
    assert_eq!(old.status, ProcessStatus::Exited);
    assert!(
        processes
            .iter()
            .any(|p| p.command == "start-service.sh" && p.status == ProcessStatus::Running)
    );
}

#[tokio::test(start_paused = true)]
async fn test_restart_sync_is_bounded_by_ceiling() {
    let sandbox = seeded_sandbox();
    sandbox.set_command_delay("rsync", Duration::from_secs(600));
    let orchestrator = orchestrator(ShutdownConfig {
        restart_sync_deadline: Duration::from_secs(120),
        restart_ceiling: Duration::from_secs(20),
        ..ShutdownConfig::default()
    });

    let started = Instant::now();
    let handle = orchestrator.restart(&tenant(&sandbox)).await;

    // 20s ceiling plus the 2s settle delay.
    assert!(started.elapsed() >= Duration::from_secs(22));
    assert!(started.elapsed() < Duration::from_secs(23));
    assert!(handle.response.success);
    assert!(handle.response.sync_result.is_none());
    assert!(handle.response.message.contains("timed out"));

    // The stuck copy was killed with everything else.
    let processes = sandbox.list_processes().await.unwrap();
    assert!(
        processes
            .iter()
            .filter(|p| p.command.starts_with("rsync"))
            .all(|p| p.status == ProcessStatus::Exited)
    );

    handle.rewake.abort();
}

#[tokio::test(start_paused = true)]
async fn test_restart_of_hibernating_sandbox() {
    let sandbox = seeded_sandbox();
    sandbox.set_hibernating(true);
    let orchestrator = orchestrator(ShutdownConfig::default());

    let handle = orchestrator.restart(&tenant(&sandbox)).await;

    assert!(handle.response.success);
    let sync = handle.response.sync_result.clone().unwrap();
    assert!(!sync.success);
    assert_eq!(sync.error_kind(), Some(ReplicationErrorKind::Container));
    assert!(handle.response.message.contains("sync failed"));

    handle.rewake.await.unwrap();
    assert_eq!(sandbox.count_commands("start-service.sh"), 1);
    assert!(sandbox.list_processes().await.is_ok());
}
