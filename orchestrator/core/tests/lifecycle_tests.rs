// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokentime_core::application::{
    ContractRegistry, ContractService, LifecycleSweeper, LifecycleSweeperConfig,
    SideEffectDispatcher, StandardContractService, SweepReport,
};
use tokentime_core::domain::commands::{Actor, Command, CommandEnvelope};
use tokentime_core::domain::contract::{ContractError, ContractParams, ContractState, LocationId};
use tokentime_core::infrastructure::event_bus::EventBus;
use tokentime_core::infrastructure::snapshot_store::InMemorySnapshotStore;
use tokentime_core::infrastructure::transport::RecordingTransport;

fn service() -> Arc<StandardContractService> {
    let side_effects = SideEffectDispatcher::new(
        Arc::new(RecordingTransport::new()),
        Arc::new(InMemorySnapshotStore::new()),
        EventBus::new(64),
    );
    Arc::new(StandardContractService::new(
        Arc::new(ContractRegistry::new()),
        Arc::new(side_effects),
    ))
}

fn member(id: &str, command: Command) -> CommandEnvelope {
    CommandEnvelope::new(Actor::member(id), command)
}

async fn waiting_contract(service: &StandardContractService, location: &LocationId) {
    let params = ContractParams::new("moon", "crew", 3, Duration::from_secs(6 * 3600));
    service.open_contract(location.clone(), params).await.unwrap();
    for id in ["a", "b"] {
        service
            .execute(
                location,
                member(
                    id,
                    Command::Join {
                        participant: id.into(),
                        display_name: None,
                        guest: false,
                    },
                ),
            )
            .await
            .unwrap();
    }
    service.execute(location, member("a", Command::Start)).await.unwrap();
    for id in ["a", "b"] {
        service
            .execute(location, member(id, Command::Boost { participant: id.into() }))
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_sweeper_walks_contract_through_lifecycle() {
    let service = service();
    let location = LocationId::from("room");
    waiting_contract(&service, &location).await;
    assert_eq!(
        service.contract(&location).await.unwrap().state(),
        ContractState::Waiting
    );

    let sweeper = LifecycleSweeper::new(service.clone(), LifecycleSweeperConfig::default());
    let later = Utc::now() + ChronoDuration::days(4);

    let report = sweeper.sweep_at(later).await.unwrap();
    assert_eq!(
        report,
        SweepReport {
            expired: 1,
            ..SweepReport::default()
        }
    );
    assert_eq!(
        service.contract(&location).await.unwrap().state(),
        ContractState::Completed
    );

    let report = sweeper.sweep_at(later).await.unwrap();
    assert_eq!(report.archived, 1);
    let summaries = service.list_contracts().await;
    assert_eq!(summaries[0].state, ContractState::Archived);
    assert!(summaries[0].persisted);

    let report = sweeper.sweep_at(later).await.unwrap();
    assert_eq!(report.purged, 1);
    assert!(service.list_contracts().await.is_empty());
    assert!(matches!(
        service.contract(&location).await,
        Err(ContractError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_sweep_leaves_fresh_contracts_alone() {
    let service = service();
    let location = LocationId::from("room");
    waiting_contract(&service, &location).await;

    let sweeper = LifecycleSweeper::new(service.clone(), LifecycleSweeperConfig::default());
    let report = sweeper.sweep_at(Utc::now()).await.unwrap();
    assert_eq!(report, SweepReport::default());
    assert_eq!(
        service.contract(&location).await.unwrap().state(),
        ContractState::Waiting
    );
}

#[tokio::test]
async fn test_member_cannot_expire_late_join() {
    let service = service();
    let location = LocationId::from("room");
    waiting_contract(&service, &location).await;

    let err = service
        .execute(&location, member("a", Command::ExpireLateJoin))
        .await
        .unwrap_err();
    assert!(matches!(err, ContractError::Unauthorized { .. }));
}
