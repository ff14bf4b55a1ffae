//! Role resolution at the orchestrator: precedence, dual-role isolation,
//! explicit role change, missing roles and sign-out.

use serde_json::json;
use session_resolver::Role;

use super::harness::{
    collector_profile, dual_profile, reading, seed_remote, viewer_profile, TestHarness, STANDING,
};
use crate::{PipelineState, RecordOutcome, SyncError, SyncEvent};

fn pipeline_changes(
    rx: &mut tokio::sync::broadcast::Receiver<SyncEvent>,
) -> Vec<(PipelineState, PipelineState)> {
    let mut changes = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let SyncEvent::PipelineChanged { from, to } = event {
            changes.push((from, to));
        }
    }
    changes
}

#[tokio::test]
async fn dual_role_runs_only_the_collector_pipeline() {
    let h = TestHarness::new("d1", dual_profile(), true).await;
    h.assign("s1", "d1").await;
    seed_remote(&h.remote, "c9", &[reading("c9", "s1", 1, STANDING)]).await;
    let mut rx = h.orchestrator.subscribe_events();

    assert_eq!(h.orchestrator.bootstrap().await.unwrap(), PipelineState::Collector);
    assert_eq!(h.remote.subscribe_calls(), 0);
    assert!(h.orchestrator.active_mirrors().is_empty());
    assert_eq!(h.local_count("s1").await, 0);
    assert_eq!(
        pipeline_changes(&mut rx),
        vec![
            (PipelineState::Uninitialized, PipelineState::SessionLoading),
            (PipelineState::SessionLoading, PipelineState::Collector),
        ]
    );
}

#[tokio::test]
async fn explicit_viewer_choice_survives_reload() {
    let h = TestHarness::new("d1", dual_profile(), true).await;
    h.orchestrator.bootstrap().await.unwrap();

    h.orchestrator.select_role(Role::Viewer).await.unwrap();
    assert_eq!(h.orchestrator.pipeline_state(), PipelineState::Viewer);

    let state = h.orchestrator.session().reload_session().await.unwrap();
    assert_eq!(state.selected_role, Some(Role::Viewer));
    assert_eq!(h.orchestrator.bootstrap().await.unwrap(), PipelineState::Viewer);
}

#[tokio::test]
async fn unset_choice_defaults_to_first_role() {
    let h = TestHarness::new("d1", json!({ "roles": ["viewer", "collector"] }), true).await;
    assert_eq!(h.orchestrator.bootstrap().await.unwrap(), PipelineState::Viewer);

    let h = TestHarness::new("d2", dual_profile(), true).await;
    assert_eq!(h.orchestrator.bootstrap().await.unwrap(), PipelineState::Collector);
}

#[tokio::test]
async fn switching_to_viewer_stops_collector_work() {
    let h = TestHarness::new("d1", dual_profile(), true).await;
    h.assign("s1", "d1").await;
    seed_remote(&h.remote, "c9", &[reading("c9", "s1", 1, STANDING)]).await;
    h.orchestrator.bootstrap().await.unwrap();

    h.go_offline().await;
    h.orchestrator
        .record_reading(reading("d1", "own", 1, STANDING))
        .await
        .unwrap();
    assert_eq!(h.orchestrator.queue_status().await.pending, 1);

    h.connectivity.set_online(true);
    h.orchestrator.select_role(Role::Viewer).await.unwrap();
    assert_eq!(h.orchestrator.pipeline_state(), PipelineState::Viewer);
    assert_eq!(h.orchestrator.queue_status().await.pending, 0);
    assert_eq!(h.orchestrator.active_mirrors(), vec!["s1"]);
    assert_eq!(h.local_count("s1").await, 1);
    // The identity's own rows survive the switch.
    assert_eq!(h.local_count("d1").await, 1);

    // And back: mirrors stop, viewer rows are cleared.
    h.orchestrator.select_role(Role::Collector).await.unwrap();
    assert!(h.orchestrator.active_mirrors().is_empty());
    assert_eq!(h.local_count("s1").await, 0);
    assert_eq!(h.local_count("d1").await, 1);
}

#[tokio::test]
async fn selecting_a_role_not_held_is_rejected() {
    let h = TestHarness::new("v1", viewer_profile(), true).await;
    h.orchestrator.bootstrap().await.unwrap();

    let err = h.orchestrator.select_role(Role::Collector).await.unwrap_err();
    assert!(matches!(err, SyncError::RoleNotHeld(_)));
    assert_eq!(h.orchestrator.pipeline_state(), PipelineState::Viewer);
}

#[tokio::test]
async fn unknown_roles_disable_every_pipeline() {
    let h = TestHarness::new("x1", json!({ "roles": ["admin"] }), true).await;

    assert_eq!(h.orchestrator.bootstrap().await.unwrap(), PipelineState::Idle);
    assert_eq!(h.remote.subscribe_calls(), 0);
    assert_eq!(h.remote.query_calls(), 0);

    let outcome = h
        .orchestrator
        .record_reading(reading("x1", "s1", 1, STANDING))
        .await
        .unwrap();
    assert_eq!(outcome, RecordOutcome::LocalOnly);
    assert!(matches!(
        h.orchestrator.perform_full_sync().await,
        Err(SyncError::NoActiveRole)
    ));
}

#[tokio::test]
async fn missing_profile_leaves_pipeline_uninitialized() {
    let h = TestHarness::new("c1", collector_profile(), true).await;
    h.profiles.remove("c1").await;

    let err = h.orchestrator.bootstrap().await.unwrap_err();
    assert!(matches!(err, SyncError::Session(_)));
    assert_eq!(h.orchestrator.pipeline_state(), PipelineState::Uninitialized);
}

#[tokio::test]
async fn sign_out_resets_everything() {
    let h = TestHarness::new("c1", collector_profile(), true).await;
    h.orchestrator.bootstrap().await.unwrap();
    h.go_offline().await;
    h.orchestrator
        .record_reading(reading("c1", "s1", 1, STANDING))
        .await
        .unwrap();

    h.orchestrator.sign_out().await.unwrap();
    assert_eq!(h.orchestrator.pipeline_state(), PipelineState::Uninitialized);
    assert_eq!(h.orchestrator.queue_status().await.pending, 0);
    assert_eq!(h.local.count_all().await.unwrap(), 0);
    assert!(!h.orchestrator.session().is_loaded().await);

    // A fresh bootstrap works after signing back in.
    h.identity.sign_out();
    h.identity.sign_in("c1");
    h.connectivity.set_online(true);
    assert_eq!(h.orchestrator.bootstrap().await.unwrap(), PipelineState::Collector);
}
