mod common;

use std::time::Duration;

use chrono::{TimeDelta, Utc};

use common::Call;
use content_queue::Settings;
use content_queue::db::QueueStore;
use content_queue::error::JobError;
use content_queue::health::{HealthConfig, HealthReport, HealthStatus};

fn check<'a>(report: &'a HealthReport, name: &str) -> &'a content_queue::health::HealthCheck {
    report
        .checks
        .iter()
        .find(|c| c.name == name)
        .unwrap_or_else(|| panic!("missing check {name}"))
}

#[tokio::test]
async fn empty_queue_is_healthy() {
    let h = common::harness();

    let report = h.state.health.report().await;
    assert_eq!(report.overall_status, HealthStatus::Healthy);
    let names: Vec<_> = report.checks.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["storage", "queue_depth", "stuck_processing", "success_rate"]
    );
}

#[tokio::test]
async fn unreachable_storage_is_unhealthy() {
    let h = common::harness();
    h.store.set_available(false);

    let report = h.state.health.report().await;
    assert_eq!(report.overall_status, HealthStatus::Unhealthy);
    assert_eq!(check(&report, "storage").status, HealthStatus::Unhealthy);
}

#[tokio::test]
async fn long_running_entry_is_degraded_but_untouched() {
    let h = common::harness();
    let entry = h.enqueue(common::payload(), 0, 3).await;
    h.store.claim_next("crashed").await.unwrap();
    h.store
        .set_processing_started_at(entry.id, Utc::now() - TimeDelta::hours(1))
        .await;

    let report = h.state.health.report().await;
    assert_eq!(report.overall_status, HealthStatus::Degraded);
    let stuck = check(&report, "stuck_processing");
    assert_eq!(stuck.status, HealthStatus::Degraded);
    assert_eq!(stuck.details["claimed_by"], "crashed");

    // Reporting never changes queue state
    let e = h.entry(entry.id).await;
    assert_eq!(e.status, content_queue::models::QueueStatus::Processing);
}

#[tokio::test]
async fn deep_queue_is_degraded() {
    let h = common::harness_with(Settings {
        health: HealthConfig {
            depth_warning: 2,
            ..HealthConfig::default()
        },
        ..Settings::default()
    });
    for _ in 0..3 {
        h.enqueue(common::payload(), 0, 3).await;
    }

    let report = h.state.health.report().await;
    let depth = check(&report, "queue_depth");
    assert_eq!(depth.status, HealthStatus::Degraded);
    assert_eq!(depth.details["queued"], 3);
}

#[tokio::test]
async fn low_success_rate_is_degraded() {
    let h = common::harness_with(Settings {
        health: HealthConfig {
            min_samples: 2,
            window: Duration::from_secs(3600),
            ..HealthConfig::default()
        },
        ..Settings::default()
    });
    h.services.fail(
        Call::Structure,
        vec![
            JobError::Validation("no outline".into()),
            JobError::Validation("no outline".into()),
        ],
    );
    for _ in 0..3 {
        h.enqueue(common::payload(), 0, 3).await;
    }
    h.orchestrator().process_batch(3).await.unwrap();

    let report = h.state.health.report().await;
    let rate = check(&report, "success_rate");
    assert_eq!(rate.status, HealthStatus::Degraded);
    assert_eq!(report.overall_status, HealthStatus::Degraded);
}

#[tokio::test]
async fn too_few_outcomes_are_not_judged() {
    let h = common::harness();
    h.services
        .fail(Call::Structure, vec![JobError::Validation("no outline".into())]);
    h.enqueue(common::payload(), 0, 3).await;
    h.orchestrator().process_batch(1).await.unwrap();

    let report = h.state.health.report().await;
    assert_eq!(check(&report, "success_rate").status, HealthStatus::Healthy);
}
