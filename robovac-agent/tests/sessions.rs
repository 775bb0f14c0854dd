//! Registry setup and device sessions against the simulated vacuum.

use std::collections::HashMap;
use std::time::Duration;

use robovac_agent::activity::ActivityState;
use robovac_agent::cloud::DeviceCredential;
use robovac_agent::config::SessionConfig;
use robovac_agent::discovery::DiscoveryRecord;
use robovac_agent::dps::{keys, CommandCode, DpsValue, StatusCode};
use robovac_agent::{DeviceRegistry, Intent, RobovacError};
use robovac_devkit::{fixtures, packets, SimConnector, SimulatedVacuum};

const KEY: &str = "0123456789abcdef";

fn session_config() -> SessionConfig {
    SessionConfig {
        poll_interval_secs: 30,
        unavailable_after: 2,
        ..Default::default()
    }
}

fn credentials(ids: &[&str]) -> HashMap<String, DeviceCredential> {
    ids.iter()
        .map(|id| {
            (
                id.to_string(),
                DeviceCredential {
                    device_id: id.to_string(),
                    local_key: KEY.to_string(),
                    home_id: "home".to_string(),
                },
            )
        })
        .collect()
}

fn discovered(ids: &[&str]) -> HashMap<String, DiscoveryRecord> {
    ids.iter()
        .enumerate()
        .map(|(n, id)| {
            let fields = packets::announcement(id, &format!("192.168.1.{}", 40 + n));
            let fields = fields.as_object().cloned().unwrap();
            (id.to_string(), DiscoveryRecord::from_fields(fields, None).unwrap())
        })
        .collect()
}

async fn single_device(sim: &SimulatedVacuum) -> DeviceRegistry {
    let connector = SimConnector::new().with_device("vac", sim.clone());
    DeviceRegistry::setup(
        &connector,
        &credentials(&["vac"]),
        &discovered(&["vac"]),
        &session_config(),
    )
    .await
}

#[tokio::test(start_paused = true)]
async fn test_setup_needs_both_key_and_announcement() {
    let connector = SimConnector::new()
        .with_device("a", SimulatedVacuum::new(fixtures::docked()))
        .with_device("b", SimulatedVacuum::new(fixtures::docked()))
        .with_device("c", SimulatedVacuum::new(fixtures::docked()));

    let registry = DeviceRegistry::setup(
        &connector,
        &credentials(&["a", "b"]),
        &discovered(&["a", "c"]),
        &session_config(),
    )
    .await;

    assert_eq!(registry.device_ids().collect::<Vec<_>>(), vec!["a"]);

    let endpoints = connector.connected();
    assert_eq!(endpoints.len(), 1);
    assert_eq!(endpoints[0].local_key, KEY);
    assert_eq!(endpoints[0].ip_address, "192.168.1.40");
}

#[tokio::test(start_paused = true)]
async fn test_connect_failure_skips_device() {
    let registry = DeviceRegistry::setup(
        &SimConnector::new(),
        &credentials(&["ghost"]),
        &discovered(&["ghost"]),
        &session_config(),
    )
    .await;
    assert!(registry.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_first_refresh_populates_before_first_poll() {
    let sim = SimulatedVacuum::new(fixtures::docked());
    let registry = single_device(&sim).await;
    let handle = registry.get("vac").unwrap();

    assert_eq!(sim.reads(), 1);
    let view = handle.view();
    assert!(view.available);
    assert_eq!(view.activity, ActivityState::Docked);
    assert_eq!(view.battery, Some(100));
    assert_eq!(view.telemetry.total_count, Some(100));
    assert_eq!(view.telemetry.total_area, Some(300));
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_device_is_registered_anyway() {
    let sim = SimulatedVacuum::new(fixtures::docked());
    sim.set_fail_reads(true);
    let registry = single_device(&sim).await;
    let handle = registry.get("vac").unwrap();

    assert!(handle.latest().is_none());
    assert!(!handle.view().available);

    sim.set_fail_reads(false);
    handle.refresh().await.unwrap();
    assert_eq!(handle.view().activity, ActivityState::Docked);
}

#[tokio::test(start_paused = true)]
async fn test_status_only_snapshot() {
    let sim = SimulatedVacuum::new(
        [(keys::STATUS, DpsValue::from(StatusCode::Cleaning.encoded()))]
            .into_iter()
            .collect(),
    );
    let registry = single_device(&sim).await;

    let view = registry.get("vac").unwrap().view();
    assert_eq!(view.activity, ActivityState::Cleaning);
    assert_eq!(view.battery, None);
}

#[tokio::test(start_paused = true)]
async fn test_start_then_pause_then_resume() {
    let sim = SimulatedVacuum::new(fixtures::docked());
    let registry = single_device(&sim).await;
    let handle = registry.get("vac").unwrap();

    let started = handle.command(Intent::Start).await.unwrap();
    assert_eq!(started.writes, 3);
    assert_eq!(started.activity, Some(ActivityState::Cleaning));
    assert_eq!(started.verified, Some(true));
    assert_eq!(handle.view().activity, ActivityState::Cleaning);

    let paused = handle.command(Intent::Pause).await.unwrap();
    assert_eq!(paused.activity, Some(ActivityState::Paused));

    let resumed = handle.command(Intent::Resume).await.unwrap();
    assert_eq!(resumed.intent, "resume");
    assert_eq!(resumed.writes, 1);
    assert_eq!(resumed.activity, Some(ActivityState::Cleaning));

    assert_eq!(
        sim.command_writes(),
        vec![
            CommandCode::Start.encoded(),
            CommandCode::Cleaning.encoded(),
            CommandCode::Pause.encoded(),
            CommandCode::Cleaning.encoded(),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_resume_without_pause_is_a_start() {
    let sim = SimulatedVacuum::new(fixtures::docked());
    let registry = single_device(&sim).await;

    let outcome = registry
        .get("vac")
        .unwrap()
        .command(Intent::Resume)
        .await
        .unwrap();
    assert_eq!(outcome.intent, "start");
    assert_eq!(sim.command_writes().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_start_that_does_not_take_still_succeeds() {
    let sim = SimulatedVacuum::new(fixtures::docked());
    sim.set_ignore_start(true);
    let registry = single_device(&sim).await;

    let outcome = registry
        .get("vac")
        .unwrap()
        .command(Intent::Start)
        .await
        .unwrap();
    assert_eq!(outcome.verified, Some(false));
    assert_eq!(outcome.activity, Some(ActivityState::Docked));
}

#[tokio::test(start_paused = true)]
async fn test_write_failure_mid_start_is_partial() {
    let sim = SimulatedVacuum::new(fixtures::docked());
    let registry = single_device(&sim).await;
    sim.fail_write_at(2);

    let error = registry
        .get("vac")
        .unwrap()
        .command(Intent::Start)
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        RobovacError::PartialSequence { step: 2, total: 3, .. }
    ));
    assert_eq!(sim.command_writes(), vec![CommandCode::Start.encoded()]);
}

#[tokio::test(start_paused = true)]
async fn test_first_write_failure_is_transport_error() {
    let sim = SimulatedVacuum::new(fixtures::cleaning());
    let registry = single_device(&sim).await;
    sim.fail_write_at(1);

    let error = registry
        .get("vac")
        .unwrap()
        .command(Intent::ReturnHome)
        .await
        .unwrap_err();
    assert!(matches!(error, RobovacError::Transport(_)));
    assert!(sim.writes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_fan_speed_validation() {
    let sim = SimulatedVacuum::new(fixtures::docked());
    let registry = single_device(&sim).await;
    let handle = registry.get("vac").unwrap();

    let error = handle
        .command(Intent::SetFanSpeed("Hurricane".into()))
        .await
        .unwrap_err();
    assert!(matches!(error, RobovacError::UnrecognizedInput { .. }));
    assert!(sim.writes().is_empty());

    handle
        .command(Intent::SetFanSpeed("turbo".into()))
        .await
        .unwrap();
    let writes = sim.writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0][keys::FAN_SPEED], DpsValue::from("strong"));
    assert_eq!(writes[0][keys::FAN_SPEED_COMPANION], DpsValue::from("Turbo"));
}

#[tokio::test(start_paused = true)]
async fn test_device_goes_unavailable_and_comes_back() {
    let sim = SimulatedVacuum::new(fixtures::docked());
    let registry = single_device(&sim).await;
    let handle = registry.get("vac").unwrap();
    let mut updates = handle.subscribe();

    sim.set_fail_reads(true);

    // One missed poll is tolerated.
    tokio::time::sleep(Duration::from_secs(31)).await;
    assert!(handle.latest().is_some());

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(handle.latest().is_none());
    assert!(!handle.view().available);
    assert!(updates.has_changed().unwrap());
    assert!(updates.borrow_and_update().is_none());

    sim.set_fail_reads(false);
    sim.set(keys::STATUS, StatusCode::Returning.encoded());
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(handle.view().activity, ActivityState::Returning);
}

#[tokio::test(start_paused = true)]
async fn test_polls_follow_device_state() {
    let sim = SimulatedVacuum::new(fixtures::docked());
    let registry = single_device(&sim).await;
    let handle = registry.get("vac").unwrap();

    sim.set_state(fixtures::legacy_error());
    tokio::time::sleep(Duration::from_secs(31)).await;

    let view = handle.view();
    assert_eq!(view.activity, ActivityState::Error);
    assert_eq!(view.error_code.as_deref(), Some("103"));
    assert_eq!(sim.reads(), 2);
}
