//! End-to-end presence scenarios through the runtime and simulation driver.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use plaza_client::{PositionEvent, Runtime, RuntimeError, SessionConfig};
use plaza_core::{
    ChannelState, Environment, PositionError, PositionSample, PresenceConfig, TrackingError,
    UserId,
};
use plaza_harness::{InvariantRegistry, SimDriver, SimEnv, SystemSnapshot};
use plaza_proto::BroadcastKind;
use serde_json::{Value, json};
use tokio::sync::broadcast::error::TryRecvError;

fn connected(config: SessionConfig) -> (Runtime<SimDriver, SimEnv>, SimDriver, SimEnv) {
    let env = SimEnv::new();
    let driver = SimDriver::new();
    let runtime = Runtime::new(driver.clone(), env.clone(), config);
    (runtime, driver, env)
}

async fn open(runtime: &mut Runtime<SimDriver, SimEnv>, driver: &SimDriver, user: &str) {
    runtime.connect(UserId::from(user)).await.unwrap();
    driver.inject_open();
    runtime.process_cycle().await.unwrap();
    assert_eq!(runtime.session().state(), ChannelState::Connected);
}

fn bogota(env: &SimEnv) -> PositionSample {
    PositionSample {
        latitude: 4.7110,
        longitude: -74.0721,
        accuracy: None,
        speed: None,
        heading: None,
        captured_at: env.wall_clock(),
    }
}

fn location_update(user: &str, coordinates: [f64; 2]) -> String {
    json!({
        "type": "location_update",
        "user_id": user,
        "coordinates": coordinates,
        "timestamp": "2024-01-01T00:00:00Z",
    })
    .to_string()
}

fn check(runtime: &Runtime<SimDriver, SimEnv>, context: &str) {
    let snapshot = SystemSnapshot::capture(runtime);
    InvariantRegistry::standard().assert_all(&snapshot, context);
}

#[tokio::test]
async fn nearby_users_batch_populates_presence() {
    let (mut runtime, driver, _env) = connected(SessionConfig::default());
    let presence = runtime.presence();
    open(&mut runtime, &driver, "me").await;

    driver.inject_message(
        r#"{"type":"nearby_users","users":[{"user_id":"a","coordinates":[-74.1,4.7],"timestamp":"2024-01-01T00:00:00Z"}]}"#,
    );
    runtime.process_cycle().await.unwrap();

    let records = presence.borrow().clone();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].user_id, UserId::from("a"));
    assert_eq!(records[0].coordinates, [-74.1, 4.7]);
    check(&runtime, "after nearby_users");
}

#[tokio::test]
async fn repeated_updates_keep_latest_position() {
    let (mut runtime, driver, _env) = connected(SessionConfig::default());
    open(&mut runtime, &driver, "me").await;

    driver.inject_message(location_update("a", [1.0, 1.0]));
    driver.inject_message(location_update("a", [2.0, 2.0]));
    driver.inject_message(location_update("b", [3.0, 3.0]));
    runtime.process_cycle().await.unwrap();

    let records = runtime.session().snapshot();
    assert_eq!(records.len(), 2);
    assert_eq!(runtime.session().presence().get(&UserId::from("a")).unwrap().coordinates, [
        2.0, 2.0
    ]);

    driver.inject_message(r#"{"type":"user_disconnected","user_id":"a"}"#);
    runtime.process_cycle().await.unwrap();
    assert!(!runtime.session().presence().contains(&UserId::from("a")));
    check(&runtime, "after disconnect");
}

#[tokio::test]
async fn malformed_frames_leave_presence_untouched() {
    let (mut runtime, driver, _env) = connected(SessionConfig::default());
    open(&mut runtime, &driver, "me").await;
    driver.inject_message(location_update("a", [1.0, 1.0]));
    runtime.process_cycle().await.unwrap();

    driver.inject_message("not json");
    driver.inject_message(r#"{"type":"location_update","user_id":"b","coordinates":[1.0]}"#);
    driver.inject_message(r#"{"type":"user_disconnected"}"#);
    driver.inject_message(r#"{"type":"mystery"}"#);
    runtime.process_cycle().await.unwrap();

    assert_eq!(runtime.session().snapshot().len(), 1);
    assert_eq!(runtime.session().state(), ChannelState::Connected);
}

#[tokio::test]
async fn own_sample_is_cached_and_sent_when_connected() {
    let (mut runtime, driver, env) = connected(SessionConfig::default());
    let others = runtime.others();
    open(&mut runtime, &driver, "me").await;
    runtime.start_tracking().await.unwrap();
    assert!(driver.is_watching());

    driver.inject_sample(bogota(&env));
    runtime.process_cycle().await.unwrap();

    let own = runtime.session().presence().get(&UserId::from("me")).cloned().unwrap();
    assert_eq!(own.coordinates, [-74.0721, 4.7110]);
    assert_eq!(own.timestamp, "2024-01-01T00:00:00.000Z");
    assert!(runtime.session().others().is_empty());
    assert_eq!(runtime.presence().borrow().len(), 1);
    assert!(others.borrow().is_empty());

    let sent = driver.take_sent();
    assert_eq!(sent.len(), 1);
    insta::assert_snapshot!(
        sent[0],
        @r#"{"type":"location_update","coordinates":[-74.0721,4.711],"timestamp":"2024-01-01T00:00:00.000Z"}"#
    );

    let tracking = runtime.tracking();
    assert!(tracking.borrow().tracking);
    assert_eq!(tracking.borrow().last_fix.as_ref().map(|fix| fix.coordinates), Some([
        -74.0721, 4.7110
    ]));
    check(&runtime, "after own sample");

    driver.inject_message(location_update("a", [1.0, 1.0]));
    runtime.process_cycle().await.unwrap();
    let seen: Vec<_> = others.borrow().iter().map(|record| record.user_id.clone()).collect();
    assert_eq!(seen, vec![UserId::from("a")]);
}

#[tokio::test]
async fn sample_while_offline_updates_locally_only() {
    let (mut runtime, driver, env) = connected(SessionConfig::default());
    runtime.connect(UserId::from("me")).await.unwrap();
    runtime.start_tracking().await.unwrap();

    driver.inject_sample(bogota(&env));
    runtime.process_cycle().await.unwrap();

    assert_eq!(runtime.session().state(), ChannelState::Connecting);
    assert!(runtime.session().presence().contains(&UserId::from("me")));
    assert!(driver.take_sent().is_empty());
}

#[tokio::test]
async fn tracking_without_capability_reports_unavailable() {
    let (mut runtime, driver, _env) = connected(SessionConfig::default());
    driver.disable_positioning();
    let tracking = runtime.tracking();

    let result = runtime.start_tracking().await;

    assert!(matches!(
        result,
        Err(RuntimeError::Tracking(TrackingError::CapabilityUnavailable))
    ));
    assert!(!driver.is_watching());
    assert!(!tracking.borrow().tracking);
    assert_eq!(tracking.borrow().error, Some(TrackingError::CapabilityUnavailable));
}

#[tokio::test]
async fn position_failure_keeps_last_fix() {
    let (mut runtime, driver, env) = connected(SessionConfig::default());
    open(&mut runtime, &driver, "me").await;
    runtime.start_tracking().await.unwrap();

    driver.inject_sample(bogota(&env));
    runtime.process_cycle().await.unwrap();
    driver.inject_position(PositionEvent::Failed(PositionError::Timeout));
    runtime.process_cycle().await.unwrap();

    let status = runtime.session().tracking_status();
    assert!(status.tracking);
    assert_eq!(status.error, Some(TrackingError::Position(PositionError::Timeout)));
    assert!(status.last_fix.is_some());
    assert!(driver.is_watching());
}

#[tokio::test]
async fn repeated_tracking_failures_each_reach_readers() {
    let (mut runtime, driver, _env) = connected(SessionConfig::default());
    open(&mut runtime, &driver, "me").await;
    runtime.start_tracking().await.unwrap();
    let mut errors = runtime.tracking_errors();

    for _ in 0..2 {
        driver.inject_position(PositionEvent::Failed(PositionError::Timeout));
        runtime.process_cycle().await.unwrap();
        assert_eq!(errors.try_recv(), Ok(TrackingError::Position(PositionError::Timeout)));
    }
    assert_eq!(errors.try_recv(), Err(TryRecvError::Empty));

    driver.disable_positioning();
    runtime.stop_tracking().await;
    assert!(runtime.start_tracking().await.is_err());
    assert_eq!(errors.try_recv(), Ok(TrackingError::CapabilityUnavailable));
}

#[tokio::test]
async fn stale_records_evicted_but_self_kept() {
    let config = SessionConfig {
        presence: PresenceConfig { stale_after: Some(Duration::from_secs(30)) },
        ..SessionConfig::default()
    };
    let (mut runtime, driver, env) = connected(config);
    open(&mut runtime, &driver, "me").await;
    runtime.start_tracking().await.unwrap();

    driver.inject_sample(bogota(&env));
    driver.inject_message(location_update("a", [1.0, 1.0]));
    runtime.process_cycle().await.unwrap();
    assert_eq!(runtime.session().snapshot().len(), 2);

    env.advance(Duration::from_secs(20));
    driver.inject_message(location_update("b", [2.0, 2.0]));
    runtime.process_cycle().await.unwrap();
    assert_eq!(runtime.session().snapshot().len(), 3);

    env.advance(Duration::from_secs(11));
    runtime.process_cycle().await.unwrap();

    let remaining: Vec<_> =
        runtime.session().snapshot().into_iter().map(|record| record.user_id).collect();
    assert_eq!(remaining, vec![UserId::from("b"), UserId::from("me")]);
}

#[tokio::test]
async fn broadcasts_reach_subscribers_unmodified() {
    let (mut runtime, driver, _env) = connected(SessionConfig::default());
    let received: Arc<Mutex<Vec<Value>>> = Arc::default();

    let sink = Arc::clone(&received);
    runtime.session_mut().subscribe(BroadcastKind::CollectibleDropped, move |payload| {
        sink.lock().unwrap().push(payload.clone());
    });

    open(&mut runtime, &driver, "me").await;
    let frame = json!({"type": "collectible_dropped", "event_id": "evt-1", "collectible": {"id": 7}});
    driver.inject_message(frame.to_string());
    driver.inject_message(r#"{"type":"collectible_claimed","id":7}"#);
    runtime.process_cycle().await.unwrap();

    assert_eq!(*received.lock().unwrap(), vec![frame]);
    assert!(runtime.session().snapshot().is_empty());
}

#[tokio::test]
async fn joined_events_announced_again_after_reconnect() {
    let config = SessionConfig {
        channel: plaza_core::ChannelConfig {
            reconnect_delay: Duration::from_secs(3),
            ..plaza_core::ChannelConfig::default()
        },
        ..SessionConfig::default()
    };
    let (mut runtime, driver, env) = connected(config);

    // Joining before the channel is up defers the announcement
    runtime.connect(UserId::from("me")).await.unwrap();
    runtime.join_event("evt-1").await.unwrap();
    assert!(driver.take_sent().is_empty());

    driver.inject_open();
    runtime.process_cycle().await.unwrap();
    assert_eq!(driver.take_sent(), vec![r#"{"type":"join_event","event_id":"evt-1"}"#]);

    driver.inject_close("server restart");
    runtime.process_cycle().await.unwrap();
    env.advance(Duration::from_secs(3));
    runtime.process_cycle().await.unwrap();
    driver.inject_open();
    runtime.process_cycle().await.unwrap();

    assert_eq!(driver.take_sent(), vec![r#"{"type":"join_event","event_id":"evt-1"}"#]);

    runtime.leave_event("evt-1").await.unwrap();
    assert_eq!(driver.take_sent(), vec![r#"{"type":"leave_event","event_id":"evt-1"}"#]);
    assert_eq!(runtime.session().joined_events().count(), 0);
}

#[tokio::test]
async fn switching_identity_drops_old_presence() {
    let (mut runtime, driver, _env) = connected(SessionConfig::default());
    open(&mut runtime, &driver, "me").await;
    runtime.join_event("evt-1").await.unwrap();
    driver.inject_message(location_update("a", [1.0, 1.0]));
    runtime.process_cycle().await.unwrap();
    let first = driver.live_generation().unwrap();

    runtime.connect(UserId::from("someone-else")).await.unwrap();

    assert_eq!(driver.closes(), vec![first]);
    assert_eq!(driver.open_count(), 2);
    assert!(runtime.session().snapshot().is_empty());
    assert_eq!(runtime.session().joined_events().count(), 0);
    assert_eq!(runtime.session().identity(), Some(&UserId::from("someone-else")));
    check(&runtime, "after identity switch");
}

#[tokio::test]
async fn snapshot_of_connected_session() {
    let (mut runtime, driver, env) = connected(SessionConfig::default());
    open(&mut runtime, &driver, "me").await;
    runtime.start_tracking().await.unwrap();
    driver.inject_sample(bogota(&env));
    driver.inject_message(location_update("a", [-74.5, 4.5]));
    runtime.process_cycle().await.unwrap();

    let snapshot = SystemSnapshot::capture(&runtime);
    insta::assert_json_snapshot!(snapshot, @r#"
    {
      "self_id": "me",
      "state": "connected",
      "retry_count": 0,
      "max_retries": 5,
      "records": [
        {
          "user_id": "a",
          "coordinates": [
            -74.5,
            4.5
          ],
          "timestamp": "2024-01-01T00:00:00Z",
          "accuracy": null,
          "speed": null,
          "heading": null
        },
        {
          "user_id": "me",
          "coordinates": [
            -74.0721,
            4.711
          ],
          "timestamp": "2024-01-01T00:00:00.000Z",
          "accuracy": null,
          "speed": null,
          "heading": null
        }
      ],
      "others": [
        {
          "user_id": "a",
          "coordinates": [
            -74.5,
            4.5
          ],
          "timestamp": "2024-01-01T00:00:00Z",
          "accuracy": null,
          "speed": null,
          "heading": null
        }
      ],
      "open_transports": 1,
      "tracking": true,
      "watching": true
    }
    "#);
}
