//! Reconnection behavior of the runtime under virtual time.
//!
//! Transport opens are counted at the driver, so these tests observe exactly
//! how many connection attempts the runtime makes.

use std::time::Duration;

use plaza_client::{Runtime, SessionConfig};
use plaza_core::{ChannelConfig, ChannelState, UserId};
use plaza_harness::{ConnectMode, InvariantRegistry, SimDriver, SimEnv, SystemSnapshot};

const DELAY: Duration = Duration::from_secs(3);

fn runtime(driver: &SimDriver, env: &SimEnv, max_retries: u32) -> Runtime<SimDriver, SimEnv> {
    let config = SessionConfig {
        channel: ChannelConfig { reconnect_delay: DELAY, max_retries, ..ChannelConfig::default() },
        ..SessionConfig::default()
    };
    Runtime::new(driver.clone(), env.clone(), config)
}

fn check(runtime: &Runtime<SimDriver, SimEnv>, context: &str) {
    let snapshot = SystemSnapshot::capture(runtime);
    InvariantRegistry::standard().assert_all(&snapshot, context);
}

#[tokio::test]
async fn five_closes_without_open_reach_failed() {
    let env = SimEnv::new();
    let driver = SimDriver::with_mode(ConnectMode::Refuse);
    let mut runtime = runtime(&driver, &env, 4);
    let state = runtime.connection_state();

    runtime.connect(UserId::from("u1")).await.unwrap();
    assert_eq!(*state.borrow(), ChannelState::Connecting);

    let mut seen = vec![];
    for _ in 0..10 {
        runtime.process_cycle().await.unwrap();
        seen.push(runtime.session().state());
        check(&runtime, "during retries");
        env.advance(DELAY);
    }

    assert_eq!(*state.borrow(), ChannelState::Failed);
    assert_eq!(driver.open_count(), 5);
    assert!(seen.contains(&ChannelState::Reconnecting));

    // No further automatic attempts, however long we wait
    env.advance(Duration::from_secs(600));
    runtime.process_cycle().await.unwrap();
    assert_eq!(driver.open_count(), 5);
}

#[tokio::test]
async fn default_budget_allows_initial_plus_five_retries() {
    let env = SimEnv::new();
    let driver = SimDriver::with_mode(ConnectMode::Refuse);
    let mut runtime = Runtime::new(driver.clone(), env.clone(), SessionConfig::default());

    runtime.connect(UserId::from("u1")).await.unwrap();
    for _ in 0..20 {
        runtime.process_cycle().await.unwrap();
        env.advance(Duration::from_secs(3));
    }

    assert_eq!(runtime.session().state(), ChannelState::Failed);
    assert_eq!(driver.open_count(), 6);
}

#[tokio::test]
async fn reconnect_waits_for_fixed_delay() {
    let env = SimEnv::new();
    let driver = SimDriver::new();
    let mut runtime = runtime(&driver, &env, 5);

    runtime.connect(UserId::from("u1")).await.unwrap();
    driver.inject_open();
    runtime.process_cycle().await.unwrap();
    assert_eq!(runtime.session().state(), ChannelState::Connected);

    driver.inject_close("server restart");
    runtime.process_cycle().await.unwrap();
    assert_eq!(runtime.session().state(), ChannelState::Reconnecting);

    env.advance(DELAY - Duration::from_millis(1));
    runtime.process_cycle().await.unwrap();
    assert_eq!(driver.open_count(), 1);

    env.advance(Duration::from_millis(1));
    runtime.process_cycle().await.unwrap();
    assert_eq!(driver.open_count(), 2);
    assert_eq!(runtime.session().state(), ChannelState::Connecting);

    // A successful open resets the budget
    driver.inject_open();
    runtime.process_cycle().await.unwrap();
    assert_eq!(runtime.session().channel().retry_count(), 0);
    check(&runtime, "after reconnect");
}

#[tokio::test]
async fn teardown_while_reconnecting_cancels_timer() {
    let env = SimEnv::new();
    let driver = SimDriver::new();
    let mut runtime = runtime(&driver, &env, 5);

    runtime.connect(UserId::from("u1")).await.unwrap();
    driver.inject_close("refused");
    runtime.process_cycle().await.unwrap();
    assert_eq!(runtime.session().state(), ChannelState::Reconnecting);

    runtime.shutdown().await;
    assert_eq!(runtime.session().state(), ChannelState::Disconnected);

    env.advance(Duration::from_secs(60));
    runtime.process_cycle().await.unwrap();
    assert_eq!(driver.open_count(), 1);
    check(&runtime, "after teardown");
}

#[tokio::test]
async fn events_from_stale_transport_are_ignored() {
    let env = SimEnv::new();
    let driver = SimDriver::new();
    let mut runtime = runtime(&driver, &env, 5);

    runtime.connect(UserId::from("u1")).await.unwrap();
    let (old_generation, _) = driver.opens()[0].clone();

    driver.inject_close("dropped");
    runtime.process_cycle().await.unwrap();
    env.advance(DELAY);
    runtime.process_cycle().await.unwrap();
    assert_eq!(driver.open_count(), 2);

    // The first socket reporting open late must not move the new attempt
    driver.inject_transport(old_generation, plaza_client::TransportEvent::Opened);
    runtime.process_cycle().await.unwrap();
    assert_eq!(runtime.session().state(), ChannelState::Connecting);

    driver.inject_open();
    runtime.process_cycle().await.unwrap();
    assert_eq!(runtime.session().state(), ChannelState::Connected);
}

#[tokio::test]
async fn explicit_connect_after_failed_starts_over() {
    let env = SimEnv::new();
    let driver = SimDriver::with_mode(ConnectMode::Refuse);
    let mut runtime = runtime(&driver, &env, 1);

    runtime.connect(UserId::from("u1")).await.unwrap();
    for _ in 0..4 {
        runtime.process_cycle().await.unwrap();
        env.advance(DELAY);
    }
    assert_eq!(runtime.session().state(), ChannelState::Failed);
    assert_eq!(driver.open_count(), 2);

    driver.set_mode(ConnectMode::Accept);
    runtime.connect(UserId::from("u1")).await.unwrap();
    runtime.process_cycle().await.unwrap();

    assert_eq!(runtime.session().state(), ChannelState::Connected);
    assert_eq!(driver.open_count(), 3);
}

#[tokio::test]
async fn run_stops_and_tears_down_on_signal() {
    let env = SimEnv::new();
    let driver = SimDriver::with_mode(ConnectMode::Accept);
    let mut runtime = runtime(&driver, &env, 5);
    let state = runtime.connection_state();

    runtime.connect(UserId::from("u1")).await.unwrap();
    let (stop_tx, stop_rx) = tokio::sync::watch::channel(true);

    // Stop already requested: run performs only the shutdown
    runtime.run(stop_rx).await.unwrap();
    drop(stop_tx);

    assert_eq!(*state.borrow(), ChannelState::Disconnected);
    assert_eq!(driver.closes().len(), 1);
    assert_eq!(driver.open_transports(), 0);
}
