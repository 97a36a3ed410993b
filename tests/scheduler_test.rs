//! Tests for the poll scheduler and fetch fan-out.
//!
//! Run with: cargo test --test scheduler_test

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{DeviceFixture, FakeSource};
use thermo_dash::sync::scheduler::{CycleRunner, PollSchedule, spawn_poller};
use thermo_dash::sync::worker::{FetchRequest, InFlight, Target, fetch_targets};

#[derive(Default)]
struct Recorder {
    cycles: Mutex<Vec<(u64, Vec<Target>)>>,
}

impl Recorder {
    fn cycles(&self) -> Vec<(u64, Vec<Target>)> {
        self.cycles.lock().unwrap().clone()
    }
}

impl CycleRunner for Recorder {
    async fn run_cycle(&self, generation: u64, targets: &[Target]) {
        self.cycles
            .lock()
            .unwrap()
            .push((generation, targets.to_vec()));
    }
}

fn schedule(every_ms: u64, slow_refresh_every: u32) -> PollSchedule {
    PollSchedule {
        every: Duration::from_millis(every_ms),
        slow_refresh_every,
    }
}

#[test]
fn first_and_every_nth_cycle_fetch_everything() {
    let schedule = schedule(5000, 3);

    assert_eq!(schedule.targets_for(0), Target::ALL);
    assert_eq!(schedule.targets_for(1), Target::FAST);
    assert_eq!(schedule.targets_for(2), Target::FAST);
    assert_eq!(schedule.targets_for(3), Target::ALL);
    assert_eq!(schedule.targets_for(6), Target::ALL);
}

#[test]
fn zero_slow_refresh_only_fetches_everything_once() {
    let schedule = schedule(5000, 0);

    assert_eq!(schedule.targets_for(0), Target::ALL);
    assert!((1..50).all(|cycle| schedule.targets_for(cycle) == Target::FAST));
}

#[test]
fn fast_set_leaves_out_slow_targets() {
    assert!(!Target::FAST.contains(&Target::Sensors));
    assert!(!Target::FAST.contains(&Target::Summary));
    assert_eq!(Target::History.to_string(), "history");
}

#[tokio::test]
async fn poller_fires_immediately_then_on_interval() {
    let recorder = Arc::new(Recorder::default());
    let handle = spawn_poller(Arc::clone(&recorder), 7, schedule(20, 0));
    assert_eq!(handle.generation(), 7);

    tokio::time::sleep(Duration::from_millis(70)).await;
    handle.stop();

    let cycles = recorder.cycles();
    assert!(cycles.len() >= 2, "only {} cycles", cycles.len());
    assert!(cycles.iter().all(|(generation, _)| *generation == 7));
    assert_eq!(cycles[0].1, Target::ALL.to_vec());
    assert_eq!(cycles[1].1, Target::FAST.to_vec());
}

#[tokio::test]
async fn stopped_poller_does_not_fire_again() {
    let recorder = Arc::new(Recorder::default());
    let handle = spawn_poller(Arc::clone(&recorder), 0, schedule(10, 0));

    tokio::time::sleep(Duration::from_millis(25)).await;
    drop(handle);
    tokio::task::yield_now().await;
    let seen = recorder.cycles().len();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(recorder.cycles().len(), seen);
}

#[tokio::test]
async fn fan_out_only_fetches_requested_targets() {
    let source = FakeSource::new().with_device("rig", DeviceFixture::rig());
    let request = FetchRequest {
        device_id: "rig",
        history_limit: 3,
        summary_window_seconds: 600,
    };

    let outcome = fetch_targets(&source, request, &[Target::History, Target::Relays]).await;

    assert!(outcome.latest.is_none());
    assert!(outcome.summary.is_none());
    assert_eq!(outcome.history.unwrap().unwrap().len(), 3);
    assert!(outcome.relays.unwrap().is_ok());
    assert_eq!(source.calls("latest"), 0);
    assert_eq!(source.calls("history"), 1);
}

#[tokio::test]
async fn one_failing_leg_does_not_affect_the_others() {
    let source = FakeSource::new().with_device("rig", DeviceFixture::rig());
    source.fail("summary");
    let request = FetchRequest {
        device_id: "rig",
        history_limit: 500,
        summary_window_seconds: 600,
    };

    let outcome = fetch_targets(&source, request, &Target::ALL).await;

    assert!(outcome.summary.unwrap().is_err());
    assert!(outcome.latest.unwrap().is_ok());
    assert!(outcome.history.unwrap().is_ok());
    assert!(outcome.sensors.unwrap().is_ok());
    assert!(outcome.control.unwrap().is_ok());
    assert!(outcome.relays.unwrap().is_ok());
}

#[test]
fn in_flight_claims_are_released_on_drop() {
    let in_flight = InFlight::default();

    let first = in_flight.acquire(1, &[Target::History, Target::Latest]);
    assert_eq!(first.targets(), [Target::History, Target::Latest]);

    let second = in_flight.acquire(1, &[Target::History, Target::Relays]);
    assert_eq!(second.targets(), [Target::Relays]);

    // Another generation is independent
    let other = in_flight.acquire(2, &[Target::History]);
    assert_eq!(other.targets(), [Target::History]);

    drop(first);
    assert!(!in_flight.is_active(1, Target::History));
    assert!(in_flight.is_active(1, Target::Relays));
    drop(second);
    drop(other);
    assert!(!in_flight.is_active(2, Target::History));
}
