use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

use crate::sync::worker::Target;

/// Something that can run one poll cycle for a generation.
pub trait CycleRunner: Send + Sync + 'static {
    fn run_cycle(&self, generation: u64, targets: &[Target]) -> impl Future<Output = ()> + Send;
}

/// Cadence of one poller.
#[derive(Debug, Clone, Copy)]
pub struct PollSchedule {
    pub every: Duration,
    /// Every Nth cycle fetches all targets; 0 means only the first one does
    pub slow_refresh_every: u32,
}

impl PollSchedule {
    /// Targets for the given cycle number (0-based).
    #[must_use]
    pub fn targets_for(&self, cycle: u64) -> &'static [Target] {
        let slow = self.slow_refresh_every > 0 && cycle % u64::from(self.slow_refresh_every) == 0;
        if cycle == 0 || slow {
            &Target::ALL
        } else {
            &Target::FAST
        }
    }
}

/// Stop handle returned by [`spawn_poller`]. Dropping it also stops the poller.
#[derive(Debug)]
pub struct PollHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
    generation: u64,
}

impl PollHandle {
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancel the timer and whatever cycle is in flight.
    pub fn stop(self) {
        // Drop does the cancelling.
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Start polling for `generation`: one full fan-out immediately, then a
/// cycle every `schedule.every`.
///
/// Cycles never overlap: the next tick is only awaited once the current cycle
/// has been applied, and missed ticks are skipped rather than bunched up.
pub fn spawn_poller<R: CycleRunner>(
    runner: Arc<R>,
    generation: u64,
    schedule: PollSchedule,
) -> PollHandle {
    let token = CancellationToken::new();
    let cancelled = token.clone();

    tracing::info!(
        generation,
        interval_ms = u64::try_from(schedule.every.as_millis()).unwrap_or(u64::MAX),
        slow_refresh_every = schedule.slow_refresh_every,
        "Starting poll scheduler"
    );

    let task = tokio::spawn(async move {
        let mut ticker = interval(schedule.every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut cycle: u64 = 0;

        loop {
            tokio::select! {
                biased;
                () = cancelled.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let targets = schedule.targets_for(cycle);
            tracing::debug!(generation, cycle, targets = targets.len(), "Running poll cycle");

            tokio::select! {
                biased;
                () = cancelled.cancelled() => break,
                () = runner.run_cycle(generation, targets) => {}
            }
            cycle += 1;
        }

        tracing::debug!(generation, cycles = cycle, "Poll scheduler stopped");
    });

    PollHandle {
        token,
        task,
        generation,
    }
}
