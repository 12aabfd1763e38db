use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::storage::SubscriptionStore;

use super::clock::{Clock, SystemClock};
use super::schedule::{hours_until, ResetSchedule};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerPhase {
    #[default]
    Stopped,
    Armed,
    Firing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FireTrigger {
    Timer,
    Manual,
}

/// Record of the most recent bulk reset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetRun {
    pub trigger: FireTrigger,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub succeeded: bool,
    pub reset_count: Option<u64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub enabled: bool,
    pub active: bool,
    pub phase: SchedulerPhase,
    pub reset_day: u32,
    pub reset_hour: u32,
    pub next_reset_at: Option<DateTime<Utc>>,
    pub hours_until_reset: Option<i64>,
    pub last_run: Option<ResetRun>,
}

#[derive(Default)]
struct SchedulerState {
    phase: SchedulerPhase,
    next_reset_at: Option<DateTime<Utc>>,
    timer: Option<JoinHandle<()>>,
    // Bumped on every arm and stop; a timer task whose generation no longer
    // matches has been superseded and must not fire.
    generation: u64,
    last_run: Option<ResetRun>,
}

struct SchedulerInner {
    store: Arc<dyn SubscriptionStore>,
    clock: Arc<dyn Clock>,
    schedule: ResetSchedule,
    state: Mutex<SchedulerState>,
    firing: tokio::sync::Mutex<()>,
}

/// Self-rearming monthly usage reset.
///
/// Lifecycle: `Stopped -> Armed -> Firing -> Armed -> ...`, with `stop()`
/// returning to `Stopped` from any phase. Every firing, successful or not,
/// re-arms from the clock reading taken after the reset completes, never
/// from the previous target.
#[derive(Clone)]
pub struct ResetScheduler {
    inner: Arc<SchedulerInner>,
}

impl ResetScheduler {
    pub fn new(store: Arc<dyn SubscriptionStore>, schedule: ResetSchedule) -> Self {
        Self::with_clock(store, schedule, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn SubscriptionStore>,
        schedule: ResetSchedule,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                store,
                clock,
                schedule,
                state: Mutex::new(SchedulerState::default()),
                firing: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Arms the timer. Returns `false` when disabled or already running.
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> bool {
        if !self.inner.schedule.enabled() {
            debug!("usage reset scheduler disabled by configuration");
            return false;
        }

        let mut state = self.inner.lock_state();
        if state.phase != SchedulerPhase::Stopped {
            debug!(phase = ?state.phase, "usage reset scheduler already running");
            return false;
        }
        self.inner.arm(&mut state)
    }

    /// Cancels the pending timer. Waits for an in-flight reset to finish;
    /// that reset will not re-arm, so nothing fires after this returns.
    pub async fn stop(&self) {
        let was_running = {
            let mut state = self.inner.lock_state();
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
            let was_running = state.phase != SchedulerPhase::Stopped;
            state.phase = SchedulerPhase::Stopped;
            state.next_reset_at = None;
            state.generation = state.generation.wrapping_add(1);
            was_running
        };

        let _in_flight = self.inner.firing.lock().await;
        if was_running {
            info!("usage reset scheduler stopped");
        }
    }

    pub fn status(&self) -> SchedulerStatus {
        let now = self.inner.clock.now();
        let state = self.inner.lock_state();
        SchedulerStatus {
            enabled: self.inner.schedule.enabled(),
            active: state.phase != SchedulerPhase::Stopped,
            phase: state.phase,
            reset_day: self.inner.schedule.reset_day(),
            reset_hour: self.inner.schedule.reset_hour(),
            next_reset_at: state.next_reset_at,
            hours_until_reset: state.next_reset_at.map(|next| hours_until(next, now)),
            last_run: state.last_run.clone(),
        }
    }

    /// Runs the bulk reset immediately. A running scheduler drops its pending
    /// timer and re-arms from now; a stopped one stays stopped.
    pub async fn fire_now(&self) -> ResetRun {
        let _firing = self.inner.firing.lock().await;
        let rearm = {
            let mut state = self.inner.lock_state();
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
            let rearm = state.phase == SchedulerPhase::Armed;
            state.generation = state.generation.wrapping_add(1);
            state.phase = SchedulerPhase::Firing;
            state.next_reset_at = None;
            rearm
        };
        self.inner.execute(FireTrigger::Manual, rearm)
    }
}

impl SchedulerInner {
    fn lock_state(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn arm(self: &Arc<Self>, state: &mut SchedulerState) -> bool {
        let now = self.clock.now();
        let next = match self.schedule.next_reset_after(now) {
            Ok(next) => next,
            Err(err) => {
                error!(error = %err, "unable to compute next usage reset; scheduler stopped");
                state.phase = SchedulerPhase::Stopped;
                state.next_reset_at = None;
                return false;
            }
        };
        self.spawn_timer(state, next, now);
        info!(next_reset_at = %next, "usage reset armed");
        true
    }

    /// Sleeps until `target` on the runtime clock, then hands over to
    /// `on_timer`, which checks the target against the wall clock.
    fn spawn_timer(
        self: &Arc<Self>,
        state: &mut SchedulerState,
        target: DateTime<Utc>,
        now: DateTime<Utc>,
    ) {
        let delay = (target - now).to_std().unwrap_or(Duration::ZERO);

        state.generation = state.generation.wrapping_add(1);
        let generation = state.generation;
        let inner = Arc::clone(self);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.on_timer(generation).await;
        });
        if let Some(previous) = state.timer.replace(timer) {
            previous.abort();
        }

        state.phase = SchedulerPhase::Armed;
        state.next_reset_at = Some(target);
        debug!(
            next_reset_at = %target,
            delay_secs = delay.as_secs(),
            "usage reset timer scheduled"
        );
    }

    async fn on_timer(self: Arc<Self>, generation: u64) {
        let _firing = self.firing.lock().await;
        {
            let mut state = self.lock_state();
            if state.phase != SchedulerPhase::Armed || state.generation != generation {
                debug!(generation, "superseded usage reset timer ignored");
                return;
            }
            // This task is the timer; detach its handle instead of aborting.
            state.timer = None;

            // The sleep runs on the monotonic clock; the target is wall time.
            let now = self.clock.now();
            if let Some(target) = state.next_reset_at {
                if now < target {
                    debug!(next_reset_at = %target, now = %now, "usage reset timer woke early");
                    self.spawn_timer(&mut state, target, now);
                    return;
                }
            }

            state.phase = SchedulerPhase::Firing;
            state.next_reset_at = None;
        }
        self.execute(FireTrigger::Timer, true);
    }

    /// Performs the bulk reset and then the single re-arm step. Holds no
    /// await point, so a firing cannot be abandoned halfway.
    fn execute(self: &Arc<Self>, trigger: FireTrigger, rearm: bool) -> ResetRun {
        let started_at = self.clock.now();
        let result = self.store.reset_all_usage();
        let completed_at = self.clock.now();

        let run = match result {
            Ok(outcome) => {
                info!(
                    trigger = ?trigger,
                    reset_count = outcome.count,
                    "reset monthly shipment usage"
                );
                ResetRun {
                    trigger,
                    started_at,
                    completed_at,
                    succeeded: true,
                    reset_count: Some(outcome.count),
                    error: None,
                }
            }
            Err(err) => {
                error!(
                    trigger = ?trigger,
                    error = %err,
                    "bulk usage reset failed; run fire_now to retry before the next period"
                );
                ResetRun {
                    trigger,
                    started_at,
                    completed_at,
                    succeeded: false,
                    reset_count: None,
                    error: Some(err.to_string()),
                }
            }
        };

        let mut state = self.lock_state();
        state.last_run = Some(run.clone());
        if state.phase == SchedulerPhase::Firing {
            if rearm {
                self.arm(&mut state);
            } else {
                state.phase = SchedulerPhase::Stopped;
            }
        } else {
            warn!(phase = ?state.phase, "scheduler stopped during reset; not re-arming");
        }
        run
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::{Duration as ChronoDuration, TimeZone};

    use super::*;
    use crate::scheduler::ManualClock;
    use crate::storage::{ResetOutcome, StorageError};
    use crate::subscription::Subscription;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    /// Store whose reset can fail, take time, or move the clock forward.
    struct ScriptedStore {
        clock: Arc<ManualClock>,
        advance_on_reset: ChronoDuration,
        hold: Duration,
        fail: bool,
        resets: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl ScriptedStore {
        fn new(clock: Arc<ManualClock>) -> Self {
            Self {
                clock,
                advance_on_reset: ChronoDuration::zero(),
                hold: Duration::ZERO,
                fail: false,
                resets: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }

        fn resets(&self) -> usize {
            self.resets.load(Ordering::SeqCst)
        }
    }

    impl SubscriptionStore for ScriptedStore {
        fn get_active_subscription(
            &self,
            _subscriber_id: &str,
        ) -> Result<Option<Subscription>, StorageError> {
            Ok(None)
        }

        fn increment_usage(&self, _subscription_id: &str) -> Result<(), StorageError> {
            Ok(())
        }

        fn increment_usage_within_limit(
            &self,
            _subscription_id: &str,
        ) -> Result<bool, StorageError> {
            Ok(true)
        }

        fn reset_all_usage(&self) -> Result<ResetOutcome, StorageError> {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(current, Ordering::SeqCst);
            if !self.hold.is_zero() {
                std::thread::sleep(self.hold);
            }
            self.clock.advance(self.advance_on_reset);
            self.resets.fetch_add(1, Ordering::SeqCst);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fail {
                return Err(StorageError::DatabaseError(rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_IOERR),
                    Some("disk I/O error".into()),
                )));
            }
            Ok(ResetOutcome {
                count: 3,
                reset_at: self.clock.now(),
            })
        }
    }

    fn scheduler(
        store: Arc<ScriptedStore>,
        clock: Arc<ManualClock>,
        enabled: bool,
        day: u32,
        hour: u32,
    ) -> ResetScheduler {
        let schedule = ResetSchedule::new(enabled, day, hour).unwrap();
        ResetScheduler::with_clock(store, schedule, clock)
    }

    #[tokio::test]
    async fn test_start_is_noop_when_disabled() {
        let clock = Arc::new(ManualClock::new(at(2024, 3, 10, 12)));
        let store = Arc::new(ScriptedStore::new(clock.clone()));
        let scheduler = scheduler(store, clock, false, 1, 0);

        assert!(!scheduler.start());
        let status = scheduler.status();
        assert!(!status.enabled);
        assert!(!status.active);
        assert_eq!(status.next_reset_at, None);
    }

    #[tokio::test]
    async fn test_start_arms_once() {
        let clock = Arc::new(ManualClock::new(at(2024, 3, 10, 12)));
        let store = Arc::new(ScriptedStore::new(clock.clone()));
        let scheduler = scheduler(store, clock, true, 15, 0);

        assert!(scheduler.start());
        assert!(!scheduler.start());

        let status = scheduler.status();
        assert!(status.active);
        assert_eq!(status.phase, SchedulerPhase::Armed);
        assert_eq!(status.next_reset_at, Some(at(2024, 3, 15, 0)));
        assert_eq!(status.hours_until_reset, Some(4 * 24 + 12));

        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_stop_cancels_pending_timer() {
        let clock = Arc::new(ManualClock::new(
            at(2024, 2, 1, 0) - ChronoDuration::milliseconds(100),
        ));
        let store = Arc::new(ScriptedStore::new(clock.clone()));
        let scheduler = scheduler(store.clone(), clock, true, 1, 0);

        assert!(scheduler.start());
        scheduler.stop().await;
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(store.resets(), 0);
        let status = scheduler.status();
        assert!(!status.active);
        assert_eq!(status.next_reset_at, None);
    }

    #[tokio::test]
    async fn test_timer_fires_and_rearms_for_next_month() {
        let clock = Arc::new(ManualClock::new(
            at(2024, 2, 1, 0) - ChronoDuration::milliseconds(150),
        ));
        let mut store = ScriptedStore::new(clock.clone());
        store.advance_on_reset = ChronoDuration::minutes(1);
        let store = Arc::new(store);
        let scheduler = scheduler(store.clone(), clock.clone(), true, 1, 0);

        assert!(scheduler.start());
        clock.set(at(2024, 2, 1, 0));
        let waited = tokio::time::timeout(Duration::from_secs(5), async {
            while scheduler.status().last_run.is_none() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await;
        assert!(waited.is_ok(), "timer never fired");

        let status = scheduler.status();
        assert_eq!(store.resets(), 1);
        assert_eq!(status.phase, SchedulerPhase::Armed);
        assert_eq!(status.next_reset_at, Some(at(2024, 3, 1, 0)));
        let run = status.last_run.unwrap();
        assert_eq!(run.trigger, FireTrigger::Timer);
        assert_eq!(run.reset_count, Some(3));

        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_rearm_uses_completion_time_not_previous_target() {
        let clock = Arc::new(ManualClock::new(at(2024, 3, 10, 12)));
        let mut store = ScriptedStore::new(clock.clone());
        // The reset "takes" forty days.
        store.advance_on_reset = ChronoDuration::days(40);
        let store = Arc::new(store);
        let scheduler = scheduler(store, clock.clone(), true, 15, 0);

        scheduler.start();
        assert_eq!(scheduler.status().next_reset_at, Some(at(2024, 3, 15, 0)));

        let run = scheduler.fire_now().await;
        assert!(run.succeeded);

        let completed = clock.now();
        assert_eq!(completed, at(2024, 4, 19, 12));
        let next = scheduler.status().next_reset_at.unwrap();
        assert!(next > completed);
        // Re-arming from the stale target would have produced April 15th.
        assert_eq!(next, at(2024, 5, 15, 0));

        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_failed_reset_still_rearms() {
        let clock = Arc::new(ManualClock::new(at(2024, 3, 10, 12)));
        let mut store = ScriptedStore::new(clock.clone());
        store.fail = true;
        let scheduler = scheduler(Arc::new(store), clock, true, 1, 3);

        scheduler.start();
        let run = scheduler.fire_now().await;
        assert!(!run.succeeded);
        assert_eq!(run.reset_count, None);
        assert!(run.error.as_deref().unwrap_or_default().contains("disk I/O"));

        let status = scheduler.status();
        assert_eq!(status.phase, SchedulerPhase::Armed);
        assert_eq!(status.next_reset_at, Some(at(2024, 4, 1, 3)));
        assert_eq!(status.last_run, Some(run));

        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_fire_now_while_stopped_does_not_start() {
        let clock = Arc::new(ManualClock::new(at(2024, 3, 10, 12)));
        let store = Arc::new(ScriptedStore::new(clock.clone()));
        let scheduler = scheduler(store.clone(), clock, true, 1, 0);

        let run = scheduler.fire_now().await;
        assert!(run.succeeded);
        assert_eq!(run.trigger, FireTrigger::Manual);
        assert_eq!(store.resets(), 1);

        let status = scheduler.status();
        assert!(!status.active);
        assert_eq!(status.next_reset_at, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_firings_are_serialized() {
        let clock = Arc::new(ManualClock::new(at(2024, 3, 10, 12)));
        let mut store = ScriptedStore::new(clock.clone());
        store.hold = Duration::from_millis(25);
        let store = Arc::new(store);
        let scheduler = scheduler(store.clone(), clock, true, 1, 0);
        scheduler.start();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let scheduler = scheduler.clone();
            handles.push(tokio::spawn(async move { scheduler.fire_now().await }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().succeeded);
        }

        assert_eq!(store.resets(), 4);
        assert_eq!(store.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.status().phase, SchedulerPhase::Armed);

        scheduler.stop().await;
    }

    async fn wait_until(mut ready: impl FnMut() -> bool) -> bool {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !ready() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .is_ok()
    }

    #[tokio::test]
    async fn test_timer_waking_before_wall_clock_target_does_not_fire() {
        let target = at(2024, 2, 1, 0);
        let clock = Arc::new(ManualClock::new(target - ChronoDuration::milliseconds(100)));
        let store = Arc::new(ScriptedStore::new(clock.clone()));
        let scheduler = scheduler(store.clone(), clock.clone(), true, 1, 0);

        assert!(scheduler.start());
        // Wall clock steps backwards while the timer sleeps.
        clock.set(target - ChronoDuration::milliseconds(300));
        tokio::time::sleep(Duration::from_millis(1_500)).await;

        assert_eq!(store.resets(), 0);
        let status = scheduler.status();
        assert_eq!(status.phase, SchedulerPhase::Armed);
        assert_eq!(status.next_reset_at, Some(target));

        clock.set(target);
        assert!(wait_until(|| store.resets() > 0).await, "timer never fired");
        assert!(wait_until(|| scheduler.status().phase == SchedulerPhase::Armed).await);
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(store.resets(), 1);
        assert_eq!(scheduler.status().next_reset_at, Some(at(2024, 3, 1, 0)));

        scheduler.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_during_reset_waits_and_does_not_rearm() {
        let clock = Arc::new(ManualClock::new(at(2024, 3, 10, 12)));
        let mut store = ScriptedStore::new(clock.clone());
        store.hold = Duration::from_millis(200);
        let store = Arc::new(store);
        let scheduler = scheduler(store.clone(), clock, true, 1, 0);
        assert!(scheduler.start());

        let firing = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.fire_now().await })
        };
        assert!(wait_until(|| store.in_flight.load(Ordering::SeqCst) == 1).await);

        scheduler.stop().await;
        // stop() returned, so the in-flight reset has completed.
        assert_eq!(store.resets(), 1);
        let status = scheduler.status();
        assert_eq!(status.phase, SchedulerPhase::Stopped);
        assert_eq!(status.next_reset_at, None);

        let run = firing.await.unwrap();
        assert!(run.succeeded);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(scheduler.status().phase, SchedulerPhase::Stopped);
        assert_eq!(store.resets(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_timer_firing_and_manual_fire_are_serialized() {
        let target = at(2024, 2, 1, 0);
        let clock = Arc::new(ManualClock::new(target - ChronoDuration::milliseconds(50)));
        let mut store = ScriptedStore::new(clock.clone());
        store.hold = Duration::from_millis(200);
        store.advance_on_reset = ChronoDuration::minutes(1);
        let store = Arc::new(store);
        let scheduler = scheduler(store.clone(), clock.clone(), true, 1, 0);

        assert!(scheduler.start());
        clock.set(target);
        assert!(wait_until(|| store.in_flight.load(Ordering::SeqCst) == 1).await);

        // The timer-driven reset is in flight; the manual one must queue.
        let run = scheduler.fire_now().await;
        assert!(run.succeeded);
        assert_eq!(run.trigger, FireTrigger::Manual);

        assert_eq!(store.resets(), 2);
        assert_eq!(store.max_in_flight.load(Ordering::SeqCst), 1);
        let status = scheduler.status();
        assert_eq!(status.phase, SchedulerPhase::Armed);
        assert_eq!(status.next_reset_at, Some(at(2024, 3, 1, 0)));
        assert_eq!(status.last_run.map(|run| run.trigger), Some(FireTrigger::Manual));

        scheduler.stop().await;
    }
}
