use crate::application::session::NowProvider;
use crate::application::worktime_api::WorkSessionGateway;
use crate::domain::models::{CompletedSession, TimerSnapshot, TimerState, TimerStatus};
use crate::infrastructure::error::InfraError;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

const TICK_PERIOD: Duration = Duration::from_secs(1);

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

fn next_session_id() -> String {
    let sequence = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
    format!("session-{}-{sequence}", Utc::now().timestamp_micros())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Started(TimerSnapshot),
    Stopped(CompletedSession),
    /// Wrong state or another transition still pending; nothing was sent.
    Ignored,
}

/// Resets the pending flag even when the transition future is dropped mid-call.
struct PendingGuard<'a>(&'a AtomicBool);

impl<'a> PendingGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct WorkTimer<G>
where
    G: WorkSessionGateway + 'static,
{
    gateway: Arc<G>,
    state: Arc<Mutex<TimerState>>,
    history: Mutex<Vec<CompletedSession>>,
    description: Mutex<String>,
    ticker: Mutex<Option<JoinHandle<()>>>,
    pending: AtomicBool,
    snapshots: Arc<watch::Sender<TimerSnapshot>>,
    now_provider: NowProvider,
}

impl<G> WorkTimer<G>
where
    G: WorkSessionGateway + 'static,
{
    pub fn new(gateway: Arc<G>) -> Self {
        let (snapshots, _) = watch::channel(TimerSnapshot::from_state(&TimerState::default()));
        Self {
            gateway,
            state: Arc::new(Mutex::new(TimerState::default())),
            history: Mutex::new(Vec::new()),
            description: Mutex::new(String::new()),
            ticker: Mutex::new(None),
            pending: AtomicBool::new(false),
            snapshots: Arc::new(snapshots),
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    pub async fn start(&self) -> Result<Transition, InfraError> {
        let Some(_pending) = PendingGuard::acquire(&self.pending) else {
            tracing::debug!("start ignored; a transition is already pending");
            return Ok(Transition::Ignored);
        };
        if self.lock_state()?.status == TimerStatus::Running {
            return Ok(Transition::Ignored);
        }

        if let Err(error) = self.gateway.start_work().await {
            tracing::warn!("start work rejected; timer stays idle: {error}");
            return Err(error);
        }

        let snapshot = {
            let mut state = self.lock_state()?;
            state.status = TimerStatus::Running;
            state.session_start = Some((self.now_provider)());
            state.current_session_seconds = 0;
            TimerSnapshot::from_state(&state)
        };
        self.snapshots.send_replace(snapshot.clone());
        self.replace_ticker(Some(self.spawn_ticker()))?;

        tracing::info!(
            accumulated_seconds = snapshot.accumulated_seconds,
            "work session started"
        );
        Ok(Transition::Started(snapshot))
    }

    pub async fn stop(&self) -> Result<Transition, InfraError> {
        let Some(_pending) = PendingGuard::acquire(&self.pending) else {
            tracing::debug!("stop ignored; a transition is already pending");
            return Ok(Transition::Ignored);
        };
        if self.lock_state()?.status == TimerStatus::Idle {
            return Ok(Transition::Ignored);
        }

        if let Err(error) = self.gateway.end_work().await {
            tracing::warn!("end work rejected; timer keeps running: {error}");
            return Err(error);
        }

        self.replace_ticker(None)?;
        let ended_at = (self.now_provider)();
        let (completed, snapshot) = {
            let mut state = self.lock_state()?;
            let started_at = state.session_start.unwrap_or(ended_at);
            let duration_seconds = state.elapsed_at(ended_at);
            state.accumulated_seconds = state.accumulated_seconds.saturating_add(duration_seconds);
            state.current_session_seconds = 0;
            state.session_start = None;
            state.status = TimerStatus::Idle;

            let completed = CompletedSession {
                id: next_session_id(),
                started_at,
                ended_at,
                duration_seconds,
                description: self.current_description(),
            };
            (completed, TimerSnapshot::from_state(&state))
        };
        self.snapshots.send_replace(snapshot.clone());
        if let Ok(mut history) = self.history.lock() {
            history.push(completed.clone());
        }

        tracing::info!(
            duration_seconds = completed.duration_seconds,
            accumulated_seconds = snapshot.accumulated_seconds,
            "work session stopped"
        );
        Ok(Transition::Stopped(completed))
    }

    /// Current display state, recomputed from the clock.
    pub fn snapshot(&self) -> Result<TimerSnapshot, InfraError> {
        let mut state = self.lock_state()?;
        if state.status == TimerStatus::Running {
            state.current_session_seconds = state.elapsed_at((self.now_provider)());
        }
        Ok(TimerSnapshot::from_state(&state))
    }

    pub fn subscribe(&self) -> watch::Receiver<TimerSnapshot> {
        self.snapshots.subscribe()
    }

    /// Seeds the confirmed total (e.g. today's time from the server). Only applies while idle.
    pub fn hydrate(&self, accumulated_seconds: u64) -> Result<bool, InfraError> {
        let snapshot = {
            let mut state = self.lock_state()?;
            if state.status != TimerStatus::Idle {
                return Ok(false);
            }
            state.accumulated_seconds = accumulated_seconds;
            TimerSnapshot::from_state(&state)
        };
        self.snapshots.send_replace(snapshot);
        Ok(true)
    }

    pub fn history(&self) -> Vec<CompletedSession> {
        self.history
            .lock()
            .map(|history| history.clone())
            .unwrap_or_default()
    }

    pub fn set_description(&self, description: &str) {
        if let Ok(mut current) = self.description.lock() {
            *current = description.trim().to_string();
        }
    }

    fn current_description(&self) -> String {
        self.description
            .lock()
            .map(|value| value.clone())
            .unwrap_or_default()
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, TimerState>, InfraError> {
        self.state
            .lock()
            .map_err(|error| InfraError::Internal(format!("timer lock poisoned: {error}")))
    }

    fn replace_ticker(&self, next: Option<JoinHandle<()>>) -> Result<(), InfraError> {
        let mut ticker = self
            .ticker
            .lock()
            .map_err(|error| InfraError::Internal(format!("ticker lock poisoned: {error}")))?;
        if let Some(previous) = ticker.take() {
            previous.abort();
        }
        *ticker = next;
        Ok(())
    }

    fn spawn_ticker(&self) -> JoinHandle<()> {
        let state = Arc::clone(&self.state);
        let snapshots = Arc::clone(&self.snapshots);
        let now_provider = Arc::clone(&self.now_provider);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(TICK_PERIOD);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // first tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                let snapshot = {
                    let Ok(mut state) = state.lock() else {
                        break;
                    };
                    if state.status != TimerStatus::Running {
                        break;
                    }
                    state.current_session_seconds = state.elapsed_at(now_provider());
                    TimerSnapshot::from_state(&state)
                };
                snapshots.send_replace(snapshot);
            }
        })
    }
}

impl<G> Drop for WorkTimer<G>
where
    G: WorkSessionGateway + 'static,
{
    fn drop(&mut self) {
        if let Ok(mut ticker) = self.ticker.lock() {
            if let Some(handle) = ticker.take() {
                handle.abort();
            }
        }
    }
}

/// Renders seconds as `HH:MM:SS`; hours keep growing past 99.
pub fn format_hms(seconds: u64) -> String {
    format!(
        "{:02}:{:02}:{:02}",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::DateTime;
    use proptest::prelude::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct FakeGateway {
        start_calls: AtomicUsize,
        end_calls: AtomicUsize,
        fail_start: AtomicBool,
        fail_end: AtomicBool,
        start_gate: Option<Arc<Notify>>,
    }

    #[async_trait]
    impl WorkSessionGateway for FakeGateway {
        async fn start_work(&self) -> Result<(), InfraError> {
            self.start_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.start_gate {
                gate.notified().await;
            }
            if self.fail_start.load(Ordering::SeqCst) {
                return Err(InfraError::Transport("start: connection refused".to_string()));
            }
            Ok(())
        }

        async fn end_work(&self) -> Result<(), InfraError> {
            self.end_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_end.load(Ordering::SeqCst) {
                return Err(InfraError::Api {
                    status: 503,
                    message: "unavailable".to_string(),
                });
            }
            Ok(())
        }
    }

    /// Wall clock driven by tokio's (pausable) clock.
    fn tokio_clock() -> NowProvider {
        let origin: DateTime<Utc> = DateTime::from_timestamp(1_767_225_600, 0).expect("origin");
        let base = tokio::time::Instant::now();
        Arc::new(move || {
            let elapsed = tokio::time::Instant::now().duration_since(base);
            origin + chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero())
        })
    }

    fn assert_consistent<G: WorkSessionGateway + 'static>(timer: &WorkTimer<G>) {
        let state = timer.state.lock().expect("state");
        assert_eq!(state.validate(), Ok(()), "{state:?}");
    }

    fn timer_with(gateway: FakeGateway) -> (WorkTimer<FakeGateway>, Arc<FakeGateway>) {
        let gateway = Arc::new(gateway);
        let timer = WorkTimer::new(Arc::clone(&gateway)).with_now_provider(tokio_clock());
        (timer, gateway)
    }

    fn timer_with_system_clock() -> (WorkTimer<FakeGateway>, Arc<FakeGateway>) {
        let gateway = Arc::new(FakeGateway::default());
        (WorkTimer::new(Arc::clone(&gateway)), gateway)
    }

    #[tokio::test(start_paused = true)]
    async fn start_then_stop_after_five_seconds_accumulates_five() {
        let (timer, gateway) = timer_with(FakeGateway::default());

        assert!(matches!(timer.start().await, Ok(Transition::Started(_))));
        assert_consistent(&timer);
        tokio::time::advance(Duration::from_secs(5)).await;
        let stopped = timer.stop().await.expect("stop");
        assert_consistent(&timer);

        let snapshot = timer.snapshot().expect("snapshot");
        assert_eq!(snapshot.status, TimerStatus::Idle);
        assert_eq!(snapshot.accumulated_seconds, 5);
        assert_eq!(snapshot.current_session_seconds, 0);
        assert_eq!(snapshot.session_start, None);
        match stopped {
            Transition::Stopped(session) => assert_eq!(session.duration_seconds, 5),
            other => panic!("expected stopped transition, got {other:?}"),
        }
        assert_eq!(gateway.start_calls.load(Ordering::SeqCst), 1);
        assert_eq!(gateway.end_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_stop_keeps_timer_running() {
        let (timer, gateway) = timer_with(FakeGateway::default());
        timer.start().await.expect("start");
        tokio::time::advance(Duration::from_secs(3)).await;

        gateway.fail_end.store(true, Ordering::SeqCst);
        assert!(timer.stop().await.is_err());
        assert_consistent(&timer);

        let mut receiver = timer.subscribe();
        tokio::time::advance(Duration::from_secs(2)).await;
        receiver.changed().await.expect("tick after failed stop");

        let snapshot = timer.snapshot().expect("snapshot");
        assert_eq!(snapshot.status, TimerStatus::Running);
        assert!(snapshot.current_session_seconds > 3);
        assert!(receiver.borrow().current_session_seconds > 3);
        assert_eq!(snapshot.accumulated_seconds, 0);
        assert!(timer.history().is_empty());
        assert!(!timer.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_start_leaves_timer_idle_without_ticks() {
        let gateway = FakeGateway::default();
        gateway.fail_start.store(true, Ordering::SeqCst);
        let (timer, _gateway) = timer_with(gateway);
        let receiver = timer.subscribe();

        assert!(timer.start().await.is_err());
        assert_consistent(&timer);
        tokio::time::advance(Duration::from_secs(3)).await;
        tokio::task::yield_now().await;

        let snapshot = timer.snapshot().expect("snapshot");
        assert_eq!(snapshot.status, TimerStatus::Idle);
        assert_eq!(snapshot.current_session_seconds, 0);
        assert!(!receiver.has_changed().expect("sender alive"));
        assert!(timer.ticker.lock().expect("ticker").is_none());
    }

    #[tokio::test]
    async fn wrong_state_transitions_make_no_remote_calls() {
        let (timer, gateway) = timer_with(FakeGateway::default());

        assert_eq!(timer.stop().await.expect("stop idle"), Transition::Ignored);
        assert_eq!(gateway.end_calls.load(Ordering::SeqCst), 0);

        timer.start().await.expect("start");
        let before = timer.snapshot().expect("snapshot");
        assert_eq!(timer.start().await.expect("start running"), Transition::Ignored);
        assert_eq!(gateway.start_calls.load(Ordering::SeqCst), 1);
        assert_eq!(timer.snapshot().expect("snapshot").session_start, before.session_start);
    }

    #[tokio::test]
    async fn overlapping_transition_is_ignored_while_pending() {
        let gate = Arc::new(Notify::new());
        let gateway = FakeGateway {
            start_gate: Some(Arc::clone(&gate)),
            ..FakeGateway::default()
        };
        let (timer, gateway) = timer_with(gateway);
        let timer = Arc::new(timer);

        let first = {
            let timer = Arc::clone(&timer);
            tokio::spawn(async move { timer.start().await })
        };
        while gateway.start_calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        assert!(timer.is_pending());
        assert_eq!(timer.start().await.expect("second start"), Transition::Ignored);

        gate.notify_one();
        let first = first.await.expect("join").expect("first start");
        assert!(matches!(first, Transition::Started(_)));
        assert_eq!(gateway.start_calls.load(Ordering::SeqCst), 1);
        assert!(!timer.is_pending());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_starts_send_exactly_one_remote_call() {
        let (timer, gateway) = timer_with(FakeGateway::default());
        let timer = Arc::new(timer);
        let barrier = Arc::new(tokio::sync::Barrier::new(16));

        let handles = (0..16)
            .map(|_| {
                let timer = Arc::clone(&timer);
                let barrier = Arc::clone(&barrier);
                tokio::spawn(async move {
                    barrier.wait().await;
                    timer.start().await
                })
            })
            .collect::<Vec<_>>();
        let mut started = 0;
        for handle in handles {
            if matches!(handle.await.expect("join").expect("start"), Transition::Started(_)) {
                started += 1;
            }
        }

        assert_eq!(started, 1);
        assert_eq!(gateway.start_calls.load(Ordering::SeqCst), 1);
        assert_consistent(&timer);
    }

    #[tokio::test]
    async fn hydrate_only_applies_while_idle() {
        let (timer, _gateway) = timer_with(FakeGateway::default());
        assert!(timer.hydrate(3_600).expect("hydrate"));
        assert_eq!(timer.snapshot().expect("snapshot").total_seconds, 3_600);

        timer.start().await.expect("start");
        assert!(!timer.hydrate(10).expect("hydrate running"));
        assert_eq!(timer.snapshot().expect("snapshot").accumulated_seconds, 3_600);
    }

    #[tokio::test(start_paused = true)]
    async fn completed_sessions_carry_description() {
        let (timer, _gateway) = timer_with(FakeGateway::default());
        timer.set_description("  sprint planning ");
        timer.start().await.expect("start");
        tokio::time::advance(Duration::from_secs(90)).await;
        timer.stop().await.expect("stop");

        let history = timer.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].description, "sprint planning");
        assert_eq!(history[0].duration_seconds, 90);
        assert_eq!(history[0].ended_at - history[0].started_at, chrono::Duration::seconds(90));
    }

    #[test]
    fn poisoned_state_lock_is_reported_as_internal_error() {
        let (timer, _gateway) = timer_with_system_clock();
        let state = Arc::clone(&timer.state);
        let _ = std::thread::spawn(move || {
            let _guard = state.lock().expect("state");
            panic!("poison timer state");
        })
        .join();

        assert!(matches!(timer.snapshot(), Err(InfraError::Internal(_))));
        assert!(matches!(timer.hydrate(10), Err(InfraError::Internal(_))));
    }

    #[test]
    fn format_hms_pads_components() {
        assert_eq!(format_hms(0), "00:00:00");
        assert_eq!(format_hms(3_725), "01:02:05");
        assert_eq!(format_hms(360_000), "100:00:00");
    }

    proptest! {
        #[test]
        fn accumulated_equals_sum_of_cycle_durations(durations in prop::collection::vec(0u64..4_000, 1..8)) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .start_paused(true)
                .build()
                .expect("runtime");
            let (accumulated, recorded) = runtime.block_on(async {
                let (timer, _gateway) = timer_with(FakeGateway::default());
                for duration in &durations {
                    timer.start().await.expect("start");
                    assert_consistent(&timer);
                    tokio::time::advance(Duration::from_secs(*duration)).await;
                    timer.stop().await.expect("stop");
                    assert_consistent(&timer);
                }
                let snapshot = timer.snapshot().expect("snapshot");
                let recorded = timer
                    .history()
                    .iter()
                    .map(|session| session.duration_seconds)
                    .collect::<Vec<_>>();
                (snapshot.accumulated_seconds, recorded)
            });
            prop_assert_eq!(accumulated, durations.iter().sum::<u64>());
            prop_assert_eq!(recorded, durations);
        }
    }
}
