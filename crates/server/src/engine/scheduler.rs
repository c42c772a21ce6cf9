use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::Coordinate;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_stream::{wrappers::IntervalStream, StreamExt};
use uuid::Uuid;

use super::clock::Clock;
use super::location::LocationProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleOrigin {
    /// Delivered by the continuous location watch
    Watch,
    /// Taken by the fixed-interval poll
    Poll,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub origin: SampleOrigin,
    pub point: Coordinate,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkOutcome {
    Continue,
    /// The session is over; no further samples should be processed
    Stop,
}

/// Serialized consumer of a user's samples
#[async_trait]
pub trait SampleSink: Send + Sync + 'static {
    async fn handle(&self, user_id: &str, tracker_id: Uuid, sample: Sample) -> SinkOutcome;
}

#[derive(Debug, Clone, Copy)]
pub struct SchedulerSettings {
    pub periodic_interval: Duration,
    pub fix_timeout: Duration,
    pub queue_depth: usize,
    /// Wait between attempts to (re)attach the continuous watch
    pub watch_retry: Duration,
}

/// Whether the continuous watch is attached, plus a nudge to retry now
#[derive(Default)]
struct WatchState {
    attached: AtomicBool,
    retry: Notify,
}

/// Running watch + poll pair for one user. Dropping the handle stops it.
pub struct TrackerHandle {
    id: Uuid,
    user_id: String,
    tasks: Vec<JoinHandle<()>>,
    stopped: AtomicBool,
    watch: Arc<WatchState>,
}

impl TrackerHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The continuous watch currently has a live subscription
    pub fn is_watching(&self) -> bool {
        self.watch.attached.load(Ordering::SeqCst)
    }

    /// Retry a detached watch without waiting for the retry delay
    pub fn retry_watch(&self) {
        if !self.is_watching() {
            self.watch.retry.notify_one();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Cancel both producers and the consumer. Safe to call repeatedly.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        for task in &self.tasks {
            task.abort();
        }
        tracing::info!("Tracker {} stopped for user {}", self.id, self.user_id);
    }
}

impl Drop for TrackerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Start the continuous watch and the periodic poll for `user_id`.
///
/// Both producers feed one queue drained by a single consumer task, so the
/// sink sees the user's samples strictly one at a time.
pub fn start(
    user_id: &str,
    provider: Arc<dyn LocationProvider>,
    sink: Arc<dyn SampleSink>,
    clock: Arc<dyn Clock>,
    settings: SchedulerSettings,
) -> TrackerHandle {
    let id = Uuid::new_v4();
    let (tx, rx) = mpsc::channel::<Sample>(settings.queue_depth.max(1));

    let state = Arc::new(WatchState::default());

    let consumer = tokio::spawn(consume(user_id.to_string(), id, rx, sink));
    let watch = tokio::spawn(watch(
        user_id.to_string(),
        provider.clone(),
        clock.clone(),
        tx.clone(),
        state.clone(),
        settings.watch_retry,
    ));
    let poll = tokio::spawn(poll(user_id.to_string(), provider, clock, tx, settings));

    tracing::info!("Tracker {} started for user {}", id, user_id);

    TrackerHandle {
        id,
        user_id: user_id.to_string(),
        tasks: vec![watch, poll, consumer],
        stopped: AtomicBool::new(false),
        watch: state,
    }
}

async fn consume(
    user_id: String,
    tracker_id: Uuid,
    mut rx: mpsc::Receiver<Sample>,
    sink: Arc<dyn SampleSink>,
) {
    while let Some(sample) = rx.recv().await {
        if sink.handle(&user_id, tracker_id, sample).await == SinkOutcome::Stop {
            break;
        }
    }
}

async fn watch(
    user_id: String,
    provider: Arc<dyn LocationProvider>,
    clock: Arc<dyn Clock>,
    tx: mpsc::Sender<Sample>,
    state: Arc<WatchState>,
    retry: Duration,
) {
    // A failed or ended subscription never ends the watch; only the tracker does
    while !tx.is_closed() {
        match provider.subscribe(true).await {
            Ok(mut subscription) => {
                state.attached.store(true, Ordering::SeqCst);
                tracing::debug!("Location watch attached for user {}", user_id);

                while let Some(delivery) = subscription.next().await {
                    match delivery {
                        Ok(point) => {
                            let sample = Sample {
                                origin: SampleOrigin::Watch,
                                point,
                                at: clock.now(),
                            };
                            if tx.send(sample).await.is_err() {
                                return;
                            }
                        }
                        Err(e) => {
                            tracing::warn!("Location watch error for user {}: {}", user_id, e);
                        }
                    }
                }

                state.attached.store(false, Ordering::SeqCst);
                tracing::info!("Location watch for user {} ended", user_id);
            }
            Err(e) => {
                tracing::warn!("Location watch unavailable for user {}: {}", user_id, e);
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(retry) => {}
            _ = state.retry.notified() => {}
        }
    }
}

async fn poll(
    user_id: String,
    provider: Arc<dyn LocationProvider>,
    clock: Arc<dyn Clock>,
    tx: mpsc::Sender<Sample>,
    settings: SchedulerSettings,
) {
    let period = settings.periodic_interval;
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut ticks = IntervalStream::new(interval);

    while ticks.next().await.is_some() {
        let fix = tokio::time::timeout(
            settings.fix_timeout,
            provider.current_position(settings.fix_timeout, true),
        )
        .await;

        let point = match fix {
            Ok(Ok(point)) => point,
            Ok(Err(e)) => {
                tracing::debug!("Skipping periodic check for user {}: {}", user_id, e);
                continue;
            }
            Err(_) => {
                tracing::debug!("Skipping periodic check for user {}: fix timed out", user_id);
                continue;
            }
        };

        let sample = Sample {
            origin: SampleOrigin::Poll,
            point,
            at: clock.now(),
        };
        if tx.send(sample).await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::clock::SystemClock;
    use crate::engine::location::{Delivery, LocationError, Permission, Subscription};
    use std::sync::Mutex;

    /// Provider whose one-shot answers are scripted and whose watch is fed by hand
    struct ScriptedProvider {
        fixes: Mutex<Vec<Result<Coordinate, LocationError>>>,
        subscribe_failures: Mutex<usize>,
        watch_tx: Mutex<Option<mpsc::Sender<Delivery>>>,
        unsubscribed: Arc<AtomicBool>,
    }

    impl ScriptedProvider {
        fn new(fixes: Vec<Result<Coordinate, LocationError>>) -> Self {
            Self {
                fixes: Mutex::new(fixes),
                subscribe_failures: Mutex::new(0),
                watch_tx: Mutex::new(None),
                unsubscribed: Arc::new(AtomicBool::new(false)),
            }
        }

        fn watch_sender(&self) -> Option<mpsc::Sender<Delivery>> {
            self.watch_tx.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LocationProvider for ScriptedProvider {
        async fn request_permission(&self) -> Permission {
            Permission::Granted
        }

        async fn current_position(
            &self,
            _timeout: Duration,
            _high_accuracy: bool,
        ) -> Result<Coordinate, LocationError> {
            let mut fixes = self.fixes.lock().unwrap();
            if fixes.is_empty() {
                Err(LocationError::Unavailable("script exhausted".to_string()))
            } else {
                fixes.remove(0)
            }
        }

        async fn subscribe(&self, _high_accuracy: bool) -> Result<Subscription, LocationError> {
            {
                let mut failures = self.subscribe_failures.lock().unwrap();
                if *failures > 0 {
                    *failures -= 1;
                    return Err(LocationError::Unavailable("device not connected".to_string()));
                }
            }
            let (tx, rx) = mpsc::channel(8);
            *self.watch_tx.lock().unwrap() = Some(tx);
            let flag = self.unsubscribed.clone();
            Ok(Subscription::new(rx, move || flag.store(true, Ordering::SeqCst)))
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        samples: Mutex<Vec<Sample>>,
        stop_after: Option<usize>,
    }

    #[async_trait]
    impl SampleSink for RecordingSink {
        async fn handle(&self, _user_id: &str, _tracker_id: Uuid, sample: Sample) -> SinkOutcome {
            let mut samples = self.samples.lock().unwrap();
            samples.push(sample);
            match self.stop_after {
                Some(n) if samples.len() >= n => SinkOutcome::Stop,
                _ => SinkOutcome::Continue,
            }
        }
    }

    fn settings() -> SchedulerSettings {
        SchedulerSettings {
            periodic_interval: Duration::from_secs(600),
            fix_timeout: Duration::from_secs(10),
            queue_depth: 16,
            watch_retry: Duration::from_secs(30),
        }
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn poll_fires_every_interval_and_skips_failed_fixes() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(Coordinate::new(19.0, 72.8)),
            Err(LocationError::Unavailable("gps off".to_string())),
            Ok(Coordinate::new(19.1, 72.8)),
        ]));
        let sink = Arc::new(RecordingSink::default());
        let handle = start("u1", provider, sink.clone(), Arc::new(SystemClock), settings());

        settle().await;
        assert!(sink.samples.lock().unwrap().is_empty());

        for _ in 0..3 {
            tokio::time::advance(Duration::from_secs(600)).await;
            settle().await;
        }

        let samples = sink.samples.lock().unwrap().clone();
        assert_eq!(samples.len(), 2);
        assert!(samples.iter().all(|s| s.origin == SampleOrigin::Poll));
        assert_eq!(samples[1].point, Coordinate::new(19.1, 72.8));
        handle.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn watch_deliveries_reach_sink_and_errors_are_skipped() {
        let provider = Arc::new(ScriptedProvider::new(Vec::new()));
        let sink = Arc::new(RecordingSink::default());
        let handle = start("u1", provider.clone(), sink.clone(), Arc::new(SystemClock), settings());
        settle().await;

        let tx = provider.watch_sender().expect("watch subscribed");
        tx.send(Ok(Coordinate::new(19.2, 72.9))).await.unwrap();
        tx.send(Err(LocationError::Unavailable("lost".to_string()))).await.unwrap();
        tx.send(Ok(Coordinate::new(19.3, 72.9))).await.unwrap();
        settle().await;

        let samples = sink.samples.lock().unwrap().clone();
        assert_eq!(samples.len(), 2);
        assert!(samples.iter().all(|s| s.origin == SampleOrigin::Watch));
        handle.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_everything_and_is_idempotent() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(Coordinate::new(19.0, 72.8))]));
        let sink = Arc::new(RecordingSink::default());
        let handle = start("u1", provider.clone(), sink.clone(), Arc::new(SystemClock), settings());
        settle().await;

        handle.stop();
        handle.stop();
        assert!(handle.is_stopped());
        settle().await;
        assert!(provider.unsubscribed.load(Ordering::SeqCst));

        tokio::time::advance(Duration::from_secs(1_800)).await;
        settle().await;
        if let Some(tx) = provider.watch_sender() {
            let _ = tx.try_send(Ok(Coordinate::new(19.2, 72.9)));
        }
        settle().await;

        assert!(sink.samples.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn sink_stop_ends_consumption() {
        let provider = Arc::new(ScriptedProvider::new(Vec::new()));
        let sink = Arc::new(RecordingSink {
            samples: Mutex::new(Vec::new()),
            stop_after: Some(1),
        });
        let handle = start("u1", provider.clone(), sink.clone(), Arc::new(SystemClock), settings());
        settle().await;

        let tx = provider.watch_sender().expect("watch subscribed");
        tx.send(Ok(Coordinate::new(19.2, 72.9))).await.unwrap();
        settle().await;
        let _ = tx.try_send(Ok(Coordinate::new(19.3, 72.9)));
        settle().await;

        assert_eq!(sink.samples.lock().unwrap().len(), 1);
        drop(handle);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_subscribe_is_retried_after_delay() {
        let provider = Arc::new(ScriptedProvider::new(Vec::new()));
        *provider.subscribe_failures.lock().unwrap() = 2;
        let sink = Arc::new(RecordingSink::default());
        let handle = start("u1", provider.clone(), sink.clone(), Arc::new(SystemClock), settings());
        settle().await;
        assert!(provider.watch_sender().is_none());
        assert!(!handle.is_watching());

        tokio::time::advance(Duration::from_secs(30)).await;
        settle().await;
        assert!(provider.watch_sender().is_none());

        tokio::time::advance(Duration::from_secs(30)).await;
        settle().await;
        assert!(handle.is_watching());

        let tx = provider.watch_sender().expect("watch subscribed");
        tx.send(Ok(Coordinate::new(19.2, 72.9))).await.unwrap();
        settle().await;
        assert_eq!(sink.samples.lock().unwrap().len(), 1);
        handle.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn retry_watch_reattaches_without_waiting() {
        let provider = Arc::new(ScriptedProvider::new(Vec::new()));
        *provider.subscribe_failures.lock().unwrap() = 1;
        let sink = Arc::new(RecordingSink::default());
        let handle = start("u1", provider.clone(), sink.clone(), Arc::new(SystemClock), settings());
        settle().await;
        assert!(!handle.is_watching());

        handle.retry_watch();
        settle().await;
        assert!(handle.is_watching());
        handle.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn ended_subscription_is_replaced() {
        let provider = Arc::new(ScriptedProvider::new(Vec::new()));
        let sink = Arc::new(RecordingSink::default());
        let handle = start("u1", provider.clone(), sink.clone(), Arc::new(SystemClock), settings());
        settle().await;
        assert!(handle.is_watching());

        // Provider side goes away
        provider.watch_tx.lock().unwrap().take();
        settle().await;
        assert!(!handle.is_watching());

        tokio::time::advance(Duration::from_secs(30)).await;
        settle().await;
        assert!(handle.is_watching());
        let tx = provider.watch_sender().expect("watch resubscribed");
        tx.send(Ok(Coordinate::new(19.2, 72.9))).await.unwrap();
        settle().await;
        assert_eq!(sink.samples.lock().unwrap().len(), 1);
        handle.stop();
    }
}
