//! Attendance and geofence engine.
//!
//! Every record for a user is produced under that user's lock, so manual
//! punches, SOS and the tracker's samples observe each other's writes in
//! order. Users never contend with each other.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use shared::{
    AttendanceRecord, AttendanceStatus, Coordinate, Flag, MeetingRecord, ServerToAdmin,
    UserProfile, UserStatus,
};
use std::sync::{Arc, Weak};
use thiserror::Error;
use tokio::sync::{broadcast, Mutex, OwnedMutexGuard};
use uuid::Uuid;

pub mod classify;
pub mod clock;
pub mod dedup;
pub mod geo;
pub mod location;
pub mod naming;
pub mod scheduler;
pub mod status;

use crate::config::Config;
use crate::store::{RecordStore, UserUpdate};
use classify::{AttendancePolicy, Classifier};
use clock::Clock;
use dedup::ViolationDeduplicator;
use location::{LocationError, LocationProvider, LocationSource, Permission};
use naming::LocationNamer;
use scheduler::{Sample, SampleOrigin, SampleSink, SchedulerSettings, SinkOutcome, TrackerHandle};

const FEED_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum TrackError {
    #[error("Location permission denied")]
    PermissionDenied,

    #[error("Location unavailable: {0}")]
    LocationUnavailable(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("User is not checked in")]
    NotCheckedIn,

    #[error("Unknown user: {0}")]
    UnknownUser(String),

    #[error("Store error: {0}")]
    Store(#[from] anyhow::Error),
}

impl From<LocationError> for TrackError {
    fn from(err: LocationError) -> Self {
        match err {
            LocationError::PermissionDenied => TrackError::PermissionDenied,
            LocationError::Unavailable(reason) => TrackError::LocationUnavailable(reason),
            LocationError::Timeout(after) => {
                TrackError::LocationUnavailable(format!("no fix within {:?}", after))
            }
        }
    }
}

#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    store: Arc<dyn RecordStore>,
    classifier: Classifier,
    dedup: ViolationDeduplicator,
    clock: Arc<dyn Clock>,
    locations: Arc<dyn LocationSource>,
    settings: SchedulerSettings,
    user_locks: DashMap<String, Arc<Mutex<()>>>,
    trackers: DashMap<String, TrackerHandle>,
    feed: broadcast::Sender<ServerToAdmin>,
}

impl Engine {
    pub fn new(
        store: Arc<dyn RecordStore>,
        classifier: Classifier,
        dedup: ViolationDeduplicator,
        clock: Arc<dyn Clock>,
        locations: Arc<dyn LocationSource>,
        settings: SchedulerSettings,
    ) -> Self {
        let (feed, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            inner: Arc::new(EngineInner {
                store,
                classifier,
                dedup,
                clock,
                locations,
                settings,
                user_locks: DashMap::new(),
                trackers: DashMap::new(),
                feed,
            }),
        }
    }

    pub fn from_config(
        config: &Config,
        store: Arc<dyn RecordStore>,
        locations: Arc<dyn LocationSource>,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self> {
        let tracking = &config.tracking;
        let classifier = Classifier::new(
            AttendancePolicy::from_config(tracking)?,
            LocationNamer::from_config(config),
        );
        let settings = SchedulerSettings {
            periodic_interval: tracking.periodic_interval(),
            fix_timeout: tracking.fix_timeout(),
            queue_depth: tracking.sample_queue_depth,
            watch_retry: tracking.watch_retry(),
        };
        Ok(Self::new(
            store,
            classifier,
            ViolationDeduplicator::new(tracking.alert_cooldown()?),
            clock,
            locations,
            settings,
        ))
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.inner.store
    }

    pub fn policy(&self) -> &AttendancePolicy {
        self.inner.classifier.policy()
    }

    pub fn namer(&self) -> &LocationNamer {
        self.inner.classifier.namer()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    /// Live record and user feed for admin consoles
    pub fn subscribe_feed(&self) -> broadcast::Receiver<ServerToAdmin> {
        self.inner.feed.subscribe()
    }

    pub fn publish_user(&self, user: UserProfile) {
        let _ = self.inner.feed.send(ServerToAdmin::UserUpdated { user });
    }

    pub async fn session_status(&self, user_id: &str) -> Result<AttendanceStatus, TrackError> {
        let last = self.inner.store.last_record(user_id).await?;
        let now = self.now();
        if status::is_unresolved_carry_over(self.policy(), last.as_ref(), now) {
            tracing::warn!("User {} has an open check-in from a previous day", user_id);
        }
        Ok(status::derive_status(self.policy(), last.as_ref(), now))
    }

    /// Manual punch: toggles the session with a fresh fix.
    ///
    /// A failed fix aborts before anything is written.
    pub async fn punch(
        &self,
        user_id: &str,
        provider: &dyn LocationProvider,
    ) -> Result<AttendanceRecord, TrackError> {
        let point = self.acquire_fix(provider).await?;

        // Held until the tracker matches the new session state
        let _guard = self.lock_user(user_id).await;

        let user = self.load_user(user_id).await?;
        let now = self.now();
        let last = self.inner.store.last_record(user_id).await?;
        if status::is_unresolved_carry_over(self.policy(), last.as_ref(), now) {
            tracing::warn!(
                "User {} never punched out on a previous day; starting a new session",
                user_id
            );
        }

        let kind = status::next_punch(status::derive_status(self.policy(), last.as_ref(), now));
        let record = self.emit(&user, point, now, kind, &[]).await?;

        let presence = match kind {
            AttendanceStatus::CheckedIn => UserStatus::Active,
            AttendanceStatus::CheckedOut => UserStatus::Idle,
        };
        self.set_presence(user_id, presence, Some(point), now).await;

        match kind {
            AttendanceStatus::CheckedIn => {
                self.start_tracking(user_id);
            }
            AttendanceStatus::CheckedOut => {
                self.stop_tracking(user_id);
            }
        }

        Ok(record)
    }

    /// Emergency signal. Location failure degrades to a sentinel position
    /// instead of dropping the alert; denied permission is still an error.
    pub async fn sos(
        &self,
        user_id: &str,
        confirmed: bool,
        provider: &dyn LocationProvider,
    ) -> Result<AttendanceRecord, TrackError> {
        if !confirmed {
            return Err(TrackError::InvalidInput("SOS must be confirmed".to_string()));
        }

        let (point, flags) = match self.acquire_fix(provider).await {
            Ok(point) => (Some(point), vec![Flag::EmergencySos]),
            Err(TrackError::LocationUnavailable(reason)) => {
                tracing::warn!("SOS from user {} without a fix: {}", user_id, reason);
                (None, vec![Flag::EmergencySos, Flag::GpsFailSos])
            }
            Err(e) => return Err(e),
        };

        let _guard = self.lock_user(user_id).await;

        let user = self.load_user(user_id).await?;
        let now = self.now();
        let record = self
            .emit(
                &user,
                point.unwrap_or(Coordinate::NULL_ISLAND),
                now,
                AttendanceStatus::CheckedIn,
                &flags,
            )
            .await?;
        self.set_presence(user_id, UserStatus::Active, point, now).await;

        self.start_tracking(user_id);
        Ok(record)
    }

    pub async fn record_meeting(
        &self,
        user_id: &str,
        client_name: &str,
        notes: &str,
        provider: &dyn LocationProvider,
    ) -> Result<MeetingRecord, TrackError> {
        let client_name = client_name.trim();
        if client_name.is_empty() {
            return Err(TrackError::InvalidInput("Client name is required".to_string()));
        }

        let point = self.acquire_fix(provider).await?;

        let _guard = self.lock_user(user_id).await;

        let user = self.load_user(user_id).await?;
        let now = self.now();
        let last = self.inner.store.last_record(user_id).await?;
        if status::derive_status(self.policy(), last.as_ref(), now) != AttendanceStatus::CheckedIn {
            return Err(TrackError::NotCheckedIn);
        }

        let meeting = MeetingRecord {
            id: Uuid::new_v4(),
            user_id: user.id,
            user_name: user.name,
            client_name: client_name.to_string(),
            notes: notes.trim().to_string(),
            timestamp: now,
            location: point,
            location_name: self.namer().resolve(point),
        };
        self.inner.store.append_meeting(&meeting).await?;
        tracing::info!(
            "Meeting with {} logged for user {} at {}",
            meeting.client_name,
            meeting.user_id,
            meeting.location_name
        );
        Ok(meeting)
    }

    /// Start the tracker for a user unless one is already running.
    ///
    /// A running tracker whose watch lost its subscription is told to
    /// reattach right away.
    pub fn start_tracking(&self, user_id: &str) -> bool {
        match self.inner.trackers.entry(user_id.to_string()) {
            Entry::Occupied(entry) if !entry.get().is_stopped() => {
                entry.get().retry_watch();
                false
            }
            Entry::Occupied(mut entry) => {
                entry.insert(self.spawn_tracker(user_id));
                true
            }
            Entry::Vacant(entry) => {
                entry.insert(self.spawn_tracker(user_id));
                true
            }
        }
    }

    /// Start tracking only if the user's session is open
    pub async fn resume_tracking(&self, user_id: &str) -> Result<bool, TrackError> {
        let _guard = self.lock_user(user_id).await;
        if self.session_status(user_id).await? != AttendanceStatus::CheckedIn {
            return Ok(false);
        }
        Ok(self.start_tracking(user_id))
    }

    pub fn stop_tracking(&self, user_id: &str) -> bool {
        match self.inner.trackers.remove(user_id) {
            Some((_, handle)) => {
                handle.stop();
                true
            }
            None => false,
        }
    }

    pub fn is_tracking(&self, user_id: &str) -> bool {
        self.inner
            .trackers
            .get(user_id)
            .map(|handle| !handle.is_stopped())
            .unwrap_or(false)
    }

    /// Shutdown: cancel every running tracker
    pub fn stop_all(&self) {
        let count = self.inner.trackers.len();
        self.inner.trackers.clear();
        tracing::info!("Stopped {} tracker(s)", count);
    }

    /// Mark a user offline, e.g. when their device link drops
    pub async fn mark_offline(&self, user_id: &str) {
        let now = self.now();
        self.set_presence(user_id, UserStatus::Offline, None, now).await;
    }

    fn spawn_tracker(&self, user_id: &str) -> TrackerHandle {
        let sink = Arc::new(EngineSink(Arc::downgrade(&self.inner)));
        scheduler::start(
            user_id,
            self.inner.locations.provider(user_id),
            sink,
            self.inner.clock.clone(),
            self.inner.settings,
        )
    }

    async fn lock_user(&self, user_id: &str) -> UserGuard<'_> {
        let lock = self
            .inner
            .user_locks
            .entry(user_id.to_string())
            .or_default()
            .clone();
        UserGuard {
            locks: &self.inner.user_locks,
            user_id: user_id.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }

    async fn load_user(&self, user_id: &str) -> Result<UserProfile, TrackError> {
        self.inner
            .store
            .get_user(user_id)
            .await?
            .ok_or_else(|| TrackError::UnknownUser(user_id.to_string()))
    }

    async fn acquire_fix(&self, provider: &dyn LocationProvider) -> Result<Coordinate, TrackError> {
        if provider.request_permission().await == Permission::Denied {
            return Err(TrackError::PermissionDenied);
        }
        let timeout = self.inner.settings.fix_timeout;
        match tokio::time::timeout(timeout, provider.current_position(timeout, true)).await {
            Ok(fix) => Ok(fix?),
            Err(_) => Err(LocationError::Timeout(timeout).into()),
        }
    }

    /// Classify, append and announce a record
    async fn emit(
        &self,
        user: &UserProfile,
        point: Coordinate,
        at: DateTime<Utc>,
        kind: AttendanceStatus,
        explicit: &[Flag],
    ) -> Result<AttendanceRecord, TrackError> {
        let classification = self
            .inner
            .classifier
            .classify(&user.territory, point, at, kind, explicit);

        let record = AttendanceRecord {
            id: Uuid::new_v4(),
            user_id: user.id.clone(),
            user_name: user.name.clone(),
            timestamp: at,
            kind,
            location: point,
            location_name: classification.location_name,
            flags: classification.flags,
        };
        self.inner.store.append_record(&record).await?;

        let flags: Vec<&str> = record.flags.iter().map(Flag::as_str).collect();
        tracing::info!(
            "Record {} {} for user {} at {} [{}]",
            record.id,
            record.kind.as_str(),
            record.user_id,
            record.location_name,
            flags.join(", ")
        );

        let alert = record.is_alert();
        let _ = self.inner.feed.send(ServerToAdmin::Record {
            record: record.clone(),
            alert,
        });
        Ok(record)
    }

    /// Best effort: a failed status write never undoes the record it follows
    async fn set_presence(
        &self,
        user_id: &str,
        status: UserStatus,
        location: Option<Coordinate>,
        at: DateTime<Utc>,
    ) {
        let update = UserUpdate::presence(status, location, at);
        match self.inner.store.update_user(user_id, &update).await {
            Ok(Some(user)) => self.publish_user(user),
            Ok(None) => tracing::debug!("Presence update for missing user {}", user_id),
            Err(e) => tracing::warn!("Failed to update presence for user {}: {}", user_id, e),
        }
    }

    /// Retire a tracker, but only the one that asked; a newer tracker for
    /// the same user stays.
    fn retire(&self, user_id: &str, tracker_id: Uuid) {
        self.inner
            .trackers
            .remove_if(user_id, |_, handle| handle.id() == tracker_id);
    }

    pub(crate) async fn process_sample(
        &self,
        user_id: &str,
        tracker_id: Uuid,
        sample: Sample,
    ) -> SinkOutcome {
        let _guard = self.lock_user(user_id).await;

        let user = match self.inner.store.get_user(user_id).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                tracing::warn!("Tracked user {} no longer exists", user_id);
                self.retire(user_id, tracker_id);
                return SinkOutcome::Stop;
            }
            Err(e) => {
                tracing::error!("Failed to load user {}: {}", user_id, e);
                return SinkOutcome::Continue;
            }
        };

        let last = match self.inner.store.last_record(user_id).await {
            Ok(last) => last,
            Err(e) => {
                tracing::error!("Failed to load history for user {}: {}", user_id, e);
                return SinkOutcome::Continue;
            }
        };

        if status::derive_status(self.policy(), last.as_ref(), sample.at)
            != AttendanceStatus::CheckedIn
        {
            if status::is_unresolved_carry_over(self.policy(), last.as_ref(), sample.at) {
                tracing::warn!(
                    "Session for user {} rolled over midnight without a punch-out",
                    user_id
                );
            }
            self.retire(user_id, tracker_id);
            return SinkOutcome::Stop;
        }

        let emitted = match sample.origin {
            SampleOrigin::Watch => {
                self.set_presence(user_id, UserStatus::Active, Some(sample.point), sample.at)
                    .await;

                if geo::is_within_territory(sample.point, &user.territory) {
                    return SinkOutcome::Continue;
                }
                if self.inner.dedup.should_suppress(last.as_ref(), sample.at) {
                    tracing::debug!("Suppressing repeat territory alert for user {}", user_id);
                    return SinkOutcome::Continue;
                }
                self.emit(
                    &user,
                    sample.point,
                    sample.at,
                    AttendanceStatus::CheckedIn,
                    &[Flag::AutomatedAlert],
                )
                .await
            }
            SampleOrigin::Poll => {
                self.emit(
                    &user,
                    sample.point,
                    sample.at,
                    AttendanceStatus::CheckedIn,
                    &[Flag::PeriodicCheck],
                )
                .await
            }
        };

        if let Err(e) = emitted {
            tracing::error!("Failed to record sample for user {}: {}", user_id, e);
        }
        SinkOutcome::Continue
    }
}

/// A user's critical section. The lock entry is dropped with its last holder.
struct UserGuard<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    user_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for UserGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks
            .remove_if(&self.user_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Scheduler-facing side of the engine. Holds a weak reference so running
/// trackers never keep the engine alive.
struct EngineSink(Weak<EngineInner>);

#[async_trait::async_trait]
impl SampleSink for EngineSink {
    async fn handle(&self, user_id: &str, tracker_id: Uuid, sample: Sample) -> SinkOutcome {
        match self.0.upgrade() {
            Some(inner) => {
                Engine { inner }
                    .process_sample(user_id, tracker_id, sample)
                    .await
            }
            None => SinkOutcome::Stop,
        }
    }
}
