//! # Status Provider
//!
//! Owns the single polling loop and the observable [`ProviderSnapshot`].
//!
//! - Every refresh takes a sequence number when it starts. A result is only
//!   applied if its sequence is newer than the last applied one, so a slow
//!   stale response never overwrites a newer snapshot.
//! - The stale check, backend canonicalization and publication run under one
//!   lock. Backend session state (the previous job state) only ever sees
//!   readings in sequence order, and stale readings are never canonicalized.
//! - Listeners receive snapshots in publication order, even when refreshes
//!   complete on different threads.
//! - `has_ever_connected` goes `false -> true` once and never back.
//! - A failed refresh keeps the last good status and only flips `connected`.
//! - Continuous kinematic polling is a mode of the same loop, not a second
//!   poller.
//!
//! Collaborators observe the snapshot through [`StatusProvider::subscribe`]
//! (a `watch` receiver), [`StatusProvider::updates`] (a stream) or plain
//! callbacks registered with [`StatusProvider::add_listener`].

// src/provider/mod.rs - Polling loop and snapshot publication
pub mod backoff;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_stream::stream;
use chrono::{DateTime, Utc};
use futures_core::Stream;
use orion_shared::{CanonicalStatus, KinematicStatus};
use tokio::sync::{broadcast, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::backend::{Backend, StatusReading};
use crate::config::PollingConfig;
use crate::error::BackendError;

pub use backoff::ExponentialBackoff;

/// What collaborators see after each refresh.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderSnapshot {
    /// Poll sequence of the refresh that produced this snapshot.
    pub sequence: u64,
    pub status: CanonicalStatus,
    pub kinematics: Option<KinematicStatus>,
    pub has_ever_connected: bool,
    pub connected: bool,
    pub continuous_polling: bool,
    pub last_error: Option<String>,
    pub last_success_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub type Listener = Arc<dyn Fn(&ProviderSnapshot) + Send + Sync>;

struct Inner {
    backend: Arc<dyn Backend>,
    polling: PollingConfig,
    snapshot_tx: watch::Sender<ProviderSnapshot>,
    last_attempt: Mutex<Option<Instant>>,
    next_sequence: AtomicU64,
    /// Highest applied sequence. Held across canonicalize, publish and enqueue.
    publication: Mutex<u64>,
    /// Published snapshots not yet handed to listeners.
    pending: Mutex<VecDeque<ProviderSnapshot>>,
    draining: AtomicBool,
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    next_listener: AtomicU64,
    continuous: AtomicBool,
    mode_changed: Notify,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cheap to clone; clones share the same snapshot and loop.
#[derive(Clone)]
pub struct StatusProvider {
    inner: Arc<Inner>,
}

/// Handle to the background poller started by [`StatusProvider::spawn`].
pub struct PollerHandle {
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.task.await {
            tracing::error!("Status poller task failed: {}", e);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl StatusProvider {
    pub fn new(backend: Arc<dyn Backend>, polling: PollingConfig) -> Self {
        let (snapshot_tx, _) = watch::channel(ProviderSnapshot::default());
        Self {
            inner: Arc::new(Inner {
                backend,
                polling,
                snapshot_tx,
                last_attempt: Mutex::new(None),
                next_sequence: AtomicU64::new(1),
                publication: Mutex::new(0),
                pending: Mutex::new(VecDeque::new()),
                draining: AtomicBool::new(false),
                listeners: Mutex::new(Vec::new()),
                next_listener: AtomicU64::new(1),
                continuous: AtomicBool::new(false),
                mode_changed: Notify::new(),
            }),
        }
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.inner.backend
    }

    pub fn snapshot(&self) -> ProviderSnapshot {
        self.inner.snapshot_tx.borrow().clone()
    }

    pub fn has_ever_connected(&self) -> bool {
        self.inner.snapshot_tx.borrow().has_ever_connected
    }

    pub fn subscribe(&self) -> watch::Receiver<ProviderSnapshot> {
        self.inner.snapshot_tx.subscribe()
    }

    /// Current snapshot first, then every published change.
    pub fn updates(&self) -> impl Stream<Item = ProviderSnapshot> + Send + 'static {
        let mut rx = self.subscribe();
        stream! {
            loop {
                let snapshot = rx.borrow_and_update().clone();
                yield snapshot;
                if rx.changed().await.is_err() {
                    break;
                }
            }
        }
    }

    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ProviderSnapshot) + Send + Sync + 'static,
    {
        let id = ListenerId(self.inner.next_listener.fetch_add(1, Ordering::Relaxed));
        lock(&self.inner.listeners).push((id, Arc::new(listener)));
        id
    }

    /// Returns whether the listener was registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = lock(&self.inner.listeners);
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Queues `snapshot` for listeners. Callers hold the publication lock, so
    /// the queue is in publication order.
    fn enqueue(&self, snapshot: ProviderSnapshot) {
        lock(&self.inner.pending).push_back(snapshot);
    }

    /// Hands queued snapshots to listeners. One caller delivers at a time;
    /// snapshots queued meanwhile are picked up by that caller. Listeners may
    /// call back into the provider.
    fn drain_listeners(&self) {
        loop {
            if self
                .inner
                .draining
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return;
            }
            loop {
                let next = lock(&self.inner.pending).pop_front();
                let Some(snapshot) = next else { break };
                let listeners: Vec<Listener> = lock(&self.inner.listeners)
                    .iter()
                    .map(|(_, listener)| listener.clone())
                    .collect();
                for listener in listeners {
                    listener(&snapshot);
                }
            }
            self.inner.draining.store(false, Ordering::Release);
            if lock(&self.inner.pending).is_empty() {
                return;
            }
        }
    }

    fn publish(&self, modify: impl FnOnce(&mut ProviderSnapshot)) -> ProviderSnapshot {
        let mut published = None;
        self.inner.snapshot_tx.send_modify(|snapshot| {
            modify(snapshot);
            published = Some(snapshot.clone());
        });
        published.unwrap_or_else(|| self.snapshot())
    }

    /// Fetches, canonicalizes and publishes a fresh status. Without `force`,
    /// a refresh inside the status TTL returns the current snapshot untouched.
    pub async fn refresh(&self, force: bool) -> Result<ProviderSnapshot, BackendError> {
        let sequence = {
            let mut last_attempt = lock(&self.inner.last_attempt);
            let now = Instant::now();
            let fresh = last_attempt
                .is_some_and(|at| now.duration_since(at) < self.inner.polling.status_ttl());
            if !force && fresh {
                return Ok(self.snapshot());
            }
            *last_attempt = Some(now);
            self.next_sequence()
        };

        let reading = self.inner.backend.fetch_status().await;
        self.apply(sequence, reading)
    }

    fn next_sequence(&self) -> u64 {
        self.inner.next_sequence.fetch_add(1, Ordering::SeqCst)
    }

    fn apply(
        &self,
        sequence: u64,
        reading: Result<StatusReading, BackendError>,
    ) -> Result<ProviderSnapshot, BackendError> {
        let mut applied = lock(&self.inner.publication);
        if sequence <= *applied {
            tracing::debug!(sequence, applied = *applied, "dropping stale status result");
            drop(applied);
            return reading.map(|_| self.snapshot());
        }
        *applied = sequence;

        let outcome = match reading {
            Ok(reading) => {
                let status = self.inner.backend.canonicalize(reading);
                let first_contact = !self.has_ever_connected();
                if status.finished {
                    tracing::info!(sequence, "print job finished");
                }
                let snapshot = self.publish(|snapshot| {
                    snapshot.sequence = sequence;
                    snapshot.status = status;
                    snapshot.has_ever_connected = true;
                    snapshot.connected = true;
                    snapshot.last_error = None;
                    snapshot.last_success_at = Some(Utc::now());
                });
                if first_contact {
                    tracing::info!(backend = %self.inner.backend.kind(), "connected to backend");
                }
                self.enqueue(snapshot.clone());
                Ok(snapshot)
            }
            Err(e) => {
                let was_connected = self.inner.snapshot_tx.borrow().connected;
                let message = e.to_string();
                let snapshot = self.publish(|snapshot| {
                    snapshot.sequence = sequence;
                    snapshot.connected = false;
                    snapshot.last_error = Some(message);
                });
                if was_connected {
                    tracing::warn!(error = %e, "lost connection to backend");
                    self.enqueue(snapshot);
                } else {
                    tracing::debug!(error = %e, "status refresh failed");
                }
                Err(e)
            }
        };
        drop(applied);
        self.drain_listeners();
        outcome
    }

    pub fn continuous_kinematic_polling(&self) -> bool {
        self.inner.continuous.load(Ordering::SeqCst)
    }

    /// Switches the poll loop between the baseline and the near real-time
    /// interval. Takes effect immediately.
    pub fn set_continuous_kinematic_polling(&self, enabled: bool) {
        let previous = self.inner.continuous.swap(enabled, Ordering::SeqCst);
        if previous == enabled {
            return;
        }
        tracing::debug!(enabled, "continuous kinematic polling");
        self.publish(|snapshot| snapshot.continuous_polling = enabled);
        self.inner.mode_changed.notify_one();
    }

    fn current_interval(&self) -> Duration {
        if self.continuous_kinematic_polling() {
            self.inner.polling.continuous_interval()
        } else {
            self.inner.polling.interval()
        }
    }

    fn publish_kinematics(&self, kinematics: KinematicStatus) -> ProviderSnapshot {
        let guard = lock(&self.inner.publication);
        let snapshot = self.publish(|snapshot| snapshot.kinematics = Some(kinematics));
        self.enqueue(snapshot.clone());
        drop(guard);
        self.drain_listeners();
        snapshot
    }

    /// Polls the kinematic status until a valid reading that differs from the
    /// published one shows up, at most `max_attempts` times. When every
    /// reading matches, the last valid one is returned.
    pub async fn refresh_kinematic_status(&self, max_attempts: u32) -> Option<KinematicStatus> {
        let previous = self.inner.snapshot_tx.borrow().kinematics;
        let polling = &self.inner.polling;
        let mut backoff = ExponentialBackoff::new(
            Duration::from_millis(polling.kinematic_retry_ms),
            Duration::from_millis(polling.kinematic_retry_max_ms),
        );
        let mut last_valid = None;

        for attempt in 1..=max_attempts {
            match self.inner.backend.get_kinematic_status().await {
                Ok(reading) if reading.is_valid() => {
                    if previous != Some(reading) {
                        self.publish_kinematics(reading);
                        return Some(reading);
                    }
                    last_valid = Some(reading);
                }
                Ok(reading) => {
                    tracing::debug!(attempt, ?reading, "ignoring invalid kinematic reading");
                }
                Err(e) => {
                    tracing::debug!(attempt, error = %e, "kinematic status fetch failed");
                }
            }
            if attempt < max_attempts {
                tokio::time::sleep(backoff.next_delay()).await;
            }
        }

        if let Some(reading) = last_valid {
            self.publish_kinematics(reading);
        } else {
            tracing::warn!(max_attempts, "no valid kinematic reading");
        }
        last_valid
    }

    /// Marks the published axis as not homed. Called after an emergency stop.
    pub fn clear_homed_status(&self) {
        let guard = lock(&self.inner.publication);
        let homed = self
            .inner
            .snapshot_tx
            .borrow()
            .kinematics
            .is_some_and(|k| k.homed);
        if !homed {
            return;
        }
        let snapshot = self.publish(|snapshot| {
            if let Some(kinematics) = snapshot.kinematics.as_mut() {
                kinematics.homed = false;
            }
        });
        tracing::info!("homed status cleared");
        self.enqueue(snapshot);
        drop(guard);
        self.drain_listeners();
    }

    /// Homes the Z axis and then tracks the resulting kinematic status.
    pub async fn home(&self) -> bool {
        let ok = self.inner.backend.home().await;
        if ok {
            self.refresh_kinematic_status(self.inner.polling.kinematic_attempts)
                .await;
        }
        ok
    }

    /// Stops all motion. Homing is invalidated whatever the backend replied.
    pub async fn emergency_stop(&self) -> bool {
        let ok = self.inner.backend.emergency_stop().await;
        self.clear_homed_status();
        ok
    }

    /// Forgets per-session backend state, e.g. on reconnect or backend switch.
    /// Refreshes started before the reset are dropped as stale.
    pub fn reset_session(&self) {
        let mut applied = lock(&self.inner.publication);
        *applied = (*applied).max(self.next_sequence());
        self.inner.backend.reset_session();
        drop(applied);
        *lock(&self.inner.last_attempt) = None;
    }

    /// Initial connection with capped exponential backoff. Returns whether a
    /// status was ever received.
    pub async fn connect(&self) -> bool {
        let polling = &self.inner.polling;
        let mut backoff = ExponentialBackoff::new(
            Duration::from_millis(polling.startup_backoff_ms),
            Duration::from_millis(polling.startup_backoff_max_ms),
        );
        for attempt in 1..=polling.startup_attempts.max(1) {
            match self.refresh(true).await {
                Ok(_) => return true,
                Err(e) => {
                    if attempt == polling.startup_attempts.max(1) {
                        tracing::warn!(attempt, error = %e, "backend unreachable, continuing with regular polling");
                        break;
                    }
                    let delay = backoff.next_delay();
                    tracing::info!(attempt, retry_in_ms = delay.as_millis() as u64, error = %e, "waiting for backend");
                    tokio::time::sleep(delay).await;
                }
            }
        }
        false
    }

    async fn poll_once(&self) {
        // Failures are already recorded on the snapshot.
        let _ = self.refresh(true).await;
        if self.continuous_kinematic_polling() {
            match self.inner.backend.get_kinematic_status().await {
                Ok(reading) if reading.is_valid() => {
                    let changed = self.inner.snapshot_tx.borrow().kinematics != Some(reading);
                    if changed {
                        self.publish_kinematics(reading);
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::debug!(error = %e, "kinematic poll failed"),
            }
        }
    }

    /// Starts the polling loop: startup connection first, then one refresh
    /// per interval until [`PollerHandle::shutdown`].
    pub fn spawn(&self) -> PollerHandle {
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        let provider = self.clone();
        let task = tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Status poller shutting down");
                    return;
                }
                _ = provider.connect() => {}
            }

            let mut ticker = tokio::time::interval(provider.current_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Status poller shutting down");
                        break;
                    }
                    _ = provider.inner.mode_changed.notified() => {
                        ticker = tokio::time::interval(provider.current_interval());
                        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                    }
                    _ = ticker.tick() => {
                        provider.poll_once().await;
                    }
                }
            }
        });
        PollerHandle { shutdown_tx, task }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendKind, FileListing, PrinterBackend, PrinterCommands, Thumbnail, ThumbnailSize};
    use async_trait::async_trait;
    use orion_shared::PrintStatus;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct ScriptedBackend {
        statuses: Mutex<VecDeque<Result<CanonicalStatus, BackendError>>>,
        kinematics: Mutex<VecDeque<KinematicStatus>>,
        status_calls: AtomicUsize,
        canonicalized: AtomicUsize,
        /// Per-call fetch delays in milliseconds, cycled.
        delays_ms: Vec<u64>,
        stop_ok: bool,
    }

    impl ScriptedBackend {
        fn push_status(&self, result: Result<CanonicalStatus, BackendError>) {
            lock(&self.statuses).push_back(result);
        }
    }

    fn printing() -> CanonicalStatus {
        CanonicalStatus { status: PrintStatus::Printing, ..Default::default() }
    }

    fn offline() -> BackendError {
        BackendError::Transport { url: "http://printer/status".into(), message: "refused".into() }
    }

    #[async_trait]
    impl PrinterBackend for ScriptedBackend {
        fn kind(&self) -> BackendKind {
            BackendKind::Odyssey
        }
        async fn fetch_status(&self) -> Result<StatusReading, BackendError> {
            let call = self.status_calls.fetch_add(1, Ordering::SeqCst);
            if !self.delays_ms.is_empty() {
                let delay = self.delays_ms[call % self.delays_ms.len()];
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            let next = lock(&self.statuses).pop_front();
            next.unwrap_or_else(|| Ok(CanonicalStatus::default())).map(StatusReading::Canonical)
        }
        fn canonicalize(&self, reading: StatusReading) -> CanonicalStatus {
            self.canonicalized.fetch_add(1, Ordering::SeqCst);
            match reading {
                StatusReading::Canonical(status) => status,
                StatusReading::NanoDlp(_) => CanonicalStatus::default(),
            }
        }
        async fn get_kinematic_status(&self) -> Result<KinematicStatus, BackendError> {
            let mut queue = lock(&self.kinematics);
            if queue.len() > 1 {
                Ok(queue.pop_front().unwrap())
            } else {
                queue.front().copied().ok_or_else(offline)
            }
        }
        async fn get_printer_config(&self) -> Result<serde_json::Value, BackendError> {
            Ok(serde_json::Value::Null)
        }
        async fn list_items(&self, _: &str, _: usize, _: usize, _: &str) -> Result<FileListing, BackendError> {
            Ok(FileListing::default())
        }
        async fn get_file_thumbnail(&self, _: &str, _: &str, _: ThumbnailSize) -> Result<Thumbnail, BackendError> {
            Ok(Thumbnail::Placeholder)
        }
        async fn manual_command(&self, _: &str) -> Result<(), BackendError> {
            Ok(())
        }
        fn reset_session(&self) {}
    }

    #[async_trait]
    impl PrinterCommands for ScriptedBackend {
        async fn home(&self) -> bool { true }
        async fn move_to(&self, _: f64) -> bool { true }
        async fn move_delta(&self, _: f64) -> bool { true }
        async fn move_to_top(&self) -> bool { true }
        async fn move_to_floor(&self) -> bool { true }
        async fn set_z_offset(&self, _: f64) -> bool { true }
        async fn reset_z_offset(&self) -> bool { true }
        async fn emergency_stop(&self) -> bool { self.stop_ok }
        async fn display_test(&self, _: &str) -> bool { true }
        async fn cure(&self, _: bool) -> bool { true }
        async fn tare_force_sensor(&self) -> bool { false }
    }

    fn provider(backend: Arc<ScriptedBackend>) -> StatusProvider {
        StatusProvider::new(backend, PollingConfig::default())
    }

    #[tokio::test]
    async fn failure_keeps_last_good_status_and_connection_flag_is_sticky() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.push_status(Ok(printing()));
        backend.push_status(Err(offline()));
        let provider = provider(backend.clone());

        let first = provider.refresh(true).await.unwrap();
        assert!(first.has_ever_connected && first.connected);

        assert!(provider.refresh(true).await.is_err());
        let snapshot = provider.snapshot();
        assert_eq!(snapshot.status.status, PrintStatus::Printing);
        assert!(snapshot.has_ever_connected);
        assert!(!snapshot.connected);
        assert!(snapshot.last_error.is_some());
        assert!(snapshot.sequence > first.sequence);
    }

    #[tokio::test(start_paused = true)]
    async fn non_forced_refresh_respects_ttl() {
        let backend = Arc::new(ScriptedBackend::default());
        let provider = provider(backend.clone());

        provider.refresh(false).await.unwrap();
        provider.refresh(false).await.unwrap();
        assert_eq!(backend.status_calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_millis(600)).await;
        provider.refresh(false).await.unwrap();
        assert_eq!(backend.status_calls.load(Ordering::SeqCst), 2);

        provider.refresh(true).await.unwrap();
        assert_eq!(backend.status_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stale_results_are_not_applied() {
        let backend = Arc::new(ScriptedBackend::default());
        let provider = provider(backend.clone());

        provider.apply(5, Ok(StatusReading::Canonical(printing()))).unwrap();
        let after_stale = provider
            .apply(3, Ok(StatusReading::Canonical(CanonicalStatus::default())))
            .unwrap();
        assert_eq!(after_stale.sequence, 5);
        assert_eq!(after_stale.status.status, PrintStatus::Printing);
        // The stale reading never reached the backend's session state.
        assert_eq!(backend.canonicalized.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stale_error_does_not_mark_disconnected() {
        let backend = Arc::new(ScriptedBackend::default());
        let provider = provider(backend);

        provider.apply(4, Ok(StatusReading::Canonical(printing()))).unwrap();
        assert!(provider.apply(2, Err(offline())).is_err());
        let snapshot = provider.snapshot();
        assert!(snapshot.connected);
        assert_eq!(snapshot.sequence, 4);
    }

    #[tokio::test]
    async fn refresh_started_before_session_reset_is_dropped() {
        let backend = Arc::new(ScriptedBackend::default());
        let provider = provider(backend.clone());

        let in_flight = provider.next_sequence();
        provider.reset_session();
        let snapshot = provider.apply(in_flight, Ok(StatusReading::Canonical(printing()))).unwrap();
        assert_eq!(snapshot.status.status, PrintStatus::Idle);
        assert_eq!(backend.canonicalized.load(Ordering::SeqCst), 0);

        provider.refresh(true).await.unwrap();
        assert_eq!(backend.canonicalized.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn overlapping_refreshes_publish_in_sequence_order() {
        let backend = Arc::new(ScriptedBackend {
            delays_ms: vec![9, 1, 5, 0, 7, 3, 2],
            ..Default::default()
        });
        let provider = provider(backend);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        provider.add_listener(move |snapshot| lock(&sink).push(snapshot.sequence));

        let tasks: Vec<_> = (0..48)
            .map(|_| {
                let provider = provider.clone();
                tokio::spawn(async move { provider.refresh(true).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let seen = lock(&seen).clone();
        assert!(!seen.is_empty());
        assert!(seen.windows(2).all(|pair| pair[0] < pair[1]), "listeners went backwards: {seen:?}");
        assert_eq!(provider.snapshot().sequence, *seen.last().unwrap());
    }

    #[tokio::test]
    async fn listener_may_call_back_into_the_provider() {
        let backend = Arc::new(ScriptedBackend::default());
        lock(&backend.kinematics).push_back(KinematicStatus { homed: true, position: 1.0, offset: 0.0 });
        let provider = provider(backend);
        assert!(provider.refresh_kinematic_status(1).await.is_some());

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let reentrant = provider.clone();
        provider.add_listener(move |snapshot| {
            lock(&sink).push(snapshot.kinematics.map(|k| k.homed));
            reentrant.clear_homed_status();
        });

        provider.refresh(true).await.unwrap();
        assert_eq!(*lock(&seen), vec![Some(true), Some(false)]);
    }

    #[tokio::test]
    async fn listeners_fire_on_success_and_can_be_removed() {
        let backend = Arc::new(ScriptedBackend::default());
        let provider = provider(backend);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let id = provider.add_listener(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        provider.refresh(true).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert!(provider.remove_listener(id));
        assert!(!provider.remove_listener(id));
        provider.refresh(true).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn kinematic_refresh_waits_for_a_changed_reading() {
        let backend = Arc::new(ScriptedBackend::default());
        {
            let mut queue = lock(&backend.kinematics);
            queue.push_back(KinematicStatus { homed: false, position: f64::NAN, offset: 0.0 });
            queue.push_back(KinematicStatus { homed: true, position: 0.0, offset: 0.0 });
        }
        let provider = provider(backend);

        let reading = provider.refresh_kinematic_status(5).await.unwrap();
        assert!(reading.homed);
        assert_eq!(provider.snapshot().kinematics, Some(reading));
    }

    #[tokio::test]
    async fn kinematic_refresh_gives_up_after_max_attempts() {
        let backend = Arc::new(ScriptedBackend::default());
        let provider = StatusProvider::new(
            backend,
            PollingConfig { kinematic_retry_ms: 1, kinematic_retry_max_ms: 2, ..Default::default() },
        );
        assert_eq!(provider.refresh_kinematic_status(3).await, None);
    }

    #[tokio::test]
    async fn emergency_stop_clears_homed_even_when_command_fails() {
        let backend = Arc::new(ScriptedBackend::default());
        lock(&backend.kinematics).push_back(KinematicStatus { homed: true, position: 10.0, offset: 0.0 });
        let provider = provider(backend);

        assert!(provider.home().await);
        assert!(provider.snapshot().kinematics.unwrap().homed);

        assert!(!provider.emergency_stop().await);
        assert!(!provider.snapshot().kinematics.unwrap().homed);
    }

    #[tokio::test]
    async fn continuous_mode_is_published() {
        let backend = Arc::new(ScriptedBackend::default());
        let provider = provider(backend);
        let mut rx = provider.subscribe();

        provider.set_continuous_kinematic_polling(true);
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().continuous_polling);
        assert_eq!(provider.current_interval(), Duration::from_millis(100));

        provider.set_continuous_kinematic_polling(false);
        assert_eq!(provider.current_interval(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn poller_refreshes_until_shut_down() {
        let backend = Arc::new(ScriptedBackend::default());
        let provider = provider(backend.clone());
        let handle = provider.spawn();

        tokio::time::sleep(Duration::from_millis(2500)).await;
        let calls = backend.status_calls.load(Ordering::SeqCst);
        assert!(calls >= 3, "expected startup refresh plus ticks, got {calls}");
        assert!(provider.has_ever_connected());

        handle.shutdown().await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(backend.status_calls.load(Ordering::SeqCst), calls);
    }
}
