//! Debounced batched-update queue with bounded retry.
//!
//! Rapid partial updates are merged into a pending set (last write wins
//! per key) and flushed through the injected [`UpdateSink`] once the
//! inactivity timer fires. A single worker task performs every flush, so
//! flushes never overlap. Failed flushes keep the whole batch pending and
//! retry up to a bound; at the bound the batch is surfaced, journaled when
//! a journal is configured, and dropped.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::errors::{Result, SyncError};
use crate::sink::UpdateSink;

/// Inactivity window before a flush, in milliseconds.
pub const DEFAULT_FLUSH_DELAY_MS: u64 = 500;

/// Consecutive flush failures tolerated before a batch is abandoned.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

type FailureHook = Box<dyn Fn(&SyncError, u32) + Send + Sync>;

type AbandonHook<K, V> =
    Box<dyn Fn(u32, Vec<(K, V)>) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Outcome of the most recent failed flush attempt.
#[derive(Clone)]
enum FlushFailure {
    /// The sink rejected the batch; it stays pending for retry.
    Rejected(String),
    /// The batch was dropped at the retry bound.
    Abandoned { attempts: u32, last_error: String },
}

impl FlushFailure {
    fn to_error(&self) -> SyncError {
        match self {
            Self::Rejected(reason) => SyncError::FlushFailed(reason.clone()),
            Self::Abandoned {
                attempts,
                last_error,
            } => SyncError::RetriesExhausted {
                attempts: *attempts,
                last_error: last_error.clone(),
            },
        }
    }
}

struct QueueState<K, V> {
    pending: HashMap<K, V>,
    deadline: Option<Instant>,
    retries: u32,
    last_error: Option<FlushFailure>,
    shutting_down: bool,
}

struct Shared<S: UpdateSink> {
    sink: S,
    state: Mutex<QueueState<S::Key, S::Value>>,
    wake: Notify,
    pending_tx: watch::Sender<bool>,
    cycles_tx: watch::Sender<u64>,
    delay: Duration,
    max_retries: u32,
    on_failure: Option<FailureHook>,
    abandon: Option<AbandonHook<S::Key, S::Value>>,
}

/// Configuration builder for [`UpdateQueue`].
pub struct UpdateQueueBuilder<S: UpdateSink> {
    sink: S,
    delay: Duration,
    max_retries: u32,
    on_failure: Option<FailureHook>,
    abandon: Option<AbandonHook<S::Key, S::Value>>,
}

impl<S: UpdateSink> UpdateQueueBuilder<S> {
    fn new(sink: S) -> Self {
        Self {
            sink,
            delay: Duration::from_millis(DEFAULT_FLUSH_DELAY_MS),
            max_retries: DEFAULT_MAX_RETRIES,
            on_failure: None,
            abandon: None,
        }
    }

    /// Inactivity window to wait after the last `enqueue` before flushing.
    /// Also the pause between retry cycles.
    #[must_use]
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Consecutive failures tolerated before the batch is abandoned.
    #[must_use]
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    /// Callback invoked once per failed flush attempt with the error and
    /// the 1-based attempt number.
    #[must_use]
    pub fn on_failure<F>(mut self, hook: F) -> Self
    where
        F: Fn(&SyncError, u32) + Send + Sync + 'static,
    {
        self.on_failure = Some(Box::new(hook));
        self
    }

    /// Start the worker and hand out the queue.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn build(self) -> UpdateQueue<S> {
        let (pending_tx, pending_rx) = watch::channel(false);
        let (cycles_tx, cycles_rx) = watch::channel(0);
        let shared = Arc::new(Shared {
            sink: self.sink,
            state: Mutex::new(QueueState {
                pending: HashMap::new(),
                deadline: None,
                retries: 0,
                last_error: None,
                shutting_down: false,
            }),
            wake: Notify::new(),
            pending_tx,
            cycles_tx,
            delay: self.delay,
            max_retries: self.max_retries,
            on_failure: self.on_failure,
            abandon: self.abandon,
        });
        let worker = tokio::spawn(run(Arc::clone(&shared)));
        UpdateQueue {
            shared,
            pending_rx,
            cycles_rx,
            worker: Some(worker),
        }
    }
}

#[cfg(feature = "journal")]
impl<S> UpdateQueueBuilder<S>
where
    S: UpdateSink,
    S::Key: serde::Serialize,
    S::Value: serde::Serialize,
{
    /// Persist batches the queue abandons to `journal` instead of
    /// dropping them outright. Journal write failures are logged, never
    /// escalated.
    #[must_use]
    pub fn journal(mut self, journal: crate::journal::Journal) -> Self {
        let journal = Arc::new(journal);
        self.abandon = Some(Box::new(move |attempts, updates| {
            let journal = Arc::clone(&journal);
            Box::pin(async move {
                if let Err(error) = journal.append(attempts, updates).await {
                    log::error!("failed to journal an abandoned batch: {error}");
                }
            })
        }));
        self
    }
}

/// Debounced, retrying update queue in front of an [`UpdateSink`].
///
/// The queue owns a background worker task. Dropping the queue aborts the
/// worker without flushing; call [`UpdateQueue::shutdown`] to drain first.
pub struct UpdateQueue<S: UpdateSink> {
    shared: Arc<Shared<S>>,
    pending_rx: watch::Receiver<bool>,
    cycles_rx: watch::Receiver<u64>,
    worker: Option<JoinHandle<Result<()>>>,
}

impl<S: UpdateSink> UpdateQueue<S> {
    /// Queue with default delay and retry bound.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn new(sink: S) -> Self {
        Self::builder(sink).build()
    }

    /// Start configuring a queue.
    #[must_use]
    pub fn builder(sink: S) -> UpdateQueueBuilder<S> {
        UpdateQueueBuilder::new(sink)
    }

    /// Merge a partial update into the pending set and restart the
    /// inactivity timer. Last write wins per key. Never blocks on I/O.
    pub fn enqueue<I>(&self, updates: I)
    where
        I: IntoIterator<Item = (S::Key, S::Value)>,
    {
        let mut state = self.shared.state.lock();
        let mut merged = false;
        for (key, value) in updates {
            state.pending.insert(key, value);
            merged = true;
        }
        if merged {
            state.deadline = Some(Instant::now() + self.shared.delay);
            drop(state);
            self.shared.wake.notify_one();
        }
    }

    /// Enqueue a single key/value pair.
    pub fn enqueue_one(&self, key: S::Key, value: S::Value) {
        self.enqueue(std::iter::once((key, value)));
    }

    /// Whether a flush is in flight right now.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        *self.pending_rx.borrow()
    }

    /// Watch channel mirroring [`UpdateQueue::is_pending`].
    #[must_use]
    pub fn subscribe_pending(&self) -> watch::Receiver<bool> {
        self.pending_rx.clone()
    }

    /// Number of keys waiting to be flushed.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.shared.state.lock().pending.len()
    }

    /// Flush everything pending right now, without waiting out the
    /// inactivity window, and await the outcome.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::FlushFailed` if the forced flush attempt is
    /// rejected by the sink; the batch stays pending and the normal retry
    /// schedule continues. On the attempt that reaches the retry bound the
    /// batch is abandoned instead (journaled when a journal is configured)
    /// and `SyncError::RetriesExhausted` is returned.
    pub async fn flush_now(&self) -> Result<()> {
        let mut cycles = self.cycles_rx.clone();
        loop {
            {
                let mut state = self.shared.state.lock();
                if state.pending.is_empty() {
                    return Ok(());
                }
                state.deadline = Some(Instant::now());
            }
            self.shared.wake.notify_one();
            if cycles.changed().await.is_err() {
                // Worker gone; nothing more will be flushed.
                return Ok(());
            }
            let last_error = self.shared.state.lock().last_error.clone();
            if let Some(failure) = last_error {
                return Err(failure.to_error());
            }
        }
    }

    /// Stop the worker: await any in-flight flush, attempt one final
    /// flush of whatever is still pending, then exit.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::FlushFailed` if the final flush attempt is
    /// rejected (the remainder is journaled when a journal is configured)
    /// or if the worker terminated abnormally.
    pub async fn shutdown(mut self) -> Result<()> {
        {
            let mut state = self.shared.state.lock();
            state.shutting_down = true;
        }
        self.shared.wake.notify_one();
        match self.worker.take() {
            Some(worker) => worker.await.unwrap_or_else(|join_error| {
                Err(SyncError::FlushFailed(format!(
                    "queue worker terminated abnormally: {join_error}"
                )))
            }),
            None => Ok(()),
        }
    }
}

impl<S: UpdateSink> Drop for UpdateQueue<S> {
    fn drop(&mut self) {
        // We don't join here to avoid blocking; `shutdown` is the
        // graceful path.
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}

enum Step {
    Idle,
    Sleep(Instant),
    Flush,
    Shutdown,
}

fn next_step<S: UpdateSink>(shared: &Shared<S>) -> Step {
    let mut state = shared.state.lock();
    if state.shutting_down {
        return Step::Shutdown;
    }
    match state.deadline {
        Some(deadline) if Instant::now() >= deadline => {
            state.deadline = None;
            Step::Flush
        }
        Some(deadline) => Step::Sleep(deadline),
        None => Step::Idle,
    }
}

async fn run<S: UpdateSink>(shared: Arc<Shared<S>>) -> Result<()> {
    loop {
        match next_step(&shared) {
            Step::Shutdown => break,
            Step::Idle => shared.wake.notified().await,
            Step::Sleep(deadline) => {
                // An enqueue may move the deadline while we sleep; waking
                // on notify re-reads it.
                tokio::select! {
                    () = tokio::time::sleep_until(deadline) => {}
                    () = shared.wake.notified() => {}
                }
            }
            Step::Flush => flush_cycle(&shared).await,
        }
    }
    drain(&shared).await
}

/// One flush cycle: snapshot, apply, reconcile.
async fn flush_cycle<S: UpdateSink>(shared: &Shared<S>) {
    let (snapshot, attempt) = {
        let state = shared.state.lock();
        if state.pending.is_empty() {
            return;
        }
        (state.pending.clone(), state.retries + 1)
    };

    shared.pending_tx.send_replace(true);
    let outcome = shared.sink.apply(snapshot.clone()).await;
    let mut failure = None;
    let mut abandoned = None;
    {
        let mut state = shared.state.lock();
        match outcome {
            Ok(()) => {
                // Clear only keys whose value is unchanged since the
                // snapshot; a newer enqueue keeps its key pending.
                for (key, value) in &snapshot {
                    if state.pending.get(key) == Some(value) {
                        state.pending.remove(key);
                    }
                }
                state.retries = 0;
                state.last_error = None;
                if !state.pending.is_empty() {
                    state.deadline = Some(Instant::now() + shared.delay);
                }
            }
            Err(error) => {
                state.retries += 1;
                let failed = if state.retries >= shared.max_retries {
                    let batch: Vec<_> = state.pending.drain().collect();
                    abandoned = Some((state.retries, batch));
                    let failed = FlushFailure::Abandoned {
                        attempts: state.retries,
                        last_error: error.to_string(),
                    };
                    state.retries = 0;
                    state.deadline = None;
                    failed
                } else {
                    state.deadline = Some(Instant::now() + shared.delay);
                    FlushFailure::Rejected(error.to_string())
                };
                failure = Some(failed.to_error());
                state.last_error = Some(failed);
            }
        }
    }
    shared.pending_tx.send_replace(false);

    match &failure {
        None => log::debug!("flushed {} field(s)", snapshot.len()),
        Some(error) => {
            log::warn!("flush attempt {attempt} failed: {error}");
            if let Some(hook) = &shared.on_failure {
                hook(error, attempt);
            }
        }
    }
    if let Some((attempts, batch)) = abandoned {
        log::error!(
            "abandoning {} update(s) after {attempts} failed flush attempts",
            batch.len()
        );
        if let Some(abandon) = &shared.abandon {
            abandon(attempts, batch).await;
        }
    }
    shared.cycles_tx.send_modify(|cycle| *cycle += 1);
}

/// Final flush at shutdown. Anything the attempt cannot place — a
/// rejected batch, or updates enqueued while it ran — is handed to the
/// abandon hook rather than lost silently.
async fn drain<S: UpdateSink>(shared: &Shared<S>) -> Result<()> {
    let (snapshot, attempt) = {
        let mut state = shared.state.lock();
        state.deadline = None;
        if state.pending.is_empty() {
            return Ok(());
        }
        (state.pending.clone(), state.retries + 1)
    };

    shared.pending_tx.send_replace(true);
    let outcome = shared.sink.apply(snapshot.clone()).await;
    shared.pending_tx.send_replace(false);

    let result = match outcome {
        Ok(()) => {
            let mut state = shared.state.lock();
            for (key, value) in &snapshot {
                if state.pending.get(key) == Some(value) {
                    state.pending.remove(key);
                }
            }
            state.retries = 0;
            log::debug!("drained {} field(s) at shutdown", snapshot.len());
            Ok(())
        }
        Err(error) => {
            let error = SyncError::FlushFailed(error.to_string());
            log::warn!("final flush attempt {attempt} failed: {error}");
            if let Some(hook) = &shared.on_failure {
                hook(&error, attempt);
            }
            Err(error)
        }
    };

    let leftovers: Vec<_> = {
        let mut state = shared.state.lock();
        state.pending.drain().collect()
    };
    if !leftovers.is_empty() {
        let attempts = if result.is_ok() { 0 } else { attempt };
        log::error!(
            "abandoning {} update(s) still unflushed at shutdown",
            leftovers.len()
        );
        if let Some(abandon) = &shared.abandon {
            abandon(attempts, leftovers).await;
        }
    }
    result
}
