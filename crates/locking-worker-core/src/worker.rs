//! The lock acquisition and monitoring state machine.

use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use rand::Rng;
use tokio::task::JoinHandle;
use tracing::{debug, field, info, instrument, warn, Instrument, Span};

use crate::error::LockResult;
use crate::events::{LockEvent, LockEventSink};
use crate::options::{LockOptions, StatusVerbosity};
use crate::state::LockState;
use crate::timer::PollTimer;
use crate::traits::{LockStore, TxOutcome, WatchSession};
use crate::value::{LockValue, DONE_VALUE};

/// One unit of protocol work, run exactly once per scheduled fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tick {
    Acquire,
    Check { last_observed: Option<u32> },
    Reacquire { attempt: u32 },
}

/// What the control flow does after a tick.
#[derive(Debug)]
enum Step {
    /// Run the next tick immediately.
    Now(Tick),
    /// Run the next tick after one poll interval.
    Later(Tick),
    /// End the control flow in the given state.
    Stop(LockState),
}

/// A contender for one lock key.
///
/// Cloning is cheap and yields a handle to the same contender, so the
/// owner can keep one clone to call [`done`](Self::done) after the task
/// spawned by [`acquire`](Self::acquire) reported `Acquired`.
///
/// # Example
///
/// ```rust,ignore
/// let (tx, mut rx) = event_channel();
/// let worker = LockingWorker::new(store, LockOptions::new("nightly-report")?, tx);
/// worker.acquire();
///
/// while let Some(event) = rx.recv().await {
///     if let LockEvent::Acquired { last_attempt } = event {
///         build_report().await?;
///         worker.done(last_attempt).await?;
///     }
/// }
/// ```
pub struct LockingWorker<S: LockStore> {
    inner: Arc<WorkerInner<S>>,
}

impl<S: LockStore> Clone for LockingWorker<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct WorkerInner<S: LockStore> {
    id: String,
    store: Arc<S>,
    options: LockOptions,
    sink: Box<dyn LockEventSink>,
    state: Mutex<LockState>,
}

impl<S: LockStore> LockingWorker<S> {
    /// Creates a contender that reports to `sink`.
    pub fn new<K>(store: Arc<S>, options: LockOptions, sink: K) -> Self
    where
        K: LockEventSink + 'static,
    {
        Self {
            inner: Arc::new(WorkerInner {
                id: create_worker_id(),
                store,
                options,
                sink: Box::new(sink),
                state: Mutex::new(LockState::Idle),
            }),
        }
    }

    /// Unique id of this contender, used in log fields.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Returns the worker configuration.
    pub fn options(&self) -> &LockOptions {
        &self.inner.options
    }

    /// Returns the store this worker talks to.
    pub fn store(&self) -> &Arc<S> {
        &self.inner.store
    }

    /// Returns the current local state.
    pub fn state(&self) -> LockState {
        self.inner.state()
    }

    /// Starts contending for the lock.
    ///
    /// The protocol runs on a spawned task that keeps polling until the lock
    /// is owned, observed finished, or given up on. The returned handle
    /// resolves to the state the control flow ended in.
    ///
    /// A contender runs one control flow at a time. While a flow is running
    /// or the lock is owned, the call starts nothing and the handle resolves
    /// at once to the current state.
    pub fn acquire(&self) -> JoinHandle<LockState> {
        let inner = self.inner.clone();
        if let Err(state) = inner.begin() {
            warn!(worker.id = %inner.id, %state, "acquire called while already contending");
            return tokio::spawn(async move { state });
        }

        let span = tracing::info_span!(
            "locking_worker",
            worker.id = %inner.id,
            lock.key = %inner.options.lock_key,
            backend = inner.store.backend(),
        );
        tokio::spawn(inner.run().instrument(span))
    }

    /// Reports that the work guarded by the lock has finished.
    ///
    /// With `last_attempt` the key is deleted outright, since no contender
    /// can reclaim past the maximum counter. Otherwise the key is overwritten
    /// with the done sentinel for the next poller to clean up. Neither write
    /// is conditional: the caller is assumed to still hold the claim.
    #[instrument(skip(self), fields(worker.id = %self.inner.id, lock.key = %self.inner.options.lock_key, backend = self.inner.store.backend()))]
    pub async fn done(&self, last_attempt: bool) -> LockResult<()> {
        let inner = &self.inner;
        let state = inner.state();
        if !matches!(state, LockState::Owned { .. }) {
            warn!(%state, "done called while not owning the lock");
        }

        let key = &inner.options.lock_key;
        if last_attempt {
            inner.store.delete(key).await?;
        } else {
            inner.store.set(key, DONE_VALUE).await?;
        }

        info!("work marked done");
        inner.set_state(LockState::Terminated);
        Ok(())
    }
}

impl<S: LockStore> WorkerInner<S> {
    fn state(&self) -> LockState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: LockState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Moves an idle or finished contender to `AwaitingFirstAcquire`.
    fn begin(&self) -> Result<(), LockState> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match *state {
            LockState::Idle | LockState::Terminated | LockState::Exhausted => {
                *state = LockState::AwaitingFirstAcquire;
                Ok(())
            }
            busy => Err(busy),
        }
    }

    fn key(&self) -> &str {
        &self.options.lock_key
    }

    fn emit(&self, event: LockEvent) {
        debug!(%event, "lock event");
        self.sink.notify(event);
    }

    fn status(&self, verbosity: StatusVerbosity, message: impl Into<String>) {
        let message = message.into();
        debug!(%verbosity, %message, "lock status");
        if verbosity >= self.options.verbosity {
            self.sink.notify(LockEvent::Status { message, verbosity });
        }
    }

    fn status_verbose(&self, message: impl Into<String>) {
        self.status(StatusVerbosity::Verbose, message);
    }

    fn status_normal(&self, message: impl Into<String>) {
        self.status(StatusVerbosity::Normal, message);
    }

    async fn run(self: Arc<Self>) -> LockState {
        let mut timer = PollTimer::new(self.options.poll_interval);
        let mut tick = Tick::Acquire;

        loop {
            let step = match self.tick(tick).await {
                Ok(step) => step,
                Err(err) => {
                    warn!(error = %err, ?tick, "store command failed, abandoning");
                    self.emit(LockEvent::Error(err));
                    Step::Stop(LockState::Terminated)
                }
            };

            match step {
                Step::Now(next) => tick = next,
                Step::Later(next) => tick = timer.schedule(next).await,
                Step::Stop(state) => {
                    self.set_state(state);
                    info!(%state, polls = timer.fired(), "control flow finished");
                    return state;
                }
            }
        }
    }

    async fn tick(&self, tick: Tick) -> LockResult<Step> {
        match tick {
            Tick::Acquire => self.acquire().await,
            Tick::Check { last_observed } => self.check_lock(last_observed).await,
            Tick::Reacquire { attempt } => self.reacquire_lock(attempt).await,
        }
    }

    #[instrument(skip(self), fields(outcome = field::Empty))]
    async fn acquire(&self) -> LockResult<Step> {
        self.set_state(LockState::AwaitingFirstAcquire);

        let first = LockValue::FIRST_ATTEMPT;
        let created = self
            .store
            .create_if_absent(self.key(), &first.to_store_value())
            .await?;

        if created {
            Span::current().record("outcome", "acquired");
            let owned = LockState::Owned { attempt: 1 };
            self.set_state(owned);
            self.emit(LockEvent::Acquired {
                last_attempt: false,
            });
            Ok(Step::Stop(owned))
        } else {
            Span::current().record("outcome", "locked");
            self.emit(LockEvent::Locked);
            Ok(self.poll_again(first.attempt()))
        }
    }

    #[instrument(skip(self), fields(observed = field::Empty, outcome = field::Empty))]
    async fn check_lock(&self, last_observed: Option<u32>) -> LockResult<Step> {
        match last_observed {
            Some(n) => self.status_verbose(format!("Checking status of work from attempt #{n}")),
            None => self.status_verbose("Checking status of work"),
        }

        let watch = self.store.watch(self.key()).await?;
        let raw = match watch.transactional_get().await? {
            TxOutcome::Committed(raw) => raw,
            TxOutcome::Aborted => {
                Span::current().record("outcome", "aborted");
                self.status_normal(
                    "Lock value changed while it was being checked, someone else got the lock",
                );
                let current = self.observe_counter().await?;
                return Ok(self.poll_again(current));
            }
        };

        let span = Span::current();
        match LockValue::parse_optional(raw.as_deref())? {
            None => {
                span.record("outcome", "gone");
                self.status_normal(
                    "Lock key is gone, someone else completed the work and deleted the lock",
                );
                Ok(Step::Stop(LockState::Terminated))
            }
            Some(LockValue::Done) => {
                span.record("outcome", "done");
                self.finish_cleanup().await
            }
            Some(LockValue::Attempt(current)) if Some(current) == last_observed => {
                span.record("observed", current);
                span.record("outcome", "stalled");
                self.status_normal(format!(
                    "Work was not completed, trying to reacquire lock for attempt #{current}"
                ));
                self.set_state(LockState::Reacquiring { observed: current });
                Ok(Step::Now(Tick::Reacquire { attempt: current }))
            }
            Some(LockValue::Attempt(current)) => {
                span.record("observed", current);
                span.record("outcome", "progressed");
                let expected = last_observed.map_or_else(|| "nothing".to_string(), |n| n.to_string());
                self.status_verbose(format!(
                    "Attempt count has been incremented (expected {expected}, but it's {current}), someone else got the lock"
                ));
                Ok(self.poll_again(Some(current)))
            }
        }
    }

    #[instrument(skip(self), fields(observed = field::Empty, outcome = field::Empty))]
    async fn reacquire_lock(&self, attempt: u32) -> LockResult<Step> {
        self.status_verbose("Trying to reacquire lock");

        let mut watch = self.store.watch(self.key()).await?;
        let raw = watch.get().await?;
        let current = match LockValue::parse_optional(raw.as_deref()) {
            Ok(current) => current,
            Err(err) => {
                if let Err(unwatch_err) = watch.unwatch().await {
                    warn!(error = %unwatch_err, "failed to release watch on corrupt lock value");
                }
                return Err(err);
            }
        };

        let span = Span::current();
        let current = match current {
            None => {
                span.record("outcome", "gone");
                watch.unwatch().await?;
                self.status_verbose("Lock is gone, someone else completed the work!");
                return Ok(Step::Stop(LockState::Terminated));
            }
            Some(LockValue::Done) => {
                span.record("outcome", "done");
                watch.unwatch().await?;
                return self.finish_cleanup().await;
            }
            Some(LockValue::Attempt(current)) => current,
        };

        span.record("observed", current);
        self.status_verbose(format!("Current attempt count: {current}"));

        if current != attempt {
            // Another contender reclaimed between the check and this read.
            span.record("outcome", "overtaken");
            watch.unwatch().await?;
            self.emit(LockEvent::Locked);
            return Ok(self.poll_again(Some(current)));
        }

        let next = attempt.saturating_add(1);
        self.status_verbose(format!("This is attempt #{next}"));

        if next > self.options.max_attempts {
            span.record("outcome", "exhausted");
            return Ok(self.give_up(watch).await);
        }

        match watch
            .transactional_set(&LockValue::Attempt(next).to_store_value())
            .await?
        {
            TxOutcome::Committed(()) => {
                span.record("outcome", "acquired");
                let owned = LockState::Owned { attempt: next };
                self.set_state(owned);
                self.emit(LockEvent::Acquired {
                    last_attempt: next == self.options.max_attempts,
                });
                Ok(Step::Stop(owned))
            }
            TxOutcome::Aborted => {
                span.record("outcome", "lost_race");
                self.emit(LockEvent::Locked);
                let current = self.observe_counter().await?;
                Ok(self.poll_again(current))
            }
        }
    }

    /// Gives up after the counter reached the maximum, leaving a TTL on the
    /// key so it cannot outlive every contender.
    async fn give_up(&self, watch: S::Watch) -> Step {
        self.status_verbose("Exceeded maximum attempts, giving up!");
        self.emit(LockEvent::MaxAttemptsExceeded);

        let ttl = self.options.exhausted_ttl();
        let cleanup = async {
            watch.unwatch().await?;
            self.store.expire(self.key(), ttl).await
        };
        if let Err(err) = cleanup.await {
            warn!(error = %err, "failed to set fallback expiry on lock key");
            self.emit(LockEvent::Error(err));
        }

        Step::Stop(LockState::Exhausted)
    }

    /// Deletes a key the owner marked done.
    async fn finish_cleanup(&self) -> LockResult<Step> {
        self.status_normal("Work completed successfully by the owner, deleting lock");
        self.store.delete(self.key()).await?;
        Ok(Step::Stop(LockState::Terminated))
    }

    /// Re-reads the key after a lost transaction.
    ///
    /// Anything that is not a counter maps to `None`; the next check will
    /// find the sentinel or the missing key again and act on it.
    async fn observe_counter(&self) -> LockResult<Option<u32>> {
        let raw = self.store.get(self.key()).await?;
        Ok(LockValue::parse_optional(raw.as_deref())?.and_then(|value| value.attempt()))
    }

    fn poll_again(&self, last_observed: Option<u32>) -> Step {
        self.set_state(LockState::Polling { last_observed });
        Step::Later(Tick::Check { last_observed })
    }
}

/// Generates a unique worker id.
///
/// Format: `{process_id}_{counter}_{random}`
pub fn create_worker_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let counter = COUNTER.fetch_add(1, Ordering::Relaxed);

    let random: u64 = rand::thread_rng().r#gen();
    format!("{}_{}_{:016x}", process::id(), counter, random)
}
