//! Debounced background writer.
//!
//! ```text
//! Idle ──mutation──▶ Scheduled ──debounce elapsed──▶ Writing ──ok──▶ Idle
//!                        ▲                              │
//!                        └──────── failure (backoff) ◀──┘
//! ```
//!
//! Mutations only flip flags and (re)arm a timer; they never block. When the
//! timer elapses with no write in flight, the current record is snapshotted,
//! encoded and written on the blocking pool. Mutations landing while a write
//! is in flight leave the dirty flag set and are picked up by one follow-up
//! write, so a burst of changes inside one window produces exactly one write.
//!
//! The flag set is guarded by a single `std::sync::Mutex` that is only held
//! for flag reads and updates, never across I/O or an `.await`.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{Result, SaveError};
use crate::services::Clock;
use crate::writer::FileWriter;

/// Encoded bytes for one slot, ready to be written.
#[derive(Debug, Clone)]
pub struct PendingWrite {
    pub slot: u8,
    pub path: PathBuf,
    pub bytes: Vec<u8>,
}

/// Produces the payload for the next write.
///
/// Called on the blocking pool when a write starts, so the snapshot always
/// reflects the latest coalesced mutations.
pub trait SnapshotSource: Send + Sync {
    fn snapshot(&self) -> Result<PendingWrite>;
}

/// Observable scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Nothing unsaved.
    Idle,
    /// Unsaved changes with no timer armed (retries exhausted).
    Dirty,
    /// Unsaved changes waiting for the debounce or retry timer.
    Scheduled,
    /// A write is in flight.
    Writing,
}

/// Result of waiting for pending writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// No unsaved changes remain.
    Flushed,
    /// The bound elapsed first; the in-flight write keeps running.
    TimedOut,
    /// A write completed with an error; the data stays dirty for retry.
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub debounce: Duration,
    pub retry_base_delay: Duration,
    pub max_attempts: u32,
}

#[derive(Debug)]
struct Flags {
    dirty: bool,
    in_flight: bool,
    timer_armed: bool,
    /// Identifies the live timer task; older tasks exit when they wake.
    timer_generation: u64,
    deadline: Instant,
    failed_attempts: u32,
}

#[derive(Debug, Clone, Default)]
struct WriteReport {
    completed: u64,
    last_error: Option<String>,
}

enum TimerStep {
    Extend(Instant),
    Fire(bool),
    Retired,
}

struct Inner {
    flags: Mutex<Flags>,
    reports: watch::Sender<WriteReport>,
    source: Arc<dyn SnapshotSource>,
    writer: Arc<dyn FileWriter>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
    runtime: Handle,
}

/// Coalescing, debounced writer for one store instance.
///
/// At most one write is in flight at any time.
#[derive(Clone)]
pub struct WriteScheduler {
    inner: Arc<Inner>,
}

impl WriteScheduler {
    /// Create a scheduler whose tasks run on `runtime`.
    pub fn new(
        source: Arc<dyn SnapshotSource>,
        writer: Arc<dyn FileWriter>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
        runtime: Handle,
    ) -> Self {
        let (reports, _) = watch::channel(WriteReport::default());
        let flags = Flags {
            dirty: false,
            in_flight: false,
            timer_armed: false,
            timer_generation: 0,
            deadline: clock.now(),
            failed_attempts: 0,
        };

        Self {
            inner: Arc::new(Inner {
                flags: Mutex::new(flags),
                reports,
                source,
                writer,
                clock,
                config,
                runtime,
            }),
        }
    }

    /// Record a mutation and restart the debounce window.
    pub fn mark_dirty(&self) {
        let inner = &self.inner;
        let spawn_timer = {
            let mut flags = inner.lock();
            flags.dirty = true;
            flags.failed_attempts = 0;
            let deadline = inner.clock.now() + inner.config.debounce;
            Inner::arm(&mut flags, deadline)
        };

        if let Some(generation) = spawn_timer {
            inner.spawn_timer(generation);
        }
    }

    /// Mark dirty and start a write without waiting for the debounce window.
    pub fn save_now(&self) {
        let begin = {
            let mut flags = self.inner.lock();
            flags.dirty = true;
            flags.failed_attempts = 0;
            Inner::begin_write(&mut flags)
        };

        if begin {
            self.inner.spawn_write();
        }
    }

    /// Retry unsaved data whose retry budget ran out.
    ///
    /// Driven by the autosave tick.
    pub fn retry_pending(&self) {
        let begin = {
            let mut flags = self.inner.lock();
            if flags.dirty && !flags.timer_armed {
                flags.failed_attempts = 0;
                Inner::begin_write(&mut flags)
            } else {
                false
            }
        };

        if begin {
            debug!("Autosave tick retrying unsaved changes");
            self.inner.spawn_write();
        }
    }

    /// Write pending changes now and wait up to `timeout` for them to land.
    ///
    /// Never cancels a write: on timeout the in-flight task keeps running.
    pub async fn flush(&self, timeout: Duration) -> FlushOutcome {
        let deadline = Instant::now() + timeout;
        let outcome = self.drive_to_idle(Some(deadline), false).await;
        if outcome == FlushOutcome::TimedOut {
            warn!(
                "Save flush timed out after {:?}; write continues in background",
                timeout
            );
        }
        outcome
    }

    /// Wait without a bound until pending changes are written.
    ///
    /// Unlike [`flush`](Self::flush), a failed write does not end the wait
    /// while the retry budget lasts: the next attempt runs on the backoff
    /// timer. Returns `Failed` only once no further retry is scheduled.
    pub async fn settle(&self) -> FlushOutcome {
        self.drive_to_idle(None, true).await
    }

    /// Drop unsaved changes. Returns whether anything was pending.
    pub fn discard_pending(&self) -> bool {
        let mut flags = self.inner.lock();
        let was_dirty = flags.dirty;
        flags.dirty = false;
        flags.failed_attempts = 0;
        was_dirty
    }

    /// No unsaved changes and no write in flight.
    pub fn is_idle(&self) -> bool {
        let flags = self.inner.lock();
        !flags.dirty && !flags.in_flight
    }

    pub fn state(&self) -> SchedulerState {
        let flags = self.inner.lock();
        if flags.in_flight {
            SchedulerState::Writing
        } else if flags.dirty && flags.timer_armed {
            SchedulerState::Scheduled
        } else if flags.dirty {
            SchedulerState::Dirty
        } else {
            SchedulerState::Idle
        }
    }

    async fn drive_to_idle(&self, deadline: Option<Instant>, ride_retries: bool) -> FlushOutcome {
        let mut reports = self.inner.reports.subscribe();
        let mut failure: Option<String> = None;

        loop {
            let begin = {
                let mut flags = self.inner.lock();
                if !flags.dirty && !flags.in_flight {
                    return FlushOutcome::Flushed;
                }
                match failure.take() {
                    // The backoff timer owns the next attempt.
                    Some(_) if flags.timer_armed || flags.in_flight => false,
                    Some(error) => return FlushOutcome::Failed(error),
                    None => Inner::begin_write(&mut flags),
                }
            };
            if begin {
                self.inner.spawn_write();
            }

            let changed = match deadline {
                Some(deadline) => {
                    match tokio::time::timeout_at(deadline, reports.changed()).await {
                        Ok(changed) => changed,
                        Err(_) => return FlushOutcome::TimedOut,
                    }
                }
                None => reports.changed().await,
            };
            if changed.is_err() {
                return FlushOutcome::Failed("scheduler stopped".to_string());
            }

            if let Some(error) = reports.borrow_and_update().last_error.clone() {
                if !ride_retries {
                    return FlushOutcome::Failed(error);
                }
                failure = Some(error);
            }
        }
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Flags> {
        self.flags.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move the deadline. Returns the generation of a timer task to spawn
    /// when no live timer can honor it.
    ///
    /// A live timer only ever sleeps longer, so an earlier deadline retires
    /// it and starts a new one.
    fn arm(flags: &mut Flags, deadline: Instant) -> Option<u64> {
        let extends_live_timer = flags.timer_armed && deadline >= flags.deadline;
        flags.deadline = deadline;
        if extends_live_timer {
            None
        } else {
            flags.timer_armed = true;
            flags.timer_generation += 1;
            Some(flags.timer_generation)
        }
    }

    /// Claim the single write slot if there is something to write.
    ///
    /// A started write snapshots the latest record, so any pending timer is
    /// retired.
    fn begin_write(flags: &mut Flags) -> bool {
        if flags.dirty && !flags.in_flight {
            flags.dirty = false;
            flags.in_flight = true;
            flags.timer_armed = false;
            flags.timer_generation += 1;
            true
        } else {
            false
        }
    }

    fn retry_delay(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1).min(16);
        self.config
            .retry_base_delay
            .saturating_mul(1u32 << exponent)
    }

    fn spawn_timer(self: &Arc<Self>, generation: u64) {
        let inner = Arc::clone(self);
        self.runtime.spawn(inner.run_timer(generation));
    }

    async fn run_timer(self: Arc<Self>, generation: u64) {
        let mut deadline = self.lock().deadline;

        loop {
            self.clock.sleep_until(deadline).await;

            let step = {
                let mut flags = self.lock();
                if flags.timer_generation != generation || !flags.timer_armed {
                    TimerStep::Retired
                } else if flags.deadline > deadline {
                    TimerStep::Extend(flags.deadline)
                } else {
                    flags.timer_armed = false;
                    // In flight: the completion re-arms if still dirty.
                    TimerStep::Fire(Self::begin_write(&mut flags))
                }
            };

            match step {
                TimerStep::Extend(next) => deadline = next,
                TimerStep::Retired => return,
                TimerStep::Fire(begin) => {
                    if begin {
                        self.spawn_write();
                    }
                    return;
                }
            }
        }
    }

    fn spawn_write(self: &Arc<Self>) {
        let inner = Arc::clone(self);
        self.runtime.spawn(async move {
            let source = Arc::clone(&inner.source);
            let writer = Arc::clone(&inner.writer);

            let result = tokio::task::spawn_blocking(move || -> Result<u8> {
                let pending = source.snapshot()?;
                writer.write(&pending.path, &pending.bytes)?;
                Ok(pending.slot)
            })
            .await
            .unwrap_or_else(|e| Err(SaveError::WorkerJoin(e)));

            inner.finish_write(result);
        });
    }

    fn finish_write(self: &Arc<Self>, result: Result<u8>) {
        let now = self.clock.now();
        let retryable = result.as_ref().err().is_none_or(SaveError::is_transient);
        let (spawn_timer, failed_attempts) = {
            let mut flags = self.lock();
            flags.in_flight = false;

            if result.is_ok() {
                flags.failed_attempts = 0;
            } else {
                flags.dirty = true;
                flags.failed_attempts += 1;
            }

            let spawn_timer = if !flags.dirty {
                None
            } else if flags.failed_attempts == 0 {
                Inner::arm(&mut flags, now + self.config.debounce)
            } else if retryable && flags.failed_attempts < self.config.max_attempts {
                let delay = self.retry_delay(flags.failed_attempts);
                Inner::arm(&mut flags, now + delay)
            } else {
                None
            };

            (spawn_timer, flags.failed_attempts)
        };

        let last_error = match &result {
            Ok(slot) => {
                debug!("Slot {} saved", slot);
                None
            }
            Err(e) => {
                if !retryable {
                    warn!(
                        "Save failed ({}); not retrying until the next change or autosave tick",
                        e
                    );
                } else if failed_attempts >= self.config.max_attempts {
                    warn!(
                        "Save failed {} times in a row ({}); waiting for the next change or autosave tick",
                        failed_attempts, e
                    );
                } else {
                    warn!(
                        "Save failed (attempt {}/{}): {}; retrying in {:?}",
                        failed_attempts,
                        self.config.max_attempts,
                        e,
                        self.retry_delay(failed_attempts)
                    );
                }
                Some(e.to_string())
            }
        };

        if let Some(generation) = spawn_timer {
            self.spawn_timer(generation);
        }

        self.reports.send_modify(|report| {
            report.completed += 1;
            report.last_error = last_error;
        });
    }
}
