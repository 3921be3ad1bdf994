//! Reclaim execution and coordination.
//!
//! [`ReclaimCoordinator`] admits at most one reclaim at a time. A request
//! that arrives while one is running is coalesced (dropped), never queued.
//! The operation runs on a worker thread watched by a supervisor thread, so
//! callers never block. If the worker has not finished within the timeout
//! the supervisor reports a `"timeout"` failure at once, but admits no new
//! reclaim until the worker has actually returned.

use crate::collectors::Sampler;
use crate::config::{Config, ConfigStore};
use crate::error::{MonitorError, Result};
use crate::observer::ObserverSync;
use crate::stop::StopSignal;
use crate::subprocess::{run_with_timeout, SubprocessResult};
use crate::types::{ReclaimReason, ReclaimRequest, ReclaimResult};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Overruns shorter than this are the worker noticing its own deadline.
const OVERRUN_WARNING: Duration = Duration::from_millis(250);

/// The platform action that frees memory.
pub trait Reclaimer: Send + Sync {
    /// Short identifier used in logs.
    fn id(&self) -> &'static str;

    /// Performs one reclaim, giving up after `timeout`.
    ///
    /// Implementations must honour `timeout`. A call that overruns it is
    /// reported as timed out, and every further request is coalesced until
    /// the call returns.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::ReclaimFailed`] or
    /// [`MonitorError::ReclaimTimeout`].
    fn reclaim(&self, timeout: Duration) -> Result<()>;
}

/// Runs an external command as the reclaim action.
#[derive(Debug, Clone)]
pub struct CommandReclaimer {
    program: String,
    args: Vec<String>,
}

impl CommandReclaimer {
    /// Wraps `program args..`.
    #[must_use]
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self { program: program.into(), args }
    }

    /// Builds from `reclaim_command`.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::ConfigInvalid`] if the command is empty.
    pub fn from_config(config: &Config) -> Result<Self> {
        match config.reclaim_command.split_first() {
            Some((program, args)) if !program.trim().is_empty() => {
                Ok(Self::new(program.clone(), args.to_vec()))
            }
            _ => Err(MonitorError::ConfigInvalid {
                key: "reclaim_command",
                message: "command is empty".to_string(),
            }),
        }
    }

    /// The program that will be run.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }
}

impl Reclaimer for CommandReclaimer {
    fn id(&self) -> &'static str {
        "command"
    }

    fn reclaim(&self, timeout: Duration) -> Result<()> {
        match run_with_timeout(&self.program, &self.args, timeout) {
            SubprocessResult::Success(_) => Ok(()),
            SubprocessResult::Timeout => Err(MonitorError::ReclaimTimeout(timeout)),
            other => Err(MonitorError::ReclaimFailed(
                other.failure_message().unwrap_or_else(|| "unknown failure".to_string()),
            )),
        }
    }
}

/// Outcome of [`ReclaimCoordinator::request`].
#[derive(Debug)]
pub enum Admission {
    /// The request started an operation.
    Started(ReclaimTicket),
    /// Another operation was in flight; the request was dropped.
    Coalesced,
    /// The monitor is shutting down.
    ShutDown,
}

impl Admission {
    /// Returns true if the request started an operation.
    #[must_use]
    pub fn is_started(&self) -> bool {
        matches!(self, Self::Started(_))
    }

    /// The ticket, if the request started an operation.
    #[must_use]
    pub fn into_ticket(self) -> Option<ReclaimTicket> {
        match self {
            Self::Started(ticket) => Some(ticket),
            _ => None,
        }
    }
}

/// Handle to one running reclaim.
#[derive(Debug)]
pub struct ReclaimTicket {
    reason: ReclaimReason,
    rx: mpsc::Receiver<ReclaimResult>,
}

impl ReclaimTicket {
    /// Reason of the request that started the operation.
    #[must_use]
    pub fn reason(&self) -> ReclaimReason {
        self.reason
    }

    /// Blocks until the result arrives.
    ///
    /// Returns `None` if the result was discarded because the monitor shut
    /// down first.
    #[must_use]
    pub fn wait(self) -> Option<ReclaimResult> {
        self.rx.recv().ok()
    }

    /// Like [`wait`](Self::wait), giving up after `timeout`.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> Option<ReclaimResult> {
        self.rx.recv_timeout(timeout).ok()
    }
}

/// Single-flight reclaim admission.
#[derive(Clone)]
pub struct ReclaimCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    in_flight: AtomicBool,
    reclaimer: Arc<dyn Reclaimer>,
    sampler: Arc<Mutex<Sampler>>,
    store: Arc<ConfigStore>,
    observers: Arc<ObserverSync>,
    stop: StopSignal,
    timeout_override: Option<Duration>,
    completed: AtomicU64,
    coalesced: AtomicU64,
}

impl ReclaimCoordinator {
    /// Creates a coordinator.
    ///
    /// `sampler` is read once after each operation for `percent_after`.
    /// The timeout and the notification switch come from `store` at the
    /// time of each request.
    #[must_use]
    pub fn new(
        reclaimer: Arc<dyn Reclaimer>,
        sampler: Arc<Mutex<Sampler>>,
        store: Arc<ConfigStore>,
        observers: Arc<ObserverSync>,
        stop: StopSignal,
    ) -> Self {
        Self::build(reclaimer, sampler, store, observers, stop, None)
    }

    /// Like [`new`](Self::new) with a fixed timeout instead of the
    /// configured one.
    #[must_use]
    pub fn with_timeout(
        reclaimer: Arc<dyn Reclaimer>,
        sampler: Arc<Mutex<Sampler>>,
        store: Arc<ConfigStore>,
        observers: Arc<ObserverSync>,
        stop: StopSignal,
        timeout: Duration,
    ) -> Self {
        Self::build(reclaimer, sampler, store, observers, stop, Some(timeout))
    }

    fn build(
        reclaimer: Arc<dyn Reclaimer>,
        sampler: Arc<Mutex<Sampler>>,
        store: Arc<ConfigStore>,
        observers: Arc<ObserverSync>,
        stop: StopSignal,
        timeout_override: Option<Duration>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                in_flight: AtomicBool::new(false),
                reclaimer,
                sampler,
                store,
                observers,
                stop,
                timeout_override,
                completed: AtomicU64::new(0),
                coalesced: AtomicU64::new(0),
            }),
        }
    }

    /// Submits a request without blocking.
    pub fn request(&self, request: ReclaimRequest) -> Admission {
        let inner = &self.inner;
        if inner.stop.is_stopped() {
            return Admission::ShutDown;
        }
        if inner
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            inner.coalesced.fetch_add(1, Ordering::Relaxed);
            debug!(reason = %request.reason, "reclaim already in flight, request dropped");
            return Admission::Coalesced;
        }

        let timeout = inner.timeout_override.unwrap_or_else(|| inner.store.snapshot().reclaim_timeout());
        let (tx, rx) = mpsc::channel();
        let reason = request.reason;
        info!(%reason, ?timeout, "reclaim started");

        let supervisor = {
            let inner = Arc::clone(inner);
            let tx = tx.clone();
            thread::Builder::new()
                .name("memsweep-reclaim".to_string())
                .spawn(move || inner.supervise(reason, timeout, &tx))
        };
        if let Err(err) = supervisor {
            inner.finish(
                reason,
                Err(MonitorError::ReclaimFailed(format!("could not start reclaim thread: {err}"))),
                Duration::ZERO,
                &tx,
            );
        }

        Admission::Started(ReclaimTicket { reason, rx })
    }

    /// Submits a request and waits for its result.
    ///
    /// Returns `None` if the request was coalesced, refused during shutdown,
    /// or its result was discarded.
    #[must_use]
    pub fn request_blocking(&self, request: ReclaimRequest) -> Option<ReclaimResult> {
        self.request(request).into_ticket().and_then(ReclaimTicket::wait)
    }

    /// Returns true while an operation is running.
    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    /// Operations finished so far, including failures.
    #[must_use]
    pub fn completed_count(&self) -> u64 {
        self.inner.completed.load(Ordering::Relaxed)
    }

    /// Requests dropped because one was already in flight.
    #[must_use]
    pub fn coalesced_count(&self) -> u64 {
        self.inner.coalesced.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for ReclaimCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReclaimCoordinator")
            .field("reclaimer", &self.inner.reclaimer.id())
            .field("in_flight", &self.is_in_flight())
            .field("completed", &self.completed_count())
            .field("coalesced", &self.coalesced_count())
            .finish()
    }
}

impl Inner {
    fn supervise(&self, reason: ReclaimReason, timeout: Duration, tx: &mpsc::Sender<ReclaimResult>) {
        let start = Instant::now();
        let (done_tx, done_rx) = mpsc::channel();
        let reclaimer = Arc::clone(&self.reclaimer);

        let spawned = thread::Builder::new()
            .name("memsweep-reclaim-worker".to_string())
            .spawn(move || {
                let _ = done_tx.send(reclaimer.reclaim(timeout));
            });

        if let Err(err) = spawned {
            let outcome = Err(MonitorError::ReclaimFailed(format!("could not start reclaim worker: {err}")));
            self.finish(reason, outcome, start.elapsed(), tx);
            return;
        }

        match done_rx.recv_timeout(timeout) {
            Ok(outcome) => self.finish(reason, outcome, start.elapsed(), tx),
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                let outcome = Err(MonitorError::ReclaimFailed("reclaim worker exited without a result".to_string()));
                self.finish(reason, outcome, start.elapsed(), tx);
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                let result = self.result_for(reason, Err(MonitorError::ReclaimTimeout(timeout)), start.elapsed());
                self.publish(result, tx);

                // The slot stays taken until the overrunning worker is done.
                let _ = done_rx.recv();
                let overrun = start.elapsed().saturating_sub(timeout);
                if overrun > OVERRUN_WARNING {
                    warn!(
                        reclaimer = self.reclaimer.id(),
                        overrun_ms = overrun.as_millis() as u64,
                        "reclaim ran past its timeout"
                    );
                }
                self.in_flight.store(false, Ordering::Release);
            }
        }
    }

    fn finish(
        &self,
        reason: ReclaimReason,
        outcome: Result<()>,
        elapsed: Duration,
        tx: &mpsc::Sender<ReclaimResult>,
    ) {
        let result = self.result_for(reason, outcome, elapsed);
        self.in_flight.store(false, Ordering::Release);
        self.publish(result, tx);
    }

    fn result_for(&self, reason: ReclaimReason, outcome: Result<()>, elapsed: Duration) -> ReclaimResult {
        let percent_after = self.sampler.lock().sample().ram_percent;
        self.completed.fetch_add(1, Ordering::Relaxed);
        match outcome {
            Ok(()) => ReclaimResult::succeeded(reason, percent_after, elapsed),
            Err(err) => ReclaimResult::failed(reason, percent_after, err.to_string(), elapsed),
        }
    }

    fn publish(&self, result: ReclaimResult, tx: &mpsc::Sender<ReclaimResult>) {
        let reason = result.reason;
        if self.stop.is_stopped() {
            debug!(%reason, "reclaim finished after shutdown, result discarded");
            return;
        }

        match &result.error {
            None => info!(
                %reason,
                percent_after = result.percent_after,
                elapsed_ms = result.elapsed.as_millis() as u64,
                "reclaim completed"
            ),
            Some(error) => error!(%reason, %error, "reclaim failed"),
        }

        if self.store.snapshot().notify_on_cleanup {
            self.observers.notify_reclaim(&result);
        }
        let _ = tx.send(result);
    }
}
