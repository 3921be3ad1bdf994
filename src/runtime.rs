//! Monitor wiring: the sampler loop, the periodic-trigger loop, and the
//! user-action boundary.
//!
//! Each shared structure sits behind its own lock. One sampler tick takes a
//! config snapshot and a single [`Sample`], then feeds that same sample to
//! the history, the threshold policy and the published [`TickView`].

use crate::collectors::{memory, process, MemorySource, ProcessSource, Sampler, TopConsumers};
use crate::config::{
    is_valid_interval, Config, ConfigStore, MAX_HISTORY_SECONDS, MAX_UPDATE_INTERVAL_SECONDS,
    MIN_UPDATE_INTERVAL_SECONDS,
};
use crate::error::{MonitorError, Result};
use crate::history::{render_glyphs, HistoryBuffer};
use crate::observer::{ObserverSync, TickView};
use crate::reclaim::{Admission, CommandReclaimer, ReclaimCoordinator, Reclaimer};
use crate::stop::StopSignal;
use crate::theme::Theme;
use crate::trigger::{
    PeriodicTrigger, ThresholdPolicy, ThresholdState, TriggerState, DEFAULT_COOLDOWN,
    PERIODIC_CHECK_INTERVAL,
};
use crate::types::{ProcessRanking, ReclaimReason, ReclaimRequest, Sample};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// An unstarted monitor.
pub struct Monitor {
    store: Arc<ConfigStore>,
    memory: Box<dyn MemorySource>,
    processes: Box<dyn ProcessSource>,
    reclaimer: Arc<dyn Reclaimer>,
    observers: Arc<ObserverSync>,
    cooldown: Duration,
    periodic_check: Duration,
    reclaim_timeout: Option<Duration>,
}

impl Monitor {
    /// Creates a monitor over explicit sources.
    #[must_use]
    pub fn new(
        store: Arc<ConfigStore>,
        memory: Box<dyn MemorySource>,
        processes: Box<dyn ProcessSource>,
        reclaimer: Arc<dyn Reclaimer>,
    ) -> Self {
        Self {
            store,
            memory,
            processes,
            reclaimer,
            observers: Arc::new(ObserverSync::new()),
            cooldown: DEFAULT_COOLDOWN,
            periodic_check: PERIODIC_CHECK_INTERVAL,
            reclaim_timeout: None,
        }
    }

    /// Creates a monitor over this host's readers and the configured
    /// reclaim command.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::ConfigInvalid`] if the reclaim command is empty.
    pub fn for_host(store: Arc<ConfigStore>) -> Result<Self> {
        let reclaimer = CommandReclaimer::from_config(&store.snapshot())?;
        Ok(Self::new(
            store,
            memory::platform_source(),
            process::platform_source(),
            Arc::new(reclaimer),
        ))
    }

    /// Sets the threshold cooldown.
    #[must_use]
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Sets the periodic-trigger loop cadence.
    #[must_use]
    pub fn with_periodic_check(mut self, every: Duration) -> Self {
        self.periodic_check = every;
        self
    }

    /// Fixes the reclaim timeout instead of reading it from the config.
    #[must_use]
    pub fn with_reclaim_timeout(mut self, timeout: Duration) -> Self {
        self.reclaim_timeout = Some(timeout);
        self
    }

    /// The observer registry; subscribe before or after starting.
    #[must_use]
    pub fn observers(&self) -> &Arc<ObserverSync> {
        &self.observers
    }

    /// Spawns the loops.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::InvalidBound`] for a zero cooldown or periodic
    /// cadence, and [`MonitorError::Io`] if a thread cannot be spawned.
    pub fn start(self) -> Result<MonitorHandle> {
        if self.periodic_check.is_zero() {
            return Err(MonitorError::InvalidBound {
                what: "periodic check interval",
                value: format!("{:?}", self.periodic_check),
            });
        }
        let threshold = ThresholdPolicy::new(self.cooldown)?;
        let config = self.store.snapshot();
        let history = HistoryBuffer::for_config(&config)?;

        let stop = StopSignal::new();
        let sampler = Arc::new(Mutex::new(Sampler::new(self.memory)));
        let coordinator = match self.reclaim_timeout {
            Some(timeout) => ReclaimCoordinator::with_timeout(
                self.reclaimer,
                Arc::clone(&sampler),
                Arc::clone(&self.store),
                Arc::clone(&self.observers),
                stop.clone(),
                timeout,
            ),
            None => ReclaimCoordinator::new(
                self.reclaimer,
                Arc::clone(&sampler),
                Arc::clone(&self.store),
                Arc::clone(&self.observers),
                stop.clone(),
            ),
        };

        let shared = Arc::new(Shared {
            store: self.store,
            sampler,
            history: Mutex::new(history),
            ranking: Mutex::new(ProcessRanking::default()),
            latest: Mutex::new(None),
            threshold: Mutex::new(threshold),
            periodic: Mutex::new(PeriodicTrigger::new(Instant::now())),
            coordinator,
            observers: self.observers,
            stop,
            ticks: AtomicU64::new(0),
        });

        let mut handle = MonitorHandle { shared: Arc::clone(&shared), threads: Vec::new() };

        let mut top = TopConsumers::new(self.processes);
        let sampler_shared = Arc::clone(&shared);
        handle.threads.push(
            thread::Builder::new()
                .name("memsweep-sampler".to_string())
                .spawn(move || sampler_shared.run_sampler(&mut top))?,
        );

        let periodic_shared = Arc::clone(&shared);
        let every = self.periodic_check;
        handle.threads.push(
            thread::Builder::new()
                .name("memsweep-periodic".to_string())
                .spawn(move || periodic_shared.run_periodic(every))?,
        );

        info!(
            interval = config.update_interval_seconds,
            history_seconds = config.history_seconds,
            top_n = config.top_n_processes,
            auto_clean = config.auto_clean_enabled,
            periodic_clean = config.auto_clean_period_enabled,
            "monitor started"
        );
        Ok(handle)
    }
}

impl fmt::Debug for Monitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Monitor")
            .field("memory", &self.memory.id())
            .field("processes", &self.processes.id())
            .field("reclaimer", &self.reclaimer.id())
            .field("cooldown", &self.cooldown)
            .finish_non_exhaustive()
    }
}

struct Shared {
    store: Arc<ConfigStore>,
    sampler: Arc<Mutex<Sampler>>,
    history: Mutex<HistoryBuffer>,
    ranking: Mutex<ProcessRanking>,
    latest: Mutex<Option<Sample>>,
    threshold: Mutex<ThresholdPolicy>,
    periodic: Mutex<PeriodicTrigger>,
    coordinator: ReclaimCoordinator,
    observers: Arc<ObserverSync>,
    stop: StopSignal,
    ticks: AtomicU64,
}

impl Shared {
    fn run_sampler(&self, top: &mut TopConsumers) {
        debug!("sampler loop running");
        while !self.stop.is_stopped() {
            self.tick(top, Instant::now());
            let interval = self.store.snapshot().update_interval();
            if self.stop.wait(interval) {
                break;
            }
        }
        debug!("sampler loop exited");
    }

    fn run_periodic(&self, every: Duration) {
        debug!(?every, "periodic loop running");
        while !self.stop.wait(every) {
            let config = self.store.snapshot();
            let request = self.periodic.lock().evaluate(&config, Instant::now());
            if let Some(request) = request {
                self.submit(request);
            }
        }
        debug!("periodic loop exited");
    }

    fn tick(&self, top: &mut TopConsumers, now: Instant) -> TickView {
        let config = self.store.snapshot();
        let sample = self.sampler.lock().sample_at(now);
        *self.latest.lock() = Some(sample);

        let history = {
            let mut history = self.history.lock();
            if let Err(err) = history.sync_to(&config) {
                warn!(error = %err, "history not resized");
            }
            history.append(sample.ram_percent);
            history.snapshot()
        };

        let ranking = top.refresh(config.top_n_processes);
        *self.ranking.lock() = ranking.clone();

        let request = self.threshold.lock().evaluate(&sample, &config, now);
        if let Some(request) = request {
            self.submit(request);
        }

        let tick = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(tick, ram_percent = sample.ram_percent, swap_percent = sample.swap_percent, "tick");

        let view = TickView::build(tick, sample, history, ranking, config.theme);
        self.observers.publish(&view);
        view
    }

    fn submit(&self, request: ReclaimRequest) -> Admission {
        let admission = self.coordinator.request(request);
        if let Admission::Coalesced = admission {
            debug!(reason = %request.reason, "reclaim request coalesced");
        }
        admission
    }
}

/// A running monitor.
///
/// Dropping the handle stops and joins the loops without saving; call
/// [`shutdown`](Self::shutdown) to also persist the config.
pub struct MonitorHandle {
    shared: Arc<Shared>,
    threads: Vec<JoinHandle<()>>,
}

impl MonitorHandle {
    /// The user-action boundary.
    #[must_use]
    pub fn controls(&self) -> Controls {
        Controls { shared: Arc::clone(&self.shared) }
    }

    /// The observer registry.
    #[must_use]
    pub fn observers(&self) -> &Arc<ObserverSync> {
        &self.shared.observers
    }

    /// The shared stop signal.
    #[must_use]
    pub fn stop_signal(&self) -> StopSignal {
        self.shared.stop.clone()
    }

    /// Stops the loops, waits for them, and saves the config.
    ///
    /// An in-flight reclaim is abandoned; its result is discarded.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::ConfigIo`] if the final save fails.
    pub fn shutdown(mut self) -> Result<()> {
        self.stop_and_join();
        self.shared.store.save()?;
        info!(ticks = self.shared.ticks.load(Ordering::Relaxed), "monitor stopped");
        Ok(())
    }

    fn stop_and_join(&mut self) {
        self.shared.stop.stop();
        for thread in self.threads.drain(..) {
            let name = thread.thread().name().unwrap_or("unnamed").to_string();
            if thread.join().is_err() {
                warn!(thread = %name, "monitor thread panicked");
            }
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

impl fmt::Debug for MonitorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitorHandle")
            .field("threads", &self.threads.len())
            .field("ticks", &self.shared.ticks.load(Ordering::Relaxed))
            .finish()
    }
}

/// Inbound user actions. Cheap to clone and safe to call from any thread.
///
/// Setters validate, then apply a single [`ConfigStore::update`]; the loops
/// pick the change up on their next iteration.
#[derive(Clone)]
pub struct Controls {
    shared: Arc<Shared>,
}

impl Controls {
    /// Requests a reclaim now. Never blocks.
    pub fn trigger_manual_reclaim(&self) -> Admission {
        self.shared.submit(ReclaimRequest::new(ReclaimReason::Manual, Instant::now()))
    }

    /// Enables or disables threshold reclaim. The threshold is clamped to
    /// `[0, 100]`.
    pub fn set_auto_clean(&self, enabled: bool, threshold_percent: i64) -> Config {
        let threshold = threshold_percent.clamp(0, 100) as u32;
        info!(enabled, threshold, "auto clean updated");
        self.shared.store.update(|c| {
            c.auto_clean_enabled = enabled;
            c.auto_clean_threshold_percent = threshold;
        })
    }

    /// Enables or disables periodic reclaim.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::ConfigInvalid`] if `minutes` is 0.
    pub fn set_periodic_clean(&self, enabled: bool, minutes: u64) -> Result<Config> {
        if minutes == 0 {
            return Err(invalid("auto_clean_period_minutes", "must be at least 1 minute"));
        }
        info!(enabled, minutes, "periodic clean updated");
        Ok(self.shared.store.update(|c| {
            c.auto_clean_period_enabled = enabled;
            c.auto_clean_period_minutes = minutes;
        }))
    }

    /// Sets the sampling interval. The history bound follows.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::ConfigInvalid`] unless `seconds` lies within
    /// [`MIN_UPDATE_INTERVAL_SECONDS`, `MAX_UPDATE_INTERVAL_SECONDS`].
    pub fn set_update_interval(&self, seconds: f64) -> Result<Config> {
        if !is_valid_interval(seconds) {
            return Err(invalid(
                "update_interval_seconds",
                &format!("must be between {MIN_UPDATE_INTERVAL_SECONDS} and {MAX_UPDATE_INTERVAL_SECONDS} seconds"),
            ));
        }
        let config = self.shared.store.update(|c| c.update_interval_seconds = seconds);
        self.resize_history(&config);
        Ok(config)
    }

    /// Sets the history window. The history bound follows.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::ConfigInvalid`] if `seconds` is 0 or above
    /// [`MAX_HISTORY_SECONDS`].
    pub fn set_history_window(&self, seconds: u64) -> Result<Config> {
        if seconds == 0 || seconds > MAX_HISTORY_SECONDS {
            return Err(invalid(
                "history_seconds",
                &format!("must be between 1 and {MAX_HISTORY_SECONDS} seconds"),
            ));
        }
        let config = self.shared.store.update(|c| c.history_seconds = seconds);
        self.resize_history(&config);
        Ok(config)
    }

    /// Sets how many processes are ranked.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::ConfigInvalid`] if `n` is 0.
    pub fn set_top_n(&self, n: usize) -> Result<Config> {
        if n == 0 {
            return Err(invalid("top_n_processes", "must be at least 1"));
        }
        Ok(self.shared.store.update(|c| c.top_n_processes = n))
    }

    /// Sets the color theme.
    pub fn set_theme(&self, theme: Theme) -> Config {
        self.shared.store.update(|c| c.theme = theme)
    }

    /// Turns reclaim notifications on or off.
    pub fn set_notify_on_cleanup(&self, enabled: bool) -> Config {
        self.shared.store.update(|c| c.notify_on_cleanup = enabled)
    }

    /// Records the autostart preference. Registering with the OS is left to
    /// the caller.
    pub fn set_autostart(&self, enabled: bool) -> Config {
        self.shared.store.update(|c| c.autostart = enabled)
    }

    /// Current configuration.
    #[must_use]
    pub fn config(&self) -> Config {
        self.shared.store.snapshot()
    }

    /// A point-in-time summary.
    #[must_use]
    pub fn status(&self) -> Status {
        let now = Instant::now();
        let shared = &self.shared;
        let config = shared.store.snapshot();
        let (history, history_bound) = {
            let history = shared.history.lock();
            (history.snapshot(), history.bound())
        };
        let (threshold_state, remaining_cooldown, last_threshold_fire) = {
            let policy = shared.threshold.lock();
            (policy.state(), policy.remaining_cooldown(now), policy.last_fire())
        };
        let (next_periodic, last_periodic_fire) = {
            let periodic = shared.periodic.lock();
            let next = config
                .auto_clean_period_enabled
                .then(|| periodic.time_until_next(config.clean_period(), now));
            (next, periodic.last_fire())
        };

        Status {
            ticks: shared.ticks.load(Ordering::Relaxed),
            sample: *shared.latest.lock(),
            history_bound,
            history,
            ranking: shared.ranking.lock().clone(),
            threshold_state,
            remaining_cooldown,
            next_periodic,
            triggers: TriggerState { last_threshold_fire, last_periodic_fire },
            reclaim_in_flight: shared.coordinator.is_in_flight(),
            reclaims_completed: shared.coordinator.completed_count(),
            config,
        }
    }

    fn resize_history(&self, config: &Config) {
        if let Err(err) = self.shared.history.lock().sync_to(config) {
            warn!(error = %err, "history not resized");
        }
    }
}

impl fmt::Debug for Controls {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controls").finish_non_exhaustive()
    }
}

fn invalid(key: &'static str, message: &str) -> MonitorError {
    MonitorError::ConfigInvalid { key, message: message.to_string() }
}

/// Snapshot returned by [`Controls::status`].
#[derive(Debug, Clone)]
pub struct Status {
    /// Ticks completed.
    pub ticks: u64,
    /// Latest sample, if any tick ran.
    pub sample: Option<Sample>,
    /// History values, oldest first.
    pub history: Vec<f64>,
    /// Current history bound.
    pub history_bound: usize,
    /// Latest process ranking.
    pub ranking: ProcessRanking,
    /// Threshold policy state.
    pub threshold_state: ThresholdState,
    /// Time until the threshold policy re-arms.
    pub remaining_cooldown: Duration,
    /// Time until the next periodic reclaim, if enabled.
    pub next_periodic: Option<Duration>,
    /// Trigger timestamps.
    pub triggers: TriggerState,
    /// Whether a reclaim is running.
    pub reclaim_in_flight: bool,
    /// Reclaims finished so far.
    pub reclaims_completed: u64,
    /// Configuration at the time of the call.
    pub config: Config,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sample {
            Some(sample) => {
                writeln!(f, "{}", sample.ram_text())?;
                writeln!(f, "{}", sample.swap_text())?;
            }
            None => writeln!(f, "no sample yet")?,
        }
        writeln!(
            f,
            "history [{}/{}] {}",
            self.history.len(),
            self.history_bound,
            render_glyphs(&self.history)
        )?;

        let c = &self.config;
        if c.auto_clean_enabled {
            match self.threshold_state {
                ThresholdState::Armed => {
                    writeln!(f, "auto clean: on at {}% (armed)", c.auto_clean_threshold_percent)?;
                }
                ThresholdState::Cooling => writeln!(
                    f,
                    "auto clean: on at {}% (cooling, {}s left)",
                    c.auto_clean_threshold_percent,
                    self.remaining_cooldown.as_secs()
                )?,
            }
        } else {
            writeln!(f, "auto clean: off")?;
        }
        match self.next_periodic {
            Some(next) => writeln!(
                f,
                "periodic clean: every {} min (next in {}s)",
                c.auto_clean_period_minutes,
                next.as_secs()
            )?,
            None => writeln!(f, "periodic clean: off")?,
        }
        writeln!(
            f,
            "reclaim: {} ({} completed)",
            if self.reclaim_in_flight { "running" } else { "idle" },
            self.reclaims_completed
        )?;

        for entry in self.ranking.iter() {
            writeln!(
                f,
                "{:>8}  {:<24} {:>8.1} MB",
                entry.pid,
                entry.name,
                entry.resident_bytes as f64 / (1024.0 * 1024.0)
            )?;
        }
        Ok(())
    }
}
