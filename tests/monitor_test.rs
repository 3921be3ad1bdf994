//! End-to-end tests of the running monitor with scripted host sources.

#![allow(clippy::unwrap_used)]

use approx::assert_relative_eq;
use memsweep::collectors::{MemoryCounters, MemorySource, ProcessSource};
use memsweep::config::{Config, ConfigStore};
use memsweep::config::MAX_HISTORY_SECONDS;
use memsweep::history::MAX_HISTORY_SAMPLES;
use memsweep::observer::{TickView, TrayView, ViewObserver};
use memsweep::theme::Theme;
use memsweep::reclaim::{Admission, Reclaimer};
use memsweep::runtime::Monitor;
use memsweep::types::{ProcessEntry, ReclaimResult};
use memsweep::{logging, MonitorError, Result};
use parking_lot::Mutex;
use std::fs;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

// ============================================================================
// Fakes
// ============================================================================

/// RAM usage in percent of a 100-byte machine; every `fail_every`th read fails.
struct Scripted {
    used: Arc<AtomicU64>,
    reads: AtomicU64,
    fail_every: u64,
}

impl MemorySource for Scripted {
    fn id(&self) -> &'static str {
        "scripted"
    }

    fn read(&self) -> Result<MemoryCounters> {
        let n = self.reads.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_every > 0 && n % self.fail_every == 0 {
            return Err(MonitorError::TransientRead { source_name: "scripted", message: "flaky".into() });
        }
        Ok(MemoryCounters {
            ram_total: 100,
            ram_used: self.used.load(Ordering::SeqCst),
            swap_total: 50,
            swap_used: 10,
        })
    }
}

struct Table;

impl ProcessSource for Table {
    fn id(&self) -> &'static str {
        "table"
    }

    fn scan(&self) -> Result<Vec<Result<ProcessEntry>>> {
        Ok(vec![
            Ok(ProcessEntry::new(7, "editor", 300)),
            Ok(ProcessEntry::new(3, "browser", 300)),
            Err(MonitorError::ProcessNotFound(4)),
            Ok(ProcessEntry::new(9, "shell", 20)),
        ])
    }
}

struct SlowReclaim {
    calls: AtomicUsize,
    delay: Duration,
}

impl Reclaimer for SlowReclaim {
    fn id(&self) -> &'static str {
        "slow"
    }

    fn reclaim(&self, _timeout: Duration) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        thread::sleep(self.delay);
        Ok(())
    }
}

/// Keeps the most recent view.
#[derive(Default)]
struct Latest(Mutex<Option<TickView>>);

impl Latest {
    fn get(&self) -> Option<TickView> {
        self.0.lock().clone()
    }
}

impl ViewObserver for Latest {
    fn on_tick(&self, view: &TickView) {
        *self.0.lock() = Some(view.clone());
    }
}

struct Rig {
    monitor: Monitor,
    used: Arc<AtomicU64>,
    reclaimer: Arc<SlowReclaim>,
}

fn rig(store: ConfigStore, used: u64, fail_every: u64, delay: Duration) -> Rig {
    logging::init_for_tests();
    let used = Arc::new(AtomicU64::new(used));
    let reclaimer = Arc::new(SlowReclaim { calls: AtomicUsize::new(0), delay });
    let memory = Scripted { used: Arc::clone(&used), reads: AtomicU64::new(0), fail_every };
    let monitor = Monitor::new(Arc::new(store), Box::new(memory), Box::new(Table), reclaimer.clone())
        .with_periodic_check(Duration::from_millis(10));
    Rig { monitor, used, reclaimer }
}

fn fast() -> Config {
    Config { update_interval_seconds: 0.02, history_seconds: 2, top_n_processes: 2, ..Config::default() }
}

fn eventually(mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

// ============================================================================
// Tests
// ============================================================================

#[test]
fn test_views_and_tray_follow_memory_level() {
    let rig = rig(ConfigStore::in_memory(fast()), 40, 0, Duration::ZERO);
    let latest = Arc::new(Latest::default());
    let trays = Arc::new(Mutex::new(Vec::<TrayView>::new()));
    rig.monitor.observers().subscribe_view(latest.clone());
    let sink = Arc::clone(&trays);
    rig.monitor.observers().subscribe_tray(Arc::new(move |t: &TrayView| sink.lock().push(t.clone())));

    let handle = rig.monitor.start().unwrap();
    assert!(eventually(|| latest.get().is_some()));

    rig.used.store(95, Ordering::SeqCst);
    assert!(eventually(|| latest.get().is_some_and(|v| v.sample.ram_percent > 90.0)));
    handle.shutdown().unwrap();

    let view = latest.get().unwrap();
    assert_relative_eq!(view.sample.ram_percent, 95.0);
    assert_relative_eq!(view.sample.swap_percent, 20.0);
    assert!(view.ram_text.starts_with("Physical Memory:"));
    assert!(view.swap_text.starts_with("Paging File:"));

    // Equal sizes rank by ascending pid; the unreadable process is skipped.
    let pids: Vec<u32> = view.top_processes.iter().map(|p| p.pid).collect();
    assert_eq!(pids, vec![3, 7]);

    let trays = trays.lock();
    assert_eq!(trays.first().map(|t| t.label.as_str()), Some("40"));
    assert_eq!(trays.last().map(|t| t.label.as_str()), Some("95"));
}

#[test]
fn test_transient_read_failures_keep_ticking() {
    let rig = rig(ConfigStore::in_memory(fast()), 60, 2, Duration::ZERO);
    let views = Arc::new(Mutex::new(Vec::<TickView>::new()));
    let sink = Arc::clone(&views);
    rig.monitor.observers().subscribe_view(Arc::new(move |v: &TickView| sink.lock().push(v.clone())));

    let handle = rig.monitor.start().unwrap();
    assert!(eventually(|| views.lock().len() >= 6));
    handle.shutdown().unwrap();

    for view in views.lock().iter() {
        assert_relative_eq!(view.sample.ram_percent, 60.0);
    }
}

#[test]
fn test_concurrent_manual_triggers_run_one_reclaim() {
    let rig = rig(ConfigStore::in_memory(fast()), 50, 0, Duration::from_millis(300));
    let handle = rig.monitor.start().unwrap();
    let barrier = Arc::new(Barrier::new(8));

    let workers: Vec<_> = (0..8)
        .map(|_| {
            let controls = handle.controls();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                controls.trigger_manual_reclaim()
            })
        })
        .collect();

    let admissions: Vec<Admission> = workers.into_iter().map(|w| w.join().unwrap()).collect();
    let started = admissions.iter().filter(|a| a.is_started()).count();
    assert_eq!(started, 1);

    assert!(eventually(|| handle.controls().status().reclaims_completed == 1));
    assert_eq!(rig.reclaimer.calls.load(Ordering::SeqCst), 1);
    handle.shutdown().unwrap();
}

#[test]
fn test_shutdown_discards_in_flight_result() {
    let rig = rig(ConfigStore::in_memory(fast()), 50, 0, Duration::from_millis(200));
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    rig.monitor.observers().subscribe_reclaim(Arc::new(move |_: &ReclaimResult| {
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    let handle = rig.monitor.start().unwrap();
    let ticket = handle.controls().trigger_manual_reclaim().into_ticket().unwrap();

    let start = Instant::now();
    handle.shutdown().unwrap();
    assert!(start.elapsed() < Duration::from_millis(200));

    assert!(ticket.wait().is_none());
    assert_eq!(seen.load(Ordering::SeqCst), 0);
}

#[test]
fn test_settings_persist_across_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("memsweep").join("config.yaml");
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, "update_interval_seconds: 0.02\n").unwrap();

    let rig = rig(ConfigStore::open(&path), 10, 0, Duration::ZERO);
    let handle = rig.monitor.start().unwrap();
    let controls = handle.controls();
    controls.set_auto_clean(true, 72);
    controls.set_periodic_clean(true, 45).unwrap();
    controls.set_top_n(9).unwrap();
    handle.shutdown().unwrap();

    let reloaded = Config::load(&path);
    assert!(reloaded.auto_clean_enabled);
    assert_eq!(reloaded.auto_clean_threshold_percent, 72);
    assert!(reloaded.auto_clean_period_enabled);
    assert_eq!(reloaded.auto_clean_period_minutes, 45);
    assert_eq!(reloaded.top_n_processes, 9);
    assert_relative_eq!(reloaded.update_interval_seconds, 0.02);
}

#[test]
fn test_malformed_config_starts_with_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.yaml");
    fs::write(&path, "update_interval_seconds: [oops\n  history").unwrap();

    let store = ConfigStore::open(&path);
    assert_eq!(store.snapshot(), Config::default());

    let rig = rig(store, 10, 0, Duration::ZERO);
    let handle = rig.monitor.start().unwrap();
    assert!(eventually(|| handle.controls().status().ticks >= 1));
    handle.shutdown().unwrap();

    assert_eq!(Config::load(&path), Config::default());
}

#[test]
fn test_slow_reclaim_does_not_delay_sampling() {
    let rig = rig(ConfigStore::in_memory(fast()), 50, 0, Duration::from_millis(800));
    let handle = rig.monitor.start().unwrap();
    let controls = handle.controls();

    assert!(controls.trigger_manual_reclaim().is_started());
    let before = controls.status();
    assert!(before.reclaim_in_flight);

    thread::sleep(Duration::from_millis(300));
    let during = controls.status();
    assert!(during.reclaim_in_flight);
    // 300 ms at a 20 ms interval; leave room for a loaded machine.
    assert!(during.ticks >= before.ticks + 5, "{} -> {}", before.ticks, during.ticks);

    handle.shutdown().unwrap();
}

#[test]
fn test_out_of_range_interval_keeps_sampler_alive() {
    let rig = rig(ConfigStore::in_memory(fast()), 30, 0, Duration::ZERO);
    let handle = rig.monitor.start().unwrap();
    let controls = handle.controls();
    assert!(eventually(|| controls.status().ticks >= 2));

    assert!(controls.set_update_interval(1e30).is_err());
    assert!(controls.set_update_interval(f64::INFINITY).is_err());
    assert!(controls.set_history_window(u64::MAX).is_err());
    assert_relative_eq!(controls.config().update_interval_seconds, 0.02);

    let before = controls.status().ticks;
    assert!(eventually(|| controls.status().ticks >= before + 3));
    handle.shutdown().unwrap();
}

#[test]
fn test_oversized_persisted_window_starts() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.yaml");
    fs::write(&path, "update_interval_seconds: 0.02\nhistory_seconds: 9223372036854775807\n").unwrap();

    let store = ConfigStore::open(&path);
    assert_eq!(store.snapshot().history_seconds, MAX_HISTORY_SECONDS);

    let rig = rig(store, 20, 0, Duration::ZERO);
    let handle = rig.monitor.start().unwrap();
    let controls = handle.controls();
    assert!(eventually(|| controls.status().ticks >= 2));
    assert_eq!(controls.status().history_bound, MAX_HISTORY_SAMPLES);
    handle.shutdown().unwrap();
}

#[test]
fn test_one_bad_field_keeps_the_rest_of_the_config() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.yaml");
    fs::write(
        &path,
        "update_interval_seconds: 0.02\nauto_clean_enabled: true\nauto_clean_threshold_percent: 72\ntop_n_processes: 9\ntheme: red\n",
    )
    .unwrap();

    let rig = rig(ConfigStore::open(&path), 10, 0, Duration::ZERO);
    let handle = rig.monitor.start().unwrap();
    let config = handle.controls().config();
    assert!(config.auto_clean_enabled);
    assert_eq!(config.auto_clean_threshold_percent, 72);
    assert_eq!(config.top_n_processes, 9);
    assert_eq!(config.theme, Theme::Green);
    handle.shutdown().unwrap();

    // Saving rewrites the bad field with its default.
    let saved = fs::read_to_string(&path).unwrap();
    assert!(saved.contains("theme: green"), "{saved}");
    assert_eq!(Config::parse(&saved).unwrap().top_n_processes, 9);
}
