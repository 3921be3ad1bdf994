//! Outbound presentation boundary.
//!
//! The core never probes UI state. Presentation layers subscribe to
//! [`ObserverSync`] and receive one immutable [`TickView`] (and a small
//! [`TrayView`]) per tick, plus reclaim results when notifications are on.

use crate::history::render_glyphs;
use crate::theme::{ColorBand, Rgb, Theme};
use crate::types::{ProcessRanking, ReclaimResult, Sample};
use parking_lot::RwLock;
use std::sync::Arc;

/// Everything a presentation layer renders for one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TickView {
    /// Tick sequence number, starting at 1.
    pub tick: u64,
    /// The sample this view was built from.
    pub sample: Sample,
    /// RAM line, e.g. `Physical Memory: 5.10 GB / 15.50 GB (32.9%)`.
    pub ram_text: String,
    /// RAM usage band.
    pub ram_band: ColorBand,
    /// RAM band color under the active theme.
    pub ram_color: Rgb,
    /// Swap line.
    pub swap_text: String,
    /// Swap usage band.
    pub swap_band: ColorBand,
    /// Swap band color under the active theme.
    pub swap_color: Rgb,
    /// History snapshot, oldest first.
    pub history: Vec<f64>,
    /// History as 8-level glyphs.
    pub history_render: String,
    /// Top memory consumers.
    pub top_processes: ProcessRanking,
    /// Active theme.
    pub theme: Theme,
}

impl TickView {
    /// Assembles a view from one tick's results.
    #[must_use]
    pub fn build(
        tick: u64,
        sample: Sample,
        history: Vec<f64>,
        top_processes: ProcessRanking,
        theme: Theme,
    ) -> Self {
        let ram_band = ColorBand::for_percent(sample.ram_percent);
        let swap_band = ColorBand::for_percent(sample.swap_percent);
        Self {
            tick,
            ram_text: sample.ram_text(),
            ram_band,
            ram_color: theme.band_color(ram_band),
            swap_text: sample.swap_text(),
            swap_band,
            swap_color: theme.band_color(swap_band),
            history_render: render_glyphs(&history),
            history,
            top_processes,
            theme,
            sample,
        }
    }

    /// The tray projection of this view.
    #[must_use]
    pub fn tray(&self) -> TrayView {
        TrayView {
            ram_percent: self.sample.ram_percent,
            label: format!("{}", self.sample.ram_percent.clamp(0.0, 100.0) as u32),
            color: self.ram_color,
        }
    }
}

/// What a tray icon renderer needs to redraw its glyph.
#[derive(Debug, Clone, PartialEq)]
pub struct TrayView {
    /// RAM usage percentage.
    pub ram_percent: f64,
    /// Integer percentage label.
    pub label: String,
    /// Band color under the active theme.
    pub color: Rgb,
}

/// Receives one [`TickView`] per tick.
pub trait ViewObserver: Send + Sync {
    /// Called from the sampler thread; keep it short.
    fn on_tick(&self, view: &TickView);
}

/// Receives one [`TrayView`] per tick.
pub trait TrayObserver: Send + Sync {
    /// Called from the sampler thread; keep it short.
    fn on_tray(&self, view: &TrayView);
}

/// Receives reclaim results when `notify_on_cleanup` is set.
pub trait ReclaimObserver: Send + Sync {
    /// Called from the reclaim supervisor thread.
    fn on_reclaim(&self, result: &ReclaimResult);
}

impl<F: Fn(&TickView) + Send + Sync> ViewObserver for F {
    fn on_tick(&self, view: &TickView) {
        self(view);
    }
}

impl<F: Fn(&TrayView) + Send + Sync> TrayObserver for F {
    fn on_tray(&self, view: &TrayView) {
        self(view);
    }
}

impl<F: Fn(&ReclaimResult) + Send + Sync> ReclaimObserver for F {
    fn on_reclaim(&self, result: &ReclaimResult) {
        self(result);
    }
}

/// Subscriber registry and fan-out.
#[derive(Default)]
pub struct ObserverSync {
    views: RwLock<Vec<Arc<dyn ViewObserver>>>,
    trays: RwLock<Vec<Arc<dyn TrayObserver>>>,
    reclaims: RwLock<Vec<Arc<dyn ReclaimObserver>>>,
}

impl ObserverSync {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a view subscriber.
    pub fn subscribe_view(&self, observer: Arc<dyn ViewObserver>) {
        self.views.write().push(observer);
    }

    /// Adds a tray subscriber.
    pub fn subscribe_tray(&self, observer: Arc<dyn TrayObserver>) {
        self.trays.write().push(observer);
    }

    /// Adds a reclaim-result subscriber.
    pub fn subscribe_reclaim(&self, observer: Arc<dyn ReclaimObserver>) {
        self.reclaims.write().push(observer);
    }

    /// Publishes one tick to view and tray subscribers.
    pub fn publish(&self, view: &TickView) {
        for observer in self.views.read().iter() {
            observer.on_tick(view);
        }

        let trays = self.trays.read();
        if !trays.is_empty() {
            let tray = view.tray();
            for observer in trays.iter() {
                observer.on_tray(&tray);
            }
        }
    }

    /// Forwards a reclaim result to subscribers.
    pub fn notify_reclaim(&self, result: &ReclaimResult) {
        for observer in self.reclaims.read().iter() {
            observer.on_reclaim(result);
        }
    }
}

impl std::fmt::Debug for ObserverSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverSync")
            .field("views", &self.views.read().len())
            .field("trays", &self.trays.read().len())
            .field("reclaims", &self.reclaims.read().len())
            .finish()
    }
}
