//! Rolling RAM usage history and its compact glyph rendering.

use crate::config::Config;
use crate::error::Result;
use crate::ring_buffer::RingBuffer;

/// Largest history bound, whatever the window and interval.
pub const MAX_HISTORY_SAMPLES: usize = 86_400;

/// 8-level block characters, lowest to highest.
pub const GLYPHS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// Fixed-duration window of recent RAM percentages, oldest first.
#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    values: RingBuffer<f64>,
}

impl HistoryBuffer {
    /// Creates an empty history holding at most `bound` samples.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::InvalidBound`](crate::MonitorError::InvalidBound)
    /// if `bound` is 0.
    pub fn new(bound: usize) -> Result<Self> {
        Ok(Self { values: RingBuffer::new(bound)? })
    }

    /// Creates an empty history sized for `config`.
    ///
    /// # Errors
    ///
    /// Fails only if the config yields a zero bound, which a sanitized config
    /// never does.
    pub fn for_config(config: &Config) -> Result<Self> {
        Self::new(bound_for(config.history_seconds, config.update_interval_seconds))
    }

    /// Appends one percentage.
    pub fn append(&mut self, percent: f64) {
        self.values.push(percent);
    }

    /// Changes the bound; shrinking drops the oldest entries.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::InvalidBound`](crate::MonitorError::InvalidBound)
    /// if `bound` is 0.
    pub fn resize(&mut self, bound: usize) -> Result<()> {
        self.values.resize(bound)
    }

    /// Resizes to match `config` if either window setting changed.
    ///
    /// Returns true if the bound changed.
    ///
    /// # Errors
    ///
    /// Fails only for a zero bound.
    pub fn sync_to(&mut self, config: &Config) -> Result<bool> {
        let bound = bound_for(config.history_seconds, config.update_interval_seconds);
        if bound == self.values.bound() {
            return Ok(false);
        }
        self.values.resize(bound)?;
        Ok(true)
    }

    /// Returns a copy of the values, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<f64> {
        self.values.to_vec()
    }

    /// Returns the number of stored values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if no values are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns the current bound.
    #[must_use]
    pub fn bound(&self) -> usize {
        self.values.bound()
    }
}

/// Number of samples covering `history_seconds` at one sample per
/// `interval_seconds`, within `1..=MAX_HISTORY_SAMPLES`.
#[must_use]
pub fn bound_for(history_seconds: u64, interval_seconds: f64) -> usize {
    if !(interval_seconds.is_finite() && interval_seconds > 0.0) {
        return 1;
    }
    let raw = (history_seconds as f64 / interval_seconds).floor();
    if raw < 1.0 {
        1
    } else if raw >= MAX_HISTORY_SAMPLES as f64 {
        MAX_HISTORY_SAMPLES
    } else {
        raw as usize
    }
}

/// Maps a percentage to one of [`GLYPHS`] using equal-width bins.
#[must_use]
pub fn glyph_for(percent: f64) -> char {
    let fraction = if percent.is_finite() { (percent / 100.0).clamp(0.0, 1.0) } else { 0.0 };
    let idx = ((fraction * GLYPHS.len() as f64) as usize).min(GLYPHS.len() - 1);
    GLYPHS[idx]
}

/// Renders a history snapshot as one glyph per value.
#[must_use]
pub fn render_glyphs(values: &[f64]) -> String {
    values.iter().map(|&v| glyph_for(v)).collect()
}
