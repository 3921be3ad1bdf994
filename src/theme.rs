//! Color themes and usage bands.
//!
//! A usage percentage maps to a [`ColorBand`]; a [`Theme`] maps each band to
//! an RGB color by walking a gradient from the theme accent to alert red.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Accent color family used by presentation layers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    /// Green accent (default).
    #[default]
    Green,
    /// Purple accent.
    Purple,
    /// Blue accent.
    Blue,
    /// Yellow accent.
    Yellow,
}

impl Theme {
    /// All themes, in menu order.
    pub const ALL: [Theme; 4] = [Theme::Green, Theme::Purple, Theme::Blue, Theme::Yellow];

    /// Returns the lowercase theme name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Green => "green",
            Self::Purple => "purple",
            Self::Blue => "blue",
            Self::Yellow => "yellow",
        }
    }

    /// Returns the accent color as a hex string.
    #[must_use]
    pub fn accent_hex(&self) -> &'static str {
        match self {
            Self::Green => "#9ece6a",
            Self::Purple => "#bb9af7",
            Self::Blue => "#7aa2f7",
            Self::Yellow => "#e0af68",
        }
    }

    /// Returns the accent color.
    #[must_use]
    pub fn accent(&self) -> Rgb {
        Rgb::from_hex(self.accent_hex())
    }

    /// Returns the color for `band`.
    #[must_use]
    pub fn band_color(&self, band: ColorBand) -> Rgb {
        self.accent().lerp(ALERT, band.severity())
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Theme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown theme '{s}'"))
    }
}

/// Usage severity bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ColorBand {
    /// Below 50%.
    Low,
    /// 50% up to 75%.
    Moderate,
    /// 75% up to 90%.
    High,
    /// 90% and above.
    Critical,
}

impl ColorBand {
    /// Buckets a usage percentage.
    #[must_use]
    pub fn for_percent(percent: f64) -> Self {
        if percent >= 90.0 {
            Self::Critical
        } else if percent >= 75.0 {
            Self::High
        } else if percent >= 50.0 {
            Self::Moderate
        } else {
            Self::Low
        }
    }

    /// Position along the accent-to-alert gradient.
    fn severity(self) -> f64 {
        match self {
            Self::Low => 0.0,
            Self::Moderate => 1.0 / 3.0,
            Self::High => 2.0 / 3.0,
            Self::Critical => 1.0,
        }
    }
}

const ALERT: Rgb = Rgb(0xf7, 0x76, 0x8e);

/// An sRGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    /// Parses `#RRGGBB`; anything malformed yields white.
    #[must_use]
    pub fn from_hex(hex: &str) -> Self {
        let hex = hex.trim_start_matches('#');
        if hex.len() != 6 || !hex.is_ascii() {
            return Self(255, 255, 255);
        }

        let channel = |range: std::ops::Range<usize>| u8::from_str_radix(&hex[range], 16).unwrap_or(255);
        Self(channel(0..2), channel(2..4), channel(4..6))
    }

    /// Linear interpolation towards `other`, `t` clamped to [0, 1].
    #[must_use]
    pub fn lerp(self, other: Self, t: f64) -> Self {
        let t = t.clamp(0.0, 1.0);
        let mix = |a: u8, b: u8| ((1.0 - t) * f64::from(a) + t * f64::from(b)).round() as u8;
        Self(mix(self.0, other.0), mix(self.1, other.1), mix(self.2, other.2))
    }

    /// Formats as `#rrggbb`.
    #[must_use]
    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.0, self.1, self.2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_band_edges() {
        assert_eq!(ColorBand::for_percent(0.0), ColorBand::Low);
        assert_eq!(ColorBand::for_percent(49.9), ColorBand::Low);
        assert_eq!(ColorBand::for_percent(50.0), ColorBand::Moderate);
        assert_eq!(ColorBand::for_percent(75.0), ColorBand::High);
        assert_eq!(ColorBand::for_percent(89.99), ColorBand::High);
        assert_eq!(ColorBand::for_percent(90.0), ColorBand::Critical);
    }

    #[test]
    fn test_parse_hex() {
        assert_eq!(Rgb::from_hex("#FF0000"), Rgb(255, 0, 0));
        assert_eq!(Rgb::from_hex("00ff00"), Rgb(0, 255, 0));
        assert_eq!(Rgb::from_hex("#bad"), Rgb(255, 255, 255));
    }

    #[test]
    fn test_band_colors_run_accent_to_alert() {
        for theme in Theme::ALL {
            assert_eq!(theme.band_color(ColorBand::Low), theme.accent());
            assert_eq!(theme.band_color(ColorBand::Critical), ALERT);
        }
    }

    #[test]
    fn test_lerp_midpoint() {
        let mid = Rgb(0, 0, 0).lerp(Rgb(255, 255, 255), 0.5);
        assert!((i32::from(mid.0) - 128).abs() <= 1);
    }

    #[test]
    fn test_theme_from_str() {
        assert_eq!("purple".parse::<Theme>(), Ok(Theme::Purple));
        assert_eq!(" Blue ".parse::<Theme>(), Ok(Theme::Blue));
        assert!("magenta".parse::<Theme>().is_err());
    }

    #[test]
    fn test_theme_serde_lowercase() {
        let yaml = serde_yaml_ng::to_string(&Theme::Yellow).unwrap();
        assert_eq!(yaml.trim(), "yellow");
    }
}
