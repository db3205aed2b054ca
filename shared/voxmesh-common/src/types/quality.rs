//! Screen share quality presets.
//!
//! Each preset fixes the capture resolution, frame rate and encoder bitrate
//! requested when a participant starts sharing their screen.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

/// Quality preset for display capture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    /// 480p @ 15fps - fallback for poor connections.
    Low,
    /// 720p @ 30fps - default quality.
    #[default]
    Medium,
    /// 1080p @ 30fps.
    High,
    /// 1080p @ 60fps.
    Premium,
}

impl Quality {
    /// Capture width in pixels.
    #[must_use]
    pub const fn max_width(&self) -> u32 {
        match self {
            Self::Low => 854,
            Self::Medium => 1280,
            Self::High | Self::Premium => 1920,
        }
    }

    /// Capture height in pixels.
    #[must_use]
    pub const fn max_height(&self) -> u32 {
        match self {
            Self::Low => 480,
            Self::Medium => 720,
            Self::High | Self::Premium => 1080,
        }
    }

    /// Capture frame rate.
    #[must_use]
    pub const fn max_fps(&self) -> u32 {
        match self {
            Self::Low => 15,
            Self::Medium | Self::High => 30,
            Self::Premium => 60,
        }
    }

    /// Target encoder bitrate in bits per second.
    #[must_use]
    pub const fn target_bitrate(&self) -> u32 {
        match self {
            Self::Low => 750_000,
            Self::Medium => 2_000_000,
            Self::High => 4_000_000,
            Self::Premium => 6_000_000,
        }
    }

    /// All presets in ascending order.
    #[must_use]
    pub const fn all() -> [Self; 4] {
        [Self::Low, Self::Medium, Self::High, Self::Premium]
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Premium => "premium",
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Quality {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .into_iter()
            .find(|q| q.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::UnknownQuality(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_default_is_medium() {
        assert_eq!(Quality::default(), Quality::Medium);
    }

    #[test]
    fn quality_resolution_values() {
        assert_eq!((Quality::Low.max_width(), Quality::Low.max_height()), (854, 480));
        assert_eq!(
            (Quality::Medium.max_width(), Quality::Medium.max_height()),
            (1280, 720)
        );
        assert_eq!(
            (Quality::Premium.max_width(), Quality::Premium.max_height()),
            (1920, 1080)
        );
    }

    #[test]
    fn quality_fps_grows_with_tier() {
        let fps: Vec<u32> = Quality::all().iter().map(Quality::max_fps).collect();
        assert_eq!(fps, vec![15, 30, 30, 60]);
    }

    #[test]
    fn quality_parses_names() {
        assert_eq!("high".parse::<Quality>().unwrap(), Quality::High);
        assert_eq!(" Premium ".parse::<Quality>().unwrap(), Quality::Premium);
        assert!("ultra".parse::<Quality>().is_err());
    }

    #[test]
    fn quality_serialization() {
        assert_eq!(serde_json::to_string(&Quality::Medium).unwrap(), "\"medium\"");
        let quality: Quality = serde_json::from_str("\"low\"").unwrap();
        assert_eq!(quality, Quality::Low);
        assert_eq!(Quality::High.to_string(), "high");
    }
}
