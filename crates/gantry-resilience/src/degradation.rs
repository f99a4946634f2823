//! Externally assigned degradation level.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};
use tracing::info;

/// How far service has been deliberately scaled back.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DegradationLevel {
    /// Full service.
    #[default]
    Normal,
    /// Non-essential work shed.
    Reduced,
    /// Only core paths served.
    Minimal,
    /// Survival mode.
    Emergency,
}

impl DegradationLevel {
    /// Points subtracted from the health score at this level.
    pub fn penalty(self) -> f64 {
        match self {
            Self::Normal => 0.0,
            Self::Reduced => 10.0,
            Self::Minimal => 25.0,
            Self::Emergency => 40.0,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Reduced,
            2 => Self::Minimal,
            3 => Self::Emergency,
            _ => Self::Normal,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Normal => 0,
            Self::Reduced => 1,
            Self::Minimal => 2,
            Self::Emergency => 3,
        }
    }
}

impl fmt::Display for DegradationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Normal => "NORMAL",
            Self::Reduced => "REDUCED",
            Self::Minimal => "MINIMAL",
            Self::Emergency => "EMERGENCY",
        })
    }
}

/// Shared cell holding the current level.
#[derive(Debug, Default)]
pub struct DegradationState {
    level: AtomicU8,
}

impl DegradationState {
    /// Current level.
    pub fn level(&self) -> DegradationLevel {
        DegradationLevel::from_u8(self.level.load(Ordering::Relaxed))
    }

    /// Assign a new level, returning the previous one.
    pub fn set(&self, level: DegradationLevel) -> DegradationLevel {
        let prev = DegradationLevel::from_u8(self.level.swap(level.as_u8(), Ordering::Relaxed));
        if prev != level {
            info!(from = %prev, to = %level, "degradation level changed");
        }
        prev
    }
}
