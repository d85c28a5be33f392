// src/ingest/mode.rs
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

/// Operator-selected cadence preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollingMode {
    #[default]
    Normal,
    Aggressive,
}

impl fmt::Display for PollingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => f.write_str("normal"),
            Self::Aggressive => f.write_str("aggressive"),
        }
    }
}

impl FromStr for PollingMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "normal" => Ok(Self::Normal),
            "aggressive" => Ok(Self::Aggressive),
            other => anyhow::bail!("unknown polling mode: {other}"),
        }
    }
}

/// Shared, lock-free mode flag. Any transition is allowed; the poll loop reads it
/// once at the start of each cycle.
#[derive(Debug, Default)]
pub struct ModeSwitch(AtomicU8);

impl ModeSwitch {
    pub fn new(mode: PollingMode) -> Self {
        Self(AtomicU8::new(mode as u8))
    }

    pub fn get(&self) -> PollingMode {
        match self.0.load(Ordering::Acquire) {
            1 => PollingMode::Aggressive,
            _ => PollingMode::Normal,
        }
    }

    /// Returns the previous mode.
    pub fn set(&self, mode: PollingMode) -> PollingMode {
        match self.0.swap(mode as u8, Ordering::AcqRel) {
            1 => PollingMode::Aggressive,
            _ => PollingMode::Normal,
        }
    }
}
