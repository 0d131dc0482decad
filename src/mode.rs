//! Storage mode — selects the test or production target.
//!
//! There is exactly one writer (the mode switch commands) and many readers.
//! Readers take a [`Mode`] snapshot once and pass it explicitly to the
//! storage gateway, so a switch never lands in the middle of a request.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};
use tracing::info;

/// Which storage target writes and reads go to.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Test,
    Production,
}

impl Mode {
    pub fn label(self) -> &'static str {
        match self {
            Self::Test => "test",
            Self::Production => "production",
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Test => 0,
            Self::Production => 1,
        }
    }

    fn from_u8(raw: u8) -> Self {
        if raw == 1 { Self::Production } else { Self::Test }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "test" => Ok(Self::Test),
            "production" | "prod" => Ok(Self::Production),
            other => Err(format!("unknown mode '{other}' (expected test or production)")),
        }
    }
}

/// Process-wide mode flag.
#[derive(Debug)]
pub struct ModeController {
    current: AtomicU8,
}

impl ModeController {
    pub fn new(initial: Mode) -> Self {
        Self {
            current: AtomicU8::new(initial.as_u8()),
        }
    }

    /// Snapshot of the current mode.
    pub fn get_mode(&self) -> Mode {
        Mode::from_u8(self.current.load(Ordering::Acquire))
    }

    /// Switch mode. Returns the previous value; setting the same mode is a no-op.
    pub fn set_mode(&self, new_mode: Mode) -> Mode {
        let previous = Mode::from_u8(self.current.swap(new_mode.as_u8(), Ordering::AcqRel));
        if previous != new_mode {
            info!(from = %previous, to = %new_mode, "Storage mode switched");
        }
        previous
    }
}

impl Default for ModeController {
    fn default() -> Self {
        Self::new(Mode::Test)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_test() {
        assert_eq!(ModeController::default().get_mode(), Mode::Test);
    }

    #[test]
    fn set_mode_is_idempotent() {
        let controller = ModeController::new(Mode::Test);
        assert_eq!(controller.set_mode(Mode::Production), Mode::Test);
        assert_eq!(controller.set_mode(Mode::Production), Mode::Production);
        assert_eq!(controller.get_mode(), Mode::Production);
    }

    #[test]
    fn parses_mode_names() {
        assert_eq!("test".parse::<Mode>().unwrap(), Mode::Test);
        assert_eq!(" Production ".parse::<Mode>().unwrap(), Mode::Production);
        assert_eq!("prod".parse::<Mode>().unwrap(), Mode::Production);
        assert!("staging".parse::<Mode>().is_err());
    }
}
