//! Log priority levels shared by the logger service and the console.

use std::fmt;
use std::str::FromStr;

/// Ordered log severity. `Silent` suppresses everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum Priority {
    /// Verbose diagnostics.
    Debug = 0,
    /// Regular log line.
    Log = 1,
    /// Warning.
    Warning = 2,
    /// Error.
    Error = 3,
    /// Nothing is emitted.
    #[default]
    Silent = 4,
}

impl Priority {
    /// Wire value of this priority.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Maps a wire value to a priority; values above `Silent` saturate.
    #[must_use]
    pub const fn from_wire(value: u8) -> Self {
        match value {
            0 => Self::Debug,
            1 => Self::Log,
            2 => Self::Warning,
            3 => Self::Error,
            _ => Self::Silent,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Debug => "debug",
            Self::Log => "log",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Silent => "silent",
        };
        f.write_str(name)
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "log" => Ok(Self::Log),
            "warn" | "warning" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            "silent" => Ok(Self::Silent),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}
