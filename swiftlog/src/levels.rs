//! Log levels and their ordering
//!
//! `Backtrace` marks records held back for deferred flush; it orders above
//! the regular severities so it never triggers a backtrace flush itself.
//! `None` disables level-triggered behavior and `Dynamic` defers the level
//! to a per-record byte trailing the payload.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum LogLevel {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warning = 3,
    Error = 4,
    Critical = 5,
    Backtrace = 6,
    None = 7,
    Dynamic = 8,
}

impl LogLevel {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => LogLevel::Trace,
            1 => LogLevel::Debug,
            2 => LogLevel::Info,
            3 => LogLevel::Warning,
            4 => LogLevel::Error,
            5 => LogLevel::Critical,
            6 => LogLevel::Backtrace,
            7 => LogLevel::None,
            8 => LogLevel::Dynamic,
            _ => return Option::None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Critical => "CRITICAL",
            LogLevel::Backtrace => "BACKTRACE",
            LogLevel::None => "NONE",
            LogLevel::Dynamic => "DYNAMIC",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(LogLevel::Trace < LogLevel::Critical);
        assert!(LogLevel::Critical < LogLevel::Backtrace);
        assert!(LogLevel::Backtrace < LogLevel::None);
    }

    #[test]
    fn test_from_u8_round_trip() {
        for value in 0..=8u8 {
            let level = LogLevel::from_u8(value).unwrap();
            assert_eq!(level as u8, value);
        }
        assert!(LogLevel::from_u8(9).is_none());
    }
}
