//! Resolved loop settings shared across crates.
//!
//! Raw TOML structs stay in `pledge-config`; these are the values the loader
//! resolves them into.

use serde::{Deserialize, Serialize};

/// Which time source drives the timer tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClockKind {
    /// Wall-clock time; the loop sleeps until the next timer deadline.
    #[default]
    System,
    /// Simulated time; the loop jumps straight to the next timer deadline.
    Virtual,
}

impl ClockKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Virtual => "virtual",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "system" | "wall" | "real" => Some(Self::System),
            "virtual" | "simulated" => Some(Self::Virtual),
            _ => None,
        }
    }
}

/// What the event loop does when a rejection reaches no failure continuation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnhandledRejectionPolicy {
    /// Stop the loop and return the rejection as a fatal error.
    #[default]
    Abort,
    /// Log the rejection, record it in the run report, and keep going.
    Warn,
}

impl UnhandledRejectionPolicy {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Abort => "abort",
            Self::Warn => "warn",
        }
    }

    #[must_use]
    pub const fn is_fatal(self) -> bool {
        matches!(self, Self::Abort)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_kind_parse_accepts_aliases() {
        assert_eq!(ClockKind::parse("Virtual"), Some(ClockKind::Virtual));
        assert_eq!(ClockKind::parse(" wall "), Some(ClockKind::System));
        assert_eq!(ClockKind::parse("lunar"), None);
    }

    #[test]
    fn policy_deserializes_lowercase() {
        let policy: UnhandledRejectionPolicy = serde_json::from_str("\"warn\"").unwrap();
        assert_eq!(policy, UnhandledRejectionPolicy::Warn);
        assert!(!policy.is_fatal());
        assert!(UnhandledRejectionPolicy::default().is_fatal());
    }
}
