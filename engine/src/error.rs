use std::fmt;

use thiserror::Error;

use pledge_types::UnhandledRejection;

/// Which tier a task was running in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Microtask,
    Timer,
    Io,
}

impl Tier {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Tier::Microtask => "microtask",
            Tier::Timer => "timer",
            Tier::Io => "io",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Conditions that stop `EventLoop::run`.
#[derive(Debug, Error)]
pub enum LoopError {
    #[error("failed to start I/O runtime: {0}")]
    Runtime(#[source] std::io::Error),
    #[error("{0}")]
    UnhandledRejection(UnhandledRejection),
    #[error("{tier} task panicked: {message}")]
    TaskPanicked { tier: Tier, message: String },
    #[error("microtask checkpoint exceeded {limit} tasks")]
    MicrotaskStorm { limit: usize },
}
