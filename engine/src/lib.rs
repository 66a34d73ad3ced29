//! Single-threaded event loop for `pledge-core` deferreds.
//!
//! Three tiers, highest priority first:
//!
//! - **Microtasks**: settlement drains and `queue_microtask` callbacks.
//! - **Timers**: `set_timeout` callbacks, by deadline then registration order.
//! - **I/O completions**: outputs of futures started with `spawn_io`.
//!
//! The microtask queue is drained completely after every timer callback and
//! every I/O completion.

mod clock;
mod error;
mod event_loop;
mod io;
mod timers;

pub use clock::{Clock, Idle, SystemClock, VirtualClock};
pub use error::{LoopError, Tier};
pub use event_loop::{
    DEFAULT_MAX_MICROTASKS_PER_CHECKPOINT, EventLoop, LoopConfig, LoopHandle, LoopReport,
};

pub use pledge_core::{Deferred, Schedule};
pub use pledge_types::{ClockKind, TimerId, UnhandledRejectionPolicy};
