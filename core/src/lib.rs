//! Core domain logic for Pledge.
//!
//! [`Deferred`] is the eventual result of an asynchronous operation. It does
//! not own a runtime: every settlement and drain is handed to a [`Schedule`]
//! implementation injected at construction. `pledge-engine` provides the
//! production event loop; tests can substitute a hand-cranked queue.

mod deferred;
mod schedule;


pub use deferred::{Deferred, RejectFn, ResolveFn};
pub use pledge_types::{DeferredId, SettleError, Status, UnhandledRejection};
pub use schedule::{Schedule, Task};
