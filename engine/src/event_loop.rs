//! The event loop and its shared handle.
//!
//! # Turn order
//!
//! ```text
//! loop {
//!     drain microtasks (including ones queued while draining)
//!     fire one due timer            -> continue
//!     dispatch one I/O completion   -> continue
//!     idle until next deadline / completion, or stop when nothing is left
//! }
//! ```
//!
//! Every timer callback and I/O completion is followed by a full microtask
//! checkpoint, so a settlement chain started from a timer finishes before the
//! next timer runs.

use std::any::Any;
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::time::Duration;

use serde::Serialize;

use pledge_core::{Schedule, Task};
use pledge_types::{
    ClockKind, DeferredId, IoId, TimerId, UnhandledRejection, UnhandledRejectionPolicy,
};

use crate::clock::{Clock, Idle, SystemClock, VirtualClock};
use crate::error::{LoopError, Tier};
use crate::io::{Completion, IoRuntime, IoSpawner, Payload};
use crate::timers::TimerQueue;

pub const DEFAULT_MAX_MICROTASKS_PER_CHECKPOINT: usize = 100_000;

/// Event loop construction options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopConfig {
    pub clock: ClockKind,
    pub unhandled_rejection: UnhandledRejectionPolicy,
    /// A checkpoint running more microtasks than this fails with
    /// `LoopError::MicrotaskStorm`.
    pub max_microtasks_per_checkpoint: usize,
    pub io_worker_threads: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            clock: ClockKind::System,
            unhandled_rejection: UnhandledRejectionPolicy::Abort,
            max_microtasks_per_checkpoint: DEFAULT_MAX_MICROTASKS_PER_CHECKPOINT,
            io_worker_threads: 1,
        }
    }
}

impl LoopConfig {
    /// Defaults with a virtual clock.
    #[must_use]
    pub fn virtual_time() -> Self {
        Self {
            clock: ClockKind::Virtual,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_unhandled_rejection(mut self, policy: UnhandledRejectionPolicy) -> Self {
        self.unhandled_rejection = policy;
        self
    }

    #[must_use]
    pub fn with_max_microtasks(mut self, limit: usize) -> Self {
        self.max_microtasks_per_checkpoint = limit;
        self
    }
}

/// Counters accumulated since the loop was created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoopReport {
    pub microtasks_run: u64,
    pub timers_fired: u64,
    pub io_completions: u64,
    pub ignored_settlements: u64,
    pub unhandled: Vec<UnhandledRejection>,
    /// Loop clock reading when the report was taken.
    pub elapsed: Duration,
}

type IoHandler = Box<dyn FnOnce(Payload)>;

struct LoopState {
    microtasks: VecDeque<Task>,
    timers: TimerQueue,
    io_handlers: HashMap<IoId, IoHandler>,
    next_deferred: u64,
    next_io: u64,
    report: LoopReport,
    /// Set under `UnhandledRejectionPolicy::Abort`; checked after each task.
    fatal: Option<UnhandledRejection>,
}

struct Shared {
    state: RefCell<LoopState>,
    clock: Box<dyn Clock>,
    policy: UnhandledRejectionPolicy,
    io: IoSpawner,
}

/// Cheap, clonable access to a loop from inside its callbacks.
///
/// Implements [`Schedule`], so it is what a `Deferred` is constructed with.
#[derive(Clone)]
pub struct LoopHandle {
    shared: Rc<Shared>,
}

impl LoopHandle {
    fn new(clock: Box<dyn Clock>, policy: UnhandledRejectionPolicy, io: IoSpawner) -> Self {
        Self {
            shared: Rc::new(Shared {
                state: RefCell::new(LoopState {
                    microtasks: VecDeque::new(),
                    timers: TimerQueue::new(),
                    io_handlers: HashMap::new(),
                    next_deferred: 0,
                    next_io: 0,
                    report: LoopReport::default(),
                    fatal: None,
                }),
                clock,
                policy,
                io,
            }),
        }
    }

    #[must_use]
    pub fn now(&self) -> Duration {
        self.shared.clock.now()
    }

    pub fn queue_microtask<F>(&self, callback: F)
    where
        F: FnOnce() + 'static,
    {
        self.defer(Box::new(callback));
    }

    /// Run `callback` on the timer tier once `delay` has elapsed.
    pub fn set_timeout<F>(&self, delay: Duration, callback: F) -> TimerId
    where
        F: FnOnce() + 'static,
    {
        let deadline = self.now().saturating_add(delay);
        let id = self
            .shared
            .state
            .borrow_mut()
            .timers
            .insert(deadline, Box::new(callback));
        tracing::trace!(timer = %id, ?delay, "Timer set");
        id
    }

    /// Returns false if the timer already fired or was already cleared.
    pub fn clear_timeout(&self, id: TimerId) -> bool {
        let cleared = self.shared.state.borrow_mut().timers.cancel(id);
        tracing::trace!(timer = %id, cleared, "Timer cleared");
        cleared
    }

    /// Run `future` on the I/O runtime and deliver its output to
    /// `on_complete` on the loop thread.
    pub fn spawn_io<F, C>(&self, future: F, on_complete: C) -> IoId
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
        C: FnOnce(F::Output) + 'static,
    {
        let handler: IoHandler = Box::new(move |payload: Payload| {
            match payload.downcast::<F::Output>() {
                Ok(output) => on_complete(*output),
                Err(_) => tracing::error!("I/O completion payload had an unexpected type"),
            }
        });
        let id = {
            let mut state = self.shared.state.borrow_mut();
            state.next_io += 1;
            let id = IoId::new(state.next_io);
            state.io_handlers.insert(id, handler);
            id
        };
        tracing::debug!(io = %id, "Spawned I/O");
        self.shared.io.spawn(id, future);
        id
    }

    #[must_use]
    pub fn pending_microtasks(&self) -> usize {
        self.shared.state.borrow().microtasks.len()
    }

    #[must_use]
    pub fn pending_timers(&self) -> usize {
        self.shared.state.borrow().timers.len()
    }

    #[must_use]
    pub fn outstanding_io(&self) -> usize {
        self.shared.state.borrow().io_handlers.len()
    }

    #[must_use]
    pub fn report(&self) -> LoopReport {
        let mut report = self.shared.state.borrow().report.clone();
        report.elapsed = self.now();
        report
    }

    fn pop_microtask(&self) -> Option<Task> {
        self.shared.state.borrow_mut().microtasks.pop_front()
    }

    fn pop_due_timer(&self) -> Option<(TimerId, Task)> {
        let now = self.now();
        self.shared.state.borrow_mut().timers.pop_due(now)
    }

    fn next_deadline(&self) -> Option<Duration> {
        self.shared.state.borrow_mut().timers.next_deadline()
    }

    fn take_io_handler(&self, id: IoId) -> Option<IoHandler> {
        self.shared.state.borrow_mut().io_handlers.remove(&id)
    }

    fn take_fatal(&self) -> Option<UnhandledRejection> {
        self.shared.state.borrow_mut().fatal.take()
    }

    fn count(&self, tier: Tier) {
        let report = &mut self.shared.state.borrow_mut().report;
        match tier {
            Tier::Microtask => report.microtasks_run += 1,
            Tier::Timer => report.timers_fired += 1,
            Tier::Io => report.io_completions += 1,
        }
    }
}

impl Schedule for LoopHandle {
    fn defer(&self, task: Task) {
        self.shared.state.borrow_mut().microtasks.push_back(task);
    }

    fn next_deferred_id(&self) -> DeferredId {
        let mut state = self.shared.state.borrow_mut();
        state.next_deferred += 1;
        DeferredId::new(state.next_deferred)
    }

    fn report_unhandled(&self, rejection: UnhandledRejection) {
        tracing::error!(
            deferred = %rejection.deferred,
            error = %rejection.error,
            policy = self.shared.policy.as_str(),
            "Unhandled rejection"
        );
        let mut state = self.shared.state.borrow_mut();
        if self.shared.policy.is_fatal() && state.fatal.is_none() {
            state.fatal = Some(rejection.clone());
        }
        state.report.unhandled.push(rejection);
    }

    fn note_ignored_settlement(&self, _id: DeferredId) {
        self.shared.state.borrow_mut().report.ignored_settlements += 1;
    }
}

/// Owns the I/O runtime and drives all three tiers.
pub struct EventLoop {
    handle: LoopHandle,
    io: IoRuntime,
    max_microtasks: usize,
}

impl EventLoop {
    pub fn new(config: LoopConfig) -> Result<Self, LoopError> {
        let clock: Box<dyn Clock> = match config.clock {
            ClockKind::System => Box::new(SystemClock::new()),
            ClockKind::Virtual => Box::new(VirtualClock::new()),
        };
        Self::with_clock(config, clock)
    }

    /// Like [`EventLoop::new`], but with a caller-supplied time source.
    /// `config.clock` is ignored.
    pub fn with_clock(config: LoopConfig, clock: Box<dyn Clock>) -> Result<Self, LoopError> {
        let (io, spawner) =
            IoRuntime::start(config.io_worker_threads).map_err(LoopError::Runtime)?;
        tracing::debug!(
            clock = config.clock.as_str(),
            unhandled_rejection = config.unhandled_rejection.as_str(),
            max_microtasks = config.max_microtasks_per_checkpoint,
            "Event loop created"
        );
        Ok(Self {
            handle: LoopHandle::new(clock, config.unhandled_rejection, spawner),
            io,
            max_microtasks: config.max_microtasks_per_checkpoint,
        })
    }

    #[must_use]
    pub fn handle(&self) -> LoopHandle {
        self.handle.clone()
    }

    /// Run until no microtasks, timers, or outstanding I/O remain.
    pub fn run(&mut self) -> Result<LoopReport, LoopError> {
        loop {
            if self.step()? {
                continue;
            }
            match self.handle.next_deadline() {
                Some(deadline) => match self.handle.shared.clock.idle_until(deadline) {
                    Idle::Advanced => {}
                    Idle::Wait(limit) => {
                        if let Some(completion) = self.io.wait_next(Some(limit)) {
                            self.complete(completion)?;
                        }
                    }
                },
                None if self.handle.outstanding_io() > 0 => {
                    if let Some(completion) = self.io.wait_next(None) {
                        self.complete(completion)?;
                    }
                }
                None => break,
            }
        }
        let report = self.handle.report();
        tracing::debug!(
            microtasks = report.microtasks_run,
            timers = report.timers_fired,
            io = report.io_completions,
            unhandled = report.unhandled.len(),
            "Event loop finished"
        );
        Ok(report)
    }

    /// Run microtasks, already-due timers, and already-arrived completions,
    /// without waiting or moving the clock.
    pub fn run_until_idle(&mut self) -> Result<LoopReport, LoopError> {
        while self.step()? {}
        Ok(self.handle.report())
    }

    /// One checkpoint plus at most one timer or completion. Returns whether a
    /// timer or completion ran.
    fn step(&mut self) -> Result<bool, LoopError> {
        self.checkpoint()?;
        if let Some((id, task)) = self.handle.pop_due_timer() {
            tracing::trace!(timer = %id, "Firing timer");
            self.run_task(Tier::Timer, task)?;
            return Ok(true);
        }
        if let Some(completion) = self.io.try_next() {
            self.complete(completion)?;
            return Ok(true);
        }
        Ok(false)
    }

    fn checkpoint(&mut self) -> Result<(), LoopError> {
        let mut ran = 0usize;
        while let Some(task) = self.handle.pop_microtask() {
            ran += 1;
            if ran > self.max_microtasks {
                tracing::error!(limit = self.max_microtasks, "Microtask checkpoint did not drain");
                return Err(LoopError::MicrotaskStorm {
                    limit: self.max_microtasks,
                });
            }
            self.run_task(Tier::Microtask, task)?;
        }
        Ok(())
    }

    fn complete(&mut self, completion: Completion) -> Result<(), LoopError> {
        let Completion { id, payload } = completion;
        let handler = self.handle.take_io_handler(id);
        match (payload, handler) {
            (Ok(output), Some(handler)) => {
                tracing::trace!(io = %id, "Dispatching I/O completion");
                self.run_task(Tier::Io, Box::new(move || handler(output)))
            }
            (Err(message), _) => {
                tracing::error!(io = %id, %message, "I/O future panicked");
                Err(LoopError::TaskPanicked {
                    tier: Tier::Io,
                    message,
                })
            }
            (Ok(_), None) => {
                tracing::warn!(io = %id, "I/O completion without a handler");
                Ok(())
            }
        }
    }

    fn run_task(&self, tier: Tier, task: Task) -> Result<(), LoopError> {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
            let message = panic_message(payload.as_ref());
            tracing::error!(%tier, %message, "Task panicked");
            return Err(LoopError::TaskPanicked { tier, message });
        }
        self.handle.count(tier);
        match self.handle.take_fatal() {
            Some(rejection) => Err(LoopError::UnhandledRejection(rejection)),
            None => Ok(()),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
