//! The `Deferred` state machine.
//!
//! A `Deferred` is a one-shot latch plus a continuation registry:
//!
//! ```text
//! Pending --resolve/reject--> Scheduled --microtask--> Fulfilled(T) | Rejected(E)
//! ```
//!
//! `resolve` and `reject` never run continuations directly. They close the
//! latch and hand a settlement task to the injected [`Schedule`]. The task reads
//! the registry when it runs, so continuations registered between the
//! `resolve` call and the microtask are still drained.
//!
//! Every `then` allocates a downstream `Deferred` and registers a reaction on
//! the receiver. During a drain the receiver forwards its outcome into each
//! link synchronously, so a whole chain settles inside one microtask.
//!
//! Forwarding never recurses: link settlements go onto a per-thread worklist
//! that the outermost drain runs in a loop, and dropping an unsettled chain
//! releases its links the same way. Chain length is bounded by memory, not by
//! stack depth.

use std::any::Any;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use pledge_types::{DeferredId, SettleError, Status, UnhandledRejection};

use crate::schedule::{Schedule, Task};

/// `resolve` entry point handed to an executor.
pub type ResolveFn<T> = Rc<dyn Fn(T)>;

/// `reject` entry point handed to an executor.
pub type RejectFn<E> = Rc<dyn Fn(E)>;

type Reaction<T, E> = Box<dyn FnOnce(Result<T, E>)>;
type FailureContinuation<E> = Box<dyn FnOnce(E)>;

enum Latch<T, E> {
    Pending,
    /// A settlement microtask is queued; further attempts are ignored.
    Scheduled,
    Fulfilled(T),
    /// `handled` is set once a failure continuation has received `error`.
    Rejected { error: E, handled: bool },
}

impl<T, E> Latch<T, E> {
    fn status(&self) -> Status {
        match self {
            Latch::Pending | Latch::Scheduled => Status::Pending,
            Latch::Fulfilled(_) => Status::Fulfilled,
            Latch::Rejected { .. } => Status::Rejected,
        }
    }
}

struct Registry<T: 'static, E: 'static> {
    id: DeferredId,
    latch: Latch<T, E>,
    /// Downstream links, drained in registration order.
    reactions: Vec<Reaction<T, E>>,
    /// Single slot: a later registration replaces the earlier one.
    on_failure: Option<FailureContinuation<E>>,
}

impl<T: 'static, E: 'static> Drop for Registry<T, E> {
    fn drop(&mut self) {
        let reactions = std::mem::take(&mut self.reactions);
        if !reactions.is_empty() {
            release(Box::new(reactions));
        }
    }
}

// ============================================================================
// Per-thread worklists
// ============================================================================

thread_local! {
    /// Link settlements queued by the drain currently running on this thread.
    static LINK_SETTLEMENTS: RefCell<Option<VecDeque<Task>>> = const { RefCell::new(None) };
    /// Reaction lists waiting to be dropped by the outermost `release`.
    static RELEASED: RefCell<Option<Vec<Box<dyn Any>>>> = const { RefCell::new(None) };
}

/// Run `settlement`, or queue it behind the drain already running on this
/// thread. The outermost call runs queued settlements in FIFO order.
fn drain_links(settlement: Task) {
    let first = LINK_SETTLEMENTS.with_borrow_mut(|pending| {
        if let Some(queue) = pending.as_mut() {
            queue.push_back(settlement);
            return None;
        }
        *pending = Some(VecDeque::new());
        Some(settlement)
    });
    let Some(first) = first else {
        return;
    };

    let _reset = OnExit(|| drop(LINK_SETTLEMENTS.with_borrow_mut(Option::take)));
    first();
    while let Some(next) =
        LINK_SETTLEMENTS.with_borrow_mut(|pending| pending.as_mut().and_then(VecDeque::pop_front))
    {
        next();
    }
}

/// Resets a worklist when the outermost call returns or unwinds.
struct OnExit(fn());

impl Drop for OnExit {
    fn drop(&mut self) {
        (self.0)();
    }
}

/// Drop `reactions` without recursing into the links they hold.
fn release(reactions: Box<dyn Any>) {
    let first = RELEASED.try_with(|released| {
        let mut released = released.borrow_mut();
        if let Some(list) = released.as_mut() {
            list.push(reactions);
            return None;
        }
        *released = Some(Vec::new());
        Some(reactions)
    });
    // `Err` means the thread-local is gone and `reactions` was dropped in place.
    let Ok(Some(first)) = first else {
        return;
    };

    let _reset = OnExit(|| {
        let _ = RELEASED.try_with(|released| released.borrow_mut().take());
    });
    drop(first);
    while let Some(next) =
        RELEASED.with_borrow_mut(|released| released.as_mut().and_then(Vec::pop))
    {
        drop(next);
    }
}

/// The eventual result of an asynchronous operation.
///
/// Cloning a `Deferred` clones the handle, not the value: every clone observes
/// and mutates the same state.
pub struct Deferred<T: 'static, E: 'static> {
    state: Rc<RefCell<Registry<T, E>>>,
    schedule: Rc<dyn Schedule>,
}

impl<T: 'static, E: 'static> Clone for Deferred<T, E> {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
            schedule: Rc::clone(&self.schedule),
        }
    }
}

impl<T: 'static, E: 'static> fmt::Debug for Deferred<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("Deferred");
        match self.state.try_borrow() {
            Ok(registry) => out
                .field("id", &registry.id)
                .field("status", &registry.latch.status())
                .field("reactions", &registry.reactions.len())
                .field("has_failure_continuation", &registry.on_failure.is_some()),
            Err(_) => out.field("state", &"<draining>"),
        };
        out.finish()
    }
}

impl<T: 'static, E: 'static> Deferred<T, E> {
    #[must_use]
    pub fn id(&self) -> DeferredId {
        self.state.borrow().id
    }

    #[must_use]
    pub fn status(&self) -> Status {
        self.state.borrow().latch.status()
    }

    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.status().is_settled()
    }
}

impl<T, E> Deferred<T, E>
where
    T: Clone + 'static,
    E: Clone + fmt::Debug + 'static,
{
    /// A `Deferred` with no executor. Settle it through [`Deferred::resolve`]
    /// or [`Deferred::reject`].
    pub fn pending<S>(schedule: &S) -> Self
    where
        S: Schedule + Clone + 'static,
    {
        Self::with_schedule(Rc::new(schedule.clone()))
    }

    /// Construct a `Deferred` and run `executor` synchronously before returning.
    ///
    /// The executor receives clonable `resolve`/`reject` entry points that may
    /// be moved into timer or I/O callbacks.
    pub fn new<S, X>(schedule: &S, executor: X) -> Self
    where
        S: Schedule + Clone + 'static,
        X: FnOnce(ResolveFn<T>, RejectFn<E>),
    {
        let deferred = Self::pending(schedule);
        let on_resolve = deferred.clone();
        let on_reject = deferred.clone();
        executor(
            Rc::new(move |value: T| {
                on_resolve.resolve(value);
            }),
            Rc::new(move |error: E| {
                on_reject.reject(error);
            }),
        );
        deferred
    }

    /// `pending` followed immediately by `resolve(value)`.
    pub fn resolved<S>(schedule: &S, value: T) -> Self
    where
        S: Schedule + Clone + 'static,
    {
        let deferred = Self::pending(schedule);
        deferred.resolve(value);
        deferred
    }

    /// `pending` followed immediately by `reject(error)`.
    pub fn rejected<S>(schedule: &S, error: E) -> Self
    where
        S: Schedule + Clone + 'static,
    {
        let deferred = Self::pending(schedule);
        deferred.reject(error);
        deferred
    }

    fn with_schedule(schedule: Rc<dyn Schedule>) -> Self {
        let id = schedule.next_deferred_id();
        tracing::trace!(deferred = %id, "Created");
        Self {
            state: Rc::new(RefCell::new(Registry {
                id,
                latch: Latch::Pending,
                reactions: Vec::new(),
                on_failure: None,
            })),
            schedule,
        }
    }

    /// Schedule fulfilment with `value`.
    ///
    /// Only the first `resolve`/`reject` counts; later attempts are logged and
    /// ignored. Use [`Deferred::try_resolve`] to observe that case.
    pub fn resolve(&self, value: T) -> &Self {
        if let Err(err) = self.try_resolve(value) {
            tracing::warn!(%err, "Ignoring resolve on settled deferred");
        }
        self
    }

    /// Schedule rejection with `error`. See [`Deferred::resolve`].
    pub fn reject(&self, error: E) -> &Self {
        if let Err(err) = self.try_reject(error) {
            tracing::warn!(%err, "Ignoring reject on settled deferred");
        }
        self
    }

    pub fn try_resolve(&self, value: T) -> Result<&Self, SettleError> {
        self.schedule_settlement(Ok(value))
    }

    pub fn try_reject(&self, error: E) -> Result<&Self, SettleError> {
        self.schedule_settlement(Err(error))
    }

    /// Register a success continuation and return the downstream link.
    ///
    /// `Ok(u)` fulfils the link with `u`. `Err(e)` rejects it, which skips
    /// every success continuation further down the chain.
    /// A rejection of `self` with no failure continuation is forwarded into
    /// the link unchanged.
    pub fn then<U, F>(&self, on_success: F) -> Deferred<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Result<U, E> + 'static,
    {
        let link = Deferred::<U, E>::with_schedule(Rc::clone(&self.schedule));
        let downstream = link.clone();
        self.register(Box::new(move |outcome: Result<T, E>| {
            downstream.forward(outcome.and_then(on_success));
        }));
        link
    }

    /// Two-argument `then`: registers `on_success` and replaces this
    /// `Deferred`'s failure continuation with `on_failure`.
    pub fn then_or_else<U, F, G>(&self, on_success: F, on_failure: G) -> Deferred<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Result<U, E> + 'static,
        G: FnOnce(E) + 'static,
    {
        self.catch(on_failure);
        self.then(on_success)
    }

    /// Replace the failure continuation. Terminal: nothing chains off it.
    ///
    /// Registering on a rejected `Deferred` whose error no failure
    /// continuation has received yet delivers it in a new microtask. Once a
    /// rejection has been handled, or the `Deferred` fulfilled, this is a no-op.
    pub fn catch<G>(&self, on_failure: G)
    where
        G: FnOnce(E) + 'static,
    {
        let mut registry = self.state.borrow_mut();
        let id = registry.id;
        let deliver_late = match &registry.latch {
            Latch::Pending | Latch::Scheduled => false,
            Latch::Fulfilled(_) => return,
            Latch::Rejected { handled: true, .. } => {
                tracing::debug!(deferred = %id, "Rejection already handled; ignoring failure continuation");
                return;
            }
            Latch::Rejected { handled: false, .. } => true,
        };
        let previous = registry.on_failure.replace(Box::new(on_failure));
        drop(registry);

        if previous.is_some() {
            tracing::debug!(deferred = %id, "Replaced failure continuation");
        } else if deliver_late {
            let this = self.clone();
            self.schedule
                .defer(Box::new(move || this.deliver_late_failure()));
        }
    }

    /// The fulfilled value, once the settlement microtask has run.
    #[must_use]
    pub fn value(&self) -> Option<T> {
        match &self.state.borrow().latch {
            Latch::Fulfilled(value) => Some(value.clone()),
            _ => None,
        }
    }

    /// The rejection error, once the settlement microtask has run.
    #[must_use]
    pub fn error(&self) -> Option<E> {
        match &self.state.borrow().latch {
            Latch::Rejected { error, .. } => Some(error.clone()),
            _ => None,
        }
    }

    fn close_latch(&self) -> Result<DeferredId, SettleError> {
        let mut registry = self.state.borrow_mut();
        let id = registry.id;
        if matches!(registry.latch, Latch::Pending) {
            registry.latch = Latch::Scheduled;
            return Ok(id);
        }
        let status = registry.latch.status();
        drop(registry);
        self.schedule.note_ignored_settlement(id);
        Err(SettleError::AlreadySettled { id, status })
    }

    fn schedule_settlement(&self, outcome: Result<T, E>) -> Result<&Self, SettleError> {
        let id = self.close_latch()?;
        tracing::debug!(
            deferred = %id,
            outcome = if outcome.is_ok() { "fulfil" } else { "reject" },
            "Scheduled settlement"
        );
        let this = self.clone();
        self.schedule
            .defer(Box::new(move || drain_links(Box::new(move || this.settle(outcome)))));
        Ok(self)
    }

    /// Settle a downstream link from inside its parent's drain.
    fn forward(&self, outcome: Result<T, E>) {
        if self.close_latch().is_ok() {
            let this = self.clone();
            drain_links(Box::new(move || this.settle(outcome)));
        }
    }

    fn settle(&self, outcome: Result<T, E>) {
        let (id, reactions, on_failure) = {
            let mut registry = self.state.borrow_mut();
            let on_failure = registry.on_failure.take();
            registry.latch = match &outcome {
                Ok(value) => Latch::Fulfilled(value.clone()),
                Err(error) => Latch::Rejected {
                    error: error.clone(),
                    handled: on_failure.is_some(),
                },
            };
            (registry.id, std::mem::take(&mut registry.reactions), on_failure)
        };

        match outcome {
            Ok(value) => {
                tracing::debug!(deferred = %id, reactions = reactions.len(), "Draining fulfilment");
                for reaction in reactions {
                    reaction(Ok(value.clone()));
                }
            }
            Err(error) => {
                if let Some(on_failure) = on_failure {
                    tracing::debug!(deferred = %id, "Draining rejection into failure continuation");
                    on_failure(error);
                } else if reactions.is_empty() {
                    self.schedule
                        .report_unhandled(UnhandledRejection::new(id, format!("{error:?}")));
                } else {
                    tracing::debug!(deferred = %id, links = reactions.len(), "Forwarding rejection");
                    for reaction in reactions {
                        reaction(Err(error.clone()));
                    }
                }
            }
        }
    }

    /// Hand a stored rejection to a failure continuation registered after it.
    fn deliver_late_failure(&self) {
        let delivery = {
            let mut guard = self.state.borrow_mut();
            let registry = &mut *guard;
            match &mut registry.latch {
                Latch::Rejected { error, handled } if !*handled => registry
                    .on_failure
                    .take()
                    .map(|on_failure| {
                        *handled = true;
                        (error.clone(), on_failure)
                    }),
                _ => None,
            }
        };
        if let Some((error, on_failure)) = delivery {
            on_failure(error);
        }
    }

    fn register(&self, reaction: Reaction<T, E>) {
        let settled = {
            let mut guard = self.state.borrow_mut();
            let registry = &mut *guard;
            match &registry.latch {
                Latch::Pending | Latch::Scheduled => {
                    registry.reactions.push(reaction);
                    return;
                }
                Latch::Fulfilled(value) => Ok(value.clone()),
                Latch::Rejected { handled, .. } if *handled || registry.on_failure.is_some() => {
                    tracing::debug!(deferred = %registry.id, "Rejection handled; link stays pending");
                    return;
                }
                Latch::Rejected { error, .. } => Err(error.clone()),
            }
        };
        self.schedule.defer(Box::new(move || reaction(settled)));
    }
}
