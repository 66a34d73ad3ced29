//! The scheduling capability a `Deferred` needs from its environment.

use pledge_types::{DeferredId, UnhandledRejection};

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce() + 'static>;

/// Deferred-work capability injected into every `Deferred`.
///
/// Implementations must run tasks passed to [`Schedule::defer`] after the
/// current synchronous execution unit returns, in FIFO order, and before any
/// timer or I/O callback that is already waiting.
pub trait Schedule {
    /// Queue a microtask.
    fn defer(&self, task: Task);

    /// Allocate an id for a newly constructed `Deferred`.
    fn next_deferred_id(&self) -> DeferredId;

    /// Surface a rejection nobody handled. Must not be silently dropped.
    fn report_unhandled(&self, rejection: UnhandledRejection);

    /// Record a settlement attempt made after the latch closed.
    fn note_ignored_settlement(&self, _id: DeferredId) {}
}

impl<S: Schedule + ?Sized> Schedule for std::rc::Rc<S> {
    fn defer(&self, task: Task) {
        (**self).defer(task);
    }

    fn next_deferred_id(&self) -> DeferredId {
        (**self).next_deferred_id()
    }

    fn report_unhandled(&self, rejection: UnhandledRejection) {
        (**self).report_unhandled(rejection);
    }

    fn note_ignored_settlement(&self, id: DeferredId) {
        (**self).note_ignored_settlement(id);
    }
}
