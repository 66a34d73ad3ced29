//! I/O completion tier.
//!
//! Futures run on a small multi-threaded tokio runtime owned by the loop.
//! Their outputs travel back over a channel as type-erased payloads; the
//! `!Send` completion callbacks never leave the loop thread.

use std::any::Any;
use std::future::Future;
use std::time::Duration;

use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::mpsc;

use pledge_types::IoId;

pub(crate) type Payload = Box<dyn Any + Send>;

/// Output of one spawned future. `Err` carries the panic message if the
/// future panicked on the runtime.
pub(crate) struct Completion {
    pub(crate) id: IoId,
    pub(crate) payload: Result<Payload, String>,
}

/// Receiving half, owned by `EventLoop`.
pub(crate) struct IoRuntime {
    runtime: Runtime,
    completions: mpsc::UnboundedReceiver<Completion>,
}

/// Sending half, shared through `LoopHandle`.
pub(crate) struct IoSpawner {
    handle: Handle,
    sender: mpsc::UnboundedSender<Completion>,
}

impl IoRuntime {
    pub(crate) fn start(worker_threads: usize) -> std::io::Result<(Self, IoSpawner)> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(worker_threads.max(1))
            .thread_name("pledge-io")
            .enable_all()
            .build()?;
        let (sender, completions) = mpsc::unbounded_channel();
        let spawner = IoSpawner {
            handle: runtime.handle().clone(),
            sender,
        };
        Ok((
            Self {
                runtime,
                completions,
            },
            spawner,
        ))
    }

    pub(crate) fn try_next(&mut self) -> Option<Completion> {
        self.completions.try_recv().ok()
    }

    /// Block until a completion arrives or `limit` elapses. `None` waits
    /// without a limit.
    pub(crate) fn wait_next(&mut self, limit: Option<Duration>) -> Option<Completion> {
        let completions = &mut self.completions;
        self.runtime.block_on(async move {
            match limit {
                Some(limit) => tokio::time::timeout(limit, completions.recv())
                    .await
                    .ok()
                    .flatten(),
                None => completions.recv().await,
            }
        })
    }
}

impl IoSpawner {
    pub(crate) fn spawn<F>(&self, id: IoId, future: F)
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let work = self.handle.spawn(future);
        let sender = self.sender.clone();
        self.handle.spawn(async move {
            let payload = match work.await {
                Ok(output) => Ok(Box::new(output) as Payload),
                Err(err) => Err(err.to_string()),
            };
            if sender.send(Completion { id, payload }).is_err() {
                tracing::debug!(io = %id, "Event loop dropped before I/O completed");
            }
        });
    }
}
