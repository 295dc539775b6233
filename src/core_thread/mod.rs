//! Core Thread
//!
//! The single thread allowed to touch hardware buffers and pipeline objects.
//!
//! # Model
//!
//! - Sim threads record commands into a [`CoreQueue`]. Commands accumulate in
//!   the current batch until [`CoreQueue::submit`] (the frame boundary) hands
//!   the batch to the core thread.
//! - The core thread executes batches strictly in submission order and the
//!   commands of a batch in recording order.
//! - Core-only code obtains the [`CoreContext`] through [`with_context`]. That
//!   function is the single thread-affinity guard of the crate: off the core
//!   thread it fails with [`GpuError::WrongThread`].
//! - After every batch the context retries deferred releases (see
//!   [`CoreObject::destroy`](crate::core_object::CoreObject::destroy)).
//!
//! ```rust,ignore
//! let core = CoreThread::spawn(SystemBackend::new(), CoreThreadSettings::default())?;
//! let queue = core.queue().clone();
//!
//! queue.queue_command(|| log::info!("runs on the core thread"));
//! let frame = queue.execute_sync(|| with_context("frame", |ctx| Ok(ctx.frame_index())))??;
//! ```

mod async_op;
mod context;

use std::cell::{Cell, RefCell};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use parking_lot::Mutex;

use crate::errors::{GpuError, Result};
use crate::hardware::RenderBackend;
use crate::settings::CoreThreadSettings;

pub use async_op::AsyncOp;
pub use context::CoreContext;

/// A deferred unit of work executed on the core thread.
pub type Command = Box<dyn FnOnce() + Send + 'static>;

enum CoreMessage {
    Batch(Vec<Command>),
    Shutdown,
}

thread_local! {
    static IS_CORE_THREAD: Cell<bool> = const { Cell::new(false) };
    static CORE_CONTEXT: RefCell<Option<CoreContext>> = const { RefCell::new(None) };
}

/// Returns `true` when called from the core thread.
#[inline]
pub fn is_core_thread() -> bool {
    IS_CORE_THREAD.with(Cell::get)
}

/// Runs `f` with the core context.
///
/// `operation` names the caller in the error reported when this is not the
/// core thread. Calls must not nest.
pub fn with_context<R>(
    operation: &'static str,
    f: impl FnOnce(&mut CoreContext) -> Result<R>,
) -> Result<R> {
    if !is_core_thread() {
        return Err(GpuError::WrongThread(operation));
    }
    CORE_CONTEXT.with(|slot| {
        let mut guard = slot.try_borrow_mut().map_err(|_| {
            GpuError::InvalidParameters(format!("re-entrant core context access in '{operation}'"))
        })?;
        let context = guard.as_mut().ok_or(GpuError::CoreThreadStopped)?;
        f(context)
    })
}

/// Fails with [`GpuError::WrongThread`] unless called from the core thread.
#[inline]
pub fn ensure_core_thread(operation: &'static str) -> Result<()> {
    if is_core_thread() {
        Ok(())
    } else {
        Err(GpuError::WrongThread(operation))
    }
}

struct QueueShared {
    pending: Mutex<Vec<Command>>,
    sender: flume::Sender<CoreMessage>,
    settings: Arc<CoreThreadSettings>,
}

/// Sim-side command recorder. Cheap to clone; all clones feed the same batch.
#[derive(Clone)]
pub struct CoreQueue {
    shared: Arc<QueueShared>,
}

impl CoreQueue {
    fn new(sender: flume::Sender<CoreMessage>, settings: Arc<CoreThreadSettings>) -> Self {
        Self {
            shared: Arc::new(QueueShared {
                pending: Mutex::new(Vec::new()),
                sender,
                settings,
            }),
        }
    }

    pub fn settings(&self) -> &CoreThreadSettings {
        &self.shared.settings
    }

    /// Appends a fire-and-forget command to the current batch.
    pub fn queue_command(&self, command: impl FnOnce() + Send + 'static) {
        self.shared.pending.lock().push(Box::new(command));
    }

    /// Appends a command whose return value is delivered through an [`AsyncOp`].
    pub fn queue_return<T: Send + 'static>(
        &self,
        command: impl FnOnce() -> T + Send + 'static,
    ) -> AsyncOp<T> {
        let (sender, receiver) = flume::bounded(1);
        self.queue_command(move || {
            // The receiver may already be gone; the result is simply dropped then.
            let _ = sender.send(command());
        });
        AsyncOp::new(receiver, self.clone())
    }

    /// Number of commands recorded since the last submit.
    pub fn pending_commands(&self) -> usize {
        self.shared.pending.lock().len()
    }

    /// Frame boundary: hands the recorded batch to the core thread.
    ///
    /// Blocks only when `max_batches_in_flight` is set and reached.
    pub fn submit(&self) -> Result<()> {
        let batch = std::mem::take(&mut *self.shared.pending.lock());
        if batch.is_empty() {
            return Ok(());
        }
        self.shared
            .sender
            .send(CoreMessage::Batch(batch))
            .map_err(|_| GpuError::CoreThreadStopped)
    }

    /// Queues `command`, submits, and blocks until the core thread has run it.
    pub fn execute_sync<T: Send + 'static>(
        &self,
        command: impl FnOnce() -> T + Send + 'static,
    ) -> Result<T> {
        self.queue_return(command).wait()
    }

    fn send_shutdown(&self) -> Result<()> {
        self.submit()?;
        self.shared
            .sender
            .send(CoreMessage::Shutdown)
            .map_err(|_| GpuError::CoreThreadStopped)
    }
}

impl std::fmt::Debug for CoreQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreQueue")
            .field("pending", &self.pending_commands())
            .finish_non_exhaustive()
    }
}

/// Owner of the core thread. Dropping it drains submitted work and joins the thread.
pub struct CoreThread {
    queue: CoreQueue,
    thread_id: ThreadId,
    join_handle: Option<JoinHandle<()>>,
}

impl CoreThread {
    /// Starts the core thread, moving `backend` onto it.
    pub fn spawn(
        backend: impl RenderBackend + 'static,
        settings: CoreThreadSettings,
    ) -> Result<Self> {
        let settings = Arc::new(settings);
        let (sender, receiver) = match settings.max_batches_in_flight {
            Some(limit) => flume::bounded(limit.max(1)),
            None => flume::unbounded(),
        };

        let context = CoreContext::new(Box::new(backend), Arc::clone(&settings));
        let join_handle = thread::Builder::new()
            .name(settings.thread_name.clone())
            .spawn(move || run_core_loop(context, &receiver))
            .map_err(|e| GpuError::ThreadSpawnFailed(e.to_string()))?;
        let thread_id = join_handle.thread().id();

        log::info!("Core thread '{}' started", settings.thread_name);

        Ok(Self {
            queue: CoreQueue::new(sender, settings),
            thread_id,
            join_handle: Some(join_handle),
        })
    }

    pub fn queue(&self) -> &CoreQueue {
        &self.queue
    }

    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    /// Submits outstanding commands, waits for the core thread to finish them
    /// and stops it.
    pub fn shutdown(mut self) -> Result<()> {
        self.stop()
    }

    fn stop(&mut self) -> Result<()> {
        let Some(handle) = self.join_handle.take() else {
            return Ok(());
        };
        let sent = self.queue.send_shutdown();
        let joined = handle.join().map_err(|_| GpuError::CoreThreadStopped);
        log::info!("Core thread '{}' stopped", self.queue.settings().thread_name);
        sent.and(joined)
    }
}

impl Drop for CoreThread {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::error!("Core thread did not shut down cleanly: {e}");
        }
    }
}

fn run_core_loop(context: CoreContext, receiver: &flume::Receiver<CoreMessage>) {
    IS_CORE_THREAD.with(|flag| flag.set(true));
    CORE_CONTEXT.with(|slot| *slot.borrow_mut() = Some(context));

    while let Ok(message) = receiver.recv() {
        match message {
            CoreMessage::Batch(commands) => {
                for command in commands {
                    command();
                }
                CORE_CONTEXT.with(|slot| {
                    if let Some(context) = slot.borrow_mut().as_mut() {
                        context.end_batch();
                    }
                });
            }
            CoreMessage::Shutdown => break,
        }
    }

    if let Some(context) = CORE_CONTEXT.with(|slot| slot.borrow_mut().take()) {
        context.shutdown();
    }
    IS_CORE_THREAD.with(|flag| flag.set(false));
}
