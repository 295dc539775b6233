use super::{CoreQueue, is_core_thread};
use crate::errors::{GpuError, Result};

/// Result of a command queued with [`CoreQueue::queue_return`].
///
/// The value becomes available once the core thread has executed the
/// command. Polling never blocks; [`wait`](Self::wait) does.
pub struct AsyncOp<T> {
    receiver: flume::Receiver<T>,
    queue: CoreQueue,
    value: Option<T>,
}

impl<T> AsyncOp<T> {
    pub(crate) fn new(receiver: flume::Receiver<T>, queue: CoreQueue) -> Self {
        Self {
            receiver,
            queue,
            value: None,
        }
    }

    /// Returns `true` once the core thread has produced the value.
    pub fn has_completed(&mut self) -> bool {
        if self.value.is_none()
            && let Ok(value) = self.receiver.try_recv()
        {
            self.value = Some(value);
        }
        self.value.is_some()
    }

    /// Takes the value if it is available.
    pub fn try_take(&mut self) -> Option<T> {
        self.has_completed();
        self.value.take()
    }

    /// Submits the pending batch and blocks until the core thread answers.
    ///
    /// Stalls the calling thread; keep it off hot paths. Waiting from the core
    /// thread itself would never return and is rejected.
    pub fn wait(mut self) -> Result<T> {
        if let Some(value) = self.value.take() {
            return Ok(value);
        }
        if is_core_thread() {
            return Err(GpuError::WrongThread("AsyncOp::wait"));
        }
        self.queue.submit()?;
        self.receiver.recv().map_err(|_| GpuError::CoreThreadStopped)
    }
}

impl<T> std::fmt::Debug for AsyncOp<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncOp")
            .field("completed", &(self.value.is_some() || !self.receiver.is_empty()))
            .finish()
    }
}
