//! Core Thread Settings
//!
//! Configuration consumed once by [`CoreThread::spawn`].
//!
//! ```rust,ignore
//! use myth_gpu::{CoreThread, CoreThreadSettings, SystemBackend};
//!
//! // OpenGL-style backends expect column-major matrices in parameter blocks
//! let settings = CoreThreadSettings {
//!     transpose_matrices: true,
//!     ..Default::default()
//! };
//! let core = CoreThread::spawn(SystemBackend::new(), settings)?;
//! ```
//!
//! [`CoreThread::spawn`]: crate::core_thread::CoreThread::spawn

/// Global configuration for the core thread and the objects bound to it.
///
/// | Field                     | Description                                   | Default        |
/// |---------------------------|-----------------------------------------------|----------------|
/// | `thread_name`             | OS name of the core thread                    | `"myth-core"`  |
/// | `transpose_matrices`      | Matrix convention for new parameter sets      | `false`        |
/// | `max_batches_in_flight`   | Submitted batches the core thread may lag by  | `None`         |
/// | `deferred_release_warn_frames` | Frames before a pending release is reported | `120`     |
#[derive(Debug, Clone)]
pub struct CoreThreadSettings {
    /// Name given to the spawned core thread (visible in debuggers/profilers).
    pub thread_name: String,

    /// Default for [`GpuParams`](crate::params::GpuParams) created through a
    /// [`CoreQueue`](crate::core_thread::CoreQueue).
    ///
    /// Set this when the target graphics API expects the opposite
    /// row/column-major convention from `glam`.
    pub transpose_matrices: bool,

    /// Upper bound on submitted but not yet executed batches.
    ///
    /// `None` means unbounded. With a bound, [`CoreQueue::submit`] blocks the
    /// sim thread once the core thread falls that many frames behind.
    ///
    /// [`CoreQueue::submit`]: crate::core_thread::CoreQueue::submit
    pub max_batches_in_flight: Option<usize>,

    /// Number of frames a destroyed core object may wait for its last
    /// outstanding reference before a warning is logged.
    pub deferred_release_warn_frames: u64,
}

impl Default for CoreThreadSettings {
    fn default() -> Self {
        Self {
            thread_name: "myth-core".to_string(),
            transpose_matrices: false,
            max_batches_in_flight: None,
            deferred_release_warn_frames: 120,
        }
    }
}
