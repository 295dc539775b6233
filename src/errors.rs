//! Error Types
//!
//! This module defines the error type shared by every GPU-bound object.
//!
//! # Overview
//!
//! [`GpuError`] covers the failure modes of the dual-thread resource core:
//! - Thread affinity violations (core-only operations called elsewhere)
//! - Resource data and parameter lookup failures
//! - Pipeline configuration failures
//! - Core object lifecycle and hardware buffer lock failures
//!
//! Every error is reported synchronously at the offending call. Nothing is
//! deferred to submission time and nothing is retried automatically.
//!
//! ```rust,ignore
//! use myth_gpu::errors::{GpuError, Result};
//!
//! fn write(mesh: &Mesh, data: &MeshData) -> Result<()> {
//!     mesh.write_subresource(data)
//! }
//! ```

use thiserror::Error;

/// The error type for GPU resource operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GpuError {
    // ========================================================================
    // Thread Affinity
    // ========================================================================
    /// A core-thread-only operation was invoked from another thread, or a
    /// blocking wait was attempted on the core thread itself.
    #[error("'{0}' called from the wrong thread")]
    WrongThread(&'static str),

    /// The core thread has shut down (or panicked) before answering.
    #[error("Core thread is no longer running")]
    CoreThreadStopped,

    /// The operating system refused to start the core thread.
    #[error("Failed to spawn core thread: {0}")]
    ThreadSpawnFailed(String),

    // ========================================================================
    // Resource Data
    // ========================================================================
    /// A resource data blob carries the wrong type tag.
    #[error("Invalid resource data type: expected {expected}, got {actual}")]
    InvalidDataType {
        /// Tag the operation accepts
        expected: &'static str,
        /// Tag the blob carries
        actual: &'static str,
    },

    /// Arguments are well-typed but inconsistent (sizes, shapes, stages).
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    /// Index access past the end of a table.
    #[error("{context} index out of range: {index} (available: {count})")]
    IndexOutOfRange {
        /// Description of what was being accessed
        context: &'static str,
        /// The invalid index
        index: usize,
        /// Number of valid entries
        count: usize,
    },

    // ========================================================================
    // GPU Parameters
    // ========================================================================
    /// No parameter with this name exists in the descriptor table.
    #[error("Cannot find parameter with the name '{0}'")]
    ParameterNotFound(String),

    /// The parameter exists but is declared with another type.
    #[error("Parameter '{name}' is declared as {declared}, requested as {requested}")]
    TypeMismatch {
        /// Parameter name
        name: String,
        /// Declared type tag
        declared: &'static str,
        /// Requested type tag
        requested: &'static str,
    },

    /// A parameter handle outlived the parameter set it was issued by.
    #[error("Parameter handle used after its parameter set was destroyed")]
    ParamsDestroyed,

    // ========================================================================
    // Pipeline State
    // ========================================================================
    /// Missing or misplaced program stages, or conflicting parameter layouts.
    #[error("Invalid pipeline configuration: {0}")]
    InvalidPipelineConfiguration(String),

    // ========================================================================
    // Core Object Lifecycle
    // ========================================================================
    /// The core counterpart has not been realized on the core thread yet.
    #[error("Core object {0} has not been initialized on the core thread yet")]
    CoreNotInitialized(u64),

    /// The core counterpart could not be created by the backend.
    #[error("Core object {id} failed to initialize: {reason}")]
    CoreCreationFailed {
        /// Object identifier
        id: u64,
        /// Backend failure message
        reason: String,
    },

    /// The object was destroyed and cannot be used or re-created.
    #[error("Core object {0} has been destroyed")]
    ObjectDestroyed(u64),

    // ========================================================================
    // Hardware Buffers
    // ========================================================================
    /// The buffer is already locked.
    #[error("Hardware buffer '{0}' is already locked")]
    BufferLocked(String),

    /// Locked access attempted on a buffer that is not locked, or with an
    /// incompatible lock mode.
    #[error("Hardware buffer '{0}' is not locked for this access")]
    BufferNotLocked(String),

    /// Locked access outside the buffer.
    #[error("Access of {len} bytes at offset {offset} exceeds buffer size {size}")]
    LockOutOfBounds {
        /// Start of the access in bytes
        offset: usize,
        /// Length of the access in bytes
        len: usize,
        /// Buffer size in bytes
        size: usize,
    },

    /// The backend failed to allocate a resource.
    #[error("Backend error: {0}")]
    Backend(String),
}

/// Alias for `Result<T, GpuError>`.
pub type Result<T> = std::result::Result<T, GpuError>;
