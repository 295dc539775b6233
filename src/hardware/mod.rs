//! Hardware Buffer Primitives
//!
//! The lower layer this crate drives from the core thread. A backend hands out
//! [`HardwareBuffer`]s (index, vertex and parameter-block storage) and opaque
//! pipeline objects; everything above only talks to these traits.
//!
//! Buffers are accessed exclusively through [`BufferLock`], a scoped
//! lock/unlock pair that unlocks on every exit path:
//!
//! ```rust,ignore
//! let lock = BufferLock::new(&*buffer, LockMode::WriteOnlyDiscard)?;
//! lock.write(0, bytes)?;
//! // unlocked here
//! ```
//!
//! [`SystemBackend`] keeps buffers in system memory and is used for headless
//! runs and tests.

mod system;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::errors::Result;
use crate::pipeline::{GpuProgram, PipelineStateDesc};

pub use system::{BackendStats, SystemBackend, SystemBuffer};

static NEXT_RESOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Allocates a process-wide unique hardware resource id.
pub fn generate_resource_id() -> u64 {
    NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed)
}

/// Index element type. 16-bit or 32-bit.
pub type IndexType = wgpu::IndexFormat;

/// Size in bytes of one index of the given type.
#[inline]
#[must_use]
pub fn index_element_size(index_type: IndexType) -> usize {
    match index_type {
        wgpu::IndexFormat::Uint16 => 2,
        wgpu::IndexFormat::Uint32 => 4,
    }
}

/// How a locked region is going to be accessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// Previous contents are discarded; only writes are allowed.
    WriteOnlyDiscard,
    /// Only reads are allowed.
    ReadOnly,
    /// Reads and writes are allowed.
    ReadWrite,
}

impl LockMode {
    #[inline]
    #[must_use]
    pub fn can_read(self) -> bool {
        matches!(self, Self::ReadOnly | Self::ReadWrite)
    }

    #[inline]
    #[must_use]
    pub fn can_write(self) -> bool {
        matches!(self, Self::WriteOnlyDiscard | Self::ReadWrite)
    }
}

/// Expected update frequency of a hardware buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BufferUsage {
    /// Written once (or rarely) and read many times.
    #[default]
    Static,
    /// Rewritten frequently, typically every frame.
    Dynamic,
}

/// Creation parameters for a hardware buffer.
#[derive(Debug, Clone, Copy)]
pub struct HardwareBufferDesc<'a> {
    pub label: &'a str,
    pub size: usize,
    pub usage: BufferUsage,
    /// Pipeline bind points the buffer is created for (`VERTEX`, `INDEX`, `UNIFORM`, ...).
    pub bind: wgpu::BufferUsages,
}

/// A block of GPU-visible memory owned by the backend.
///
/// Lock state lives in the buffer itself; callers go through [`BufferLock`]
/// rather than pairing `lock`/`unlock` by hand.
pub trait HardwareBuffer: Send + Sync + fmt::Debug {
    fn id(&self) -> u64;
    fn label(&self) -> &str;
    fn size(&self) -> usize;
    fn usage(&self) -> BufferUsage;
    fn bind_usage(&self) -> wgpu::BufferUsages;

    /// Locks the whole buffer. Fails if it is already locked.
    fn lock(&self, mode: LockMode) -> Result<()>;
    fn unlock(&self);
    fn is_locked(&self) -> bool;

    /// Copies `data` into the locked buffer at `offset`.
    fn write_locked(&self, offset: usize, data: &[u8]) -> Result<()>;
    /// Copies `out.len()` bytes starting at `offset` out of the locked buffer.
    fn read_locked(&self, offset: usize, out: &mut [u8]) -> Result<()>;
}

/// Shared pointer to a backend buffer.
pub type HardwareBufferPtr = Arc<dyn HardwareBuffer>;

/// Scoped lock over a [`HardwareBuffer`]. Unlocks when dropped.
pub struct BufferLock<'a> {
    buffer: &'a dyn HardwareBuffer,
    mode: LockMode,
}

impl<'a> BufferLock<'a> {
    pub fn new(buffer: &'a dyn HardwareBuffer, mode: LockMode) -> Result<Self> {
        buffer.lock(mode)?;
        Ok(Self { buffer, mode })
    }

    #[inline]
    #[must_use]
    pub fn mode(&self) -> LockMode {
        self.mode
    }

    pub fn write(&self, offset: usize, data: &[u8]) -> Result<()> {
        self.buffer.write_locked(offset, data)
    }

    pub fn read(&self, offset: usize, out: &mut [u8]) -> Result<()> {
        self.buffer.read_locked(offset, out)
    }
}

impl Drop for BufferLock<'_> {
    fn drop(&mut self) {
        self.buffer.unlock();
    }
}

/// Index buffer: hardware storage plus its element type and count.
#[derive(Debug, Clone)]
pub struct IndexBuffer {
    pub buffer: HardwareBufferPtr,
    pub index_type: IndexType,
    pub num_indices: u32,
}

impl IndexBuffer {
    #[inline]
    #[must_use]
    pub fn index_size(&self) -> usize {
        index_element_size(self.index_type)
    }
}

/// Vertex buffer for one stream: hardware storage plus its stride and count.
#[derive(Debug, Clone)]
pub struct VertexBuffer {
    pub buffer: HardwareBufferPtr,
    pub vertex_size: u32,
    pub num_vertices: u32,
}

impl VertexBuffer {
    #[inline]
    #[must_use]
    pub fn size_in_bytes(&self) -> usize {
        self.vertex_size as usize * self.num_vertices as usize
    }
}

/// Handle to a backend pipeline object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineHandle(pub(crate) u64);

impl PipelineHandle {
    #[inline]
    #[must_use]
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// The graphics API layer underneath the core thread.
///
/// Only ever called from the core thread, through
/// [`CoreContext`](crate::core_thread::CoreContext).
pub trait RenderBackend: Send {
    fn create_buffer(&mut self, desc: &HardwareBufferDesc<'_>) -> Result<HardwareBufferPtr>;

    /// Compiles/links a graphics pipeline object from its programs and fixed-function state.
    fn create_graphics_pipeline(&mut self, desc: &PipelineStateDesc) -> Result<PipelineHandle>;

    fn create_compute_pipeline(&mut self, program: &GpuProgram) -> Result<PipelineHandle>;

    fn destroy_pipeline(&mut self, handle: PipelineHandle);
}
