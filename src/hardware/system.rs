//! System-memory backend.
//!
//! Buffers are plain byte vectors guarded by a mutex; pipeline objects are
//! bookkeeping entries. Allocation counters are shared through
//! [`BackendStats`] so they stay observable after the backend has moved onto
//! the core thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use super::{
    BufferUsage, HardwareBuffer, HardwareBufferDesc, HardwareBufferPtr, LockMode, PipelineHandle,
    RenderBackend, generate_resource_id,
};
use crate::errors::{GpuError, Result};
use crate::pipeline::{GpuProgram, PipelineStateDesc};

/// Allocation counters of a [`SystemBackend`].
#[derive(Debug, Default)]
pub struct BackendStats {
    buffers_created: AtomicU64,
    buffers_released: AtomicU64,
    live_bytes: AtomicU64,
    pipelines_created: AtomicU64,
    pipelines_destroyed: AtomicU64,
}

impl BackendStats {
    pub fn buffers_created(&self) -> u64 {
        self.buffers_created.load(Ordering::Acquire)
    }

    pub fn buffers_released(&self) -> u64 {
        self.buffers_released.load(Ordering::Acquire)
    }

    pub fn live_buffers(&self) -> u64 {
        self.buffers_created() - self.buffers_released()
    }

    /// Bytes held by buffers that have not been released yet.
    pub fn live_bytes(&self) -> u64 {
        self.live_bytes.load(Ordering::Acquire)
    }

    pub fn pipelines_created(&self) -> u64 {
        self.pipelines_created.load(Ordering::Acquire)
    }

    pub fn pipelines_destroyed(&self) -> u64 {
        self.pipelines_destroyed.load(Ordering::Acquire)
    }

    pub fn live_pipelines(&self) -> u64 {
        self.pipelines_created() - self.pipelines_destroyed()
    }
}

/// A hardware buffer living in system memory.
#[derive(Debug)]
pub struct SystemBuffer {
    id: u64,
    label: String,
    usage: BufferUsage,
    bind: wgpu::BufferUsages,
    data: Mutex<Vec<u8>>,
    lock_mode: Mutex<Option<LockMode>>,
    stats: Arc<BackendStats>,
}

impl SystemBuffer {
    fn new(desc: &HardwareBufferDesc<'_>, stats: Arc<BackendStats>) -> Self {
        stats.buffers_created.fetch_add(1, Ordering::AcqRel);
        stats.live_bytes.fetch_add(desc.size as u64, Ordering::AcqRel);
        Self {
            id: generate_resource_id(),
            label: desc.label.to_string(),
            usage: desc.usage,
            bind: desc.bind,
            data: Mutex::new(vec![0u8; desc.size]),
            lock_mode: Mutex::new(None),
            stats,
        }
    }

    fn check_access(&self, offset: usize, len: usize, write: bool) -> Result<()> {
        let allowed = match *self.lock_mode.lock() {
            Some(mode) if write => mode.can_write(),
            Some(mode) => mode.can_read(),
            None => false,
        };
        if !allowed {
            return Err(GpuError::BufferNotLocked(self.label.clone()));
        }
        let size = self.size();
        if offset.checked_add(len).is_none_or(|end| end > size) {
            return Err(GpuError::LockOutOfBounds { offset, len, size });
        }
        Ok(())
    }
}

impl HardwareBuffer for SystemBuffer {
    fn id(&self) -> u64 {
        self.id
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn size(&self) -> usize {
        self.data.lock().len()
    }

    fn usage(&self) -> BufferUsage {
        self.usage
    }

    fn bind_usage(&self) -> wgpu::BufferUsages {
        self.bind
    }

    fn lock(&self, mode: LockMode) -> Result<()> {
        let mut state = self.lock_mode.lock();
        if state.is_some() {
            return Err(GpuError::BufferLocked(self.label.clone()));
        }
        if mode == LockMode::WriteOnlyDiscard {
            self.data.lock().fill(0);
        }
        *state = Some(mode);
        Ok(())
    }

    fn unlock(&self) {
        *self.lock_mode.lock() = None;
    }

    fn is_locked(&self) -> bool {
        self.lock_mode.lock().is_some()
    }

    fn write_locked(&self, offset: usize, data: &[u8]) -> Result<()> {
        self.check_access(offset, data.len(), true)?;
        self.data.lock()[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn read_locked(&self, offset: usize, out: &mut [u8]) -> Result<()> {
        self.check_access(offset, out.len(), false)?;
        out.copy_from_slice(&self.data.lock()[offset..offset + out.len()]);
        Ok(())
    }
}

impl Drop for SystemBuffer {
    fn drop(&mut self) {
        let size = self.data.get_mut().len() as u64;
        self.stats.buffers_released.fetch_add(1, Ordering::AcqRel);
        self.stats.live_bytes.fetch_sub(size, Ordering::AcqRel);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PipelineKind {
    Graphics,
    Compute,
}

/// [`RenderBackend`] keeping every resource in system memory.
#[derive(Debug, Default)]
pub struct SystemBackend {
    stats: Arc<BackendStats>,
    pipelines: FxHashMap<u64, PipelineKind>,
}

impl SystemBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared allocation counters; stays valid after the backend is moved.
    #[must_use]
    pub fn stats(&self) -> Arc<BackendStats> {
        Arc::clone(&self.stats)
    }

    fn register_pipeline(&mut self, kind: PipelineKind) -> PipelineHandle {
        let id = generate_resource_id();
        self.pipelines.insert(id, kind);
        self.stats.pipelines_created.fetch_add(1, Ordering::AcqRel);
        PipelineHandle(id)
    }
}

impl RenderBackend for SystemBackend {
    fn create_buffer(&mut self, desc: &HardwareBufferDesc<'_>) -> Result<HardwareBufferPtr> {
        if desc.size == 0 {
            return Err(GpuError::Backend(format!(
                "cannot create zero-sized buffer '{}'",
                desc.label
            )));
        }
        Ok(Arc::new(SystemBuffer::new(desc, self.stats())))
    }

    fn create_graphics_pipeline(&mut self, desc: &PipelineStateDesc) -> Result<PipelineHandle> {
        if desc.vertex_program.is_none() && desc.fragment_program.is_none() {
            return Err(GpuError::Backend(
                "graphics pipeline without vertex or fragment program".to_string(),
            ));
        }
        Ok(self.register_pipeline(PipelineKind::Graphics))
    }

    fn create_compute_pipeline(&mut self, program: &GpuProgram) -> Result<PipelineHandle> {
        log::debug!("Linking compute pipeline for program '{}'", program.name());
        Ok(self.register_pipeline(PipelineKind::Compute))
    }

    fn destroy_pipeline(&mut self, handle: PipelineHandle) {
        if self.pipelines.remove(&handle.0).is_some() {
            self.stats.pipelines_destroyed.fetch_add(1, Ordering::AcqRel);
        } else {
            log::warn!("Destroying unknown pipeline {handle:?}");
        }
    }
}
