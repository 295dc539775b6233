use std::sync::Arc;

use crate::core_object::CoreObjectCore;
use crate::errors::Result;
use crate::hardware::{
    BufferLock, BufferUsage, HardwareBufferDesc, HardwareBufferPtr, IndexBuffer, IndexType, LockMode,
    RenderBackend, VertexBuffer, index_element_size,
};
use crate::settings::CoreThreadSettings;

/// A destroyed core object still referenced from somewhere else
/// (typically a draw that has not completed yet).
struct PendingRelease {
    id: u64,
    core: Arc<dyn CoreObjectCore>,
    requested_frame: u64,
    warned: bool,
}

/// State owned by the core thread: the backend and everything waiting on it.
///
/// Only reachable through [`with_context`](super::with_context), so holding a
/// `&mut CoreContext` proves the caller runs on the core thread.
pub struct CoreContext {
    backend: Box<dyn RenderBackend>,
    settings: Arc<CoreThreadSettings>,
    pending_releases: Vec<PendingRelease>,
    frame_index: u64,
}

impl CoreContext {
    pub(crate) fn new(backend: Box<dyn RenderBackend>, settings: Arc<CoreThreadSettings>) -> Self {
        Self {
            backend,
            settings,
            pending_releases: Vec::new(),
            frame_index: 0,
        }
    }

    pub fn backend(&mut self) -> &mut dyn RenderBackend {
        self.backend.as_mut()
    }

    pub fn settings(&self) -> &CoreThreadSettings {
        &self.settings
    }

    /// Number of batches fully executed so far.
    #[inline]
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Destroyed objects whose release waits for an outstanding reference.
    #[inline]
    pub fn pending_release_count(&self) -> usize {
        self.pending_releases.len()
    }

    pub fn create_index_buffer(
        &mut self,
        index_type: IndexType,
        num_indices: u32,
        usage: BufferUsage,
    ) -> Result<IndexBuffer> {
        let buffer = self.backend.create_buffer(&HardwareBufferDesc {
            label: "IndexBuffer",
            size: index_element_size(index_type) * num_indices as usize,
            usage,
            bind: wgpu::BufferUsages::INDEX | wgpu::BufferUsages::COPY_DST,
        })?;
        Ok(IndexBuffer {
            buffer,
            index_type,
            num_indices,
        })
    }

    /// Copy of `source`. With `copy_data` the contents go to a new hardware
    /// buffer; otherwise the copy shares the source's storage.
    pub fn clone_index_buffer(&mut self, source: &IndexBuffer, copy_data: bool) -> Result<IndexBuffer> {
        if !copy_data {
            return Ok(source.clone());
        }
        let copy = self.create_index_buffer(source.index_type, source.num_indices, source.buffer.usage())?;
        let mut bytes = vec![0u8; source.buffer.size()];
        BufferLock::new(source.buffer.as_ref(), LockMode::ReadOnly)?.read(0, &mut bytes)?;
        BufferLock::new(copy.buffer.as_ref(), LockMode::WriteOnlyDiscard)?.write(0, &bytes)?;
        Ok(copy)
    }

    pub fn create_vertex_buffer(
        &mut self,
        vertex_size: u32,
        num_vertices: u32,
        usage: BufferUsage,
    ) -> Result<VertexBuffer> {
        let buffer = self.backend.create_buffer(&HardwareBufferDesc {
            label: "VertexBuffer",
            size: vertex_size as usize * num_vertices as usize,
            usage,
            bind: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
        })?;
        Ok(VertexBuffer {
            buffer,
            vertex_size,
            num_vertices,
        })
    }

    /// Uniform buffer backing one parameter block.
    pub fn create_param_block_buffer(
        &mut self,
        size: usize,
        usage: BufferUsage,
    ) -> Result<HardwareBufferPtr> {
        self.backend.create_buffer(&HardwareBufferDesc {
            label: "ParamBlockBuffer",
            size,
            usage,
            bind: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        })
    }

    /// Releases `core` now if nothing else references it, otherwise once the
    /// last outstanding reference drops.
    pub(crate) fn schedule_release(&mut self, id: u64, core: Arc<dyn CoreObjectCore>) {
        if Arc::strong_count(&core) == 1 {
            log::debug!("Releasing core object {id}");
            core.release(self.backend.as_mut());
            return;
        }
        log::debug!("Core object {id} still referenced, deferring release");
        self.pending_releases.push(PendingRelease {
            id,
            core,
            requested_frame: self.frame_index,
            warned: false,
        });
    }

    /// Frame boundary: retries deferred releases and advances the frame counter.
    pub(crate) fn end_batch(&mut self) {
        let frame = self.frame_index;
        let warn_after = self.settings.deferred_release_warn_frames;
        let backend = self.backend.as_mut();

        self.pending_releases.retain_mut(|pending| {
            if Arc::strong_count(&pending.core) == 1 {
                log::debug!("Releasing deferred core object {}", pending.id);
                pending.core.release(backend);
                return false;
            }
            if !pending.warned && frame.saturating_sub(pending.requested_frame) >= warn_after {
                log::warn!(
                    "Core object {} destroyed {} frames ago is still referenced",
                    pending.id,
                    frame - pending.requested_frame
                );
                pending.warned = true;
            }
            true
        });

        self.frame_index += 1;
    }

    /// Releases everything still pending. Called once when the core thread stops.
    pub(crate) fn shutdown(mut self) {
        if !self.pending_releases.is_empty() {
            log::warn!(
                "Core thread stopping with {} referenced core objects, releasing anyway",
                self.pending_releases.len()
            );
        }
        for pending in self.pending_releases.drain(..) {
            pending.core.release(self.backend.as_mut());
        }
    }
}
