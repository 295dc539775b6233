//! GPU Parameter Set
//!
//! [`GpuParams`] is the CPU-side shadow of every parameter a pipeline
//! declares: data parameters packed into parameter blocks, plus flat texture
//! and sampler slot arrays. Writes land in CPU memory immediately; the
//! hardware only sees them when the set is flushed on the core thread.
//!
//! # Lookup policy
//!
//! | Situation                                  | Error                            |
//! |--------------------------------------------|----------------------------------|
//! | name not declared anywhere                 | [`GpuError::ParameterNotFound`]  |
//! | name declared with another type or kind    | [`GpuError::TypeMismatch`]       |
//! | block slot past the end of the table       | [`GpuError::IndexOutOfRange`]    |
//! | element stride smaller than the value type | [`GpuError::InvalidParameters`]  |
//! | handle used after the set was dropped      | [`GpuError::ParamsDestroyed`]    |
//!
//! # Flushing
//!
//! ```rust,ignore
//! let params = GpuParams::from_param_info(&queue, pipeline.param_info());
//! params.get_param::<Mat4>("world")?.set(world)?;
//!
//! let bindable = params.bindable()?;
//! queue.queue_command(move || {
//!     let binding = bindable.flush().expect("flush on core thread");
//!     // bind `binding.blocks` / textures / samplers
//! });
//! queue.submit()?;
//! ```

mod block;
mod desc;
mod handle;
mod value;

use std::sync::Arc;

use crate::core_object::CoreBacked;
use crate::core_thread::{CoreQueue, ensure_core_thread};
use crate::errors::{GpuError, Result};
use crate::hardware::BufferUsage;
use crate::pipeline::ParamInfo;

pub use block::{GpuParamBlockBuffer, GpuParamBlockBufferCore, ShadowWriteGuard};
pub use desc::{
    GpuParamBlockDesc, GpuParamDataDesc, GpuParamDataType, GpuParamDesc, GpuParamObjectDesc,
    GpuParamObjectType,
};
pub use handle::{
    GpuDataParam, GpuParamSampState, GpuParamStruct, GpuParamTexture, SamplerStateHandle,
    TextureHandle,
};
pub use value::GpuParamValue;

use handle::GpuParamsData;

/// Named shader parameters backed by parameter block buffers.
pub struct GpuParams {
    data: Arc<GpuParamsData>,
}

impl GpuParams {
    /// Creates a set shaped by `desc`, allocating an owned block buffer per block.
    #[must_use]
    pub fn new(queue: &CoreQueue, desc: Arc<GpuParamDesc>, transpose_matrices: bool) -> Self {
        let mut blocks = vec![None; desc.num_block_slots()];
        for block in desc.param_blocks().values() {
            blocks[block.slot as usize] = Some(Arc::new(GpuParamBlockBuffer::new(
                queue,
                block.block_size as usize,
                BufferUsage::Dynamic,
            )));
        }
        log::debug!(
            "Created parameter set with {} blocks, {} params",
            desc.param_blocks().len(),
            desc.params().len()
        );
        Self {
            data: Arc::new(GpuParamsData::new(desc, blocks, transpose_matrices)),
        }
    }

    /// Creates a set for a pipeline, using the queue's matrix convention.
    #[must_use]
    pub fn from_param_info(queue: &CoreQueue, param_info: &ParamInfo) -> Self {
        Self::new(
            queue,
            Arc::clone(param_info.combined()),
            queue.settings().transpose_matrices,
        )
    }

    #[must_use]
    pub fn param_desc(&self) -> &Arc<GpuParamDesc> {
        &self.data.desc
    }

    #[must_use]
    pub fn transpose_matrices(&self) -> bool {
        self.data.transpose_matrices
    }

    // ========================================================================
    // Queries
    // ========================================================================

    #[must_use]
    pub fn has_param(&self, name: &str) -> bool {
        self.data.desc.params().contains_key(name)
    }

    #[must_use]
    pub fn has_texture(&self, name: &str) -> bool {
        self.data.desc.textures().contains_key(name)
    }

    #[must_use]
    pub fn has_sampler_state(&self, name: &str) -> bool {
        self.data.desc.samplers().contains_key(name)
    }

    #[must_use]
    pub fn has_param_block(&self, name: &str) -> bool {
        self.data.desc.param_blocks().contains_key(name)
    }

    /// Element size of a data parameter in bytes; 0 when it does not exist.
    #[must_use]
    pub fn data_param_size(&self, name: &str) -> u32 {
        self.data.desc.param(name).map_or(0, |p| p.element_size)
    }

    // ========================================================================
    // Handles
    // ========================================================================

    pub fn get_param<T: GpuParamValue>(&self, name: &str) -> Result<GpuDataParam<T>> {
        self.data.check_alive()?;
        let desc = self.lookup_data(name, T::TYPE.name())?;
        if desc.param_type != T::TYPE {
            return Err(GpuError::TypeMismatch {
                name: name.to_string(),
                declared: desc.param_type.name(),
                requested: T::TYPE.name(),
            });
        }
        let value_size = std::mem::size_of::<T>();
        if value_size > desc.element_size as usize {
            return Err(GpuError::InvalidParameters(format!(
                "Parameter '{name}' reserves {} bytes per element, a {} needs {value_size}",
                desc.element_size,
                T::TYPE.name()
            )));
        }
        Ok(GpuDataParam::new(Arc::clone(&self.data), desc))
    }

    pub fn get_struct_param(&self, name: &str) -> Result<GpuParamStruct> {
        self.data.check_alive()?;
        let requested = GpuParamDataType::Struct.name();
        let desc = self.lookup_data(name, requested)?;
        if desc.param_type != GpuParamDataType::Struct {
            return Err(GpuError::TypeMismatch {
                name: name.to_string(),
                declared: desc.param_type.name(),
                requested,
            });
        }
        Ok(GpuParamStruct::new(Arc::clone(&self.data), desc))
    }

    pub fn get_texture_param(&self, name: &str) -> Result<GpuParamTexture> {
        self.data.check_alive()?;
        let desc = self.data.desc.textures().get(name).ok_or_else(|| {
            self.not_found_or_mismatch(name, GpuParamObjectType::Texture2D.name())
        })?;
        Ok(GpuParamTexture::new(Arc::clone(&self.data), desc.slot))
    }

    pub fn get_sampler_state_param(&self, name: &str) -> Result<GpuParamSampState> {
        self.data.check_alive()?;
        let desc = self.data.desc.samplers().get(name).ok_or_else(|| {
            self.not_found_or_mismatch(name, GpuParamObjectType::Sampler.name())
        })?;
        Ok(GpuParamSampState::new(Arc::clone(&self.data), desc.slot))
    }

    fn lookup_data(&self, name: &str, requested: &'static str) -> Result<&GpuParamDataDesc> {
        self.data
            .desc
            .param(name)
            .ok_or_else(|| self.not_found_or_mismatch(name, requested))
    }

    fn not_found_or_mismatch(&self, name: &str, requested: &'static str) -> GpuError {
        match self.data.desc.declared_kind(name) {
            Some(declared) => GpuError::TypeMismatch {
                name: name.to_string(),
                declared,
                requested,
            },
            None => GpuError::ParameterNotFound(name.to_string()),
        }
    }

    // ========================================================================
    // Block Buffers
    // ========================================================================

    /// Binds `buffer` to block `slot`. The layout is not validated; sharing a
    /// buffer between sets with different layouts is the caller's problem.
    pub fn set_param_block_buffer(&self, slot: u32, buffer: Arc<GpuParamBlockBuffer>) -> Result<()> {
        self.data.check_alive()?;
        let mut blocks = self.data.blocks.write();
        let count = blocks.len();
        let entry = blocks
            .get_mut(slot as usize)
            .ok_or(GpuError::IndexOutOfRange {
                context: "Parameter block",
                index: slot as usize,
                count,
            })?;
        *entry = Some(buffer);
        Ok(())
    }

    pub fn set_param_block_buffer_by_name(
        &self,
        name: &str,
        buffer: Arc<GpuParamBlockBuffer>,
    ) -> Result<()> {
        let slot = self
            .data
            .desc
            .param_blocks()
            .get(name)
            .ok_or_else(|| GpuError::ParameterNotFound(name.to_string()))?
            .slot;
        self.set_param_block_buffer(slot, buffer)
    }

    pub fn param_block_buffer(&self, slot: u32) -> Result<Arc<GpuParamBlockBuffer>> {
        self.data.check_alive()?;
        self.data.block(slot)
    }

    pub fn param_block_buffer_by_name(&self, name: &str) -> Result<Arc<GpuParamBlockBuffer>> {
        let slot = self
            .data
            .desc
            .param_blocks()
            .get(name)
            .ok_or_else(|| GpuError::ParameterNotFound(name.to_string()))?
            .slot;
        self.param_block_buffer(slot)
    }

    // ========================================================================
    // Flush
    // ========================================================================

    /// Captures the current bindings for the core thread.
    ///
    /// Queues creation of every block buffer not realized yet and snapshots the
    /// shadow bytes of every block newer than its last upload. The result must
    /// be flushed (on the core thread, after this point in the queue) for the
    /// snapshots to reach the hardware. Dropping it unflushed loses nothing:
    /// the next `bindable()` snapshots the same blocks again.
    pub fn bindable(&self) -> Result<BindableGpuParams> {
        self.data.check_alive()?;
        let blocks = self
            .data
            .blocks
            .read()
            .iter()
            .map(|slot| {
                slot.as_ref()
                    .map(|buffer| {
                        buffer.initialize()?;
                        Ok::<_, GpuError>(BlockSnapshot {
                            buffer: Arc::clone(buffer),
                            pending: buffer.snapshot_if_stale(),
                        })
                    })
                    .transpose()
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(BindableGpuParams {
            blocks,
            textures: self.data.textures.read().clone(),
            samplers: self.data.samplers.read().clone(),
        })
    }
}

impl Drop for GpuParams {
    fn drop(&mut self) {
        self.data.mark_destroyed();
    }
}

impl std::fmt::Debug for GpuParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuParams")
            .field("params", &self.data.desc.params().len())
            .field("blocks", &self.data.desc.param_blocks().len())
            .field("transpose_matrices", &self.data.transpose_matrices)
            .finish()
    }
}

struct BlockSnapshot {
    buffer: Arc<GpuParamBlockBuffer>,
    pending: Option<(u64, Vec<u8>)>,
}

/// Bindings of a [`GpuParams`] captured for one submission.
pub struct BindableGpuParams {
    blocks: Vec<Option<BlockSnapshot>>,
    textures: Vec<Option<TextureHandle>>,
    samplers: Vec<Option<SamplerStateHandle>>,
}

impl BindableGpuParams {
    /// Core thread only. Uploads every captured block whose version is newer
    /// than what its hardware buffer holds, and resolves the bindings.
    pub fn flush(self) -> Result<GpuParamsBinding> {
        ensure_core_thread("BindableGpuParams::flush")?;
        let mut uploaded_blocks = 0;
        let mut blocks = Vec::with_capacity(self.blocks.len());
        for snapshot in self.blocks {
            let Some(snapshot) = snapshot else {
                blocks.push(None);
                continue;
            };
            let core = snapshot.buffer.get_core()?.get()?;
            if let Some((version, bytes)) = &snapshot.pending
                && core.upload(*version, bytes)?
            {
                uploaded_blocks += 1;
            }
            blocks.push(Some(core));
        }
        Ok(GpuParamsBinding {
            blocks,
            textures: self.textures,
            samplers: self.samplers,
            uploaded_blocks,
        })
    }
}

impl std::fmt::Debug for BindableGpuParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindableGpuParams")
            .field("blocks", &self.blocks.len())
            .field(
                "dirty",
                &self
                    .blocks
                    .iter()
                    .flatten()
                    .filter(|b| b.pending.is_some())
                    .count(),
            )
            .finish()
    }
}

/// Resolved bindings, ready to be set on the backend.
#[derive(Debug)]
pub struct GpuParamsBinding {
    /// Block buffers by slot.
    pub blocks: Vec<Option<Arc<GpuParamBlockBufferCore>>>,
    pub textures: Vec<Option<TextureHandle>>,
    pub samplers: Vec<Option<SamplerStateHandle>>,
    /// Number of blocks written to the hardware by this flush.
    pub uploaded_blocks: usize,
}
