//! Typed parameter handles.
//!
//! A handle remembers where its parameter lives (block slot, byte offset,
//! element layout) and shares the parameter set's storage. Once the set is
//! destroyed every handle fails with [`GpuError::ParamsDestroyed`].

use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use slotmap::new_key_type;

use super::block::GpuParamBlockBuffer;
use super::desc::{GpuParamDataDesc, GpuParamDesc};
use super::value::GpuParamValue;
use crate::errors::{GpuError, Result};

new_key_type! {
    /// Texture owned by the external texture system.
    pub struct TextureHandle;
    /// Sampler state owned by the external texture system.
    pub struct SamplerStateHandle;
}

/// Storage shared between a parameter set and the handles it issued.
pub(crate) struct GpuParamsData {
    pub(crate) desc: Arc<GpuParamDesc>,
    pub(crate) blocks: RwLock<Vec<Option<Arc<GpuParamBlockBuffer>>>>,
    pub(crate) textures: RwLock<Vec<Option<TextureHandle>>>,
    pub(crate) samplers: RwLock<Vec<Option<SamplerStateHandle>>>,
    pub(crate) transpose_matrices: bool,
    destroyed: AtomicBool,
}

impl GpuParamsData {
    pub(crate) fn new(
        desc: Arc<GpuParamDesc>,
        blocks: Vec<Option<Arc<GpuParamBlockBuffer>>>,
        transpose_matrices: bool,
    ) -> Self {
        let textures = vec![None; desc.num_texture_slots()];
        let samplers = vec![None; desc.num_sampler_slots()];
        Self {
            desc,
            blocks: RwLock::new(blocks),
            textures: RwLock::new(textures),
            samplers: RwLock::new(samplers),
            transpose_matrices,
            destroyed: AtomicBool::new(false),
        }
    }

    pub(crate) fn mark_destroyed(&self) {
        self.destroyed.store(true, Ordering::Release);
    }

    #[inline]
    pub(crate) fn check_alive(&self) -> Result<()> {
        if self.destroyed.load(Ordering::Acquire) {
            Err(GpuError::ParamsDestroyed)
        } else {
            Ok(())
        }
    }

    pub(crate) fn block(&self, slot: u32) -> Result<Arc<GpuParamBlockBuffer>> {
        let blocks = self.blocks.read();
        blocks
            .get(slot as usize)
            .and_then(Clone::clone)
            .ok_or(GpuError::IndexOutOfRange {
                context: "Parameter block",
                index: slot as usize,
                count: blocks.len(),
            })
    }
}

/// Where a data parameter lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DataLocation {
    block_slot: u32,
    offset: u32,
    element_size: u32,
    array_size: u32,
    array_stride: u32,
}

impl DataLocation {
    fn from_desc(desc: &GpuParamDataDesc) -> Self {
        Self {
            block_slot: desc.block_slot,
            offset: desc.offset,
            element_size: desc.element_size,
            array_size: desc.array_size.max(1),
            array_stride: desc.array_element_stride,
        }
    }

    fn element_offset(&self, index: u32) -> Result<usize> {
        if index >= self.array_size {
            return Err(GpuError::IndexOutOfRange {
                context: "Parameter array",
                index: index as usize,
                count: self.array_size as usize,
            });
        }
        Ok(self.offset as usize + (index * self.array_stride) as usize)
    }
}

// ============================================================================
// Data Parameters
// ============================================================================

/// Handle to a scalar, vector or matrix parameter.
pub struct GpuDataParam<T> {
    data: Arc<GpuParamsData>,
    location: DataLocation,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for GpuDataParam<T> {
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
            location: self.location,
            _marker: PhantomData,
        }
    }
}

impl<T: GpuParamValue> GpuDataParam<T> {
    pub(crate) fn new(data: Arc<GpuParamsData>, desc: &GpuParamDataDesc) -> Self {
        Self {
            data,
            location: DataLocation::from_desc(desc),
            _marker: PhantomData,
        }
    }

    pub fn set(&self, value: T) -> Result<()> {
        self.set_at(0, value)
    }

    /// Writes array element `index`. Matrices are transposed first when the
    /// parameter set was created with transposition enabled.
    pub fn set_at(&self, index: u32, value: T) -> Result<()> {
        self.data.check_alive()?;
        let offset = self.location.element_offset(index)?;
        let value = if self.data.transpose_matrices {
            value.transposed()
        } else {
            value
        };
        self.data.block(self.location.block_slot)?.write_padded(
            offset,
            bytemuck::bytes_of(&value),
            self.location.element_size as usize,
        )
    }

    /// Reads back element 0 in its stored layout.
    pub fn get(&self) -> Result<T> {
        self.get_at(0)
    }

    pub fn get_at(&self, index: u32) -> Result<T> {
        self.data.check_alive()?;
        let offset = self.location.element_offset(index)?;
        let mut bytes = vec![0u8; std::mem::size_of::<T>()];
        self.data
            .block(self.location.block_slot)?
            .read(offset, &mut bytes)?;
        Ok(bytemuck::pod_read_unaligned(&bytes))
    }

    #[must_use]
    pub fn array_size(&self) -> u32 {
        self.location.array_size
    }
}

impl<T> std::fmt::Debug for GpuDataParam<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuDataParam")
            .field("type", &std::any::type_name::<T>())
            .field("location", &self.location)
            .finish()
    }
}

/// Handle to a struct parameter, written as raw bytes.
#[derive(Clone)]
pub struct GpuParamStruct {
    data: Arc<GpuParamsData>,
    location: DataLocation,
}

impl GpuParamStruct {
    pub(crate) fn new(data: Arc<GpuParamsData>, desc: &GpuParamDataDesc) -> Self {
        Self {
            data,
            location: DataLocation::from_desc(desc),
        }
    }

    /// Declared size of one element.
    #[must_use]
    pub fn element_size(&self) -> u32 {
        self.location.element_size
    }

    pub fn set(&self, bytes: &[u8]) -> Result<()> {
        self.set_at(0, bytes)
    }

    /// Writes element `index`; shorter input is zero-padded, longer input rejected.
    pub fn set_at(&self, index: u32, bytes: &[u8]) -> Result<()> {
        self.data.check_alive()?;
        let offset = self.location.element_offset(index)?;
        if bytes.len() > self.location.element_size as usize {
            return Err(GpuError::InvalidParameters(format!(
                "struct element is {} bytes, got {}",
                self.location.element_size,
                bytes.len()
            )));
        }
        self.data.block(self.location.block_slot)?.write_padded(
            offset,
            bytes,
            self.location.element_size as usize,
        )
    }

    pub fn get(&self) -> Result<Vec<u8>> {
        self.get_at(0)
    }

    pub fn get_at(&self, index: u32) -> Result<Vec<u8>> {
        self.data.check_alive()?;
        let offset = self.location.element_offset(index)?;
        let mut bytes = vec![0u8; self.location.element_size as usize];
        self.data
            .block(self.location.block_slot)?
            .read(offset, &mut bytes)?;
        Ok(bytes)
    }
}

impl std::fmt::Debug for GpuParamStruct {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuParamStruct")
            .field("location", &self.location)
            .finish()
    }
}

// ============================================================================
// Object Parameters
// ============================================================================

/// Handle to a texture slot.
#[derive(Clone)]
pub struct GpuParamTexture {
    data: Arc<GpuParamsData>,
    slot: u32,
}

impl GpuParamTexture {
    pub(crate) fn new(data: Arc<GpuParamsData>, slot: u32) -> Self {
        Self { data, slot }
    }

    #[must_use]
    pub fn slot(&self) -> u32 {
        self.slot
    }

    pub fn set(&self, texture: Option<TextureHandle>) -> Result<()> {
        self.data.check_alive()?;
        set_slot(&self.data.textures, self.slot, texture, "Texture")
    }

    pub fn get(&self) -> Result<Option<TextureHandle>> {
        self.data.check_alive()?;
        Ok(self.data.textures.read().get(self.slot as usize).copied().flatten())
    }
}

/// Handle to a sampler state slot.
#[derive(Clone)]
pub struct GpuParamSampState {
    data: Arc<GpuParamsData>,
    slot: u32,
}

impl GpuParamSampState {
    pub(crate) fn new(data: Arc<GpuParamsData>, slot: u32) -> Self {
        Self { data, slot }
    }

    #[must_use]
    pub fn slot(&self) -> u32 {
        self.slot
    }

    pub fn set(&self, sampler: Option<SamplerStateHandle>) -> Result<()> {
        self.data.check_alive()?;
        set_slot(&self.data.samplers, self.slot, sampler, "Sampler")
    }

    pub fn get(&self) -> Result<Option<SamplerStateHandle>> {
        self.data.check_alive()?;
        Ok(self.data.samplers.read().get(self.slot as usize).copied().flatten())
    }
}

impl std::fmt::Debug for GpuParamTexture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuParamTexture").field("slot", &self.slot).finish()
    }
}

impl std::fmt::Debug for GpuParamSampState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuParamSampState").field("slot", &self.slot).finish()
    }
}

fn set_slot<K: Copy>(
    slots: &RwLock<Vec<Option<K>>>,
    slot: u32,
    value: Option<K>,
    context: &'static str,
) -> Result<()> {
    let mut slots = slots.write();
    let count = slots.len();
    let entry = slots.get_mut(slot as usize).ok_or(GpuError::IndexOutOfRange {
        context,
        index: slot as usize,
        count,
    })?;
    *entry = value;
    Ok(())
}
