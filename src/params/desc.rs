//! Parameter descriptor tables, as produced by shader reflection.
//!
//! Offsets and sizes are in bytes. Block, texture and sampler slots are
//! independent numbering spaces.

use rustc_hash::FxHashMap;

/// Type of a data parameter stored in a parameter block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuParamDataType {
    Float1,
    Float2,
    Float3,
    Float4,
    Matrix3x3,
    Matrix4x4,
    Struct,
}

impl GpuParamDataType {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Float1 => "float",
            Self::Float2 => "float2",
            Self::Float3 => "float3",
            Self::Float4 => "float4",
            Self::Matrix3x3 => "float3x3",
            Self::Matrix4x4 => "float4x4",
            Self::Struct => "struct",
        }
    }

    /// Unpadded size in bytes; `None` for structs, whose size is declared.
    #[must_use]
    pub fn size(self) -> Option<u32> {
        match self {
            Self::Float1 => Some(4),
            Self::Float2 => Some(8),
            Self::Float3 => Some(12),
            Self::Float4 => Some(16),
            Self::Matrix3x3 => Some(36),
            Self::Matrix4x4 => Some(64),
            Self::Struct => None,
        }
    }
}

/// Type of an object parameter bound by slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuParamObjectType {
    Texture1D,
    Texture2D,
    Texture3D,
    TextureCube,
    Sampler,
}

impl GpuParamObjectType {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Texture1D => "texture1d",
            Self::Texture2D => "texture2d",
            Self::Texture3D => "texture3d",
            Self::TextureCube => "textureCube",
            Self::Sampler => "sampler",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuParamDataDesc {
    pub name: String,
    pub param_type: GpuParamDataType,
    /// Bytes reserved per element, padding included.
    pub element_size: u32,
    /// Number of array elements; 1 for plain values.
    pub array_size: u32,
    pub array_element_stride: u32,
    pub block_slot: u32,
    pub offset: u32,
}

impl GpuParamDataDesc {
    /// Bytes covered by the whole parameter, array included.
    #[must_use]
    pub fn total_size(&self) -> u32 {
        self.array_element_stride * self.array_size.saturating_sub(1) + self.element_size
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuParamBlockDesc {
    pub name: String,
    pub slot: u32,
    pub block_size: u32,
    /// Whether several parameter sets may bind the same buffer for this block.
    pub is_shareable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuParamObjectDesc {
    pub name: String,
    pub object_type: GpuParamObjectType,
    pub slot: u32,
}

/// Every parameter a program (or a whole pipeline) declares.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GpuParamDesc {
    params: FxHashMap<String, GpuParamDataDesc>,
    param_blocks: FxHashMap<String, GpuParamBlockDesc>,
    textures: FxHashMap<String, GpuParamObjectDesc>,
    samplers: FxHashMap<String, GpuParamObjectDesc>,
}

impl GpuParamDesc {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Builder
    // ========================================================================

    #[must_use]
    pub fn with_block(mut self, name: &str, slot: u32, block_size: u32) -> Self {
        self.add_block(GpuParamBlockDesc {
            name: name.to_string(),
            slot,
            block_size,
            is_shareable: true,
        });
        self
    }

    /// Declares a plain value. Uses the unpadded size of `param_type`
    /// (structs must go through [`with_struct`](Self::with_struct)).
    #[must_use]
    pub fn with_param(
        self,
        name: &str,
        param_type: GpuParamDataType,
        block_slot: u32,
        offset: u32,
    ) -> Self {
        let size = param_type.size().unwrap_or(0);
        self.with_array(name, param_type, block_slot, offset, 1, size)
    }

    /// Declares an array; `stride` is both the element size and the distance
    /// between elements.
    #[must_use]
    pub fn with_array(
        mut self,
        name: &str,
        param_type: GpuParamDataType,
        block_slot: u32,
        offset: u32,
        array_size: u32,
        stride: u32,
    ) -> Self {
        self.add_param(GpuParamDataDesc {
            name: name.to_string(),
            param_type,
            element_size: stride,
            array_size,
            array_element_stride: stride,
            block_slot,
            offset,
        });
        self
    }

    #[must_use]
    pub fn with_struct(mut self, name: &str, size: u32, block_slot: u32, offset: u32) -> Self {
        self.add_param(GpuParamDataDesc {
            name: name.to_string(),
            param_type: GpuParamDataType::Struct,
            element_size: size,
            array_size: 1,
            array_element_stride: size,
            block_slot,
            offset,
        });
        self
    }

    #[must_use]
    pub fn with_texture(mut self, name: &str, slot: u32, object_type: GpuParamObjectType) -> Self {
        self.add_texture(GpuParamObjectDesc {
            name: name.to_string(),
            object_type,
            slot,
        });
        self
    }

    #[must_use]
    pub fn with_sampler(mut self, name: &str, slot: u32) -> Self {
        self.add_sampler(GpuParamObjectDesc {
            name: name.to_string(),
            object_type: GpuParamObjectType::Sampler,
            slot,
        });
        self
    }

    pub fn add_param(&mut self, desc: GpuParamDataDesc) {
        self.params.insert(desc.name.clone(), desc);
    }

    pub fn add_block(&mut self, desc: GpuParamBlockDesc) {
        self.param_blocks.insert(desc.name.clone(), desc);
    }

    pub fn add_texture(&mut self, desc: GpuParamObjectDesc) {
        self.textures.insert(desc.name.clone(), desc);
    }

    pub fn add_sampler(&mut self, desc: GpuParamObjectDesc) {
        self.samplers.insert(desc.name.clone(), desc);
    }

    // ========================================================================
    // Queries
    // ========================================================================

    #[must_use]
    pub fn params(&self) -> &FxHashMap<String, GpuParamDataDesc> {
        &self.params
    }

    #[must_use]
    pub fn param_blocks(&self) -> &FxHashMap<String, GpuParamBlockDesc> {
        &self.param_blocks
    }

    #[must_use]
    pub fn textures(&self) -> &FxHashMap<String, GpuParamObjectDesc> {
        &self.textures
    }

    #[must_use]
    pub fn samplers(&self) -> &FxHashMap<String, GpuParamObjectDesc> {
        &self.samplers
    }

    #[must_use]
    pub fn param(&self, name: &str) -> Option<&GpuParamDataDesc> {
        self.params.get(name)
    }

    #[must_use]
    pub fn block_by_slot(&self, slot: u32) -> Option<&GpuParamBlockDesc> {
        self.param_blocks.values().find(|b| b.slot == slot)
    }

    /// One past the highest block slot in use.
    #[must_use]
    pub fn num_block_slots(&self) -> usize {
        slot_count(self.param_blocks.values().map(|b| b.slot))
    }

    #[must_use]
    pub fn num_texture_slots(&self) -> usize {
        slot_count(self.textures.values().map(|t| t.slot))
    }

    #[must_use]
    pub fn num_sampler_slots(&self) -> usize {
        slot_count(self.samplers.values().map(|s| s.slot))
    }

    /// Declared kind of `name` in any of the tables, for error reporting.
    pub(crate) fn declared_kind(&self, name: &str) -> Option<&'static str> {
        if let Some(param) = self.params.get(name) {
            Some(param.param_type.name())
        } else if let Some(texture) = self.textures.get(name) {
            Some(texture.object_type.name())
        } else if self.samplers.contains_key(name) {
            Some(GpuParamObjectType::Sampler.name())
        } else if self.param_blocks.contains_key(name) {
            Some("block")
        } else {
            None
        }
    }
}

fn slot_count(slots: impl Iterator<Item = u32>) -> usize {
    slots.max().map_or(0, |max| max as usize + 1)
}
