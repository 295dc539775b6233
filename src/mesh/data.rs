//! CPU-side resource blobs.
//!
//! [`MeshData`] is the structured geometry exchanged with a [`Mesh`](super::Mesh):
//! one byte vector per vertex stream, an index payload and the sub-mesh table.
//! All sizes follow from the declaration, so a blob built through
//! [`MeshDataBuilder`] always satisfies the size invariants checked by
//! [`MeshData::validate`].

use std::any::Any;
use std::collections::BTreeMap;

use bytemuck::Pod;
use smallvec::SmallVec;
use wgpu::{PrimitiveTopology, VertexFormat};

use crate::errors::{GpuError, Result};
use crate::hardware::{IndexType, index_element_size};

// ============================================================================
// Resource Data Tagging
// ============================================================================

/// Type tag carried by every [`GpuResourceData`] blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceDataType {
    MeshData,
    PixelData,
}

impl ResourceDataType {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::MeshData => "MeshData",
            Self::PixelData => "PixelData",
        }
    }
}

/// Data blob transferred into or out of a GPU resource.
pub trait GpuResourceData: Any + Send + Sync {
    fn data_type(&self) -> ResourceDataType;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Downcasts `data` to mesh data, or reports its actual tag.
pub(crate) fn as_mesh_data(data: &dyn GpuResourceData) -> Result<&MeshData> {
    data.as_any()
        .downcast_ref::<MeshData>()
        .filter(|_| data.data_type() == ResourceDataType::MeshData)
        .ok_or(GpuError::InvalidDataType {
            expected: ResourceDataType::MeshData.name(),
            actual: data.data_type().name(),
        })
}

pub(crate) fn as_mesh_data_mut(data: &mut dyn GpuResourceData) -> Result<&mut MeshData> {
    let actual = data.data_type();
    if actual != ResourceDataType::MeshData {
        return Err(GpuError::InvalidDataType {
            expected: ResourceDataType::MeshData.name(),
            actual: actual.name(),
        });
    }
    data.as_any_mut()
        .downcast_mut::<MeshData>()
        .ok_or(GpuError::InvalidDataType {
            expected: ResourceDataType::MeshData.name(),
            actual: actual.name(),
        })
}

/// Raw texel rows of a 2D image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelData {
    pub width: u32,
    pub height: u32,
    pub format: wgpu::TextureFormat,
    pub bytes: Vec<u8>,
}

impl GpuResourceData for PixelData {
    fn data_type(&self) -> ResourceDataType {
        ResourceDataType::PixelData
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ============================================================================
// Vertex Layout
// ============================================================================

/// Meaning of a vertex element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VertexSemantic {
    Position,
    BlendWeights,
    BlendIndices,
    Normal,
    Color,
    TexCoord,
    Binormal,
    Tangent,
    PositionTransformed,
    PointSize,
}

/// One attribute inside a vertex stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexElement {
    pub stream: u16,
    /// Byte offset inside one vertex of the stream.
    pub offset: u32,
    pub format: VertexFormat,
    pub semantic: VertexSemantic,
    pub semantic_index: u16,
}

impl VertexElement {
    #[must_use]
    pub fn new(
        stream: u16,
        offset: u32,
        format: VertexFormat,
        semantic: VertexSemantic,
        semantic_index: u16,
    ) -> Self {
        Self {
            stream,
            offset,
            format,
            semantic,
            semantic_index,
        }
    }

    #[inline]
    #[must_use]
    pub fn size(&self) -> u32 {
        self.format.size() as u32
    }
}

/// Ordered element list describing every vertex stream of a mesh.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct VertexDeclaration {
    elements: Vec<VertexElement>,
}

impl VertexDeclaration {
    #[must_use]
    pub fn new(elements: Vec<VertexElement>) -> Self {
        Self { elements }
    }

    #[must_use]
    pub fn elements(&self) -> &[VertexElement] {
        &self.elements
    }

    #[must_use]
    pub fn find(&self, semantic: VertexSemantic, semantic_index: u16) -> Option<&VertexElement> {
        self.elements
            .iter()
            .find(|e| e.semantic == semantic && e.semantic_index == semantic_index)
    }

    /// Stride of one vertex in `stream` (0 for an unused stream).
    #[must_use]
    pub fn vertex_size(&self, stream: u16) -> u32 {
        self.elements
            .iter()
            .filter(|e| e.stream == stream)
            .map(|e| e.offset + e.size())
            .max()
            .unwrap_or(0)
    }

    /// Stream indices in ascending order.
    #[must_use]
    pub fn streams(&self) -> SmallVec<[u16; 4]> {
        let mut streams: SmallVec<[u16; 4]> = self.elements.iter().map(|e| e.stream).collect();
        streams.sort_unstable();
        streams.dedup();
        streams
    }

    /// wgpu attribute layout of `stream`, shader locations in declaration order.
    #[must_use]
    pub fn wgpu_attributes(&self, stream: u16) -> Vec<wgpu::VertexAttribute> {
        self.elements
            .iter()
            .enumerate()
            .filter(|(_, e)| e.stream == stream)
            .map(|(location, e)| wgpu::VertexAttribute {
                format: e.format,
                offset: u64::from(e.offset),
                shader_location: location as u32,
            })
            .collect()
    }
}

// ============================================================================
// Mesh Data
// ============================================================================

/// Index range of one sub-mesh and how it is assembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubMeshDesc {
    pub index_offset: u32,
    pub index_count: u32,
    pub topology: PrimitiveTopology,
}

/// Structured CPU-side geometry.
///
/// Sub-meshes occupy consecutive ranges of the index payload, in table order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshData {
    num_vertices: u32,
    index_type: IndexType,
    declaration: VertexDeclaration,
    sub_meshes: Vec<SubMeshDesc>,
    index_data: Vec<u8>,
    streams: BTreeMap<u16, Vec<u8>>,
}

impl GpuResourceData for MeshData {
    fn data_type(&self) -> ResourceDataType {
        ResourceDataType::MeshData
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl MeshData {
    #[must_use]
    pub fn builder(num_vertices: u32, index_type: IndexType) -> MeshDataBuilder {
        MeshDataBuilder::new(num_vertices, index_type)
    }

    /// Zero-filled blob with the given shape. Fails when a sub-mesh ends past
    /// the last addressable index.
    pub fn new(
        num_vertices: u32,
        index_type: IndexType,
        declaration: VertexDeclaration,
        sub_meshes: Vec<SubMeshDesc>,
    ) -> Result<Self> {
        let mut num_indices = 0u64;
        for (i, sub) in sub_meshes.iter().enumerate() {
            let end = u64::from(sub.index_offset) + u64::from(sub.index_count);
            if end > u64::from(u32::MAX) {
                return Err(GpuError::InvalidParameters(format!(
                    "sub-mesh {i} range {}..{end} exceeds the index space",
                    sub.index_offset
                )));
            }
            num_indices = num_indices.max(end);
        }
        let streams = declaration
            .streams()
            .into_iter()
            .map(|stream| {
                let len = declaration.vertex_size(stream) as usize * num_vertices as usize;
                (stream, vec![0u8; len])
            })
            .collect();

        Ok(Self {
            num_vertices,
            index_type,
            declaration,
            sub_meshes,
            index_data: vec![0u8; num_indices as usize * index_element_size(index_type)],
            streams,
        })
    }

    #[inline]
    #[must_use]
    pub fn num_vertices(&self) -> u32 {
        self.num_vertices
    }

    #[inline]
    #[must_use]
    pub fn num_indices(&self) -> u32 {
        (self.index_data.len() / self.index_element_size()) as u32
    }

    #[inline]
    #[must_use]
    pub fn index_type(&self) -> IndexType {
        self.index_type
    }

    #[inline]
    #[must_use]
    pub fn index_element_size(&self) -> usize {
        index_element_size(self.index_type)
    }

    #[must_use]
    pub fn declaration(&self) -> &VertexDeclaration {
        &self.declaration
    }

    #[must_use]
    pub fn sub_meshes(&self) -> &[SubMeshDesc] {
        &self.sub_meshes
    }

    #[must_use]
    pub fn index_bytes(&self) -> &[u8] {
        &self.index_data
    }

    pub(crate) fn index_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.index_data
    }

    /// Raw bytes of `stream`, `num_vertices × stride` long.
    #[must_use]
    pub fn stream_bytes(&self, stream: u16) -> Option<&[u8]> {
        self.streams.get(&stream).map(Vec::as_slice)
    }

    pub(crate) fn stream_bytes_mut(&mut self, stream: u16) -> Option<&mut Vec<u8>> {
        self.streams.get_mut(&stream)
    }

    /// Replaces the whole content of `stream`.
    pub fn set_stream_bytes(&mut self, stream: u16, bytes: &[u8]) -> Result<()> {
        let expected = self.declaration.vertex_size(stream) as usize * self.num_vertices as usize;
        let target = self.streams.get_mut(&stream).ok_or(GpuError::IndexOutOfRange {
            context: "Vertex stream",
            index: stream as usize,
            count: self.declaration.streams().len(),
        })?;
        if bytes.len() != expected {
            return Err(GpuError::InvalidParameters(format!(
                "stream {stream} expects {expected} bytes, got {}",
                bytes.len()
            )));
        }
        target.copy_from_slice(bytes);
        Ok(())
    }

    /// Writes one attribute for every vertex. `T` must match the element size.
    pub fn set_vertex_data<T: Pod>(
        &mut self,
        semantic: VertexSemantic,
        semantic_index: u16,
        values: &[T],
    ) -> Result<()> {
        let (element, stride) = self.element_layout::<T>(semantic, semantic_index)?;
        if values.len() != self.num_vertices as usize {
            return Err(GpuError::InvalidParameters(format!(
                "{semantic:?} expects {} values, got {}",
                self.num_vertices,
                values.len()
            )));
        }
        let Some(stream) = self.streams.get_mut(&element.stream) else {
            return Err(GpuError::InvalidParameters(format!(
                "missing storage for stream {}",
                element.stream
            )));
        };
        let size = element.size() as usize;
        for (i, value) in values.iter().enumerate() {
            let start = i * stride + element.offset as usize;
            stream[start..start + size].copy_from_slice(bytemuck::bytes_of(value));
        }
        Ok(())
    }

    /// Reads one attribute of every vertex.
    pub fn vertex_data<T: Pod>(
        &self,
        semantic: VertexSemantic,
        semantic_index: u16,
    ) -> Result<Vec<T>> {
        let (element, stride) = self.element_layout::<T>(semantic, semantic_index)?;
        let stream = self.streams.get(&element.stream).map_or(&[][..], Vec::as_slice);
        let size = element.size() as usize;
        Ok((0..self.num_vertices as usize)
            .map(|i| {
                let start = i * stride + element.offset as usize;
                bytemuck::pod_read_unaligned(&stream[start..start + size])
            })
            .collect())
    }

    fn element_layout<T: Pod>(
        &self,
        semantic: VertexSemantic,
        semantic_index: u16,
    ) -> Result<(VertexElement, usize)> {
        let element = *self
            .declaration
            .find(semantic, semantic_index)
            .ok_or_else(|| {
                GpuError::InvalidParameters(format!(
                    "no {semantic:?}{semantic_index} element in vertex declaration"
                ))
            })?;
        if std::mem::size_of::<T>() != element.size() as usize {
            return Err(GpuError::InvalidParameters(format!(
                "{semantic:?} is {} bytes per vertex, value type is {}",
                element.size(),
                std::mem::size_of::<T>()
            )));
        }
        let stride = self.declaration.vertex_size(element.stream) as usize;
        Ok((element, stride))
    }

    /// Writes the indices of one sub-mesh. `T` must be `u16` or `u32`
    /// matching the index type.
    pub fn set_indices<T: Pod>(&mut self, sub_mesh: usize, indices: &[T]) -> Result<()> {
        let range = self.sub_mesh_byte_range::<T>(sub_mesh, indices.len())?;
        self.index_data[range].copy_from_slice(bytemuck::cast_slice(indices));
        Ok(())
    }

    /// Reads the indices of one sub-mesh.
    pub fn indices<T: Pod>(&self, sub_mesh: usize) -> Result<Vec<T>> {
        let count = self
            .sub_meshes
            .get(sub_mesh)
            .map_or(0, |s| s.index_count as usize);
        let range = self.sub_mesh_byte_range::<T>(sub_mesh, count)?;
        Ok(self.index_data[range]
            .chunks_exact(std::mem::size_of::<T>())
            .map(bytemuck::pod_read_unaligned)
            .collect())
    }

    /// Reorders the triangles of a triangle-list sub-mesh so that triangles
    /// sharing vertices are drawn close together, improving post-transform
    /// vertex cache hits. The set of triangles is unchanged.
    pub fn optimize_vertex_cache(&mut self, sub_mesh: usize) -> Result<()> {
        let desc = *self.sub_meshes.get(sub_mesh).ok_or(GpuError::IndexOutOfRange {
            context: "Sub-mesh",
            index: sub_mesh,
            count: self.sub_meshes.len(),
        })?;
        if desc.topology != PrimitiveTopology::TriangleList {
            return Err(GpuError::InvalidParameters(format!(
                "sub-mesh {sub_mesh} is a {:?}, vertex cache optimization needs a triangle list",
                desc.topology
            )));
        }
        if desc.index_count % 3 != 0 {
            return Err(GpuError::InvalidParameters(format!(
                "sub-mesh {sub_mesh} holds {} indices, not whole triangles",
                desc.index_count
            )));
        }

        let indices: Vec<u32> = match self.index_type {
            IndexType::Uint16 => self
                .indices::<u16>(sub_mesh)?
                .into_iter()
                .map(u32::from)
                .collect(),
            IndexType::Uint32 => self.indices::<u32>(sub_mesh)?,
        };
        if let Some(&index) = indices.iter().find(|&&i| i >= self.num_vertices) {
            return Err(GpuError::IndexOutOfRange {
                context: "Vertex",
                index: index as usize,
                count: self.num_vertices as usize,
            });
        }

        let optimized = meshopt::optimize_vertex_cache(&indices, self.num_vertices as usize);
        match self.index_type {
            IndexType::Uint16 => {
                let narrowed: Vec<u16> = optimized.iter().map(|&i| i as u16).collect();
                self.set_indices(sub_mesh, &narrowed)?;
            }
            IndexType::Uint32 => self.set_indices(sub_mesh, &optimized)?,
        }
        log::debug!(
            "Optimized vertex cache order of sub-mesh {sub_mesh} ({} triangles)",
            desc.index_count / 3
        );
        Ok(())
    }

    fn sub_mesh_byte_range<T: Pod>(
        &self,
        sub_mesh: usize,
        count: usize,
    ) -> Result<std::ops::Range<usize>> {
        let desc = self.sub_meshes.get(sub_mesh).ok_or(GpuError::IndexOutOfRange {
            context: "Sub-mesh",
            index: sub_mesh,
            count: self.sub_meshes.len(),
        })?;
        let element = self.index_element_size();
        if std::mem::size_of::<T>() != element {
            return Err(GpuError::InvalidParameters(format!(
                "index type is {:?}, value type is {} bytes",
                self.index_type,
                std::mem::size_of::<T>()
            )));
        }
        if count != desc.index_count as usize {
            return Err(GpuError::InvalidParameters(format!(
                "sub-mesh {sub_mesh} holds {} indices, got {count}",
                desc.index_count
            )));
        }
        let start = desc.index_offset as usize * element;
        Ok(start..start + count * element)
    }

    /// Checks the size invariants: every stream is `num_vertices × stride`,
    /// the index payload is a whole number of indices and every sub-mesh
    /// range lies inside it.
    pub fn validate(&self) -> Result<()> {
        let streams = self.declaration.streams();
        for &stream in &streams {
            let expected = self.declaration.vertex_size(stream) as usize * self.num_vertices as usize;
            let actual = self.streams.get(&stream).map_or(0, Vec::len);
            if actual != expected {
                return Err(GpuError::InvalidParameters(format!(
                    "stream {stream} holds {actual} bytes, expected {expected}"
                )));
            }
        }
        if let Some(extra) = self.streams.keys().find(|s| !streams.contains(*s)) {
            return Err(GpuError::InvalidParameters(format!(
                "stream {extra} has data but no declared elements"
            )));
        }

        let element = self.index_element_size();
        if self.index_data.len() % element != 0 {
            return Err(GpuError::InvalidParameters(format!(
                "index payload of {} bytes is not a multiple of {element}",
                self.index_data.len()
            )));
        }
        let num_indices = self.num_indices();
        for (i, sub) in self.sub_meshes.iter().enumerate() {
            let end = u64::from(sub.index_offset) + u64::from(sub.index_count);
            if end > u64::from(num_indices) {
                return Err(GpuError::InvalidParameters(format!(
                    "sub-mesh {i} range {}..{end} exceeds index count {num_indices}",
                    sub.index_offset
                )));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Assembles the shape of a [`MeshData`]; element offsets are packed per stream.
#[derive(Debug, Clone)]
pub struct MeshDataBuilder {
    num_vertices: u32,
    index_type: IndexType,
    elements: Vec<VertexElement>,
    sub_meshes: Vec<SubMeshDesc>,
    next_index: u32,
}

impl MeshDataBuilder {
    fn new(num_vertices: u32, index_type: IndexType) -> Self {
        Self {
            num_vertices,
            index_type,
            elements: Vec::new(),
            sub_meshes: Vec::new(),
            next_index: 0,
        }
    }

    /// Appends an element at the end of `stream`.
    #[must_use]
    pub fn element(
        mut self,
        stream: u16,
        format: VertexFormat,
        semantic: VertexSemantic,
        semantic_index: u16,
    ) -> Self {
        let offset = self
            .elements
            .iter()
            .filter(|e| e.stream == stream)
            .map(|e| e.offset + e.size())
            .max()
            .unwrap_or(0);
        self.elements.push(VertexElement::new(
            stream,
            offset,
            format,
            semantic,
            semantic_index,
        ));
        self
    }

    /// Appends a sub-mesh owning the next `index_count` indices.
    #[must_use]
    pub fn sub_mesh(mut self, index_count: u32, topology: PrimitiveTopology) -> Self {
        self.sub_meshes.push(SubMeshDesc {
            index_offset: self.next_index,
            index_count,
            topology,
        });
        // Saturates; the sub-mesh that overflowed is rejected by `build`.
        self.next_index = self.next_index.saturating_add(index_count);
        self
    }

    pub fn build(self) -> Result<MeshData> {
        MeshData::new(
            self.num_vertices,
            self.index_type,
            VertexDeclaration::new(self.elements),
            self.sub_meshes,
        )
    }
}
