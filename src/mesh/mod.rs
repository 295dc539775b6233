//! Mesh Resource
//!
//! A [`Mesh`] owns one hardware vertex buffer per stream, an optional index
//! buffer and the sub-mesh table. Contents move between [`MeshData`] and the
//! hardware buffers on the core thread only:
//!
//! | Operation                          | Thread | Effect                                         |
//! |------------------------------------|--------|------------------------------------------------|
//! | [`Mesh::write_subresource`]        | core   | atomic full replace of buffers and sub-meshes |
//! | [`Mesh::read_subresource`]         | core   | copy buffers into a blob shaped like the mesh |
//! | [`Mesh::allocate_subresource_buffer`] | core | empty blob shaped like the mesh              |
//! | [`Mesh::get_sub_mesh_render_data`] | core   | draw tuple for one sub-mesh                    |
//! | [`Mesh::clone_index_buffer`]       | core   | shared or deep copy of the index buffer        |
//! | [`Mesh::queue_write`] / [`Mesh::queue_read`] | sim | enqueue the above, answer via [`AsyncOp`] |
//!
//! A mesh starts empty. Replacing its contents releases the previous buffers
//! once no draw references them anymore.

mod data;

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use wgpu::PrimitiveTopology;

use crate::core_object::{
    CoreBacked, CoreFactory, CoreObject, CoreObjectCore, CoreObjectId, CoreObjectState, CoreRef,
};
use crate::core_thread::{AsyncOp, CoreContext, CoreQueue, with_context};
use crate::errors::{GpuError, Result};
use crate::hardware::{
    BufferLock, BufferUsage, IndexBuffer, IndexType, LockMode, RenderBackend, VertexBuffer,
};

pub use data::{
    GpuResourceData, MeshData, MeshDataBuilder, PixelData, ResourceDataType, SubMeshDesc,
    VertexDeclaration, VertexElement, VertexSemantic,
};

// ============================================================================
// Core-side Buffers
// ============================================================================

/// Vertex buffers of a mesh, keyed by stream index.
#[derive(Debug)]
pub struct VertexData {
    pub declaration: VertexDeclaration,
    pub vertex_count: u32,
    pub buffers: BTreeMap<u16, VertexBuffer>,
}

impl VertexData {
    #[must_use]
    pub fn buffer(&self, stream: u16) -> Option<&VertexBuffer> {
        self.buffers.get(&stream)
    }
}

/// Everything a draw call needs for one sub-mesh.
#[derive(Debug, Clone)]
pub struct RenderOpMesh {
    pub vertex_data: Option<Arc<VertexData>>,
    pub index_buffer: Option<IndexBuffer>,
    pub index_start: u32,
    pub index_count: u32,
    pub topology: PrimitiveTopology,
    /// Indexed drawing is used whenever the mesh has an index buffer.
    pub use_indexes: bool,
}

/// Summary of a mesh's current contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MeshProperties {
    pub num_vertices: u32,
    pub num_indices: u32,
    /// `None` while the mesh has no index buffer.
    pub index_type: Option<IndexType>,
    pub sub_mesh_count: usize,
}

#[derive(Debug, Default)]
struct MeshBuffers {
    vertex_data: Option<Arc<VertexData>>,
    index_buffer: Option<IndexBuffer>,
    sub_meshes: Vec<SubMeshDesc>,
}

/// Core-thread counterpart of a [`Mesh`].
#[derive(Debug, Default)]
pub struct MeshCore {
    buffers: RwLock<MeshBuffers>,
}

impl CoreObjectCore for MeshCore {
    fn release(&self, _backend: &mut dyn RenderBackend) {
        let old = std::mem::take(&mut *self.buffers.write());
        log::debug!(
            "Releasing mesh buffers ({} vertex streams, indexed: {})",
            old.vertex_data.as_ref().map_or(0, |v| v.buffers.len()),
            old.index_buffer.is_some()
        );
    }
}

impl MeshCore {
    /// Replaces every buffer and the sub-mesh table with the contents of `data`.
    ///
    /// The new buffers are fully built before anything is swapped in, so a
    /// failure leaves the mesh unchanged.
    pub fn write_subresource(&self, ctx: &mut CoreContext, data: &dyn GpuResourceData) -> Result<()> {
        let data = data::as_mesh_data(data)?;
        data.validate()?;

        let declaration = data.declaration().clone();
        let mut vertex_buffers = BTreeMap::new();
        for stream in declaration.streams() {
            let bytes = data.stream_bytes(stream).unwrap_or_default();
            if bytes.is_empty() {
                continue;
            }
            let vertex_size = declaration.vertex_size(stream);
            let buffer = ctx.create_vertex_buffer(vertex_size, data.num_vertices(), BufferUsage::Static)?;
            BufferLock::new(buffer.buffer.as_ref(), LockMode::WriteOnlyDiscard)?.write(0, bytes)?;
            vertex_buffers.insert(stream, buffer);
        }

        let index_buffer = if data.num_indices() > 0 {
            let buffer = ctx.create_index_buffer(data.index_type(), data.num_indices(), BufferUsage::Static)?;
            BufferLock::new(buffer.buffer.as_ref(), LockMode::WriteOnlyDiscard)?
                .write(0, data.index_bytes())?;
            Some(buffer)
        } else {
            None
        };

        let new = MeshBuffers {
            vertex_data: Some(Arc::new(VertexData {
                declaration,
                vertex_count: data.num_vertices(),
                buffers: vertex_buffers,
            })),
            index_buffer,
            sub_meshes: data.sub_meshes().to_vec(),
        };
        let old = std::mem::replace(&mut *self.buffers.write(), new);
        log::debug!(
            "Mesh rewritten: {} vertices, {} indices, {} sub-meshes (replaced {} vertex streams)",
            data.num_vertices(),
            data.num_indices(),
            data.sub_meshes().len(),
            old.vertex_data.as_ref().map_or(0, |v| v.buffers.len())
        );
        Ok(())
    }

    /// Copies the buffers into `data`, which must be shaped like this mesh
    /// (see [`allocate_subresource_buffer`](Self::allocate_subresource_buffer)).
    pub fn read_subresource(&self, data: &mut dyn GpuResourceData) -> Result<()> {
        let out = data::as_mesh_data_mut(data)?;
        let expected = self.allocate_subresource_buffer()?;
        if out.num_vertices() != expected.num_vertices()
            || out.index_type() != expected.index_type()
            || out.declaration() != expected.declaration()
            || out.sub_meshes() != expected.sub_meshes()
        {
            return Err(GpuError::InvalidParameters(
                "destination mesh data is not shaped like the mesh".to_string(),
            ));
        }

        let buffers = self.buffers.read();
        if let Some(index_buffer) = &buffers.index_buffer {
            let element = index_buffer.index_size();
            let lock = BufferLock::new(index_buffer.buffer.as_ref(), LockMode::ReadOnly)?;
            let dst = out.index_bytes_mut();
            for sub in &buffers.sub_meshes {
                let start = sub.index_offset as usize * element;
                let end = start + sub.index_count as usize * element;
                lock.read(start, &mut dst[start..end])?;
            }
        }

        if let Some(vertex_data) = &buffers.vertex_data {
            for (&stream, buffer) in &vertex_data.buffers {
                let Some(dst) = out.stream_bytes_mut(stream) else {
                    continue;
                };
                let lock = BufferLock::new(buffer.buffer.as_ref(), LockMode::ReadOnly)?;
                lock.read(0, dst)?;
            }
        }
        Ok(())
    }

    /// Empty blob shaped like the current contents. Uses 32-bit indices when
    /// there is no index buffer.
    pub fn allocate_subresource_buffer(&self) -> Result<MeshData> {
        let buffers = self.buffers.read();
        let index_type = buffers
            .index_buffer
            .as_ref()
            .map_or(wgpu::IndexFormat::Uint32, |ib| ib.index_type);
        let (num_vertices, declaration) = buffers
            .vertex_data
            .as_ref()
            .map_or((0, VertexDeclaration::default()), |v| {
                (v.vertex_count, v.declaration.clone())
            });
        MeshData::new(num_vertices, index_type, declaration, buffers.sub_meshes.clone())
    }

    /// The current index buffer, shared or copied into new storage; `None`
    /// when the mesh is unindexed.
    pub fn clone_index_buffer(&self, ctx: &mut CoreContext, copy_data: bool) -> Result<Option<IndexBuffer>> {
        let source = self.buffers.read().index_buffer.clone();
        source
            .map(|ib| ctx.clone_index_buffer(&ib, copy_data))
            .transpose()
    }

    /// Draw tuple for sub-mesh `index`.
    pub fn sub_mesh_render_data(&self, index: usize) -> Result<RenderOpMesh> {
        let buffers = self.buffers.read();
        let sub = buffers.sub_meshes.get(index).ok_or(GpuError::IndexOutOfRange {
            context: "Sub-mesh",
            index,
            count: buffers.sub_meshes.len(),
        })?;
        Ok(RenderOpMesh {
            vertex_data: buffers.vertex_data.clone(),
            index_buffer: buffers.index_buffer.clone(),
            index_start: sub.index_offset,
            index_count: sub.index_count,
            topology: sub.topology,
            use_indexes: buffers.index_buffer.is_some(),
        })
    }

    #[must_use]
    pub fn properties(&self) -> MeshProperties {
        let buffers = self.buffers.read();
        MeshProperties {
            num_vertices: buffers.vertex_data.as_ref().map_or(0, |v| v.vertex_count),
            num_indices: buffers.index_buffer.as_ref().map_or(0, |ib| ib.num_indices),
            index_type: buffers.index_buffer.as_ref().map(|ib| ib.index_type),
            sub_mesh_count: buffers.sub_meshes.len(),
        }
    }
}

// ============================================================================
// Sim-side Handle
// ============================================================================

/// Sim-side mesh handle.
///
/// Core-only operations fail with [`GpuError::WrongThread`] elsewhere; use the
/// `queue_*` variants from the sim thread.
pub struct Mesh {
    object: CoreObject<MeshCore>,
    properties: Arc<RwLock<MeshProperties>>,
    initial_data: Mutex<Option<MeshData>>,
}

impl Mesh {
    /// Creates an empty mesh.
    #[must_use]
    pub fn new(queue: &CoreQueue) -> Self {
        Self {
            object: CoreObject::new(queue),
            properties: Arc::new(RwLock::new(MeshProperties::default())),
            initial_data: Mutex::new(None),
        }
    }

    /// Creates a mesh whose counterpart is populated with `data` when it is
    /// realized.
    #[must_use]
    pub fn with_data(queue: &CoreQueue, data: MeshData) -> Self {
        let mesh = Self::new(queue);
        *mesh.initial_data.lock() = Some(data);
        mesh
    }

    #[inline]
    pub fn id(&self) -> CoreObjectId {
        self.object.id()
    }

    pub fn state(&self) -> CoreObjectState {
        self.object.state()
    }

    /// Contents as of the last write executed on the core thread.
    pub fn properties(&self) -> MeshProperties {
        *self.properties.read()
    }

    fn realized_core(&self) -> Result<Arc<MeshCore>> {
        self.get_core()?.get()
    }

    /// Core thread only. See [`MeshCore::write_subresource`].
    pub fn write_subresource(&self, data: &dyn GpuResourceData) -> Result<()> {
        with_context("Mesh::write_subresource", |ctx| {
            write_core(&self.get_core()?, &self.properties, ctx, data)
        })
    }

    /// Core thread only. See [`MeshCore::read_subresource`].
    pub fn read_subresource(&self, data: &mut dyn GpuResourceData) -> Result<()> {
        with_context("Mesh::read_subresource", |_| {
            self.realized_core()?.read_subresource(data)
        })
    }

    /// Core thread only.
    pub fn allocate_subresource_buffer(&self) -> Result<MeshData> {
        with_context("Mesh::allocate_subresource_buffer", |_| {
            self.realized_core()?.allocate_subresource_buffer()
        })
    }

    /// Core thread only. See [`MeshCore::clone_index_buffer`].
    pub fn clone_index_buffer(&self, copy_data: bool) -> Result<Option<IndexBuffer>> {
        with_context("Mesh::clone_index_buffer", |ctx| {
            self.realized_core()?.clone_index_buffer(ctx, copy_data)
        })
    }

    /// Core thread only. A mesh that was never written has no sub-meshes, so
    /// every index is out of range.
    pub fn get_sub_mesh_render_data(&self, index: usize) -> Result<RenderOpMesh> {
        with_context("Mesh::get_sub_mesh_render_data", |_| {
            let core = self.get_core()?;
            if !core.is_realized() {
                return Err(GpuError::IndexOutOfRange {
                    context: "Sub-mesh",
                    index,
                    count: 0,
                });
            }
            core.get()?.sub_mesh_render_data(index)
        })
    }

    /// Enqueues a full replace of the contents. The result arrives once the
    /// batch has been submitted and executed.
    pub fn queue_write(&self, data: MeshData) -> Result<AsyncOp<Result<()>>> {
        let core = self.get_core()?;
        let properties = Arc::clone(&self.properties);
        Ok(self.object.queue().queue_return(move || {
            with_context("Mesh::queue_write", |ctx| {
                write_core(&core, &properties, ctx, &data)
            })
        }))
    }

    /// Enqueues a read-back of the whole mesh.
    pub fn queue_read(&self) -> Result<AsyncOp<Result<MeshData>>> {
        let core = self.get_core()?;
        Ok(self.object.queue().queue_return(move || -> Result<MeshData> {
            let core = core.get()?;
            let mut data = core.allocate_subresource_buffer()?;
            core.read_subresource(&mut data)?;
            Ok(data)
        }))
    }
}

fn write_core(
    core: &CoreRef<MeshCore>,
    properties: &RwLock<MeshProperties>,
    ctx: &mut CoreContext,
    data: &dyn GpuResourceData,
) -> Result<()> {
    let core = core.get()?;
    core.write_subresource(ctx, data)?;
    *properties.write() = core.properties();
    Ok(())
}

impl CoreBacked for Mesh {
    type Core = MeshCore;

    fn core_object(&self) -> &CoreObject<MeshCore> {
        &self.object
    }

    fn create_core(&self) -> CoreFactory<MeshCore> {
        let initial = self.initial_data.lock().take();
        let properties = Arc::clone(&self.properties);
        Box::new(move |ctx| {
            let core = MeshCore::default();
            if let Some(data) = initial {
                core.write_subresource(ctx, &data)?;
                *properties.write() = core.properties();
            }
            Ok(core)
        })
    }
}

impl std::fmt::Debug for Mesh {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mesh")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("properties", &self.properties())
            .finish()
    }
}
