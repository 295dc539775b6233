//! Mesh Resource Tests
//!
//! Tests for:
//! - MeshData: builder layout, vertex/index accessors, validation
//! - write/read round-trip through hardware buffers
//! - Full-replace semantics and release of replaced buffers
//! - Sub-mesh render data and bounds
//! - Vertex cache ordering and index buffer clones
//! - Thread affinity and blob type checks

use std::sync::Arc;

use glam::{Vec2, Vec3, Vec4};
use wgpu::{IndexFormat, PrimitiveTopology, VertexFormat};

use myth_gpu::core_object::CoreBacked;
use myth_gpu::core_thread::CoreThread;
use myth_gpu::errors::GpuError;
use myth_gpu::hardware::{BackendStats, BufferLock, LockMode, SystemBackend};
use myth_gpu::mesh::{
    Mesh, MeshData, MeshProperties, PixelData, SubMeshDesc, VertexDeclaration, VertexSemantic,
};
use myth_gpu::settings::CoreThreadSettings;

fn spawn_core() -> (CoreThread, Arc<BackendStats>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let backend = SystemBackend::new();
    let stats = backend.stats();
    let core = CoreThread::spawn(backend, CoreThreadSettings::default()).expect("spawn core thread");
    (core, stats)
}

/// Two streams, two sub-meshes, 16-bit indices.
fn quad_data() -> MeshData {
    let mut data = MeshData::builder(4, IndexFormat::Uint16)
        .element(0, VertexFormat::Float32x3, VertexSemantic::Position, 0)
        .element(0, VertexFormat::Float32x2, VertexSemantic::TexCoord, 0)
        .element(1, VertexFormat::Float32x4, VertexSemantic::Color, 0)
        .sub_mesh(6, PrimitiveTopology::TriangleList)
        .sub_mesh(2, PrimitiveTopology::LineList)
        .build()
        .unwrap();

    data.set_vertex_data(
        VertexSemantic::Position,
        0,
        &[
            Vec3::new(-1.0, -1.0, 0.0),
            Vec3::new(1.0, -1.0, 0.0),
            Vec3::new(1.0, 1.0, 0.0),
            Vec3::new(-1.0, 1.0, 0.0),
        ],
    )
    .unwrap();
    data.set_vertex_data(
        VertexSemantic::TexCoord,
        0,
        &[Vec2::ZERO, Vec2::X, Vec2::ONE, Vec2::Y],
    )
    .unwrap();
    data.set_vertex_data(
        VertexSemantic::Color,
        0,
        &[Vec4::ONE, Vec4::X, Vec4::Y, Vec4::Z],
    )
    .unwrap();
    data.set_indices(0, &[0u16, 1, 2, 2, 3, 0]).unwrap();
    data.set_indices(1, &[0u16, 2]).unwrap();
    data
}

/// One stream, one sub-mesh, 32-bit indices.
fn triangle_data() -> MeshData {
    let mut data = MeshData::builder(3, IndexFormat::Uint32)
        .element(0, VertexFormat::Float32x3, VertexSemantic::Position, 0)
        .sub_mesh(3, PrimitiveTopology::TriangleStrip)
        .build()
        .unwrap();
    data.set_vertex_data(VertexSemantic::Position, 0, &[Vec3::X, Vec3::Y, Vec3::Z])
        .unwrap();
    data.set_indices(0, &[2u32, 1, 0]).unwrap();
    data
}

/// 3x3 vertex grid, eight triangles listed in a scattered order.
fn grid_data() -> MeshData {
    let mut data = MeshData::builder(9, IndexFormat::Uint16)
        .element(0, VertexFormat::Float32x2, VertexSemantic::Position, 0)
        .sub_mesh(24, PrimitiveTopology::TriangleList)
        .build()
        .unwrap();
    let positions: Vec<Vec2> = (0..9)
        .map(|i| Vec2::new((i % 3) as f32, (i / 3) as f32))
        .collect();
    data.set_vertex_data(VertexSemantic::Position, 0, &positions)
        .unwrap();
    data.set_indices(
        0,
        &[
            4u16, 8, 7, 0, 1, 4, 5, 8, 4, 3, 7, 6, //
            1, 5, 4, 0, 4, 3, 4, 7, 3, 1, 2, 5,
        ],
    )
    .unwrap();
    data
}

/// Triangles with their corners sorted, in sorted order.
fn triangle_set(indices: &[u16]) -> Vec<[u16; 3]> {
    let mut triangles: Vec<[u16; 3]> = indices
        .chunks_exact(3)
        .map(|t| {
            let mut t = [t[0], t[1], t[2]];
            t.sort_unstable();
            t
        })
        .collect();
    triangles.sort_unstable();
    triangles
}

fn write(mesh: &Mesh, data: MeshData) {
    mesh.queue_write(data).unwrap().wait().unwrap().unwrap();
}

fn read(mesh: &Mesh) -> MeshData {
    mesh.queue_read().unwrap().wait().unwrap().unwrap()
}

// ============================================================================
// MeshData
// ============================================================================

#[test]
fn builder_packs_elements_per_stream() {
    let data = quad_data();
    let decl = data.declaration();

    assert_eq!(decl.find(VertexSemantic::Position, 0).unwrap().offset, 0);
    assert_eq!(decl.find(VertexSemantic::TexCoord, 0).unwrap().offset, 12);
    assert_eq!(decl.find(VertexSemantic::Color, 0).unwrap().offset, 0);
    assert_eq!(decl.vertex_size(0), 20);
    assert_eq!(decl.vertex_size(1), 16);
    assert_eq!(decl.streams().as_slice(), &[0, 1]);

    assert_eq!(data.stream_bytes(0).unwrap().len(), 4 * 20);
    assert_eq!(data.stream_bytes(1).unwrap().len(), 4 * 16);
    assert_eq!(data.num_indices(), 8);
    assert_eq!(data.index_bytes().len(), 16);
    assert!(data.validate().is_ok());
}

#[test]
fn vertex_and_index_accessors_round_trip() {
    let data = quad_data();

    let uvs: Vec<Vec2> = data.vertex_data(VertexSemantic::TexCoord, 0).unwrap();
    assert_eq!(uvs, vec![Vec2::ZERO, Vec2::X, Vec2::ONE, Vec2::Y]);
    assert_eq!(data.indices::<u16>(1).unwrap(), vec![0, 2]);
    assert_eq!(data.sub_meshes()[1].index_offset, 6);
}

#[test]
fn accessors_reject_mismatched_shapes() {
    let mut data = quad_data();

    // Wrong element size
    assert!(matches!(
        data.set_vertex_data(VertexSemantic::Position, 0, &[Vec4::ZERO; 4]),
        Err(GpuError::InvalidParameters(_))
    ));
    // Wrong vertex count
    assert!(matches!(
        data.set_vertex_data(VertexSemantic::Position, 0, &[Vec3::ZERO; 3]),
        Err(GpuError::InvalidParameters(_))
    ));
    // Undeclared semantic
    assert!(matches!(
        data.set_vertex_data(VertexSemantic::Normal, 0, &[Vec3::ZERO; 4]),
        Err(GpuError::InvalidParameters(_))
    ));
    // 32-bit indices into a 16-bit mesh
    assert!(matches!(
        data.set_indices(0, &[0u32; 6]),
        Err(GpuError::InvalidParameters(_))
    ));
    assert_eq!(
        data.set_indices(2, &[0u16]),
        Err(GpuError::IndexOutOfRange {
            context: "Sub-mesh",
            index: 2,
            count: 2
        })
    );
}

#[test]
fn sub_mesh_past_index_space_is_rejected() {
    let result = MeshData::new(
        3,
        IndexFormat::Uint16,
        VertexDeclaration::default(),
        vec![SubMeshDesc {
            index_offset: u32::MAX,
            index_count: 1,
            topology: PrimitiveTopology::TriangleList,
        }],
    );
    assert!(matches!(result, Err(GpuError::InvalidParameters(_))));

    let built = MeshData::builder(3, IndexFormat::Uint16)
        .sub_mesh(u32::MAX, PrimitiveTopology::TriangleList)
        .sub_mesh(1, PrimitiveTopology::TriangleList)
        .build();
    assert!(matches!(built, Err(GpuError::InvalidParameters(_))));
}

// ============================================================================
// Vertex Cache Ordering
// ============================================================================

#[test]
fn vertex_cache_optimization_keeps_triangle_set() {
    let mut data = grid_data();
    let before = data.indices::<u16>(0).unwrap();

    data.optimize_vertex_cache(0).unwrap();
    let after = data.indices::<u16>(0).unwrap();

    assert_eq!(after.len(), before.len());
    assert_eq!(triangle_set(&after), triangle_set(&before));
    assert!(data.validate().is_ok());
}

#[test]
fn vertex_cache_optimization_leaves_other_sub_meshes_alone() {
    let mut data = quad_data();

    data.optimize_vertex_cache(0).unwrap();

    assert_eq!(
        triangle_set(&data.indices::<u16>(0).unwrap()),
        triangle_set(&[0, 1, 2, 2, 3, 0])
    );
    assert_eq!(data.indices::<u16>(1).unwrap(), vec![0, 2]);
}

#[test]
fn vertex_cache_optimization_requires_valid_triangle_list() {
    let mut data = quad_data();
    assert!(matches!(
        data.optimize_vertex_cache(1),
        Err(GpuError::InvalidParameters(_))
    ));
    assert_eq!(
        data.optimize_vertex_cache(2),
        Err(GpuError::IndexOutOfRange {
            context: "Sub-mesh",
            index: 2,
            count: 2
        })
    );

    data.set_indices(0, &[0u16, 1, 2, 2, 3, 9]).unwrap();
    assert_eq!(
        data.optimize_vertex_cache(0),
        Err(GpuError::IndexOutOfRange {
            context: "Vertex",
            index: 9,
            count: 4
        })
    );
    assert_eq!(data.indices::<u16>(0).unwrap(), vec![0, 1, 2, 2, 3, 9]);
}

// ============================================================================
// Round Trip
// ============================================================================

#[test]
fn write_then_read_is_byte_identical() {
    let (core, _) = spawn_core();
    let mesh = Mesh::new(core.queue());

    write(&mesh, quad_data());

    assert_eq!(read(&mesh), quad_data());
    assert_eq!(
        mesh.properties(),
        MeshProperties {
            num_vertices: 4,
            num_indices: 8,
            index_type: Some(IndexFormat::Uint16),
            sub_mesh_count: 2,
        }
    );
}

#[test]
fn empty_sub_meshes_survive_round_trip() {
    let (core, _) = spawn_core();
    let mesh = Mesh::new(core.queue());
    let mut data = MeshData::builder(3, IndexFormat::Uint16)
        .element(0, VertexFormat::Float32x3, VertexSemantic::Position, 0)
        .sub_mesh(3, PrimitiveTopology::TriangleList)
        .sub_mesh(0, PrimitiveTopology::PointList)
        .build()
        .unwrap();
    data.set_indices(0, &[0u16, 1, 2]).unwrap();

    write(&mesh, data.clone());

    assert_eq!(read(&mesh), data);
}

#[test]
fn mesh_created_with_data_is_populated_on_realization() {
    let (core, stats) = spawn_core();
    let mesh = Mesh::with_data(core.queue(), quad_data());

    mesh.initialize().unwrap();
    assert_eq!(mesh.properties(), MeshProperties::default());

    assert_eq!(read(&mesh), quad_data());
    assert_eq!(mesh.properties().num_vertices, 4);
    // Two vertex streams + one index buffer
    assert_eq!(stats.live_buffers(), 3);
}

#[test]
fn unindexed_mesh_allocates_32_bit_indices() {
    let (core, stats) = spawn_core();
    let mesh = Arc::new(Mesh::new(core.queue()));
    let data = MeshData::builder(3, IndexFormat::Uint16)
        .element(0, VertexFormat::Float32x3, VertexSemantic::Position, 0)
        .build()
        .unwrap();

    write(&mesh, data);

    let m = Arc::clone(&mesh);
    let allocated = core
        .queue()
        .execute_sync(move || m.allocate_subresource_buffer())
        .unwrap()
        .unwrap();
    assert_eq!(allocated.index_type(), IndexFormat::Uint32);
    assert_eq!(allocated.num_vertices(), 3);
    assert_eq!(allocated.num_indices(), 0);
    assert_eq!(mesh.properties().index_type, None);
    assert_eq!(stats.live_buffers(), 1);
}

// ============================================================================
// Replace Semantics
// ============================================================================

#[test]
fn rewrite_fully_replaces_previous_contents() {
    let (core, stats) = spawn_core();
    let mesh = Arc::new(Mesh::new(core.queue()));

    write(&mesh, quad_data());
    write(&mesh, triangle_data());

    assert_eq!(read(&mesh), triangle_data());
    assert_eq!(mesh.properties().sub_mesh_count, 1);

    let m = Arc::clone(&mesh);
    let stale = core
        .queue()
        .execute_sync(move || m.get_sub_mesh_render_data(1).map(|_| ()))
        .unwrap();
    assert_eq!(
        stale,
        Err(GpuError::IndexOutOfRange {
            context: "Sub-mesh",
            index: 1,
            count: 1
        })
    );

    // Old buffers are gone; only the triangle's vertex and index buffers remain.
    assert_eq!(stats.live_buffers(), 2);
    assert_eq!(stats.live_bytes(), 3 * 12 + 3 * 4);
}

#[test]
fn writing_same_data_twice_matches_single_write() {
    let (core, stats) = spawn_core();
    let once = Mesh::new(core.queue());
    let twice = Mesh::new(core.queue());

    write(&once, quad_data());
    let bytes_once = stats.live_bytes();
    write(&twice, quad_data());
    write(&twice, quad_data());

    assert_eq!(read(&once), read(&twice));
    assert_eq!(stats.live_bytes(), bytes_once * 2);
}

// ============================================================================
// Index Buffer Clone
// ============================================================================

#[test]
fn index_buffer_clone_shares_or_copies_storage() {
    let (core, stats) = spawn_core();
    let mesh = Arc::new(Mesh::new(core.queue()));
    write(&mesh, quad_data());
    let live_before = stats.live_buffers();

    let m = Arc::clone(&mesh);
    let (original, shallow, deep, copied) = core
        .queue()
        .execute_sync(move || {
            let original = m.get_sub_mesh_render_data(0)?.index_buffer.expect("indexed mesh");
            let shallow = m.clone_index_buffer(false)?.expect("indexed mesh");
            let deep = m.clone_index_buffer(true)?.expect("indexed mesh");
            let mut copied = vec![0u8; 16];
            BufferLock::new(deep.buffer.as_ref(), LockMode::ReadOnly)?.read(0, &mut copied)?;
            Ok::<_, GpuError>((original, shallow, deep, copied))
        })
        .unwrap()
        .unwrap();

    assert!(Arc::ptr_eq(&original.buffer, &shallow.buffer));
    assert!(!Arc::ptr_eq(&original.buffer, &deep.buffer));
    assert_eq!(deep.index_type, IndexFormat::Uint16);
    assert_eq!(deep.num_indices, 8);
    assert_eq!(copied.as_slice(), quad_data().index_bytes());
    assert_eq!(stats.live_buffers(), live_before + 1);
}

#[test]
fn unindexed_mesh_has_no_index_buffer_to_clone() {
    let (core, _) = spawn_core();
    let mesh = Arc::new(Mesh::new(core.queue()));
    let data = MeshData::builder(3, IndexFormat::Uint16)
        .element(0, VertexFormat::Float32x3, VertexSemantic::Position, 0)
        .build()
        .unwrap();
    write(&mesh, data);

    let m = Arc::clone(&mesh);
    let cloned = core
        .queue()
        .execute_sync(move || m.clone_index_buffer(true).map(|ib| ib.is_none()))
        .unwrap();

    assert_eq!(cloned, Ok(true));
    assert!(mesh.clone_index_buffer(false).is_err(), "core thread only");
}

// ============================================================================
// Sub-mesh Render Data
// ============================================================================

#[test]
fn sub_mesh_render_data_honors_requested_range() {
    let (core, _) = spawn_core();
    let mesh = Arc::new(Mesh::new(core.queue()));
    write(&mesh, quad_data());

    let m = Arc::clone(&mesh);
    let op = core
        .queue()
        .execute_sync(move || m.get_sub_mesh_render_data(1))
        .unwrap()
        .unwrap();

    assert_eq!(op.index_start, 6);
    assert_eq!(op.index_count, 2);
    assert_eq!(op.topology, PrimitiveTopology::LineList);
    assert!(op.use_indexes);
    assert_eq!(op.index_buffer.as_ref().unwrap().num_indices, 8);
    let vertex_data = op.vertex_data.unwrap();
    assert_eq!(vertex_data.vertex_count, 4);
    assert_eq!(vertex_data.buffer(0).unwrap().vertex_size, 20);
    assert_eq!(vertex_data.buffer(1).unwrap().vertex_size, 16);
}

#[test]
fn sub_mesh_index_out_of_range_on_empty_mesh() {
    let (core, _) = spawn_core();
    let mesh = Arc::new(Mesh::new(core.queue()));

    let m = Arc::clone(&mesh);
    let result = core
        .queue()
        .execute_sync(move || m.get_sub_mesh_render_data(0).map(|_| ()))
        .unwrap();

    assert_eq!(
        result,
        Err(GpuError::IndexOutOfRange {
            context: "Sub-mesh",
            index: 0,
            count: 0
        })
    );
}

// ============================================================================
// Failure Modes
// ============================================================================

#[test]
fn write_off_core_thread_fails_and_leaves_mesh_unchanged() {
    let (core, _) = spawn_core();
    let mesh = Mesh::new(core.queue());
    write(&mesh, triangle_data());

    let result = mesh.write_subresource(&quad_data());

    assert_eq!(result, Err(GpuError::WrongThread("Mesh::write_subresource")));
    assert_eq!(read(&mesh), triangle_data());
    assert_eq!(mesh.properties().num_vertices, 3);
}

#[test]
fn read_and_allocate_off_core_thread_fail() {
    let (core, _) = spawn_core();
    let mesh = Mesh::new(core.queue());
    let mut out = quad_data();

    assert!(matches!(
        mesh.read_subresource(&mut out),
        Err(GpuError::WrongThread(_))
    ));
    assert!(matches!(
        mesh.allocate_subresource_buffer(),
        Err(GpuError::WrongThread(_))
    ));
    assert!(matches!(
        mesh.get_sub_mesh_render_data(0),
        Err(GpuError::WrongThread(_))
    ));
}

#[test]
fn non_mesh_blob_is_rejected() {
    let (core, _) = spawn_core();
    let mesh = Arc::new(Mesh::new(core.queue()));
    mesh.initialize().unwrap();

    let m = Arc::clone(&mesh);
    let result = core
        .queue()
        .execute_sync(move || {
            let pixels = PixelData {
                width: 1,
                height: 1,
                format: wgpu::TextureFormat::Rgba8Unorm,
                bytes: vec![0; 4],
            };
            m.write_subresource(&pixels)
        })
        .unwrap();

    assert_eq!(
        result,
        Err(GpuError::InvalidDataType {
            expected: "MeshData",
            actual: "PixelData"
        })
    );
}

#[test]
fn read_into_mismatched_blob_is_rejected() {
    let (core, _) = spawn_core();
    let mesh = Arc::new(Mesh::new(core.queue()));
    write(&mesh, quad_data());

    let m = Arc::clone(&mesh);
    let result = core
        .queue()
        .execute_sync(move || {
            let mut wrong = triangle_data();
            m.read_subresource(&mut wrong)
        })
        .unwrap();

    assert!(matches!(result, Err(GpuError::InvalidParameters(_))));
}
