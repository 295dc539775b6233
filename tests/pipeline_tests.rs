//! Pipeline State Tests
//!
//! Tests for:
//! - Construction-time validation (required stages, stage/type agreement)
//! - Combined parameter layout across stages (ParamInfo)
//! - Lazy backend pipeline creation and release
//! - Fixed-function state defaults and wgpu conversion
//! - Parameter sets built from a pipeline layout

use std::sync::Arc;

use glam::{Mat4, Vec4};

use myth_gpu::core_object::{CoreBacked, CoreObjectState};
use myth_gpu::core_thread::CoreThread;
use myth_gpu::errors::GpuError;
use myth_gpu::hardware::{BackendStats, SystemBackend};
use myth_gpu::params::{GpuParamDataType, GpuParamDesc, GpuParamObjectType, GpuParams};
use myth_gpu::pipeline::{
    BlendState, ComputePipelineState, DepthStencilState, GpuProgram, GpuProgramType,
    GraphicsPipelineState, GraphicsPipelineStateInfo, ParamInfo, ParamSlotKind,
    PipelineStateDesc, RasterizerState,
};
use myth_gpu::settings::CoreThreadSettings;

fn spawn_core_with(settings: CoreThreadSettings) -> (CoreThread, Arc<BackendStats>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let backend = SystemBackend::new();
    let stats = backend.stats();
    let core = CoreThread::spawn(backend, settings).expect("spawn core thread");
    (core, stats)
}

fn spawn_core() -> (CoreThread, Arc<BackendStats>) {
    spawn_core_with(CoreThreadSettings::default())
}

fn flush_frame(core: &CoreThread) {
    core.queue().execute_sync(|| ()).unwrap();
}

/// Vertex stage: PerFrame (slot 0) + PerObject (slot 1), no textures.
fn vertex_program() -> Arc<GpuProgram> {
    GpuProgram::new(
        "standard_vs",
        GpuProgramType::Vertex,
        GpuParamDesc::new()
            .with_block("PerFrame", 0, 64)
            .with_block("PerObject", 1, 64)
            .with_param("viewProj", GpuParamDataType::Matrix4x4, 0, 0)
            .with_param("world", GpuParamDataType::Matrix4x4, 1, 0),
    )
}

/// Fragment stage: PerMaterial (slot 0) + PerFrame (slot 1), one texture/sampler.
fn fragment_program() -> Arc<GpuProgram> {
    GpuProgram::new(
        "standard_fs",
        GpuProgramType::Fragment,
        GpuParamDesc::new()
            .with_block("PerMaterial", 0, 32)
            .with_block("PerFrame", 1, 64)
            .with_param("tint", GpuParamDataType::Float4, 0, 0)
            .with_param("viewProj", GpuParamDataType::Matrix4x4, 1, 0)
            .with_texture("albedo", 0, GpuParamObjectType::Texture2D)
            .with_sampler("albedoSampler", 0),
    )
}

fn standard_desc() -> PipelineStateDesc {
    PipelineStateDesc {
        vertex_program: Some(vertex_program()),
        fragment_program: Some(fragment_program()),
        ..Default::default()
    }
}

// ============================================================================
// Validation
// ============================================================================

#[test]
fn graphics_pipeline_requires_vertex_or_fragment() {
    let (core, _) = spawn_core();

    let result = GraphicsPipelineState::new(core.queue(), PipelineStateDesc::default());

    assert!(matches!(
        result,
        Err(GpuError::InvalidPipelineConfiguration(_))
    ));
}

#[test]
fn fragment_only_pipeline_is_valid() {
    let (core, _) = spawn_core();
    let desc = PipelineStateDesc {
        fragment_program: Some(fragment_program()),
        ..Default::default()
    };

    let pipeline = GraphicsPipelineState::new(core.queue(), desc).unwrap();

    assert!(!pipeline.has_vertex_program());
    assert!(pipeline.has_fragment_program());
}

#[test]
fn program_in_wrong_stage_is_rejected() {
    let (core, _) = spawn_core();
    let desc = PipelineStateDesc {
        vertex_program: Some(fragment_program()),
        ..Default::default()
    };

    assert!(matches!(
        GraphicsPipelineState::new(core.queue(), desc),
        Err(GpuError::InvalidPipelineConfiguration(_))
    ));
}

#[test]
fn compute_pipeline_requires_compute_program() {
    let (core, _) = spawn_core();

    assert!(matches!(
        ComputePipelineState::new(core.queue(), vertex_program()),
        Err(GpuError::InvalidPipelineConfiguration(_))
    ));

    let program = GpuProgram::new(
        "cull_cs",
        GpuProgramType::Compute,
        GpuParamDesc::new()
            .with_block("Params", 0, 16)
            .with_param("count", GpuParamDataType::Float1, 0, 0),
    );
    let pipeline = ComputePipelineState::new(core.queue(), Arc::clone(&program)).unwrap();
    assert!(Arc::ptr_eq(pipeline.program(), &program));
    assert!(pipeline.param_info().combined().param("count").is_some());
}

// ============================================================================
// Combined Parameter Layout
// ============================================================================

#[test]
fn shared_blocks_map_to_one_combined_slot() {
    let vs = vertex_program();
    let fs = fragment_program();
    let info = ParamInfo::new(&[&vs, &fs]).unwrap();
    let combined = info.combined();

    // Vertex blocks first, then new fragment blocks.
    assert_eq!(combined.param_blocks()["PerFrame"].slot, 0);
    assert_eq!(combined.param_blocks()["PerObject"].slot, 1);
    assert_eq!(combined.param_blocks()["PerMaterial"].slot, 2);
    assert_eq!(info.num_slots(ParamSlotKind::Block), 3);

    assert_eq!(info.combined_slot(GpuProgramType::Vertex, ParamSlotKind::Block, 1), Some(1));
    assert_eq!(info.combined_slot(GpuProgramType::Fragment, ParamSlotKind::Block, 0), Some(2));
    assert_eq!(info.combined_slot(GpuProgramType::Fragment, ParamSlotKind::Block, 1), Some(0));
    assert_eq!(info.combined_slot(GpuProgramType::Fragment, ParamSlotKind::Texture, 0), Some(0));
    assert_eq!(info.combined_slot(GpuProgramType::Geometry, ParamSlotKind::Block, 0), None);

    // Params follow their block into combined numbering.
    assert_eq!(combined.param("tint").unwrap().block_slot, 2);
    assert_eq!(combined.param("viewProj").unwrap().block_slot, 0);
    assert_eq!(
        info.stages().collect::<Vec<_>>(),
        vec![GpuProgramType::Vertex, GpuProgramType::Fragment]
    );
    assert_eq!(
        info.stage_desc(GpuProgramType::Fragment).unwrap().param("tint").unwrap().block_slot,
        0
    );
}

#[test]
fn block_size_conflict_is_rejected() {
    let vs = vertex_program();
    let fs = GpuProgram::new(
        "bad_fs",
        GpuProgramType::Fragment,
        GpuParamDesc::new().with_block("PerFrame", 0, 128),
    );

    assert!(matches!(
        ParamInfo::new(&[&vs, &fs]),
        Err(GpuError::InvalidPipelineConfiguration(_))
    ));
}

#[test]
fn param_layout_conflict_is_rejected() {
    let vs = vertex_program();
    let fs = GpuProgram::new(
        "bad_fs",
        GpuProgramType::Fragment,
        GpuParamDesc::new()
            .with_block("PerFrame", 0, 64)
            .with_param("viewProj", GpuParamDataType::Float4, 0, 0),
    );

    assert!(matches!(
        ParamInfo::new(&[&vs, &fs]),
        Err(GpuError::InvalidPipelineConfiguration(_))
    ));
}

#[test]
fn object_type_conflict_is_rejected() {
    let a = GpuProgram::new(
        "a",
        GpuProgramType::Vertex,
        GpuParamDesc::new().with_texture("heightMap", 0, GpuParamObjectType::Texture2D),
    );
    let b = GpuProgram::new(
        "b",
        GpuProgramType::Fragment,
        GpuParamDesc::new().with_texture("heightMap", 0, GpuParamObjectType::TextureCube),
    );

    assert!(matches!(
        ParamInfo::new(&[&a, &b]),
        Err(GpuError::InvalidPipelineConfiguration(_))
    ));
}

#[test]
fn param_in_undeclared_block_is_rejected() {
    let program = GpuProgram::new(
        "orphan",
        GpuProgramType::Vertex,
        GpuParamDesc::new().with_param("lost", GpuParamDataType::Float1, 3, 0),
    );

    assert!(matches!(
        ParamInfo::new(&[&program]),
        Err(GpuError::InvalidPipelineConfiguration(_))
    ));
}

// ============================================================================
// Accessors
// ============================================================================

#[test]
fn pipeline_exposes_programs_and_state() {
    let (core, _) = spawn_core();
    let desc = PipelineStateDesc {
        blend_state: BlendState::alpha_blending(),
        depth_stencil_state: DepthStencilState::read_only(),
        ..standard_desc()
    };

    let pipeline = GraphicsPipelineState::new(core.queue(), desc).unwrap();

    assert!(pipeline.has_vertex_program());
    assert!(pipeline.has_fragment_program());
    assert!(!pipeline.has_geometry_program());
    assert!(!pipeline.has_hull_program());
    assert!(!pipeline.has_domain_program());
    assert_eq!(pipeline.vertex_program().unwrap().name(), "standard_vs");
    assert!(pipeline.geometry_program().is_none());
    assert_eq!(pipeline.blend_state(), &BlendState::alpha_blending());
    assert!(!pipeline.depth_stencil_state().depth_write_enabled);
    assert_eq!(pipeline.rasterizer_state(), &RasterizerState::default());
    assert!(Arc::ptr_eq(pipeline.param_info(), pipeline.param_info()));
}

#[test]
fn fixed_function_state_converts_to_wgpu() {
    let blend = BlendState::alpha_blending();
    let target = blend.to_color_target(wgpu::TextureFormat::Rgba8Unorm);
    assert_eq!(target.blend, Some(wgpu::BlendState::ALPHA_BLENDING));
    assert_eq!(target.write_mask, wgpu::ColorWrites::ALL);

    let primitive = RasterizerState::default().to_primitive_state(wgpu::PrimitiveTopology::LineList);
    assert_eq!(primitive.topology, wgpu::PrimitiveTopology::LineList);
    assert_eq!(primitive.cull_mode, Some(wgpu::Face::Back));
    assert_eq!(primitive.front_face, wgpu::FrontFace::Ccw);

    let depth = DepthStencilState::default()
        .to_wgpu(wgpu::TextureFormat::Depth32Float, wgpu::DepthBiasState::default());
    assert!(depth.depth_write_enabled);
    assert_eq!(depth.depth_compare, wgpu::CompareFunction::Less);
}

// ============================================================================
// Core Lifecycle
// ============================================================================

#[test]
fn backend_pipeline_is_created_lazily_and_released() {
    let (core, stats) = spawn_core();
    let pipeline = GraphicsPipelineState::new(core.queue(), standard_desc()).unwrap();

    flush_frame(&core);
    assert_eq!(stats.pipelines_created(), 0);
    assert_eq!(pipeline.state(), CoreObjectState::Uninitialized);

    let core_ref = pipeline.get_core().unwrap();
    flush_frame(&core);
    assert_eq!(stats.pipelines_created(), 1);
    assert_eq!(pipeline.state(), CoreObjectState::CoreCreated);

    let pipeline_core = core_ref.get().unwrap();
    assert!(pipeline_core.has_fragment_program());
    assert!(Arc::ptr_eq(pipeline_core.param_info(), pipeline.param_info()));
    drop(pipeline_core);

    drop(pipeline);
    flush_frame(&core);
    assert_eq!(stats.live_pipelines(), 0);
    assert_eq!(stats.pipelines_destroyed(), 1);
}

#[test]
fn compute_pipeline_is_released_on_drop() {
    let (core, stats) = spawn_core();
    let program = GpuProgram::new("clear_cs", GpuProgramType::Compute, GpuParamDesc::new());
    let pipeline = ComputePipelineState::new(core.queue(), program).unwrap();

    pipeline.initialize().unwrap();
    flush_frame(&core);
    assert_eq!(stats.live_pipelines(), 1);

    drop(pipeline);
    flush_frame(&core);
    assert_eq!(stats.live_pipelines(), 0);
}

// ============================================================================
// Parameter Sets
// ============================================================================

#[test]
fn params_from_pipeline_use_combined_layout() {
    let (core, _) = spawn_core();
    let pipeline = GraphicsPipelineState::new(core.queue(), standard_desc()).unwrap();

    let params = GpuParams::from_param_info(core.queue(), pipeline.param_info());

    assert!(!params.transpose_matrices());
    assert!(params.has_param("world"));
    assert!(params.has_param("tint"));
    assert!(params.has_texture("albedo"));
    params.get_param::<Vec4>("tint").unwrap().set(Vec4::ONE).unwrap();
    assert_eq!(
        params.param_block_buffer_by_name("PerMaterial").unwrap().size(),
        32
    );
    assert!(Arc::ptr_eq(
        &params.param_block_buffer(2).unwrap(),
        &params.param_block_buffer_by_name("PerMaterial").unwrap()
    ));
}

#[test]
fn params_from_pipeline_follow_queue_matrix_convention() {
    let (core, _) = spawn_core_with(CoreThreadSettings {
        transpose_matrices: true,
        ..Default::default()
    });
    let pipeline = GraphicsPipelineState::new(core.queue(), standard_desc()).unwrap();
    let params = GpuParams::from_param_info(core.queue(), pipeline.param_info());
    let world = Mat4::from_cols_array(&[
        1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 11.0, 12.0, 13.0, 14.0, 15.0, 16.0,
    ]);

    params.get_param::<Mat4>("world").unwrap().set(world).unwrap();

    assert!(params.transpose_matrices());
    assert_eq!(
        params.get_param::<Mat4>("world").unwrap().get().unwrap(),
        world.transpose()
    );
}
