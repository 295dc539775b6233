//! Pipeline State Objects
//!
//! An immutable bundle of programs and fixed-function state. Validation and
//! the parameter layout merge ([`ParamInfo`]) happen once, at construction;
//! the backend pipeline object is created lazily on the core thread.
//!
//! Sim-side ([`GraphicsPipelineState`]) and core-side
//! ([`GraphicsPipelineStateCore`]) variants expose the same read-only view
//! through [`GraphicsPipelineStateInfo`].

mod param_info;
mod program;
mod state;

use std::sync::Arc;

use crate::core_object::{
    CoreBacked, CoreFactory, CoreObject, CoreObjectCore, CoreObjectId, CoreObjectState,
};
use crate::core_thread::CoreQueue;
use crate::errors::{GpuError, Result};
use crate::hardware::{PipelineHandle, RenderBackend};

pub use param_info::{ParamInfo, ParamSlotKind};
pub use program::{GpuProgram, GpuProgramType};
pub use state::{BlendState, DepthStencilState, RasterizerState};

/// Everything a graphics pipeline is built from.
#[derive(Debug, Clone, Default)]
pub struct PipelineStateDesc {
    pub blend_state: BlendState,
    pub rasterizer_state: RasterizerState,
    pub depth_stencil_state: DepthStencilState,

    pub vertex_program: Option<Arc<GpuProgram>>,
    pub fragment_program: Option<Arc<GpuProgram>>,
    pub geometry_program: Option<Arc<GpuProgram>>,
    pub hull_program: Option<Arc<GpuProgram>>,
    pub domain_program: Option<Arc<GpuProgram>>,
}

impl PipelineStateDesc {
    /// Programs paired with the stage slot they occupy, in merge order.
    fn stage_slots(&self) -> [(GpuProgramType, Option<&Arc<GpuProgram>>); 5] {
        [
            (GpuProgramType::Vertex, self.vertex_program.as_ref()),
            (GpuProgramType::Fragment, self.fragment_program.as_ref()),
            (GpuProgramType::Geometry, self.geometry_program.as_ref()),
            (GpuProgramType::Hull, self.hull_program.as_ref()),
            (GpuProgramType::Domain, self.domain_program.as_ref()),
        ]
    }

    fn validate(&self) -> Result<()> {
        if self.vertex_program.is_none() && self.fragment_program.is_none() {
            return Err(GpuError::InvalidPipelineConfiguration(
                "graphics pipeline needs a vertex or fragment program".to_string(),
            ));
        }
        for (stage, program) in self.stage_slots() {
            if let Some(program) = program
                && program.program_type() != stage
            {
                return Err(GpuError::InvalidPipelineConfiguration(format!(
                    "{} program '{}' bound to the {} stage",
                    program.program_type().name(),
                    program.name(),
                    stage.name()
                )));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Shared Accessors
// ============================================================================

/// Read-only view shared by the sim-side and core-side graphics pipeline.
pub trait GraphicsPipelineStateInfo {
    fn desc(&self) -> &PipelineStateDesc;
    fn param_info(&self) -> &Arc<ParamInfo>;

    fn has_vertex_program(&self) -> bool {
        self.desc().vertex_program.is_some()
    }

    fn has_fragment_program(&self) -> bool {
        self.desc().fragment_program.is_some()
    }

    fn has_geometry_program(&self) -> bool {
        self.desc().geometry_program.is_some()
    }

    fn has_hull_program(&self) -> bool {
        self.desc().hull_program.is_some()
    }

    fn has_domain_program(&self) -> bool {
        self.desc().domain_program.is_some()
    }

    fn blend_state(&self) -> &BlendState {
        &self.desc().blend_state
    }

    fn rasterizer_state(&self) -> &RasterizerState {
        &self.desc().rasterizer_state
    }

    fn depth_stencil_state(&self) -> &DepthStencilState {
        &self.desc().depth_stencil_state
    }

    fn vertex_program(&self) -> Option<&Arc<GpuProgram>> {
        self.desc().vertex_program.as_ref()
    }

    fn fragment_program(&self) -> Option<&Arc<GpuProgram>> {
        self.desc().fragment_program.as_ref()
    }

    fn geometry_program(&self) -> Option<&Arc<GpuProgram>> {
        self.desc().geometry_program.as_ref()
    }

    fn hull_program(&self) -> Option<&Arc<GpuProgram>> {
        self.desc().hull_program.as_ref()
    }

    fn domain_program(&self) -> Option<&Arc<GpuProgram>> {
        self.desc().domain_program.as_ref()
    }
}

// ============================================================================
// Graphics Pipeline
// ============================================================================

/// Sim-side graphics pipeline.
pub struct GraphicsPipelineState {
    object: CoreObject<GraphicsPipelineStateCore>,
    desc: Arc<PipelineStateDesc>,
    param_info: Arc<ParamInfo>,
}

impl GraphicsPipelineState {
    /// Validates `desc` and merges the parameter layouts of its programs.
    pub fn new(queue: &CoreQueue, desc: PipelineStateDesc) -> Result<Self> {
        desc.validate()?;
        let programs: Vec<&Arc<GpuProgram>> = desc
            .stage_slots()
            .into_iter()
            .filter_map(|(_, program)| program)
            .collect();
        let param_info = Arc::new(ParamInfo::new(&programs)?);

        Ok(Self {
            object: CoreObject::new(queue),
            desc: Arc::new(desc),
            param_info,
        })
    }

    #[inline]
    pub fn id(&self) -> CoreObjectId {
        self.object.id()
    }

    pub fn state(&self) -> CoreObjectState {
        self.object.state()
    }
}

impl GraphicsPipelineStateInfo for GraphicsPipelineState {
    fn desc(&self) -> &PipelineStateDesc {
        &self.desc
    }

    fn param_info(&self) -> &Arc<ParamInfo> {
        &self.param_info
    }
}

impl CoreBacked for GraphicsPipelineState {
    type Core = GraphicsPipelineStateCore;

    fn core_object(&self) -> &CoreObject<GraphicsPipelineStateCore> {
        &self.object
    }

    fn create_core(&self) -> CoreFactory<GraphicsPipelineStateCore> {
        let desc = Arc::clone(&self.desc);
        let param_info = Arc::clone(&self.param_info);
        Box::new(move |ctx| {
            let handle = ctx.backend().create_graphics_pipeline(&desc)?;
            log::debug!("Created graphics pipeline {handle:?}");
            Ok(GraphicsPipelineStateCore {
                desc,
                param_info,
                handle,
            })
        })
    }
}

impl std::fmt::Debug for GraphicsPipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphicsPipelineState")
            .field("id", &self.id())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Core-side graphics pipeline, owning the backend pipeline object.
#[derive(Debug)]
pub struct GraphicsPipelineStateCore {
    desc: Arc<PipelineStateDesc>,
    param_info: Arc<ParamInfo>,
    handle: PipelineHandle,
}

impl GraphicsPipelineStateCore {
    #[must_use]
    pub fn handle(&self) -> PipelineHandle {
        self.handle
    }
}

impl GraphicsPipelineStateInfo for GraphicsPipelineStateCore {
    fn desc(&self) -> &PipelineStateDesc {
        &self.desc
    }

    fn param_info(&self) -> &Arc<ParamInfo> {
        &self.param_info
    }
}

impl CoreObjectCore for GraphicsPipelineStateCore {
    fn release(&self, backend: &mut dyn RenderBackend) {
        log::debug!("Destroying graphics pipeline {:?}", self.handle);
        backend.destroy_pipeline(self.handle);
    }
}

// ============================================================================
// Compute Pipeline
// ============================================================================

/// Sim-side compute pipeline: exactly one compute program.
pub struct ComputePipelineState {
    object: CoreObject<ComputePipelineStateCore>,
    program: Arc<GpuProgram>,
    param_info: Arc<ParamInfo>,
}

impl ComputePipelineState {
    pub fn new(queue: &CoreQueue, program: Arc<GpuProgram>) -> Result<Self> {
        if program.program_type() != GpuProgramType::Compute {
            return Err(GpuError::InvalidPipelineConfiguration(format!(
                "compute pipeline needs a compute program, '{}' is a {} program",
                program.name(),
                program.program_type().name()
            )));
        }
        let param_info = Arc::new(ParamInfo::new(&[&program])?);
        Ok(Self {
            object: CoreObject::new(queue),
            program,
            param_info,
        })
    }

    #[inline]
    pub fn id(&self) -> CoreObjectId {
        self.object.id()
    }

    pub fn state(&self) -> CoreObjectState {
        self.object.state()
    }

    #[must_use]
    pub fn program(&self) -> &Arc<GpuProgram> {
        &self.program
    }

    #[must_use]
    pub fn param_info(&self) -> &Arc<ParamInfo> {
        &self.param_info
    }
}

impl CoreBacked for ComputePipelineState {
    type Core = ComputePipelineStateCore;

    fn core_object(&self) -> &CoreObject<ComputePipelineStateCore> {
        &self.object
    }

    fn create_core(&self) -> CoreFactory<ComputePipelineStateCore> {
        let program = Arc::clone(&self.program);
        let param_info = Arc::clone(&self.param_info);
        Box::new(move |ctx| {
            let handle = ctx.backend().create_compute_pipeline(&program)?;
            log::debug!("Created compute pipeline {handle:?} for '{}'", program.name());
            Ok(ComputePipelineStateCore {
                program,
                param_info,
                handle,
            })
        })
    }
}

impl std::fmt::Debug for ComputePipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputePipelineState")
            .field("id", &self.id())
            .field("program", &self.program.name())
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct ComputePipelineStateCore {
    program: Arc<GpuProgram>,
    param_info: Arc<ParamInfo>,
    handle: PipelineHandle,
}

impl ComputePipelineStateCore {
    #[must_use]
    pub fn program(&self) -> &Arc<GpuProgram> {
        &self.program
    }

    #[must_use]
    pub fn param_info(&self) -> &Arc<ParamInfo> {
        &self.param_info
    }

    #[must_use]
    pub fn handle(&self) -> PipelineHandle {
        self.handle
    }
}

impl CoreObjectCore for ComputePipelineStateCore {
    fn release(&self, backend: &mut dyn RenderBackend) {
        log::debug!("Destroying compute pipeline {:?}", self.handle);
        backend.destroy_pipeline(self.handle);
    }
}
