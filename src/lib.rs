//! # Myth GPU
//!
//! Dual-thread GPU resource lifecycle and binding.
//!
//! Application ("sim") threads own thread-safe handles to meshes, pipeline
//! states and parameter sets. Each handle has a hardware-bound counterpart
//! that only the dedicated core thread creates, touches and releases; work
//! crosses between the two through a FIFO command queue submitted once per
//! frame.
//!
//! ```rust,ignore
//! use myth_gpu::prelude::*;
//!
//! let core = CoreThread::spawn(SystemBackend::new(), CoreThreadSettings::default())?;
//! let queue = core.queue().clone();
//!
//! let pipeline = GraphicsPipelineState::new(&queue, desc)?;
//! let params = GpuParams::from_param_info(&queue, pipeline.param_info());
//! params.get_param::<Mat4>("world")?.set(Mat4::IDENTITY)?;
//!
//! let mesh = Mesh::new(&queue);
//! let write = mesh.queue_write(mesh_data)?;
//! write.wait()??;
//! ```

pub mod core_object;
pub mod core_thread;
pub mod errors;
pub mod hardware;
pub mod mesh;
pub mod params;
pub mod pipeline;
pub mod settings;

pub use core_object::{CoreBacked, CoreObject, CoreObjectState, CoreRef};
pub use core_thread::{AsyncOp, CoreContext, CoreQueue, CoreThread, is_core_thread, with_context};
pub use errors::{GpuError, Result};
pub use hardware::{BackendStats, RenderBackend, SystemBackend};
pub use mesh::{Mesh, MeshData, RenderOpMesh};
pub use params::{BindableGpuParams, GpuParamBlockBuffer, GpuParamDesc, GpuParams};
pub use pipeline::{
    ComputePipelineState, GpuProgram, GpuProgramType, GraphicsPipelineState,
    GraphicsPipelineStateInfo, ParamInfo, PipelineStateDesc,
};
pub use settings::CoreThreadSettings;

pub mod prelude {
    pub use crate::core_object::CoreBacked;
    pub use crate::core_thread::{CoreQueue, CoreThread};
    pub use crate::errors::{GpuError, Result};
    pub use crate::hardware::SystemBackend;
    pub use crate::mesh::{Mesh, MeshData, VertexSemantic};
    pub use crate::params::{GpuParamDataType, GpuParamDesc, GpuParams};
    pub use crate::pipeline::{
        ComputePipelineState, GpuProgram, GpuProgramType, GraphicsPipelineState,
        GraphicsPipelineStateInfo, PipelineStateDesc,
    };
    pub use crate::settings::CoreThreadSettings;
    pub use glam::{Mat3, Mat4, Vec2, Vec3, Vec4};
}
