use std::sync::Arc;

use crate::hardware::generate_resource_id;
use crate::params::GpuParamDesc;

/// Pipeline stage a program is compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuProgramType {
    Vertex,
    Fragment,
    Geometry,
    Hull,
    Domain,
    Compute,
}

impl GpuProgramType {
    /// Graphics stages in parameter merge order.
    pub const GRAPHICS_STAGES: [Self; 5] = [
        Self::Vertex,
        Self::Fragment,
        Self::Geometry,
        Self::Hull,
        Self::Domain,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Vertex => "vertex",
            Self::Fragment => "fragment",
            Self::Geometry => "geometry",
            Self::Hull => "hull",
            Self::Domain => "domain",
            Self::Compute => "compute",
        }
    }
}

/// A compiled program and the parameters reflection found in it.
#[derive(Debug)]
pub struct GpuProgram {
    id: u64,
    name: String,
    program_type: GpuProgramType,
    param_desc: Arc<GpuParamDesc>,
}

impl GpuProgram {
    #[must_use]
    pub fn new(name: &str, program_type: GpuProgramType, param_desc: GpuParamDesc) -> Arc<Self> {
        Arc::new(Self {
            id: generate_resource_id(),
            name: name.to_string(),
            program_type,
            param_desc: Arc::new(param_desc),
        })
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    #[must_use]
    pub fn program_type(&self) -> GpuProgramType {
        self.program_type
    }

    #[must_use]
    pub fn param_desc(&self) -> &Arc<GpuParamDesc> {
        &self.param_desc
    }
}
