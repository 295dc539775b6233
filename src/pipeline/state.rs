//! Fixed-function state bundled into a pipeline.
//!
//! Plain `Copy` descriptions built from `wgpu` state types; each converts into
//! the matching `wgpu` descriptor once the render target formats are known.

/// Output merger state of the color target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendState {
    /// `None` disables blending.
    pub blend: Option<wgpu::BlendState>,
    pub write_mask: wgpu::ColorWrites,
    pub alpha_to_coverage_enabled: bool,
}

impl Default for BlendState {
    fn default() -> Self {
        Self {
            blend: None,
            write_mask: wgpu::ColorWrites::ALL,
            alpha_to_coverage_enabled: false,
        }
    }
}

impl BlendState {
    #[must_use]
    pub fn alpha_blending() -> Self {
        Self {
            blend: Some(wgpu::BlendState::ALPHA_BLENDING),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn to_color_target(&self, format: wgpu::TextureFormat) -> wgpu::ColorTargetState {
        wgpu::ColorTargetState {
            format,
            blend: self.blend,
            write_mask: self.write_mask,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterizerState {
    pub cull_mode: Option<wgpu::Face>,
    pub front_face: wgpu::FrontFace,
    pub polygon_mode: wgpu::PolygonMode,
    pub depth_bias: wgpu::DepthBiasState,
    pub unclipped_depth: bool,
    pub conservative: bool,
}

impl Default for RasterizerState {
    fn default() -> Self {
        Self {
            cull_mode: Some(wgpu::Face::Back),
            front_face: wgpu::FrontFace::Ccw,
            polygon_mode: wgpu::PolygonMode::Fill,
            depth_bias: wgpu::DepthBiasState::default(),
            unclipped_depth: false,
            conservative: false,
        }
    }
}

impl RasterizerState {
    #[must_use]
    pub fn to_primitive_state(&self, topology: wgpu::PrimitiveTopology) -> wgpu::PrimitiveState {
        wgpu::PrimitiveState {
            topology,
            cull_mode: self.cull_mode,
            front_face: self.front_face,
            polygon_mode: self.polygon_mode,
            unclipped_depth: self.unclipped_depth,
            conservative: self.conservative,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepthStencilState {
    pub depth_write_enabled: bool,
    pub depth_compare: wgpu::CompareFunction,
    pub stencil: wgpu::StencilState,
}

impl Default for DepthStencilState {
    fn default() -> Self {
        Self {
            depth_write_enabled: true,
            depth_compare: wgpu::CompareFunction::Less,
            stencil: wgpu::StencilState::default(),
        }
    }
}

impl DepthStencilState {
    /// Depth testing without writes, as used by transparent passes.
    #[must_use]
    pub fn read_only() -> Self {
        Self {
            depth_write_enabled: false,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn to_wgpu(
        &self,
        format: wgpu::TextureFormat,
        bias: wgpu::DepthBiasState,
    ) -> wgpu::DepthStencilState {
        wgpu::DepthStencilState {
            format,
            depth_write_enabled: Some(self.depth_write_enabled),
            depth_compare: Some(self.depth_compare),
            stencil: self.stencil.clone(),
            bias,
        }
    }
}
