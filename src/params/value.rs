use bytemuck::Pod;
use glam::{Mat3, Mat4, Vec2, Vec3, Vec4};

use super::desc::GpuParamDataType;

/// Value type that can be stored in a data parameter.
pub trait GpuParamValue: Pod + Send + Sync + 'static {
    const TYPE: GpuParamDataType;

    /// Row/column swap applied when the parameter set transposes matrices.
    #[must_use]
    fn transposed(self) -> Self {
        self
    }
}

impl GpuParamValue for f32 {
    const TYPE: GpuParamDataType = GpuParamDataType::Float1;
}

impl GpuParamValue for Vec2 {
    const TYPE: GpuParamDataType = GpuParamDataType::Float2;
}

impl GpuParamValue for Vec3 {
    const TYPE: GpuParamDataType = GpuParamDataType::Float3;
}

impl GpuParamValue for Vec4 {
    const TYPE: GpuParamDataType = GpuParamDataType::Float4;
}

impl GpuParamValue for Mat3 {
    const TYPE: GpuParamDataType = GpuParamDataType::Matrix3x3;

    fn transposed(self) -> Self {
        self.transpose()
    }
}

impl GpuParamValue for Mat4 {
    const TYPE: GpuParamDataType = GpuParamDataType::Matrix4x4;

    fn transposed(self) -> Self {
        self.transpose()
    }
}
