//! What a volume renderer needs to sample the atmosphere.

use kernel::GridDims;

/// Borrowed view of the active atmosphere buffer and its placement.
///
/// The volume is scaled to one world unit per cell and lifted by half its
/// depth, so the ground plane sits at height zero.
#[derive(Debug)]
pub struct VolumeView<'a, B> {
    /// Active atmosphere buffer.
    pub buffer: &'a B,
    /// Grid extents `[W, H, D, 0]`, as sampled by a shader.
    pub size: [f32; 4],
    /// Volume scale `[W, H, D]`.
    pub scale: [f32; 3],
    /// Volume translation `[0, 0, D / 2]`.
    pub translate: [f32; 3],
}

impl<'a, B> VolumeView<'a, B> {
    /// View of `buffer` covering `dims`.
    pub fn new(buffer: &'a B, dims: GridDims) -> Self {
        let [w, h, d] = dims.as_array().map(|extent| extent as f32);
        Self {
            buffer,
            size: [w, h, d, 0.0],
            scale: [w, h, d],
            translate: [0.0, 0.0, d * 0.5],
        }
    }

    /// Column-major model matrix: scale, then translate.
    pub fn model_matrix(&self) -> [[f32; 4]; 4] {
        let [sx, sy, sz] = self.scale;
        let [tx, ty, tz] = self.translate;
        [
            [sx, 0.0, 0.0, 0.0],
            [0.0, sy, 0.0, 0.0],
            [0.0, 0.0, sz, 0.0],
            [tx, ty, tz, 1.0],
        ]
    }
}
