//! Double-buffered 3D grid fields.
//!
//! Every simulated quantity lives in a [`GridField`]: two equally sized
//! device buffers of `vec4<f32>` cells and a bit selecting which of the two
//! is current. Kernels read the active half and write the inactive half,
//! then the field swaps, so no kernel ever reads and writes the same buffer.

use std::fmt;

use crate::backend::ComputeBackend;
use crate::error::KernelError;

/// Bytes per grid cell (`vec4<f32>`).
pub const CELL_BYTES: u64 = 16;

/// Realized grid extents. Every axis is a power of two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GridDims {
    width: u32,
    height: u32,
    depth: u32,
}

impl GridDims {
    /// Round each requested extent up to the nearest power of two.
    ///
    /// The simulated extent can be larger than requested (100 becomes 128).
    /// A zero extent is rejected.
    pub fn from_requested(width: u32, height: u32, depth: u32) -> Result<Self, KernelError> {
        if width == 0 || height == 0 || depth == 0 {
            return Err(KernelError::InvalidParams(format!(
                "grid extents must be non-zero, got {width}x{height}x{depth}"
            )));
        }

        let dims = Self {
            width: round_up_pow2(width)?,
            height: round_up_pow2(height)?,
            depth: round_up_pow2(depth)?,
        };

        if dims.as_array() != [width, height, depth] {
            tracing::info!(
                "Grid {}x{}x{} rounded up to {} (extents must be powers of two)",
                width,
                height,
                depth,
                dims
            );
        }
        Ok(dims)
    }

    /// Width (x extent).
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height (y extent).
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Depth (z extent, the vertical axis).
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Extents as `[W, H, D]`.
    pub fn as_array(&self) -> [u32; 3] {
        [self.width, self.height, self.depth]
    }

    /// Number of cells, `W * H * D`.
    pub fn cell_count(&self) -> usize {
        self.width as usize * self.height as usize * self.depth as usize
    }

    /// Size in bytes of one buffer covering the grid.
    pub fn buffer_bytes(&self) -> u64 {
        self.cell_count() as u64 * CELL_BYTES
    }

    /// Linear index of cell `(x, y, z)`, x fastest. Matches the kernels.
    pub fn index(&self, x: u32, y: u32, z: u32) -> usize {
        x as usize + self.width as usize * (y as usize + self.height as usize * z as usize)
    }

    /// Clamp a cell coordinate into the grid.
    pub fn clamp(&self, cell: [u32; 3]) -> [u32; 3] {
        [
            cell[0].min(self.width - 1),
            cell[1].min(self.height - 1),
            cell[2].min(self.depth - 1),
        ]
    }
}

impl fmt::Display for GridDims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.width, self.height, self.depth)
    }
}

fn round_up_pow2(extent: u32) -> Result<u32, KernelError> {
    extent.checked_next_power_of_two().ok_or_else(|| {
        KernelError::InvalidParams(format!("grid extent {extent} has no power-of-two ceiling"))
    })
}

// ---------------------------------------------------------------------------
// GridField
// ---------------------------------------------------------------------------

/// Two equal buffers plus the index of the active one.
///
/// `release` consumes the field, so a field cannot be released twice or used
/// after release.
#[derive(Debug)]
pub struct GridField<B> {
    name: &'static str,
    dims: GridDims,
    buffers: [B; 2],
    active: usize,
}

impl<B> GridField<B> {
    /// Allocate both halves, zero-initialized.
    pub fn create<C>(backend: &mut C, name: &'static str, dims: GridDims) -> Result<Self, KernelError>
    where
        C: ComputeBackend<Buffer = B> + ?Sized,
    {
        let first = backend.create_field_buffer(&format!("{name}_0"), dims)?;
        let second = match backend.create_field_buffer(&format!("{name}_1"), dims) {
            Ok(buffer) => buffer,
            Err(e) => {
                backend.release_buffer(first);
                return Err(e);
            }
        };

        Ok(Self {
            name,
            dims,
            buffers: [first, second],
            active: 0,
        })
    }

    /// Field name, used for buffer labels and logs.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Extents shared by both halves.
    pub fn dims(&self) -> GridDims {
        self.dims
    }

    /// Buffer holding the current state.
    pub fn active(&self) -> &B {
        &self.buffers[self.active]
    }

    /// Buffer the next kernel writes into.
    pub fn inactive(&self) -> &B {
        &self.buffers[self.active ^ 1]
    }

    /// Index (0 or 1) of the active half.
    pub fn active_index(&self) -> usize {
        self.active
    }

    /// Make the inactive half current. No data moves.
    pub fn swap(&mut self) {
        self.active ^= 1;
    }

    /// Free both halves.
    pub fn release<C>(self, backend: &mut C)
    where
        C: ComputeBackend<Buffer = B> + ?Sized,
    {
        let [first, second] = self.buffers;
        backend.release_buffer(first);
        backend.release_buffer(second);
    }
}

// ---------------------------------------------------------------------------
// SimulationGrids
// ---------------------------------------------------------------------------

/// Identifies one of the simulation's grid fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    /// Temperature (x) and moisture (y).
    Atmosphere,
    /// Wind velocity in m/s (xyz).
    Velocity,
    /// Curl of velocity (xyz) and its magnitude (w).
    Vorticity,
    /// Velocity divergence (x).
    Divergence,
    /// Pressure (x), warm-started between ticks.
    Pressure,
    /// Obstacle mask (x = 1 for solid cells).
    Obstacles,
}

impl FieldKind {
    /// Every field, in allocation order.
    pub const ALL: [FieldKind; 6] = [
        FieldKind::Atmosphere,
        FieldKind::Velocity,
        FieldKind::Vorticity,
        FieldKind::Divergence,
        FieldKind::Pressure,
        FieldKind::Obstacles,
    ];

    /// Label used for buffers and logs.
    pub fn label(self) -> &'static str {
        match self {
            FieldKind::Atmosphere => "atmosphere",
            FieldKind::Velocity => "velocity",
            FieldKind::Vorticity => "vorticity",
            FieldKind::Divergence => "divergence",
            FieldKind::Pressure => "pressure",
            FieldKind::Obstacles => "obstacles",
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The six fields of one simulation, all with identical extents.
#[derive(Debug)]
pub struct SimulationGrids<B> {
    /// Temperature and moisture.
    pub atmosphere: GridField<B>,
    /// Wind velocity.
    pub velocity: GridField<B>,
    /// Vorticity scratch for confinement.
    pub vorticity: GridField<B>,
    /// Divergence scratch for the pressure solve.
    pub divergence: GridField<B>,
    /// Pressure.
    pub pressure: GridField<B>,
    /// Obstacle mask, written once at world initialization.
    pub obstacles: GridField<B>,
}

impl<B> SimulationGrids<B> {
    /// Allocate all six fields. Fields created before a failing allocation
    /// are released before the error is returned.
    pub fn create<C>(backend: &mut C, dims: GridDims) -> Result<Self, KernelError>
    where
        C: ComputeBackend<Buffer = B> + ?Sized,
    {
        // Create one field, releasing the ones listed after it on failure.
        macro_rules! field {
            ($kind:expr $(, $created:ident)*) => {
                match GridField::create(backend, $kind.label(), dims) {
                    Ok(field) => field,
                    Err(e) => {
                        $($created.release(backend);)*
                        return Err(e);
                    }
                }
            };
        }

        let atmosphere = field!(FieldKind::Atmosphere);
        let velocity = field!(FieldKind::Velocity, atmosphere);
        let vorticity = field!(FieldKind::Vorticity, atmosphere, velocity);
        let divergence = field!(FieldKind::Divergence, atmosphere, velocity, vorticity);
        let pressure = field!(FieldKind::Pressure, atmosphere, velocity, vorticity, divergence);
        let obstacles = field!(
            FieldKind::Obstacles,
            atmosphere,
            velocity,
            vorticity,
            divergence,
            pressure
        );

        tracing::info!(
            "Allocated {} grid fields at {} ({:.1} MiB each half)",
            FieldKind::ALL.len(),
            dims,
            dims.buffer_bytes() as f64 / (1024.0 * 1024.0)
        );

        Ok(Self {
            atmosphere,
            velocity,
            vorticity,
            divergence,
            pressure,
            obstacles,
        })
    }

    /// Extents shared by every field.
    pub fn dims(&self) -> GridDims {
        self.atmosphere.dims()
    }

    /// Look a field up by kind.
    pub fn field(&self, kind: FieldKind) -> &GridField<B> {
        match kind {
            FieldKind::Atmosphere => &self.atmosphere,
            FieldKind::Velocity => &self.velocity,
            FieldKind::Vorticity => &self.vorticity,
            FieldKind::Divergence => &self.divergence,
            FieldKind::Pressure => &self.pressure,
            FieldKind::Obstacles => &self.obstacles,
        }
    }

    /// Free every field.
    pub fn release<C>(self, backend: &mut C)
    where
        C: ComputeBackend<Buffer = B> + ?Sized,
    {
        self.atmosphere.release(backend);
        self.velocity.release(backend);
        self.vorticity.release(backend);
        self.divergence.release(backend);
        self.pressure.release(backend);
        self.obstacles.release(backend);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::RecordingBackend;

    #[test]
    fn test_extents_round_up_to_power_of_two() {
        let dims = GridDims::from_requested(100, 128, 1).unwrap();
        assert_eq!(dims.as_array(), [128, 128, 1]);

        let dims = GridDims::from_requested(129, 3, 64).unwrap();
        assert_eq!(dims.as_array(), [256, 4, 64]);
    }

    #[test]
    fn test_zero_extent_rejected() {
        let err = GridDims::from_requested(128, 0, 128).unwrap_err();
        assert!(matches!(err, KernelError::InvalidParams(_)));
    }

    #[test]
    fn test_extent_without_power_of_two_ceiling_rejected() {
        assert!(GridDims::from_requested(u32::MAX, 8, 8).is_err());
    }

    #[test]
    fn test_index_is_x_fastest() {
        let dims = GridDims::from_requested(8, 4, 2).unwrap();
        assert_eq!(dims.index(0, 0, 0), 0);
        assert_eq!(dims.index(1, 0, 0), 1);
        assert_eq!(dims.index(0, 1, 0), 8);
        assert_eq!(dims.index(0, 0, 1), 32);
        assert_eq!(dims.index(7, 3, 1), dims.cell_count() - 1);
    }

    #[test]
    fn test_clamp_pick_cell() {
        let dims = GridDims::from_requested(16, 16, 8).unwrap();
        assert_eq!(dims.clamp([3, 40, 8]), [3, 15, 7]);
    }

    #[test]
    fn test_swap_flips_active_without_copy() {
        let mut backend = RecordingBackend::new();
        let dims = GridDims::from_requested(8, 8, 4).unwrap();
        let mut field = GridField::create(&mut backend, "velocity", dims).unwrap();

        let first = *field.active();
        let second = *field.inactive();
        assert_ne!(first, second);

        field.swap();
        assert_eq!(*field.active(), second);
        assert_eq!(*field.inactive(), first);

        field.swap();
        assert_eq!(*field.active(), first);
        assert_eq!(field.active_index(), 0);
    }

    #[test]
    fn test_failed_second_allocation_releases_first() {
        let mut backend = RecordingBackend::new().with_buffer_limit(1);
        let dims = GridDims::from_requested(8, 8, 4).unwrap();

        let result = GridField::create(&mut backend, "pressure", dims);
        assert!(result.is_err());
        assert_eq!(backend.live_buffer_count(), 0);
        assert_eq!(backend.released_count(), 1);
    }

    #[test]
    fn test_partial_grid_creation_is_released() {
        // Room for two and a half fields.
        let mut backend = RecordingBackend::new().with_buffer_limit(5);
        let dims = GridDims::from_requested(8, 8, 4).unwrap();

        let result = SimulationGrids::create(&mut backend, dims);
        assert!(result.is_err());
        assert_eq!(backend.live_buffer_count(), 0);
        assert_eq!(backend.released_count(), 5);
    }

    #[test]
    fn test_every_failed_allocation_releases_created_fields() {
        let dims = GridDims::from_requested(8, 8, 4).unwrap();
        for limit in 0..12 {
            let mut backend = RecordingBackend::new().with_buffer_limit(limit);
            assert!(SimulationGrids::create(&mut backend, dims).is_err(), "limit {limit}");
            assert_eq!(backend.live_buffer_count(), 0, "limit {limit}");
            assert_eq!(backend.released_count(), limit, "limit {limit}");
        }
    }

    #[test]
    fn test_fields_are_labelled_by_kind() {
        let mut backend = RecordingBackend::new();
        let dims = GridDims::from_requested(8, 8, 4).unwrap();
        let grids = SimulationGrids::create(&mut backend, dims).unwrap();
        for kind in FieldKind::ALL {
            let field = grids.field(kind);
            assert_eq!(field.name(), kind.label());
            assert_eq!(backend.label(*field.active()), Some(format!("{kind}_0").as_str()));
            assert_eq!(backend.label(*field.inactive()), Some(format!("{kind}_1").as_str()));
        }
    }

    #[test]
    fn test_release_frees_every_buffer_once() {
        let mut backend = RecordingBackend::new();
        let dims = GridDims::from_requested(8, 8, 4).unwrap();
        let grids = SimulationGrids::create(&mut backend, dims).unwrap();
        assert_eq!(backend.live_buffer_count(), 12);

        grids.release(&mut backend);
        assert_eq!(backend.live_buffer_count(), 0);
        assert_eq!(backend.released_count(), 12);
    }
}
