//! Per-dispatch uniform block and the parameter groups that fill it.
//!
//! [`FrameUniforms`] must match the `Frame` struct declared in every WGSL
//! program exactly: nine 16-byte rows, 144 bytes in total.

use serde::{Deserialize, Serialize};

use crate::error::KernelError;
use crate::grid::GridDims;

/// Uniform block bound at group 0, binding 0 of every kernel.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct FrameUniforms {
    /// Grid extents `[W, H, D, 0]`.
    pub size: [f32; 4],
    /// Cell spacing in km `[dx, dy, dz, 0]`.
    pub grid_size: [f32; 4],
    /// Reciprocal cell spacing in 1/km.
    pub inverse_grid_size: [f32; 4],
    /// Per-channel dissipation factors of the field being advected.
    pub dissipate: [f32; 4],
    /// `[surface temperature K, lapse rate K/km, relaxation rate 1/s, 0]`.
    pub climate: [f32; 4],
    /// `[delta time s, forward, vorticity strength, gravity m/s^2]`.
    pub motion: [f32; 4],
    /// `[rotation rate rad/s, Coriolis parameter 2*rate, 0, 0]`.
    pub rotation: [f32; 4],
    /// `[plane axis, plane index, has plane, enclose domain]`.
    pub obstacles: [u32; 4],
    /// `[probe enabled, pick x, pick y, pick z]`.
    pub debug: [u32; 4],
}

impl FrameUniforms {
    /// Size of the block in bytes.
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;

    /// Uniforms for `dims` with every parameter group zeroed and the
    /// forward flag set.
    pub fn new(dims: GridDims) -> Self {
        let [w, h, d] = dims.as_array();
        let mut uniforms: Self = bytemuck::Zeroable::zeroed();
        uniforms.size = [w as f32, h as f32, d as f32, 0.0];
        uniforms.motion[1] = 1.0;
        uniforms
    }

    /// Fill spacing, time step, gravity and rotation.
    ///
    /// The spacing must already have passed [`WorldParams::validate`]; the
    /// inverse spacing is derived here.
    pub fn with_world(mut self, world: &WorldParams) -> Self {
        let [dx, dy, dz] = world.grid_spacing_km;
        self.grid_size = [dx, dy, dz, 0.0];
        self.inverse_grid_size = [1.0 / dx, 1.0 / dy, 1.0 / dz, 0.0];
        self.motion[0] = world.delta_time;
        self.motion[3] = world.gravity;
        self.rotation = [world.rotation_rate, 2.0 * world.rotation_rate, 0.0, 0.0];
        self
    }

    /// Fill the reference temperature profile.
    pub fn with_climate(mut self, climate: &ClimateParams) -> Self {
        self.climate = [
            climate.surface_temperature,
            climate.lapse_rate,
            climate.relaxation_rate,
            0.0,
        ];
        self
    }

    /// Fill the obstacle description used by `init_obstacles`.
    pub fn with_obstacles(mut self, obstacles: &ObstacleParams) -> Self {
        let (axis, index, has_plane) = match obstacles.ground_plane {
            Some(plane) => (plane.axis as u32, plane.index, 1),
            None => (0, 0, 0),
        };
        self.obstacles = [axis, index, has_plane, u32::from(obstacles.enclose_domain)];
        self
    }

    /// Fill the debug probe. `pick` must already be clamped into the grid.
    pub fn with_probe(mut self, enabled: bool, pick: [u32; 3]) -> Self {
        self.debug = [u32::from(enabled), pick[0], pick[1], pick[2]];
        self
    }

    /// Set the dissipation factors for the next advection.
    pub fn with_dissipation(mut self, dissipate: [f32; 4]) -> Self {
        self.dissipate = dissipate;
        self
    }

    /// Set the vorticity confinement strength.
    pub fn with_vorticity_strength(mut self, epsilon: f32) -> Self {
        self.motion[2] = epsilon;
        self
    }

    /// Raw bytes as uploaded to the device.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

// ---------------------------------------------------------------------------
// Parameter groups
// ---------------------------------------------------------------------------

fn default_delta_time() -> f32 {
    0.016
}
fn default_grid_spacing_km() -> [f32; 3] {
    [10.0, 10.0, 0.5]
}
fn default_gravity() -> f32 {
    9.81
}
fn default_rotation_rate() -> f32 {
    7.2921e-5
}

/// Physical description of the simulated world.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorldParams {
    /// Time step in seconds.
    #[serde(default = "default_delta_time")]
    pub delta_time: f32,
    /// Cell spacing per axis in km.
    #[serde(default = "default_grid_spacing_km")]
    pub grid_spacing_km: [f32; 3],
    /// Gravitational acceleration in m/s^2.
    #[serde(default = "default_gravity")]
    pub gravity: f32,
    /// Planetary rotation rate in rad/s.
    #[serde(default = "default_rotation_rate")]
    pub rotation_rate: f32,
}

impl Default for WorldParams {
    fn default() -> Self {
        Self {
            delta_time: default_delta_time(),
            grid_spacing_km: default_grid_spacing_km(),
            gravity: default_gravity(),
            rotation_rate: default_rotation_rate(),
        }
    }
}

impl WorldParams {
    /// Reject a non-positive time step or grid spacing before any inverse is
    /// taken.
    pub fn validate(&self) -> Result<(), KernelError> {
        if !(self.delta_time.is_finite() && self.delta_time > 0.0) {
            return Err(KernelError::InvalidParams(format!(
                "delta_time must be positive and finite, got {}",
                self.delta_time
            )));
        }
        for (axis, spacing) in ["x", "y", "z"].iter().zip(self.grid_spacing_km) {
            if !(spacing.is_finite() && spacing > 0.0) {
                return Err(KernelError::InvalidParams(format!(
                    "grid spacing along {axis} must be positive and finite, got {spacing} km"
                )));
            }
        }
        if !self.gravity.is_finite() || !self.rotation_rate.is_finite() {
            return Err(KernelError::InvalidParams(
                "gravity and rotation_rate must be finite".into(),
            ));
        }
        Ok(())
    }
}

fn default_surface_temperature() -> f32 {
    288.15
}
fn default_lapse_rate() -> f32 {
    6.5
}

/// Reference temperature profile `T_ref(z) = T_surface - lapse * altitude`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClimateParams {
    /// Temperature at z = 0 in K.
    #[serde(default = "default_surface_temperature")]
    pub surface_temperature: f32,
    /// Temperature decrease with altitude in K/km.
    #[serde(default = "default_lapse_rate")]
    pub lapse_rate: f32,
    /// Newtonian relaxation rate towards the profile in 1/s.
    #[serde(default)]
    pub relaxation_rate: f32,
}

impl Default for ClimateParams {
    fn default() -> Self {
        Self {
            surface_temperature: default_surface_temperature(),
            lapse_rate: default_lapse_rate(),
            relaxation_rate: 0.0,
        }
    }
}

impl ClimateParams {
    /// All three parameters must be finite and non-negative.
    pub fn validate(&self) -> Result<(), KernelError> {
        let values = [
            ("surface_temperature", self.surface_temperature),
            ("lapse_rate", self.lapse_rate),
            ("relaxation_rate", self.relaxation_rate),
        ];
        for (name, value) in values {
            if !(value.is_finite() && value >= 0.0) {
                return Err(KernelError::InvalidParams(format!(
                    "{name} must be finite and non-negative, got {value}"
                )));
            }
        }
        Ok(())
    }
}

fn default_iterations() -> u32 {
    10
}
fn default_vorticity_strength() -> f32 {
    1.0
}
fn default_density_dissipation() -> f32 {
    0.999
}
fn default_temperature_dissipation() -> f32 {
    0.995
}
fn default_velocity_dissipation() -> f32 {
    0.995
}

/// Upper bound on Jacobi iterations per tick.
pub const MAX_PRESSURE_ITERATIONS: u32 = 1000;

/// Fluid solver parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FluidParams {
    /// Jacobi pressure iterations per tick. Zero skips the solve.
    #[serde(default = "default_iterations")]
    pub iterations: u32,
    /// Confinement strength.
    #[serde(default = "default_vorticity_strength")]
    pub vorticity_strength: f32,
    /// Run the vorticity confinement passes.
    #[serde(default)]
    pub vorticity_confinement: bool,
    /// Moisture dissipation per tick.
    #[serde(default = "default_density_dissipation")]
    pub density_dissipation: f32,
    /// Temperature anomaly dissipation per tick.
    #[serde(default = "default_temperature_dissipation")]
    pub temperature_dissipation: f32,
    /// Velocity dissipation per tick.
    #[serde(default = "default_velocity_dissipation")]
    pub velocity_dissipation: f32,
}

impl Default for FluidParams {
    fn default() -> Self {
        Self {
            iterations: default_iterations(),
            vorticity_strength: default_vorticity_strength(),
            vorticity_confinement: false,
            density_dissipation: default_density_dissipation(),
            temperature_dissipation: default_temperature_dissipation(),
            velocity_dissipation: default_velocity_dissipation(),
        }
    }
}

impl FluidParams {
    /// Dissipation factors in [0, 1], a bounded iteration count and a finite
    /// confinement strength.
    pub fn validate(&self) -> Result<(), KernelError> {
        let factors = [
            ("density_dissipation", self.density_dissipation),
            ("temperature_dissipation", self.temperature_dissipation),
            ("velocity_dissipation", self.velocity_dissipation),
        ];
        for (name, value) in factors {
            if !(0.0..=1.0).contains(&value) {
                return Err(KernelError::InvalidParams(format!(
                    "{name} must be in [0, 1], got {value}"
                )));
            }
        }
        if self.iterations > MAX_PRESSURE_ITERATIONS {
            return Err(KernelError::InvalidParams(format!(
                "iterations must be at most {MAX_PRESSURE_ITERATIONS}, got {}",
                self.iterations
            )));
        }
        if !self.vorticity_strength.is_finite() {
            return Err(KernelError::InvalidParams(
                "vorticity_strength must be finite".into(),
            ));
        }
        Ok(())
    }

    /// Dissipation applied when advecting the atmosphere.
    ///
    /// `[temperature anomaly, density, 1, 1]`: the two reserved channels are
    /// transported without decay.
    pub fn atmosphere_factors(&self) -> [f32; 4] {
        [self.temperature_dissipation, self.density_dissipation, 1.0, 1.0]
    }

    /// Dissipation applied when advecting velocity.
    pub fn velocity_factors(&self) -> [f32; 4] {
        let v = self.velocity_dissipation;
        [v, v, v, 1.0]
    }
}

/// Grid axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    /// Width axis.
    X = 0,
    /// Height axis.
    Y = 1,
    /// Vertical axis.
    Z = 2,
}

/// A solid plane of cells at `index` along `axis`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroundPlane {
    /// Axis the plane is perpendicular to.
    pub axis: Axis,
    /// Cell index along `axis`.
    pub index: u32,
}

fn default_ground_plane() -> Option<GroundPlane> {
    Some(GroundPlane {
        axis: Axis::Z,
        index: 0,
    })
}

/// Obstacle mask description.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObstacleParams {
    /// Solid plane, the ground by default. `null` disables it.
    #[serde(default = "default_ground_plane")]
    pub ground_plane: Option<GroundPlane>,
    /// Mark every boundary cell of the domain solid.
    #[serde(default)]
    pub enclose_domain: bool,
}

impl Default for ObstacleParams {
    fn default() -> Self {
        Self {
            ground_plane: default_ground_plane(),
            enclose_domain: false,
        }
    }
}

impl ObstacleParams {
    /// The ground plane must lie inside the realized grid.
    pub fn validate(&self, dims: GridDims) -> Result<(), KernelError> {
        if let Some(plane) = self.ground_plane {
            let extent = dims.as_array()[plane.axis as usize];
            if plane.index >= extent {
                return Err(KernelError::InvalidParams(format!(
                    "ground plane index {} outside {:?} extent {}",
                    plane.index, plane.axis, extent
                )));
            }
        }
        Ok(())
    }
}
