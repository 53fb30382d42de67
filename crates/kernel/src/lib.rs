//! GPU Atmosphere Kernel
//!
//! This crate provides the compute pipeline that advances a gridded
//! atmosphere and wind field once per simulation tick. Each tick records a
//! fixed sequence of compute dispatches over double-buffered 3D grids.
//!
//! # Modules
//! - [`grid`] -- Power-of-two grid extents and double-buffered fields.
//! - [`binding`] -- WGSL programs (parsed with naga) and the kernel table.
//! - [`backend`] -- The `ComputeBackend` trait every device implements.
//! - [`uniforms`] -- Per-dispatch uniform block and parameter groups.
//! - [`stages`] -- Atmosphere and fluid dispatch sequences.
//! - [`recording`] -- Device-less backend that records the schedule.
//! - `gpu` -- wgpu backend (feature `gpu`).

#![warn(missing_docs)]

pub mod backend;
pub mod binding;
pub mod error;
pub mod grid;
pub mod recording;
pub mod stages;
pub mod uniforms;

#[cfg(feature = "gpu")]
pub mod gpu;

pub use backend::{Bindings, ComputeBackend, Slot};
pub use binding::{ComputeProgram, KernelBinding, KernelId, Program, ProgramSet, ThreadGroupSize};
pub use error::KernelError;
pub use grid::{FieldKind, GridDims, GridField, SimulationGrids};
pub use recording::{BufferId, DispatchRecord, RecordingBackend};
pub use stages::{AtmosphereStage, FluidStage};
pub use uniforms::{
    Axis, ClimateParams, FluidParams, FrameUniforms, GroundPlane, ObstacleParams, WorldParams,
};

#[cfg(feature = "gpu")]
pub use gpu::{gpu_available, WgpuBackend};

/// Length, in floats, of the debug scratch buffer.
///
/// Slots 0-3 hold the picked atmosphere cell after the physical process,
/// slots 4-7 the picked velocity `[x, y, z, |v|]` after the dynamic process.
pub const DEBUG_SCRATCH_LEN: usize = 8;
