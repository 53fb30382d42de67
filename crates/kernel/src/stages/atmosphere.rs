//! Thermodynamic update: dynamic process, then physical process.

use crate::backend::{Bindings, ComputeBackend, Slot};
use crate::binding::{KernelBinding, KernelId};
use crate::error::KernelError;
use crate::grid::SimulationGrids;
use crate::uniforms::FrameUniforms;

/// Records the atmosphere half of a tick.
pub struct AtmosphereStage;

impl AtmosphereStage {
    /// Dispatch `calc_dynamic_process` into velocity, swap, then
    /// `calc_physical_process` into the atmosphere, swap.
    ///
    /// The physical process reads the velocity produced by the dynamic
    /// process in the same tick.
    pub fn run<B>(
        backend: &mut B,
        kernels: &KernelBinding<B::Kernel>,
        grids: &mut SimulationGrids<B::Buffer>,
        scratch: &B::Buffer,
        uniforms: &FrameUniforms,
    ) -> Result<(), KernelError>
    where
        B: ComputeBackend + ?Sized,
    {
        let dims = grids.dims();

        let bindings = Bindings::writing(grids.velocity.inactive())
            .read(Slot::Velocity, grids.velocity.active())
            .read(Slot::Atmosphere, grids.atmosphere.active())
            .read(Slot::Obstacles, grids.obstacles.active())
            .scratch(scratch);
        kernels.dispatch(backend, KernelId::CalcDynamicProcess, uniforms, &bindings, dims)?;
        grids.velocity.swap();

        let bindings = Bindings::writing(grids.atmosphere.inactive())
            .read(Slot::Velocity, grids.velocity.active())
            .read(Slot::Atmosphere, grids.atmosphere.active())
            .read(Slot::Obstacles, grids.obstacles.active())
            .scratch(scratch);
        kernels.dispatch(backend, KernelId::CalcPhysicalProcess, uniforms, &bindings, dims)?;
        grids.atmosphere.swap();

        Ok(())
    }
}
