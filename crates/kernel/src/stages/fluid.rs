//! Fluid solver: advection, optional vorticity confinement and the
//! pressure projection.
//!
//! Order within a tick:
//! 1. `apply_advection` (atmosphere), swap atmosphere
//! 2. `apply_advection_velocity`, swap velocity
//! 3. `calc_vorticity` into vorticity.active, then `apply_confinement`,
//!    swap velocity (only when confinement is enabled)
//! 4. `calc_divergence` into divergence.active
//! 5. `calc_pressure` x iterations, swapping pressure after each
//! 6. `update_velocity`, swap velocity
//!
//! Vorticity and divergence are written straight into their active half:
//! each has a single consumer later in the same tick and nothing reads the
//! previous contents.

use crate::backend::{Bindings, ComputeBackend, Slot};
use crate::binding::{KernelBinding, KernelId};
use crate::error::KernelError;
use crate::grid::SimulationGrids;
use crate::uniforms::{FluidParams, FrameUniforms};

/// Records the fluid half of a tick.
pub struct FluidStage<'a, B: ComputeBackend + ?Sized> {
    backend: &'a mut B,
    kernels: &'a KernelBinding<B::Kernel>,
    grids: &'a mut SimulationGrids<B::Buffer>,
    uniforms: FrameUniforms,
}

impl<'a, B> FluidStage<'a, B>
where
    B: ComputeBackend + ?Sized,
{
    /// Record every fluid dispatch of one tick.
    pub fn run(
        backend: &'a mut B,
        kernels: &'a KernelBinding<B::Kernel>,
        grids: &'a mut SimulationGrids<B::Buffer>,
        params: &FluidParams,
        uniforms: &FrameUniforms,
    ) -> Result<(), KernelError> {
        let mut stage = Self {
            backend,
            kernels,
            grids,
            uniforms: uniforms.with_vorticity_strength(params.vorticity_strength),
        };

        stage.advect_atmosphere(params)?;
        stage.advect_velocity(params)?;
        if params.vorticity_confinement {
            stage.confine_vorticity()?;
        }
        stage.compute_divergence()?;
        stage.solve_pressure(params.iterations)?;
        stage.update_velocity()
    }

    fn advect_atmosphere(&mut self, params: &FluidParams) -> Result<(), KernelError> {
        let uniforms = self.uniforms.with_dissipation(params.atmosphere_factors());
        let grids = &*self.grids;
        let bindings = Bindings::writing(grids.atmosphere.inactive())
            .read(Slot::Velocity, grids.velocity.active())
            .read(Slot::Atmosphere, grids.atmosphere.active())
            .read(Slot::Obstacles, grids.obstacles.active());
        self.kernels.dispatch(
            &mut *self.backend,
            KernelId::ApplyAdvection,
            &uniforms,
            &bindings,
            grids.dims(),
        )?;
        self.grids.atmosphere.swap();
        Ok(())
    }

    fn advect_velocity(&mut self, params: &FluidParams) -> Result<(), KernelError> {
        let uniforms = self.uniforms.with_dissipation(params.velocity_factors());
        let grids = &*self.grids;
        let bindings = Bindings::writing(grids.velocity.inactive())
            .read(Slot::Velocity, grids.velocity.active())
            .read(Slot::Obstacles, grids.obstacles.active());
        self.kernels.dispatch(
            &mut *self.backend,
            KernelId::ApplyAdvectionVelocity,
            &uniforms,
            &bindings,
            grids.dims(),
        )?;
        self.grids.velocity.swap();
        Ok(())
    }

    fn confine_vorticity(&mut self) -> Result<(), KernelError> {
        let uniforms = self.uniforms;
        let grids = &*self.grids;

        let bindings = Bindings::writing(grids.vorticity.active())
            .read(Slot::Velocity, grids.velocity.active());
        self.kernels.dispatch(
            &mut *self.backend,
            KernelId::CalcVorticity,
            &uniforms,
            &bindings,
            grids.dims(),
        )?;

        let bindings = Bindings::writing(grids.velocity.inactive())
            .read(Slot::Velocity, grids.velocity.active())
            .read(Slot::Vorticity, grids.vorticity.active())
            .read(Slot::Obstacles, grids.obstacles.active());
        self.kernels.dispatch(
            &mut *self.backend,
            KernelId::ApplyConfinement,
            &uniforms,
            &bindings,
            grids.dims(),
        )?;
        self.grids.velocity.swap();
        Ok(())
    }

    fn compute_divergence(&mut self) -> Result<(), KernelError> {
        let uniforms = self.uniforms;
        let grids = &*self.grids;
        let bindings = Bindings::writing(grids.divergence.active())
            .read(Slot::Velocity, grids.velocity.active())
            .read(Slot::Obstacles, grids.obstacles.active());
        self.kernels.dispatch(
            &mut *self.backend,
            KernelId::CalcDivergence,
            &uniforms,
            &bindings,
            grids.dims(),
        )
    }

    fn solve_pressure(&mut self, iterations: u32) -> Result<(), KernelError> {
        let uniforms = self.uniforms;
        for _ in 0..iterations {
            let grids = &*self.grids;
            let bindings = Bindings::writing(grids.pressure.inactive())
                .read(Slot::Pressure, grids.pressure.active())
                .read(Slot::Divergence, grids.divergence.active())
                .read(Slot::Obstacles, grids.obstacles.active());
            self.kernels.dispatch(
                &mut *self.backend,
                KernelId::CalcPressure,
                &uniforms,
                &bindings,
                grids.dims(),
            )?;
            self.grids.pressure.swap();
        }
        Ok(())
    }

    fn update_velocity(&mut self) -> Result<(), KernelError> {
        let uniforms = self.uniforms;
        let grids = &*self.grids;
        let bindings = Bindings::writing(grids.velocity.inactive())
            .read(Slot::Velocity, grids.velocity.active())
            .read(Slot::Pressure, grids.pressure.active())
            .read(Slot::Obstacles, grids.obstacles.active());
        self.kernels.dispatch(
            &mut *self.backend,
            KernelId::UpdateVelocity,
            &uniforms,
            &bindings,
            grids.dims(),
        )?;
        self.grids.velocity.swap();
        Ok(())
    }
}
