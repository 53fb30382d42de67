//! Simulation driver: owns the grids, the kernel table and the backend.
//!
//! Lifecycle is `new` -> `initialize_world` -> `tick`* -> `shutdown`.
//! `shutdown` also runs on drop. A kernel or submission failure during a
//! tick ends the simulation: the driver shuts down and every later call
//! returns [`DriverError::ShutDown`].

use kernel::{
    AtmosphereStage, Bindings, ComputeBackend, FieldKind, FluidStage, FrameUniforms, GridDims,
    KernelBinding, KernelError, KernelId, ProgramSet, SimulationGrids, DEBUG_SCRATCH_LEN,
};

use crate::config::SimulationConfig;
use crate::debug::{DebugProbe, DebugSample};
use crate::error::DriverError;
use crate::view::VolumeView;

/// Device resources released at shutdown.
struct Resources<Buf> {
    grids: SimulationGrids<Buf>,
    scratch: Buf,
}

/// Advances one simulation on a [`ComputeBackend`].
pub struct SimulationDriver<B: ComputeBackend> {
    backend: B,
    kernels: KernelBinding<B::Kernel>,
    resources: Option<Resources<B::Buffer>>,
    dims: GridDims,
    // Grid extents and obstacles only apply at startup.
    startup: SimulationConfig,
    probe: DebugProbe,
    world_initialized: bool,
    warned_restart_only: bool,
}

impl<B: ComputeBackend> SimulationDriver<B> {
    /// Create a driver running the built-in WGSL programs.
    pub fn new(backend: B, config: &SimulationConfig) -> Result<Self, DriverError> {
        let programs = ProgramSet::builtin()?;
        Self::with_programs(backend, config, &programs)
    }

    /// Create a driver running `programs`.
    ///
    /// Validates the configuration, resolves every kernel, checks the grid
    /// tiles into whole thread groups and allocates the fields and the debug
    /// scratch buffer. Anything allocated before a failure is released.
    pub fn with_programs(
        mut backend: B,
        config: &SimulationConfig,
        programs: &ProgramSet,
    ) -> Result<Self, DriverError> {
        config.validate()?;
        let dims = config.grid.dims()?;

        let kernels = KernelBinding::resolve(&mut backend, programs)?;
        kernels.validate_grid(dims)?;

        let grids = SimulationGrids::create(&mut backend, dims)?;
        let scratch = match backend.create_scratch_buffer("debug_scratch", DEBUG_SCRATCH_LEN) {
            Ok(scratch) => scratch,
            Err(e) => {
                grids.release(&mut backend);
                return Err(e.into());
            }
        };

        tracing::info!(
            "Simulation '{}' ready on {} ({} grid, fluid {})",
            config.name,
            backend.name(),
            dims,
            if config.use_fluid { "on" } else { "off" }
        );

        Ok(Self {
            backend,
            kernels,
            resources: Some(Resources { grids, scratch }),
            dims,
            startup: config.clone(),
            probe: DebugProbe::new(&config.debug, dims),
            world_initialized: false,
            warned_restart_only: false,
        })
    }

    /// Seed the atmosphere with the reference profile and write the
    /// obstacle mask.
    pub fn initialize_world(&mut self) -> Result<(), DriverError> {
        if self.resources.is_none() {
            return Err(DriverError::ShutDown);
        }
        if let Err(e) = self.record_world() {
            tracing::error!("World initialization failed: {e}");
            self.shutdown();
            return Err(e.into());
        }
        self.world_initialized = true;
        tracing::info!("World initialized");
        Ok(())
    }

    fn record_world(&mut self) -> Result<(), KernelError> {
        let Some(resources) = self.resources.as_ref() else {
            return Err(KernelError::Submission("resources already released".into()));
        };
        let grids = &resources.grids;
        let uniforms = FrameUniforms::new(self.dims)
            .with_world(&self.startup.world)
            .with_climate(&self.startup.climate)
            .with_obstacles(&self.startup.obstacles);

        let bindings = Bindings::writing(grids.atmosphere.active());
        self.kernels
            .dispatch(&mut self.backend, KernelId::InitWorld, &uniforms, &bindings, self.dims)?;

        let bindings = Bindings::writing(grids.obstacles.active());
        self.kernels
            .dispatch(&mut self.backend, KernelId::InitObstacles, &uniforms, &bindings, self.dims)?;

        self.backend.submit()
    }

    /// Advance the simulation by one tick.
    ///
    /// An invalid `config` is rejected before anything is recorded and the
    /// simulation continues. A kernel or submission failure shuts the driver
    /// down.
    pub fn tick(&mut self, config: &SimulationConfig) -> Result<(), DriverError> {
        if self.resources.is_none() {
            return Err(DriverError::ShutDown);
        }
        if !self.world_initialized {
            return Err(DriverError::WorldNotInitialized);
        }
        config.validate_tick()?;
        self.warn_restart_only(config);

        self.probe.configure(&config.debug, self.dims);
        let uniforms = FrameUniforms::new(self.dims)
            .with_world(&config.world)
            .with_climate(&config.climate)
            .with_probe(self.probe.enabled(), self.probe.pick());

        if let Err(e) = self.record_tick(config, &uniforms) {
            tracing::error!("Tick {} failed: {e}", self.probe.frame_count() + 1);
            self.shutdown();
            return Err(e.into());
        }

        self.probe.advance(config.world.delta_time);
        tracing::debug!(
            "Tick {} done (t = {:.3}s)",
            self.probe.frame_count(),
            self.probe.elapsed()
        );
        Ok(())
    }

    fn record_tick(
        &mut self,
        config: &SimulationConfig,
        uniforms: &FrameUniforms,
    ) -> Result<(), KernelError> {
        let Some(resources) = self.resources.as_mut() else {
            return Err(KernelError::Submission("resources already released".into()));
        };

        AtmosphereStage::run(
            &mut self.backend,
            &self.kernels,
            &mut resources.grids,
            &resources.scratch,
            uniforms,
        )?;
        if config.use_fluid {
            FluidStage::run(
                &mut self.backend,
                &self.kernels,
                &mut resources.grids,
                &config.fluid,
                uniforms,
            )?;
        }
        self.backend.submit()
    }

    fn warn_restart_only(&mut self, config: &SimulationConfig) {
        if self.warned_restart_only {
            return;
        }
        if config.grid != self.startup.grid || config.obstacles != self.startup.obstacles {
            tracing::warn!("Grid and obstacle changes take effect only after a restart");
            self.warned_restart_only = true;
        }
    }

    /// Release every grid and the scratch buffer. Idempotent.
    pub fn shutdown(&mut self) {
        let Some(resources) = self.resources.take() else {
            return;
        };
        if let Err(e) = self.backend.submit() {
            tracing::warn!("Pending work failed during shutdown: {e}");
        }
        resources.grids.release(&mut self.backend);
        self.backend.release_buffer(resources.scratch);
        tracing::info!(
            "Simulation '{}' shut down after {} ticks",
            self.startup.name,
            self.probe.frame_count()
        );
    }

    /// Whether `shutdown` has run.
    pub fn is_shut_down(&self) -> bool {
        self.resources.is_none()
    }

    fn grids(&self) -> Result<&SimulationGrids<B::Buffer>, DriverError> {
        self.resources
            .as_ref()
            .map(|resources| &resources.grids)
            .ok_or(DriverError::ShutDown)
    }

    /// Active atmosphere buffer.
    pub fn atmosphere(&self) -> Result<&B::Buffer, DriverError> {
        Ok(self.grids()?.atmosphere.active())
    }

    /// Active velocity buffer.
    pub fn velocity(&self) -> Result<&B::Buffer, DriverError> {
        Ok(self.grids()?.velocity.active())
    }

    /// Realized grid extents.
    pub fn dims(&self) -> GridDims {
        self.dims
    }

    /// Renderer view of the active atmosphere buffer.
    pub fn volume_view(&self) -> Result<VolumeView<'_, B::Buffer>, DriverError> {
        Ok(VolumeView::new(self.atmosphere()?, self.dims))
    }

    /// Read the debug scratch buffer and decode it.
    pub fn debug_sample(&mut self) -> Result<DebugSample, DriverError> {
        let resources = self.resources.as_ref().ok_or(DriverError::ShutDown)?;
        let scratch = self.backend.read_scratch(&resources.scratch)?;
        Ok(self.probe.sample(&scratch))
    }

    /// Ticks completed so far.
    pub fn frame_count(&self) -> u64 {
        self.probe.frame_count()
    }

    /// Copy the active half of a field to the host.
    pub fn read_field(&mut self, kind: FieldKind) -> Result<Vec<[f32; 4]>, DriverError> {
        let resources = self.resources.as_ref().ok_or(DriverError::ShutDown)?;
        let buffer = resources.grids.field(kind).active();
        Ok(self.backend.read_field(buffer)?)
    }

    /// Overwrite the active half of a field. `data` holds one cell per grid
    /// cell in `x + W * (y + H * z)` order.
    pub fn write_field(&mut self, kind: FieldKind, data: &[[f32; 4]]) -> Result<(), DriverError> {
        let resources = self.resources.as_ref().ok_or(DriverError::ShutDown)?;
        if data.len() != self.dims.cell_count() {
            return Err(KernelError::InvalidParams(format!(
                "{kind} write of {} cells into a {} grid",
                data.len(),
                self.dims
            ))
            .into());
        }
        let buffer = resources.grids.field(kind).active();
        Ok(self.backend.write_field(buffer, data)?)
    }

    /// Backend the simulation runs on.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Debug probe state.
    pub fn probe(&self) -> &DebugProbe {
        &self.probe
    }
}

impl<B: ComputeBackend> Drop for SimulationDriver<B> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
