//! Kernel programs and the startup-resolved kernel table.
//!
//! Programs are WGSL sources parsed with naga on the host, so missing entry
//! points and inconsistent workgroup sizes are reported before any device
//! pipeline is built. [`KernelBinding`] then asks the backend for one handle
//! per [`KernelId`] and keeps them for the life of the simulation.

use std::borrow::Cow;
use std::fmt;

use crate::backend::{Bindings, ComputeBackend};
use crate::error::KernelError;
use crate::grid::GridDims;
use crate::uniforms::FrameUniforms;

/// A compute program, i.e. one WGSL source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Program {
    /// World seeding and the thermodynamic processes.
    Atmosphere,
    /// Obstacle mask seeding.
    Obstacles,
    /// Advection, vorticity, divergence and pressure projection.
    Fluid,
}

impl Program {
    /// Every program, in resolution order.
    pub const ALL: [Program; 3] = [Program::Atmosphere, Program::Obstacles, Program::Fluid];

    /// Program name, used for labels and diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            Program::Atmosphere => "atmosphere",
            Program::Obstacles => "obstacles",
            Program::Fluid => "fluid",
        }
    }

    /// WGSL source shipped with the crate.
    pub fn builtin_source(self) -> &'static str {
        match self {
            Program::Atmosphere => include_str!("shaders/atmosphere.wgsl"),
            Program::Obstacles => include_str!("shaders/obstacles.wgsl"),
            Program::Fluid => include_str!("shaders/fluid.wgsl"),
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Every kernel the pipeline dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelId {
    /// Seed the atmosphere with the reference temperature profile.
    InitWorld,
    /// Seed the obstacle mask.
    InitObstacles,
    /// Buoyancy and Coriolis acceleration of the wind.
    CalcDynamicProcess,
    /// Adiabatic cooling and relaxation of temperature.
    CalcPhysicalProcess,
    /// Semi-Lagrangian advection of the atmosphere.
    ApplyAdvection,
    /// Semi-Lagrangian self-advection of velocity.
    ApplyAdvectionVelocity,
    /// Curl of velocity.
    CalcVorticity,
    /// Vorticity confinement force.
    ApplyConfinement,
    /// Velocity divergence.
    CalcDivergence,
    /// One Jacobi pressure iteration.
    CalcPressure,
    /// Subtract the pressure gradient from velocity.
    UpdateVelocity,
}

impl KernelId {
    /// Every kernel, in resolution order.
    pub const ALL: [KernelId; 11] = [
        KernelId::InitWorld,
        KernelId::InitObstacles,
        KernelId::CalcDynamicProcess,
        KernelId::CalcPhysicalProcess,
        KernelId::ApplyAdvection,
        KernelId::ApplyAdvectionVelocity,
        KernelId::CalcVorticity,
        KernelId::ApplyConfinement,
        KernelId::CalcDivergence,
        KernelId::CalcPressure,
        KernelId::UpdateVelocity,
    ];

    /// Program that defines this kernel.
    pub fn program(self) -> Program {
        match self {
            KernelId::InitWorld | KernelId::CalcDynamicProcess | KernelId::CalcPhysicalProcess => {
                Program::Atmosphere
            }
            KernelId::InitObstacles => Program::Obstacles,
            KernelId::ApplyAdvection
            | KernelId::ApplyAdvectionVelocity
            | KernelId::CalcVorticity
            | KernelId::ApplyConfinement
            | KernelId::CalcDivergence
            | KernelId::CalcPressure
            | KernelId::UpdateVelocity => Program::Fluid,
        }
    }

    /// WGSL entry point name.
    pub fn entry_point(self) -> &'static str {
        match self {
            KernelId::InitWorld => "init_world",
            KernelId::InitObstacles => "init_obstacles",
            KernelId::CalcDynamicProcess => "calc_dynamic_process",
            KernelId::CalcPhysicalProcess => "calc_physical_process",
            KernelId::ApplyAdvection => "apply_advection",
            KernelId::ApplyAdvectionVelocity => "apply_advection_velocity",
            KernelId::CalcVorticity => "calc_vorticity",
            KernelId::ApplyConfinement => "apply_confinement",
            KernelId::CalcDivergence => "calc_divergence",
            KernelId::CalcPressure => "calc_pressure",
            KernelId::UpdateVelocity => "update_velocity",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for KernelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.entry_point())
    }
}

// ---------------------------------------------------------------------------
// Thread groups
// ---------------------------------------------------------------------------

/// Workgroup geometry `[x, y, z]` declared by a program's kernels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadGroupSize(pub [u32; 3]);

impl ThreadGroupSize {
    /// Workgroups needed to cover `dims`, `dims / size` per axis.
    ///
    /// Integer division: callers validate divisibility once at startup.
    pub fn groups_for(self, dims: GridDims) -> [u32; 3] {
        let extents = dims.as_array();
        [
            extents[0] / self.0[0],
            extents[1] / self.0[1],
            extents[2] / self.0[2],
        ]
    }

    /// Whether every axis of `dims` is a non-zero multiple of this size.
    pub fn tiles(self, dims: GridDims) -> bool {
        dims.as_array()
            .iter()
            .zip(self.0)
            .all(|(&extent, group)| group > 0 && extent >= group && extent % group == 0)
    }
}

// ---------------------------------------------------------------------------
// Programs
// ---------------------------------------------------------------------------

/// A parsed WGSL program.
#[derive(Debug)]
pub struct ComputeProgram {
    program: Program,
    source: Cow<'static, str>,
    module: naga::Module,
}

impl ComputeProgram {
    /// Parse the program shipped with the crate.
    pub fn builtin(program: Program) -> Result<Self, KernelError> {
        Self::from_source(program, program.builtin_source())
    }

    /// Parse a replacement source for `program`.
    pub fn from_source(
        program: Program,
        source: impl Into<Cow<'static, str>>,
    ) -> Result<Self, KernelError> {
        let source = source.into();
        let module = naga::front::wgsl::parse_str(&source).map_err(|e| KernelError::ShaderParse {
            program,
            message: e.emit_to_string(&source),
        })?;
        Ok(Self {
            program,
            source,
            module,
        })
    }

    /// Which program this is.
    pub fn program(&self) -> Program {
        self.program
    }

    /// WGSL text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Parsed module.
    pub fn module(&self) -> &naga::Module {
        &self.module
    }

    /// Names of every compute entry point.
    pub fn kernel_names(&self) -> impl Iterator<Item = &str> {
        self.compute_entry_points().map(|ep| ep.name.as_str())
    }

    /// Whether `name` is a compute entry point of this program.
    pub fn has_kernel(&self, name: &str) -> bool {
        self.kernel_names().any(|n| n == name)
    }

    /// Workgroup size of the first kernel, after checking every other kernel
    /// declares the same geometry.
    pub fn thread_group_size(&self) -> Result<ThreadGroupSize, KernelError> {
        let mut entry_points = self.compute_entry_points();
        let first = entry_points.next().ok_or(KernelError::EmptyProgram {
            program: self.program,
        })?;

        for ep in entry_points {
            if ep.workgroup_size != first.workgroup_size {
                return Err(KernelError::ThreadGroupMismatch {
                    program: self.program,
                    kernel: ep.name.clone(),
                    expected: first.workgroup_size,
                    found: ep.workgroup_size,
                });
            }
        }
        Ok(ThreadGroupSize(first.workgroup_size))
    }

    fn compute_entry_points(&self) -> impl Iterator<Item = &naga::EntryPoint> {
        self.module
            .entry_points
            .iter()
            .filter(|ep| ep.stage == naga::ShaderStage::Compute)
    }
}

/// One parsed program per [`Program`].
#[derive(Debug)]
pub struct ProgramSet {
    programs: [ComputeProgram; 3],
}

impl ProgramSet {
    /// Parse every shipped program.
    pub fn builtin() -> Result<Self, KernelError> {
        Ok(Self {
            programs: [
                ComputeProgram::builtin(Program::Atmosphere)?,
                ComputeProgram::builtin(Program::Obstacles)?,
                ComputeProgram::builtin(Program::Fluid)?,
            ],
        })
    }

    /// Replace one program, e.g. with a locally modified source.
    pub fn with_program(mut self, program: ComputeProgram) -> Self {
        let index = program.program().index();
        self.programs[index] = program;
        self
    }

    /// Parsed program.
    pub fn get(&self, program: Program) -> &ComputeProgram {
        &self.programs[program.index()]
    }
}

// ---------------------------------------------------------------------------
// KernelBinding
// ---------------------------------------------------------------------------

/// Kernel handles resolved once at startup, plus each program's thread
/// group size.
#[derive(Debug)]
pub struct KernelBinding<K> {
    handles: Vec<K>,
    thread_groups: [ThreadGroupSize; 3],
}

impl<K> KernelBinding<K> {
    /// Resolve every [`KernelId`] against `programs` and load it on
    /// `backend`.
    ///
    /// Fails with `KernelNotFound` if any entry point is missing; the caller
    /// is expected to abort startup.
    pub fn resolve<B>(backend: &mut B, programs: &ProgramSet) -> Result<Self, KernelError>
    where
        B: ComputeBackend<Kernel = K> + ?Sized,
    {
        let mut thread_groups = [ThreadGroupSize([1, 1, 1]); 3];
        for program in Program::ALL {
            let size = programs.get(program).thread_group_size()?;
            tracing::debug!("{} program thread group {:?}", program, size.0);
            thread_groups[program.index()] = size;
        }

        let mut handles = Vec::with_capacity(KernelId::ALL.len());
        for kernel in KernelId::ALL {
            let program = programs.get(kernel.program());
            if !program.has_kernel(kernel.entry_point()) {
                return Err(KernelError::KernelNotFound {
                    program: kernel.program(),
                    kernel: kernel.entry_point(),
                });
            }
            handles.push(backend.load_kernel(program, kernel)?);
        }

        tracing::info!(
            "Bound {} kernels across {} programs",
            handles.len(),
            Program::ALL.len()
        );

        Ok(Self {
            handles,
            thread_groups,
        })
    }

    /// Backend handle for `kernel`.
    pub fn handle(&self, kernel: KernelId) -> &K {
        &self.handles[kernel.index()]
    }

    /// Thread-group size of the program defining `kernel`.
    pub fn thread_group_size(&self, kernel: KernelId) -> ThreadGroupSize {
        self.thread_groups[kernel.program().index()]
    }

    /// Workgroup counts covering `dims` for `kernel`.
    pub fn dispatch_groups(&self, kernel: KernelId, dims: GridDims) -> [u32; 3] {
        self.thread_group_size(kernel).groups_for(dims)
    }

    /// Startup check that `dims` tiles evenly into every program's thread
    /// groups.
    pub fn validate_grid(&self, dims: GridDims) -> Result<(), KernelError> {
        for program in Program::ALL {
            let group = self.thread_groups[program.index()];
            if !group.tiles(dims) {
                return Err(KernelError::GridNotDivisible {
                    program,
                    dims,
                    group: group.0,
                });
            }
        }
        Ok(())
    }

    /// Record one whole-grid dispatch of `kernel`.
    pub fn dispatch<B>(
        &self,
        backend: &mut B,
        kernel: KernelId,
        uniforms: &FrameUniforms,
        bindings: &Bindings<'_, B::Buffer>,
        dims: GridDims,
    ) -> Result<(), KernelError>
    where
        B: ComputeBackend<Kernel = K> + ?Sized,
    {
        let groups = self.dispatch_groups(kernel, dims);
        backend.dispatch(self.handle(kernel), kernel, uniforms, bindings, groups)
    }
}
