//! Dispatch schedule of the atmosphere and fluid stages.
//!
//! Runs the stages against `RecordingBackend`, which records every dispatch
//! instead of executing it, and checks ordering, ping-pong buffer identity
//! and the uniforms each kernel receives.

use kernel::{
    AtmosphereStage, BufferId, ComputeBackend, FluidParams, FluidStage, FrameUniforms, GridDims,
    KernelBinding, KernelId, ProgramSet, RecordingBackend, SimulationGrids, Slot, WorldParams,
    DEBUG_SCRATCH_LEN,
};

struct Harness {
    backend: RecordingBackend,
    kernels: KernelBinding<KernelId>,
    grids: SimulationGrids<BufferId>,
    scratch: BufferId,
    uniforms: FrameUniforms,
}

impl Harness {
    fn new(width: u32, height: u32, depth: u32) -> Self {
        Self::with_backend(RecordingBackend::new(), width, height, depth)
    }

    fn with_backend(mut backend: RecordingBackend, width: u32, height: u32, depth: u32) -> Self {
        let dims = GridDims::from_requested(width, height, depth).unwrap();
        let programs = ProgramSet::builtin().unwrap();
        let kernels = KernelBinding::resolve(&mut backend, &programs).unwrap();
        kernels.validate_grid(dims).unwrap();
        let grids = SimulationGrids::create(&mut backend, dims).unwrap();
        let scratch = backend
            .create_scratch_buffer("debug_scratch", DEBUG_SCRATCH_LEN)
            .unwrap();
        let uniforms = FrameUniforms::new(dims).with_world(&WorldParams::default());
        Self {
            backend,
            kernels,
            grids,
            scratch,
            uniforms,
        }
    }

    fn run_atmosphere(&mut self) {
        AtmosphereStage::run(
            &mut self.backend,
            &self.kernels,
            &mut self.grids,
            &self.scratch,
            &self.uniforms,
        )
        .unwrap();
    }

    fn run_fluid(&mut self, params: &FluidParams) -> Result<(), kernel::KernelError> {
        FluidStage::run(
            &mut self.backend,
            &self.kernels,
            &mut self.grids,
            params,
            &self.uniforms,
        )
    }
}

fn read(record: &kernel::DispatchRecord, slot: Slot) -> Option<BufferId> {
    record
        .reads
        .iter()
        .find(|(s, _)| *s == slot)
        .map(|(_, id)| *id)
}

#[test]
fn test_atmosphere_stage_order_and_swaps() {
    let mut h = Harness::new(8, 8, 4);
    let velocity_before = *h.grids.velocity.active();
    let velocity_target = *h.grids.velocity.inactive();
    let atmosphere_target = *h.grids.atmosphere.inactive();

    h.run_atmosphere();

    let records = h.backend.dispatches();
    assert_eq!(
        h.backend.kernel_sequence(),
        vec![KernelId::CalcDynamicProcess, KernelId::CalcPhysicalProcess]
    );

    // Dynamic process: velocity.inactive <- velocity.active
    assert_eq!(records[0].output, velocity_target);
    assert_eq!(read(&records[0], Slot::Velocity), Some(velocity_before));
    assert_eq!(records[0].scratch, Some(h.scratch));

    // Physical process sees the velocity just produced.
    assert_eq!(records[1].output, atmosphere_target);
    assert_eq!(read(&records[1], Slot::Velocity), Some(velocity_target));

    assert_eq!(*h.grids.velocity.active(), velocity_target);
    assert_eq!(*h.grids.atmosphere.active(), atmosphere_target);
}

#[test]
fn test_default_fluid_schedule() {
    let mut h = Harness::new(8, 8, 4);
    h.run_fluid(&FluidParams::default()).unwrap();

    let mut expected = vec![
        KernelId::ApplyAdvection,
        KernelId::ApplyAdvectionVelocity,
        KernelId::CalcDivergence,
    ];
    expected.extend(std::iter::repeat(KernelId::CalcPressure).take(10));
    expected.push(KernelId::UpdateVelocity);

    assert_eq!(h.backend.kernel_sequence(), expected);
}

#[test]
fn test_confinement_runs_before_divergence() {
    let mut h = Harness::new(8, 8, 4);
    let params = FluidParams {
        vorticity_confinement: true,
        iterations: 2,
        ..FluidParams::default()
    };
    let vorticity_active = *h.grids.vorticity.active();
    h.run_fluid(&params).unwrap();

    assert_eq!(
        h.backend.kernel_sequence(),
        vec![
            KernelId::ApplyAdvection,
            KernelId::ApplyAdvectionVelocity,
            KernelId::CalcVorticity,
            KernelId::ApplyConfinement,
            KernelId::CalcDivergence,
            KernelId::CalcPressure,
            KernelId::CalcPressure,
            KernelId::UpdateVelocity,
        ]
    );

    let records = h.backend.dispatches();
    // Vorticity is written to its active half and read back from it.
    assert_eq!(records[2].output, vorticity_active);
    assert_eq!(read(&records[3], Slot::Vorticity), Some(vorticity_active));
    assert_eq!(*h.grids.vorticity.active(), vorticity_active);
    assert_eq!(records[3].uniforms.motion[2], params.vorticity_strength);
}

#[test]
fn test_zero_iterations_skips_pressure() {
    let mut h = Harness::new(8, 8, 4);
    let pressure_active = *h.grids.pressure.active();
    let params = FluidParams {
        iterations: 0,
        ..FluidParams::default()
    };
    h.run_fluid(&params).unwrap();

    let sequence = h.backend.kernel_sequence();
    assert!(!sequence.contains(&KernelId::CalcPressure));
    assert_eq!(sequence.last(), Some(&KernelId::UpdateVelocity));

    // Velocity update reads the untouched (warm-start) pressure.
    let update = h.backend.dispatches().last().unwrap();
    assert_eq!(read(update, Slot::Pressure), Some(pressure_active));
}

#[test]
fn test_pressure_iterations_ping_pong() {
    let mut h = Harness::new(8, 8, 4);
    let divergence = *h.grids.divergence.active();
    let params = FluidParams {
        iterations: 5,
        ..FluidParams::default()
    };
    h.run_fluid(&params).unwrap();

    let pressure: Vec<_> = h
        .backend
        .dispatches()
        .iter()
        .filter(|d| d.kernel == KernelId::CalcPressure)
        .collect();
    assert_eq!(pressure.len(), 5);

    for pair in pressure.windows(2) {
        // Each iteration reads what the previous one wrote.
        assert_eq!(read(pair[1], Slot::Pressure), Some(pair[0].output));
    }
    for record in &pressure {
        assert_eq!(read(record, Slot::Divergence), Some(divergence));
    }

    // Odd number of swaps leaves the second half active.
    assert_eq!(h.grids.pressure.active_index(), 1);
    assert_eq!(*h.grids.pressure.active(), pressure[4].output);
}

#[test]
fn test_divergence_written_in_place() {
    let mut h = Harness::new(8, 8, 4);
    let divergence = *h.grids.divergence.active();
    h.run_fluid(&FluidParams::default()).unwrap();

    let record = h
        .backend
        .dispatches()
        .iter()
        .find(|d| d.kernel == KernelId::CalcDivergence)
        .unwrap();
    assert_eq!(record.output, divergence);
    assert_eq!(h.grids.divergence.active_index(), 0);
}

#[test]
fn test_no_dispatch_reads_its_output() {
    let mut h = Harness::new(16, 16, 8);
    let params = FluidParams {
        vorticity_confinement: true,
        ..FluidParams::default()
    };
    for _ in 0..3 {
        h.run_atmosphere();
        h.run_fluid(&params).unwrap();
    }

    for record in h.backend.dispatches() {
        assert!(
            record.reads.iter().all(|(_, id)| *id != record.output),
            "{} reads its own output",
            record.kernel
        );
    }
}

#[test]
fn test_advection_dissipation_uniforms() {
    let mut h = Harness::new(8, 8, 4);
    h.run_fluid(&FluidParams::default()).unwrap();

    let records = h.backend.dispatches();
    assert_eq!(records[0].uniforms.dissipate, [0.995, 0.999, 1.0, 1.0]);
    assert_eq!(records[1].uniforms.dissipate, [0.995, 0.995, 0.995, 1.0]);
    assert_eq!(records[0].uniforms.motion[0], 0.016);
}

#[test]
fn test_dispatch_groups_follow_grid() {
    let mut h = Harness::new(16, 16, 8);
    h.run_atmosphere();
    for record in h.backend.dispatches() {
        assert_eq!(record.groups, [2, 2, 2]);
    }
}

#[test]
fn test_dispatch_failure_propagates() {
    let backend = RecordingBackend::new().with_dispatch_failure(3);
    let mut h = Harness::with_backend(backend, 8, 8, 4);

    let err = h.run_fluid(&FluidParams::default()).unwrap_err();
    assert!(matches!(err, kernel::KernelError::Submission(_)));
    // Advection, velocity advection and divergence were recorded first.
    assert_eq!(h.backend.dispatches().len(), 3);
}
