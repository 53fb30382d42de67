//! Driver lifecycle on the recording backend.
//!
//! Covers startup validation, world initialization, the per-tick schedule,
//! fatal and non-fatal tick failures and resource release.

use kernel::{
    ComputeProgram, FieldKind, KernelError, KernelId, Program, ProgramSet, RecordingBackend,
};
use orchestrator::{ConfigError, DriverError, SimulationConfig, SimulationDriver};

const FIELD_BUFFERS: usize = 12;

fn small_config() -> SimulationConfig {
    let mut config = SimulationConfig::default();
    config.grid.width = 16;
    config.grid.height = 8;
    config.grid.depth = 4;
    config
}

fn driver(config: &SimulationConfig) -> SimulationDriver<RecordingBackend> {
    SimulationDriver::new(RecordingBackend::new(), config).unwrap()
}

fn initialized(config: &SimulationConfig) -> SimulationDriver<RecordingBackend> {
    let mut driver = driver(config);
    driver.initialize_world().unwrap();
    driver
}

#[test]
fn test_startup_allocates_fields_and_scratch() {
    let driver = driver(&small_config());
    let backend = driver.backend();

    assert_eq!(backend.live_buffer_count(), FIELD_BUFFERS + 1);
    assert_eq!(backend.loaded_kernels(), &KernelId::ALL);
    assert!(backend.dispatches().is_empty());
    assert_eq!(driver.dims().as_array(), [16, 8, 4]);
    assert_eq!(driver.frame_count(), 0);
}

#[test]
fn test_startup_rounds_extents_up() {
    let mut config = small_config();
    config.grid.width = 100;
    config.grid.depth = 5;
    let driver = driver(&config);
    assert_eq!(driver.dims().as_array(), [128, 8, 8]);
}

#[test]
fn test_startup_rejects_zero_spacing() {
    let mut config = small_config();
    config.world.grid_spacing_km = [10.0, 10.0, 0.0];
    let err = SimulationDriver::new(RecordingBackend::new(), &config).err().unwrap();
    assert!(matches!(err, DriverError::Config(ConfigError::Invalid(_))));
}

#[test]
fn test_startup_rejects_grid_smaller_than_thread_group() {
    let mut config = small_config();
    config.grid.depth = 2;
    let err = SimulationDriver::new(RecordingBackend::new(), &config).err().unwrap();
    assert!(matches!(
        err,
        DriverError::Kernel(KernelError::GridNotDivisible { .. })
    ));
}

#[test]
fn test_startup_fails_on_missing_kernel() {
    let source = Program::Atmosphere
        .builtin_source()
        .replace("fn calc_dynamic_process(", "fn dynamic_process(");
    let programs = ProgramSet::builtin()
        .unwrap()
        .with_program(ComputeProgram::from_source(Program::Atmosphere, source).unwrap());

    let err = SimulationDriver::with_programs(RecordingBackend::new(), &small_config(), &programs)
        .err()
        .unwrap();
    match err {
        DriverError::Kernel(KernelError::KernelNotFound { program, kernel }) => {
            assert_eq!(program, Program::Atmosphere);
            assert_eq!(kernel, "calc_dynamic_process");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_startup_allocation_failure_is_reported() {
    let backend = RecordingBackend::new().with_buffer_limit(FIELD_BUFFERS);
    let err = SimulationDriver::new(backend, &small_config()).err().unwrap();
    assert!(matches!(err, DriverError::Kernel(KernelError::Allocation { .. })));
}

#[test]
fn test_tick_before_initialize_world() {
    let mut driver = driver(&small_config());
    let err = driver.tick(&small_config()).unwrap_err();
    assert!(matches!(err, DriverError::WorldNotInitialized));
    assert!(driver.backend().dispatches().is_empty());
}

#[test]
fn test_initialize_world_seeds_active_halves() {
    let driver = initialized(&small_config());
    let backend = driver.backend();

    assert_eq!(
        backend.kernel_sequence(),
        vec![KernelId::InitWorld, KernelId::InitObstacles]
    );
    let records = backend.dispatches();
    assert_eq!(records[0].output, *driver.atmosphere().unwrap());
    assert_eq!(backend.label(records[1].output), Some("obstacles_0"));
    assert_eq!(records[1].uniforms.obstacles, [2, 0, 1, 0]);
    assert_eq!(backend.submissions(), 1);
    assert_eq!(backend.pending_dispatches(), 0);
}

#[test]
fn test_tick_runs_full_schedule_in_one_submission() {
    let config = small_config();
    let mut driver = initialized(&config);

    driver.tick(&config).unwrap();

    let sequence = driver.backend().kernel_sequence();
    // Two init dispatches, two atmosphere, three fluid, ten pressure, one update.
    assert_eq!(sequence.len(), 2 + 2 + 3 + 10 + 1);
    assert_eq!(sequence[2], KernelId::CalcDynamicProcess);
    assert_eq!(sequence[3], KernelId::CalcPhysicalProcess);
    assert_eq!(sequence[4], KernelId::ApplyAdvection);
    assert_eq!(sequence.last(), Some(&KernelId::UpdateVelocity));

    assert_eq!(driver.backend().submissions(), 2);
    assert!(driver.backend().dispatches()[2..]
        .iter()
        .all(|d| d.submission == 1));
    assert_eq!(driver.frame_count(), 1);
}

#[test]
fn test_fluid_disabled_runs_atmosphere_only() {
    let mut config = small_config();
    config.use_fluid = false;
    let mut driver = initialized(&config);

    driver.tick(&config).unwrap();
    driver.tick(&config).unwrap();

    let sequence = driver.backend().kernel_sequence();
    assert_eq!(
        &sequence[2..],
        &[
            KernelId::CalcDynamicProcess,
            KernelId::CalcPhysicalProcess,
            KernelId::CalcDynamicProcess,
            KernelId::CalcPhysicalProcess,
        ]
    );
    assert_eq!(driver.frame_count(), 2);
}

#[test]
fn test_tick_uniforms_follow_config() {
    let mut config = small_config();
    let mut driver = initialized(&config);

    config.world.delta_time = 0.5;
    config.climate.relaxation_rate = 0.01;
    config.debug.enabled = true;
    config.debug.pick = [3, 40, 2];
    driver.tick(&config).unwrap();

    let dynamic = &driver.backend().dispatches()[2];
    assert_eq!(dynamic.kernel, KernelId::CalcDynamicProcess);
    assert_eq!(dynamic.uniforms.motion[0], 0.5);
    assert_eq!(dynamic.uniforms.climate[2], 0.01);
    assert_eq!(dynamic.uniforms.debug, [1, 3, 7, 2]);
    assert_eq!(dynamic.uniforms.inverse_grid_size, [0.1, 0.1, 2.0, 0.0]);
}

#[test]
fn test_invalid_tick_config_is_not_fatal() {
    let config = small_config();
    let mut driver = initialized(&config);
    let before = driver.backend().dispatches().len();

    let mut bad = config.clone();
    bad.world.grid_spacing_km = [10.0, 0.0, 0.5];
    let err = driver.tick(&bad).unwrap_err();
    assert!(matches!(err, DriverError::Config(_)));
    assert!(err.to_string().contains("along y"));
    assert_eq!(driver.backend().dispatches().len(), before);
    assert_eq!(driver.frame_count(), 0);

    driver.tick(&config).unwrap();
    assert_eq!(driver.frame_count(), 1);
}

#[test]
fn test_dispatch_failure_shuts_driver_down() {
    // Fail the first fluid dispatch of the first tick.
    let backend = RecordingBackend::new().with_dispatch_failure(4);
    let config = small_config();
    let mut driver = SimulationDriver::new(backend, &config).unwrap();
    driver.initialize_world().unwrap();

    let err = driver.tick(&config).unwrap_err();
    assert!(matches!(err, DriverError::Kernel(KernelError::Submission(_))));
    assert!(driver.is_shut_down());
    assert_eq!(driver.backend().live_buffer_count(), 0);
    assert_eq!(driver.frame_count(), 0);

    assert!(matches!(driver.tick(&config), Err(DriverError::ShutDown)));
    assert!(matches!(driver.atmosphere(), Err(DriverError::ShutDown)));
}

#[test]
fn test_shutdown_releases_once() {
    let mut driver = initialized(&small_config());
    driver.shutdown();
    driver.shutdown();

    assert_eq!(driver.backend().live_buffer_count(), 0);
    assert_eq!(driver.backend().released_count(), FIELD_BUFFERS + 1);
    assert!(matches!(
        driver.initialize_world(),
        Err(DriverError::ShutDown)
    ));
    assert!(matches!(
        driver.read_field(FieldKind::Pressure),
        Err(DriverError::ShutDown)
    ));
}

#[test]
fn test_write_then_read_field() {
    let mut driver = initialized(&small_config());
    let cells = driver.dims().cell_count();

    let mut data = vec![[0.0; 4]; cells];
    data[driver.dims().index(1, 2, 3)] = [295.0, 0.5, 0.0, 0.0];
    driver.write_field(FieldKind::Atmosphere, &data).unwrap();
    assert_eq!(driver.read_field(FieldKind::Atmosphere).unwrap(), data);

    let err = driver
        .write_field(FieldKind::Velocity, &data[..cells - 1])
        .unwrap_err();
    assert!(matches!(err, DriverError::Kernel(KernelError::InvalidParams(_))));
}

#[test]
fn test_active_buffers_follow_swaps() {
    let mut config = small_config();
    config.use_fluid = false;
    let mut driver = initialized(&config);

    let atmosphere = *driver.atmosphere().unwrap();
    let velocity = *driver.velocity().unwrap();
    driver.tick(&config).unwrap();

    assert_ne!(*driver.atmosphere().unwrap(), atmosphere);
    assert_ne!(*driver.velocity().unwrap(), velocity);
    let records = driver.backend().dispatches();
    assert_eq!(records[2].output, *driver.velocity().unwrap());
    assert_eq!(records[3].output, *driver.atmosphere().unwrap());
}

#[test]
fn test_volume_view_and_debug_sample() {
    let mut config = small_config();
    config.debug.enabled = true;
    config.debug.pick = [2, 2, 9];
    let mut driver = initialized(&config);
    driver.tick(&config).unwrap();
    driver.tick(&config).unwrap();

    let view = driver.volume_view().unwrap();
    assert_eq!(view.size, [16.0, 8.0, 4.0, 0.0]);
    assert_eq!(view.translate, [0.0, 0.0, 2.0]);

    let sample = driver.debug_sample().unwrap();
    assert_eq!(sample.frame, 2);
    assert_eq!(sample.pick, [2, 2, 3]);
    assert!((sample.elapsed - 0.032).abs() < 1e-6);
}

#[test]
fn test_restart_only_changes_do_not_fail_tick() {
    let config = small_config();
    let mut driver = initialized(&config);

    let mut changed = config.clone();
    changed.grid.width = 64;
    changed.obstacles.enclose_domain = true;
    driver.tick(&changed).unwrap();
    driver.tick(&changed).unwrap();

    assert_eq!(driver.dims().as_array(), [16, 8, 4]);
    assert_eq!(driver.frame_count(), 2);
}
