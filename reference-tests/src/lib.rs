//! Reference test framework for atmosphere simulation validation
//!
//! A reference test loads a configuration file, seeds the world, applies
//! optional perturbations, runs a fixed number of ticks and validates the
//! final grids against expected-result criteria.


use std::path::Path;

use kernel::{ComputeBackend, FieldKind, GridDims, KernelId, RecordingBackend};
use orchestrator::{DriverError, SimulationConfig, SimulationDriver};

/// Expected result criteria for a reference test
#[derive(Debug, Clone, Default)]
pub struct ExpectedResult {
    /// Temperature bounds over open cells
    pub temperature_bounds: Option<TemperatureBoundsCheck>,
    /// Drift of open-cell temperature from the seeded state
    pub profile_drift: Option<ProfileDriftCheck>,
    /// Upper bound on wind speed
    pub wind_speed: Option<WindSpeedCheck>,
    /// Solid cells must be at rest
    pub solid_at_rest: Option<SolidAtRestCheck>,
    /// Rising air at a given cell
    pub updraft: Option<UpdraftCheck>,
}

/// Every open cell's temperature is finite and within bounds
#[derive(Debug, Clone)]
pub struct TemperatureBoundsCheck {
    /// Lowest allowed temperature (K)
    pub min: f32,
    /// Highest allowed temperature (K)
    pub max: f32,
}

/// Open-cell temperature stays close to what was seeded
#[derive(Debug, Clone)]
pub struct ProfileDriftCheck {
    /// Largest allowed absolute change (K)
    pub max_drift: f32,
}

/// No cell moves faster than a limit
#[derive(Debug, Clone)]
pub struct WindSpeedCheck {
    /// Largest allowed speed (m/s)
    pub max_speed: f32,
}

/// Velocity inside solid cells is exactly zero
#[derive(Debug, Clone)]
pub struct SolidAtRestCheck;

/// Vertical velocity at a cell exceeds a minimum
#[derive(Debug, Clone)]
pub struct UpdraftCheck {
    /// Cell to sample
    pub cell: [u32; 3],
    /// Smallest acceptable vertical velocity (m/s)
    pub min_vertical: f32,
}

/// Change applied to the world after initialization, before the first tick
#[derive(Debug, Clone)]
pub enum Perturbation {
    /// Add a temperature anomaly to every cell within `radius` cells of
    /// `center`
    WarmBubble {
        /// Bubble center
        center: [u32; 3],
        /// Radius in cells
        radius: u32,
        /// Temperature anomaly (K)
        anomaly: f32,
    },
    /// Set the same wind in every open cell
    UniformWind {
        /// Wind (m/s)
        velocity: [f32; 3],
    },
}

impl Perturbation {
    fn apply<B: ComputeBackend>(&self, driver: &mut SimulationDriver<B>) -> Result<(), DriverError> {
        let dims = driver.dims();
        match *self {
            Perturbation::WarmBubble {
                center,
                radius,
                anomaly,
            } => {
                let mut atmosphere = driver.read_field(FieldKind::Atmosphere)?;
                let r2 = (radius * radius) as i64;
                for_each_cell(dims, |cell, i| {
                    let d2: i64 = cell
                        .iter()
                        .zip(center)
                        .map(|(&a, b)| (a as i64 - b as i64).pow(2))
                        .sum();
                    if d2 <= r2 {
                        atmosphere[i][0] += anomaly;
                    }
                });
                driver.write_field(FieldKind::Atmosphere, &atmosphere)
            }
            Perturbation::UniformWind { velocity } => {
                let obstacles = driver.read_field(FieldKind::Obstacles)?;
                let cells: Vec<[f32; 4]> = obstacles
                    .iter()
                    .map(|mask| {
                        if mask[0] > 0.5 {
                            [0.0; 4]
                        } else {
                            [velocity[0], velocity[1], velocity[2], 0.0]
                        }
                    })
                    .collect();
                driver.write_field(FieldKind::Velocity, &cells)
            }
        }
    }
}

/// Result of running a reference test
#[derive(Debug)]
pub struct TestResult {
    /// Test name
    pub name: String,
    /// Whether test passed
    pub passed: bool,
    /// Individual check results
    pub checks: Vec<CheckResult>,
    /// Number of ticks executed
    pub ticks: u64,
    /// Simulated time (seconds)
    pub sim_time: f64,
    /// Fastest wind at the end of the run (m/s)
    pub max_speed: f32,
    /// Mean open-cell temperature at the end of the run (K)
    pub mean_temperature: f32,
}

/// Result of an individual validation check
#[derive(Debug)]
pub struct CheckResult {
    /// Check name
    pub name: String,
    /// Whether check passed
    pub passed: bool,
    /// Detail or error message
    pub message: Option<String>,
}

/// A reference test case
#[derive(Debug, Clone)]
pub struct ReferenceTest {
    /// Test name
    pub name: String,
    /// Path to configuration file
    pub config_path: String,
    /// Number of ticks to run
    pub ticks: u64,
    /// Applied after world initialization
    pub perturbations: Vec<Perturbation>,
    /// Expected results to validate
    pub expected: ExpectedResult,
}

/// Final grids of a run, copied to the host
struct Snapshot {
    dims: GridDims,
    seeded: Vec<[f32; 4]>,
    atmosphere: Vec<[f32; 4]>,
    velocity: Vec<[f32; 4]>,
    obstacles: Vec<[f32; 4]>,
}

impl Snapshot {
    fn is_solid(&self, i: usize) -> bool {
        self.obstacles[i][0] > 0.5
    }

    fn open_cells(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.atmosphere.len()).filter(|&i| !self.is_solid(i))
    }

    fn speed(&self, i: usize) -> f32 {
        let [x, y, z, _] = self.velocity[i];
        (x * x + y * y + z * z).sqrt()
    }
}

impl ReferenceTest {
    /// Run the reference test on `backend` and return results
    pub fn run<B: ComputeBackend>(&self, backend: B) -> Result<TestResult, DriverError> {
        tracing::info!("Running reference test: {}", self.name);

        let config = SimulationConfig::load(&self.config_path)?;
        let mut driver = SimulationDriver::new(backend, &config)?;
        driver.initialize_world()?;
        for perturbation in &self.perturbations {
            perturbation.apply(&mut driver)?;
        }
        let seeded = driver.read_field(FieldKind::Atmosphere)?;

        tracing::info!("Running {} ticks on {}...", self.ticks, driver.dims());
        for tick in 0..self.ticks {
            driver.tick(&config)?;

            // Log progress every 10% of ticks
            if (tick + 1) % (self.ticks / 10).max(1) == 0 {
                let progress = ((tick + 1) as f32 / self.ticks as f32) * 100.0;
                tracing::info!("Progress: {:.0}% ({}/{})", progress, tick + 1, self.ticks);
            }
        }

        let snapshot = Snapshot {
            dims: driver.dims(),
            seeded,
            atmosphere: driver.read_field(FieldKind::Atmosphere)?,
            velocity: driver.read_field(FieldKind::Velocity)?,
            obstacles: driver.read_field(FieldKind::Obstacles)?,
        };
        let sim_time = driver.probe().elapsed();
        driver.shutdown();

        let mut checks = Vec::new();
        if let Some(ref bounds) = self.expected.temperature_bounds {
            checks.push(validate_temperature_bounds(&snapshot, bounds));
        }
        if let Some(ref drift) = self.expected.profile_drift {
            checks.push(validate_profile_drift(&snapshot, drift));
        }
        if let Some(ref wind) = self.expected.wind_speed {
            checks.push(validate_wind_speed(&snapshot, wind));
        }
        if self.expected.solid_at_rest.is_some() {
            checks.push(validate_solid_at_rest(&snapshot));
        }
        if let Some(ref updraft) = self.expected.updraft {
            checks.push(validate_updraft(&snapshot, updraft));
        }

        let open = snapshot.open_cells().count().max(1);
        let mean_temperature =
            snapshot.open_cells().map(|i| snapshot.atmosphere[i][0]).sum::<f32>() / open as f32;
        let max_speed = (0..snapshot.velocity.len())
            .map(|i| snapshot.speed(i))
            .fold(0.0_f32, f32::max);

        Ok(TestResult {
            name: self.name.clone(),
            passed: checks.iter().all(|c| c.passed),
            checks,
            ticks: self.ticks,
            sim_time,
            max_speed,
            mean_temperature,
        })
    }

    /// Dry run on the recording backend: initialize the world, run one tick
    /// and return every dispatched kernel in order.
    pub fn plan(&self) -> Result<Vec<KernelId>, DriverError> {
        let config = SimulationConfig::load(&self.config_path)?;
        let mut driver = SimulationDriver::new(RecordingBackend::new(), &config)?;
        driver.initialize_world()?;
        for perturbation in &self.perturbations {
            perturbation.apply(&mut driver)?;
        }
        driver.tick(&config)?;
        Ok(driver.backend().kernel_sequence())
    }
}

fn for_each_cell(dims: GridDims, mut f: impl FnMut([u32; 3], usize)) {
    for z in 0..dims.depth() {
        for y in 0..dims.height() {
            for x in 0..dims.width() {
                f([x, y, z], dims.index(x, y, z));
            }
        }
    }
}

/// Validate that open-cell temperatures are finite and within bounds
fn validate_temperature_bounds(snapshot: &Snapshot, check: &TemperatureBoundsCheck) -> CheckResult {
    let mut violations = 0;
    let mut lowest = f32::INFINITY;
    let mut highest = f32::NEG_INFINITY;

    for i in snapshot.open_cells() {
        let t = snapshot.atmosphere[i][0];
        if !t.is_finite() || t < check.min || t > check.max {
            violations += 1;
        }
        lowest = lowest.min(t);
        highest = highest.max(t);
    }

    CheckResult {
        name: "Temperature Bounds".to_string(),
        passed: violations == 0,
        message: Some(if violations == 0 {
            format!("Range: {:.2} K .. {:.2} K", lowest, highest)
        } else {
            format!(
                "{} cells outside {:.1} K .. {:.1} K (range: {:.2} K .. {:.2} K)",
                violations, check.min, check.max, lowest, highest
            )
        }),
    }
}

/// Validate that open cells kept their seeded temperature
fn validate_profile_drift(snapshot: &Snapshot, check: &ProfileDriftCheck) -> CheckResult {
    let max_drift = snapshot
        .open_cells()
        .map(|i| (snapshot.atmosphere[i][0] - snapshot.seeded[i][0]).abs())
        .fold(0.0_f32, f32::max);

    CheckResult {
        name: "Profile Drift".to_string(),
        passed: max_drift <= check.max_drift,
        message: Some(format!(
            "Max drift: {:.2e} K (limit: {:.2e} K)",
            max_drift, check.max_drift
        )),
    }
}

/// Validate that no cell exceeds the speed limit
fn validate_wind_speed(snapshot: &Snapshot, check: &WindSpeedCheck) -> CheckResult {
    let mut fastest = 0.0_f32;
    let mut non_finite = 0;
    for i in 0..snapshot.velocity.len() {
        let speed = snapshot.speed(i);
        if speed.is_finite() {
            fastest = fastest.max(speed);
        } else {
            non_finite += 1;
        }
    }

    let passed = non_finite == 0 && fastest <= check.max_speed;
    CheckResult {
        name: "Wind Speed".to_string(),
        passed,
        message: Some(if non_finite > 0 {
            format!("{} cells with non-finite velocity", non_finite)
        } else {
            format!("Max speed: {:.4} m/s (limit: {:.4} m/s)", fastest, check.max_speed)
        }),
    }
}

/// Validate that solid cells carry no velocity
fn validate_solid_at_rest(snapshot: &Snapshot) -> CheckResult {
    let solid: Vec<usize> = (0..snapshot.obstacles.len())
        .filter(|&i| snapshot.is_solid(i))
        .collect();
    let moving = solid
        .iter()
        .filter(|&&i| snapshot.velocity[i][..3] != [0.0; 3])
        .count();

    if solid.is_empty() {
        return CheckResult {
            name: "Solid At Rest".to_string(),
            passed: false,
            message: Some("No solid cells in the obstacle mask".to_string()),
        };
    }

    CheckResult {
        name: "Solid At Rest".to_string(),
        passed: moving == 0,
        message: Some(format!("{} / {} solid cells moving", moving, solid.len())),
    }
}

/// Validate that air rises at the sampled cell
fn validate_updraft(snapshot: &Snapshot, check: &UpdraftCheck) -> CheckResult {
    let [x, y, z] = snapshot.dims.clamp(check.cell);
    let w = snapshot.velocity[snapshot.dims.index(x, y, z)][2];

    CheckResult {
        name: "Updraft".to_string(),
        passed: w >= check.min_vertical,
        message: Some(format!(
            "w at ({}, {}, {}): {:.4} m/s (minimum: {:.4} m/s)",
            x, y, z, w, check.min_vertical
        )),
    }
}

impl TestResult {
    /// Print a summary of the test result
    pub fn print_summary(&self) {
        println!("\n{}", "=".repeat(80));
        println!("Test: {}", self.name);
        println!("{}", "=".repeat(80));
        println!("Status: {}", if self.passed { "PASSED" } else { "FAILED" });
        println!("Ticks: {}", self.ticks);
        println!("Simulated time: {:.3} s", self.sim_time);
        println!("\nFinal State:");
        println!("  Max wind speed: {:.4} m/s", self.max_speed);
        println!("  Mean temperature: {:.2} K", self.mean_temperature);
        println!("\nValidation Checks:");
        for check in &self.checks {
            let status = if check.passed { "PASS" } else { "FAIL" };
            print!("  [{}] {}", status, check.name);
            if let Some(ref msg) = check.message {
                print!(" - {}", msg);
            }
            println!();
        }
        println!("{}", "=".repeat(80));
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

/// Resting atmosphere on the reference profile must stay put
pub fn quiescent_test(config_dir: &Path) -> ReferenceTest {
    ReferenceTest {
        name: "Quiescent Atmosphere".to_string(),
        config_path: config_path(config_dir, "quiescent.json"),
        ticks: 50,
        perturbations: Vec::new(),
        expected: ExpectedResult {
            temperature_bounds: Some(TemperatureBoundsCheck {
                min: 200.0,
                max: 300.0,
            }),
            profile_drift: Some(ProfileDriftCheck { max_drift: 1e-3 }),
            wind_speed: Some(WindSpeedCheck { max_speed: 1e-4 }),
            solid_at_rest: Some(SolidAtRestCheck),
            updraft: None,
        },
    }
}

/// A warm bubble near the ground must start rising
pub fn warm_bubble_test(config_dir: &Path) -> ReferenceTest {
    ReferenceTest {
        name: "Warm Bubble Updraft".to_string(),
        config_path: config_path(config_dir, "warm-bubble.json"),
        ticks: 10,
        perturbations: vec![Perturbation::WarmBubble {
            center: [16, 16, 4],
            radius: 2,
            anomaly: 5.0,
        }],
        expected: ExpectedResult {
            temperature_bounds: Some(TemperatureBoundsCheck {
                min: 200.0,
                max: 300.0,
            }),
            profile_drift: None,
            wind_speed: Some(WindSpeedCheck { max_speed: 20.0 }),
            solid_at_rest: Some(SolidAtRestCheck),
            updraft: Some(UpdraftCheck {
                cell: [16, 16, 4],
                min_vertical: 0.01,
            }),
        },
    }
}

/// Wind inside a sealed box must stay bounded and never enter the walls
pub fn sealed_box_test(config_dir: &Path) -> ReferenceTest {
    ReferenceTest {
        name: "Sealed Box Wind".to_string(),
        config_path: config_path(config_dir, "sealed-box.json"),
        ticks: 20,
        perturbations: vec![Perturbation::UniformWind {
            velocity: [5.0, 0.0, 0.0],
        }],
        expected: ExpectedResult {
            temperature_bounds: Some(TemperatureBoundsCheck {
                min: 150.0,
                max: 300.0,
            }),
            profile_drift: None,
            wind_speed: Some(WindSpeedCheck { max_speed: 10.0 }),
            solid_at_rest: Some(SolidAtRestCheck),
            updraft: None,
        },
    }
}

/// Get all reference tests, with configuration files under `config_dir`
pub fn all_tests(config_dir: &Path) -> Vec<ReferenceTest> {
    vec![
        quiescent_test(config_dir),
        warm_bubble_test(config_dir),
        sealed_box_test(config_dir),
    ]
}

fn config_path(config_dir: &Path, file: &str) -> String {
    config_dir.join(file).to_string_lossy().to_string()
}

/// The workspace `configs/` directory
pub fn default_config_dir() -> std::path::PathBuf {
    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    manifest_dir
        .parent()
        .unwrap_or(manifest_dir)
        .join("configs")
}
