//! Orchestration Layer
//!
//! This crate drives the atmosphere kernel, including:
//! - JSON configuration loading and validation
//! - The `SimulationDriver` lifecycle (`initialize_world`, `tick`, `shutdown`)
//! - Debug probe readback and the renderer's volume view
//! - A background-thread runner with start/pause/resume/stop

#![warn(missing_docs)]

pub mod config;
pub mod debug;
pub mod driver;
pub mod error;
pub mod runner;
pub mod view;

pub use config::{DebugConfig, GridConfig, SimulationConfig};
pub use debug::{DebugProbe, DebugSample};
pub use driver::SimulationDriver;
pub use error::{ConfigError, DriverError};
pub use runner::{RunnerState, SimulationRunner};
pub use view::VolumeView;

/// Create a GPU simulation from a configuration file
///
/// This function performs the full simulation setup pipeline:
/// 1. Load and validate the configuration
/// 2. Acquire a GPU adapter and device
/// 3. Resolve the kernels and allocate the grids
/// 4. Wrap the driver in a SimulationRunner for lifecycle management
///
/// # Example
/// ```no_run
/// use orchestrator::create_simulation;
///
/// let runner = create_simulation("configs/default.json")?;
/// runner.start();
/// // ... query status, pause, resume, etc.
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[cfg(feature = "gpu")]
pub fn create_simulation(config_path: &str) -> Result<SimulationRunner, DriverError> {
    tracing::info!("Creating simulation from config: {}", config_path);

    let config = SimulationConfig::load(config_path)?;
    tracing::info!("Configuration loaded: {}", config.name);

    let backend = kernel::WgpuBackend::new()?;
    let driver = SimulationDriver::new(backend, &config)?;

    tracing::info!("Simulation ready to start");
    Ok(SimulationRunner::new(driver, config))
}
