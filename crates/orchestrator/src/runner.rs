//! Simulation runner with lifecycle management
//!
//! This module provides the `SimulationRunner` which moves a
//! [`SimulationDriver`] onto a background thread and exposes start, pause,
//! resume, stop and status tracking. The configuration applied on every tick
//! can be replaced while the simulation runs.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use kernel::ComputeBackend;

use crate::config::SimulationConfig;
use crate::debug::DebugSample;
use crate::driver::SimulationDriver;
use crate::error::ConfigError;

/// Runner state enum
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerState {
    /// Simulation created but not yet started
    Created,
    /// Simulation actively running
    Running,
    /// Simulation paused
    Paused,
    /// Simulation finished (reached max_ticks or stopped)
    Finished,
    /// Simulation encountered an error
    Error,
}

/// Shared state between the runner thread and control interface
struct SharedState {
    /// Current runner state
    state: RunnerState,
    /// Configuration read at the start of every tick
    config: SimulationConfig,
    /// Simulated seconds
    sim_time: f64,
    /// Number of ticks executed
    tick_count: u64,
    /// Debug probe readback after the latest tick, when the probe is enabled
    latest_sample: Option<DebugSample>,
    /// Most recent error message (if state is Error)
    error_message: Option<String>,
}

fn lock(shared: &Mutex<SharedState>) -> MutexGuard<'_, SharedState> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle for controlling and querying a running simulation
pub struct SimulationRunner {
    /// Shared state (protected by mutex)
    shared: Arc<Mutex<SharedState>>,
    /// Handle to the background thread
    thread_handle: Option<thread::JoinHandle<()>>,
}

impl SimulationRunner {
    /// Move `driver` onto a background thread. The world is initialized when
    /// the runner is first started.
    pub fn new<B>(driver: SimulationDriver<B>, config: SimulationConfig) -> Self
    where
        B: ComputeBackend + Send + 'static,
        B::Buffer: Send,
        B::Kernel: Send,
    {
        let shared = Arc::new(Mutex::new(SharedState {
            state: RunnerState::Created,
            config,
            sim_time: 0.0,
            tick_count: 0,
            latest_sample: None,
            error_message: None,
        }));

        let shared_clone = Arc::clone(&shared);

        let thread_handle = thread::spawn(move || {
            run_simulation_loop(driver, shared_clone);
        });

        Self {
            shared,
            thread_handle: Some(thread_handle),
        }
    }

    /// Get current runner state
    pub fn state(&self) -> RunnerState {
        lock(&self.shared).state.clone()
    }

    /// Get current simulation time (seconds)
    pub fn sim_time(&self) -> f64 {
        lock(&self.shared).sim_time
    }

    /// Get current tick count
    pub fn tick_count(&self) -> u64 {
        lock(&self.shared).tick_count
    }

    /// Debug probe readback after the latest tick
    pub fn latest_sample(&self) -> Option<DebugSample> {
        lock(&self.shared).latest_sample.clone()
    }

    /// Get error message if state is Error
    pub fn error_message(&self) -> Option<String> {
        lock(&self.shared).error_message.clone()
    }

    /// Replace the configuration used from the next tick on.
    ///
    /// Rejected configurations leave the current one in place.
    pub fn update_config(&self, config: SimulationConfig) -> Result<(), ConfigError> {
        config.validate_tick()?;
        lock(&self.shared).config = config;
        Ok(())
    }

    /// Pause the simulation
    pub fn pause(&self) {
        let mut state = lock(&self.shared);
        if state.state == RunnerState::Running {
            state.state = RunnerState::Paused;
        }
    }

    /// Resume the simulation
    pub fn resume(&self) {
        let mut state = lock(&self.shared);
        if state.state == RunnerState::Paused {
            state.state = RunnerState::Running;
        }
    }

    /// Start the simulation (transition from Created to Running)
    pub fn start(&self) {
        let mut state = lock(&self.shared);
        if state.state == RunnerState::Created {
            state.state = RunnerState::Running;
        }
    }

    /// Ask the simulation thread to finish after the current tick
    pub fn stop(&self) {
        let mut state = lock(&self.shared);
        if matches!(
            state.state,
            RunnerState::Created | RunnerState::Running | RunnerState::Paused
        ) {
            state.state = RunnerState::Finished;
        }
    }

    /// Wait for the simulation thread to complete
    pub fn join(mut self) -> Result<(), String> {
        if let Some(handle) = self.thread_handle.take() {
            handle.join().map_err(|_| "Thread panicked".to_string())?;
        }
        Ok(())
    }
}

impl Drop for SimulationRunner {
    fn drop(&mut self) {
        // Signal the thread to exit; the driver releases its grids there.
        self.stop();
    }
}

/// Main simulation loop executed in background thread
fn run_simulation_loop<B: ComputeBackend>(
    mut driver: SimulationDriver<B>,
    shared: Arc<Mutex<SharedState>>,
) {
    // Wait for start signal
    loop {
        let state = lock(&shared).state.clone();
        match state {
            RunnerState::Created => thread::sleep(Duration::from_millis(10)),
            RunnerState::Running => break,
            _ => return,
        }
    }

    if let Err(e) = driver.initialize_world() {
        fail(&shared, format!("world initialization failed: {e}"));
        return;
    }

    let start_wall_time = Instant::now();

    loop {
        let (current_state, config) = {
            let guard = lock(&shared);
            (guard.state.clone(), guard.config.clone())
        };

        match current_state {
            RunnerState::Running => {
                if let Err(e) = driver.tick(&config) {
                    fail(&shared, e.to_string());
                    break;
                }

                let sample = if config.debug.enabled {
                    match driver.debug_sample() {
                        Ok(sample) => Some(sample),
                        Err(e) => {
                            tracing::warn!("Debug readback failed: {e}");
                            None
                        }
                    }
                } else {
                    None
                };

                let tick_count = driver.frame_count();
                let sim_time = driver.probe().elapsed();
                {
                    let mut guard = lock(&shared);
                    guard.sim_time = sim_time;
                    guard.tick_count = tick_count;
                    guard.latest_sample = sample;
                }

                if let Some(max_ticks) = config.max_ticks {
                    if tick_count >= max_ticks {
                        tracing::info!("Simulation finished: reached max_ticks = {}", max_ticks);
                        let mut guard = lock(&shared);
                        if guard.state == RunnerState::Running {
                            guard.state = RunnerState::Finished;
                        }
                        break;
                    }
                }

                if tick_count % 100 == 0 {
                    tracing::debug!(
                        "Tick {}: sim_time={:.3}s, wall_time={:.2}s",
                        tick_count,
                        sim_time,
                        start_wall_time.elapsed().as_secs_f64()
                    );
                }
            }
            RunnerState::Paused => thread::sleep(Duration::from_millis(50)),
            RunnerState::Finished | RunnerState::Error | RunnerState::Created => break,
        }
    }

    driver.shutdown();
    tracing::info!(
        "Simulation thread exiting: {} ticks, {:.3}s simulated",
        driver.frame_count(),
        driver.probe().elapsed()
    );
}

fn fail(shared: &Mutex<SharedState>, message: String) {
    tracing::error!("Simulation stopped: {}", message);
    let mut guard = lock(shared);
    guard.state = RunnerState::Error;
    guard.error_message = Some(message);
}
