//! Headless simulation runner
//!
//! Usage: `atmo-sim [CONFIG]` (defaults to `configs/default.json`).
//! Runs until `max_ticks` is reached or the simulation fails, logging
//! progress and the debug probe once per second.

use std::thread;
use std::time::Duration;

use orchestrator::{create_simulation, RunnerState};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "atmo_sim=info,orchestrator=info,kernel=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "configs/default.json".to_string());

    let runner = match create_simulation(&config_path) {
        Ok(runner) => runner,
        Err(e) => {
            tracing::error!("Failed to create simulation: {e}");
            std::process::exit(1);
        }
    };

    runner.start();
    loop {
        thread::sleep(Duration::from_secs(1));
        match runner.state() {
            RunnerState::Finished => break,
            RunnerState::Error => {
                tracing::error!(
                    "Simulation failed: {}",
                    runner.error_message().unwrap_or_default()
                );
                std::process::exit(1);
            }
            _ => {}
        }

        tracing::info!(
            "tick {} t={:.2}s",
            runner.tick_count(),
            runner.sim_time()
        );
        if let Some(sample) = runner.latest_sample() {
            tracing::info!(
                "probe {:?}: T={:.2} K q={:.4} v=({:.3}, {:.3}, {:.3}) |v|={:.3}",
                sample.pick,
                sample.atmosphere[0],
                sample.atmosphere[1],
                sample.velocity[0],
                sample.velocity[1],
                sample.velocity[2],
                sample.speed
            );
        }
    }

    tracing::info!(
        "Finished after {} ticks ({:.2}s simulated)",
        runner.tick_count(),
        runner.sim_time()
    );
    if let Err(e) = runner.join() {
        tracing::error!("{e}");
        std::process::exit(1);
    }
}
