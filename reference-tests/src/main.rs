//! Reference test binary entry point
//!
//! Runs every reference scenario on the GPU and prints a summary. With
//! `--plan`, runs each scenario for one tick on the recording backend and
//! prints the dispatch schedule instead; no adapter is needed.
//!
//! An optional positional argument overrides the configuration directory.

use std::path::PathBuf;

use reference_tests::{all_tests, default_config_dir};

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .init();

    let mut plan_only = false;
    let mut config_dir = default_config_dir();
    for arg in std::env::args().skip(1) {
        if arg == "--plan" {
            plan_only = true;
        } else {
            config_dir = PathBuf::from(arg);
        }
    }

    tracing::info!("Atmosphere Reference Test Suite");
    tracing::info!("===============================");

    let tests = all_tests(&config_dir);
    tracing::info!("Found {} reference tests in {}", tests.len(), config_dir.display());

    if plan_only {
        let mut failed = false;
        for test in &tests {
            match test.plan() {
                Ok(schedule) => {
                    println!("\n{} ({} dispatches)", test.name, schedule.len());
                    for (i, kernel) in schedule.iter().enumerate() {
                        println!("  {:>3}  {}", i, kernel);
                    }
                }
                Err(e) => {
                    eprintln!("\nERROR planning test {}: {}", test.name, e);
                    failed = true;
                }
            }
        }
        if failed {
            std::process::exit(1);
        }
        return;
    }

    run_all(tests);
}

#[cfg(feature = "gpu")]
fn run_all(tests: Vec<reference_tests::ReferenceTest>) {
    if !kernel::gpu_available() {
        eprintln!("\nERROR: no GPU adapter available; use --plan for a dry run");
        std::process::exit(1);
    }

    let mut passed_count = 0;
    let mut failed_count = 0;

    for test in tests {
        let backend = match kernel::WgpuBackend::new() {
            Ok(backend) => backend,
            Err(e) => {
                eprintln!("\nERROR creating GPU backend for {}: {e}", test.name);
                failed_count += 1;
                continue;
            }
        };

        match test.run(backend) {
            Ok(result) => {
                if result.passed {
                    passed_count += 1;
                } else {
                    failed_count += 1;
                }
                result.print_summary();
            }
            Err(e) => {
                eprintln!("\nERROR running test {}: {}", test.name, e);
                failed_count += 1;
            }
        }
    }

    // Print overall summary
    println!("\n{}", "=".repeat(80));
    println!("OVERALL SUMMARY");
    println!("{}", "=".repeat(80));
    println!("Total tests: {}", passed_count + failed_count);
    println!("Passed: {}", passed_count);
    println!("Failed: {}", failed_count);
    println!("{}", "=".repeat(80));

    // Exit with error code if any tests failed
    if failed_count > 0 {
        std::process::exit(1);
    }
}

#[cfg(not(feature = "gpu"))]
fn run_all(_tests: Vec<reference_tests::ReferenceTest>) {
    eprintln!("Built without the 'gpu' feature; only --plan is available");
    std::process::exit(1);
}
