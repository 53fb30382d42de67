//! Debug probe: frame counter, picked cell and scratch readback.

use kernel::{GridDims, DEBUG_SCRATCH_LEN};
use serde::Serialize;

use crate::config::DebugConfig;

/// Frame counter and picked cell of one simulation.
#[derive(Debug, Clone)]
pub struct DebugProbe {
    enabled: bool,
    pick: [u32; 3],
    frame_count: u64,
    elapsed: f64,
}

/// One decoded readback of the debug scratch buffer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DebugSample {
    /// Frames completed when the sample was taken.
    pub frame: u64,
    /// Simulated seconds, the sum of every completed tick's time step.
    pub elapsed: f64,
    /// Picked cell.
    pub pick: [u32; 3],
    /// Atmosphere cell after the physical process.
    pub atmosphere: [f32; 4],
    /// Velocity after the dynamic process.
    pub velocity: [f32; 3],
    /// Speed (magnitude of `velocity`).
    pub speed: f32,
}

impl DebugProbe {
    /// Probe for `dims`, with the pick cell clamped into the grid.
    pub fn new(config: &DebugConfig, dims: GridDims) -> Self {
        let mut probe = Self {
            enabled: false,
            pick: [0; 3],
            frame_count: 0,
            elapsed: 0.0,
        };
        probe.configure(config, dims);
        probe
    }

    /// Apply the probe settings of a tick's configuration.
    pub fn configure(&mut self, config: &DebugConfig, dims: GridDims) {
        let pick = dims.clamp(config.pick);
        if pick != config.pick {
            tracing::debug!("Debug pick {:?} clamped to {:?}", config.pick, pick);
        }
        self.enabled = config.enabled;
        self.pick = pick;
    }

    /// Count one completed tick of `delta_time` seconds.
    pub fn advance(&mut self, delta_time: f32) {
        self.frame_count += 1;
        self.elapsed += f64::from(delta_time);
    }

    /// Whether the kernels write the picked cell into the scratch buffer.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Picked cell, always inside the grid.
    pub fn pick(&self) -> [u32; 3] {
        self.pick
    }

    /// Ticks completed so far.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Simulated seconds so far.
    pub fn elapsed(&self) -> f64 {
        self.elapsed
    }

    /// Decode a scratch readback. Short readbacks are zero-padded.
    pub fn sample(&self, scratch: &[f32]) -> DebugSample {
        let mut values = [0.0f32; DEBUG_SCRATCH_LEN];
        for (dst, src) in values.iter_mut().zip(scratch) {
            *dst = *src;
        }

        DebugSample {
            frame: self.frame_count,
            elapsed: self.elapsed,
            pick: self.pick,
            atmosphere: [values[0], values[1], values[2], values[3]],
            velocity: [values[4], values[5], values[6]],
            speed: values[7],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dims() -> GridDims {
        GridDims::from_requested(16, 8, 4).unwrap()
    }

    #[test]
    fn test_pick_is_clamped() {
        let config = DebugConfig {
            enabled: true,
            pick: [20, 3, 9],
        };
        let probe = DebugProbe::new(&config, dims());
        assert_eq!(probe.pick(), [15, 3, 3]);
        assert!(probe.enabled());
    }

    #[test]
    fn test_advance_counts_frames_and_time() {
        let mut probe = DebugProbe::new(&DebugConfig::default(), dims());
        for _ in 0..4 {
            probe.advance(0.25);
        }
        assert_eq!(probe.frame_count(), 4);
        assert!((probe.elapsed() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_sample_layout() {
        let mut probe = DebugProbe::new(&DebugConfig::default(), dims());
        probe.advance(0.5);
        let sample = probe.sample(&[290.0, 0.1, 0.0, 0.0, 3.0, 4.0, 0.0, 5.0]);
        assert_eq!(sample.frame, 1);
        assert_eq!(sample.atmosphere, [290.0, 0.1, 0.0, 0.0]);
        assert_eq!(sample.velocity, [3.0, 4.0, 0.0]);
        assert_eq!(sample.speed, 5.0);
    }

    #[test]
    fn test_short_scratch_is_padded() {
        let probe = DebugProbe::new(&DebugConfig::default(), dims());
        let sample = probe.sample(&[1.0, 2.0]);
        assert_eq!(sample.atmosphere, [1.0, 2.0, 0.0, 0.0]);
        assert_eq!(sample.speed, 0.0);
    }
}
