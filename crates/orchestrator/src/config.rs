//! Configuration parsing and validation for atmosphere simulations

use serde::{Deserialize, Serialize};
use std::fs;

use kernel::{ClimateParams, FluidParams, GridDims, ObstacleParams, WorldParams};

use crate::error::ConfigError;

/// Main simulation configuration
///
/// Supplied once at startup and again on every tick. Grid extents and
/// obstacles only take effect at startup; every other group may change
/// between ticks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Human-readable simulation name
    #[serde(default = "default_name")]
    pub name: String,
    /// Requested grid extents (rounded up to powers of two)
    #[serde(default)]
    pub grid: GridConfig,
    /// Time step, spacing, gravity, rotation
    #[serde(default)]
    pub world: WorldParams,
    /// Reference temperature profile
    #[serde(default)]
    pub climate: ClimateParams,
    /// Fluid solver parameters
    #[serde(default)]
    pub fluid: FluidParams,
    /// Obstacle mask description
    #[serde(default)]
    pub obstacles: ObstacleParams,
    /// Debug probe
    #[serde(default)]
    pub debug: DebugConfig,
    /// Run the fluid stage after the atmosphere stage
    #[serde(default = "default_use_fluid")]
    pub use_fluid: bool,
    /// Stop after this many ticks
    #[serde(default)]
    pub max_ticks: Option<u64>,
}

/// Requested grid extents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridConfig {
    /// X extent
    #[serde(default = "default_extent")]
    pub width: u32,
    /// Y extent
    #[serde(default = "default_extent")]
    pub height: u32,
    /// Z (vertical) extent
    #[serde(default = "default_extent")]
    pub depth: u32,
}

impl GridConfig {
    /// Realized extents, each rounded up to a power of two
    pub fn dims(&self) -> Result<GridDims, ConfigError> {
        Ok(GridDims::from_requested(self.width, self.height, self.depth)?)
    }
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            width: default_extent(),
            height: default_extent(),
            depth: default_extent(),
        }
    }
}

/// Debug probe configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugConfig {
    /// Write the picked cell into the debug scratch buffer each tick
    #[serde(default)]
    pub enabled: bool,
    /// Picked cell; clamped into the grid
    #[serde(default)]
    pub pick: [u32; 3],
}

fn default_name() -> String {
    "atmosphere".to_string()
}

fn default_extent() -> u32 {
    128
}

fn default_use_fluid() -> bool {
    true
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            grid: GridConfig::default(),
            world: WorldParams::default(),
            climate: ClimateParams::default(),
            fluid: FluidParams::default(),
            obstacles: ObstacleParams::default(),
            debug: DebugConfig::default(),
            use_fluid: default_use_fluid(),
            max_ticks: None,
        }
    }
}

impl SimulationConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_string(),
            source,
        })?;

        let config: SimulationConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration, including startup-only settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        let dims = self.grid.dims()?;
        self.obstacles.validate(dims)?;
        self.validate_tick()?;

        if self.max_ticks == Some(0) {
            return Err(ConfigError::Invalid("max_ticks must be at least 1".to_string()));
        }

        Ok(())
    }

    /// Validate the groups read on every tick
    ///
    /// Zero or non-finite grid spacing is rejected here, before any inverse
    /// spacing is computed.
    pub fn validate_tick(&self) -> Result<(), ConfigError> {
        self.world.validate()?;
        self.climate.validate()?;
        self.fluid.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel::{Axis, GroundPlane};

    #[test]
    fn test_defaults() {
        let config = SimulationConfig::default();
        assert_eq!(config.grid.dims().unwrap().as_array(), [128, 128, 128]);
        assert_eq!(config.world.delta_time, 0.016);
        assert_eq!(config.fluid.iterations, 10);
        assert!(config.use_fluid);
        assert!(!config.fluid.vorticity_confinement);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_json_uses_defaults() {
        let config: SimulationConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, SimulationConfig::default());
    }

    #[test]
    fn test_shipped_default_config_matches_defaults() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../../configs/default.json");
        let config = SimulationConfig::load(path).unwrap();
        assert_eq!(config, SimulationConfig::default());
    }

    #[test]
    fn test_partial_json() {
        let json = r#"{
            "name": "small",
            "grid": { "width": 100, "height": 64, "depth": 30 },
            "world": { "grid_spacing_km": [5.0, 5.0, 0.25] },
            "fluid": { "iterations": 20, "vorticity_confinement": true },
            "use_fluid": false,
            "max_ticks": 50
        }"#;
        let config: SimulationConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.name, "small");
        assert_eq!(config.grid.dims().unwrap().as_array(), [128, 64, 32]);
        assert_eq!(config.world.grid_spacing_km, [5.0, 5.0, 0.25]);
        assert_eq!(config.world.delta_time, 0.016);
        assert_eq!(config.fluid.iterations, 20);
        assert!(config.fluid.vorticity_confinement);
        assert!(!config.use_fluid);
        assert_eq!(config.max_ticks, Some(50));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_zero_extent() {
        let mut config = SimulationConfig::default();
        config.grid.depth = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validation_zero_spacing() {
        let mut config = SimulationConfig::default();
        config.world.grid_spacing_km = [10.0, 10.0, 0.0];
        let err = config.validate_tick().unwrap_err();
        assert!(err.to_string().contains("grid spacing along z"));
    }

    #[test]
    fn test_validation_dissipation() {
        let mut config = SimulationConfig::default();
        config.fluid.density_dissipation = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_ground_plane_uses_realized_extent() {
        let mut config = SimulationConfig::default();
        config.grid.depth = 100;
        // 100 rounds up to 128, so index 120 is inside the grid.
        config.obstacles.ground_plane = Some(GroundPlane {
            axis: Axis::Z,
            index: 120,
        });
        assert!(config.validate().is_ok());

        config.obstacles.ground_plane = Some(GroundPlane {
            axis: Axis::Z,
            index: 128,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_max_ticks() {
        let config = SimulationConfig {
            max_ticks: Some(0),
            ..SimulationConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let err = SimulationConfig::load("/nonexistent/config.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_load_round_trip_through_file() {
        let config = SimulationConfig {
            name: "file".to_string(),
            max_ticks: Some(3),
            ..SimulationConfig::default()
        };
        let path = std::env::temp_dir().join(format!("atmo-config-{}.json", std::process::id()));
        fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();

        let loaded = SimulationConfig::load(path.to_str().unwrap()).unwrap();
        fs::remove_file(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
