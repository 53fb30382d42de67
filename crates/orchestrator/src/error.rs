//! Errors raised while configuring or driving a simulation.

use kernel::KernelError;

/// Configuration could not be loaded or is unusable.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path that was read.
        path: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid configuration JSON.
    #[error("failed to parse config JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl From<KernelError> for ConfigError {
    fn from(e: KernelError) -> Self {
        match e {
            KernelError::InvalidParams(message) => ConfigError::Invalid(message),
            other => ConfigError::Invalid(other.to_string()),
        }
    }
}

/// Failure of a [`SimulationDriver`](crate::SimulationDriver) operation.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// Kernel resolution, buffer management or submission failed.
    #[error(transparent)]
    Kernel(#[from] KernelError),

    /// The configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// `tick` was called before `initialize_world`.
    #[error("world has not been initialized")]
    WorldNotInitialized,

    /// The driver has released its resources.
    #[error("simulation has been shut down")]
    ShutDown,
}
