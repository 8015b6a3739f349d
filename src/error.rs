use thiserror::Error;

/// Custom error type for hydra operations
#[derive(Debug, Error)]
pub enum HydraError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// Topology or selection is malformed
    #[error("Configuration error: {0}")]
    Config(String),
    /// A dependency names a setting missing from the selected mode
    #[error("Missing configuration on {service}.{mode}.config.{setting}")]
    Configuration {
        service: String,
        mode: String,
        setting: String,
    },
    /// A template placeholder has neither an environment value nor a default
    #[error("Missing env variable: {0}")]
    Environment(String),
    /// Service not present in the topology
    #[error("Service '{0}' not found")]
    ServiceNotFound(String),
    /// Mode not declared by the service
    #[error("Mode '{mode}' not found for service '{service}'")]
    ModeNotFound { service: String, mode: String },
    /// Dependency reference not shaped `service.setting`
    #[error("Invalid dependency reference: '{0}' (expected 'service.setting')")]
    InvalidReference(String),
    /// Process start error
    #[error("Failed to start process '{0}': {1}")]
    ProcessStart(String, String), // command, error message
    /// Process stop error
    #[error("Failed to stop process: {0}")]
    ProcessStop(String),
    /// Process table could not be read
    #[error("Process table error: {0}")]
    ProcessTable(String),
}

/// Result type alias for hydra operations
pub type Result<T> = std::result::Result<T, HydraError>;
