use thiserror::Error;

#[derive(Error, Debug)]
pub enum MonitoringError {
    /// A reader or tracker is missing or failed to initialise; callers degrade to absent fields.
    #[error("Collaborator unavailable: {0}")]
    CollaboratorUnavailable(String),
    /// One sampling tick failed; the loop logs it and keeps going.
    #[error("Sample iteration failed: {0}")]
    SampleIteration(String),
    #[error("Failed to launch target command: {0}")]
    ChildLaunch(String),
    #[error("Shutdown timed out: {0}")]
    ShutdownTimeout(String),
    #[error("Invalid configuration: {0}")]
    Configuration(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),
    #[error("Other error: {0}")]
    Other(String),
}
