use thiserror::Error;

/// A result type for latent GP surrogate operations
pub type Result<T> = std::result::Result<T, RomGprError>;

/// An error raised by the [`GprRom`](crate::GprRom) surrogate or one of its models
#[derive(Error, Debug)]
pub enum RomGprError {
    /// When the snapshot matrix and the design parameter matrix disagree in size
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    /// When an unknown scaling scheme name is requested
    #[error("Unsupported scaling scheme: '{0}'")]
    UnsupportedScalingScheme(String),
    /// When a latent mode carries zero energy and cannot be normalized
    #[error("Degenerate latent mode: {0}")]
    DegenerateModeError(String),
    /// When predict or update is called before fit
    #[error("Model not fitted: {0}")]
    ModelNotFittedError(String),
    /// When the marginal likelihood computation fails
    #[error("Likelihood computation error: {0}")]
    LikelihoodComputationError(String),
    /// When linear algebra computation fails
    #[error(transparent)]
    LinalgError(#[from] linfa_linalg::LinalgError),
    /// When an error is due to a bad value
    #[error("InvalidValue error: {0}")]
    InvalidValueError(String),
}
