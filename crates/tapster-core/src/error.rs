use thiserror::Error;

#[derive(Debug, Error)]
pub enum TapsterError {
    #[error("Configuration error: {0}")]
    Config(String),
}

impl TapsterError {
    /// Short error code, used in operator-facing output.
    pub fn code(&self) -> &'static str {
        match self {
            TapsterError::Config(_) => "CONFIG_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, TapsterError>;
