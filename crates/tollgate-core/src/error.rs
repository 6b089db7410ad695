use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid rate-limit configuration: {field} {reason}")]
    InvalidConfig { field: &'static str, reason: String },
}

impl Error {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
