use st_core::SettingsError;

/// Failure reported by a browser collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct HostError {
    message: String,
}

impl HostError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Error type for coordinator operations with a waiting caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error("No tab ID")]
    NoTab,
    #[error("Extension is disabled")]
    Disabled,
    #[error(transparent)]
    Host(#[from] HostError),
}
