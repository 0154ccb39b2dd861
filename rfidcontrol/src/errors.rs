use thiserror::Error;

#[derive(Error, Debug)]
pub enum ControlError {
    #[error("Hardware I/O error on {0}: {1}")]
    HardwareIo(String, String),
    #[error("{0} timed out")]
    Timeout(String),
    #[error("Device {0} is not registered")]
    DeviceNotFound(String),
    #[error("Device {0} is unreachable: {1}")]
    DeviceUnreachable(String, String),
    #[error("Invalid {0}: {1}")]
    Validation(String, String),
    #[error("No cast session is open")]
    NoSession,
    #[error("Cast protocol error: {0}")]
    Protocol(String),
    #[error("Cast link to {0} is closed")]
    Disconnected(String),
    #[error("Registry error: {0}")]
    Registry(String),
    #[error("{0} cancelled")]
    Cancelled(String),
}

impl ControlError {
    pub fn hardware_io(resource: &str, err: impl std::fmt::Display) -> Self {
        ControlError::HardwareIo(resource.to_string(), err.to_string())
    }

    pub fn timeout(operation: &str) -> Self {
        ControlError::Timeout(operation.to_string())
    }

    pub fn device_not_found(name: &str) -> Self {
        ControlError::DeviceNotFound(name.to_string())
    }

    pub fn device_unreachable(name: &str, err: impl std::fmt::Display) -> Self {
        ControlError::DeviceUnreachable(name.to_string(), err.to_string())
    }

    pub fn validation(what: &str, detail: impl std::fmt::Display) -> Self {
        ControlError::Validation(what.to_string(), detail.to_string())
    }

    pub fn protocol(message: impl std::fmt::Display) -> Self {
        ControlError::Protocol(message.to_string())
    }

    pub fn registry(err: impl std::fmt::Display) -> Self {
        ControlError::Registry(err.to_string())
    }

    pub fn cancelled(operation: &str) -> Self {
        ControlError::Cancelled(operation.to_string())
    }

    /// True for the errors that should trigger a fresh discovery sweep.
    pub fn needs_discovery(&self) -> bool {
        matches!(
            self,
            ControlError::DeviceNotFound(_) | ControlError::DeviceUnreachable(_, _)
        )
    }
}

pub type Result<T> = std::result::Result<T, ControlError>;
