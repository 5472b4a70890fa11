use thiserror::Error;

use crate::arm_error::AzureError;

#[derive(Debug, Error)]
pub enum DriverError {
    /// ARM rejected the request and said why. Policy denials land here.
    #[error("{0}")]
    Arm(AzureError),

    #[error("could not decode ARM error response: {0}")]
    Decode(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("unexpected ARM response: {0}")]
    UnexpectedResponse(String),

    #[error("operation timed out: {0}")]
    Timeout(String),
}

impl DriverError {
    /// The decoded ARM error, if the request got that far.
    pub fn as_azure_error(&self) -> Option<&AzureError> {
        match self {
            DriverError::Arm(e) => Some(e),
            _ => None,
        }
    }

    /// Anything but a decoded ARM error means the run cannot continue.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, DriverError::Arm(_))
    }
}

impl From<AzureError> for DriverError {
    fn from(e: AzureError) -> Self {
        DriverError::Arm(e)
    }
}
