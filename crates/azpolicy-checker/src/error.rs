use thiserror::Error;

#[derive(Debug, Error)]
pub enum CheckError {
    #[error("driver error: {0}")]
    Driver(#[from] azpolicy_driver::DriverError),

    #[error("suite setup failed: {0}")]
    Setup(String),
}
