pub mod error;
pub mod types;
mod tests;

pub use error::DomainError;
pub use types::*;
