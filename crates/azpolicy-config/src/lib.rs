mod raw;
mod loader;
mod settings;
pub mod error;

pub use loader::{default_matrix, load_matrix, parse_matrix, DEFAULT_NETWORK_REGION};
pub use settings::{
    Settings, CLIENT_ID_VAR, CLIENT_SECRET_VAR, IDENTITY_ENDPOINT_VAR, KEEP_RESOURCE_VAR,
    SUBSCRIPTION_ID_VAR, TENANT_ID_VAR,
};
pub use error::ConfigError;
