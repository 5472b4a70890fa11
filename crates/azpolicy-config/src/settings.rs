use tracing::debug;

use crate::error::ConfigError;

pub const SUBSCRIPTION_ID_VAR: &str = "AZURE_SUBSCRIPTION_ID";
pub const KEEP_RESOURCE_VAR: &str = "KEEP_RESOURCE";
pub const TENANT_ID_VAR: &str = "AZURE_TENANT_ID";
pub const CLIENT_ID_VAR: &str = "AZURE_CLIENT_ID";
pub const CLIENT_SECRET_VAR: &str = "AZURE_CLIENT_SECRET";
pub const IDENTITY_ENDPOINT_VAR: &str = "IDENTITY_ENDPOINT";

/// Process-level settings read once from the environment at startup.
#[derive(Clone)]
pub struct Settings {
    pub subscription_id:   String,
    /// `KEEP_RESOURCE` set and non-empty: leave the resource group behind.
    pub keep_resource:     bool,
    pub tenant_id:         Option<String>,
    pub client_id:         Option<String>,
    pub client_secret:     Option<String>,
    /// Running somewhere that exposes a managed identity endpoint.
    pub managed_identity:  bool,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("subscription_id", &self.subscription_id)
            .field("keep_resource", &self.keep_resource)
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("managed_identity", &self.managed_identity)
            .finish()
    }
}

impl Settings {
    /// Build settings from an arbitrary variable lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let subscription_id = get(SUBSCRIPTION_ID_VAR)
            .ok_or(ConfigError::MissingVar(SUBSCRIPTION_ID_VAR))?;

        let settings = Self {
            subscription_id,
            keep_resource:    get(KEEP_RESOURCE_VAR).is_some(),
            tenant_id:        get(TENANT_ID_VAR),
            client_id:        get(CLIENT_ID_VAR),
            client_secret:    get(CLIENT_SECRET_VAR),
            managed_identity: get(IDENTITY_ENDPOINT_VAR).is_some(),
        };
        debug!(?settings, "Loaded settings");
        Ok(settings)
    }
}
