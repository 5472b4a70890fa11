use serde::{Deserialize, Serialize};

/// Raw YAML representation of an expectation matrix file.
#[derive(Debug, Deserialize, Serialize)]
pub struct RawMatrix {
    /// Region the network suite deploys into. Defaults to `Switzerland West`.
    pub network_region: Option<String>,
    #[serde(default)]
    pub regions: Vec<RawRegionCase>,
    #[serde(default)]
    pub security_groups: Vec<RawNetworkCase>,
    #[serde(default)]
    pub security_rules: Vec<RawNetworkCase>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RawRegionCase {
    pub region: String,
    /// "allow" or "deny".
    pub expect: String,
    /// Policy assignment name; required when `expect` is "deny".
    pub policy: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RawNetworkCase {
    pub source_prefix: String,
    /// Destination port range. YAML authors write bare numbers, so accept both.
    pub port: RawPort,
    pub expect: String,
    pub policy: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RawPort {
    Number(u16),
    Text(String),
}

impl RawPort {
    pub fn into_string(self) -> String {
        match self {
            RawPort::Number(n) => n.to_string(),
            RawPort::Text(s)   => s,
        }
    }
}
