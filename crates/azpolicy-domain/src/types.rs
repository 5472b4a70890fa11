use serde::{Deserialize, Serialize};

use crate::error::DomainError;

// ── Azure context ─────────────────────────────────────────────────────────────

/// Where every check runs: one subscription, one resource group, one NSG.
/// Read-only once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AzureContext {
    pub subscription_id:     String,
    pub resource_group_name: String,
    pub security_group_name: String,
}

impl AzureContext {
    pub fn new(
        subscription_id: impl Into<String>,
        resource_group_name: impl Into<String>,
        security_group_name: impl Into<String>,
    ) -> Result<Self, DomainError> {
        let ctx = Self {
            subscription_id:     subscription_id.into(),
            resource_group_name: resource_group_name.into(),
            security_group_name: security_group_name.into(),
        };
        if ctx.subscription_id.trim().is_empty() {
            return Err(DomainError::InvalidConfig("subscription id is empty".into()));
        }
        if ctx.resource_group_name.is_empty() {
            return Err(DomainError::InvalidResourceName("resource group name is empty".into()));
        }
        if ctx.security_group_name.is_empty() {
            return Err(DomainError::InvalidResourceName("security group name is empty".into()));
        }
        Ok(ctx)
    }

    /// Build a context whose resource names are unique to one run:
    /// `{base}-{run_id}` for both the resource group and the NSG.
    pub fn for_run(
        subscription_id: impl Into<String>,
        base_name: &str,
        run_id: &str,
    ) -> Result<Self, DomainError> {
        let rg  = run_scoped_name(base_name, run_id, RESOURCE_GROUP_NAME_MAX);
        let nsg = run_scoped_name(base_name, run_id, SECURITY_GROUP_NAME_MAX);
        Self::new(subscription_id, rg, nsg)
    }
}

pub const RESOURCE_GROUP_NAME_MAX: usize = 90;
pub const SECURITY_GROUP_NAME_MAX: usize = 80;

/// Map a raw string onto the character set ARM accepts for resource group and
/// NSG names: letters, digits, `_`, `-`, `.`, `(`, `)`, never ending in `.`.
pub fn sanitize_resource_name(raw: &str, max_len: usize) -> String {
    let mut out = String::with_capacity(raw.len().min(max_len));
    for c in raw.chars() {
        if out.len() == max_len {
            break;
        }
        if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '(' | ')') {
            out.push(c);
        } else if !out.is_empty() && !out.ends_with('-') {
            out.push('-');
        }
    }
    while out.ends_with('.') {
        out.pop();
    }
    out
}

/// `{base}-{run_id}` within `max_len`. The base is shortened, never the run id.
fn run_scoped_name(base_name: &str, run_id: &str, max_len: usize) -> String {
    let suffix = sanitize_resource_name(run_id, max_len);
    if suffix.is_empty() {
        return sanitize_resource_name(base_name, max_len);
    }
    let base = sanitize_resource_name(base_name, max_len.saturating_sub(suffix.len() + 1));
    if base.is_empty() {
        suffix
    } else {
        format!("{}-{}", base, suffix)
    }
}

/// Canonical ARM location name: `"West US 2"` → `"westus2"`.
pub fn normalize_region(region: &str) -> String {
    region
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

// ── Security rule descriptor ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
    Any,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Tcp  => write!(f, "Tcp"),
            Protocol::Udp  => write!(f, "Udp"),
            Protocol::Icmp => write!(f, "Icmp"),
            Protocol::Any  => write!(f, "*"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    Allow,
    Deny,
}

impl std::fmt::Display for Access {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Access::Allow => write!(f, "Allow"),
            Access::Deny  => write!(f, "Deny"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Inbound  => write!(f, "Inbound"),
            Direction::Outbound => write!(f, "Outbound"),
        }
    }
}

/// A single NSG rule as submitted to ARM. Built per call, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityRuleSpec {
    pub name:                       String,
    pub protocol:                   Protocol,
    pub source_address_prefix:      String,
    pub source_port_range:          String,
    pub destination_address_prefix: String,
    pub destination_port_range:     String,
    pub access:                     Access,
    pub direction:                  Direction,
    pub priority:                   i32,
}

pub const DEFAULT_RULE_NAME: &str = "allow_ssh";
pub const DEFAULT_RULE_PRIORITY: i32 = 100;

impl SecurityRuleSpec {
    /// The inbound TCP allow rule every network check submits; only the source
    /// prefix and the destination port vary.
    pub fn inbound_allow(source_address_prefix: &str, destination_port_range: &str) -> Self {
        Self {
            name:                       DEFAULT_RULE_NAME.into(),
            protocol:                   Protocol::Tcp,
            source_address_prefix:      source_address_prefix.into(),
            source_port_range:          "1-65535".into(),
            destination_address_prefix: "0.0.0.0/0".into(),
            destination_port_range:     destination_port_range.into(),
            access:                     Access::Allow,
            direction:                  Direction::Inbound,
            priority:                   DEFAULT_RULE_PRIORITY,
        }
    }
}

// ── Resources returned by ARM ─────────────────────────────────────────────────
//
// Only the fields the checks look at; anything else ARM returns is ignored.

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisioningProperties {
    #[serde(default)]
    pub provisioning_state: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceGroup {
    #[serde(default)]
    pub id:         String,
    #[serde(default)]
    pub name:       String,
    #[serde(default)]
    pub location:   String,
    #[serde(default)]
    pub properties: ProvisioningProperties,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityRuleProperties {
    #[serde(default)]
    pub provisioning_state:     Option<String>,
    #[serde(default)]
    pub protocol:               Option<String>,
    #[serde(default)]
    pub source_address_prefix:  Option<String>,
    #[serde(default)]
    pub destination_port_range: Option<String>,
    #[serde(default)]
    pub access:                 Option<String>,
    #[serde(default)]
    pub direction:              Option<String>,
    #[serde(default)]
    pub priority:               Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityRule {
    #[serde(default)]
    pub id:         String,
    #[serde(default)]
    pub name:       String,
    #[serde(default)]
    pub properties: SecurityRuleProperties,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityGroupProperties {
    #[serde(default)]
    pub provisioning_state: Option<String>,
    #[serde(default)]
    pub security_rules:     Vec<SecurityRule>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroup {
    #[serde(default)]
    pub id:         String,
    #[serde(default)]
    pub name:       String,
    #[serde(default)]
    pub location:   String,
    #[serde(default)]
    pub properties: SecurityGroupProperties,
}

// ── Expectation matrix ────────────────────────────────────────────────────────

/// What a check expects ARM to do with a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "expect", rename_all = "lowercase")]
pub enum Expectation {
    Allow,
    /// Denied, and the first implicated policy assignment must be `policy`.
    Deny { policy: String },
}

impl Expectation {
    pub fn deny(policy: impl Into<String>) -> Self {
        Expectation::Deny { policy: policy.into() }
    }

    pub fn should_error(&self) -> bool {
        matches!(self, Expectation::Deny { .. })
    }
}

impl std::fmt::Display for Expectation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expectation::Allow           => write!(f, "allow"),
            Expectation::Deny { policy } => write!(f, "deny ({})", policy),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionCase {
    pub region: String,
    pub expect: Expectation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkCase {
    pub source_prefix: String,
    pub port:          String,
    pub expect:        Expectation,
}

impl NetworkCase {
    pub fn rule(&self) -> SecurityRuleSpec {
        SecurityRuleSpec::inbound_allow(&self.source_prefix, &self.port)
    }
}

/// The full table of checks for one policy baseline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectationMatrix {
    pub regions:         Vec<RegionCase>,
    /// Region the network suite provisions its resource group in.
    pub network_region:  String,
    pub security_groups: Vec<NetworkCase>,
    pub security_rules:  Vec<NetworkCase>,
}
