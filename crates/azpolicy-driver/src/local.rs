use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use azpolicy_domain::{
    normalize_region, AzureContext, ProvisioningProperties, ResourceGroup, SecurityGroup,
    SecurityGroupProperties, SecurityRule, SecurityRuleProperties, SecurityRuleSpec,
};
use tokio::sync::Mutex;
use tracing::debug;

use crate::arm_error::AzureError;
use crate::driver::Driver;
use crate::error::DriverError;

/// Source prefixes that mean "anywhere" to the network policies.
const ANY_SOURCES: &[&str] = &["*", "any", "internet", "0.0.0.0/0"];

/// A deny assignment on rules that admit any source on `port`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortPolicy {
    pub port:       String,
    pub assignment: String,
}

impl PortPolicy {
    pub fn new(port: &str, assignment: &str) -> Self {
        Self { port: port.into(), assignment: assignment.into() }
    }
}

/// The organizational policy assignments [`LocalDriver`] enforces.
#[derive(Debug, Clone, Default)]
pub struct SimulatedPolicies {
    /// Normalized region → assignment that denies it.
    pub denied_regions:  HashMap<String, String>,
    /// Checked when an NSG is created with inline rules.
    pub security_groups: Vec<PortPolicy>,
    /// Checked when a rule is added to an existing NSG.
    pub security_rules:  Vec<PortPolicy>,
}

impl SimulatedPolicies {
    /// The baseline: no deployments in Brazil Southeast, and no rule opening
    /// everything, SSH or RDP to any source.
    pub fn baseline() -> Self {
        let mut denied_regions = HashMap::new();
        denied_regions.insert(normalize_region("Brazil Southeast"), "denied regions".to_string());
        Self {
            denied_regions,
            security_groups: vec![
                PortPolicy::new("*", "nsg deny any any rule"),
                PortPolicy::new("22", "nsg deny any ssh rule"),
                PortPolicy::new("3389", "nsg deny any rdp rule"),
            ],
            security_rules: vec![
                PortPolicy::new("*", "nsr deny any any rule"),
                PortPolicy::new("22", "nsr deny any ssh rule"),
                PortPolicy::new("3389", "nsr deny any rdp rule"),
            ],
        }
    }

    pub fn deny_region(mut self, region: &str, assignment: &str) -> Self {
        self.denied_regions.insert(normalize_region(region), assignment.to_string());
        self
    }

    fn region_denial(&self, region: &str) -> Option<&str> {
        self.denied_regions.get(&normalize_region(region)).map(String::as_str)
    }

    fn rule_denial<'a>(policies: &'a [PortPolicy], rule: &SecurityRuleSpec) -> Option<&'a str> {
        let source = rule.source_address_prefix.to_ascii_lowercase();
        if !ANY_SOURCES.contains(&source.as_str()) {
            return None;
        }
        policies
            .iter()
            .find(|p| p.port == rule.destination_port_range)
            .map(|p| p.assignment.as_str())
    }
}

#[derive(Debug, Default)]
struct LocalState {
    /// Resource group name → location.
    groups: HashMap<String, String>,
    /// (resource group, NSG) pairs that exist.
    security_groups: HashSet<(String, String)>,
}

/// A driver that answers from memory while enforcing [`SimulatedPolicies`].
///
/// - Denied requests fail with the same `RequestDisallowedByPolicy` error ARM
///   produces, so callers cannot tell the two apart.
/// - Creating inside a missing resource group or NSG fails the way ARM does.
/// - Performs no I/O.
#[derive(Debug, Default)]
pub struct LocalDriver {
    policies: SimulatedPolicies,
    state:    Mutex<LocalState>,
}

impl LocalDriver {
    pub fn new(policies: SimulatedPolicies) -> Self {
        Self { policies, state: Mutex::new(LocalState::default()) }
    }

    fn group_id(ctx: &AzureContext) -> String {
        format!("/subscriptions/{}/resourceGroups/{}", ctx.subscription_id, ctx.resource_group_name)
    }

    fn security_group_id(ctx: &AzureContext) -> String {
        format!(
            "{}/providers/Microsoft.Network/networkSecurityGroups/{}",
            Self::group_id(ctx),
            ctx.security_group_name
        )
    }

    fn not_found(code: &str, target: &str) -> DriverError {
        DriverError::Arm(AzureError {
            code:    code.into(),
            target:  target.into(),
            message: format!("Resource '{}' could not be found.", target),
            additional_info: Vec::new(),
        })
    }
}

fn rule_resource(id: String, rule: &SecurityRuleSpec) -> SecurityRule {
    SecurityRule {
        id,
        name: rule.name.clone(),
        properties: SecurityRuleProperties {
            provisioning_state:     Some("Succeeded".into()),
            protocol:               Some(rule.protocol.to_string()),
            source_address_prefix:  Some(rule.source_address_prefix.clone()),
            destination_port_range: Some(rule.destination_port_range.clone()),
            access:                 Some(rule.access.to_string()),
            direction:              Some(rule.direction.to_string()),
            priority:               Some(rule.priority),
        },
    }
}

#[async_trait]
impl Driver for LocalDriver {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn create_resource_group(
        &self,
        ctx: &AzureContext,
        region: &str,
    ) -> Result<ResourceGroup, DriverError> {
        debug!(resource_group = %ctx.resource_group_name, region, "LocalDriver: create_resource_group");
        if let Some(assignment) = self.policies.region_denial(region) {
            return Err(AzureError::policy_denial(&ctx.resource_group_name, assignment).into());
        }

        let location = normalize_region(region);
        let mut state = self.state.lock().await;
        if let Some(existing) = state.groups.get(&ctx.resource_group_name) {
            if *existing != location {
                return Err(DriverError::Arm(AzureError {
                    code:    "InvalidResourceGroupLocation".into(),
                    target:  ctx.resource_group_name.clone(),
                    message: format!(
                        "Invalid resource group location '{}'. The Resource group already exists in location '{}'.",
                        location, existing
                    ),
                    additional_info: Vec::new(),
                }));
            }
        }
        state
            .groups
            .insert(ctx.resource_group_name.clone(), location.clone());

        Ok(ResourceGroup {
            id:         Self::group_id(ctx),
            name:       ctx.resource_group_name.clone(),
            location,
            properties: ProvisioningProperties { provisioning_state: Some("Succeeded".into()) },
        })
    }

    async fn create_network_security_group(
        &self,
        ctx: &AzureContext,
        rule: &SecurityRuleSpec,
        region: &str,
    ) -> Result<SecurityGroup, DriverError> {
        debug!(
            security_group = %ctx.security_group_name,
            source = %rule.source_address_prefix,
            port = %rule.destination_port_range,
            "LocalDriver: create_network_security_group"
        );
        let mut state = self.state.lock().await;
        if !state.groups.contains_key(&ctx.resource_group_name) {
            return Err(Self::not_found("ResourceGroupNotFound", &ctx.resource_group_name));
        }
        if let Some(assignment) = self.policies.region_denial(region) {
            return Err(AzureError::policy_denial(&ctx.security_group_name, assignment).into());
        }
        if let Some(assignment) = SimulatedPolicies::rule_denial(&self.policies.security_groups, rule) {
            return Err(AzureError::policy_denial(&ctx.security_group_name, assignment).into());
        }

        state
            .security_groups
            .insert((ctx.resource_group_name.clone(), ctx.security_group_name.clone()));

        let id = Self::security_group_id(ctx);
        Ok(SecurityGroup {
            id:       id.clone(),
            name:     ctx.security_group_name.clone(),
            location: normalize_region(region),
            properties: SecurityGroupProperties {
                provisioning_state: Some("Succeeded".into()),
                security_rules:     vec![rule_resource(format!("{}/securityRules/{}", id, rule.name), rule)],
            },
        })
    }

    async fn create_network_security_rule(
        &self,
        ctx: &AzureContext,
        rule: &SecurityRuleSpec,
    ) -> Result<SecurityRule, DriverError> {
        debug!(
            security_group = %ctx.security_group_name,
            source = %rule.source_address_prefix,
            port = %rule.destination_port_range,
            "LocalDriver: create_network_security_rule"
        );
        let state = self.state.lock().await;
        let key = (ctx.resource_group_name.clone(), ctx.security_group_name.clone());
        if !state.security_groups.contains(&key) {
            return Err(Self::not_found("ResourceNotFound", &ctx.security_group_name));
        }
        if let Some(assignment) = SimulatedPolicies::rule_denial(&self.policies.security_rules, rule) {
            return Err(AzureError::policy_denial(&rule.name, assignment).into());
        }

        let id = format!("{}/securityRules/{}", Self::security_group_id(ctx), rule.name);
        Ok(rule_resource(id, rule))
    }

    async fn delete_resource_group(&self, ctx: &AzureContext) -> Result<(), DriverError> {
        debug!(resource_group = %ctx.resource_group_name, "LocalDriver: delete_resource_group");
        let mut state = self.state.lock().await;
        state.groups.remove(&ctx.resource_group_name);
        state
            .security_groups
            .retain(|(rg, _)| rg != &ctx.resource_group_name);
        Ok(())
    }
}
