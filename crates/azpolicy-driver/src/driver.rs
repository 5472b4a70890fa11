use async_trait::async_trait;
use azpolicy_domain::{AzureContext, ResourceGroup, SecurityGroup, SecurityRule, SecurityRuleSpec};

use crate::error::DriverError;

/// The management-plane operations the policy checks exercise.
///
/// Every call is a single attempt: submit, wait for the long-running operation
/// to finish, return the final resource or the error ARM produced. Nothing is
/// retried or cached.
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Create or update `ctx.resource_group_name` in `region`.
    async fn create_resource_group(
        &self,
        ctx: &AzureContext,
        region: &str,
    ) -> Result<ResourceGroup, DriverError>;

    /// Create or update `ctx.security_group_name` holding exactly `rule`.
    async fn create_network_security_group(
        &self,
        ctx: &AzureContext,
        rule: &SecurityRuleSpec,
        region: &str,
    ) -> Result<SecurityGroup, DriverError>;

    /// Create or update `rule` inside the existing `ctx.security_group_name`.
    async fn create_network_security_rule(
        &self,
        ctx: &AzureContext,
        rule: &SecurityRuleSpec,
    ) -> Result<SecurityRule, DriverError>;

    /// Delete `ctx.resource_group_name` and everything in it. Deleting a group
    /// that does not exist succeeds.
    async fn delete_resource_group(&self, ctx: &AzureContext) -> Result<(), DriverError>;
}
