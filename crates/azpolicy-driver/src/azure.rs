use std::time::{Duration, Instant};

use async_trait::async_trait;
use azpolicy_domain::{
    AzureContext, ResourceGroup, SecurityGroup, SecurityRule, SecurityRuleSpec,
};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::arm_error::{decode_arm_error, decode_arm_error_value};
use crate::driver::Driver;
use crate::error::DriverError;

pub const RESOURCES_API_VERSION: &str = "2021-04-01";
pub const NETWORK_API_VERSION: &str = "2023-09-01";

// ── Configuration ─────────────────────────────────────────────────────────────

/// Credential settings for the Azure driver, injected at startup.
#[derive(Clone, Default)]
pub struct AzureDriverConfig {
    /// Azure tenant ID (GUID). Required for service principal auth.
    pub tenant_id: Option<String>,
    /// Service principal client ID (optional; falls back to MSI/CLI).
    pub client_id: Option<String>,
    /// Service principal client secret (optional; falls back to MSI/CLI).
    pub client_secret: Option<String>,
    /// Use the instance metadata endpoint for a managed identity token.
    pub managed_identity: bool,
}

// ── Base URLs (overridden in tests) ───────────────────────────────────────────

#[derive(Clone)]
pub(crate) struct BaseUrls {
    management: String,
    login:      String,
    imds:       String,
}

impl Default for BaseUrls {
    fn default() -> Self {
        Self {
            management: "https://management.azure.com".into(),
            login:      "https://login.microsoftonline.com".into(),
            imds:       "http://169.254.169.254".into(),
        }
    }
}

// ── Poll schedule ─────────────────────────────────────────────────────────────

/// Delays between long-running operation polls, cycled until `max_polls`.
#[derive(Clone, Debug)]
pub struct PollSchedule {
    pub delays:    Vec<Duration>,
    pub max_polls: usize,
}

impl Default for PollSchedule {
    fn default() -> Self {
        Self {
            delays:    [1u64, 2, 4, 8, 16, 30].into_iter().map(Duration::from_secs).collect(),
            max_polls: 120,
        }
    }
}

// ── Token provider ────────────────────────────────────────────────────────────

/// Abstraction over Azure token acquisition — enables test injection.
#[async_trait]
trait TokenProvider: Send + Sync {
    async fn token(&self) -> Result<String, DriverError>;
}

/// A bearer token kept until 60 s before it expires.
#[derive(Default)]
struct TokenCache(Mutex<Option<(String, Instant)>>);

impl TokenCache {
    async fn get(&self) -> Option<String> {
        let guard = self.0.lock().await;
        match guard.as_ref() {
            Some((tok, expiry)) if Instant::now() < *expiry => Some(tok.clone()),
            _ => None,
        }
    }

    async fn put(&self, token: &str, expires_in: u64) {
        let expiry = Instant::now() + Duration::from_secs(expires_in.saturating_sub(60));
        *self.0.lock().await = Some((token.to_string(), expiry));
    }
}

// ── Service Principal ─────────────────────────────────────────────────────────

struct ServicePrincipalTokenProvider {
    tenant_id:     String,
    client_id:     String,
    client_secret: String,
    login_base:    String,
    client:        reqwest::Client,
    cache:         TokenCache,
}

#[async_trait]
impl TokenProvider for ServicePrincipalTokenProvider {
    async fn token(&self) -> Result<String, DriverError> {
        if let Some(tok) = self.cache.get().await {
            return Ok(tok);
        }

        let url = format!("{}/{}/oauth2/v2.0/token", self.login_base, self.tenant_id);
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
            ("scope", "https://management.azure.com/.default"),
        ];
        let resp: Value = self
            .client
            .post(&url)
            .form(&params)
            .send()
            .await
            .map_err(|e| DriverError::Auth(format!("SP token request: {}", e)))?
            .json()
            .await
            .map_err(|e| DriverError::Auth(format!("SP token decode: {}", e)))?;

        let tok = resp["access_token"]
            .as_str()
            .ok_or_else(|| DriverError::Auth(format!("SP token: no access_token in response: {}", resp)))?
            .to_string();
        let expires_in = resp["expires_in"].as_u64().unwrap_or(3600);

        self.cache.put(&tok, expires_in).await;
        Ok(tok)
    }
}

// ── Managed Identity (IMDS) ───────────────────────────────────────────────────

struct ManagedIdentityTokenProvider {
    imds_base: String,
    client:    reqwest::Client,
    cache:     TokenCache,
}

#[async_trait]
impl TokenProvider for ManagedIdentityTokenProvider {
    async fn token(&self) -> Result<String, DriverError> {
        if let Some(tok) = self.cache.get().await {
            return Ok(tok);
        }

        let resp: Value = self
            .client
            .get(format!("{}/metadata/identity/oauth2/token", self.imds_base))
            .header("Metadata", "true")
            .query(&[
                ("api-version", "2018-02-01"),
                ("resource", "https://management.azure.com/"),
            ])
            .send()
            .await
            .map_err(|e| DriverError::Auth(format!("IMDS token request: {}", e)))?
            .json()
            .await
            .map_err(|e| DriverError::Auth(format!("IMDS token decode: {}", e)))?;

        let tok = resp["access_token"]
            .as_str()
            .ok_or_else(|| DriverError::Auth(format!("IMDS token: no access_token: {}", resp)))?
            .to_string();
        // IMDS reports expires_in as a string.
        let expires_in = resp["expires_in"]
            .as_str()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(3600);

        self.cache.put(&tok, expires_in).await;
        Ok(tok)
    }
}

// ── Azure CLI ─────────────────────────────────────────────────────────────────

struct AzureCliTokenProvider {
    tenant_id: Option<String>,
    cache:     TokenCache,
}

#[async_trait]
impl TokenProvider for AzureCliTokenProvider {
    async fn token(&self) -> Result<String, DriverError> {
        if let Some(tok) = self.cache.get().await {
            return Ok(tok);
        }

        let mut args = vec![
            "account",
            "get-access-token",
            "--resource",
            "https://management.azure.com",
            "--output",
            "json",
        ];
        if let Some(tenant) = self.tenant_id.as_deref() {
            args.extend(["--tenant", tenant]);
        }

        let output = tokio::process::Command::new("az")
            .args(&args)
            .output()
            .await
            .map_err(|e| DriverError::Auth(format!("az CLI not found: {}. Install Azure CLI or configure service principal credentials.", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DriverError::Auth(format!(
                "az account get-access-token failed: {}. Run 'az login' first.",
                stderr.trim()
            )));
        }

        let resp: Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| DriverError::Auth(format!("az CLI output parse: {}", e)))?;
        let tok = resp["accessToken"]
            .as_str()
            .ok_or_else(|| DriverError::Auth("az CLI: no accessToken in output".into()))?
            .to_string();

        // Newer CLIs report `expires_on` as epoch seconds; otherwise assume five minutes.
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let expires_in = resp["expires_on"]
            .as_u64()
            .map(|at| at.saturating_sub(now))
            .unwrap_or(360);

        self.cache.put(&tok, expires_in).await;
        Ok(tok)
    }
}

// ── Static (tests) ────────────────────────────────────────────────────────────

#[cfg(test)]
pub struct StaticToken(pub String);

#[cfg(test)]
#[async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self) -> Result<String, DriverError> {
        Ok(self.0.clone())
    }
}

// ── ARM plumbing ──────────────────────────────────────────────────────────────

/// Where to look for the outcome of an accepted long-running operation.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PollTarget {
    /// `Azure-AsyncOperation`: the body carries `status`.
    AsyncOperation(String),
    /// `Location`: 202 while running, then the final status code.
    Location(String),
}

impl PollTarget {
    fn url(&self) -> &str {
        match self {
            PollTarget::AsyncOperation(u) | PollTarget::Location(u) => u,
        }
    }
}

struct ArmResponse {
    status: u16,
    body:   Vec<u8>,
    poll:   Option<PollTarget>,
}

impl ArmResponse {
    fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Classify a failed response. Bodies that are not ARM errors are fatal.
    fn into_error(self) -> DriverError {
        match decode_arm_error(self.status, &self.body) {
            Ok(e) => DriverError::Arm(e),
            Err(e) => e,
        }
    }

    fn parse<T: DeserializeOwned>(&self, what: &str) -> Result<T, DriverError> {
        serde_json::from_slice(&self.body).map_err(|e| {
            DriverError::UnexpectedResponse(format!(
                "{} (HTTP {}): {}",
                what, self.status, e
            ))
        })
    }
}

// ── AzureDriver ───────────────────────────────────────────────────────────────

pub struct AzureDriver {
    client: reqwest::Client,
    token:  Box<dyn TokenProvider>,
    base:   BaseUrls,
    poll:   PollSchedule,
}

impl AzureDriver {
    /// Create an `AzureDriver`, auto-selecting the token provider:
    /// 1. `client_id` + `client_secret` + `tenant_id` → Service Principal
    /// 2. `managed_identity` → Managed Identity (IMDS)
    /// 3. Otherwise → Azure CLI (`az account get-access-token`)
    pub fn new(config: AzureDriverConfig) -> Result<Self, DriverError> {
        let client = reqwest::Client::new();
        let base   = BaseUrls::default();

        let token: Box<dyn TokenProvider> = match (
            config.client_id.as_deref(),
            config.client_secret.as_deref(),
        ) {
            (Some(cid), Some(cs)) => {
                let tenant_id = config.tenant_id.clone().ok_or_else(|| {
                    DriverError::Auth("AZURE_TENANT_ID is required for service principal auth".into())
                })?;
                info!(client_id = cid, "Using service principal credentials");
                Box::new(ServicePrincipalTokenProvider {
                    tenant_id,
                    client_id:     cid.to_string(),
                    client_secret: cs.to_string(),
                    login_base:    base.login.clone(),
                    client:        client.clone(),
                    cache:         TokenCache::default(),
                })
            }
            _ if config.managed_identity => {
                info!("Using managed identity credentials");
                Box::new(ManagedIdentityTokenProvider {
                    imds_base: base.imds.clone(),
                    client:    client.clone(),
                    cache:     TokenCache::default(),
                })
            }
            _ => {
                info!("Using Azure CLI credentials");
                Box::new(AzureCliTokenProvider {
                    tenant_id: config.tenant_id.clone(),
                    cache:     TokenCache::default(),
                })
            }
        };

        Ok(Self { client, token, base, poll: PollSchedule::default() })
    }

    /// Create an `AzureDriver` with a static bearer token and custom base URLs.
    /// Used exclusively in tests.
    #[cfg(test)]
    pub(crate) fn with_static_token(token: &str, base: BaseUrls, poll: PollSchedule) -> Self {
        Self {
            client: reqwest::Client::new(),
            token:  Box::new(StaticToken(token.to_string())),
            base,
            poll,
        }
    }

    async fn bearer(&self) -> Result<String, DriverError> {
        self.token.token().await
    }

    // ── Resource URLs ─────────────────────────────────────────────────────────

    fn resource_group_url(&self, ctx: &AzureContext) -> String {
        format!(
            "{}/subscriptions/{}/resourcegroups/{}?api-version={}",
            self.base.management, ctx.subscription_id, ctx.resource_group_name, RESOURCES_API_VERSION,
        )
    }

    fn security_group_path(&self, ctx: &AzureContext) -> String {
        format!(
            "{}/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Network/networkSecurityGroups/{}",
            self.base.management, ctx.subscription_id, ctx.resource_group_name, ctx.security_group_name,
        )
    }

    fn security_group_url(&self, ctx: &AzureContext) -> String {
        format!("{}?api-version={}", self.security_group_path(ctx), NETWORK_API_VERSION)
    }

    fn security_rule_url(&self, ctx: &AzureContext, rule_name: &str) -> String {
        format!(
            "{}/securityRules/{}?api-version={}",
            self.security_group_path(ctx), rule_name, NETWORK_API_VERSION,
        )
    }

    // ── ARM HTTP verbs ────────────────────────────────────────────────────────

    async fn send(&self, req: reqwest::RequestBuilder, verb: &str, url: &str) -> Result<ArmResponse, DriverError> {
        let token = self.bearer().await?;
        debug!(url, "Azure ARM {}", verb);
        let resp = req
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| DriverError::Transport(format!("{} {}: {}", verb, url, e)))?;

        let status = resp.status().as_u16();
        let poll = resp
            .headers()
            .get("Azure-AsyncOperation")
            .and_then(|v| v.to_str().ok())
            .map(|s| PollTarget::AsyncOperation(s.to_string()))
            .or_else(|| {
                resp.headers()
                    .get("Location")
                    .and_then(|v| v.to_str().ok())
                    .map(|s| PollTarget::Location(s.to_string()))
            });
        let body = resp
            .bytes()
            .await
            .map_err(|e| DriverError::Transport(format!("{} {}: reading body: {}", verb, url, e)))?
            .to_vec();
        Ok(ArmResponse { status, body, poll })
    }

    async fn arm_put(&self, url: &str, body: &Value) -> Result<ArmResponse, DriverError> {
        self.send(self.client.put(url).json(body), "PUT", url).await
    }

    async fn arm_get(&self, url: &str) -> Result<ArmResponse, DriverError> {
        self.send(self.client.get(url), "GET", url).await
    }

    async fn arm_delete(&self, url: &str) -> Result<ArmResponse, DriverError> {
        self.send(self.client.delete(url), "DELETE", url).await
    }

    // ── ARM async polling ─────────────────────────────────────────────────────

    /// Poll a long-running operation until it completes or the schedule runs out.
    async fn wait_for_operation(&self, target: &PollTarget) -> Result<(), DriverError> {
        let op_url = target.url();
        let delays = if self.poll.delays.is_empty() {
            vec![Duration::ZERO]
        } else {
            self.poll.delays.clone()
        };

        for (i, delay) in delays.iter().cycle().take(self.poll.max_polls).enumerate() {
            let resp = self.arm_get(op_url).await?;
            let status = resp.status;

            match target {
                PollTarget::AsyncOperation(_) => {
                    if !resp.is_success() {
                        return Err(resp.into_error());
                    }
                    let body: Value = resp.parse("operation status")?;
                    match body["status"].as_str().unwrap_or("Unknown") {
                        "Succeeded" => return Ok(()),
                        "Failed" | "Canceled" => {
                            return Err(match decode_arm_error_value(status, &body) {
                                Ok(e) => DriverError::Arm(e),
                                Err(e) => e,
                            });
                        }
                        _ => {}
                    }
                }
                PollTarget::Location(_) => match status {
                    202 => {}
                    200 | 201 | 204 => return Ok(()),
                    _ => return Err(resp.into_error()),
                },
            }

            let poll = i + 1;
            if poll % 10 == 0 {
                info!(poll, op_url, "still waiting for Azure ARM operation");
            } else {
                debug!(poll, op_url, ?delay, "Azure ARM operation pending, waiting");
            }
            tokio::time::sleep(*delay).await;
        }

        Err(DriverError::Timeout(format!(
            "Azure ARM operation still running after {} polls: {}",
            self.poll.max_polls, op_url
        )))
    }

    /// PUT a resource and return its final state.
    ///
    /// An accepted operation is polled to completion and the resource is then
    /// read back, since the PUT response reflects the in-flight state.
    async fn arm_put_and_wait<T: DeserializeOwned + ArmResource>(
        &self,
        url: &str,
        body: &Value,
        what: &str,
    ) -> Result<T, DriverError> {
        let resp = self.arm_put(url, body).await?;
        if !resp.is_success() {
            return Err(resp.into_error());
        }

        let resource: T = match &resp.poll {
            Some(target) => {
                self.wait_for_operation(target).await?;
                self.arm_get_resource(url, what).await?
            }
            None if resp.status == 202 || resp.body.is_empty() => {
                self.arm_get_resource(url, what).await?
            }
            None => resp.parse(what)?,
        };

        if resource.arm_id().is_empty() {
            return Err(DriverError::UnexpectedResponse(format!(
                "{} at {} carries no resource id",
                what, url
            )));
        }
        Ok(resource)
    }

    async fn arm_get_resource<T: DeserializeOwned>(&self, url: &str, what: &str) -> Result<T, DriverError> {
        let resp = self.arm_get(url).await?;
        if !resp.is_success() {
            return Err(resp.into_error());
        }
        resp.parse(what)
    }
}

/// Resources whose ARM id must be present once created.
trait ArmResource {
    fn arm_id(&self) -> &str;
}

impl ArmResource for ResourceGroup {
    fn arm_id(&self) -> &str {
        &self.id
    }
}

impl ArmResource for SecurityGroup {
    fn arm_id(&self) -> &str {
        &self.id
    }
}

impl ArmResource for SecurityRule {
    fn arm_id(&self) -> &str {
        &self.id
    }
}

/// ARM `properties` object of a security rule.
fn rule_properties(rule: &SecurityRuleSpec) -> Value {
    json!({
        "protocol":                 rule.protocol.to_string(),
        "sourceAddressPrefix":      rule.source_address_prefix,
        "sourcePortRange":          rule.source_port_range,
        "destinationAddressPrefix": rule.destination_address_prefix,
        "destinationPortRange":     rule.destination_port_range,
        "access":                   rule.access.to_string(),
        "direction":                rule.direction.to_string(),
        "priority":                 rule.priority,
    })
}

// ── Driver impl ───────────────────────────────────────────────────────────────

#[async_trait]
impl Driver for AzureDriver {
    fn name(&self) -> &'static str {
        "azure"
    }

    async fn create_resource_group(
        &self,
        ctx: &AzureContext,
        region: &str,
    ) -> Result<ResourceGroup, DriverError> {
        info!(resource_group = %ctx.resource_group_name, region, "Creating resource group");
        let url  = self.resource_group_url(ctx);
        let body = json!({ "location": region });
        let rg: ResourceGroup = self.arm_put_and_wait(&url, &body, "resource group").await?;
        debug!(id = %rg.id, "Resource group ready");
        Ok(rg)
    }

    async fn create_network_security_group(
        &self,
        ctx: &AzureContext,
        rule: &SecurityRuleSpec,
        region: &str,
    ) -> Result<SecurityGroup, DriverError> {
        info!(
            security_group = %ctx.security_group_name,
            source = %rule.source_address_prefix,
            port = %rule.destination_port_range,
            region,
            "Creating network security group"
        );
        let url  = self.security_group_url(ctx);
        let body = json!({
            "location": region,
            "properties": {
                "securityRules": [{
                    "name":       rule.name,
                    "properties": rule_properties(rule),
                }]
            }
        });
        self.arm_put_and_wait(&url, &body, "network security group").await
    }

    async fn create_network_security_rule(
        &self,
        ctx: &AzureContext,
        rule: &SecurityRuleSpec,
    ) -> Result<SecurityRule, DriverError> {
        info!(
            security_group = %ctx.security_group_name,
            rule = %rule.name,
            source = %rule.source_address_prefix,
            port = %rule.destination_port_range,
            "Creating network security rule"
        );
        let url  = self.security_rule_url(ctx, &rule.name);
        let body = json!({
            "name":       rule.name,
            "properties": rule_properties(rule),
        });
        self.arm_put_and_wait(&url, &body, "network security rule").await
    }

    async fn delete_resource_group(&self, ctx: &AzureContext) -> Result<(), DriverError> {
        info!(resource_group = %ctx.resource_group_name, "Deleting resource group");
        let url  = self.resource_group_url(ctx);
        let resp = self.arm_delete(&url).await?;
        let status = resp.status;

        match status {
            404 => {
                debug!(resource_group = %ctx.resource_group_name, "Resource group already gone");
                Ok(())
            }
            202 => match &resp.poll {
                Some(target) => self.wait_for_operation(target).await,
                None => Ok(()),
            },
            s if (200..300).contains(&s) => Ok(()),
            _ => Err(resp.into_error()),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
