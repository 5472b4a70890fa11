use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use azpolicy_checker::{run_checks, CheckReport, CheckRequest, SuiteSelection};
use azpolicy_config::{default_matrix, load_matrix, Settings, SUBSCRIPTION_ID_VAR};
use azpolicy_domain::{AzureContext, SecurityRuleSpec};
use azpolicy_driver::{AzureDriver, AzureDriverConfig, Driver, LocalDriver, SimulatedPolicies};
use tracing::{info, warn};

use crate::cli::{Cli, CloudArg, OutputFormat, SuiteArg};
use crate::output;

pub const DEFAULT_LOCATION: &str = "West Europe";

/// Subscription used for `--cloud local` when none is configured.
const LOCAL_SUBSCRIPTION: &str = "00000000-0000-0000-0000-000000000000";

/// Everything a command needs that does not depend on the subcommand.
#[derive(Debug)]
pub struct RunArgs {
    pub cloud:    CloudArg,
    pub settings: Settings,
    pub ctx:      AzureContext,
    pub run_id:   String,
}

impl RunArgs {
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let flag = cli.subscription_id.clone();
        let cloud = cli.cloud;
        let settings = Settings::from_lookup(|key| {
            if key == SUBSCRIPTION_ID_VAR {
                flag.clone()
                    .filter(|v| !v.trim().is_empty())
                    .or_else(|| local_subscription(cloud))
            } else {
                std::env::var(key).ok()
            }
        })
        .context("AZURE_SUBSCRIPTION_ID (or --subscription-id) is required")?;

        let run_id = cli.run_id.clone().unwrap_or_else(new_run_id);
        Self::new(cloud, settings, &cli.name, run_id)
    }

    fn new(cloud: CloudArg, settings: Settings, base_name: &str, run_id: String) -> Result<Self> {
        let ctx = AzureContext::for_run(settings.subscription_id.clone(), base_name, &run_id)
            .context("Invalid resource name")?;
        Ok(Self { cloud, settings, ctx, run_id })
    }

    fn driver(&self) -> Result<Arc<dyn Driver>> {
        match self.cloud {
            CloudArg::Local => {
                info!("Using simulated policies (no Azure calls)");
                Ok(Arc::new(LocalDriver::new(SimulatedPolicies::baseline())))
            }
            CloudArg::Azure => {
                let config = AzureDriverConfig {
                    tenant_id:        self.settings.tenant_id.clone(),
                    client_id:        self.settings.client_id.clone(),
                    client_secret:    self.settings.client_secret.clone(),
                    managed_identity: self.settings.managed_identity,
                };
                let driver = AzureDriver::new(config).context("Failed to initialise Azure driver")?;
                Ok(Arc::new(driver))
            }
        }
    }
}

fn local_subscription(cloud: CloudArg) -> Option<String> {
    (cloud == CloudArg::Local).then(|| LOCAL_SUBSCRIPTION.to_string())
}

/// First 8 hex characters of a v4 UUID.
fn new_run_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}

// ── Smoke ─────────────────────────────────────────────────────────────────────

pub async fn smoke(run: RunArgs, location: String) -> Result<()> {
    let driver = run.driver()?;
    info!(
        run_id = %run.run_id,
        resource_group = %run.ctx.resource_group_name,
        location = %location,
        "Starting smoke run"
    );

    let outcome = smoke_steps(&run, driver.as_ref(), &location).await;

    if run.settings.keep_resource {
        info!(resource_group = %run.ctx.resource_group_name, "KEEP_RESOURCE set; leaving resources in place");
        return outcome;
    }

    let cleanup = driver
        .delete_resource_group(&run.ctx)
        .await
        .with_context(|| format!("Failed to delete resource group {}", run.ctx.resource_group_name));
    if let (Err(_), Err(e)) = (&outcome, &cleanup) {
        warn!(error = %e, "Cleanup after failed smoke run also failed");
    }
    outcome?;
    cleanup?;
    info!("Cleaned up successfully");
    Ok(())
}

async fn smoke_steps(run: &RunArgs, driver: &dyn Driver, location: &str) -> Result<()> {
    let rg = driver
        .create_resource_group(&run.ctx, location)
        .await
        .context("Failed to create resource group")?;
    info!(id = %rg.id, "Resource group created");

    let rule = SecurityRuleSpec::inbound_allow("internet", "22");
    let nsg = driver
        .create_network_security_group(&run.ctx, &rule, location)
        .await
        .context("Failed to create network security group")?;
    info!(id = %nsg.id, "Network security group created");
    Ok(())
}

// ── Check ─────────────────────────────────────────────────────────────────────

pub async fn check(
    run: RunArgs,
    suite: SuiteArg,
    matrix: Option<PathBuf>,
    format: OutputFormat,
) -> Result<()> {
    let report = execute_checks(run, suite, matrix).await?;

    match format {
        OutputFormat::Text => print!("{}", output::render_report_text(&report)),
        OutputFormat::Json => println!("{}", output::render_report_json(&report)?),
    }

    if !report.is_success() {
        bail!("{} of {} policy checks failed", report.failed(), report.results.len());
    }
    Ok(())
}

async fn execute_checks(
    run: RunArgs,
    suite: SuiteArg,
    matrix: Option<PathBuf>,
) -> Result<CheckReport> {
    let matrix = match matrix {
        Some(path) => load_matrix(&path)
            .with_context(|| format!("Failed to load expectation matrix {}", path.display()))?,
        None => default_matrix().context("Built-in expectation matrix is invalid")?,
    };
    let driver = run.driver()?;

    let suites = match suite {
        SuiteArg::Regions => SuiteSelection::Regions,
        SuiteArg::Network => SuiteSelection::Network,
        SuiteArg::All     => SuiteSelection::All,
    };
    let req = CheckRequest {
        ctx: run.ctx,
        matrix,
        suites,
        run_id: run.run_id,
        keep_resource: run.settings.keep_resource,
    };
    run_checks(req, driver).await.context("Policy checks aborted")
}

// ── Cleanup ───────────────────────────────────────────────────────────────────

pub async fn cleanup(run: RunArgs) -> Result<()> {
    let driver = run.driver()?;
    driver
        .delete_resource_group(&run.ctx)
        .await
        .with_context(|| format!("Failed to delete resource group {}", run.ctx.resource_group_name))?;
    println!("Deleted resource group {}", run.ctx.resource_group_name);
    Ok(())
}
