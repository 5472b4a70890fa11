use std::sync::Arc;

use azpolicy_domain::{AzureContext, Expectation, ExpectationMatrix, NetworkCase, SecurityRuleSpec};
use azpolicy_driver::{Driver, DriverError};
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::error::CheckError;
use crate::report::{CaseResult, CheckReport, Observed, Suite, Verdict};

/// Rule the network suite puts in place before any case runs.
const BASELINE_SOURCE: &str = "192.168.1.1/32";
const BASELINE_PORT: &str = "443";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuiteSelection {
    Regions,
    Network,
    All,
}

impl SuiteSelection {
    fn includes_regions(self) -> bool {
        matches!(self, SuiteSelection::Regions | SuiteSelection::All)
    }

    fn includes_network(self) -> bool {
        matches!(self, SuiteSelection::Network | SuiteSelection::All)
    }
}

#[derive(Debug, Clone)]
pub struct CheckRequest {
    pub ctx:           AzureContext,
    pub matrix:        ExpectationMatrix,
    pub suites:        SuiteSelection,
    pub run_id:        String,
    /// Leave the resource group behind once the run ends.
    pub keep_resource: bool,
}

/// Run the selected suites and collect one [`CaseResult`] per matrix entry.
///
/// Policy outcomes, expected or not, are recorded in the report. Any other
/// driver failure aborts the run. The resource group is deleted between
/// suites, and once more on the way out unless `keep_resource` is set.
pub async fn run_checks(
    req: CheckRequest,
    driver: Arc<dyn Driver>,
) -> Result<CheckReport, CheckError> {
    let mut report = CheckReport::new(&req.run_id);
    info!(
        run_id = %req.run_id,
        resource_group = %req.ctx.resource_group_name,
        driver = driver.name(),
        "Starting policy checks"
    );

    if req.suites.includes_regions() {
        let outcome = run_region_suite(&req, driver.as_ref(), &mut report).await;
        let last = !req.suites.includes_network();
        finish_suite(&req, driver.as_ref(), outcome, last).await?;
    }

    if req.suites.includes_network() {
        let outcome = run_network_suite(&req, driver.as_ref(), &mut report).await;
        finish_suite(&req, driver.as_ref(), outcome, true).await?;
    }

    report.finished_at = Some(Utc::now());
    info!(
        passed = report.passed(),
        failed = report.failed(),
        "Policy checks finished"
    );
    Ok(report)
}

/// Tear down after a suite, then surface the suite's own error, if any.
///
/// `keep_resource` only applies where the run ends: after the last selected
/// suite, or after a suite that aborts the run. Otherwise the next suite
/// would find the group in the previous suite's region.
async fn finish_suite(
    req: &CheckRequest,
    driver: &dyn Driver,
    outcome: Result<(), CheckError>,
    last: bool,
) -> Result<(), CheckError> {
    if req.keep_resource && (last || outcome.is_err()) {
        info!(resource_group = %req.ctx.resource_group_name, "Keeping resource group");
        return outcome;
    }
    let cleanup = driver.delete_resource_group(&req.ctx).await;
    match (outcome, cleanup) {
        (Err(e), Err(cleanup_err)) => {
            warn!(error = %cleanup_err, "Cleanup after failed suite also failed");
            Err(e)
        }
        (Err(e), Ok(())) => Err(e),
        (Ok(()), Err(cleanup_err)) => Err(cleanup_err.into()),
        (Ok(()), Ok(())) => Ok(()),
    }
}

async fn run_region_suite(
    req: &CheckRequest,
    driver: &dyn Driver,
    report: &mut CheckReport,
) -> Result<(), CheckError> {
    for case in &req.matrix.regions {
        let name = format!("ResourceGroupCreation -> {}", case.region);

        // Every region starts from an empty slate; a group left in another
        // region would turn the create into a location conflict.
        match driver.delete_resource_group(&req.ctx).await {
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => warn!(case = %name, error = %e, "Pre-case cleanup failed"),
            Ok(()) => {}
        }

        let outcome = driver
            .create_resource_group(&req.ctx, &case.region)
            .await
            .map(|rg| rg.id);
        record(report, Suite::Regions, name, &case.expect, outcome)?;
    }
    Ok(())
}

async fn run_network_suite(
    req: &CheckRequest,
    driver: &dyn Driver,
    report: &mut CheckReport,
) -> Result<(), CheckError> {
    let region = &req.matrix.network_region;

    driver
        .create_resource_group(&req.ctx, region)
        .await
        .map_err(|e| CheckError::Setup(format!("resource group in {}: {}", region, e)))?;
    let baseline = SecurityRuleSpec::inbound_allow(BASELINE_SOURCE, BASELINE_PORT);
    driver
        .create_network_security_group(&req.ctx, &baseline, region)
        .await
        .map_err(|e| CheckError::Setup(format!("baseline security group: {}", e)))?;
    debug!(region = %region, "Network suite baseline in place");

    for case in &req.matrix.security_groups {
        let name = network_case_name("NetworkSecurityGroupRule", case);
        let outcome = driver
            .create_network_security_group(&req.ctx, &case.rule(), region)
            .await
            .map(|nsg| nsg.id);
        record(report, Suite::SecurityGroups, name, &case.expect, outcome)?;
    }

    for case in &req.matrix.security_rules {
        let name = network_case_name("NetworkSecurityRule", case);
        let outcome = driver
            .create_network_security_rule(&req.ctx, &case.rule())
            .await
            .map(|rule| rule.id);
        record(report, Suite::SecurityRules, name, &case.expect, outcome)?;
    }
    Ok(())
}

fn network_case_name(kind: &str, case: &NetworkCase) -> String {
    format!(
        "{} SourceAddressPrefix -> {} on port -> {}",
        kind, case.source_prefix, case.port
    )
}

fn record(
    report: &mut CheckReport,
    suite: Suite,
    name: String,
    expect: &Expectation,
    outcome: Result<String, DriverError>,
) -> Result<(), CheckError> {
    let (observed, verdict) = evaluate(expect, outcome)?;
    match &verdict {
        Verdict::Passed => info!(case = %name, "PASS"),
        Verdict::Failed { reason } => warn!(case = %name, %reason, "FAIL"),
    }
    report.results.push(CaseResult {
        suite,
        name,
        expect: expect.clone(),
        observed,
        verdict,
    });
    Ok(())
}

/// Compare one call's outcome against its expectation.
///
/// `outcome` is the created resource's id or the driver error. Errors that
/// are not decoded ARM errors cannot be judged and are returned as-is.
pub fn evaluate(
    expect: &Expectation,
    outcome: Result<String, DriverError>,
) -> Result<(Observed, Verdict), CheckError> {
    let azerr = match outcome {
        Ok(id) => {
            let verdict = match expect {
                _ if id.is_empty() => Verdict::Failed {
                    reason: "Deployment succeeded but returned no resource id".into(),
                },
                Expectation::Allow => Verdict::Passed,
                Expectation::Deny { policy } => Verdict::Failed {
                    reason: format!(
                        "Deployment was allowed but it should have been denied by '{}'",
                        policy
                    ),
                },
            };
            return Ok((Observed::Allowed { id }, verdict));
        }
        Err(DriverError::Arm(e)) => e,
        Err(fatal) => return Err(fatal.into()),
    };

    let policy_name = azerr.policy_assignment_name();
    let verdict = match (expect, policy_name.as_deref()) {
        (Expectation::Allow, _) if azerr.is_policy_denial() => Verdict::Failed {
            reason: format!("Deployment was denied but it should have been allowed: {}", azerr),
        },
        (Expectation::Allow, _) => Verdict::Failed {
            reason: format!("Deployment failed with {}: {}", azerr.code, azerr),
        },
        (Expectation::Deny { policy }, Some(have)) if have == policy => Verdict::Passed,
        (Expectation::Deny { policy }, Some(have)) => Verdict::Failed {
            reason: format!(
                "Policy assignment failed but not with the right policy: have {}, want {}",
                have, policy
            ),
        },
        (Expectation::Deny { policy }, None) if azerr.is_policy_denial() => Verdict::Failed {
            reason: format!(
                "Deployment was denied without a policy assignment (want {}): {}: {}",
                policy, azerr.code, azerr
            ),
        },
        (Expectation::Deny { policy }, None) => Verdict::Failed {
            reason: format!(
                "Deployment failed with {} instead of being denied by {}: {}",
                azerr.code, policy, azerr
            ),
        },
    };

    let observed = Observed::Denied {
        code:    azerr.code.clone(),
        message: azerr.to_string(),
        policy:  policy_name,
    };
    Ok((observed, verdict))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use azpolicy_domain::{ResourceGroup, SecurityGroup, SecurityRule};
    use azpolicy_driver::{AzureError, LocalDriver, SimulatedPolicies};
    use std::sync::Mutex;

    fn ctx() -> AzureContext {
        AzureContext::for_run("sub", "daily_policies_tests", "t1").unwrap()
    }

    fn request(suites: SuiteSelection, keep_resource: bool) -> CheckRequest {
        CheckRequest {
            ctx: ctx(),
            matrix: azpolicy_config::default_matrix().unwrap(),
            suites,
            run_id: "t1".into(),
            keep_resource,
        }
    }

    /// Wraps a driver and records the operations it sees.
    struct Recording<D> {
        inner: D,
        calls: Mutex<Vec<String>>,
    }

    impl<D> Recording<D> {
        fn new(inner: D) -> Self {
            Self { inner, calls: Mutex::new(Vec::new()) }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn push(&self, call: &str) {
            self.calls.lock().unwrap().push(call.to_string());
        }
    }

    #[async_trait]
    impl<D: Driver> Driver for Recording<D> {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn create_resource_group(&self, ctx: &AzureContext, region: &str) -> Result<ResourceGroup, DriverError> {
            self.push("create_rg");
            self.inner.create_resource_group(ctx, region).await
        }

        async fn create_network_security_group(
            &self,
            ctx: &AzureContext,
            rule: &SecurityRuleSpec,
            region: &str,
        ) -> Result<SecurityGroup, DriverError> {
            self.push("create_nsg");
            self.inner.create_network_security_group(ctx, rule, region).await
        }

        async fn create_network_security_rule(
            &self,
            ctx: &AzureContext,
            rule: &SecurityRuleSpec,
        ) -> Result<SecurityRule, DriverError> {
            self.push("create_rule");
            self.inner.create_network_security_rule(ctx, rule).await
        }

        async fn delete_resource_group(&self, ctx: &AzureContext) -> Result<(), DriverError> {
            self.push("delete_rg");
            self.inner.delete_resource_group(ctx).await
        }
    }

    /// Fails every create with an undecodable response.
    struct Garbled;

    #[async_trait]
    impl Driver for Garbled {
        fn name(&self) -> &'static str {
            "garbled"
        }

        async fn create_resource_group(&self, _: &AzureContext, _: &str) -> Result<ResourceGroup, DriverError> {
            Err(DriverError::Decode("HTTP 502: empty error body".into()))
        }

        async fn create_network_security_group(
            &self,
            _: &AzureContext,
            _: &SecurityRuleSpec,
            _: &str,
        ) -> Result<SecurityGroup, DriverError> {
            Err(DriverError::Decode("HTTP 502: empty error body".into()))
        }

        async fn create_network_security_rule(
            &self,
            _: &AzureContext,
            _: &SecurityRuleSpec,
        ) -> Result<SecurityRule, DriverError> {
            Err(DriverError::Decode("HTTP 502: empty error body".into()))
        }

        async fn delete_resource_group(&self, _: &AzureContext) -> Result<(), DriverError> {
            Ok(())
        }
    }

    // ── evaluate (pure) ───────────────────────────────────────────────────────

    #[test]
    fn allowed_as_expected() {
        let (observed, verdict) = evaluate(&Expectation::Allow, Ok("/rg".into())).unwrap();
        assert_eq!(observed, Observed::Allowed { id: "/rg".into() });
        assert!(verdict.is_pass());
    }

    #[test]
    fn allowed_but_should_be_denied() {
        let (_, verdict) = evaluate(&Expectation::deny("denied regions"), Ok("/rg".into())).unwrap();
        assert!(matches!(verdict, Verdict::Failed { reason } if reason.contains("should have been denied")));
    }

    #[test]
    fn denied_by_expected_policy() {
        let err = AzureError::policy_denial("rg", "denied regions");
        let (observed, verdict) =
            evaluate(&Expectation::deny("denied regions"), Err(DriverError::Arm(err))).unwrap();
        assert!(verdict.is_pass());
        assert!(matches!(observed, Observed::Denied { policy: Some(p), .. } if p == "denied regions"));
    }

    #[test]
    fn denied_by_wrong_policy() {
        let err = AzureError::policy_denial("nsg", "nsg deny any any rule");
        let (_, verdict) =
            evaluate(&Expectation::deny("nsg deny any ssh rule"), Err(DriverError::Arm(err))).unwrap();
        match verdict {
            Verdict::Failed { reason } => {
                assert!(reason.contains("have nsg deny any any rule"), "got: {}", reason);
                assert!(reason.contains("want nsg deny any ssh rule"), "got: {}", reason);
            }
            Verdict::Passed => panic!("should fail"),
        }
    }

    #[test]
    fn denied_without_policy_info() {
        let err = AzureError {
            code: "RequestDisallowedByPolicy".into(),
            message: "denied".into(),
            ..Default::default()
        };
        let (_, verdict) =
            evaluate(&Expectation::deny("denied regions"), Err(DriverError::Arm(err))).unwrap();
        assert!(matches!(verdict, Verdict::Failed { reason } if reason.contains("without a policy assignment")));
    }

    #[test]
    fn denied_but_should_be_allowed() {
        let err = AzureError::policy_denial("rg", "denied regions");
        let (_, verdict) = evaluate(&Expectation::Allow, Err(DriverError::Arm(err))).unwrap();
        assert!(matches!(verdict, Verdict::Failed { reason } if reason.contains("should have been allowed")));
    }

    #[test]
    fn success_without_id_fails() {
        let (observed, verdict) = evaluate(&Expectation::Allow, Ok(String::new())).unwrap();
        assert_eq!(observed, Observed::Allowed { id: String::new() });
        assert!(matches!(verdict, Verdict::Failed { reason } if reason.contains("no resource id")));
    }

    #[test]
    fn non_policy_error_is_not_reported_as_denial() {
        let err = AzureError {
            code: "InvalidResourceGroupLocation".into(),
            message: "already exists in westus3".into(),
            ..Default::default()
        };
        let (_, verdict) = evaluate(&Expectation::Allow, Err(DriverError::Arm(err.clone()))).unwrap();
        assert!(matches!(&verdict, Verdict::Failed { reason } if reason.starts_with("Deployment failed with InvalidResourceGroupLocation")));

        let (_, verdict) =
            evaluate(&Expectation::deny("denied regions"), Err(DriverError::Arm(err))).unwrap();
        assert!(matches!(verdict, Verdict::Failed { reason } if reason.contains("instead of being denied by denied regions")));
    }

    #[test]
    fn fatal_errors_are_not_judged() {
        let res = evaluate(&Expectation::Allow, Err(DriverError::Decode("bad body".into())));
        assert!(matches!(res, Err(CheckError::Driver(DriverError::Decode(_)))));
    }

    // ── run_checks against the local driver ───────────────────────────────────

    #[tokio::test]
    async fn baseline_policies_satisfy_default_matrix() {
        let driver = Arc::new(LocalDriver::new(SimulatedPolicies::baseline()));
        let report = run_checks(request(SuiteSelection::All, false), driver).await.unwrap();

        assert_eq!(report.results.len(), 12 + 9 + 9);
        let failures: Vec<_> = report.failures().map(|r| r.name.clone()).collect();
        assert!(failures.is_empty(), "unexpected failures: {:?}", failures);
        assert!(report.is_success());
        assert!(report.finished_at.is_some());
        assert_eq!(report.run_id, "t1");
    }

    #[tokio::test]
    async fn case_names_follow_operation_and_parameters() {
        let driver = Arc::new(LocalDriver::new(SimulatedPolicies::baseline()));
        let report = run_checks(request(SuiteSelection::All, false), driver).await.unwrap();
        let names: Vec<&str> = report.results.iter().map(|r| r.name.as_str()).collect();
        assert!(names.contains(&"ResourceGroupCreation -> Brazil Southeast"));
        assert!(names.contains(&"NetworkSecurityGroupRule SourceAddressPrefix -> * on port -> *"));
        assert!(names.contains(&"NetworkSecurityRule SourceAddressPrefix -> internet on port -> 3389"));
    }

    #[tokio::test]
    async fn unexpected_denial_is_reported() {
        let policies = SimulatedPolicies::baseline().deny_region("East US", "us freeze");
        let driver = Arc::new(LocalDriver::new(policies));
        let report = run_checks(request(SuiteSelection::Regions, false), driver).await.unwrap();

        assert_eq!(report.failed(), 1);
        let failure = report.failures().next().unwrap();
        assert_eq!(failure.name, "ResourceGroupCreation -> East US");
        assert_eq!(failure.suite, Suite::Regions);
    }

    #[tokio::test]
    async fn missing_policy_is_reported() {
        let mut policies = SimulatedPolicies::baseline();
        policies.security_rules.retain(|p| p.port != "22");
        let driver = Arc::new(LocalDriver::new(policies));
        let report = run_checks(request(SuiteSelection::Network, false), driver).await.unwrap();

        // *, internet and 0.0.0.0/0 on port 22 now go through.
        assert_eq!(report.failed(), 3);
        assert!(report.failures().all(|r| r.suite == Suite::SecurityRules));
        assert!(report
            .failures()
            .all(|r| matches!(r.observed, Observed::Allowed { .. })));
    }

    #[tokio::test]
    async fn region_suite_cleans_before_each_case_and_after() {
        let driver = Arc::new(Recording::new(LocalDriver::new(SimulatedPolicies::baseline())));
        run_checks(request(SuiteSelection::Regions, false), driver.clone()).await.unwrap();

        let calls = driver.calls();
        let deletes = calls.iter().filter(|c| *c == "delete_rg").count();
        let creates = calls.iter().filter(|c| *c == "create_rg").count();
        assert_eq!(creates, 12);
        assert_eq!(deletes, 12 + 1);
        assert_eq!(calls.first().map(String::as_str), Some("delete_rg"));
        assert_eq!(calls.last().map(String::as_str), Some("delete_rg"));
    }

    #[tokio::test]
    async fn keep_resource_skips_final_cleanup() {
        let driver = Arc::new(Recording::new(LocalDriver::new(SimulatedPolicies::baseline())));
        run_checks(request(SuiteSelection::Network, true), driver.clone()).await.unwrap();

        let calls = driver.calls();
        assert!(!calls.contains(&"delete_rg".to_string()));
        assert_eq!(calls[0], "create_rg");
        assert_eq!(calls[1], "create_nsg");
    }

    #[tokio::test]
    async fn keep_resource_still_cleans_between_suites() {
        let driver = Arc::new(Recording::new(LocalDriver::new(SimulatedPolicies::baseline())));
        let report = run_checks(request(SuiteSelection::All, true), driver.clone()).await.unwrap();
        assert!(report.is_success(), "failures: {:?}", report.failures().collect::<Vec<_>>());

        // The regions suite ends with the group in West US 3; the network
        // suite may only recreate it after a delete.
        let calls = driver.calls();
        let baseline = calls.iter().position(|c| c == "create_nsg").unwrap();
        assert_eq!(calls[baseline - 1], "create_rg");
        assert_eq!(calls[baseline - 2], "delete_rg");
        // Nothing is deleted once the network suite starts.
        assert!(!calls[baseline..].contains(&"delete_rg".to_string()));
    }

    #[tokio::test]
    async fn network_suite_setup_failure_is_an_error() {
        let mut req = request(SuiteSelection::Network, false);
        req.matrix.network_region = "Brazil Southeast".into();
        let driver = Arc::new(LocalDriver::new(SimulatedPolicies::baseline()));

        let err = run_checks(req, driver).await.unwrap_err();
        assert!(matches!(err, CheckError::Setup(_)), "got: {:?}", err);
    }

    #[tokio::test]
    async fn fatal_driver_error_aborts_run() {
        let driver = Arc::new(Garbled);
        let err = run_checks(request(SuiteSelection::Regions, false), driver).await.unwrap_err();
        assert!(matches!(err, CheckError::Driver(DriverError::Decode(_))), "got: {:?}", err);
    }

    #[tokio::test]
    async fn report_serializes() {
        let driver = Arc::new(LocalDriver::new(SimulatedPolicies::baseline()));
        let report = run_checks(request(SuiteSelection::Regions, false), driver).await.unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["run_id"], "t1");
        assert_eq!(json["results"][0]["suite"], "regions");
        assert_eq!(json["results"][0]["verdict"]["verdict"], "passed");
    }
}
