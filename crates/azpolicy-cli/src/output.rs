use azpolicy_checker::{CheckReport, Observed, Verdict};

/// Render a report as one line per case followed by a summary.
pub fn render_report_text(report: &CheckReport) -> String {
    let mut out = String::new();
    let mut suite = None;

    for result in &report.results {
        if suite != Some(result.suite) {
            out.push_str(&format!("{}\n", result.suite));
            suite = Some(result.suite);
        }
        let mark = if result.verdict.is_pass() { "ok  " } else { "FAIL" };
        out.push_str(&format!("  {} {} [{}]\n", mark, result.name, observed_label(&result.observed)));
        if let Verdict::Failed { reason } = &result.verdict {
            out.push_str(&format!("       {}\n", reason));
        }
    }

    out.push_str(&format!(
        "\nrun {}: {} passed, {} failed\n",
        report.run_id,
        report.passed(),
        report.failed()
    ));
    out
}

pub fn render_report_json(report: &CheckReport) -> serde_json::Result<String> {
    serde_json::to_string_pretty(report)
}

fn observed_label(observed: &Observed) -> String {
    match observed {
        Observed::Allowed { .. } => "allowed".to_string(),
        Observed::Denied { policy: Some(p), .. } => format!("denied by {}", p),
        Observed::Denied { code, .. } => format!("denied: {}", code),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use azpolicy_checker::{CaseResult, Suite};
    use azpolicy_domain::Expectation;

    fn report() -> CheckReport {
        let mut report = CheckReport::new("r1");
        report.results.push(CaseResult {
            suite:    Suite::Regions,
            name:     "ResourceGroupCreation -> Brazil Southeast".into(),
            expect:   Expectation::deny("denied regions"),
            observed: Observed::Denied {
                code:    "RequestDisallowedByPolicy".into(),
                message: "disallowed".into(),
                policy:  Some("denied regions".into()),
            },
            verdict:  Verdict::Passed,
        });
        report.results.push(CaseResult {
            suite:    Suite::SecurityRules,
            name:     "NetworkSecurityRule SourceAddressPrefix -> * on port -> 22".into(),
            expect:   Expectation::deny("nsr deny any ssh rule"),
            observed: Observed::Allowed { id: "/rule".into() },
            verdict:  Verdict::Failed { reason: "Deployment was allowed".into() },
        });
        report
    }

    #[test]
    fn text_groups_by_suite_and_summarizes() {
        let text = render_report_text(&report());
        assert!(text.starts_with("regions\n"));
        assert!(text.contains("ok   ResourceGroupCreation -> Brazil Southeast [denied by denied regions]"));
        assert!(text.contains("security_rules\n"));
        assert!(text.contains("FAIL NetworkSecurityRule SourceAddressPrefix -> * on port -> 22 [allowed]"));
        assert!(text.contains("       Deployment was allowed\n"));
        assert!(text.ends_with("run r1: 1 passed, 1 failed\n"));
    }

    #[test]
    fn json_is_parseable() {
        let json = render_report_json(&report()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["results"].as_array().map(Vec::len), Some(2));
        assert_eq!(value["results"][1]["verdict"]["reason"], "Deployment was allowed");
    }
}
