use azpolicy_domain::Expectation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Suite {
    Regions,
    SecurityGroups,
    SecurityRules,
}

impl std::fmt::Display for Suite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Suite::Regions        => write!(f, "regions"),
            Suite::SecurityGroups => write!(f, "security_groups"),
            Suite::SecurityRules  => write!(f, "security_rules"),
        }
    }
}

/// What ARM actually did with the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Observed {
    Allowed { id: String },
    Denied {
        code:    String,
        message: String,
        policy:  Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Passed,
    Failed { reason: String },
}

impl Verdict {
    pub fn is_pass(&self) -> bool {
        matches!(self, Verdict::Passed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseResult {
    pub suite:    Suite,
    pub name:     String,
    pub expect:   Expectation,
    pub observed: Observed,
    pub verdict:  Verdict,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckReport {
    pub run_id:      String,
    pub started_at:  DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub results:     Vec<CaseResult>,
}

impl CheckReport {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id:      run_id.into(),
            started_at:  Utc::now(),
            finished_at: None,
            results:     Vec::new(),
        }
    }

    pub fn passed(&self) -> usize {
        self.results.iter().filter(|r| r.verdict.is_pass()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.passed()
    }

    pub fn failures(&self) -> impl Iterator<Item = &CaseResult> {
        self.results.iter().filter(|r| !r.verdict.is_pass())
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }
}
