pub mod check;
pub mod error;
pub mod report;

pub use check::{evaluate, run_checks, CheckRequest, SuiteSelection};
pub use error::CheckError;
pub use report::{CaseResult, CheckReport, Observed, Suite, Verdict};
