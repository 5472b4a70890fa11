//! Decoding of ARM error bodies.
//!
//! ARM reports failures as
//!
//! ```text
//! { "error": { "code", "target", "message",
//!              "additionalInfo": [ { "type", "info": { "Type", "policyDefinitionEffect",
//!                                                     "policyAssignmentName",
//!                                                     "policyAssignmentDisplayName" } } ] } }
//! ```
//!
//! Decoding is strict: a body that does not match this shape, or whose `code`
//! is empty, is a [`DriverError::Decode`], never an [`AzureError`].

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};

use crate::error::DriverError;

/// Error code ARM uses when a policy assignment blocks a request.
pub const POLICY_DENIAL_CODE: &str = "RequestDisallowedByPolicy";

/// `additionalInfo` type of the entries that name a policy assignment.
const POLICY_VIOLATION_TYPE: &str = "PolicyViolation";

/// Longest body excerpt carried inside a decode error.
const BODY_EXCERPT_MAX: usize = 512;

/// A structured ARM error, decoded from one failed call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AzureError {
    #[serde(default, deserialize_with = "null_as_default")]
    pub code: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub target: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub message: String,
    #[serde(rename = "additionalInfo", default, deserialize_with = "null_as_default")]
    pub additional_info: Vec<AdditionalInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdditionalInfo {
    #[serde(rename = "type", default, deserialize_with = "null_as_default")]
    pub info_type: String,
    /// Shape depends on `info_type`; policy violations carry a [`PolicyInfo`].
    #[serde(default)]
    pub info: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyInfo {
    #[serde(rename = "Type", default, deserialize_with = "null_as_default")]
    pub kind: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub policy_definition_effect: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub policy_assignment_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub policy_assignment_display_name: String,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: Option<AzureError>,
}

fn null_as_default<'de, D, T>(de: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(de)?.unwrap_or_default())
}

impl AdditionalInfo {
    /// The policy details of a `PolicyViolation` entry.
    pub fn policy_info(&self) -> Option<PolicyInfo> {
        if self.info_type != POLICY_VIOLATION_TYPE || !self.info.is_object() {
            return None;
        }
        serde_json::from_value::<PolicyInfo>(self.info.clone())
            .ok()
            .filter(|p| !p.policy_assignment_name.is_empty())
    }
}

impl AzureError {
    /// Synthesize the error ARM returns when `assignment` denies a request on
    /// `target`.
    pub fn policy_denial(target: &str, assignment: &str) -> Self {
        Self {
            code:    POLICY_DENIAL_CODE.into(),
            target:  target.into(),
            message: format!(
                "Resource '{}' was disallowed by policy. Policy assignment: '{}'.",
                target, assignment
            ),
            additional_info: vec![AdditionalInfo {
                info_type: POLICY_VIOLATION_TYPE.into(),
                info: json!({
                    "Type":                        "PolicyViolation",
                    "policyDefinitionEffect":      "deny",
                    "policyAssignmentName":        assignment,
                    "policyAssignmentDisplayName": assignment,
                }),
            }],
        }
    }

    /// Every policy assignment implicated in this error, in ARM's order.
    pub fn policy_assignments(&self) -> Vec<PolicyInfo> {
        self.additional_info
            .iter()
            .filter_map(AdditionalInfo::policy_info)
            .collect()
    }

    /// Name of the first implicated policy assignment.
    pub fn policy_assignment_name(&self) -> Option<String> {
        self.policy_assignments()
            .into_iter()
            .next()
            .map(|p| p.policy_assignment_name)
    }

    pub fn is_policy_denial(&self) -> bool {
        self.code == POLICY_DENIAL_CODE || !self.policy_assignments().is_empty()
    }
}

impl std::fmt::Display for AzureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for AzureError {}

/// Decode the body of a failed HTTP response.
pub fn decode_arm_error(status: u16, body: &[u8]) -> Result<AzureError, DriverError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(DriverError::Decode(format!("HTTP {}: empty error body", status)));
    }
    let envelope: ErrorEnvelope = serde_json::from_slice(body).map_err(|e| {
        DriverError::Decode(format!("HTTP {}: {} (body: {})", status, e, excerpt(body)))
    })?;
    validate(status, envelope, body)
}

/// Decode an error carried inside a JSON document, e.g. a failed
/// long-running operation's status body.
pub fn decode_arm_error_value(status: u16, body: &Value) -> Result<AzureError, DriverError> {
    let envelope: ErrorEnvelope = serde_json::from_value(body.clone())
        .map_err(|e| DriverError::Decode(format!("HTTP {}: {} (body: {})", status, e, body)))?;
    validate(status, envelope, body.to_string().as_bytes())
}

fn validate(status: u16, envelope: ErrorEnvelope, body: &[u8]) -> Result<AzureError, DriverError> {
    let err = envelope.error.ok_or_else(|| {
        DriverError::Decode(format!("HTTP {}: no `error` object (body: {})", status, excerpt(body)))
    })?;
    if err.code.is_empty() {
        return Err(DriverError::Decode(format!(
            "HTTP {}: error code is empty (body: {})",
            status,
            excerpt(body)
        )));
    }
    Ok(err)
}

fn excerpt(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    if text.len() <= BODY_EXCERPT_MAX {
        return text.into_owned();
    }
    let mut end = BODY_EXCERPT_MAX;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &text[..end])
}
