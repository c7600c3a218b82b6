pub mod regorus;

pub use self::regorus::RegorusEngine;

use crate::model::RegoPolicy;
use std::fmt;

/// Errors raised while evaluating a rule-set
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    /// The rule-set text could not be parsed or loaded
    Prepare(String),

    /// The entry point could not be evaluated
    Evaluate(String),

    /// The entry point produced a value that is not a violation collection
    UnexpectedResult(String),
}

impl fmt::Display for PolicyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyError::Prepare(msg) => write!(f, "Failed to prepare rule-set: {}", msg),
            PolicyError::Evaluate(msg) => write!(f, "Failed to evaluate rule-set: {}", msg),
            PolicyError::UnexpectedResult(msg) => {
                write!(f, "Unexpected evaluation result: {}", msg)
            }
        }
    }
}

impl std::error::Error for PolicyError {}

pub type PolicyResult<T> = Result<T, PolicyError>;

/// Evaluates one rule-set against one configuration document.
///
/// Implementations must be deterministic: the same policy and input always
/// yield the same, sorted and unique, list of violated rule names. An empty
/// list means the input is compliant.
pub trait PolicyEngine: Send + Sync {
    fn evaluate(&self, policy: &RegoPolicy, input: &serde_json::Value) -> PolicyResult<Vec<String>>;
}

/// Extract the rule path of the `package` declaration, e.g. `data.s3`
pub fn package_of(rego: &str) -> Option<String> {
    rego.lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix("package "))
        .map(|pkg| format!("data.{}", pkg.trim()))
}

impl RegoPolicy {
    pub fn new(
        resource_type: impl Into<String>,
        query: impl Into<String>,
        rego: impl Into<String>,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            query: query.into(),
            rego: rego.into(),
        }
    }

    /// Check that the entry point names a rule inside the policy's package
    pub fn validate(&self) -> PolicyResult<()> {
        if self.resource_type.trim().is_empty() {
            return Err(PolicyError::Prepare("resource type is empty".to_string()));
        }

        let package = package_of(&self.rego)
            .ok_or_else(|| PolicyError::Prepare("no package declaration".to_string()))?;

        let inside = self
            .query
            .strip_prefix(&package)
            .is_some_and(|rest| rest.starts_with('.') && rest.len() > 1);

        if inside {
            Ok(())
        } else {
            Err(PolicyError::Evaluate(format!(
                "entry point '{}' is not a rule of package '{}'",
                self.query, package
            )))
        }
    }
}

/// Engine returning canned verdicts keyed by resource type
#[cfg(test)]
pub struct MockPolicyEngine {
    verdicts: std::collections::HashMap<String, PolicyResult<Vec<String>>>,
    calls: std::sync::Mutex<Vec<serde_json::Value>>,
}

#[cfg(test)]
impl MockPolicyEngine {
    pub fn new() -> Self {
        Self {
            verdicts: std::collections::HashMap::new(),
            calls: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn with_verdict(mut self, resource_type: &str, verdict: PolicyResult<Vec<String>>) -> Self {
        self.verdicts.insert(resource_type.to_string(), verdict);
        self
    }

    /// Inputs the engine was asked to evaluate
    pub fn calls(&self) -> Vec<serde_json::Value> {
        self.calls.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl PolicyEngine for MockPolicyEngine {
    fn evaluate(&self, policy: &RegoPolicy, input: &serde_json::Value) -> PolicyResult<Vec<String>> {
        self.calls.lock().unwrap().push(input.clone());
        self.verdicts
            .get(&policy.resource_type)
            .cloned()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}
