use super::{package_of, PolicyEngine, PolicyError, PolicyResult};
use crate::model::RegoPolicy;
use regorus::{Engine, Value};
use std::collections::BTreeSet;

/// Policy engine backed by the regorus Rego interpreter.
///
/// A fresh interpreter is built for each evaluation so no state leaks between
/// resource configs or between resource types.
#[derive(Debug, Default, Clone, Copy)]
pub struct RegorusEngine;

impl RegorusEngine {
    pub fn new() -> Self {
        Self
    }

    fn prepare(policy: &RegoPolicy) -> PolicyResult<Engine> {
        let mut engine = Engine::new();
        engine
            .add_policy(format!("{}.rego", policy.resource_type), policy.rego.clone())
            .map_err(|e| PolicyError::Prepare(e.to_string()))?;
        Ok(engine)
    }

    /// Turn the entry point's value into violated rule names
    fn classify(value: &Value) -> PolicyResult<Vec<String>> {
        let mut names = BTreeSet::new();

        match value {
            Value::Undefined | Value::Null => {}
            Value::Object(entries) => {
                for key in entries.keys() {
                    names.insert(Self::member_name(key)?);
                }
            }
            Value::Set(members) => {
                for member in members.iter() {
                    names.insert(Self::member_name(member)?);
                }
            }
            Value::Array(members) => {
                for member in members.iter() {
                    names.insert(Self::member_name(member)?);
                }
            }
            other => {
                return Err(PolicyError::UnexpectedResult(format!(
                    "expected a set or object of violations, got {}",
                    other
                )));
            }
        }

        Ok(names.into_iter().collect())
    }

    fn member_name(value: &Value) -> PolicyResult<String> {
        match value {
            Value::String(s) => Ok(s.to_string()),
            other => Err(PolicyError::UnexpectedResult(format!(
                "violation names must be strings, got {}",
                other
            ))),
        }
    }
}

impl PolicyEngine for RegorusEngine {
    fn evaluate(&self, policy: &RegoPolicy, input: &serde_json::Value) -> PolicyResult<Vec<String>> {
        let package = package_of(&policy.rego)
            .ok_or_else(|| PolicyError::Prepare("no package declaration".to_string()))?;
        if !policy.query.starts_with(&format!("{}.", package)) {
            return Err(PolicyError::Evaluate(format!(
                "entry point '{}' is not a rule of package '{}'",
                policy.query, package
            )));
        }

        let mut engine = Self::prepare(policy)?;
        let input = Value::from_json_str(&input.to_string())
            .map_err(|e| PolicyError::Evaluate(format!("unreadable input document: {}", e)))?;
        engine.set_input(input);

        let results = engine
            .eval_query(policy.query.clone(), false)
            .map_err(|e| PolicyError::Evaluate(e.to_string()))?;

        // No result means the entry point is undefined for this input
        let value = results
            .result
            .into_iter()
            .next()
            .and_then(|result| result.expressions.into_iter().next())
            .map(|expression| expression.value)
            .unwrap_or(Value::Undefined);

        Self::classify(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const BUCKET_POLICY: &str = r#"
        package s3

        deny["public-read"] = true {
            input.bucket_policy == ""
        }

        deny["wildcard-principal"] = true {
            input.bucket_policy.Statement[_].Principal == "*"
        }
    "#;

    fn s3_policy() -> RegoPolicy {
        RegoPolicy::new("s3", "data.s3.deny", BUCKET_POLICY)
    }

    #[test]
    fn test_object_result_keys_are_violations() {
        let engine = RegorusEngine::new();
        let violations = engine
            .evaluate(&s3_policy(), &json!({ "bucket_policy": "" }))
            .expect("Evaluation failed");

        assert_eq!(violations, vec!["public-read"]);
    }

    #[test]
    fn test_compliant_input_has_no_violations() {
        let engine = RegorusEngine::new();
        let input = json!({
            "bucket_policy": { "Statement": [{ "Principal": "arn:aws:iam::1:root" }] }
        });

        let violations = engine.evaluate(&s3_policy(), &input).expect("Evaluation failed");
        assert!(violations.is_empty());
    }

    #[test]
    fn test_set_result_members_are_violations() {
        let policy = RegoPolicy::new(
            "gcs",
            "data.gcs.deny",
            r#"
                package gcs

                deny[msg] {
                    input.iam.bindings[_].members[_] == "allUsers"
                    msg := "public-bucket"
                }

                deny[msg] {
                    not input.versioning
                    msg := "versioning-disabled"
                }
            "#,
        );
        let input = json!({ "iam": { "bindings": [{ "members": ["allUsers"] }] } });

        let violations = RegorusEngine::new().evaluate(&policy, &input).unwrap();
        assert_eq!(violations, vec!["public-bucket", "versioning-disabled"]);
    }

    #[test]
    fn test_evaluation_is_idempotent() {
        let engine = RegorusEngine::new();
        let input = json!({ "bucket_policy": "" });

        let first = engine.evaluate(&s3_policy(), &input).unwrap();
        let second = engine.evaluate(&s3_policy(), &input).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_large_integers_reach_rules_unchanged() {
        let policy = RegoPolicy::new(
            "s3",
            "data.s3.deny",
            r#"
                package s3

                deny[msg] {
                    msg := sprintf("%v", [input.owner])
                }
            "#,
        );

        let violations = RegorusEngine::new()
            .evaluate(&policy, &json!({ "owner": 9007199254740993u64 }))
            .unwrap();
        assert_eq!(violations, vec!["9007199254740993"]);
    }

    #[test]
    fn test_rule_that_never_fires_is_compliant() {
        let policy = RegoPolicy::new(
            "s3",
            "data.s3.deny",
            "package s3\n\ndeny[msg] {\n    input.missing\n    msg := \"never\"\n}\n",
        );

        let violations = RegorusEngine::new().evaluate(&policy, &json!({})).unwrap();
        assert!(violations.is_empty());
    }

    #[test]
    fn test_boolean_result_is_unexpected() {
        let policy = RegoPolicy::new(
            "s3",
            "data.s3.allow",
            "package s3\n\nallow = true { true }\n",
        );

        let result = RegorusEngine::new().evaluate(&policy, &json!({}));
        assert!(matches!(result, Err(PolicyError::UnexpectedResult(_))));
    }

    #[test]
    fn test_parse_error_is_prepare_error() {
        let policy = RegoPolicy::new("s3", "data.s3.deny", "package s3\n\ndeny[ {");

        let result = RegorusEngine::new().evaluate(&policy, &json!({}));
        assert!(matches!(result, Err(PolicyError::Prepare(_))));
    }

    #[test]
    fn test_entry_point_outside_package_is_rejected() {
        let policy = RegoPolicy::new("s3", "data.other.deny", BUCKET_POLICY);

        let result = RegorusEngine::new().evaluate(&policy, &json!({}));
        assert!(matches!(result, Err(PolicyError::Evaluate(_))));
    }

    #[test]
    fn test_classify_values() {
        assert!(RegorusEngine::classify(&Value::Undefined).unwrap().is_empty());
        assert!(matches!(
            RegorusEngine::classify(&Value::from(1.0)),
            Err(PolicyError::UnexpectedResult(_))
        ));
        assert!(matches!(
            RegorusEngine::classify(&Value::from(vec![Value::from(1.0)])),
            Err(PolicyError::UnexpectedResult(_))
        ));
    }
}
