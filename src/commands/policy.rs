use crate::model::RegoPolicy;
use crate::output;
use crate::policy::PolicyEngine;
use crate::store::PolicyStore;
use crate::traits::FileSystem;
use anyhow::{Context, Result, bail};
use std::path::Path;

pub struct PolicyCommand;

impl PolicyCommand {
    /// Register the rule-set for a resource type after a dry evaluation
    pub async fn execute_add(
        store: &dyn PolicyStore,
        engine: &dyn PolicyEngine,
        fs: &dyn FileSystem,
        resource_type: &str,
        query: &str,
        file: &Path,
    ) -> Result<RegoPolicy> {
        let rego = fs.read_to_string(file)?;
        let policy = RegoPolicy::new(resource_type, query, rego);
        policy
            .validate()
            .with_context(|| format!("Invalid rule-set for '{}'", resource_type))?;

        engine
            .evaluate(&policy, &serde_json::json!({}))
            .with_context(|| format!("Rule-set for '{}' failed a dry evaluation", resource_type))?;

        store
            .create(policy.clone())
            .await
            .with_context(|| format!("Failed to store rule-set for '{}'", resource_type))?;

        output::success_with_details("Rule-set added", resource_type);
        output::key_value("Query", &policy.query);
        Ok(policy)
    }

    pub async fn execute_show(store: &dyn PolicyStore, resource_type: &str) -> Result<RegoPolicy> {
        let Some(policy) = store.find_by_resource_type(resource_type).await? else {
            bail!("No rule-set for resource type '{}'", resource_type);
        };

        output::section(&format!("Rule-set: {}", policy.resource_type));
        output::key_value("Query", &policy.query);
        output::blank();
        println!("{}", policy.rego.trim_end());
        Ok(policy)
    }

    pub async fn execute_list(store: &dyn PolicyStore) -> Result<Vec<RegoPolicy>> {
        let policies = store.list().await?;

        output::section("Rule-sets");
        if policies.is_empty() {
            output::dimmed("No rule-sets registered");
            output::command_suggestion("Add one with", "woz policy add --resource-type s3 --query data.s3.deny --file s3.rego");
            return Ok(policies);
        }

        output::table_header(&["Resource type", "Query"]);
        for policy in &policies {
            output::table_row(&[&policy.resource_type, &policy.query]);
        }
        Ok(policies)
    }

    /// Evaluate a configuration document against the stored rule-set
    pub async fn execute_eval(
        store: &dyn PolicyStore,
        engine: &dyn PolicyEngine,
        fs: &dyn FileSystem,
        resource_type: &str,
        input: &Path,
    ) -> Result<Vec<String>> {
        let Some(policy) = store.find_by_resource_type(resource_type).await? else {
            bail!("No rule-set for resource type '{}'", resource_type);
        };

        let raw = fs.read_to_string(input)?;
        let document: serde_json::Value = serde_json::from_str(&raw)
            .with_context(|| format!("Input {} is not valid JSON", input.display()))?;
        if !document.is_object() {
            bail!("Input {} must be a JSON object", input.display());
        }

        let violations = engine
            .evaluate(&policy, &document)
            .with_context(|| format!("Failed to evaluate rule-set for '{}'", resource_type))?;

        if violations.is_empty() {
            output::success("Compliant");
        } else {
            output::error(&format!("{} misconfiguration(s)", violations.len()));
            for violation in &violations {
                output::list_item(violation);
            }
        }
        Ok(violations)
    }
}
