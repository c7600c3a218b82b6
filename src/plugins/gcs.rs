use super::{PluginError, PluginResult, ResourcePlugin};
use crate::credentials::{CloudCredentials, GcpAccessToken};
use crate::model::{ConfigDocument, Provider};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{info, warn};

const STORAGE_API: &str = "https://storage.googleapis.com/storage/v1";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BucketPage {
    #[serde(default)]
    items: Vec<BucketItem>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BucketItem {
    name: String,
}

/// Cloud Storage buckets and their IAM policies
pub struct GcsPlugin {
    http: reqwest::Client,
    endpoint: String,
}

impl GcsPlugin {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            endpoint: STORAGE_API.to_string(),
        }
    }

    /// Point the plugin at a different JSON API root
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn token<'a>(&self, creds: &'a CloudCredentials) -> PluginResult<&'a GcpAccessToken> {
        creds.as_gcp().ok_or_else(|| PluginError::WrongCredentials {
            plugin: self.name().to_string(),
            expected: Provider::Gcp,
        })
    }

    async fn get_json(
        &self,
        token: &GcpAccessToken,
        operation: &str,
        url: &str,
        query: &[(&str, &str)],
    ) -> PluginResult<serde_json::Value> {
        let response = self
            .http
            .get(url)
            .bearer_auth(&token.token)
            .query(query)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(PluginError::Api {
                operation: operation.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|e| PluginError::Parse(format!("{}: {}", operation, e)))
    }
}

#[async_trait]
impl ResourcePlugin for GcsPlugin {
    fn name(&self) -> &str {
        "gcs"
    }

    fn provider(&self) -> Provider {
        Provider::Gcp
    }

    async fn discover(&self, creds: &CloudCredentials, project_id: &str) -> PluginResult<Vec<String>> {
        let token = self.token(creds)?;
        let url = format!("{}/b", self.endpoint);
        let mut names = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![("project", project_id), ("fields", "items/name,nextPageToken")];
            if let Some(page) = page_token.as_deref() {
                query.push(("pageToken", page));
            }

            let value = self.get_json(token, "buckets.list", &url, &query).await?;
            let page: BucketPage = serde_json::from_value(value)
                .map_err(|e| PluginError::Parse(format!("buckets.list: {}", e)))?;

            names.extend(page.items.into_iter().map(|item| item.name));
            match page.next_page_token {
                Some(next) if !next.is_empty() => page_token = Some(next),
                _ => break,
            }
        }

        info!(project_id = %project_id, count = names.len(), "Discovered GCS buckets");
        Ok(names)
    }

    async fn retrieve_config(
        &self,
        creds: &CloudCredentials,
        project_id: &str,
        ids: &[String],
    ) -> PluginResult<BTreeMap<String, ConfigDocument>> {
        let token = self.token(creds)?;
        let mut configs = BTreeMap::new();

        for bucket in ids {
            let url = format!("{}/b/{}/iam", self.endpoint, urlencoding::encode(bucket));
            match self.get_json(token, "buckets.getIamPolicy", &url, &[]).await {
                Ok(policy) => {
                    let mut doc = ConfigDocument::new();
                    doc.insert("bucket_policy".to_string(), policy);
                    configs.insert(bucket.clone(), doc);
                }
                Err(e) => {
                    warn!(project_id = %project_id, bucket = %bucket, error = %e, "Skipping bucket");
                }
            }
        }

        Ok(configs)
    }
}
