use super::{PluginError, PluginResult, ResourcePlugin};
use crate::credentials::sigv4::{sha256_hex, signed_request, RequestSigner};
use crate::credentials::{AwsCredentials, CloudCredentials};
use crate::model::{ConfigDocument, Provider};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};
use url::Url;

#[derive(Debug, Default, Deserialize)]
struct ListAllMyBucketsResult {
    #[serde(rename = "Buckets", default)]
    buckets: BucketList,
}

#[derive(Debug, Default, Deserialize)]
struct BucketList {
    #[serde(rename = "Bucket", default)]
    bucket: Vec<Bucket>,
}

#[derive(Debug, Deserialize)]
struct Bucket {
    #[serde(rename = "Name")]
    name: String,
}

/// Outcome of fetching one bucket policy
enum BucketPolicy {
    Document(serde_json::Value),
    Missing,
}

/// S3 buckets and their bucket policies
pub struct S3Plugin {
    http: reqwest::Client,
    region: String,
    endpoint: String,
}

impl S3Plugin {
    pub fn new(http: reqwest::Client, region: &str) -> Self {
        Self {
            http,
            region: region.to_string(),
            endpoint: format!("https://s3.{}.amazonaws.com", region),
        }
    }

    /// Point the plugin at a different (path-style) S3 endpoint
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn aws_credentials<'a>(&self, creds: &'a CloudCredentials) -> PluginResult<&'a AwsCredentials> {
        creds.as_aws().ok_or_else(|| PluginError::WrongCredentials {
            plugin: self.name().to_string(),
            expected: Provider::Aws,
        })
    }

    async fn get(&self, creds: &AwsCredentials, url: &str) -> PluginResult<(u16, String)> {
        let url = Url::parse(url).map_err(|e| PluginError::Http(format!("Invalid URL '{}': {}", url, e)))?;
        let signer = RequestSigner::new(creds, &self.region, "s3");
        let empty_payload = sha256_hex(b"");

        let response = signed_request(
            &self.http,
            &signer,
            reqwest::Method::GET,
            url,
            &[("x-amz-content-sha256", empty_payload.as_str())],
            Vec::new(),
        )
        .send()
        .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok((status, body))
    }

    async fn bucket_policy(&self, creds: &AwsCredentials, bucket: &str) -> PluginResult<BucketPolicy> {
        let url = format!("{}/{}?policy", self.endpoint, urlencoding::encode(bucket));
        let (status, body) = self.get(creds, &url).await?;

        match status {
            200 => serde_json::from_str(&body)
                .map(BucketPolicy::Document)
                .map_err(|e| PluginError::Parse(format!("policy of bucket '{}': {}", bucket, e))),
            404 if body.contains("NoSuchBucketPolicy") => Ok(BucketPolicy::Missing),
            _ => Err(PluginError::Api {
                operation: "GetBucketPolicy".to_string(),
                status,
                body,
            }),
        }
    }
}

#[async_trait]
impl ResourcePlugin for S3Plugin {
    fn name(&self) -> &str {
        "s3"
    }

    fn provider(&self) -> Provider {
        Provider::Aws
    }

    async fn discover(&self, creds: &CloudCredentials, account_id: &str) -> PluginResult<Vec<String>> {
        let creds = self.aws_credentials(creds)?;
        let (status, body) = self.get(creds, &format!("{}/", self.endpoint)).await?;

        if status != 200 {
            return Err(PluginError::Api {
                operation: "ListBuckets".to_string(),
                status,
                body,
            });
        }

        let listing: ListAllMyBucketsResult = quick_xml::de::from_str(&body)
            .map_err(|e| PluginError::Parse(format!("ListBuckets response: {}", e)))?;
        let names: Vec<String> = listing
            .buckets
            .bucket
            .into_iter()
            .map(|bucket| bucket.name)
            .collect();

        info!(account_id = %account_id, count = names.len(), "Discovered S3 buckets");
        Ok(names)
    }

    async fn retrieve_config(
        &self,
        creds: &CloudCredentials,
        account_id: &str,
        ids: &[String],
    ) -> PluginResult<BTreeMap<String, ConfigDocument>> {
        let creds = self.aws_credentials(creds)?;
        let mut configs = BTreeMap::new();

        for bucket in ids {
            let policy = match self.bucket_policy(creds, bucket).await {
                Ok(BucketPolicy::Document(policy)) => policy,
                Ok(BucketPolicy::Missing) => {
                    debug!(bucket = %bucket, "Bucket has no policy");
                    serde_json::Value::String(String::new())
                }
                Err(e) => {
                    warn!(account_id = %account_id, bucket = %bucket, error = %e, "Skipping bucket");
                    continue;
                }
            };

            let mut doc = ConfigDocument::new();
            doc.insert("bucket_policy".to_string(), policy);
            configs.insert(bucket.clone(), doc);
        }

        Ok(configs)
    }
}
