use super::sigv4::{signed_request, RequestSigner};
use super::{
    AwsCredentials, CloudCredentials, CredentialError, CredentialFederator, CredentialResult,
};
use crate::model::Provider;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

/// Role assumed in every client account unless configured otherwise
pub const DEFAULT_CROSS_ACCOUNT_ROLE: &str = "WozCrossAccountRole";

const SESSION_NAME: &str = "woz-scanner";
const STS_VERSION: &str = "2011-06-15";

/// STS AssumeRole response (XML)
#[derive(Debug, Deserialize)]
struct AssumeRoleResponse {
    #[serde(rename = "AssumeRoleResult")]
    result: AssumeRoleResult,
}

#[derive(Debug, Deserialize)]
struct AssumeRoleResult {
    #[serde(rename = "Credentials")]
    credentials: StsCredentials,
}

#[derive(Debug, Deserialize)]
struct StsCredentials {
    #[serde(rename = "AccessKeyId")]
    access_key_id: String,
    #[serde(rename = "SecretAccessKey")]
    secret_access_key: String,
    #[serde(rename = "SessionToken")]
    session_token: String,
    #[serde(rename = "Expiration")]
    expiration: String,
}

/// Minimal AWS STS client speaking the query protocol
#[derive(Clone)]
pub struct StsClient {
    http: reqwest::Client,
    endpoint: Url,
    region: String,
}

impl StsClient {
    pub fn new(http: reqwest::Client, region: &str) -> CredentialResult<Self> {
        let endpoint = Url::parse(&format!("https://sts.{}.amazonaws.com/", region))
            .map_err(|e| CredentialError::Configuration(format!("Invalid region '{}': {}", region, e)))?;

        Ok(Self {
            http,
            endpoint,
            region: region.to_string(),
        })
    }

    /// Point the client at a different STS endpoint
    pub fn with_endpoint(mut self, endpoint: Url) -> Self {
        self.endpoint = endpoint;
        self
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Exchange `caller` credentials for temporary credentials of `role_arn`
    pub async fn assume_role(
        &self,
        caller: &AwsCredentials,
        role_arn: &str,
    ) -> CredentialResult<AwsCredentials> {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("Action", "AssumeRole")
            .append_pair("Version", STS_VERSION)
            .append_pair("RoleArn", role_arn)
            .append_pair("RoleSessionName", SESSION_NAME)
            .finish();

        let signer = RequestSigner::new(caller, &self.region, "sts");
        let response = signed_request(
            &self.http,
            &signer,
            reqwest::Method::POST,
            self.endpoint.clone(),
            &[("content-type", "application/x-www-form-urlencoded; charset=utf-8")],
            body.into_bytes(),
        )
        .send()
        .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(CredentialError::Rejected {
                service: "AWS STS".to_string(),
                status: status.as_u16(),
                body,
            });
        }

        debug!(role_arn = %role_arn, "Assumed role");
        parse_assume_role(&body)
    }
}

fn parse_assume_role(body: &str) -> CredentialResult<AwsCredentials> {
    let response: AssumeRoleResponse = quick_xml::de::from_str(body)
        .map_err(|e| CredentialError::Parse(format!("AssumeRole response: {}", e)))?;
    let creds = response.result.credentials;

    let expires_at = DateTime::parse_from_rfc3339(creds.expiration.trim())
        .map_err(|e| CredentialError::Parse(format!("Expiration '{}': {}", creds.expiration, e)))?
        .with_timezone(&Utc);

    Ok(AwsCredentials {
        access_key_id: creds.access_key_id,
        secret_access_key: creds.secret_access_key,
        session_token: Some(creds.session_token),
        expires_at: Some(expires_at),
    })
}

/// Reaches client AWS accounts through two role hops:
/// ambient identity → processing role → the client's cross-account role.
pub struct AwsRoleFederator {
    sts: StsClient,
    ambient: AwsCredentials,
    processing_role_arn: String,
    cross_account_role: String,
}

impl AwsRoleFederator {
    pub fn new(
        sts: StsClient,
        ambient: AwsCredentials,
        processing_role_arn: impl Into<String>,
        cross_account_role: impl Into<String>,
    ) -> Self {
        Self {
            sts,
            ambient,
            processing_role_arn: processing_role_arn.into(),
            cross_account_role: cross_account_role.into(),
        }
    }

    pub fn sts(&self) -> &StsClient {
        &self.sts
    }

    /// ARN of the role assumed inside the client's account
    pub fn client_role_arn(&self, account_id: &str) -> String {
        format!("arn:aws:iam::{}:role/{}", account_id, self.cross_account_role)
    }

    /// Credentials of the processing role itself (first hop only)
    pub async fn processing_credentials(&self) -> CredentialResult<AwsCredentials> {
        self.sts
            .assume_role(&self.ambient, &self.processing_role_arn)
            .await
    }
}

#[async_trait]
impl CredentialFederator for AwsRoleFederator {
    fn provider(&self) -> Provider {
        Provider::Aws
    }

    async fn credentials_for(&self, account_id: &str) -> CredentialResult<CloudCredentials> {
        if account_id.len() != 12 || !account_id.chars().all(|c| c.is_ascii_digit()) {
            return Err(CredentialError::Configuration(format!(
                "'{}' is not an AWS account id",
                account_id
            )));
        }

        let processing = self.processing_credentials().await?;
        let client = self
            .sts
            .assume_role(&processing, &self.client_role_arn(account_id))
            .await?;

        info!(account_id = %account_id, "Obtained client account credentials");
        Ok(CloudCredentials::Aws(client))
    }
}
