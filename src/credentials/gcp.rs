use super::aws::AwsRoleFederator;
use super::sigv4::RequestSigner;
use super::{
    AwsCredentials, CloudCredentials, CredentialError, CredentialFederator, CredentialResult,
    GcpAccessToken,
};
use crate::model::Provider;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

const GOOGLE_STS_URL: &str = "https://sts.googleapis.com/v1/token";
const IAM_CREDENTIALS_URL: &str = "https://iamcredentials.googleapis.com";
const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";
const TOKEN_EXCHANGE_GRANT: &str = "urn:ietf:params:oauth:grant-type:token-exchange";
const ACCESS_TOKEN_TYPE: &str = "urn:ietf:params:oauth:token-type:access_token";
const AWS_SUBJECT_TOKEN_TYPE: &str = "urn:ietf:params:aws:token-type:aws4_request";

#[derive(Debug, Serialize)]
struct SubjectHeader {
    key: String,
    value: String,
}

/// Serialized, signed GetCallerIdentity request Google verifies against AWS
#[derive(Debug, Serialize)]
struct CallerIdentityToken {
    url: String,
    method: String,
    headers: Vec<SubjectHeader>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenExchangeRequest<'a> {
    audience: &'a str,
    grant_type: &'a str,
    requested_token_type: &'a str,
    scope: &'a str,
    subject_token_type: &'a str,
    subject_token: String,
}

#[derive(Debug, Deserialize)]
struct TokenExchangeResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateAccessTokenResponse {
    access_token: String,
    expire_time: String,
}

/// Reaches client GCP projects from the AWS processing identity:
/// presigned GetCallerIdentity → Google STS federated token → service
/// account impersonation inside the client's project.
pub struct GcpFederator {
    aws: Arc<AwsRoleFederator>,
    audience: String,
    service_account_name: String,
    token_url: String,
    iam_credentials_url: String,
}

impl GcpFederator {
    /// `audience` is the workload identity provider resource registered for
    /// the processing identity, e.g.
    /// `//iam.googleapis.com/projects/<n>/locations/global/workloadIdentityPools/<pool>/providers/<id>`
    pub fn new(
        aws: Arc<AwsRoleFederator>,
        audience: impl Into<String>,
        service_account_name: impl Into<String>,
    ) -> Self {
        Self {
            aws,
            audience: audience.into(),
            service_account_name: service_account_name.into(),
            token_url: GOOGLE_STS_URL.to_string(),
            iam_credentials_url: IAM_CREDENTIALS_URL.to_string(),
        }
    }

    /// Point the federator at different Google endpoints
    pub fn with_endpoints(mut self, token_url: impl Into<String>, iam_credentials_url: impl Into<String>) -> Self {
        self.token_url = token_url.into();
        self.iam_credentials_url = iam_credentials_url.into();
        self
    }

    pub fn service_account_email(&self, project_id: &str) -> String {
        format!(
            "{}@{}.iam.gserviceaccount.com",
            self.service_account_name, project_id
        )
    }

    /// Build the URL-encoded subject token proving the AWS identity
    fn subject_token(&self, processing: &AwsCredentials, at: DateTime<Utc>) -> CredentialResult<String> {
        let region = self.aws.sts().region();
        let url = Url::parse(&format!(
            "https://sts.{}.amazonaws.com/?Action=GetCallerIdentity&Version=2011-06-15",
            region
        ))
        .map_err(|e| CredentialError::Configuration(format!("Invalid region '{}': {}", region, e)))?;

        let signer = RequestSigner::new(processing, region, "sts");
        let signed = signer.sign(
            "POST",
            &url,
            &[("x-goog-cloud-target-resource", self.audience.as_str())],
            b"",
            at,
        );

        let token = CallerIdentityToken {
            url: url.to_string(),
            method: "POST".to_string(),
            headers: signed
                .headers
                .into_iter()
                .map(|(key, value)| SubjectHeader {
                    key: if key == "authorization" {
                        "Authorization".to_string()
                    } else {
                        key
                    },
                    value,
                })
                .collect(),
        };

        let json = serde_json::to_string(&token)
            .map_err(|e| CredentialError::Parse(format!("Subject token: {}", e)))?;
        Ok(urlencoding::encode(&json).into_owned())
    }

    async fn federated_token(&self, subject_token: String) -> CredentialResult<String> {
        let request = TokenExchangeRequest {
            audience: &self.audience,
            grant_type: TOKEN_EXCHANGE_GRANT,
            requested_token_type: ACCESS_TOKEN_TYPE,
            scope: CLOUD_PLATFORM_SCOPE,
            subject_token_type: AWS_SUBJECT_TOKEN_TYPE,
            subject_token,
        };

        let response = self
            .aws
            .sts()
            .http()
            .post(&self.token_url)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(CredentialError::Rejected {
                service: "Google STS".to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let parsed: TokenExchangeResponse = serde_json::from_str(&body)
            .map_err(|e| CredentialError::Parse(format!("Google STS response: {}", e)))?;
        Ok(parsed.access_token)
    }

    async fn impersonate(&self, federated_token: &str, service_account: &str) -> CredentialResult<GcpAccessToken> {
        let url = format!(
            "{}/v1/projects/-/serviceAccounts/{}:generateAccessToken",
            self.iam_credentials_url, service_account
        );

        let response = self
            .aws
            .sts()
            .http()
            .post(&url)
            .bearer_auth(federated_token)
            .json(&serde_json::json!({ "scope": [CLOUD_PLATFORM_SCOPE] }))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(CredentialError::Rejected {
                service: "IAM Credentials".to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateAccessTokenResponse = serde_json::from_str(&body)
            .map_err(|e| CredentialError::Parse(format!("generateAccessToken response: {}", e)))?;

        let expires_at = match DateTime::parse_from_rfc3339(&parsed.expire_time) {
            Ok(at) => at.with_timezone(&Utc),
            Err(e) => {
                warn!(error = %e, "Unreadable token expiry, assuming one hour");
                Utc::now() + Duration::hours(1)
            }
        };

        Ok(GcpAccessToken {
            token: parsed.access_token,
            expires_at,
        })
    }
}

#[async_trait]
impl CredentialFederator for GcpFederator {
    fn provider(&self) -> Provider {
        Provider::Gcp
    }

    async fn credentials_for(&self, project_id: &str) -> CredentialResult<CloudCredentials> {
        if project_id.trim().is_empty() {
            return Err(CredentialError::Configuration("GCP project id is empty".to_string()));
        }

        let processing = self.aws.processing_credentials().await?;
        let subject_token = self.subject_token(&processing, Utc::now())?;
        let federated = self.federated_token(subject_token).await?;

        let service_account = self.service_account_email(project_id);
        let token = self.impersonate(&federated, &service_account).await?;

        info!(project_id = %project_id, service_account = %service_account, "Impersonated service account");
        Ok(CloudCredentials::Gcp(token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::aws::tests::assume_role_xml;
    use crate::credentials::aws::DEFAULT_CROSS_ACCOUNT_ROLE;
    use crate::credentials::StsClient;
    use crate::test_helpers::{FakeCloud, FakeCloudBuilder};

    const AUDIENCE: &str =
        "//iam.googleapis.com/projects/42/locations/global/workloadIdentityPools/woz/providers/aws";

    async fn fake_google(sts_status: u16) -> FakeCloud {
        FakeCloudBuilder::new()
            .xml_when(
                "POST",
                "/aws",
                "WozProcessingRole",
                200,
                &assume_role_xml("ASIAPROCESSING", "2099-01-01T00:00:00Z"),
            )
            .json(
                "POST",
                "/v1/token",
                sts_status,
                r#"{"access_token":"federated-token","issued_token_type":"urn:ietf:params:oauth:token-type:access_token","token_type":"Bearer","expires_in":3600}"#,
            )
            .json(
                "POST",
                "/v1/projects/-/serviceAccounts/woz-scanner@client-project.iam.gserviceaccount.com:generateAccessToken",
                200,
                r#"{"accessToken":"ya29.impersonated","expireTime":"2099-01-01T00:00:00Z"}"#,
            )
            .start()
            .await
    }

    fn gcp_federator(cloud: &FakeCloud) -> GcpFederator {
        let sts = StsClient::new(reqwest::Client::new(), "us-east-1")
            .unwrap()
            .with_endpoint(Url::parse(&cloud.url("/aws")).unwrap());
        let aws = AwsRoleFederator::new(
            sts,
            AwsCredentials::new("AKIDAMBIENT", "ambient-secret"),
            "arn:aws:iam::111111111111:role/WozProcessingRole",
            DEFAULT_CROSS_ACCOUNT_ROLE,
        );

        GcpFederator::new(Arc::new(aws), AUDIENCE, "woz-scanner")
            .with_endpoints(cloud.url("/v1/token"), cloud.base_url.clone())
    }

    #[tokio::test]
    async fn test_federation_chain() {
        let cloud = fake_google(200).await;
        let federator = gcp_federator(&cloud);

        let creds = federator.credentials_for("client-project").await.unwrap();
        let token = creds.as_gcp().unwrap();
        assert_eq!(token.token, "ya29.impersonated");
        assert!(!creds.is_expired());

        let exchange = &cloud.requests_to("/v1/token")[0];
        let body = exchange.json();
        assert_eq!(body["audience"], AUDIENCE);
        assert_eq!(body["grantType"], TOKEN_EXCHANGE_GRANT);
        assert_eq!(body["subjectTokenType"], AWS_SUBJECT_TOKEN_TYPE);
        assert_eq!(body["scope"], CLOUD_PLATFORM_SCOPE);

        let subject = urlencoding::decode(body["subjectToken"].as_str().unwrap())
            .unwrap()
            .into_owned();
        let subject: serde_json::Value = serde_json::from_str(&subject).unwrap();
        assert_eq!(subject["method"], "POST");
        assert!(subject["url"].as_str().unwrap().contains("Action=GetCallerIdentity"));

        let headers = subject["headers"].as_array().unwrap();
        let header = |name: &str| {
            headers
                .iter()
                .find(|h| h["key"] == name)
                .and_then(|h| h["value"].as_str())
                .map(str::to_string)
        };
        assert_eq!(header("x-goog-cloud-target-resource").as_deref(), Some(AUDIENCE));
        assert_eq!(
            header("x-amz-security-token").as_deref(),
            Some("token-ASIAPROCESSING")
        );
        assert!(header("Authorization")
            .unwrap()
            .contains("x-goog-cloud-target-resource"));

        let impersonation = cloud
            .requests()
            .into_iter()
            .find(|r| r.path.ends_with(":generateAccessToken"))
            .unwrap();
        assert_eq!(
            impersonation.header("authorization"),
            Some("Bearer federated-token")
        );
    }

    #[tokio::test]
    async fn test_failed_exchange_aborts_without_impersonation() {
        let cloud = fake_google(401).await;
        let federator = gcp_federator(&cloud);

        let result = federator.credentials_for("client-project").await;
        assert!(matches!(
            result,
            Err(CredentialError::Rejected { status: 401, .. })
        ));
        assert!(!cloud
            .requests()
            .iter()
            .any(|r| r.path.ends_with(":generateAccessToken")));
    }

    #[tokio::test]
    async fn test_empty_project_is_rejected() {
        let cloud = fake_google(200).await;
        let federator = gcp_federator(&cloud);

        let result = federator.credentials_for("  ").await;
        assert!(matches!(result, Err(CredentialError::Configuration(_))));
        assert!(cloud.requests().is_empty());
    }

    #[test]
    fn test_service_account_email() {
        let aws = AwsRoleFederator::new(
            StsClient::new(reqwest::Client::new(), "us-east-1").unwrap(),
            AwsCredentials::new("AKID", "secret"),
            "arn:aws:iam::111111111111:role/WozProcessingRole",
            DEFAULT_CROSS_ACCOUNT_ROLE,
        );
        let federator = GcpFederator::new(Arc::new(aws), AUDIENCE, "woz-scanner");

        assert_eq!(
            federator.service_account_email("client-project"),
            "woz-scanner@client-project.iam.gserviceaccount.com"
        );
    }
}
