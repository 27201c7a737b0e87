use crate::service_account::ServiceAccountToken;
use crate::token_exchange::{ExchangeError, TokenExchangeResponse, exchange_cr_token};
use reqwest::StatusCode;
use reqwest::header::ACCEPT;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use std::fmt::{Debug, Formatter};
use std::path::{Path, PathBuf};

/// What callers get back instead of the database list when errors are swallowed.
pub const CLOUDANT_ERROR_MESSAGE: &str = "error reading Cloudant databases";

/// How a failed Cloudant call is reported.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorPolicy {
    /// Return the typed error to the caller.
    Strict,
    /// Log what is known about the failure and report [`DatabaseListing::Unavailable`].
    #[default]
    BestEffort,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("error reading service account token")]
    CredentialUnavailable,
    #[error("IAM did not issue an access token for trusted profile {profile}")]
    ExchangeFailed {
        profile: String,
        response: TokenExchangeResponse,
    },
    #[error(transparent)]
    Exchange(#[from] ExchangeError),
    #[error("Could not reach {url}: {source}")]
    Unreachable {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned {status}: {}", .error.as_deref().unwrap_or("no error message"))]
    Status {
        url: String,
        status: StatusCode,
        error: Option<String>,
        reason: Option<String>,
    },
    #[error("Invalid JSON returned from {url}: {source}")]
    Parse {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

impl ServiceError {
    /// Short machine readable name of the failure.
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::CredentialUnavailable => "credential-unavailable",
            ServiceError::ExchangeFailed { .. } => "exchange-failed",
            ServiceError::Exchange(ExchangeError::TokenServiceError(_))
            | ServiceError::Unreachable { .. }
            | ServiceError::Status { .. } => "downstream-unreachable",
            ServiceError::Exchange(ExchangeError::InvalidResponseData(_))
            | ServiceError::Parse { .. } => "parse-error",
        }
    }

    /// Write the diagnostic fields of this error to the log.
    fn log_diagnostics(&self) {
        match self {
            ServiceError::Status {
                url,
                status,
                error,
                reason,
            } => tracing::warn!(
                status_code = status.as_u16(),
                error_message = error.as_deref().unwrap_or_default(),
                reason = reason.as_deref().unwrap_or_default(),
                "Cloudant request to {} failed",
                url
            ),
            ServiceError::ExchangeFailed { profile, response } => tracing::warn!(
                error_message = response.error_message().unwrap_or_default(),
                "Could not authenticate to Cloudant with trusted profile {}",
                profile
            ),
            e => tracing::warn!(kind = e.kind(), "Cloudant request failed: {}", e),
        }
    }
}

/// The body Cloudant sends with error statuses.
#[derive(Clone, Debug, serde::Deserialize)]
struct CloudantErrorResponse {
    error: Option<String>,
    reason: Option<String>,
}

/// The outcome of a database listing under [`ErrorPolicy::BestEffort`].
#[derive(Clone, Debug, PartialEq)]
pub enum DatabaseListing {
    Databases(Value),
    Unavailable,
}

/// Obtains IAM access tokens for one trusted profile from the container's cr-token.
///
/// Each authentication re-reads the token file and performs its own exchange; tokens held
/// by the caller are never reused.
pub struct ContainerAuthenticator {
    client: reqwest::Client,
    token_url: String,
    token_path: PathBuf,
    profile_name: String,
}

impl ContainerAuthenticator {
    pub fn new(
        client: reqwest::Client,
        token_url: impl Into<String>,
        token_path: impl AsRef<Path>,
        profile_name: impl Into<String>,
    ) -> Self {
        Self {
            client,
            token_url: token_url.into(),
            token_path: token_path.as_ref().to_path_buf(),
            profile_name: profile_name.into(),
        }
    }

    /// Read the cr-token and exchange it for an access token.
    pub async fn authenticate(&self) -> Result<SecretString, ServiceError> {
        let token = ServiceAccountToken::load(&self.token_path)
            .await
            .ok_or(ServiceError::CredentialUnavailable)?;
        let response =
            exchange_cr_token(&self.client, &self.token_url, &self.profile_name, &token).await?;
        match response.access_token() {
            Some(access_token) => Ok(access_token),
            None => Err(ServiceError::ExchangeFailed {
                profile: self.profile_name.clone(),
                response,
            }),
        }
    }
}

impl Debug for ContainerAuthenticator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ContainerAuthenticator(profile_name={}, token_path={})",
            self.profile_name,
            self.token_path.display()
        )
    }
}

#[async_trait::async_trait]
pub trait DatabaseLister: Send + Sync + std::fmt::Debug {
    /// List the databases at `endpoint`, authenticating as the trusted profile `profile_name`.
    ///
    /// Without an endpoint, the implementation's default instance is used.
    async fn list_databases(
        &self,
        profile_name: &str,
        endpoint: Option<&str>,
    ) -> Result<Value, ServiceError>;

    /// [`Self::list_databases`], with failures handled according to `policy`.
    async fn list_databases_with_policy(
        &self,
        profile_name: &str,
        endpoint: Option<&str>,
        policy: ErrorPolicy,
    ) -> Result<DatabaseListing, ServiceError> {
        match self.list_databases(profile_name, endpoint).await {
            Ok(databases) => Ok(DatabaseListing::Databases(databases)),
            Err(e) if policy == ErrorPolicy::BestEffort => {
                e.log_diagnostics();
                Ok(DatabaseListing::Unavailable)
            }
            Err(e) => Err(e),
        }
    }
}

/// Lists Cloudant databases through `GET /_all_dbs`.
#[derive(Clone)]
pub struct CloudantReader {
    client: reqwest::Client,
    token_url: String,
    token_path: PathBuf,
    default_endpoint: String,
}

impl CloudantReader {
    pub fn new(
        client: reqwest::Client,
        token_url: impl Into<String>,
        token_path: impl AsRef<Path>,
        default_endpoint: impl Into<String>,
    ) -> Self {
        Self {
            client,
            token_url: token_url.into(),
            token_path: token_path.as_ref().to_path_buf(),
            default_endpoint: default_endpoint.into(),
        }
    }

    pub fn authenticator(&self, profile_name: &str) -> ContainerAuthenticator {
        ContainerAuthenticator::new(
            self.client.clone(),
            &self.token_url,
            &self.token_path,
            profile_name,
        )
    }
}

impl Debug for CloudantReader {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "CloudantReader(default_endpoint={}, ...)",
            self.default_endpoint
        )
    }
}

#[async_trait::async_trait]
impl DatabaseLister for CloudantReader {
    #[tracing::instrument(skip(self))]
    async fn list_databases(
        &self,
        profile_name: &str,
        endpoint: Option<&str>,
    ) -> Result<Value, ServiceError> {
        let endpoint = endpoint.unwrap_or(&self.default_endpoint);
        let access_token = self.authenticator(profile_name).authenticate().await?;

        let url = format!("{}/_all_dbs", endpoint.trim_end_matches('/'));
        tracing::debug!("Listing Cloudant databases at {}", url);
        let response = self
            .client
            .get(&url)
            .header(ACCEPT, "application/json")
            .bearer_auth(access_token.expose_secret())
            .send()
            .await
            .map_err(|source| ServiceError::Unreachable {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            let details = response.json::<CloudantErrorResponse>().await.ok();
            return Err(ServiceError::Status {
                url,
                status,
                error: details.as_ref().and_then(|d| d.error.clone()),
                reason: details.and_then(|d| d.reason),
            });
        }
        response
            .json::<Value>()
            .await
            .map_err(|source| ServiceError::Parse { url, source })
    }
}
