use crate::service_account::ServiceAccountToken;
use reqwest::header::ACCEPT;
use secrecy::SecretString;
use serde_json::Value;
use std::fmt::{Debug, Formatter};

/// The grant type IAM expects when trading a cr-token for an access token.
pub const CR_TOKEN_GRANT_TYPE: &str = "urn:ibm:params:oauth:grant-type:cr-token";

#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error("Could not reach the IAM token service: {}", .0)]
    TokenServiceError(#[source] reqwest::Error),
    #[error("Invalid data returned from IAM token service: {}", .0)]
    InvalidResponseData(#[source] reqwest::Error),
}

/// Whatever IAM sent back for a token exchange, successful or not.
///
/// A successful exchange has an `access_token` (plus `expires_in`, `expiration`, `scope`, ...);
/// a refused one carries IAM's error fields (`errorCode`, `errorMessage`, `context`). Both are kept
/// verbatim so they can be relayed to callers.
#[derive(Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct TokenExchangeResponse(Value);

impl TokenExchangeResponse {
    pub fn new(body: Value) -> Self {
        Self(body)
    }

    /// The access token, if IAM issued one.
    pub fn access_token(&self) -> Option<SecretString> {
        self.0
            .get("access_token")
            .and_then(Value::as_str)
            .map(SecretString::from)
    }

    /// IAM's `errorMessage`, if this is an error response.
    pub fn error_message(&self) -> Option<&str> {
        self.0.get("errorMessage").and_then(Value::as_str)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

impl Debug for TokenExchangeResponse {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        // Only field names; the values include the access and refresh tokens.
        let keys: Vec<&str> = self
            .0
            .as_object()
            .map(|o| o.keys().map(String::as_str).collect())
            .unwrap_or_default();
        write!(f, "TokenExchangeResponse(keys={:?})", keys)
    }
}

/// Exchange a cr-token for an IAM access token scoped to the trusted profile `profile_name`.
///
/// One form-encoded POST, no retries. The JSON body is returned whatever the status code, so a
/// refused exchange comes back as `Ok` without an access token; only transport failures and
/// non-JSON bodies are errors.
///
/// See <https://cloud.ibm.com/apidocs/iam-identity-token-api#gettoken-crtoken>
#[tracing::instrument(skip(client, token))]
pub async fn exchange_cr_token(
    client: &reqwest::Client,
    token_url: &str,
    profile_name: &str,
    token: &ServiceAccountToken,
) -> Result<TokenExchangeResponse, ExchangeError> {
    tracing::debug!("Exchanging cr-token for trusted profile {}", profile_name);
    let response = client
        .post(token_url)
        .header(ACCEPT, "application/json")
        .form(&[
            ("profile_name", profile_name),
            ("grant_type", CR_TOKEN_GRANT_TYPE),
            ("cr_token", token.secret()),
        ])
        .send()
        .await
        .map_err(ExchangeError::TokenServiceError)?;
    let status = response.status();
    let body = response
        .json::<TokenExchangeResponse>()
        .await
        .map_err(ExchangeError::InvalidResponseData)?;
    if body.access_token().is_some() {
        tracing::debug!("IAM issued an access token for {}", profile_name);
    } else {
        tracing::debug!(
            "IAM returned {} without an access token for {}: {}",
            status,
            profile_name,
            body.error_message().unwrap_or("no error message")
        );
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use secrecy::ExposeSecret;
    use serde_json::json;
    use std::io::Write;

    async fn token_file(content: &str) -> (tempfile::NamedTempFile, ServiceAccountToken) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", content).unwrap();
        let token = ServiceAccountToken::load(file.path()).await.unwrap();
        (file, token)
    }

    #[tokio::test]
    async fn posts_cr_token_grant() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/identity/token")
                    .header("content-type", "application/x-www-form-urlencoded")
                    .body_includes("profile_name=TPTest")
                    .body_includes(
                        "grant_type=urn%3Aibm%3Aparams%3Aoauth%3Agrant-type%3Acr-token",
                    )
                    .body_includes("cr_token=header.payload.sig");
                then.status(200).json_body(json!({
                    "access_token": "iam-tok",
                    "expires_in": 3600,
                    "token_type": "Bearer",
                }));
            })
            .await;
        let (_file, token) = token_file("header.payload.sig\n").await;

        let response = exchange_cr_token(
            &reqwest::Client::new(),
            &server.url("/identity/token"),
            "TPTest",
            &token,
        )
        .await
        .unwrap();

        assert_eq!(
            response.access_token().as_ref().map(ExposeSecret::expose_secret),
            Some("iam-tok")
        );
        assert_eq!(response.as_value()["expires_in"], 3600);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn error_body_is_returned_not_raised() {
        let server = MockServer::start_async().await;
        let body = json!({
            "errorCode": "BXNIM0436E",
            "errorMessage": "Trusted profile not found",
            "context": {"requestId": "abc"},
        });
        let expected = body.clone();
        server
            .mock_async(move |when, then| {
                when.method(POST).path("/identity/token");
                then.status(400).json_body(body);
            })
            .await;
        let (_file, token) = token_file("tok").await;

        let response = exchange_cr_token(
            &reqwest::Client::new(),
            &server.url("/identity/token"),
            "Missing",
            &token,
        )
        .await
        .unwrap();

        assert!(response.access_token().is_none());
        assert_eq!(response.error_message(), Some("Trusted profile not found"));
        assert_eq!(response.into_value(), expected);
    }

    #[tokio::test]
    async fn non_json_body_is_invalid_data() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/identity/token");
                then.status(502).body("<html>bad gateway</html>");
            })
            .await;
        let (_file, token) = token_file("tok").await;

        let err = exchange_cr_token(
            &reqwest::Client::new(),
            &server.url("/identity/token"),
            "TPTest",
            &token,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ExchangeError::InvalidResponseData(_)));
    }

    #[test]
    fn debug_output_hides_token_values() {
        let response = TokenExchangeResponse::new(json!({"access_token": "iam-tok"}));
        let printed = format!("{:?}", response);
        assert!(printed.contains("access_token"));
        assert!(!printed.contains("iam-tok"));
    }
}
