//! The HTTP front end: four read-only JSON routes.
//!
//! | Route                | Query parameters                             |
//! |----------------------|----------------------------------------------|
//! | `/`                  |                                              |
//! | `/api/listresources` | `tpname` (`TPTest`)                          |
//! | `/api/cloudantdbs`   | `tpname` (`TPTest`)                          |
//! | `/api/cloudantdbs2`  | `tpname` (`TPTest`), `cloudantname` (`Cloudant`) |
//!
//! Every handler runs its outbound calls one after the other. Nothing is cached between
//! requests: each one reads the cr-token again and performs a fresh exchange.

use crate::cloudant::{CLOUDANT_ERROR_MESSAGE, CloudantReader, DatabaseLister, DatabaseListing};
use crate::config::Settings;
use crate::error::AppError;
use crate::resource_controller::{find_instance, list_resource_instances_with_limit, public_endpoint};
use crate::service_account::ServiceAccountToken;
use crate::token_exchange::{TokenExchangeResponse, exchange_cr_token};
use axum::Router;
use axum::extract::{Query, State};
use axum::response::Json;
use axum::routing::get;
use secrecy::SecretString;
use serde_json::{Value, json};
use std::sync::Arc;

/// The version reported by `/`.
pub const CODE_VERSION: &str = env!("CARGO_PKG_VERSION");

const DEFAULT_PROFILE_NAME: &str = "TPTest";
const DEFAULT_CLOUDANT_NAME: &str = "Cloudant";

/// Shared, read-only state of the service.
pub struct AppState {
    settings: Settings,
    client: reqwest::Client,
    databases: Arc<dyn DatabaseLister>,
}

impl AppState {
    /// State backed by a fresh HTTP client and a [`CloudantReader`] using the same client.
    pub fn new(settings: Settings) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().build()?;
        let databases = Arc::new(CloudantReader::new(
            client.clone(),
            &settings.endpoints.iam_token_url,
            &settings.sa_token_path,
            &settings.endpoints.cloudant_url,
        ));
        Ok(Self::with_database_lister(settings, client, databases))
    }

    pub fn with_database_lister(
        settings: Settings,
        client: reqwest::Client,
        databases: Arc<dyn DatabaseLister>,
    ) -> Self {
        Self {
            settings,
            client,
            databases,
        }
    }
}

fn default_profile_name() -> String {
    DEFAULT_PROFILE_NAME.to_string()
}

fn default_cloudant_name() -> String {
    DEFAULT_CLOUDANT_NAME.to_string()
}

#[derive(Debug, serde::Deserialize)]
pub struct ProfileQuery {
    #[serde(default = "default_profile_name")]
    pub tpname: String,
}

#[derive(Debug, serde::Deserialize)]
pub struct CloudantQuery {
    #[serde(default = "default_profile_name")]
    pub tpname: String,
    #[serde(default = "default_cloudant_name")]
    pub cloudantname: String,
}

/// A cr-token together with the access token IAM traded it for.
struct Session {
    cr_token: ServiceAccountToken,
    tokens: TokenExchangeResponse,
    access_token: SecretString,
}

impl Session {
    /// Read the cr-token and exchange it for an access token bound to `profile_name`.
    async fn open(state: &AppState, profile_name: &str) -> Result<Self, AppError> {
        let cr_token = ServiceAccountToken::load(&state.settings.sa_token_path)
            .await
            .ok_or(AppError::CredentialUnavailable)?;
        let tokens = exchange_cr_token(
            &state.client,
            &state.settings.endpoints.iam_token_url,
            profile_name,
            &cr_token,
        )
        .await?;
        let Some(access_token) = tokens.access_token() else {
            return Err(AppError::ExchangeFailed(tokens));
        };
        Ok(Self {
            cr_token,
            tokens,
            access_token,
        })
    }

    async fn resource_instances(&self, state: &AppState) -> Result<Value, AppError> {
        Ok(list_resource_instances_with_limit(
            &state.client,
            &state.settings.endpoints.resource_controller_url,
            &self.access_token,
            state.settings.max_pages,
        )
        .await?)
    }

    /// Add the raw cr-token and IAM response to `body`, if the service is configured to do so.
    fn echo_into(&self, state: &AppState, body: &mut Value) {
        if !state.settings.echo_tokens {
            return;
        }
        body["crtoken"] = json!(self.cr_token.lines());
        body["tokens"] = self.tokens.as_value().clone();
    }
}

fn listing_body(listing: DatabaseListing) -> Value {
    match listing {
        DatabaseListing::Databases(databases) => {
            json!({"message": "Cloudant databases", "databases": databases})
        }
        DatabaseListing::Unavailable => json!({"message": CLOUDANT_ERROR_MESSAGE}),
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/listresources", get(list_resources))
        .route("/api/cloudantdbs", get(cloudant_dbs))
        .route("/api/cloudantdbs2", get(cloudant_dbs_discovered))
        .with_state(state)
}

async fn index() -> Json<Value> {
    Json(json!({"result": "ok", "codeversion": CODE_VERSION}))
}

async fn list_resources(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ProfileQuery>,
) -> Result<Json<Value>, AppError> {
    let session = Session::open(&state, &query.tpname).await?;
    let resources = session.resource_instances(&state).await?;
    let mut body = json!({
        "message": "resource instances",
        "resource_instances": resources,
    });
    session.echo_into(&state, &mut body);
    Ok(Json(body))
}

/// Databases of the configured default Cloudant instance.
async fn cloudant_dbs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ProfileQuery>,
) -> Result<Json<Value>, AppError> {
    let listing = state
        .databases
        .list_databases_with_policy(&query.tpname, None, state.settings.cloudant_errors)
        .await?;
    Ok(Json(listing_body(listing)))
}

/// Databases of the Cloudant instance named `cloudantname`, found through the resource controller.
async fn cloudant_dbs_discovered(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CloudantQuery>,
) -> Result<Json<Value>, AppError> {
    let session = Session::open(&state, &query.tpname).await?;
    let resources = session.resource_instances(&state).await?;
    if !resources.get("resources").is_some_and(Value::is_array) {
        return Err(AppError::ListingFailed(resources));
    }
    let instance = find_instance(&resources, &query.cloudantname)
        .ok_or_else(|| AppError::InstanceNotFound(query.cloudantname.clone()))?;
    let endpoint = public_endpoint(instance)
        .ok_or_else(|| AppError::EndpointMissing(query.cloudantname.clone()))?;
    tracing::debug!(
        "Resource instance {} is served at {}",
        query.cloudantname,
        endpoint
    );

    let listing = state
        .databases
        .list_databases_with_policy(
            &query.tpname,
            Some(&endpoint),
            state.settings.cloudant_errors,
        )
        .await?;
    let mut body = listing_body(listing);
    body["endpoint"] = json!(endpoint);
    session.echo_into(&state, &mut body);
    Ok(Json(body))
}
