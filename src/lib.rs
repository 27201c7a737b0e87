//! # crtokenz
//!
//! The `crtokenz` crate is a small service showing how a workload authenticates with an IBM Cloud
//! [trusted profile](https://cloud.ibm.com/docs/account?topic=account-create-trusted-profile)
//! instead of a long-lived API key.
//!
//! The workload's runtime (e.g. Code Engine) projects a short-lived compute-resource token
//! ("cr-token") into the container. That token is exchanged at IAM for an access token bound to a
//! named trusted profile, and the access token is then used to call other services:
//! - the resource controller, to list the resource instances the profile can see
//!   (see [`resource_controller`] and the generic cursor pagination in [`pagination`])
//! - Cloudant, through a second, independent authenticator (see [`cloudant`])
//!
//! The [`server`] module exposes all of this as a handful of JSON routes.
//!
//! ## Example
//!
//!```rust,no_run
//! use crtokenz::config::{DEFAULT_SA_TOKEN_PATH, IBM_CLOUD_ENDPOINTS};
//! use crtokenz::{ServiceAccountToken, exchange_cr_token, list_resource_instances};
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = reqwest::Client::new();
//!     let Some(cr_token) = ServiceAccountToken::load(DEFAULT_SA_TOKEN_PATH).await else {
//!         anyhow::bail!("No service account token is mounted");
//!     };
//!     let tokens =
//!         exchange_cr_token(&client, &IBM_CLOUD_ENDPOINTS.iam_token_url, "TPTest", &cr_token)
//!             .await?;
//!     let access_token = tokens
//!         .access_token()
//!         .ok_or_else(|| anyhow::anyhow!("IAM refused the exchange: {:?}", tokens.error_message()))?;
//!     let instances = list_resource_instances(
//!         &client,
//!         &IBM_CLOUD_ENDPOINTS.resource_controller_url,
//!         &access_token,
//!     )
//!     .await?;
//!     eprintln!("Resource instances: {}", instances["resources"]);
//!     Ok(())
//! }
//! ```

#![deny(clippy::all)]
#![allow(clippy::uninlined_format_args)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod cloudant;
pub mod config;
pub mod error;
pub mod pagination;
pub mod resource_controller;
pub mod server;
pub mod service_account;
pub mod token_exchange;

pub use cloudant::CloudantReader;
pub use cloudant::ContainerAuthenticator;
pub use cloudant::DatabaseLister;
pub use cloudant::ErrorPolicy;
pub use config::IBM_CLOUD_ENDPOINTS;
pub use config::Settings;
pub use error::AppError;
pub use pagination::PaginatedRequest;
pub use pagination::fetch_all;
pub use resource_controller::list_resource_instances;
pub use server::AppState;
pub use server::router;
pub use service_account::ServiceAccountToken;
pub use token_exchange::TokenExchangeResponse;
pub use token_exchange::exchange_cr_token;
