use crate::cloudant::ErrorPolicy;
use crate::pagination::DEFAULT_MAX_PAGES;
use figment::Figment;
use figment::providers::Env;
use secrecy::SecretString;
use serde::{Deserialize, Deserializer};
use std::path::PathBuf;
use std::sync::LazyLock;

/// Where Code Engine projects the compute-resource token for the workload.
pub const DEFAULT_SA_TOKEN_PATH: &str = "/var/run/secrets/tokens/sa-token";

pub const DEFAULT_PORT: u16 = 5000;

/// Environment variables read into [`Settings`]. Anything else in the environment is ignored.
const ENV_KEYS: &[&str] = &[
    "PORT",
    "SA_TOKEN_PATH",
    "API_TOKEN",
    "ECHO_TOKENS",
    "CLOUDANT_ERRORS",
    "MAX_PAGES",
    "IAM_TOKEN_URL",
    "RESOURCE_CONTROLLER_URL",
    "CLOUDANT_URL",
];

pub static IBM_CLOUD_ENDPOINTS: LazyLock<Endpoints> = LazyLock::new(|| Endpoints {
    // https://cloud.ibm.com/apidocs/iam-identity-token-api#gettoken-crtoken
    iam_token_url: "https://iam.cloud.ibm.com/identity/token".to_string(),
    // https://cloud.ibm.com/apidocs/resource-controller/resource-controller#list-resource-instances
    resource_controller_url: "https://resource-controller.cloud.ibm.com".to_string(),
    cloudant_url: "https://cloudant-tp-demo.cloudantnosqldb.appdomain.cloud".to_string(),
});

/// The external services the demo talks to.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq, Eq)]
pub struct Endpoints {
    /// The IAM token endpoint that accepts the cr-token grant
    #[serde(default = "default_iam_token_url", deserialize_with = "text")]
    pub iam_token_url: String,
    /// Base URL of the resource controller, without the `/v2/...` path
    #[serde(default = "default_resource_controller_url", deserialize_with = "text")]
    pub resource_controller_url: String,
    /// The Cloudant instance used when a caller doesn't name one.
    ///
    /// This is a fixed instance; it has no relation to whatever the trusted profile can
    /// actually see.
    #[serde(default = "default_cloudant_url", deserialize_with = "text")]
    pub cloudant_url: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        IBM_CLOUD_ENDPOINTS.clone()
    }
}

fn default_iam_token_url() -> String {
    IBM_CLOUD_ENDPOINTS.iam_token_url.clone()
}

fn default_resource_controller_url() -> String {
    IBM_CLOUD_ENDPOINTS.resource_controller_url.clone()
}

fn default_cloudant_url() -> String {
    IBM_CLOUD_ENDPOINTS.cloudant_url.clone()
}

/// A raw environment value. Figment types values that look like numbers or booleans, so
/// free-form settings such as tokens have to take any of them back as text.
#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Unsigned(u64),
    Signed(i64),
    Float(f64),
    Bool(bool),
}

impl From<Scalar> for String {
    fn from(scalar: Scalar) -> Self {
        match scalar {
            Scalar::Text(s) => s,
            Scalar::Unsigned(n) => n.to_string(),
            Scalar::Signed(n) => n.to_string(),
            Scalar::Float(n) => n.to_string(),
            Scalar::Bool(b) => b.to_string(),
        }
    }
}

fn text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Scalar::deserialize(deserializer).map(String::from)
}

fn path<'de, D: Deserializer<'de>>(deserializer: D) -> Result<PathBuf, D::Error> {
    text(deserializer).map(PathBuf::from)
}

fn optional_secret<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<SecretString>, D::Error> {
    let value = Option::<Scalar>::deserialize(deserializer)?;
    Ok(value.map(|scalar| SecretString::from(String::from(scalar))))
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_sa_token_path() -> PathBuf {
    PathBuf::from(DEFAULT_SA_TOKEN_PATH)
}

fn default_max_pages() -> usize {
    DEFAULT_MAX_PAGES
}

/// Runtime configuration for the service.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct Settings {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Location of the cr-token. Only worth changing for local testing.
    #[serde(default = "default_sa_token_path", deserialize_with = "path")]
    pub sa_token_path: PathBuf,
    /// Static API token. Accepted for compatibility with existing deployments; no route checks it.
    #[serde(default, deserialize_with = "optional_secret")]
    pub api_token: Option<SecretString>,
    /// Whether responses carry the raw cr-token and the full IAM token response.
    ///
    /// Off unless explicitly requested, as both are live credentials.
    #[serde(default)]
    pub echo_tokens: bool,
    /// How Cloudant failures are reported back to callers.
    #[serde(default)]
    pub cloudant_errors: ErrorPolicy,
    /// Upper bound on the number of pages fetched for one collection.
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    #[serde(flatten)]
    pub endpoints: Endpoints,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            sa_token_path: default_sa_token_path(),
            api_token: None,
            echo_tokens: false,
            cloudant_errors: ErrorPolicy::default(),
            max_pages: DEFAULT_MAX_PAGES,
            endpoints: Endpoints::default(),
        }
    }
}

impl Settings {
    /// The providers [`Settings::load`] reads from.
    ///
    /// Only the process environment is consulted here; a `.env` file has to be loaded into the
    /// environment beforehand (the binary does so with `dotenvy`).
    pub fn figment() -> Figment {
        Figment::new().merge(Env::raw().only(ENV_KEYS))
    }

    /// Build settings from the environment, falling back to defaults for anything unset.
    pub fn load() -> Result<Self, figment::Error> {
        Self::from_figment(Self::figment())
    }

    pub fn from_figment(figment: Figment) -> Result<Self, figment::Error> {
        figment.extract()
    }
}
