use crate::pagination::{DEFAULT_MAX_PAGES, PaginatedRequest, PaginationError, fetch_all};
use reqwest::header::{AUTHORIZATION, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use url::Url;

const RESOURCE_INSTANCES_PATH: &str = "/v2/resource_instances";
const PAGE_SIZE: u32 = 100;

/// Build the paged request for every resource instance visible to `access_token`.
pub fn resource_instances_request(
    base_url: &str,
    access_token: &SecretString,
) -> Result<PaginatedRequest, PaginationError> {
    let collection = format!(
        "{}{}",
        base_url.trim_end_matches('/'),
        RESOURCE_INSTANCES_PATH
    );
    let url = Url::parse(&collection).map_err(|source| PaginationError::InvalidUrl {
        cursor: collection.clone(),
        source,
    })?;
    let mut bearer = HeaderValue::try_from(format!("Bearer {}", access_token.expose_secret()))
        .map_err(|_| PaginationError::InvalidHeader("authorization"))?;
    bearer.set_sensitive(true);
    Ok(PaginatedRequest::new(url, "next_url", "resources")
        .with_header(AUTHORIZATION, bearer)
        .with_query("limit", PAGE_SIZE))
}

/// List all resource instances in the account, following `next_url` through every page.
///
/// See <https://cloud.ibm.com/apidocs/resource-controller/resource-controller#list-resource-instances>
pub async fn list_resource_instances(
    client: &reqwest::Client,
    base_url: &str,
    access_token: &SecretString,
) -> Result<Value, PaginationError> {
    list_resource_instances_with_limit(client, base_url, access_token, DEFAULT_MAX_PAGES).await
}

/// Like [`list_resource_instances`], with an explicit page limit.
pub async fn list_resource_instances_with_limit(
    client: &reqwest::Client,
    base_url: &str,
    access_token: &SecretString,
    max_pages: usize,
) -> Result<Value, PaginationError> {
    let request = resource_instances_request(base_url, access_token)?.with_max_pages(max_pages);
    fetch_all(client, &request).await
}

/// The first resource instance called `name`.
pub fn find_instance<'a>(collection: &'a Value, name: &str) -> Option<&'a Value> {
    collection
        .get("resources")
        .and_then(Value::as_array)?
        .iter()
        .find(|r| r.get("name").and_then(Value::as_str) == Some(name))
}

/// The public endpoint of a resource instance as an `https://` URL.
///
/// Service instances like Cloudant publish their host name under `extensions.endpoints.public`.
pub fn public_endpoint(instance: &Value) -> Option<String> {
    instance
        .pointer("/extensions/endpoints/public")
        .and_then(Value::as_str)
        .filter(|host| !host.is_empty())
        .map(|host| format!("https://{}", host))
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn collection() -> Value {
        json!({
            "rows_count": 3,
            "resources": [
                {"name": "Cloudant-old", "extensions": {"endpoints": {"public": "old.example.com"}}},
                {"name": "Cloudant", "extensions": {"endpoints": {"public": "foo.example.com"}}},
                {"name": "Cloudant", "extensions": {"endpoints": {"public": "bar.example.com"}}},
                {"name": "cos-instance"},
            ],
        })
    }

    #[tokio::test]
    async fn lists_with_bearer_and_page_size() {
        let server = MockServer::start_async().await;
        let first = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/v2/resource_instances")
                    .query_param("limit", "100")
                    .header("authorization", "Bearer iam-tok");
                then.status(200).json_body(json!({
                    "next_url": "/v2/resource_instances?start=page2",
                    "resources": [{"name": "a"}],
                }));
            })
            .await;
        let second = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/v2/resource_instances")
                    .query_param("start", "page2")
                    .header("authorization", "Bearer iam-tok");
                then.status(200).json_body(json!({
                    "next_url": null,
                    "resources": [{"name": "b"}],
                }));
            })
            .await;

        let data = list_resource_instances(
            &reqwest::Client::new(),
            &server.base_url(),
            &SecretString::from("iam-tok"),
        )
        .await
        .unwrap();

        assert_eq!(data["resources"], json!([{"name": "a"}, {"name": "b"}]));
        first.assert_calls_async(1).await;
        second.assert_calls_async(1).await;
    }

    #[test]
    fn trailing_slash_in_base_url_is_ignored() {
        let request = resource_instances_request(
            "https://resource-controller.cloud.ibm.com/",
            &SecretString::from("t"),
        )
        .unwrap();
        assert_eq!(
            request.url().as_str(),
            "https://resource-controller.cloud.ibm.com/v2/resource_instances"
        );
    }

    #[test]
    fn bearer_token_is_not_in_debug_output() {
        let request =
            resource_instances_request("https://rc.example.com", &SecretString::from("iam-tok"))
                .unwrap();
        assert!(!format!("{:?}", request).contains("iam-tok"));
    }

    #[test]
    fn finds_first_matching_instance_endpoint() {
        assert_eq!(
            find_instance(&collection(), "Cloudant")
                .and_then(public_endpoint)
                .as_deref(),
            Some("https://foo.example.com")
        );
    }

    #[test]
    fn unknown_name_has_no_endpoint() {
        assert!(find_instance(&collection(), "Nope").is_none());
        assert!(find_instance(&json!({"resources": []}), "Cloudant").is_none());
        assert!(find_instance(&json!({"errorCode": "x"}), "Cloudant").is_none());
    }

    #[test]
    fn instance_without_endpoints_has_no_endpoint() {
        let collection = collection();
        let instance = find_instance(&collection, "cos-instance").unwrap();
        assert!(public_endpoint(instance).is_none());
    }
}
