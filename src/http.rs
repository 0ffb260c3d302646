//! [`ScalewayApi`] over HTTPS.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde_json::Value;
use tracing::{debug, warn};

use crate::api::{ApiError, ApiErrorKind, ApiTarget, ScalewayApi};
use crate::config::ProviderConfig;
use crate::error::ProviderError;

/// Header carrying the secret key.
pub const AUTH_HEADER: &str = "X-Auth-Token";

/// Items requested per page when listing.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Longest server message kept in an error.
const MAX_MESSAGE_LENGTH: usize = 200;

/// Upper bound on a single HTTP exchange; operation deadlines still apply.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// The real Scaleway API.
#[derive(Clone)]
pub struct HttpApi {
    client: Client,
    base_url: String,
    secret_key: String,
    page_size: usize,
}

impl std::fmt::Debug for HttpApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpApi")
            .field("base_url", &self.base_url)
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}

impl HttpApi {
    /// Build a client from a resolved configuration.
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let secret_key = config
            .secret_key
            .clone()
            .ok_or_else(|| ProviderError::Configuration("missing secret key".to_string()))?;
        let client = Client::builder()
            .user_agent(concat!("scaleway-provider/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::Configuration(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: config.api_url().to_string(),
            secret_key,
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    /// Change the page size used by [`ScalewayApi::list`].
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        debug!(%method, path, "scaleway request");
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .header(AUTH_HEADER, &self.secret_key)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Value, ApiError> {
        let response = request
            .send()
            .await
            .map_err(|e| ApiError::transport(self.sanitize(&e.to_string())))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::transport(self.sanitize(&e.to_string())))?;

        if !status.is_success() {
            let message = self.error_message(&body);
            warn!(status = status.as_u16(), %message, "scaleway API error");
            return Err(ApiError::from_status(status.as_u16(), message));
        }
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).map_err(|e| {
            ApiError::new(
                Some(status.as_u16()),
                ApiErrorKind::Api,
                format!("invalid response body: {}", e),
            )
        })
    }

    /// The server's `message` field, or the raw body, made safe to show.
    fn error_message(&self, body: &str) -> String {
        let message = serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| body.to_string());
        self.sanitize(&message)
    }

    fn sanitize(&self, message: &str) -> String {
        let cleaned: String = message
            .replace(&self.secret_key, "<redacted>")
            .chars()
            .filter(|c| !c.is_control())
            .collect();
        if cleaned.chars().count() > MAX_MESSAGE_LENGTH {
            let truncated: String = cleaned.chars().take(MAX_MESSAGE_LENGTH).collect();
            format!("{}... [truncated]", truncated)
        } else {
            cleaned
        }
    }
}

/// Strip the response envelope, such as `{"ip": {...}}`.
fn unwrap_envelope(target: &ApiTarget, value: Value) -> Value {
    match (target.envelope, value) {
        (Some(key), Value::Object(mut obj)) if obj.contains_key(key) => {
            obj.remove(key).unwrap_or(Value::Null)
        },
        (_, value) => value,
    }
}

/// The items of one page: the collection key, or else the first array.
fn page_items(target: &ApiTarget, page: Value) -> Vec<Value> {
    let Value::Object(mut obj) = page else {
        return Vec::new();
    };
    let key = target.collection.replace('-', "_");
    match obj.remove(&key) {
        Some(Value::Array(items)) => items,
        _ => obj
            .into_iter()
            .find_map(|(_, v)| match v {
                Value::Array(items) => Some(items),
                _ => None,
            })
            .unwrap_or_default(),
    }
}

#[async_trait]
impl ScalewayApi for HttpApi {
    async fn create(&self, target: &ApiTarget, body: Value) -> Result<Value, ApiError> {
        let method = if target.id.is_some() {
            Method::PUT
        } else {
            Method::POST
        };
        let value = self
            .send(self.request(method, &target.path()).json(&body))
            .await?;
        Ok(unwrap_envelope(target, value))
    }

    async fn get(&self, target: &ApiTarget) -> Result<Value, ApiError> {
        let value = self.send(self.request(Method::GET, &target.path())).await?;
        Ok(unwrap_envelope(target, value))
    }

    async fn update(&self, target: &ApiTarget, body: Value) -> Result<Value, ApiError> {
        let value = self
            .send(self.request(Method::PATCH, &target.path()).json(&body))
            .await?;
        Ok(unwrap_envelope(target, value))
    }

    async fn delete(&self, target: &ApiTarget) -> Result<(), ApiError> {
        self.send(self.request(Method::DELETE, &target.path()))
            .await
            .map(|_| ())
    }

    async fn action(
        &self,
        target: &ApiTarget,
        action: &str,
        body: Value,
    ) -> Result<Value, ApiError> {
        let path = format!("{}/{}", target.path(), action);
        let value = self
            .send(self.request(Method::POST, &path).json(&body))
            .await?;
        Ok(unwrap_envelope(target, value))
    }

    async fn list(&self, target: &ApiTarget) -> Result<Vec<Value>, ApiError> {
        let path = target.path();
        let mut all = Vec::new();
        let mut page = 1usize;
        loop {
            let response = self
                .send(self.request(Method::GET, &path).query(&[
                    ("page", page.to_string()),
                    ("per_page", self.page_size.to_string()),
                ]))
                .await?;
            let total = response.get("total_count").and_then(Value::as_u64);
            let items = page_items(target, response);
            let fetched = items.len();
            all.extend(items);

            let done = match total {
                Some(total) => all.len() as u64 >= total || fetched == 0,
                None => fetched < self.page_size,
            };
            if done {
                return Ok(all);
            }
            page += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locality::Locality;
    use serde_json::json;

    fn api() -> HttpApi {
        HttpApi::new(&ProviderConfig {
            secret_key: Some("11111111-1111-1111-1111-111111111111".to_string()),
            ..ProviderConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_missing_secret_is_a_configuration_error() {
        let err = HttpApi::new(&ProviderConfig::default()).unwrap_err();
        assert!(matches!(err, ProviderError::Configuration(_)));
    }

    #[test]
    fn test_unwrap_envelope() {
        let target = ApiTarget::new("instance/v1", "ips", Locality::Global).with_envelope(Some("ip"));
        assert_eq!(
            unwrap_envelope(&target, json!({"ip": {"id": "a"}})),
            json!({"id": "a"})
        );
        assert_eq!(unwrap_envelope(&target, json!({"id": "b"})), json!({"id": "b"}));
    }

    #[test]
    fn test_page_items_by_collection_key() {
        let target = ApiTarget::new("iam/v1alpha1", "ssh-keys", Locality::Global);
        let page = json!({"total_count": 1, "ssh_keys": [{"id": "k"}]});
        assert_eq!(page_items(&target, page), vec![json!({"id": "k"})]);

        let odd = json!({"total_count": 1, "keys": [{"id": "k"}]});
        assert_eq!(page_items(&target, odd).len(), 1);
    }

    #[test]
    fn test_error_message_is_sanitized() {
        let api = api();
        let body = json!({
            "message": "bad token 11111111-1111-1111-1111-111111111111",
            "type": "denied_authentication",
        })
        .to_string();
        let message = api.error_message(&body);
        assert_eq!(message, "bad token <redacted>");

        let long = "x".repeat(500);
        let message = api.error_message(&long);
        assert!(message.ends_with("[truncated]"));
        assert!(message.len() < 300);
    }

    #[test]
    fn test_debug_hides_secret() {
        assert!(!format!("{:?}", api()).contains("11111111"));
    }
}
