//! The seam between the reconciliation engine and the Scaleway API.
//!
//! Every resource kind talks to Scaleway through [`ScalewayApi`], a small
//! REST-shaped trait. [`crate::http::HttpApi`] implements it over HTTPS;
//! [`crate::testing::FakeScaleway`] implements it in memory.

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::locality::Locality;

/// Classification of an API failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiErrorKind {
    /// 404.
    NotFound,
    /// 409.
    Conflict,
    /// 429.
    TooManyRequests,
    /// 401 or 403.
    Permission,
    /// Connection, DNS or TLS failure; no HTTP status.
    Transport,
    /// Any other non-2xx response.
    Api,
}

/// An error returned by a [`ScalewayApi`] call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{}{message}", status_prefix(.status))]
pub struct ApiError {
    /// The HTTP status, if a response was received.
    pub status: Option<u16>,
    /// The classification of the failure.
    pub kind: ApiErrorKind,
    /// The server message, already sanitized.
    pub message: String,
}

fn status_prefix(status: &Option<u16>) -> String {
    match status {
        Some(status) => format!("status {}: ", status),
        None => String::new(),
    }
}

impl ApiError {
    /// Create a new API error.
    pub fn new(status: Option<u16>, kind: ApiErrorKind, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
        }
    }

    /// Classify an HTTP status code.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let kind = match status {
            404 => ApiErrorKind::NotFound,
            409 => ApiErrorKind::Conflict,
            429 => ApiErrorKind::TooManyRequests,
            401 | 403 => ApiErrorKind::Permission,
            _ => ApiErrorKind::Api,
        };
        Self::new(Some(status), kind, message)
    }

    /// A 404 error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::from_status(404, message)
    }

    /// A 409 error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::from_status(409, message)
    }

    /// A 403 error.
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::from_status(403, message)
    }

    /// A transport-level error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(None, ApiErrorKind::Transport, message)
    }

    /// Whether the server said the resource does not exist.
    pub fn is_not_found(&self) -> bool {
        self.kind == ApiErrorKind::NotFound
    }

    /// Whether the server refused access.
    pub fn is_forbidden(&self) -> bool {
        self.kind == ApiErrorKind::Permission && self.status == Some(403)
    }

    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            ApiErrorKind::Transport | ApiErrorKind::TooManyRequests
        ) || matches!(self.status, Some(502..=504))
    }
}

/// Where an API call goes.
///
/// Paths are built as
/// `/<product>/<zones|regions>/<locality>[/<parent collection>/<parent id>]/<collection>[/<id>]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiTarget {
    /// Product and version, such as `instance/v1`.
    pub product: &'static str,
    /// Collection name, such as `ips`.
    pub collection: &'static str,
    /// Key wrapping single objects in responses, such as `ip`.
    pub envelope: Option<&'static str>,
    /// Where the resource lives.
    pub locality: Locality,
    /// Parent collection and bare parent id.
    pub parent: Option<(&'static str, String)>,
    /// Bare resource id.
    pub id: Option<String>,
}

impl ApiTarget {
    /// Target a collection.
    pub fn new(product: &'static str, collection: &'static str, locality: Locality) -> Self {
        Self {
            product,
            collection,
            envelope: None,
            locality,
            parent: None,
            id: None,
        }
    }

    /// Set the response envelope key.
    pub fn with_envelope(mut self, envelope: Option<&'static str>) -> Self {
        self.envelope = envelope;
        self
    }

    /// Nest the collection under a parent resource.
    pub fn with_parent(mut self, collection: &'static str, id: impl Into<String>) -> Self {
        self.parent = Some((collection, id.into()));
        self
    }

    /// Target a single resource.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// The URL path of this target.
    pub fn path(&self) -> String {
        let mut path = format!("/{}", self.product);
        match &self.locality {
            Locality::Zone(zone) => {
                path.push_str("/zones/");
                path.push_str(zone.as_str());
            }
            Locality::Region(region) => {
                path.push_str("/regions/");
                path.push_str(region.as_str());
            }
            Locality::Global => {}
        }
        if let Some((collection, id)) = &self.parent {
            path.push('/');
            path.push_str(collection);
            path.push('/');
            path.push_str(id);
        }
        path.push('/');
        path.push_str(self.collection);
        if let Some(id) = &self.id {
            path.push('/');
            path.push_str(id);
        }
        path
    }
}

impl fmt::Display for ApiTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

/// REST-shaped access to Scaleway products.
///
/// Single-object responses are returned unwrapped from their envelope.
#[async_trait]
pub trait ScalewayApi: Send + Sync {
    /// Create a resource.
    ///
    /// With `target.id` set the resource is created under that id (PUT),
    /// otherwise the server assigns one (POST to the collection).
    async fn create(&self, target: &ApiTarget, body: Value) -> Result<Value, ApiError>;

    /// Fetch a resource.
    async fn get(&self, target: &ApiTarget) -> Result<Value, ApiError>;

    /// Patch a resource.
    async fn update(&self, target: &ApiTarget, body: Value) -> Result<Value, ApiError>;

    /// Delete a resource.
    async fn delete(&self, target: &ApiTarget) -> Result<(), ApiError>;

    /// POST to a sub-path of a resource, such as `/servers/<id>/action`.
    async fn action(&self, target: &ApiTarget, action: &str, body: Value)
        -> Result<Value, ApiError>;

    /// List every resource of a collection, following pagination.
    async fn list(&self, target: &ApiTarget) -> Result<Vec<Value>, ApiError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locality::{Region, Zone};

    #[test]
    fn test_target_paths() {
        let zone = Locality::Zone(Zone::parse("fr-par-1").unwrap());
        let target = ApiTarget::new("instance/v1", "ips", zone.clone()).with_id("abc");
        assert_eq!(target.path(), "/instance/v1/zones/fr-par-1/ips/abc");

        let nested = ApiTarget::new("instance/v1", "private_nics", zone)
            .with_parent("servers", "srv")
            .with_id("nic");
        assert_eq!(
            nested.path(),
            "/instance/v1/zones/fr-par-1/servers/srv/private_nics/nic"
        );

        let regional = ApiTarget::new(
            "k8s/v1",
            "clusters",
            Locality::Region(Region::parse("nl-ams").unwrap()),
        );
        assert_eq!(regional.path(), "/k8s/v1/regions/nl-ams/clusters");

        let global = ApiTarget::new("iam/v1alpha1", "ssh-keys", Locality::Global).with_id("k");
        assert_eq!(global.path(), "/iam/v1alpha1/ssh-keys/k");
    }

    #[test]
    fn test_status_classification() {
        assert!(ApiError::from_status(404, "x").is_not_found());
        assert_eq!(ApiError::from_status(409, "x").kind, ApiErrorKind::Conflict);
        assert!(ApiError::from_status(429, "x").is_transient());
        assert!(ApiError::from_status(503, "x").is_transient());
        assert!(!ApiError::from_status(500, "x").is_transient());
        assert!(ApiError::from_status(403, "x").is_forbidden());
        assert!(!ApiError::from_status(401, "x").is_forbidden());
        assert!(ApiError::transport("reset").is_transient());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            ApiError::not_found("ip not found").to_string(),
            "status 404: ip not found"
        );
        assert_eq!(ApiError::transport("dns").to_string(), "dns");
    }
}
