//! Scaleway provider plugin: the resource lifecycle and reconciliation
//! engine behind Scaleway infrastructure-as-code resources.
//!
//! # Overview
//!
//! A host runtime spawns the plugin, reads the handshake line on stdout
//! and drives it over gRPC. Every resource kind is declared as a
//! [`ResourceDescriptor`](resource::ResourceDescriptor) and goes through the
//! same engine:
//!
//! - **Locality codec** ([`locality`]): zones, regions and the
//!   `<locality>/<id>` composite identifiers stored in state
//! - **Schema registry** ([`schema`], [`resource`], [`resources`]):
//!   attribute flags, validators and diff-suppression per kind
//! - **CRUD dispatcher** ([`dispatcher`]): validate, build the request,
//!   call the API, wait, read back
//! - **Wait/poll engine** ([`wait`]): exponential polling until a terminal
//!   status, a failure status, the deadline or cancellation
//! - **Planner** ([`planner`]): change ordering, power-state transitions
//!   and grow-only rules
//! - **Policy documents** ([`policy`]), **naming** ([`naming`]) and
//!   **sweepers** ([`sweeper`])
//!
//! [`ScalewayProvider`] ties these to the host protocol in [`server`].
//!
//! # Handshake Protocol
//!
//! When started via [`serve`], the plugin prints:
//!
//! ```text
//! SCALEWAY_PROVIDER|1|127.0.0.1:50051
//! ```
//!
//! Format: `SCALEWAY_PROVIDER|<protocol_version>|<address>`. Logs go to
//! stderr.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use scaleway_provider::testing::{FakeScaleway, ProviderTester};
//! use scaleway_provider::{ProviderConfig, ScalewayProvider};
//! use serde_json::json;
//!
//! let fake = Arc::new(FakeScaleway::new());
//! let tester = ProviderTester::new(ScalewayProvider::with_api(fake, config));
//! let ip = tester
//!     .lifecycle_create("scaleway_instance_ip", json!({"type": "routed_ipv4"}))
//!     .await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod config;
pub mod context;
pub mod diff;
pub mod dispatcher;
pub mod error;
pub mod http;
pub mod locality;
pub mod lock;
pub mod logging;
pub mod mapping;
pub mod naming;
pub mod panic;
pub mod planner;
pub mod policy;
pub mod provider;
pub mod resource;
pub mod resources;
pub mod retry;
pub mod schema;
pub mod server;
pub mod suppress;
pub mod sweeper;
pub mod testing;
pub mod types;
pub mod upgrade;
pub mod validation;
pub mod wait;

#[allow(missing_docs)]
#[allow(clippy::all)]
pub mod generated;

pub use api::{ApiError, ApiErrorKind, ApiTarget, ScalewayApi};
pub use config::{ConfigSources, ProviderConfig};
pub use error::{ErrorKind, ProviderError};
pub use http::HttpApi;
pub use locality::{Locality, LocalityKind, Region, Zone};
pub use logging::{init_logging, init_logging_with_default, try_init_logging};
pub use provider::ScalewayProvider;
pub use resource::{DataSource, Resource, ResourceDescriptor, ResourceRegistry};
pub use schema::ProviderSchema;
pub use server::{
    serve, serve_on, serve_on_with_options, serve_with_options, ProviderService, ServeOptions,
};
pub use types::{
    AttributeChange, ImportedResource, PlanResult, ProviderMetadata, ServerCapabilities,
    HANDSHAKE_PREFIX, PROTOCOL_VERSION,
};
pub use validation::validate;

pub use async_trait::async_trait;
pub use serde_json;
pub use tonic;
pub use tracing;
