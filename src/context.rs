//! Per-operation context: deadline, cancellation and provider handles.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::api::{ApiError, ScalewayApi};
use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::lock::LockTable;
use crate::retry::RetryPolicy;

/// The host callback being served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Create a resource.
    Create,
    /// Refresh a resource.
    Read,
    /// Update a resource in place.
    Update,
    /// Delete a resource.
    Delete,
    /// Import an existing resource.
    Import,
    /// Compute a plan.
    Plan,
    /// Read a data source.
    ReadDataSource,
    /// Delete leftover test resources.
    Sweep,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Import => "import",
            Self::Plan => "plan",
            Self::ReadDataSource => "read data source",
            Self::Sweep => "sweep",
        })
    }
}

/// Per-phase timeouts of a resource kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Create, including waits.
    pub create: Duration,
    /// Read.
    pub read: Duration,
    /// Update, including every planner step.
    pub update: Duration,
    /// Delete, including the wait for the resource to vanish.
    pub delete: Duration,
}

impl Timeouts {
    /// Lightweight resources.
    pub const DEFAULT: Duration = Duration::from_secs(5 * 60);
    /// Large resources such as Kubernetes clusters.
    pub const LARGE: Duration = Duration::from_secs(30 * 60);

    /// The same timeout for every phase.
    pub const fn uniform(timeout: Duration) -> Self {
        Self {
            create: timeout,
            read: timeout,
            update: timeout,
            delete: timeout,
        }
    }

    /// Timeouts for large resources.
    pub const fn large() -> Self {
        Self::uniform(Self::LARGE)
    }

    /// The timeout of an operation.
    pub fn for_operation(&self, operation: Operation) -> Duration {
        match operation {
            Operation::Create => self.create,
            Operation::Update => self.update,
            Operation::Delete | Operation::Sweep => self.delete,
            Operation::Read | Operation::Import | Operation::Plan | Operation::ReadDataSource => {
                self.read
            },
        }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self::uniform(Self::DEFAULT)
    }
}

/// Everything a configured provider shares between operations.
pub struct ProviderMeta {
    /// The Scaleway API.
    pub api: Arc<dyn ScalewayApi>,
    /// Resolved provider configuration.
    pub config: ProviderConfig,
    /// Per-resource locks.
    pub locks: Arc<LockTable>,
    /// Retry policy for transient API errors.
    pub retry: RetryPolicy,
}

impl ProviderMeta {
    /// Create provider state with a fresh lock table.
    pub fn new(api: Arc<dyn ScalewayApi>, config: ProviderConfig) -> Self {
        Self {
            api,
            config,
            locks: Arc::new(LockTable::new()),
            retry: RetryPolicy::default(),
        }
    }

    /// Share an existing lock table.
    pub fn with_locks(mut self, locks: Arc<LockTable>) -> Self {
        self.locks = locks;
        self
    }

    /// Use a different retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

impl fmt::Debug for ProviderMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderMeta")
            .field("config", &self.config)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

/// One CRUD callback in flight.
#[derive(Debug, Clone)]
pub struct OperationContext {
    /// Provider state.
    pub meta: Arc<ProviderMeta>,
    /// The callback being served.
    pub operation: Operation,
    /// The resource kind.
    pub resource_kind: &'static str,
    /// When the operation must give up.
    pub deadline: Instant,
    /// Cancelled when the host stops the provider.
    pub cancel: CancellationToken,
}

impl OperationContext {
    /// Start an operation with the given timeout.
    pub fn new(
        meta: Arc<ProviderMeta>,
        resource_kind: &'static str,
        operation: Operation,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            meta,
            operation,
            resource_kind,
            deadline: Instant::now() + timeout,
            cancel,
        }
    }

    /// The API handle.
    pub fn api(&self) -> &dyn ScalewayApi {
        self.meta.api.as_ref()
    }

    /// The provider configuration.
    pub fn config(&self) -> &ProviderConfig {
        &self.meta.config
    }

    /// Fail if the operation was cancelled or ran out of time.
    pub fn check(&self, what: &str) -> Result<(), ProviderError> {
        if self.cancel.is_cancelled() {
            return Err(ProviderError::Cancelled(format!("before {}", what)));
        }
        if Instant::now() >= self.deadline {
            return Err(ProviderError::Timeout(format!("deadline passed before {}", what)));
        }
        Ok(())
    }

    /// Run `fut` unless the operation is cancelled or times out first.
    pub async fn guard<T, Fut>(&self, what: &str, fut: Fut) -> Result<T, ProviderError>
    where
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        self.check(what)?;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ProviderError::Cancelled(format!("while {}", what))),
            _ = tokio::time::sleep_until(self.deadline) => Err(ProviderError::Timeout(format!(
                "deadline exceeded while {}",
                what
            ))),
            result = fut => result,
        }
    }

    /// Run a single API call under this operation's deadline and cancellation.
    pub async fn call<T, Fut>(&self, what: &str, fut: Fut) -> Result<T, ProviderError>
    where
        Fut: Future<Output = Result<T, ApiError>>,
    {
        self.guard(what, async { fut.await.map_err(ProviderError::from) })
            .await
    }
}
