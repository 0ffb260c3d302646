//! Test-resource sweepers.
//!
//! Acceptance tests leave resources behind when they fail halfway. A
//! sweep lists every sweepable resource kind in the given localities and
//! deletes the resources whose name starts with the test prefix. Kinds
//! are swept in ascending sweep order so that dependents (servers) go
//! before what they depend on (volumes, IPs). A failure on one resource
//! or kind is recorded and the sweep carries on.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::ProviderConfig;
use crate::context::{Operation, OperationContext, ProviderMeta};
use crate::locality::{Locality, LocalityKind, Region, Zone};
use crate::resource::ResourceRegistry;

/// Prefix of every resource created by acceptance tests.
pub const TEST_PREFIX: &str = "tf_tests_";

/// What one kind's sweep in one locality did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    /// Composite ids of deleted resources.
    pub deleted: Vec<String>,
    /// Composite ids that could not be deleted, with the error.
    pub failed: Vec<(String, String)>,
    /// Resources left alone because their name does not match.
    pub skipped: usize,
}

/// Where to sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepLocalities {
    /// Zones swept for zonal kinds.
    pub zones: Vec<Zone>,
    /// Regions swept for regional kinds.
    pub regions: Vec<Region>,
}

impl SweepLocalities {
    /// The provider's default zone and region.
    pub fn from_config(config: &ProviderConfig) -> Self {
        Self {
            zones: config.zone.iter().cloned().collect(),
            regions: config.effective_region().into_iter().collect(),
        }
    }

    fn for_kind(&self, kind: LocalityKind) -> Vec<Locality> {
        match kind {
            LocalityKind::Zonal => self.zones.iter().cloned().map(Locality::Zone).collect(),
            LocalityKind::Regional => self.regions.iter().cloned().map(Locality::Region).collect(),
            LocalityKind::Global => vec![Locality::Global],
        }
    }
}

/// One resource, or one whole kind, that could not be swept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepFailure {
    /// The resource kind.
    pub kind: String,
    /// Where the sweep ran.
    pub locality: String,
    /// The resource, when the failure is not a listing failure.
    pub id: Option<String>,
    /// The error.
    pub message: String,
}

impl fmt::Display for SweepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.id {
            Some(id) => write!(f, "{} {}: {}", self.kind, id, self.message),
            None => write!(f, "{} in {}: {}", self.kind, self.locality, self.message),
        }
    }
}

/// Summary of a successful sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepSummary {
    /// `(kind, composite id)` of every deleted resource.
    pub deleted: Vec<(String, String)>,
    /// Number of resources left alone.
    pub skipped: usize,
}

/// Errors returned by [`sweep_all`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SweepError {
    /// Some resources could not be swept; the others were.
    #[error("{} sweep failure(s): {}", .failures.len(), join(.failures))]
    Incomplete {
        /// Everything that failed.
        failures: Vec<SweepFailure>,
        /// What was swept nonetheless.
        summary: SweepSummary,
    },
}

fn join(failures: &[SweepFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Sweep every sweepable kind of `registry`.
pub async fn sweep_all(
    registry: &ResourceRegistry,
    meta: Arc<ProviderMeta>,
    localities: &SweepLocalities,
    prefix: &str,
    cancel: &CancellationToken,
) -> Result<SweepSummary, SweepError> {
    let mut kinds: Vec<_> = registry
        .resources()
        .filter_map(|r| r.sweep_order().map(|order| (order, r.clone())))
        .collect();
    kinds.sort_by_key(|(order, r)| (*order, r.name()));

    let mut summary = SweepSummary::default();
    let mut failures = Vec::new();

    for (_, resource) in kinds {
        for locality in localities.for_kind(resource.locality_kind()) {
            let ctx = OperationContext::new(
                meta.clone(),
                resource.name(),
                Operation::Delete,
                resource.timeouts().delete,
                cancel.clone(),
            );
            match resource.sweep(&ctx, &locality, prefix).await {
                Ok(outcome) => {
                    summary.skipped += outcome.skipped;
                    summary.deleted.extend(
                        outcome
                            .deleted
                            .into_iter()
                            .map(|id| (resource.name().to_string(), id)),
                    );
                    failures.extend(outcome.failed.into_iter().map(|(id, message)| {
                        SweepFailure {
                            kind: resource.name().to_string(),
                            locality: locality.to_string(),
                            id: Some(id),
                            message,
                        }
                    }));
                },
                Err(err) => {
                    warn!(kind = resource.name(), %locality, error = %err, "sweeper failed");
                    failures.push(SweepFailure {
                        kind: resource.name().to_string(),
                        locality: locality.to_string(),
                        id: None,
                        message: err.to_string(),
                    });
                },
            }
        }
    }

    info!(
        deleted = summary.deleted.len(),
        skipped = summary.skipped,
        failed = failures.len(),
        "sweep finished"
    );
    if failures.is_empty() {
        Ok(summary)
    } else {
        Err(SweepError::Incomplete { failures, summary })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiError;
    use crate::testing::{FakeScaleway, Method};
    use serde_json::json;

    fn config() -> ProviderConfig {
        ProviderConfig {
            zone: Some(Zone::parse("fr-par-1").unwrap()),
            ..ProviderConfig::default()
        }
    }

    #[test]
    fn test_localities_from_config() {
        let localities = SweepLocalities::from_config(&config());
        assert_eq!(localities.zones.len(), 1);
        assert_eq!(localities.regions[0].as_str(), "fr-par");
        assert_eq!(localities.for_kind(LocalityKind::Global), vec![Locality::Global]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_do_not_stop_other_sweepers() {
        let fake = Arc::new(FakeScaleway::new());
        fake.seed("volumes", "fr-par-1", json!({"name": "tf_tests_volume"}));
        fake.seed("ssh-keys", "global", json!({"name": "tf_tests_key"}));
        fake.fail_next(Method::List, "volumes", ApiError::from_status(500, "unavailable"));

        let meta = Arc::new(ProviderMeta::new(fake.clone(), config()));
        let err = sweep_all(
            ResourceRegistry::builtin(),
            meta,
            &SweepLocalities::from_config(&config()),
            TEST_PREFIX,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        let SweepError::Incomplete { failures, summary } = err;
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].kind, "scaleway_block_volume");
        assert!(failures[0].id.is_none());
        assert!(summary
            .deleted
            .iter()
            .any(|(kind, _)| kind == "scaleway_iam_ssh_key"));
        assert!(fake.objects("ssh-keys").is_empty());
        assert_eq!(fake.objects("volumes").len(), 1);
    }
}
