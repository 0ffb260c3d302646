//! Generated resource names.

use std::sync::atomic::{AtomicU32, Ordering};

use chrono::Utc;
use uuid::Uuid;

use crate::error::ProviderError;

/// Prefix of names generated when a resource has none.
pub const GENERATED_PREFIX: &str = "tf";

/// Suffix every FIFO queue name carries.
pub const FIFO_SUFFIX: &str = ".fifo";

/// Longest queue name the messaging API accepts.
pub const MAX_QUEUE_NAME_LEN: usize = 80;

static COUNTER: AtomicU32 = AtomicU32::new(0);

/// `prefix` followed by a UTC timestamp and a process-wide counter.
///
/// Names generated by one process sort in creation order and never
/// collide.
pub fn prefixed_unique_id(prefix: &str) -> String {
    let now = Utc::now();
    let counter = COUNTER.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
    format!(
        "{}{}{:04}{:08x}",
        prefix,
        now.format("%Y%m%d%H%M%S"),
        now.timestamp_subsec_nanos() / 100_000,
        counter
    )
}

/// A random name of the form `tf-<short>-<suffix>`.
pub fn random_name(short: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}-{}", GENERATED_PREFIX, short, &suffix[..8])
}

/// The name of a messaging queue.
///
/// An explicit `name` wins; otherwise a unique name is derived from
/// `prefix`. FIFO queues must end in `.fifo` and standard queues must not.
pub fn queue_name(
    name: Option<&str>,
    prefix: Option<&str>,
    fifo: bool,
) -> Result<String, ProviderError> {
    let name = match (name.filter(|n| !n.is_empty()), prefix.filter(|p| !p.is_empty())) {
        (Some(name), _) => {
            if fifo && !name.ends_with(FIFO_SUFFIX) {
                return Err(ProviderError::Validation(format!(
                    "FIFO queue name {:?} must end with {}",
                    name, FIFO_SUFFIX
                )));
            }
            if !fifo && name.ends_with(FIFO_SUFFIX) {
                return Err(ProviderError::Validation(format!(
                    "queue name {:?} ends with {} but the queue is not FIFO",
                    name, FIFO_SUFFIX
                )));
            }
            name.to_string()
        },
        (None, prefix) => {
            let mut name = prefixed_unique_id(prefix.unwrap_or("tf-"));
            if fifo {
                name.push_str(FIFO_SUFFIX);
            }
            name
        },
    };

    let base = name.strip_suffix(FIFO_SUFFIX).unwrap_or(&name);
    if name.len() > MAX_QUEUE_NAME_LEN {
        return Err(ProviderError::Validation(format!(
            "queue name {:?} is longer than {} characters",
            name, MAX_QUEUE_NAME_LEN
        )));
    }
    if !base
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ProviderError::Validation(format!(
            "queue name {:?} may only contain alphanumerics, hyphens and underscores",
            name
        )));
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixed_unique_id() {
        let a = prefixed_unique_id("tf-");
        let b = prefixed_unique_id("tf-");
        assert!(a.starts_with("tf-"));
        assert_eq!(a.len(), "tf-".len() + 14 + 4 + 8);
        assert_ne!(a, b);
    }

    #[test]
    fn test_random_name() {
        let name = random_name("ip");
        assert!(name.starts_with("tf-ip-"));
        assert_eq!(name.len(), "tf-ip-".len() + 8);
    }

    #[test]
    fn test_queue_name_explicit() {
        assert_eq!(queue_name(Some("jobs"), None, false).unwrap(), "jobs");
        assert_eq!(queue_name(Some("jobs.fifo"), Some("x"), true).unwrap(), "jobs.fifo");
        assert!(queue_name(Some("jobs"), None, true).is_err());
        assert!(queue_name(Some("jobs.fifo"), None, false).is_err());
        assert!(queue_name(Some("bad name"), None, false).is_err());
    }

    #[test]
    fn test_queue_name_from_prefix() {
        let name = queue_name(None, Some("tf_tests_"), true).unwrap();
        assert!(name.starts_with("tf_tests_"));
        assert!(name.ends_with(".fifo"));

        let generated = queue_name(None, None, false).unwrap();
        assert!(generated.starts_with("tf-"));
    }

    #[test]
    fn test_queue_name_too_long() {
        let prefix = "p".repeat(MAX_QUEUE_NAME_LEN);
        assert!(queue_name(None, Some(&prefix), false).is_err());
    }
}
