//! Semantic equality of attribute values.
//!
//! A [`DiffSuppress`] rule decides that two textually different values
//! mean the same thing, so the diff does not report a change.

use base64::Engine;
use serde_json::Value;

use crate::locality::{expand_id, id_locality};
use crate::policy;
use crate::schema::DiffSuppress;

/// Whether `old` and `new` are equal under `rule`.
///
/// Non-string values are never suppressed.
pub fn equivalent(rule: DiffSuppress, old: &Value, new: &Value) -> bool {
    let (Some(old), Some(new)) = (old.as_str(), new.as_str()) else {
        return false;
    };
    if old == new {
        return true;
    }
    match rule {
        DiffSuppress::Locality => same_resource(old, new),
        DiffSuppress::PolicyDocument => policy::equivalent(old, new),
        DiffSuppress::SshKey => ssh_key_body(old) == ssh_key_body(new),
        DiffSuppress::Base64 => match (decode(old), decode(new)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
        DiffSuppress::IgnoreCase => old.eq_ignore_ascii_case(new),
    }
}

/// `fr-par-1/<uuid>` and `<uuid>` name the same resource; two composite
/// ids only match when their localities match too.
fn same_resource(old: &str, new: &str) -> bool {
    let (Ok(old_id), Ok(new_id)) = (expand_id(old), expand_id(new)) else {
        return false;
    };
    if old_id != new_id {
        return false;
    }
    match (id_locality(old), id_locality(new)) {
        (Ok(Some(a)), Ok(Some(b))) => a == b,
        (Ok(_), Ok(_)) => true,
        _ => false,
    }
}

/// Algorithm and key material, without the comment.
fn ssh_key_body(key: &str) -> Option<(&str, &str)> {
    let mut fields = key.split_whitespace();
    Some((fields.next()?, fields.next()?))
}

fn decode(value: &str) -> Option<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(value.trim())
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ID: &str = "11111111-1111-1111-1111-111111111111";

    #[test]
    fn test_locality_suppression() {
        let zoned = json!(format!("fr-par-1/{}", ID));
        assert!(equivalent(DiffSuppress::Locality, &zoned, &json!(ID)));
        assert!(equivalent(DiffSuppress::Locality, &json!(ID), &zoned));
        assert!(!equivalent(
            DiffSuppress::Locality,
            &zoned,
            &json!(format!("nl-ams-1/{}", ID))
        ));
        assert!(!equivalent(
            DiffSuppress::Locality,
            &zoned,
            &json!("fr-par-1/22222222-2222-2222-2222-222222222222")
        ));
    }

    #[test]
    fn test_policy_suppression() {
        let a = json!(r#"{"Version":"2012-10-17","Statement":[{"Sid":"a","Effect":"Allow","Action":["x"]}]}"#);
        let b = json!("{\n  \"Statement\": {\"Action\": \"x\", \"Effect\": \"Allow\", \"Sid\": \"a\"},\n  \"Version\": \"2012-10-17\"\n}");
        assert!(equivalent(DiffSuppress::PolicyDocument, &a, &b));
    }

    #[test]
    fn test_ssh_key_suppression() {
        let key = json!("ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIEFH alice@laptop");
        assert!(equivalent(
            DiffSuppress::SshKey,
            &key,
            &json!("\nssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIEFH\n")
        ));
        assert!(!equivalent(
            DiffSuppress::SshKey,
            &key,
            &json!("ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIEFI alice@laptop")
        ));
    }

    #[test]
    fn test_base64_suppression() {
        assert!(equivalent(
            DiffSuppress::Base64,
            &json!("aGVsbG8="),
            &json!("aGVsbG8=\n")
        ));
        assert!(!equivalent(
            DiffSuppress::Base64,
            &json!("aGVsbG8="),
            &json!("d29ybGQ=")
        ));
    }

    #[test]
    fn test_non_strings_never_suppressed() {
        assert!(!equivalent(DiffSuppress::IgnoreCase, &json!(1), &json!(2)));
        assert!(equivalent(DiffSuppress::IgnoreCase, &json!("Allow"), &json!("allow")));
    }
}
