//! Secret Manager: secret versions.

use serde_json::{json, Value};

use crate::error::ProviderError;
use crate::locality::LocalityKind;
use crate::resource::{Endpoint, IdScheme, ResourceDescriptor, StateMachine};
use crate::schema::{Attribute, DiffSuppress, Schema, Validator};
use crate::upgrade::StateUpgrader;

use super::{id, region};

const VERSION_STATES: StateMachine = StateMachine {
    field: "status",
    transitional: &["unknown"],
    terminal: &[],
    failure: &[],
    deleted: &["destroyed"],
    async_delete: false,
};

const UPGRADERS: &[StateUpgrader] = &[upgrade_v0];

/// `scaleway_secret_version`, identified by
/// `<region>/<secret_id>/<revision>`.
///
/// `data` is never returned by the API; state keeps what was sent.
pub fn version() -> ResourceDescriptor {
    let schema = Schema::new(1)
        .with_attribute("id", id())
        .with_attribute(
            "secret_id",
            Attribute::required_string().with_force_new().id_reference(),
        )
        .with_attribute(
            "data",
            Attribute::required_string()
                .with_force_new()
                .sensitive()
                .write_only()
                .with_validator(Validator::Base64)
                .with_diff_suppress(DiffSuppress::Base64),
        )
        .with_attribute("description", Attribute::optional_string())
        .with_attribute("revision", Attribute::computed_int64())
        .with_attribute("status", Attribute::computed_string())
        .with_attribute("created_at", Attribute::computed_string())
        .with_attribute("region", region());

    ResourceDescriptor::new(
        "scaleway_secret_version",
        LocalityKind::Regional,
        Endpoint::new("secret-manager/v1beta1", "versions")
            .parent("secrets", "secret_id")
            .id_field("revision"),
        schema,
    )
    .with_id(IdScheme::Nested)
    .with_states(VERSION_STATES)
    .with_upgraders(UPGRADERS)
    .lock_on(&["secret_id"])
}

/// Version 0 stored `secret_id` as a bare UUID.
fn upgrade_v0(mut state: Value) -> Result<Value, ProviderError> {
    let region = state
        .get("region")
        .and_then(Value::as_str)
        .filter(|r| !r.is_empty())
        .or_else(|| {
            state
                .get("id")
                .and_then(Value::as_str)
                .and_then(|id| id.split('/').next())
        })
        .map(str::to_string);

    let Some(obj) = state.as_object_mut() else {
        return Err(ProviderError::Validation(
            "secret version state must be an object".to_string(),
        ));
    };
    let bare = obj
        .get("secret_id")
        .and_then(Value::as_str)
        .filter(|id| !id.contains('/'))
        .map(str::to_string);
    if let (Some(bare), Some(region)) = (bare, region) {
        obj.insert("secret_id".to_string(), json!(format!("{}/{}", region, bare)));
    }
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upgrade::upgrade_state;

    #[test]
    fn test_upgrade_v0_makes_secret_id_regional() {
        let v0 = json!({
            "id": "fr-par/11111111-1111-1111-1111-111111111111/2",
            "secret_id": "11111111-1111-1111-1111-111111111111",
            "data": "aGVsbG8=",
        });
        let v1 = upgrade_state(UPGRADERS, 0, 1, v0).unwrap();
        assert_eq!(v1["secret_id"], "fr-par/11111111-1111-1111-1111-111111111111");
        assert_eq!(v1["data"], "aGVsbG8=");

        let current = json!({"secret_id": "nl-ams/22222222-2222-2222-2222-222222222222"});
        assert_eq!(upgrade_state(UPGRADERS, 1, 1, current.clone()).unwrap(), current);
    }

    #[test]
    fn test_data_is_compared_decoded() {
        let version = version();
        let data = version.schema.attribute("data").unwrap();
        assert!(data.flags.sensitive);
        assert!(data.write_only);
        assert_eq!(data.diff_suppress, Some(DiffSuppress::Base64));
    }
}
