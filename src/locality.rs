//! Localities and composite identifiers.
//!
//! Every Scaleway resource lives in a zone (`fr-par-1`), a region (`fr-par`)
//! or nowhere in particular (IAM objects). The identifier stored in state
//! carries that locality in front of the resource id:
//!
//! ```text
//! fr-par-1/11111111-1111-1111-1111-111111111111                 zoned
//! fr-par/11111111-1111-1111-1111-111111111111                   regional
//! fr-par-1/<parent-uuid>/<child-uuid>                           nested
//! ```
//!
//! A bare UUID is accepted wherever a composite id is, and picks up the
//! default locality of the caller.
//!
//! # Example
//!
//! ```
//! use scaleway_provider::locality::{format_zoned, parse_zoned, Zone};
//!
//! let zone = Zone::parse("fr-par-1").unwrap();
//! let id = format_zoned(&zone, "11111111-1111-1111-1111-111111111111");
//! assert_eq!(id, "fr-par-1/11111111-1111-1111-1111-111111111111");
//!
//! let parsed = parse_zoned(&id, None).unwrap();
//! assert_eq!(parsed.zone, zone);
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::ProviderConfig;

/// Errors raised while parsing localities and composite identifiers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LocalityError {
    /// The value is neither a bare UUID nor a well-formed composite id.
    #[error("malformed id {value:?}: {reason}")]
    MalformedId {
        /// The offending input.
        value: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The locality embedded in the id is not of the expected kind.
    #[error("expected a {expected} locality, got {found:?}")]
    WrongLocalityKind {
        /// The locality kind the caller asked for.
        expected: LocalityKind,
        /// The locality string that was found.
        found: String,
    },

    /// No locality on the resource and no provider default either.
    #[error("no {kind} set on the resource and no provider default configured")]
    MissingLocality {
        /// The locality kind that could not be resolved.
        kind: LocalityKind,
    },

    /// The id's locality and the resource's zone/region field disagree.
    #[error("locality mismatch: id is in {from_id:?} but the resource field says {from_field:?}")]
    Mismatch {
        /// Locality taken from the composite id.
        from_id: String,
        /// Locality taken from the `zone`/`region` attribute.
        from_field: String,
    },
}

/// How a resource kind is scoped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalityKind {
    /// Scoped to an availability zone.
    Zonal,
    /// Scoped to a region.
    Regional,
    /// Not scoped at all.
    Global,
}

impl LocalityKind {
    /// The state attribute that carries this locality, if any.
    pub fn field(self) -> Option<&'static str> {
        match self {
            Self::Zonal => Some("zone"),
            Self::Regional => Some("region"),
            Self::Global => None,
        }
    }
}

impl fmt::Display for LocalityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Zonal => f.write_str("zone"),
            Self::Regional => f.write_str("region"),
            Self::Global => f.write_str("global"),
        }
    }
}

/// A Scaleway region such as `fr-par`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Region(String);

impl Region {
    /// Parse a region of the form `<country>-<city>`.
    pub fn parse(value: &str) -> Result<Self, LocalityError> {
        if is_region(value) {
            Ok(Self(value.to_string()))
        } else {
            Err(LocalityError::WrongLocalityKind {
                expected: LocalityKind::Regional,
                found: value.to_string(),
            })
        }
    }

    /// The region as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `zone` belongs to this region.
    pub fn contains(&self, zone: &Zone) -> bool {
        zone.region() == *self
    }
}

impl TryFrom<String> for Region {
    type Error = LocalityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Region> for String {
    fn from(region: Region) -> Self {
        region.0
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A Scaleway availability zone such as `fr-par-1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Zone(String);

impl Zone {
    /// Parse a zone of the form `<region>-<number>`.
    pub fn parse(value: &str) -> Result<Self, LocalityError> {
        if is_zone(value) {
            Ok(Self(value.to_string()))
        } else {
            Err(LocalityError::WrongLocalityKind {
                expected: LocalityKind::Zonal,
                found: value.to_string(),
            })
        }
    }

    /// The zone as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The region this zone belongs to.
    pub fn region(&self) -> Region {
        let cut = self.0.rfind('-').unwrap_or(self.0.len());
        Region(self.0[..cut].to_string())
    }
}

impl TryFrom<String> for Zone {
    type Error = LocalityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Zone> for String {
    fn from(zone: Zone) -> Self {
        zone.0
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A resolved locality.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Locality {
    /// An availability zone.
    Zone(Zone),
    /// A region.
    Region(Region),
    /// No locality.
    Global,
}

impl Locality {
    /// Parse either a zone or a region, whichever the string looks like.
    pub fn parse(value: &str) -> Result<Self, LocalityError> {
        if is_zone(value) {
            Ok(Self::Zone(Zone(value.to_string())))
        } else if is_region(value) {
            Ok(Self::Region(Region(value.to_string())))
        } else {
            Err(LocalityError::MalformedId {
                value: value.to_string(),
                reason: "not a zone or a region".to_string(),
            })
        }
    }

    /// The kind of this locality.
    pub fn kind(&self) -> LocalityKind {
        match self {
            Self::Zone(_) => LocalityKind::Zonal,
            Self::Region(_) => LocalityKind::Regional,
            Self::Global => LocalityKind::Global,
        }
    }

    /// The locality as a string, `None` for [`Locality::Global`].
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Zone(zone) => Some(zone.as_str()),
            Self::Region(region) => Some(region.as_str()),
            Self::Global => None,
        }
    }

    /// The zone, if this is a zonal locality.
    pub fn zone(&self) -> Option<&Zone> {
        match self {
            Self::Zone(zone) => Some(zone),
            _ => None,
        }
    }

    /// The region, if this is a regional locality.
    pub fn region(&self) -> Option<&Region> {
        match self {
            Self::Region(region) => Some(region),
            _ => None,
        }
    }

    /// Prefix `id` with this locality.
    pub fn format_id(&self, id: &str) -> String {
        match self.as_str() {
            Some(locality) => format!("{}/{}", locality, id),
            None => id.to_string(),
        }
    }
}

impl fmt::Display for Locality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str().unwrap_or("global"))
    }
}

/// A parsed `<zone>/<id>` identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZonedId {
    /// The zone.
    pub zone: Zone,
    /// The bare resource id.
    pub id: String,
}

impl fmt::Display for ZonedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.zone, self.id)
    }
}

/// A parsed `<region>/<id>` identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionalId {
    /// The region.
    pub region: Region,
    /// The bare resource id.
    pub id: String,
}

impl fmt::Display for RegionalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.region, self.id)
    }
}

/// A parsed `<locality>/<parent>/<child>` identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NestedId {
    /// The locality shared by parent and child.
    pub locality: Locality,
    /// The parent resource id.
    pub parent: String,
    /// The child resource id.
    pub child: String,
}

impl fmt::Display for NestedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_nested(&self.locality, &self.parent, &self.child))
    }
}

/// Format a zoned identifier.
pub fn format_zoned(zone: &Zone, id: &str) -> String {
    format!("{}/{}", zone, id)
}

/// Format a regional identifier.
pub fn format_regional(region: &Region, id: &str) -> String {
    format!("{}/{}", region, id)
}

/// Format a nested child identifier.
pub fn format_nested(locality: &Locality, parent: &str, child: &str) -> String {
    match locality.as_str() {
        Some(prefix) => format!("{}/{}/{}", prefix, parent, child),
        None => format!("{}/{}", parent, child),
    }
}

/// Parse a zoned identifier, attaching `default_zone` to bare UUIDs.
pub fn parse_zoned(value: &str, default_zone: Option<&Zone>) -> Result<ZonedId, LocalityError> {
    match split_locality(value)? {
        (Some(locality), id) => Ok(ZonedId {
            zone: Zone::parse(locality)?,
            id: id.to_string(),
        }),
        (None, id) => {
            let zone = default_zone.ok_or(LocalityError::MissingLocality {
                kind: LocalityKind::Zonal,
            })?;
            Ok(ZonedId {
                zone: zone.clone(),
                id: id.to_string(),
            })
        }
    }
}

/// Parse a regional identifier, attaching `default_region` to bare UUIDs.
pub fn parse_regional(
    value: &str,
    default_region: Option<&Region>,
) -> Result<RegionalId, LocalityError> {
    match split_locality(value)? {
        (Some(locality), id) => Ok(RegionalId {
            region: Region::parse(locality)?,
            id: id.to_string(),
        }),
        (None, id) => {
            let region = default_region.ok_or(LocalityError::MissingLocality {
                kind: LocalityKind::Regional,
            })?;
            Ok(RegionalId {
                region: region.clone(),
                id: id.to_string(),
            })
        }
    }
}

/// Parse a nested identifier.
///
/// Accepts `<locality>/<parent>/<child>`, or `<parent>/<child>` when a
/// default locality is supplied (or the kind is global).
pub fn parse_nested(
    value: &str,
    kind: LocalityKind,
    default: Option<&Locality>,
) -> Result<NestedId, LocalityError> {
    let parts: Vec<&str> = value.split('/').collect();
    let (locality, parent, child) = match parts.as_slice() {
        [locality, parent, child] => (Some(*locality), *parent, *child),
        [parent, child] => (None, *parent, *child),
        _ => {
            return Err(malformed(
                value,
                "expected <locality>/<parent-id>/<child-id>",
            ))
        }
    };
    check_segment(value, parent)?;
    check_segment(value, child)?;

    let locality = match locality {
        Some(raw) => {
            let parsed = Locality::parse(raw)?;
            if parsed.kind() != kind {
                return Err(LocalityError::WrongLocalityKind {
                    expected: kind,
                    found: raw.to_string(),
                });
            }
            parsed
        }
        None if kind == LocalityKind::Global => Locality::Global,
        None => default
            .cloned()
            .ok_or(LocalityError::MissingLocality { kind })?,
    };

    Ok(NestedId {
        locality,
        parent: parent.to_string(),
        child: child.to_string(),
    })
}

/// Extract the bare id from a bare or composite identifier.
///
/// For nested identifiers this is the child id.
pub fn expand_id(value: &str) -> Result<String, LocalityError> {
    match value.rsplit_once('/') {
        Some((prefix, id)) => {
            check_segment(value, id)?;
            if prefix.is_empty() {
                return Err(malformed(value, "empty locality"));
            }
            Ok(id.to_string())
        }
        None => {
            if Uuid::parse_str(value).is_ok() {
                Ok(value.to_string())
            } else {
                Err(malformed(value, "not a UUID"))
            }
        }
    }
}

/// The locality embedded in a composite id, if any.
pub fn id_locality(value: &str) -> Result<Option<Locality>, LocalityError> {
    match split_locality(value)? {
        (Some(raw), _) => Locality::parse(raw).map(Some),
        (None, _) => Ok(None),
    }
}

/// Resolve the effective locality for a resource.
///
/// Precedence: the resource's own `zone`/`region` attribute, then the
/// provider default, otherwise [`LocalityError::MissingLocality`].
pub fn extract_locality(
    kind: LocalityKind,
    resource_field: Option<&str>,
    config: &ProviderConfig,
) -> Result<Locality, LocalityError> {
    match kind {
        LocalityKind::Global => Ok(Locality::Global),
        LocalityKind::Zonal => match resource_field.filter(|v| !v.is_empty()) {
            Some(zone) => Zone::parse(zone).map(Locality::Zone),
            None => config
                .zone
                .clone()
                .map(Locality::Zone)
                .ok_or(LocalityError::MissingLocality { kind }),
        },
        LocalityKind::Regional => match resource_field.filter(|v| !v.is_empty()) {
            Some(region) => Region::parse(region).map(Locality::Region),
            None => config
                .effective_region()
                .map(Locality::Region)
                .ok_or(LocalityError::MissingLocality { kind }),
        },
    }
}

/// Check that the locality of a composite id agrees with the resource field.
pub fn ensure_consistent(id: &str, field: Option<&str>) -> Result<(), LocalityError> {
    let (Some(from_id), Some(from_field)) = (id_locality(id)?, field.filter(|v| !v.is_empty()))
    else {
        return Ok(());
    };
    match from_id.as_str() {
        Some(locality) if locality != from_field => Err(LocalityError::Mismatch {
            from_id: locality.to_string(),
            from_field: from_field.to_string(),
        }),
        _ => Ok(()),
    }
}

fn split_locality(value: &str) -> Result<(Option<&str>, &str), LocalityError> {
    match value.split_once('/') {
        Some((locality, id)) => {
            if id.contains('/') {
                return Err(malformed(value, "too many path segments"));
            }
            if !is_zone(locality) && !is_region(locality) {
                return Err(malformed(value, "locality is not a zone or a region"));
            }
            check_segment(value, id)?;
            Ok((Some(locality), id))
        }
        None => {
            if Uuid::parse_str(value).is_err() {
                return Err(malformed(value, "not a UUID"));
            }
            Ok((None, value))
        }
    }
}

fn check_segment(value: &str, segment: &str) -> Result<(), LocalityError> {
    if segment.is_empty() {
        return Err(malformed(value, "empty id segment"));
    }
    let valid = segment
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(malformed(value, "invalid characters in id segment"))
    }
}

fn malformed(value: &str, reason: &str) -> LocalityError {
    LocalityError::MalformedId {
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn is_region(value: &str) -> bool {
    let mut parts = value.split('-');
    let (Some(country), Some(city), None) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    is_lower_alpha(country, 2) && is_lower_alpha(city, 3)
}

fn is_zone(value: &str) -> bool {
    let Some((region, number)) = value.rsplit_once('-') else {
        return false;
    };
    is_region(region)
        && !number.is_empty()
        && number.len() <= 2
        && number.chars().all(|c| c.is_ascii_digit())
        && !number.starts_with('0')
}

fn is_lower_alpha(value: &str, len: usize) -> bool {
    value.len() == len && value.chars().all(|c| c.is_ascii_lowercase())
}
