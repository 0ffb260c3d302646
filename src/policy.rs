//! IAM-style policy documents.
//!
//! Documents are built from structured statements, merged with
//! `source_policy_documents`, overridden by `override_policy_documents` and
//! rendered in a canonical form: two-space indented, keys ordered
//! `Version`, `Id`, `Statement`, statements sorted by `Sid`, and every
//! string list sorted, deduplicated and collapsed to a scalar when it holds
//! a single element.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;

/// The default policy language version.
pub const DEFAULT_VERSION: &str = "2012-10-17";

/// The legacy version that does not support `${...}` variables.
pub const LEGACY_VERSION: &str = "2008-10-17";

/// Errors raised while building or parsing a policy document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    /// Two statements share a `Sid` where that is not allowed.
    #[error("duplicate Sid ({sid}) in {list}")]
    DuplicateSid {
        /// The repeated statement id.
        sid: String,
        /// The list the duplicate was found in.
        list: &'static str,
    },

    /// A `&{...}` variable was used with the legacy version.
    #[error("found &{{ sequence in ({value}), which is not supported in document version {version}")]
    LegacyInterpolation {
        /// The offending value.
        value: String,
        /// The document version.
        version: String,
    },

    /// A document could not be parsed.
    #[error("invalid policy document: {0}")]
    Invalid(String),
}

/// A list of strings rendered as a scalar when it has one element.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StringSet(BTreeSet<String>);

impl StringSet {
    /// Collect values into a sorted, deduplicated set.
    pub fn new<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(values.into_iter().map(Into::into).collect())
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn extend(&mut self, other: StringSet) {
        self.0.extend(other.0);
    }
}

impl Serialize for StringSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0.len() {
            1 => match self.0.iter().next() {
                Some(only) => serializer.serialize_str(only),
                None => serializer.collect_seq(&self.0),
            },
            _ => serializer.collect_seq(&self.0),
        }
    }
}

impl<'de> Deserialize<'de> for StringSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum OneOrMany {
            One(String),
            Many(Vec<String>),
        }
        Ok(match OneOrMany::deserialize(deserializer)? {
            OneOrMany::One(one) => Self::new([one]),
            OneOrMany::Many(many) => Self::new(many),
        })
    }
}

/// The `Principal` element: either `"*"` or a map of principal type to ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Principals {
    /// Everyone.
    Wildcard(String),
    /// Principal ids grouped by type.
    Typed(BTreeMap<String, StringSet>),
}

/// Condition operator to variable to values.
pub type Conditions = BTreeMap<String, BTreeMap<String, StringSet>>;

/// One statement of a rendered policy document.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Statement {
    /// Statement id.
    #[serde(rename = "Sid", default, skip_serializing_if = "String::is_empty")]
    pub sid: String,
    /// `Allow` or `Deny`.
    #[serde(rename = "Effect", default, skip_serializing_if = "String::is_empty")]
    pub effect: String,
    /// Allowed or denied actions.
    #[serde(rename = "Action", default, skip_serializing_if = "StringSet::is_empty")]
    pub actions: StringSet,
    /// Actions excluded from the statement.
    #[serde(rename = "NotAction", default, skip_serializing_if = "StringSet::is_empty")]
    pub not_actions: StringSet,
    /// Resources covered.
    #[serde(rename = "Resource", default, skip_serializing_if = "StringSet::is_empty")]
    pub resources: StringSet,
    /// Resources excluded.
    #[serde(rename = "NotResource", default, skip_serializing_if = "StringSet::is_empty")]
    pub not_resources: StringSet,
    /// Principals covered.
    #[serde(rename = "Principal", default, skip_serializing_if = "Option::is_none")]
    pub principals: Option<Principals>,
    /// Principals excluded.
    #[serde(rename = "NotPrincipal", default, skip_serializing_if = "Option::is_none")]
    pub not_principals: Option<Principals>,
    /// Conditions.
    #[serde(rename = "Condition", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub conditions: Conditions,
}

/// A rendered policy document.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PolicyDocument {
    /// Policy language version.
    #[serde(rename = "Version", default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    /// Optional document id.
    #[serde(rename = "Id", default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// Statements.
    #[serde(rename = "Statement", default, deserialize_with = "one_or_many_statements")]
    pub statements: Vec<Statement>,
}

fn one_or_many_statements<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Vec<Statement>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(Box<Statement>),
        Many(Vec<Statement>),
    }
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(one) => vec![*one],
        OneOrMany::Many(many) => many,
    })
}

impl PolicyDocument {
    /// Parse a JSON document.
    pub fn parse(json: &str) -> Result<Self, PolicyError> {
        serde_json::from_str(json).map_err(|e| PolicyError::Invalid(e.to_string()))
    }

    /// Sort statements into their canonical order.
    fn sort(&mut self) {
        self.statements.sort_by_cached_key(|s| {
            (
                s.sid.clone(),
                serde_json::to_string(s).unwrap_or_default(),
            )
        });
    }

    /// Render the canonical JSON form.
    pub fn to_canonical_json(&self) -> Result<String, PolicyError> {
        let mut doc = self.clone();
        doc.sort();
        serde_json::to_string_pretty(&doc).map_err(|e| PolicyError::Invalid(e.to_string()))
    }
}

/// Canonicalize a JSON policy document.
///
/// Documents that differ only in whitespace, statement order or the order
/// of list elements canonicalize to the same string.
pub fn canonicalize(json: &str) -> Result<String, PolicyError> {
    PolicyDocument::parse(json)?.to_canonical_json()
}

/// Whether two JSON documents are the same policy.
pub fn equivalent(a: &str, b: &str) -> bool {
    match (canonicalize(a), canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Structured input of the policy document builder.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PolicyDocumentInput {
    /// Version; the newest version among all merged documents wins.
    pub version: Option<String>,
    /// Document id.
    pub policy_id: Option<String>,
    /// Documents whose statements are merged in first.
    pub source_policy_documents: Vec<String>,
    /// Documents whose statements replace same-`Sid` statements last.
    pub override_policy_documents: Vec<String>,
    /// Statements of this document.
    #[serde(alias = "statements")]
    pub statement: Vec<StatementInput>,
}

/// One statement of the builder input.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StatementInput {
    /// Statement id.
    pub sid: Option<String>,
    /// `Allow` (default) or `Deny`.
    pub effect: Option<String>,
    /// Actions.
    pub actions: Vec<String>,
    /// Excluded actions.
    pub not_actions: Vec<String>,
    /// Resources.
    pub resources: Vec<String>,
    /// Excluded resources.
    pub not_resources: Vec<String>,
    /// Principals.
    pub principals: Vec<PrincipalInput>,
    /// Excluded principals.
    pub not_principals: Vec<PrincipalInput>,
    /// Conditions.
    pub condition: Vec<ConditionInput>,
}

/// A principal block.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PrincipalInput {
    /// Principal type, or `*`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Principal ids.
    pub identifiers: Vec<String>,
}

/// A condition block.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConditionInput {
    /// Condition operator, such as `StringEquals`.
    pub test: String,
    /// Context key.
    pub variable: String,
    /// Values to compare with.
    pub values: Vec<String>,
}

impl PolicyDocumentInput {
    /// Merge sources, own statements and overrides into one document.
    pub fn build(&self) -> Result<PolicyDocument, PolicyError> {
        let mut versions: Vec<String> = self.version.iter().cloned().collect();
        let mut merged: Vec<Statement> = Vec::new();

        for source in &self.source_policy_documents {
            if source.trim().is_empty() {
                continue;
            }
            let doc = PolicyDocument::parse(source)?;
            versions.push(doc.version);
            for statement in doc.statements {
                if !statement.sid.is_empty() && merged.iter().any(|s| s.sid == statement.sid) {
                    return Err(PolicyError::DuplicateSid {
                        sid: statement.sid,
                        list: "source_policy_documents",
                    });
                }
                merged.push(statement);
            }
        }

        let version = newest(versions.iter().map(String::as_str));
        let mut own_sids = BTreeSet::new();
        for input in &self.statement {
            let statement = input.render(&version)?;
            if !statement.sid.is_empty() && !own_sids.insert(statement.sid.clone()) {
                return Err(PolicyError::DuplicateSid {
                    sid: statement.sid,
                    list: "statement",
                });
            }
            replace_or_push(&mut merged, statement);
        }

        for source in &self.override_policy_documents {
            if source.trim().is_empty() {
                continue;
            }
            let doc = PolicyDocument::parse(source)?;
            versions.push(doc.version);
            for statement in doc.statements {
                replace_or_push(&mut merged, statement);
            }
        }

        let mut doc = PolicyDocument {
            version: newest(versions.iter().map(String::as_str)),
            id: self.policy_id.clone().unwrap_or_default(),
            statements: merged,
        };
        doc.sort();
        Ok(doc)
    }

    /// Build the document and render it canonically.
    pub fn to_json(&self) -> Result<String, PolicyError> {
        self.build()?.to_canonical_json()
    }

    /// Parse the builder input from a data source configuration.
    pub fn from_value(value: &Value) -> Result<Self, PolicyError> {
        serde_json::from_value(value.clone()).map_err(|e| PolicyError::Invalid(e.to_string()))
    }
}

impl StatementInput {
    fn render(&self, version: &str) -> Result<Statement, PolicyError> {
        let subst = |values: &[String]| -> Result<StringSet, PolicyError> {
            values
                .iter()
                .map(|v| interpolate(v, version))
                .collect::<Result<Vec<_>, _>>()
                .map(StringSet::new)
        };

        let mut conditions: Conditions = BTreeMap::new();
        for condition in &self.condition {
            let values = subst(&condition.values)?;
            conditions
                .entry(condition.test.clone())
                .or_default()
                .entry(interpolate(&condition.variable, version)?)
                .or_default()
                .extend(values);
        }

        Ok(Statement {
            sid: self.sid.clone().unwrap_or_default(),
            effect: self.effect.clone().unwrap_or_else(|| "Allow".to_string()),
            actions: subst(&self.actions)?,
            not_actions: subst(&self.not_actions)?,
            resources: subst(&self.resources)?,
            not_resources: subst(&self.not_resources)?,
            principals: render_principals(&self.principals, version)?,
            not_principals: render_principals(&self.not_principals, version)?,
            conditions,
        })
    }
}

fn render_principals(
    inputs: &[PrincipalInput],
    version: &str,
) -> Result<Option<Principals>, PolicyError> {
    if inputs.is_empty() {
        return Ok(None);
    }
    if let [only] = inputs {
        if only.kind == "*" && only.identifiers.iter().all(|i| i == "*") {
            return Ok(Some(Principals::Wildcard("*".to_string())));
        }
    }
    let mut typed: BTreeMap<String, StringSet> = BTreeMap::new();
    for input in inputs {
        let ids = input
            .identifiers
            .iter()
            .map(|v| interpolate(v, version))
            .collect::<Result<Vec<_>, _>>()?;
        typed
            .entry(input.kind.clone())
            .or_default()
            .extend(StringSet::new(ids));
    }
    Ok(Some(Principals::Typed(typed)))
}

/// Rewrite `&{` variables to `${`.
fn interpolate(value: &str, version: &str) -> Result<String, PolicyError> {
    if !value.contains("&{") {
        return Ok(value.to_string());
    }
    if version == LEGACY_VERSION {
        return Err(PolicyError::LegacyInterpolation {
            value: value.to_string(),
            version: version.to_string(),
        });
    }
    Ok(value.replace("&{", "${"))
}

/// Versions are dates, so the lexicographically greatest is the newest.
fn newest<'a>(versions: impl Iterator<Item = &'a str>) -> String {
    versions
        .filter(|v| !v.is_empty())
        .max()
        .unwrap_or(DEFAULT_VERSION)
        .to_string()
}

fn replace_or_push(statements: &mut Vec<Statement>, statement: Statement) {
    if !statement.sid.is_empty() {
        if let Some(existing) = statements.iter_mut().find(|s| s.sid == statement.sid) {
            *existing = statement;
            return;
        }
    }
    statements.push(statement);
}
