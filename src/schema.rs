//! Declarative shape of every Scaleway resource and data source.
//!
//! A [`Schema`] says which attributes a kind has, who sets them (the
//! practitioner, the API, or both), what values they accept, which of
//! them recreate the resource and where each one lives in the API
//! object. Validation, diffing, planning and request mapping all read the
//! same declaration, so adding a field to a kind is a one-line change.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Value type of an attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeType {
    /// UTF-8 text.
    String,
    /// Signed integer, also used for sizes in GB.
    Int64,
    /// Floating point number.
    Float64,
    /// True or false.
    Bool,
    /// Ordered values.
    List(Box<AttributeType>),
    /// Unordered values without duplicates.
    Set(Box<AttributeType>),
    /// String keys to values, such as `labels`.
    Map(Box<AttributeType>),
    /// Fixed set of named fields.
    Object(BTreeMap<String, AttributeType>),
    /// Any JSON value.
    Dynamic,
}

impl AttributeType {
    /// `List(element)`.
    pub fn list(element: AttributeType) -> Self {
        Self::List(Box::new(element))
    }

    /// `Set(element)`.
    pub fn set(element: AttributeType) -> Self {
        Self::Set(Box::new(element))
    }

    /// `Map(value)`.
    pub fn map(value: AttributeType) -> Self {
        Self::Map(Box::new(value))
    }
}

/// Who may set an attribute, and whether its value is secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AttributeFlags {
    /// Must appear in configuration.
    pub required: bool,
    /// May appear in configuration.
    pub optional: bool,
    /// Filled in from the API when not configured.
    pub computed: bool,
    /// Redacted from logs and plan output.
    pub sensitive: bool,
}

impl AttributeFlags {
    /// Set by the practitioner, always.
    pub fn required() -> Self {
        Self {
            required: true,
            ..Self::default()
        }
    }

    /// Set by the practitioner, sometimes.
    pub fn optional() -> Self {
        Self {
            optional: true,
            ..Self::default()
        }
    }

    /// Read back from the API only.
    pub fn computed() -> Self {
        Self {
            computed: true,
            ..Self::default()
        }
    }

    /// Configurable, with the API choosing a value otherwise (`zone`, `name`).
    pub fn optional_computed() -> Self {
        Self {
            optional: true,
            computed: true,
            ..Self::default()
        }
    }

    /// Same flags, redacted.
    pub fn sensitive(self) -> Self {
        Self {
            sensitive: true,
            ..self
        }
    }

    /// True when configuration can never set the attribute.
    pub fn is_computed_only(&self) -> bool {
        self.computed && !(self.optional || self.required)
    }
}

/// Check applied to a configured value before any API call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Validator {
    /// Bare UUID.
    Uuid,
    /// Bare UUID, or a `<locality>/.../<uuid>` composite id.
    UuidOrLocalizedId,
    /// Known zone (`fr-par-1`).
    Zone,
    /// Known region (`fr-par`).
    Region,
    /// Member of a closed set.
    OneOf(Vec<String>),
    /// Integer in `min..=max`.
    IntRange {
        /// Inclusive lower bound.
        min: i64,
        /// Inclusive upper bound.
        max: i64,
    },
    /// Integer no smaller than the bound.
    IntAtLeast(i64),
    /// Text whose length is in `min..=max`.
    StringLength {
        /// Inclusive lower bound.
        min: usize,
        /// Inclusive upper bound.
        max: usize,
    },
    /// Standard base64 payload.
    Base64,
    /// Parseable JSON text.
    Json,
    /// OpenSSH `authorized_keys` line.
    SshPublicKey,
}

impl Validator {
    /// [`Validator::OneOf`] over `values`.
    pub fn one_of(values: &[&str]) -> Self {
        Self::OneOf(values.iter().map(|v| (*v).to_owned()).collect())
    }
}

/// Equivalence applied before two values are reported as a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffSuppress {
    /// `fr-par-1/<uuid>` and `<uuid>` name the same object.
    Locality,
    /// IAM policy JSON compared in canonical form.
    PolicyDocument,
    /// SSH keys compared on type and key material only.
    SshKey,
    /// Base64 texts compared on decoded bytes.
    Base64,
    /// ASCII case-insensitive text.
    IgnoreCase,
}

/// One attribute of a block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    /// Value type.
    #[serde(rename = "type")]
    pub attr_type: AttributeType,
    /// Who sets the value.
    #[serde(flatten)]
    pub flags: AttributeFlags,
    /// Shown in the host's documentation output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// A change destroys and recreates the resource.
    #[serde(default)]
    pub force_new: bool,
    /// Planned when the attribute is not configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    /// Checks on configured values.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validators: Vec<Validator>,
    /// Equivalence used by the diff.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff_suppress: Option<DiffSuppress>,
    /// Dotted location in the API object, if not the attribute name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_name: Option<String>,
    /// Holds another resource's composite id; only the bare id is sent.
    #[serde(default)]
    pub id_reference: bool,
    /// Sent on write, never returned on read; state keeps the planned value.
    #[serde(default)]
    pub write_only: bool,
    /// Consumed by the engine (`zone`, `region`), never put in a body.
    #[serde(default)]
    pub api_skip: bool,
}

impl Attribute {
    /// Attribute of `attr_type` with `flags` and nothing else.
    pub fn new(attr_type: AttributeType, flags: AttributeFlags) -> Self {
        Self {
            attr_type,
            flags,
            description: None,
            force_new: false,
            default: None,
            validators: Vec::new(),
            diff_suppress: None,
            api_name: None,
            id_reference: false,
            write_only: false,
            api_skip: false,
        }
    }

    /// Required text.
    pub fn required_string() -> Self {
        Self::new(AttributeType::String, AttributeFlags::required())
    }

    /// Optional text.
    pub fn optional_string() -> Self {
        Self::new(AttributeType::String, AttributeFlags::optional())
    }

    /// Optional text the API fills in.
    pub fn optional_computed_string() -> Self {
        Self::new(AttributeType::String, AttributeFlags::optional_computed())
    }

    /// Text read back from the API.
    pub fn computed_string() -> Self {
        Self::new(AttributeType::String, AttributeFlags::computed())
    }

    /// Required integer.
    pub fn required_int64() -> Self {
        Self::new(AttributeType::Int64, AttributeFlags::required())
    }

    /// Optional integer.
    pub fn optional_int64() -> Self {
        Self::new(AttributeType::Int64, AttributeFlags::optional())
    }

    /// Integer read back from the API.
    pub fn computed_int64() -> Self {
        Self::new(AttributeType::Int64, AttributeFlags::computed())
    }

    /// Optional flag.
    pub fn optional_bool() -> Self {
        Self::new(AttributeType::Bool, AttributeFlags::optional())
    }

    /// Optional ordered strings, the shape of `tags`.
    pub fn optional_string_list() -> Self {
        Self::new(
            AttributeType::list(AttributeType::String),
            AttributeFlags::optional(),
        )
    }

    /// Attach documentation.
    pub fn with_description(self, description: impl Into<String>) -> Self {
        Self {
            description: Some(description.into()),
            ..self
        }
    }

    /// Recreate the resource when the value changes.
    pub fn with_force_new(self) -> Self {
        Self {
            force_new: true,
            ..self
        }
    }

    /// Value planned when the attribute is left out.
    pub fn with_default(self, default: serde_json::Value) -> Self {
        Self {
            default: Some(default),
            ..self
        }
    }

    /// Redact the value.
    pub fn sensitive(mut self) -> Self {
        self.flags.sensitive = true;
        self
    }

    /// Let the API fill the value in when it is not configured.
    pub fn computed(mut self) -> Self {
        self.flags.computed = true;
        self
    }

    /// Append a check.
    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validators.push(validator);
        self
    }

    /// Compare values with `suppress` before reporting a change.
    pub fn with_diff_suppress(self, suppress: DiffSuppress) -> Self {
        Self {
            diff_suppress: Some(suppress),
            ..self
        }
    }

    /// Read and write the value at a dotted path of the API object.
    pub fn with_api_name(self, api_name: impl Into<String>) -> Self {
        Self {
            api_name: Some(api_name.into()),
            ..self
        }
    }

    /// Reference to another resource.
    ///
    /// Accepts both bare and composite ids, sends the bare id and keeps
    /// whichever form was configured in state.
    pub fn id_reference(self) -> Self {
        Self {
            id_reference: true,
            diff_suppress: Some(DiffSuppress::Locality),
            ..self
        }
        .with_validator(Validator::UuidOrLocalizedId)
    }

    /// The API never echoes the value back.
    pub fn write_only(self) -> Self {
        Self {
            write_only: true,
            ..self
        }
    }

    /// Leave the value out of request bodies.
    pub fn api_skip(self) -> Self {
        Self {
            api_skip: true,
            ..self
        }
    }

    /// Location of the value in the API object for an attribute called `name`.
    pub fn api_path<'a>(&'a self, name: &'a str) -> &'a str {
        match &self.api_name {
            Some(path) => path,
            None => name,
        }
    }
}

/// How many instances of a nested block may appear, and how they are keyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BlockNestingMode {
    /// Zero or one object.
    #[default]
    Single,
    /// Ordered objects.
    List,
    /// Unordered objects, compared as a set.
    Set,
    /// Objects keyed by name.
    Map,
}

/// Attributes and nested blocks at one level of a resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Block {
    /// Attributes by name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Attribute>,
    /// Nested blocks by name, such as a server's `root_volume`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub blocks: BTreeMap<String, NestedBlock>,
    /// Shown in the host's documentation output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Block {
    /// Block with no members.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace attribute `name`.
    pub fn with_attribute(mut self, name: impl Into<String>, attr: Attribute) -> Self {
        self.attributes.insert(name.into(), attr);
        self
    }

    /// Add or replace nested block `name`.
    pub fn with_block(mut self, name: impl Into<String>, block: NestedBlock) -> Self {
        self.blocks.insert(name.into(), block);
        self
    }
}

/// A [`Block`] nested under a parent, with its cardinality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NestedBlock {
    /// Members of each instance.
    #[serde(flatten)]
    pub block: Block,
    /// Cardinality and keying.
    #[serde(default)]
    pub nesting_mode: BlockNestingMode,
    /// Fewest instances accepted.
    #[serde(default)]
    pub min_items: u32,
    /// Most instances accepted; 0 means no limit.
    #[serde(default)]
    pub max_items: u32,
    /// Any change inside recreates the resource.
    #[serde(default)]
    pub force_new: bool,
    /// Field of the API object, if not the block name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_name: Option<String>,
}

impl NestedBlock {
    fn nested(block: Block, nesting_mode: BlockNestingMode) -> Self {
        Self {
            block,
            nesting_mode,
            min_items: 0,
            max_items: u32::from(nesting_mode == BlockNestingMode::Single),
            force_new: false,
            api_name: None,
        }
    }

    /// At most one instance.
    pub fn single(block: Block) -> Self {
        Self::nested(block, BlockNestingMode::Single)
    }

    /// Ordered instances.
    pub fn list(block: Block) -> Self {
        Self::nested(block, BlockNestingMode::List)
    }

    /// Unordered instances.
    pub fn set(block: Block) -> Self {
        Self::nested(block, BlockNestingMode::Set)
    }

    /// Require at least `min` instances.
    pub fn with_min_items(self, min: u32) -> Self {
        Self {
            min_items: min,
            ..self
        }
    }

    /// Accept at most `max` instances.
    pub fn with_max_items(self, max: u32) -> Self {
        Self {
            max_items: max,
            ..self
        }
    }

    /// Recreate the resource on any change inside the block.
    pub fn with_force_new(self) -> Self {
        Self {
            force_new: true,
            ..self
        }
    }

    /// Read and write the block at `api_name` in the API object.
    pub fn with_api_name(self, api_name: impl Into<String>) -> Self {
        Self {
            api_name: Some(api_name.into()),
            ..self
        }
    }
}

/// Versioned top-level block of a resource or data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Schema {
    /// Bumped whenever stored state needs an upgrade step.
    #[serde(default)]
    pub version: u64,
    /// Top-level members.
    #[serde(flatten)]
    pub block: Block,
}

impl Schema {
    /// Empty schema at `version`.
    pub fn new(version: u64) -> Self {
        Self {
            version,
            block: Block::new(),
        }
    }

    /// Empty schema at version 0.
    pub fn v0() -> Self {
        Self::new(0)
    }

    /// Add or replace top-level attribute `name`.
    pub fn with_attribute(mut self, name: impl Into<String>, attr: Attribute) -> Self {
        self.block.attributes.insert(name.into(), attr);
        self
    }

    /// Add or replace top-level block `name`.
    pub fn with_block(mut self, name: impl Into<String>, block: NestedBlock) -> Self {
        self.block.blocks.insert(name.into(), block);
        self
    }

    /// Top-level attribute `name`, if declared.
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.block.attributes.get(name)
    }
}

/// Everything the host learns from `GetSchema`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ProviderSchema {
    /// The `provider "scaleway"` block.
    #[serde(default)]
    pub provider: Schema,
    /// Resource kinds by type name.
    #[serde(default)]
    pub resources: BTreeMap<String, Schema>,
    /// Data sources by type name.
    #[serde(default)]
    pub data_sources: BTreeMap<String, Schema>,
}

impl ProviderSchema {
    /// Nothing declared yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `schema` for the provider block.
    pub fn with_provider_config(self, schema: Schema) -> Self {
        Self {
            provider: schema,
            ..self
        }
    }

    /// Declare resource kind `name`.
    pub fn with_resource(mut self, name: impl Into<String>, schema: Schema) -> Self {
        self.resources.insert(name.into(), schema);
        self
    }

    /// Declare data source `name`.
    pub fn with_data_source(mut self, name: impl Into<String>, schema: Schema) -> Self {
        self.data_sources.insert(name.into(), schema);
        self
    }
}

/// Whether a diagnostic blocks the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticSeverity {
    /// The operation fails.
    Error,
    /// Reported to the practitioner; the operation goes on.
    Warning,
}

/// Problem reported to the host, optionally pinned to an attribute path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Error or warning.
    pub severity: DiagnosticSeverity,
    /// One-line headline.
    pub summary: String,
    /// Longer explanation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Dotted path such as `root_volume.size_in_gb`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
}

impl Diagnostic {
    /// Blocking diagnostic with `summary`.
    pub fn error(summary: impl Into<String>) -> Self {
        Self {
            severity: DiagnosticSeverity::Error,
            summary: summary.into(),
            detail: None,
            attribute: None,
        }
    }

    /// Attach an explanation.
    pub fn with_detail(self, detail: impl Into<String>) -> Self {
        Self {
            detail: Some(detail.into()),
            ..self
        }
    }

    /// Pin to the attribute at `attribute`.
    pub fn with_attribute(self, attribute: impl Into<String>) -> Self {
        Self {
            attribute: Some(attribute.into()),
            ..self
        }
    }

    /// True for [`DiagnosticSeverity::Error`].
    pub fn is_error(&self) -> bool {
        matches!(self.severity, DiagnosticSeverity::Error)
    }
}
