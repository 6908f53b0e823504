// Raw declaration tree handed over by a schema front-end. Names are as
// declared; type names may be dotted and relative. Nothing is resolved here.
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawSchema {
    #[serde(default)]
    pub messages: Vec<RawMessage>,
    #[serde(default)]
    pub enums: Vec<RawEnum>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawMessage {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<RawField>,
    #[serde(default)]
    pub messages: Vec<RawMessage>,
    #[serde(default)]
    pub enums: Vec<RawEnum>,
    #[serde(default)]
    pub options: RawMessageOptions,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawMessageOptions {
    #[serde(default)]
    pub preserve_unknown: bool,
    /// Defined elsewhere; resolvable as a type but no codec is assembled.
    #[serde(default)]
    pub external: bool,
    #[serde(default, rename = "type")]
    pub kind: MessageKind,
}

/// How a message is held by fields that reference it. Serialized in the
/// `plan` dump.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Reference type: sub-message fields are nullable.
    #[default]
    Class,
    /// Value type: sub-message fields always hold a value.
    Struct,
    /// Abstract type: cannot be instantiated by the decoder.
    Interface,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawField {
    pub number: u32,
    pub name: String,
    pub rule: Rule,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub packed: bool,
    #[serde(default)]
    pub default: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    Required,
    Optional,
    Repeated,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawEnum {
    pub name: String,
    pub values: Vec<RawEnumValue>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawEnumValue {
    pub name: String,
    pub value: i32,
}
