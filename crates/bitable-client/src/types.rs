//! Common types for the client SDK

use crate::{ClientError, Result};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;

/// Field type codes the record validator understands
pub mod field_type {
    pub const TEXT: u32 = 1;
    pub const NUMBER: u32 = 2;
    pub const SINGLE_SELECT: u32 = 3;
    pub const DATE: u32 = 5;
    pub const CHECKBOX: u32 = 7;
    pub const PHONE: u32 = 13;
    pub const ATTACHMENT: u32 = 17;
}

/// Column definition as returned by the fields endpoint
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldMetadata {
    /// Field ID
    pub field_id: String,
    /// Display name
    pub field_name: String,
    /// Field type code
    #[serde(rename = "type")]
    pub field_type: u32,
    /// Type-specific properties
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property: Option<Value>,
    /// Description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<Value>,
    /// Whether this is the primary (index) field
    #[serde(default)]
    pub is_primary: bool,
    /// UI type name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui_type: Option<String>,
}

/// A table in a Bitable app
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Table {
    /// Table ID
    pub table_id: String,
    /// Table name
    pub name: String,
    /// Revision
    #[serde(default)]
    pub revision: i64,
}

/// Column to create along with a new table
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TableField {
    /// Field name
    pub field_name: String,
    /// Field type code
    #[serde(rename = "type")]
    pub field_type: u32,
    /// Type-specific properties
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property: Option<Value>,
}

impl TableField {
    pub fn new(field_name: impl Into<String>, field_type: u32) -> Self {
        Self {
            field_name: field_name.into(),
            field_type,
            property: None,
        }
    }
}

/// Create table result
#[derive(Clone, Debug, Deserialize)]
pub struct CreatedTable {
    /// ID of the new table
    pub table_id: String,
    /// Default view ID
    #[serde(default)]
    pub default_view_id: Option<String>,
    /// IDs of the created fields, in request order
    #[serde(default)]
    pub field_id_list: Vec<String>,
}

/// Reference to an uploaded file, as stored in an attachment field
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttachmentRef {
    /// File token returned by upload finish
    pub file_token: String,
    /// File name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Size in bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl AttachmentRef {
    pub fn new(file_token: impl Into<String>) -> Self {
        Self {
            file_token: file_token.into(),
            name: None,
            size: None,
        }
    }
}

/// A record cell value
///
/// Whole numbers stay integers on the wire; `Number` is for fractional
/// values.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Integer(i64),
    Number(f64),
    Text(String),
    Attachments(Vec<AttachmentRef>),
}

impl FieldValue {
    fn kind(&self) -> &'static str {
        match self {
            FieldValue::Bool(_) => "boolean",
            FieldValue::Integer(_) | FieldValue::Number(_) => "number",
            FieldValue::Text(_) => "text",
            FieldValue::Attachments(_) => "attachments",
        }
    }

    /// Whether a column of type `type_code` can hold this value
    fn fits(&self, type_code: u32) -> bool {
        use self::field_type::*;
        match type_code {
            TEXT | SINGLE_SELECT | PHONE => matches!(self, FieldValue::Text(_)),
            NUMBER | DATE => matches!(self, FieldValue::Integer(_) | FieldValue::Number(_)),
            CHECKBOX => matches!(self, FieldValue::Bool(_)),
            ATTACHMENT => matches!(self, FieldValue::Attachments(_)),
            _ => true,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Number(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Integer(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<Vec<AttachmentRef>> for FieldValue {
    fn from(v: Vec<AttachmentRef>) -> Self {
        FieldValue::Attachments(v)
    }
}

/// Ordered field-name to value mapping for one record
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RecordFields {
    entries: Vec<(String, FieldValue)>,
}

impl RecordFields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field, replacing an earlier value under the same name in place
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == name) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Builder form of [`insert`](Self::insert)
    pub fn with(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.entries.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check every field against a table schema
    ///
    /// Keys may be field names or field IDs. Unknown keys and values whose
    /// kind does not fit the column type are rejected.
    pub fn validate(&self, schema: &[FieldMetadata]) -> Result<()> {
        for (key, value) in self.iter() {
            let field = schema
                .iter()
                .find(|f| f.field_name == key || f.field_id == key)
                .ok_or_else(|| ClientError::InvalidInput(format!("unknown field: {}", key)))?;

            if !value.fits(field.field_type) {
                return Err(ClientError::InvalidInput(format!(
                    "field {} (type {}) cannot hold a {} value",
                    key,
                    field.field_type,
                    value.kind()
                )));
            }
        }
        Ok(())
    }
}

impl Serialize for RecordFields {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for RecordFields {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct RecordVisitor;

        impl<'de> Visitor<'de> for RecordVisitor {
            type Value = RecordFields;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of field names to values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<RecordFields, A::Error> {
                let mut fields = RecordFields::new();
                while let Some((name, value)) = access.next_entry::<String, FieldValue>()? {
                    fields.insert(name, value);
                }
                Ok(fields)
            }
        }

        deserializer.deserialize_map(RecordVisitor)
    }
}

impl<K: Into<String>, V: Into<FieldValue>> FromIterator<(K, V)> for RecordFields {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut fields = RecordFields::new();
        for (k, v) in iter {
            fields.insert(k, v);
        }
        fields
    }
}

/// A record created by batch create
#[derive(Clone, Debug, Deserialize)]
pub struct CreatedRecord {
    /// Record ID
    pub record_id: String,
    /// Stored fields as echoed by the server
    #[serde(default)]
    pub fields: Map<String, Value>,
}

/// Where an uploaded file is attached
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ParentType {
    #[default]
    BitableImage,
    BitableFile,
    Explorer,
    Other(String),
}

impl ParentType {
    pub fn as_str(&self) -> &str {
        match self {
            ParentType::BitableImage => "bitable_image",
            ParentType::BitableFile => "bitable_file",
            ParentType::Explorer => "explorer",
            ParentType::Other(s) => s,
        }
    }
}

impl std::str::FromStr for ParentType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "bitable_image" => ParentType::BitableImage,
            "bitable_file" => ParentType::BitableFile,
            "explorer" => ParentType::Explorer,
            other => ParentType::Other(other.to_string()),
        })
    }
}

impl std::fmt::Display for ParentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
