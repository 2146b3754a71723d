//! Field mappings.
//!
//! A [`Mappings`] set maps dot-flattened field paths (`address.city`) to a
//! [`Property`] describing the field's type and indexing behavior. Mappings
//! are either declared through the mapping API or inferred by the document
//! builder; the per-index [`SchemaRegistry`] owns the published snapshot.

mod registry;

pub use registry::SchemaRegistry;

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Reserved document id field.
pub const ID_FIELD: &str = "_id";
/// Reserved document time field.
pub const TIMESTAMP_FIELD: &str = "@timestamp";
/// Composite field aggregating the terms of every textual field.
pub const ALL_FIELD: &str = "_all";
/// Stored original document.
pub const SOURCE_FIELD: &str = "_source";
/// Stored owning index name.
pub const INDEX_FIELD: &str = "_index";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Keyword,
    Numeric,
    Bool,
    Time,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Keyword => "keyword",
            FieldType::Numeric => "numeric",
            FieldType::Bool => "bool",
            FieldType::Time => "time",
        }
    }

    /// Parse a mapping type name, accepting the Elasticsearch aliases.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "text" => Some(FieldType::Text),
            "keyword" => Some(FieldType::Keyword),
            "numeric" | "integer" | "int" | "long" | "short" | "byte" | "float" | "double" => {
                Some(FieldType::Numeric)
            }
            "bool" | "boolean" => Some(FieldType::Bool),
            "time" | "date" | "datetime" => Some(FieldType::Time),
            _ => None,
        }
    }

    /// Numeric and time fields are indexed as ordered points rather than terms.
    pub fn is_ordered(&self) -> bool {
        matches!(self, FieldType::Numeric | FieldType::Time)
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analyzer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_analyzer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    pub index: bool,
    pub store: bool,
    pub sortable: bool,
    pub aggregatable: bool,
    pub highlightable: bool,
}

impl Property {
    /// Property with the per-type defaults.
    pub fn new(field_type: FieldType) -> Self {
        let (sortable, aggregatable) = match field_type {
            FieldType::Keyword => (false, true),
            FieldType::Numeric | FieldType::Time => (true, true),
            FieldType::Text | FieldType::Bool => (false, false),
        };
        Self {
            field_type,
            analyzer: None,
            search_analyzer: None,
            format: None,
            index: true,
            store: false,
            sortable,
            aggregatable,
            highlightable: false,
        }
    }

    pub fn with_analyzer(mut self, analyzer: impl Into<String>) -> Self {
        self.analyzer = Some(analyzer.into());
        self
    }

    pub fn with_search_analyzer(mut self, analyzer: impl Into<String>) -> Self {
        self.search_analyzer = Some(analyzer.into());
        self
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    /// Parse one property of a mapping request body.
    pub fn from_json(name: &str, value: &Value) -> Result<Self> {
        let obj = value.as_object().ok_or_else(|| {
            Error::illegal(format!("[mappings] properties [{}] should be an object", name))
        })?;
        let type_name = obj.get("type").and_then(Value::as_str).ok_or_else(|| {
            Error::illegal(format!("[mappings] properties [{}] should have a [type]", name))
        })?;
        let field_type = FieldType::parse(type_name).ok_or_else(|| {
            Error::illegal(format!(
                "[mappings] properties [{}] doesn't support type [{}]",
                name, type_name
            ))
        })?;

        let mut prop = Property::new(field_type);
        for (key, v) in obj {
            match key.as_str() {
                "type" => {}
                "analyzer" => prop.analyzer = string_option(name, key, v)?,
                "search_analyzer" => prop.search_analyzer = string_option(name, key, v)?,
                "format" => prop.format = string_option(name, key, v)?,
                "index" => prop.index = bool_value(name, key, v)?,
                "store" => prop.store = bool_value(name, key, v)?,
                "sortable" => prop.sortable = bool_value(name, key, v)?,
                "aggregatable" => prop.aggregatable = bool_value(name, key, v)?,
                "highlightable" => prop.highlightable = bool_value(name, key, v)?,
                other => {
                    return Err(Error::parsing(format!(
                        "[mappings] properties [{}] unknown field [{}]",
                        name, other
                    )))
                }
            }
        }
        Ok(prop)
    }

    /// Analyzer used to index values of this field.
    pub fn index_analyzer(&self) -> Option<&str> {
        self.analyzer.as_deref()
    }
}

fn string_option(field: &str, key: &str, value: &Value) -> Result<Option<String>> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) if s.is_empty() => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        _ => Err(Error::illegal(format!(
            "[mappings] properties [{}] option [{}] should be a string",
            field, key
        ))),
    }
}

fn bool_value(field: &str, key: &str, value: &Value) -> Result<bool> {
    value.as_bool().ok_or_else(|| {
        Error::illegal(format!(
            "[mappings] properties [{}] option [{}] should be a boolean",
            field, key
        ))
    })
}

/// Mapping set keyed by flattened field path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Mappings {
    #[serde(default)]
    pub properties: BTreeMap<String, Property>,
}

impl Mappings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: &str) -> Option<&Property> {
        self.properties.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.properties.contains_key(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, property: Property) {
        self.properties.insert(field.into(), property);
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Property)> {
        self.properties.iter()
    }

    /// Every analyzer name referenced by a property.
    pub fn analyzer_names(&self) -> impl Iterator<Item = (&str, &str)> {
        self.properties.iter().flat_map(|(field, prop)| {
            prop.analyzer
                .iter()
                .chain(prop.search_analyzer.iter())
                .map(move |a| (field.as_str(), a.as_str()))
        })
    }

    /// Parse a mapping request body.
    ///
    /// Accepts `{"properties": {...}}` or `{"mappings": {"properties": {...}}}`.
    /// Object properties (a nested `properties` block) are flattened with `.`.
    pub fn from_json(value: &Value) -> Result<Self> {
        let value = value.get("mappings").unwrap_or(value);
        let mut mappings = Mappings::new();
        match value.get("properties") {
            None | Some(Value::Null) => Ok(mappings),
            Some(Value::Object(props)) => {
                collect_properties("", props, &mut mappings)?;
                Ok(mappings)
            }
            Some(_) => Err(Error::illegal("[mappings] properties should be an object")),
        }
    }
}

fn collect_properties(
    prefix: &str,
    props: &serde_json::Map<String, Value>,
    out: &mut Mappings,
) -> Result<()> {
    for (name, value) in props {
        let path = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{}.{}", prefix, name)
        };
        let nested = value.get("properties").and_then(Value::as_object);
        let type_name = value.get("type").and_then(Value::as_str);
        match (nested, type_name) {
            (Some(inner), None) | (Some(inner), Some("object")) => {
                collect_properties(&path, inner, out)?;
            }
            _ => {
                let prop = Property::from_json(&path, value)?;
                out.insert(path, prop);
            }
        }
    }
    Ok(())
}
