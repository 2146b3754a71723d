//! Document builder: JSON document to typed engine fields.
//!
//! The builder flattens a document, infers mappings for unseen fields,
//! coerces every value to its mapped type and produces the
//! [`EngineDocument`] the engine indexes. A coercion failure aborts the
//! whole document.

mod flatten;
mod time;

pub use flatten::flatten;
pub use time::{java_to_strftime, parse_time, parse_timestamp};

use crate::analysis::AnalyzerSet;
use crate::engine::{EngineDocument, EngineField, FieldValue};
use crate::mapping::{
    FieldType, Mappings, Property, ALL_FIELD, ID_FIELD, INDEX_FIELD, SOURCE_FIELD, TIMESTAMP_FIELD,
};
use crate::{Error, Result};
use serde_json::Value;

/// Keys that may not appear at the top level of a document body.
const METADATA_FIELDS: &[&str] = &[ID_FIELD, INDEX_FIELD, SOURCE_FIELD, ALL_FIELD];

/// Output of [`DocumentBuilder::build`].
#[derive(Debug, Clone)]
pub struct BuiltDocument {
    pub document: EngineDocument,
    /// The extended mapping set when the document introduced new fields.
    pub mappings: Option<Mappings>,
}

pub struct DocumentBuilder<'a> {
    index: &'a str,
    mappings: &'a Mappings,
    analyzers: &'a AnalyzerSet,
}

impl<'a> DocumentBuilder<'a> {
    pub fn new(index: &'a str, mappings: &'a Mappings, analyzers: &'a AnalyzerSet) -> Self {
        Self {
            index,
            mappings,
            analyzers,
        }
    }

    pub fn build(&self, id: &str, source: &Value) -> Result<BuiltDocument> {
        let object = source
            .as_object()
            .ok_or_else(|| Error::parsing("failed to parse, document is not an object"))?;
        if let Some(key) = METADATA_FIELDS.iter().find(|k| object.contains_key(**k)) {
            return Err(Error::parsing(format!(
                "Field [{}] is a metadata field and cannot be added inside a document",
                key
            )));
        }

        let mut stored = object.clone();
        let timestamp = match object.get(TIMESTAMP_FIELD).and_then(parse_timestamp) {
            Some(millis) => {
                stored.remove(TIMESTAMP_FIELD);
                millis
            }
            None => chrono::Utc::now().timestamp_millis(),
        };

        let mut inferred: Option<Mappings> = None;
        let mut fields = Vec::new();
        for (name, values) in flatten::flatten(object, &[TIMESTAMP_FIELD]) {
            let Some(first) = values.first() else {
                continue;
            };
            let prop = match self.mappings.get(&name) {
                Some(prop) => prop.clone(),
                None => {
                    let prop = Property::new(infer_type(first));
                    inferred
                        .get_or_insert_with(|| self.mappings.clone())
                        .insert(name.clone(), prop.clone());
                    tracing::debug!(
                        "Index '{}': inferred field '{}' as {}",
                        self.index,
                        name,
                        prop.field_type
                    );
                    prop
                }
            };
            if !prop.index {
                continue;
            }
            for value in values {
                fields.push(EngineField {
                    name: name.clone(),
                    value: self.coerce(&name, &prop, value)?,
                    aggregatable: prop.aggregatable,
                    include_in_all: matches!(
                        prop.field_type,
                        FieldType::Text | FieldType::Keyword | FieldType::Bool
                    ),
                });
            }
        }

        Ok(BuiltDocument {
            document: EngineDocument {
                id: id.to_string(),
                index: self.index.to_string(),
                timestamp,
                source: serde_json::to_string(&Value::Object(stored))?,
                fields,
            },
            mappings: inferred,
        })
    }

    fn coerce(&self, field: &str, prop: &Property, value: &Value) -> Result<FieldValue> {
        let conflict = || Error::TypeConflict {
            field: field.to_string(),
            expected: prop.field_type.as_str().to_string(),
            actual: value_kind(value).to_string(),
        };
        match (prop.field_type, value) {
            (FieldType::Text, Value::String(s)) => {
                let analyzer = self.analyzers.resolve_or_default(prop.index_analyzer())?;
                Ok(FieldValue::Text {
                    raw: s.clone(),
                    tokens: analyzer.analyze(s),
                })
            }
            (FieldType::Keyword, Value::String(s)) => Ok(FieldValue::Keyword(s.clone())),
            (FieldType::Keyword, Value::Bool(b)) => Ok(FieldValue::Keyword(b.to_string())),
            (FieldType::Keyword, Value::Number(n)) => Ok(FieldValue::Keyword(n.to_string())),
            (FieldType::Numeric, Value::Number(n)) => n.as_f64().map(FieldValue::Numeric).ok_or_else(conflict),
            (FieldType::Bool, Value::Bool(b)) => Ok(FieldValue::Bool(*b)),
            (FieldType::Time, Value::String(_) | Value::Number(_)) => {
                parse_time(value, prop.format.as_deref())
                    .map(FieldValue::Time)
                    .ok_or_else(|| {
                        Error::parsing(format!(
                            "failed to parse date field [{}] of field [{}] with format [{}]",
                            value,
                            field,
                            prop.format.as_deref().unwrap_or("strict_date_optional_time||epoch_millis")
                        ))
                    })
            }
            _ => Err(conflict()),
        }
    }
}

/// Mapping type inferred for a value first seen without a mapping.
fn infer_type(value: &Value) -> FieldType {
    match value {
        Value::Number(_) => FieldType::Numeric,
        Value::Bool(_) => FieldType::Bool,
        Value::String(_) | Value::Null | Value::Array(_) | Value::Object(_) => FieldType::Text,
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::String(_) => "string",
        Value::Number(_) => "numeric",
        Value::Bool(_) => "bool",
        Value::Null => "null",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn build(mappings: &Mappings, doc: Value) -> Result<BuiltDocument> {
        let analyzers = AnalyzerSet::default();
        DocumentBuilder::new("books", mappings, &analyzers).build("1", &doc)
    }

    #[test]
    fn test_infers_each_leaf() -> Result<()> {
        let built = build(
            &Mappings::new(),
            json!({"title": "Dune", "pages": 412, "meta": {"draft": false, "tags": ["a", "b"]}}),
        )?;
        let mappings = built.mappings.expect("new fields");
        let types: Vec<(&str, FieldType)> = mappings
            .iter()
            .map(|(k, p)| (k.as_str(), p.field_type))
            .collect();
        assert_eq!(
            types,
            vec![
                ("meta.draft", FieldType::Bool),
                ("meta.tags", FieldType::Text),
                ("pages", FieldType::Numeric),
                ("title", FieldType::Text),
            ]
        );
        assert_eq!(built.document.fields.len(), 5);
        Ok(())
    }

    #[test]
    fn test_type_conflict_names_field() -> Result<()> {
        let first = build(&Mappings::new(), json!({"price": 10}))?;
        let mappings = first.mappings.expect("price inferred");
        let err = build(&mappings, json!({"price": "cheap"})).unwrap_err();
        match err {
            Error::TypeConflict { field, expected, actual } => {
                assert_eq!(field, "price");
                assert_eq!(expected, "numeric");
                assert_eq!(actual, "string");
            }
            other => panic!("unexpected error {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn test_keyword_accepts_scalars() -> Result<()> {
        let mut mappings = Mappings::new();
        mappings.insert("code", Property::new(FieldType::Keyword));
        let built = build(&mappings, json!({"code": [3.14, true, "x", 7]}))?;
        let values: Vec<&FieldValue> = built.document.fields.iter().map(|f| &f.value).collect();
        assert_eq!(
            values,
            vec![
                &FieldValue::Keyword("3.14".to_string()),
                &FieldValue::Keyword("true".to_string()),
                &FieldValue::Keyword("x".to_string()),
                &FieldValue::Keyword("7".to_string()),
            ]
        );
        assert!(built.mappings.is_none());
        Ok(())
    }

    #[test]
    fn test_bool_rejects_strings() {
        let mut mappings = Mappings::new();
        mappings.insert("ok", Property::new(FieldType::Bool));
        assert!(matches!(
            build(&mappings, json!({"ok": "true"})),
            Err(Error::TypeConflict { .. })
        ));
    }

    #[test]
    fn test_timestamp_extraction() -> Result<()> {
        let built = build(&Mappings::new(), json!({"@timestamp": 1234, "a": "x"}))?;
        assert_eq!(built.document.timestamp, 1234);
        assert_eq!(built.document.source, r#"{"a":"x"}"#);

        let built = build(&Mappings::new(), json!({"@timestamp": "not a date"}))?;
        assert!(built.document.timestamp > 0);
        assert!(built.document.source.contains("not a date"));

        let built = build(&Mappings::new(), json!({"@timestamp": "2024-01-01"}))?;
        assert_ne!(built.document.timestamp, 1_704_067_200_000);
        assert_eq!(built.document.source, r#"{"@timestamp":"2024-01-01"}"#);

        let built = build(&Mappings::new(), json!({"@timestamp": "2024-01-01T00:00:00Z"}))?;
        assert_eq!(built.document.timestamp, 1_704_067_200_000);
        assert_eq!(built.document.source, "{}");
        Ok(())
    }

    #[test]
    fn test_bool_fields_feed_all() -> Result<()> {
        let built = build(&Mappings::new(), json!({"active": true, "pages": 3}))?;
        let in_all: Vec<(&str, bool)> = built
            .document
            .fields
            .iter()
            .map(|f| (f.name.as_str(), f.include_in_all))
            .collect();
        assert_eq!(in_all, vec![("active", true), ("pages", false)]);
        Ok(())
    }

    #[test]
    fn test_unindexed_and_metadata_fields() -> Result<()> {
        let mut mappings = Mappings::new();
        let mut hidden = Property::new(FieldType::Text);
        hidden.index = false;
        mappings.insert("secret", hidden);
        let built = build(&mappings, json!({"secret": 5}))?;
        assert!(built.document.fields.is_empty());
        assert!(built.document.source.contains("secret"));

        assert!(matches!(
            build(&mappings, json!({"_id": "x"})),
            Err(Error::ParsingException(_))
        ));
        Ok(())
    }

    #[test]
    fn test_time_format() -> Result<()> {
        let mut mappings = Mappings::new();
        mappings.insert("at", Property::new(FieldType::Time).with_format("yyyy-MM-dd"));
        let built = build(&mappings, json!({"at": "1970-01-02"}))?;
        assert_eq!(built.document.fields[0].value, FieldValue::Time(86_400_000));
        assert!(matches!(
            build(&mappings, json!({"at": "02/01/1970"})),
            Err(Error::ParsingException(_))
        ));
        Ok(())
    }

    fn scalar() -> impl Strategy<Value = Value> {
        prop_oneof![
            any::<bool>().prop_map(Value::Bool),
            any::<i32>().prop_map(|n| json!(n)),
            "[a-z]{1,8}".prop_map(Value::String),
        ]
    }

    proptest! {
        #[test]
        fn inference_is_idempotent(
            doc in prop::collection::btree_map("[a-z]{1,5}", scalar(), 1..6)
        ) {
            let doc = Value::Object(doc.into_iter().collect());
            let first = build(&Mappings::new(), doc.clone()).unwrap();
            let mappings = first.mappings.unwrap();
            let second = build(&mappings, doc).unwrap();
            prop_assert!(second.mappings.is_none());
        }
    }
}
