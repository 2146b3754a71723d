//! Index administration: create, delete, mappings, settings, templates and
//! stats.

use crate::pattern::glob_match;
use quarry::analysis::IndexSettings;
use quarry::catalog::{IndexCatalog, IndexTemplate};
use quarry::mapping::Mappings;
use quarry::storage::StorageKind;
use quarry::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// One row of the index listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub index: String,
    pub storage_type: StorageKind,
    #[serde(rename = "docs.count")]
    pub doc_count: u64,
    #[serde(rename = "store.size")]
    pub store_size_bytes: u64,
    pub creation_date: String,
}

fn acknowledged() -> Value {
    json!({"acknowledged": true})
}

/// Create an index from a `{settings?, mappings?}` body.
pub fn create_index(
    catalog: &IndexCatalog,
    name: &str,
    storage_kind: Option<StorageKind>,
    body: &Value,
) -> Result<Value> {
    let (settings, mappings) = match body {
        Value::Null => (None, None),
        Value::Object(obj) => {
            if let Some(key) = obj.keys().find(|k| !matches!(k.as_str(), "settings" | "mappings")) {
                return Err(Error::parsing(format!("unknown key [{}] for create index", key)));
            }
            let settings = obj.get("settings").map(IndexSettings::from_json).transpose()?;
            let mappings = obj.get("mappings").map(Mappings::from_json).transpose()?;
            (settings, mappings)
        }
        _ => return Err(Error::parsing("create index body must be an object")),
    };
    catalog.create(name, storage_kind, settings, mappings)?;
    Ok(json!({
        "acknowledged": true,
        "shards_acknowledged": true,
        "index": name,
    }))
}

pub async fn delete_index(catalog: &IndexCatalog, name: &str) -> Result<Value> {
    catalog.delete(name).await?;
    Ok(acknowledged())
}

/// Index names addressed by `target`: a name, a `*` pattern, `_all` or a
/// comma list. A missing exact name is not-found.
fn resolve_names(catalog: &IndexCatalog, target: &str) -> Result<Vec<String>> {
    let mut names = Vec::new();
    let parts: Vec<&str> = target.split(',').map(str::trim).filter(|p| !p.is_empty()).collect();
    if parts.is_empty() {
        return Ok(catalog.list(""));
    }
    for part in parts {
        if part == "_all" || part.contains('*') {
            names.extend(catalog.list("").into_iter().filter(|n| part == "_all" || glob_match(part, n)));
        } else {
            catalog.require(part)?;
            names.push(part.to_string());
        }
    }
    names.sort();
    names.dedup();
    Ok(names)
}

/// `{<index>: {mappings: {properties: {...}}}}`
pub fn get_mapping(catalog: &IndexCatalog, target: &str) -> Result<Value> {
    let mut out = Map::new();
    for name in resolve_names(catalog, target)? {
        let handle = catalog.require(&name)?;
        out.insert(name, json!({"mappings": &*handle.mappings()}));
    }
    Ok(Value::Object(out))
}

pub fn put_mapping(catalog: &IndexCatalog, name: &str, body: &Value) -> Result<Value> {
    let handle = catalog.require(name)?;
    handle.put_mappings(Mappings::from_json(body)?)?;
    Ok(acknowledged())
}

/// `{<index>: {settings: {index: {...}}}}`
pub fn get_settings(catalog: &IndexCatalog, target: &str) -> Result<Value> {
    let mut out = Map::new();
    for name in resolve_names(catalog, target)? {
        let handle = catalog.require(&name)?;
        let meta = handle.meta();
        let mut index = serde_json::to_value(&meta.settings)?;
        if let Value::Object(map) = &mut index {
            map.insert("provided_name".to_string(), json!(name));
            map.insert(
                "creation_date".to_string(),
                json!(meta.created_at.timestamp_millis().to_string()),
            );
            map.insert("storage_type".to_string(), json!(meta.storage_type));
        }
        out.insert(name, json!({"settings": {"index": index}}));
    }
    Ok(Value::Object(out))
}

/// Replace the index settings; analysis changes are refused once the
/// index holds documents.
pub fn put_settings(catalog: &IndexCatalog, name: &str, body: &Value) -> Result<Value> {
    let handle = catalog.require(name)?;
    handle.update_settings(IndexSettings::from_json(body)?)?;
    Ok(acknowledged())
}

/// Store a composable template:
/// `{index_patterns, priority?, template?: {settings?, mappings?}}`.
pub fn put_index_template(catalog: &IndexCatalog, name: &str, body: &Value) -> Result<Value> {
    let obj = body
        .as_object()
        .ok_or_else(|| Error::parsing("index template body must be an object"))?;
    if let Some(key) = obj
        .keys()
        .find(|k| !matches!(k.as_str(), "index_patterns" | "priority" | "template"))
    {
        return Err(Error::parsing(format!("unknown key [{}] in index template", key)));
    }
    let index_patterns = match obj.get("index_patterns") {
        Some(Value::String(p)) => vec![p.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| v.as_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| Error::parsing("[index_patterns] must hold strings"))?,
        _ => return Err(Error::parsing("index template requires [index_patterns]")),
    };
    let priority = match obj.get("priority") {
        None | Some(Value::Null) => 0,
        Some(v) => v
            .as_u64()
            .and_then(|p| u32::try_from(p).ok())
            .ok_or_else(|| Error::parsing(format!("[priority] must be a non-negative integer, got {}", v)))?,
    };
    let inner = obj.get("template").cloned().unwrap_or(Value::Null);
    let settings = inner.get("settings").map(IndexSettings::from_json).transpose()?;
    let mappings = inner.get("mappings").map(Mappings::from_json).transpose()?;
    catalog.templates().put(IndexTemplate {
        name: name.to_string(),
        index_patterns,
        priority,
        settings,
        mappings,
    })?;
    Ok(acknowledged())
}

/// `{index_templates: [{name, index_template}]}` for templates whose name
/// matches `pattern` (all when absent).
pub fn get_index_template(catalog: &IndexCatalog, pattern: Option<&str>) -> Result<Value> {
    let templates: Vec<Value> = catalog
        .templates()
        .list()
        .into_iter()
        .filter(|t| pattern.map_or(true, |p| glob_match(p, &t.name)))
        .map(|t| {
            let mut inner = Map::new();
            if let Some(settings) = &t.settings {
                inner.insert("settings".to_string(), json!({"index": settings}));
            }
            if let Some(mappings) = &t.mappings {
                inner.insert("mappings".to_string(), json!(mappings));
            }
            json!({
                "name": t.name,
                "index_template": {
                    "index_patterns": t.index_patterns,
                    "priority": t.priority,
                    "template": inner,
                }
            })
        })
        .collect();
    match pattern {
        Some(p) if templates.is_empty() && !p.contains('*') => {
            Err(Error::NotFound(format!("index_template [{}] missing", p)))
        }
        _ => Ok(json!({"index_templates": templates})),
    }
}

pub fn delete_index_template(catalog: &IndexCatalog, name: &str) -> Result<Value> {
    catalog.templates().delete(name)?;
    Ok(acknowledged())
}

/// Indices whose names start with `prefix`, sorted.
pub fn list_indices(catalog: &IndexCatalog, prefix: &str) -> Vec<IndexInfo> {
    catalog
        .list(prefix)
        .into_iter()
        .filter_map(|name| catalog.get(&name))
        .map(|handle| IndexInfo {
            index: handle.name().to_string(),
            storage_type: handle.storage_kind(),
            doc_count: handle.doc_count(),
            store_size_bytes: handle.storage_size_bytes(),
            creation_date: handle.meta().created_at.to_rfc3339(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry::catalog::CatalogOptions;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_create_get_put_mapping() -> Result<()> {
        let dir = TempDir::new()?;
        let catalog = IndexCatalog::open(dir.path(), CatalogOptions::default())?;
        create_index(
            &catalog,
            "books",
            None,
            &json!({
                "settings": {"analysis": {"analyzer": {"folded": {"type": "simple"}}}},
                "mappings": {"properties": {
                    "title": {"type": "text", "analyzer": "folded"},
                    "year": {"type": "integer"}
                }}
            }),
        )?;

        let mapping = get_mapping(&catalog, "books")?;
        let props = &mapping["books"]["mappings"]["properties"];
        assert_eq!(props["title"]["analyzer"], "folded");
        assert_eq!(props["year"]["type"], "numeric");
        assert_eq!(props["_id"]["type"], "keyword");
        assert_eq!(props["@timestamp"]["type"], "time");

        put_mapping(&catalog, "books", &json!({"properties": {"tag": {"type": "keyword"}}}))?;
        let mapping = get_mapping(&catalog, "b*")?;
        assert_eq!(mapping["books"]["mappings"]["properties"]["tag"]["type"], "keyword");

        let err = put_mapping(&catalog, "books", &json!({"properties": {"year": {"type": "text"}}})).unwrap_err();
        assert!(matches!(err, Error::IllegalArgument(_)));
        assert!(get_mapping(&catalog, "nope").unwrap_err().is_not_found());
        Ok(())
    }

    #[tokio::test]
    async fn test_settings_and_listing() -> Result<()> {
        let dir = TempDir::new()?;
        let catalog = IndexCatalog::open(dir.path(), CatalogOptions::default())?;
        create_index(&catalog, "logs-1", None, &Value::Null)?;
        create_index(&catalog, "logs-2", None, &json!({"settings": {"number_of_shards": 1}}))?;
        assert!(create_index(&catalog, "logs-3", None, &json!({"aliases": {}})).is_err());

        let settings = get_settings(&catalog, "logs-2")?;
        assert_eq!(settings["logs-2"]["settings"]["index"]["number_of_shards"], 1);
        assert_eq!(settings["logs-2"]["settings"]["index"]["provided_name"], "logs-2");

        put_settings(&catalog, "logs-1", &json!({"analysis": {"analyzer": {"a": {"type": "whitespace"}}}}))?;
        let listed: Vec<String> = list_indices(&catalog, "logs").into_iter().map(|i| i.index).collect();
        assert_eq!(listed, vec!["logs-1", "logs-2"]);

        delete_index(&catalog, "logs-1").await?;
        assert!(delete_index(&catalog, "logs-1").await.unwrap_err().is_not_found());
        Ok(())
    }

    #[tokio::test]
    async fn test_index_templates() -> Result<()> {
        let dir = TempDir::new()?;
        let catalog = IndexCatalog::open(dir.path(), CatalogOptions::default())?;
        put_index_template(
            &catalog,
            "events",
            &json!({
                "index_patterns": ["events-*"],
                "priority": 5,
                "template": {
                    "settings": {"number_of_shards": 1},
                    "mappings": {"properties": {"kind": {"type": "keyword"}}}
                }
            }),
        )?;
        assert!(put_index_template(&catalog, "bad", &json!({"priority": 1})).is_err());
        assert!(put_index_template(&catalog, "bad", &json!({"index_patterns": "x-*", "order": 1})).is_err());

        create_index(&catalog, "events-1", None, &Value::Null)?;
        let mapping = get_mapping(&catalog, "events-1")?;
        assert_eq!(mapping["events-1"]["mappings"]["properties"]["kind"]["type"], "keyword");
        let settings = get_settings(&catalog, "events-1")?;
        assert_eq!(settings["events-1"]["settings"]["index"]["number_of_shards"], 1);

        let listed = get_index_template(&catalog, Some("ev*"))?;
        assert_eq!(listed["index_templates"][0]["name"], "events");
        assert_eq!(listed["index_templates"][0]["index_template"]["priority"], 5);
        assert_eq!(get_index_template(&catalog, None)?["index_templates"].as_array().map(Vec::len), Some(1));

        delete_index_template(&catalog, "events")?;
        assert!(get_index_template(&catalog, Some("events")).unwrap_err().is_not_found());
        assert!(delete_index_template(&catalog, "events").unwrap_err().is_not_found());
        Ok(())
    }
}
