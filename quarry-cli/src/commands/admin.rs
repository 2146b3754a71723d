use super::{parse_json, print_json};
use anyhow::Result;
use quarry::catalog::IndexCatalog;
use quarry::storage::StorageKind;
use quarry_es_compat::indices;
use quarry_es_compat::{analyze, AnalyzeRequest};
use serde_json::Value;

pub fn run_create(catalog: &IndexCatalog, index: &str, body: Option<&str>, kind: Option<StorageKind>) -> Result<()> {
    let body = body.map(|b| parse_json("--body", b)).transpose()?.unwrap_or(Value::Null);
    let response = indices::create_index(catalog, index, kind, &body)?;
    print_json(&response)
}

pub async fn run_delete(catalog: &IndexCatalog, index: &str) -> Result<()> {
    let response = indices::delete_index(catalog, index).await?;
    print_json(&response)
}

pub fn run_list(catalog: &IndexCatalog, prefix: &str) -> Result<()> {
    let listed = indices::list_indices(catalog, prefix);
    if listed.is_empty() {
        println!("No indices found");
        return Ok(());
    }
    println!("{:<32} {:<8} {:>12} {:>14}  CREATED", "INDEX", "STORAGE", "DOCS", "SIZE");
    for info in listed {
        println!(
            "{:<32} {:<8} {:>12} {:>14}  {}",
            info.index, info.storage_type, info.doc_count, info.store_size_bytes, info.creation_date
        );
    }
    Ok(())
}

pub fn run_mapping(catalog: &IndexCatalog, target: &str, put: Option<&str>) -> Result<()> {
    if let Some(update) = put {
        indices::put_mapping(catalog, target, &parse_json("--put", update)?)?;
    }
    print_json(&indices::get_mapping(catalog, target)?)
}

pub fn run_settings(catalog: &IndexCatalog, target: &str, put: Option<&str>) -> Result<()> {
    if let Some(update) = put {
        indices::put_settings(catalog, target, &parse_json("--put", update)?)?;
    }
    print_json(&indices::get_settings(catalog, target)?)
}

pub fn run_template(catalog: &IndexCatalog, name: Option<&str>, put: Option<&str>, delete: bool) -> Result<()> {
    match (name, put, delete) {
        (Some(name), Some(body), _) => {
            print_json(&indices::put_index_template(catalog, name, &parse_json("--put", body)?)?)
        }
        (Some(name), None, true) => print_json(&indices::delete_index_template(catalog, name)?),
        (None, Some(_), _) | (None, None, true) => anyhow::bail!("--put and --delete need a template name"),
        (name, None, false) => print_json(&indices::get_index_template(catalog, name)?),
    }
}

pub fn run_analyze(catalog: &IndexCatalog, index: Option<&str>, body: &str) -> Result<()> {
    let request = AnalyzeRequest::parse(&parse_json("analyze body", body)?)?;
    print_json(&analyze(catalog, index, &request)?)
}
