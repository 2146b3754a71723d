pub mod admin;
pub mod import;
pub mod search;

pub use admin::{run_analyze, run_create, run_delete, run_list, run_mapping, run_settings, run_template};
pub use import::{run_index, DocumentSource};
pub use search::{orchestrator, run_msearch, run_search, search_body};

use anyhow::{Context, Result};
use serde_json::Value;

/// Parse a JSON argument, naming the argument on failure.
pub(crate) fn parse_json(what: &str, text: &str) -> Result<Value> {
    serde_json::from_str(text).with_context(|| format!("Invalid JSON in {}", what))
}

pub(crate) fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
