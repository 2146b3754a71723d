use anyhow::{Context, Result};
use quarry::catalog::IndexCatalog;
use serde_json::Value;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;
use std::time::Instant;

/// Source for documents to index
pub enum DocumentSource {
    FromFile(PathBuf),
    FromStdin,
}

impl DocumentSource {
    pub fn reader(&self) -> io::Result<Box<dyn BufRead + Send>> {
        match self {
            DocumentSource::FromFile(path) => {
                let file = File::open(path)?;
                Ok(Box::new(BufReader::new(file)))
            }
            DocumentSource::FromStdin => Ok(Box::new(BufReader::new(io::stdin()))),
        }
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
struct IndexTotals {
    indexed: usize,
    failed: usize,
}

/// Split a caller-supplied `_id` off the document body.
fn take_id(mut doc: Value) -> (Option<String>, Value) {
    let id = doc.as_object_mut().and_then(|obj| obj.remove("_id")).and_then(|id| match id {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    });
    (id, doc)
}

/// Index JSONL documents into `index`, creating it on first use.
///
/// A document's `_id`, when present, becomes its id; others get a generated
/// one. Documents that fail to build are reported and skipped.
pub async fn run_index(catalog: &IndexCatalog, index: &str, source: DocumentSource, batch_size: usize) -> Result<()> {
    let handle = catalog.get_or_create(index)?;
    let reader = source.reader()?;
    let start = Instant::now();
    let batch_size = batch_size.max(1);

    let mut totals = IndexTotals::default();
    let mut batch = Vec::with_capacity(batch_size);
    for (line_no, line_result) in reader.lines().enumerate() {
        let line = line_result.context("Failed to read line")?;
        if line.trim().is_empty() {
            continue;
        }
        let doc: Value = serde_json::from_str(&line).with_context(|| {
            format!(
                "Line {}: failed to parse JSON: {}",
                line_no + 1,
                line.chars().take(100).collect::<String>()
            )
        })?;
        batch.push(take_id(doc));

        if batch.len() >= batch_size {
            write_batch(&handle, std::mem::take(&mut batch), &mut totals).await?;
        }
    }
    if !batch.is_empty() {
        write_batch(&handle, batch, &mut totals).await?;
    }

    let elapsed = start.elapsed().as_secs_f64();
    println!("Indexed {} documents into '{}' in {:.2}s", totals.indexed, index, elapsed);
    if totals.failed > 0 {
        println!("  {} documents failed", totals.failed);
    }
    Ok(())
}

async fn write_batch(
    handle: &quarry::catalog::IndexHandle,
    batch: Vec<(Option<String>, Value)>,
    totals: &mut IndexTotals,
) -> Result<()> {
    for item in handle.bulk(batch).await? {
        match item {
            Ok(_) => totals.indexed += 1,
            Err(e) => {
                tracing::warn!("Document rejected: {}", e);
                totals.failed += 1;
            }
        }
    }
    Ok(())
}
