//! Engine metrics, exported through the `metrics` facade.

use std::time::Duration;

/// Record documents written to an index
pub fn record_documents_written(index: &str, inserted: u64, replaced: u64) {
    metrics::counter!(
        "quarry_documents_written_total",
        "index" => index.to_string(),
        "kind" => "inserted",
    )
    .increment(inserted);
    metrics::counter!(
        "quarry_documents_written_total",
        "index" => index.to_string(),
        "kind" => "replaced",
    )
    .increment(replaced);
}

/// Record a document delete
pub fn record_document_deleted(index: &str) {
    metrics::counter!(
        "quarry_documents_deleted_total",
        "index" => index.to_string(),
    )
    .increment(1);
}

/// Record one per-index search execution
pub fn record_search(index: &str, duration: Duration, outcome: &'static str) {
    metrics::histogram!(
        "quarry_search_duration_seconds",
        "index" => index.to_string(),
    )
    .record(duration.as_secs_f64());
    metrics::counter!(
        "quarry_searches_total",
        "index" => index.to_string(),
        "outcome" => outcome,
    )
    .increment(1);
}

/// Update the number of open indices
pub fn update_indices_count(count: usize) {
    metrics::gauge!("quarry_indices_count").set(count as f64);
}
