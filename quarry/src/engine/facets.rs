//! Aggregations over the `_facets` fast field.
//!
//! Every aggregatable value is indexed once per document as a tagged facet
//! entry (see [`super::terms`]). A single collector counts entries across
//! the matching documents; each aggregation then reads its own field's
//! slice of the counts.

use super::terms::{decode_facet, FacetValue};
use crate::aggregations::{
    date_bucket, format_millis, histogram_key, AggregationRequest, AggregationResult,
    AggregationType, AggregationValue, Bucket, BucketKey, CalendarUnit, DateInterval,
};
use std::collections::HashMap;
use tantivy::collector::{Collector, SegmentCollector};
use tantivy::columnar::StrColumn;
use tantivy::{DocId, Score, SegmentOrdinal, SegmentReader};

pub type FacetCounts = HashMap<String, u64>;

/// Counts `_facets` entries over the matching documents.
pub struct FacetCountCollector {
    field: String,
}

impl FacetCountCollector {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }
}

pub struct FacetSegmentCollector {
    column: Option<StrColumn>,
    ords: HashMap<u64, u64>,
}

impl Collector for FacetCountCollector {
    type Fruit = FacetCounts;
    type Child = FacetSegmentCollector;

    fn for_segment(
        &self,
        _segment_local_id: SegmentOrdinal,
        segment: &SegmentReader,
    ) -> tantivy::Result<Self::Child> {
        let column = segment.fast_fields().str(&self.field)?;
        Ok(FacetSegmentCollector {
            column,
            ords: HashMap::new(),
        })
    }

    fn requires_scoring(&self) -> bool {
        false
    }

    fn merge_fruits(&self, segment_fruits: Vec<FacetCounts>) -> tantivy::Result<FacetCounts> {
        let mut merged = FacetCounts::new();
        for fruit in segment_fruits {
            for (entry, count) in fruit {
                *merged.entry(entry).or_insert(0) += count;
            }
        }
        Ok(merged)
    }
}

impl SegmentCollector for FacetSegmentCollector {
    type Fruit = FacetCounts;

    fn collect(&mut self, doc: DocId, _score: Score) {
        let Some(column) = &self.column else {
            return;
        };
        for ord in column.term_ords(doc) {
            *self.ords.entry(ord).or_insert(0) += 1;
        }
    }

    fn harvest(self) -> FacetCounts {
        let mut counts = FacetCounts::with_capacity(self.ords.len());
        let Some(column) = self.column else {
            return counts;
        };
        let mut buf = String::new();
        for (ord, count) in self.ords {
            buf.clear();
            match column.ord_to_str(ord, &mut buf) {
                Ok(true) => {
                    counts.insert(buf.clone(), count);
                }
                Ok(false) => {}
                Err(e) => tracing::warn!("Failed to resolve facet ordinal {}: {}", ord, e),
            }
        }
        counts
    }
}

/// Evaluate aggregation requests against one index's facet counts.
pub fn compute(requests: &[AggregationRequest], counts: &FacetCounts) -> Vec<AggregationResult> {
    let mut by_field: HashMap<&str, Vec<(FacetValue<'_>, u64)>> = HashMap::new();
    for (entry, count) in counts {
        if let Some((field, value)) = decode_facet(entry) {
            by_field.entry(field).or_default().push((value, *count));
        }
    }

    requests
        .iter()
        .map(|request| {
            let values = by_field
                .get(request.agg_type.field())
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            AggregationResult {
                name: request.name.clone(),
                value: evaluate(&request.agg_type, values),
            }
        })
        .collect()
}

fn evaluate(agg: &AggregationType, values: &[(FacetValue<'_>, u64)]) -> AggregationValue {
    let numbers = || values.iter().filter_map(|(v, c)| v.as_f64().map(|n| (n, *c)));
    match agg {
        AggregationType::Terms { .. } => AggregationValue::Buckets(
            values
                .iter()
                .map(|(value, count)| {
                    let (key, key_as_string) = match value {
                        FacetValue::Str(s) => (BucketKey::Str(s.to_string()), None),
                        FacetValue::Num(n) => (BucketKey::Num(*n), None),
                        FacetValue::Time(t) => (BucketKey::Num(*t as f64), Some(format_millis(*t))),
                    };
                    Bucket {
                        key,
                        key_as_string,
                        doc_count: *count,
                    }
                })
                .collect(),
        ),
        AggregationType::Min { .. } => AggregationValue::Min(numbers().map(|(n, _)| n).reduce(f64::min)),
        AggregationType::Max { .. } => AggregationValue::Max(numbers().map(|(n, _)| n).reduce(f64::max)),
        AggregationType::Sum { .. } => AggregationValue::Sum(numbers().map(|(n, c)| n * c as f64).sum()),
        AggregationType::Avg { .. } => {
            let (sum, count) = numbers().fold((0.0, 0), |(s, k), (n, c)| (s + n * c as f64, k + c));
            AggregationValue::Avg { sum, count }
        }
        AggregationType::Count { .. } => AggregationValue::Count(values.iter().map(|(_, c)| c).sum()),
        AggregationType::Histogram { interval, .. } => {
            let mut buckets: HashMap<u64, Bucket> = HashMap::new();
            for (n, c) in numbers() {
                let key = histogram_key(n, *interval);
                buckets
                    .entry(key.to_bits())
                    .or_insert_with(|| Bucket {
                        key: BucketKey::Num(key),
                        key_as_string: None,
                        doc_count: 0,
                    })
                    .doc_count += c;
            }
            AggregationValue::Histogram {
                buckets: buckets.into_values().collect(),
                interval: interval.to_string(),
            }
        }
        AggregationType::DateHistogram { interval, .. } => {
            let mut buckets: HashMap<i64, Bucket> = HashMap::new();
            for (n, c) in numbers() {
                let key = date_bucket(n as i64, *interval);
                buckets
                    .entry(key)
                    .or_insert_with(|| Bucket {
                        key: BucketKey::Num(key as f64),
                        key_as_string: Some(format_millis(key)),
                        doc_count: 0,
                    })
                    .doc_count += c;
            }
            AggregationValue::Histogram {
                buckets: buckets.into_values().collect(),
                interval: interval_label(*interval),
            }
        }
    }
}

fn interval_label(interval: DateInterval) -> String {
    match interval {
        DateInterval::Fixed(ms) => format!("{}ms", ms),
        DateInterval::Calendar(unit) => match unit {
            CalendarUnit::Minute => "minute",
            CalendarUnit::Hour => "hour",
            CalendarUnit::Day => "day",
            CalendarUnit::Week => "week",
            CalendarUnit::Month => "month",
            CalendarUnit::Quarter => "quarter",
            CalendarUnit::Year => "year",
        }
        .to_string(),
    }
}
