//! Aggregation model: requests, per-index partial results, cross-index
//! merge and final shaping (bucket order, truncation, empty-bucket fill).

mod interval;
pub mod types;

pub use interval::{
    date_bucket, format_millis, histogram_key, next_date_bucket, parse_calendar_unit,
    parse_fixed_interval,
};
pub use types::{
    AggregationRequest, AggregationResult, AggregationType, AggregationValue, Bucket, BucketKey,
    CalendarUnit, DateInterval,
};

use std::cmp::Ordering;
use std::collections::HashMap;

/// Upper bound on buckets synthesized when filling histogram gaps.
const MAX_FILLED_BUCKETS: usize = 10_000;

/// Merge per-index results key-wise by aggregation name.
///
/// Bucket counts add up; min and max take the extreme; averages recombine
/// from their sums and counts. Results keep the order of first appearance.
pub fn merge(partials: Vec<Vec<AggregationResult>>) -> Vec<AggregationResult> {
    let mut merged: Vec<AggregationResult> = Vec::new();
    for results in partials {
        for result in results {
            match merged.iter_mut().find(|m| m.name == result.name) {
                Some(existing) => combine(&mut existing.value, result.value),
                None => merged.push(result),
            }
        }
    }
    merged
}

fn combine(acc: &mut AggregationValue, other: AggregationValue) {
    use AggregationValue::*;
    match (acc, other) {
        (Min(a), Min(b)) => *a = pick(*a, b, f64::min),
        (Max(a), Max(b)) => *a = pick(*a, b, f64::max),
        (Sum(a), Sum(b)) => *a += b,
        (Avg { sum, count }, Avg { sum: s, count: c }) => {
            *sum += s;
            *count += c;
        }
        (Count(a), Count(b)) => *a += b,
        (Buckets(a), Buckets(b)) | (Histogram { buckets: a, .. }, Histogram { buckets: b, .. }) => {
            merge_buckets(a, b)
        }
        // Indices disagree on the field type; keep the first contribution.
        _ => {}
    }
}

fn pick(a: Option<f64>, b: Option<f64>, f: fn(f64, f64) -> f64) -> Option<f64> {
    match (a, b) {
        (Some(x), Some(y)) => Some(f(x, y)),
        (x, y) => x.or(y),
    }
}

fn merge_buckets(acc: &mut Vec<Bucket>, other: Vec<Bucket>) {
    let mut index: HashMap<String, usize> = acc
        .iter()
        .enumerate()
        .map(|(i, b)| (b.key.merge_key(), i))
        .collect();
    for bucket in other {
        match index.get(&bucket.key.merge_key()) {
            Some(&i) => acc[i].doc_count += bucket.doc_count,
            None => {
                index.insert(bucket.key.merge_key(), acc.len());
                acc.push(bucket);
            }
        }
    }
}

fn compare_keys(a: &BucketKey, b: &BucketKey) -> Ordering {
    match (a, b) {
        (BucketKey::Num(x), BucketKey::Num(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (BucketKey::Str(x), BucketKey::Str(y)) => x.cmp(y),
        (BucketKey::Num(_), BucketKey::Str(_)) => Ordering::Less,
        (BucketKey::Str(_), BucketKey::Num(_)) => Ordering::Greater,
    }
}

/// Shape merged results for the response.
///
/// Terms buckets sort by count (then key) and are cut to the requested
/// size; histogram buckets sort by key, and gaps are filled with empty
/// buckets when `min_doc_count` is zero.
pub fn finalize(requests: &[AggregationRequest], results: &mut [AggregationResult]) {
    for result in results.iter_mut() {
        let Some(request) = requests.iter().find(|r| r.name == result.name) else {
            continue;
        };
        match (&request.agg_type, &mut result.value) {
            (AggregationType::Terms { size, .. }, AggregationValue::Buckets(buckets)) => {
                buckets.sort_by(|a, b| {
                    b.doc_count
                        .cmp(&a.doc_count)
                        .then_with(|| compare_keys(&a.key, &b.key))
                });
                buckets.truncate(*size);
            }
            (
                AggregationType::Histogram {
                    interval,
                    min_doc_count,
                    ..
                },
                AggregationValue::Histogram { buckets, .. },
            ) => {
                buckets.sort_by(|a, b| compare_keys(&a.key, &b.key));
                if *min_doc_count == 0 {
                    let step = *interval;
                    fill_gaps(buckets, |key| key + step, |_| None);
                }
                buckets.retain(|b| b.doc_count >= *min_doc_count);
            }
            (
                AggregationType::DateHistogram {
                    interval,
                    min_doc_count,
                    ..
                },
                AggregationValue::Histogram { buckets, .. },
            ) => {
                buckets.sort_by(|a, b| compare_keys(&a.key, &b.key));
                if *min_doc_count == 0 {
                    let interval = *interval;
                    fill_gaps(
                        buckets,
                        |key| next_date_bucket(key as i64, interval) as f64,
                        |key| Some(format_millis(key as i64)),
                    );
                }
                buckets.retain(|b| b.doc_count >= *min_doc_count);
            }
            _ => {}
        }
    }
}

/// Insert empty buckets between the first and last numeric keys.
fn fill_gaps(
    buckets: &mut Vec<Bucket>,
    next: impl Fn(f64) -> f64,
    label: impl Fn(f64) -> Option<String>,
) {
    let (Some(BucketKey::Num(first)), Some(BucketKey::Num(last))) =
        (buckets.first().map(|b| b.key.clone()), buckets.last().map(|b| b.key.clone()))
    else {
        return;
    };
    let mut filled = Vec::with_capacity(buckets.len());
    let mut existing = std::mem::take(buckets).into_iter().peekable();
    let mut key = first;
    while key <= last && filled.len() < MAX_FILLED_BUCKETS {
        match existing.peek() {
            Some(b) if matches!(b.key, BucketKey::Num(k) if k <= key) => {
                if let Some(bucket) = existing.next() {
                    filled.push(bucket);
                }
                continue;
            }
            _ => filled.push(Bucket {
                key: BucketKey::Num(key),
                key_as_string: label(key),
                doc_count: 0,
            }),
        }
        let following = next(key);
        if following <= key {
            break;
        }
        key = following;
    }
    filled.extend(existing);
    *buckets = filled;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bucket(key: &str, doc_count: u64) -> Bucket {
        Bucket {
            key: BucketKey::Str(key.to_string()),
            key_as_string: None,
            doc_count,
        }
    }

    fn num_bucket(key: f64, doc_count: u64) -> Bucket {
        Bucket {
            key: BucketKey::Num(key),
            key_as_string: None,
            doc_count,
        }
    }

    fn result(name: &str, value: AggregationValue) -> AggregationResult {
        AggregationResult {
            name: name.to_string(),
            value,
        }
    }

    #[test]
    fn test_merge_metrics() {
        let merged = merge(vec![
            vec![
                result("lo", AggregationValue::Min(Some(3.0))),
                result("hi", AggregationValue::Max(None)),
                result("mean", AggregationValue::Avg { sum: 10.0, count: 4 }),
                result("n", AggregationValue::Count(4)),
            ],
            vec![
                result("lo", AggregationValue::Min(Some(1.0))),
                result("hi", AggregationValue::Max(Some(7.0))),
                result("mean", AggregationValue::Avg { sum: 20.0, count: 1 }),
                result("n", AggregationValue::Count(1)),
            ],
        ]);
        assert_eq!(merged[0].value.metric(), Some(1.0));
        assert_eq!(merged[1].value.metric(), Some(7.0));
        // weighted by count, not the mean of means
        assert_eq!(merged[2].value.metric(), Some(6.0));
        assert_eq!(merged[3].value.metric(), Some(5.0));
    }

    #[test]
    fn test_merge_and_finalize_terms() {
        let requests = vec![AggregationRequest {
            name: "tags".to_string(),
            agg_type: AggregationType::Terms {
                field: "tag".to_string(),
                size: 2,
            },
        }];
        let mut merged = merge(vec![
            vec![result("tags", AggregationValue::Buckets(vec![bucket("a", 2), bucket("b", 1)]))],
            vec![result("tags", AggregationValue::Buckets(vec![bucket("b", 2), bucket("c", 3)]))],
        ]);
        finalize(&requests, &mut merged);
        let AggregationValue::Buckets(buckets) = &merged[0].value else {
            panic!("expected buckets");
        };
        assert_eq!(buckets, &vec![bucket("b", 3), bucket("c", 3)]);
    }

    #[test]
    fn test_histogram_fill() {
        let requests = vec![AggregationRequest {
            name: "h".to_string(),
            agg_type: AggregationType::Histogram {
                field: "price".to_string(),
                interval: 10.0,
                min_doc_count: 0,
            },
        }];
        let mut results = vec![result(
            "h",
            AggregationValue::Histogram {
                buckets: vec![num_bucket(30.0, 1), num_bucket(0.0, 2)],
                interval: "10".to_string(),
            },
        )];
        finalize(&requests, &mut results);
        let AggregationValue::Histogram { buckets, .. } = &results[0].value else {
            panic!("expected histogram");
        };
        let counts: Vec<u64> = buckets.iter().map(|b| b.doc_count).collect();
        assert_eq!(counts, vec![2, 0, 0, 1]);
    }
}
