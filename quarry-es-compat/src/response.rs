//! Elasticsearch response shapes

use crate::error::{EsErrorBody, EsErrorDetail};
use quarry::aggregations::{AggregationResult, AggregationValue, Bucket, BucketKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// ES search response format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub took: u64,
    pub timed_out: bool,
    #[serde(rename = "_shards")]
    pub shards: ShardStats,
    pub hits: HitsResponse,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub aggregations: BTreeMap<String, EsAggregationResult>,
    /// Last per-index failure when some, but not all, indices failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<EsErrorDetail>,
}

/// One shard per searched index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ShardStats {
    pub total: u32,
    pub successful: u32,
    pub skipped: u32,
    pub failed: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HitsResponse {
    pub total: TotalHits,
    pub max_score: Option<f32>,
    pub hits: Vec<Hit>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TotalHits {
    pub value: u64,
    pub relation: String,
}

impl TotalHits {
    pub fn exact(value: u64) -> Self {
        Self {
            value,
            relation: "eq".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    #[serde(rename = "_index")]
    pub index: String,
    #[serde(rename = "_type")]
    pub doc_type: String,
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_score")]
    pub score: Option<f32>,
    /// RFC3339 rendering of the document timestamp.
    #[serde(rename = "@timestamp")]
    pub timestamp: String,
    #[serde(rename = "_source", default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, Vec<Value>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub highlight: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EsAggregationResult {
    Histogram {
        buckets: Vec<EsBucket>,
        interval: String,
    },
    Buckets {
        buckets: Vec<EsBucket>,
    },
    Value {
        value: Option<f64>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EsBucket {
    pub key: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_as_string: Option<String>,
    pub doc_count: u64,
}

/// Render merged, finalized aggregation results.
pub fn map_aggregations(results: &[AggregationResult]) -> BTreeMap<String, EsAggregationResult> {
    results
        .iter()
        .map(|result| (result.name.clone(), map_aggregation(&result.value)))
        .collect()
}

fn map_aggregation(value: &AggregationValue) -> EsAggregationResult {
    match value {
        AggregationValue::Buckets(buckets) => EsAggregationResult::Buckets {
            buckets: buckets.iter().map(map_bucket).collect(),
        },
        AggregationValue::Histogram { buckets, interval } => EsAggregationResult::Histogram {
            buckets: buckets.iter().map(map_bucket).collect(),
            interval: interval.clone(),
        },
        metric => EsAggregationResult::Value {
            value: metric.metric(),
        },
    }
}

fn map_bucket(bucket: &Bucket) -> EsBucket {
    let key = match &bucket.key {
        BucketKey::Str(s) => Value::String(s.clone()),
        // Integral keys render without a fraction, as Elasticsearch does.
        BucketKey::Num(n) if n.fract() == 0.0 && n.abs() < i64::MAX as f64 => Value::from(*n as i64),
        BucketKey::Num(n) => Value::from(*n),
    };
    EsBucket {
        key,
        key_as_string: bucket.key_as_string.clone(),
        doc_count: bucket.doc_count,
    }
}

/// ES multi-search response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MsearchResponse {
    pub took: u64,
    pub responses: Vec<MsearchItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MsearchItem {
    Success(SearchResponse),
    Error(EsErrorBody),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_hit_serialization() -> serde_json::Result<()> {
        let hit = Hit {
            index: "logs".to_string(),
            doc_type: "_doc".to_string(),
            id: "1".to_string(),
            score: Some(1.5),
            timestamp: "2024-01-01T00:00:00.000Z".to_string(),
            source: Some(json!({"a": 1})),
            fields: BTreeMap::new(),
            highlight: BTreeMap::new(),
        };
        let json = serde_json::to_value(&hit)?;
        assert_eq!(json["_type"], "_doc");
        assert_eq!(json["@timestamp"], "2024-01-01T00:00:00.000Z");
        assert!(json.get("highlight").is_none());
        assert!(json.get("fields").is_none());
        Ok(())
    }

    #[test]
    fn test_aggregation_shapes() -> serde_json::Result<()> {
        let results = vec![
            AggregationResult {
                name: "avg_price".to_string(),
                value: AggregationValue::Avg { sum: 30.0, count: 4 },
            },
            AggregationResult {
                name: "daily".to_string(),
                value: AggregationValue::Histogram {
                    buckets: vec![Bucket {
                        key: BucketKey::Num(86_400_000.0),
                        key_as_string: Some("1970-01-02T00:00:00.000Z".to_string()),
                        doc_count: 2,
                    }],
                    interval: "day".to_string(),
                },
            },
            AggregationResult {
                name: "none".to_string(),
                value: AggregationValue::Min(None),
            },
        ];
        let json = serde_json::to_value(map_aggregations(&results))?;
        assert_eq!(json["avg_price"], json!({"value": 7.5}));
        assert_eq!(json["daily"]["interval"], "day");
        assert_eq!(json["daily"]["buckets"][0]["key"], json!(86_400_000));
        assert_eq!(json["none"], json!({"value": null}));
        Ok(())
    }

    #[test]
    fn test_msearch_error_item() -> serde_json::Result<()> {
        let item = MsearchItem::Error(EsErrorBody::from(quarry::Error::parsing("bad")));
        let json = serde_json::to_value(&item)?;
        assert_eq!(json["status"], 400);
        assert_eq!(json["error"]["type"], "parsing_exception");
        Ok(())
    }
}
