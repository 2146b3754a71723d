use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationRequest {
    pub name: String,
    #[serde(flatten)]
    pub agg_type: AggregationType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AggregationType {
    Terms {
        field: String,
        size: usize,
    },
    Min {
        field: String,
    },
    Max {
        field: String,
    },
    Avg {
        field: String,
    },
    Sum {
        field: String,
    },
    /// Number of values of the field.
    Count {
        field: String,
    },
    Histogram {
        field: String,
        interval: f64,
        min_doc_count: u64,
    },
    DateHistogram {
        field: String,
        interval: DateInterval,
        min_doc_count: u64,
    },
}

impl AggregationType {
    pub fn field(&self) -> &str {
        match self {
            AggregationType::Terms { field, .. }
            | AggregationType::Min { field }
            | AggregationType::Max { field }
            | AggregationType::Avg { field }
            | AggregationType::Sum { field }
            | AggregationType::Count { field }
            | AggregationType::Histogram { field, .. }
            | AggregationType::DateHistogram { field, .. } => field,
        }
    }

    /// Metric aggregations read ordered (numeric or time) values.
    pub fn is_metric(&self) -> bool {
        matches!(
            self,
            AggregationType::Min { .. }
                | AggregationType::Max { .. }
                | AggregationType::Avg { .. }
                | AggregationType::Sum { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalendarUnit {
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateInterval {
    /// Fixed width in milliseconds.
    Fixed(i64),
    Calendar(CalendarUnit),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationResult {
    pub name: String,
    pub value: AggregationValue,
}

/// Per-index partial results, kept in a form that merges exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AggregationValue {
    Min(Option<f64>),
    Max(Option<f64>),
    Sum(f64),
    Avg { sum: f64, count: u64 },
    Count(u64),
    Buckets(Vec<Bucket>),
    Histogram {
        buckets: Vec<Bucket>,
        /// Interval as requested, echoed in the response.
        interval: String,
    },
}

impl AggregationValue {
    /// Final single value of a metric; `None` for bucket aggregations and
    /// for metrics over no values.
    pub fn metric(&self) -> Option<f64> {
        match self {
            AggregationValue::Min(v) | AggregationValue::Max(v) => *v,
            AggregationValue::Sum(v) => Some(*v),
            AggregationValue::Avg { sum, count } => (*count > 0).then(|| sum / *count as f64),
            AggregationValue::Count(c) => Some(*c as f64),
            AggregationValue::Buckets(_) | AggregationValue::Histogram { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BucketKey {
    Str(String),
    Num(f64),
}

impl BucketKey {
    /// Stable identity used to merge buckets across indices.
    pub fn merge_key(&self) -> String {
        match self {
            BucketKey::Str(s) => format!("s:{}", s),
            BucketKey::Num(n) => format!("n:{}", n),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    pub key: BucketKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_as_string: Option<String>,
    pub doc_count: u64,
}
