//! Aggregation DSL: `{"<name>": {"<type>": {...}}}` to
//! [`AggregationRequest`]s, validated against an index's mappings.

use quarry::aggregations::{
    parse_calendar_unit, parse_fixed_interval, AggregationRequest, AggregationType, DateInterval,
};
use quarry::mapping::{FieldType, Mappings};
use quarry::{Error, Result};
use serde_json::{Map, Value};

const DEFAULT_TERMS_SIZE: usize = 10;

/// Parse the request's `aggs` object. Order of declaration is kept.
pub fn parse_aggregations(value: &Value) -> Result<Vec<AggregationRequest>> {
    let obj = value
        .as_object()
        .ok_or_else(|| Error::parsing("[aggs] must be an object"))?;
    obj.iter().map(|(name, body)| parse_one(name, body)).collect()
}

fn parse_one(name: &str, body: &Value) -> Result<AggregationRequest> {
    let obj = body.as_object().ok_or_else(|| {
        Error::parsing(format!("Aggregation [{}] definition must be an object", name))
    })?;
    if obj.contains_key("aggs") || obj.contains_key("aggregations") {
        return Err(Error::parsing(format!(
            "Aggregation [{}] does not support sub-aggregations",
            name
        )));
    }
    let mut entries = obj.iter();
    let (kind, params) = match (entries.next(), entries.next()) {
        (Some(entry), None) => entry,
        (None, _) => {
            return Err(Error::parsing(format!(
                "Missing definition for aggregation [{}]",
                name
            )))
        }
        (Some((first, _)), Some((second, _))) => {
            return Err(Error::parsing(format!(
                "Found two aggregation type definitions in [{}]: [{}] and [{}]",
                name, first, second
            )))
        }
    };
    let params = AggParams::new(name, kind, params)?;

    let agg_type = match kind.as_str() {
        "terms" => {
            params.check(&["field", "size"])?;
            AggregationType::Terms {
                field: params.field()?,
                size: params.usize("size")?.unwrap_or(DEFAULT_TERMS_SIZE),
            }
        }
        "min" | "max" | "avg" | "sum" => {
            params.check(&["field"])?;
            let field = params.field()?;
            match kind.as_str() {
                "min" => AggregationType::Min { field },
                "max" => AggregationType::Max { field },
                "avg" => AggregationType::Avg { field },
                _ => AggregationType::Sum { field },
            }
        }
        "value_count" | "count" => {
            params.check(&["field"])?;
            AggregationType::Count {
                field: params.field()?,
            }
        }
        "histogram" => {
            params.check(&["field", "interval", "min_doc_count"])?;
            let interval = params
                .number("interval")?
                .ok_or_else(|| Error::parsing(format!("[interval] must be set for histogram aggregation [{}]", name)))?;
            if interval <= 0.0 {
                return Err(Error::illegal(format!(
                    "[interval] must be >0 for histogram aggregation [{}]",
                    name
                )));
            }
            AggregationType::Histogram {
                field: params.field()?,
                interval,
                min_doc_count: params.usize("min_doc_count")?.unwrap_or(0) as u64,
            }
        }
        "date_histogram" => {
            params.check(&[
                "field",
                "fixed_interval",
                "calendar_interval",
                "interval",
                "min_doc_count",
            ])?;
            AggregationType::DateHistogram {
                field: params.field()?,
                interval: params.date_interval()?,
                min_doc_count: params.usize("min_doc_count")?.unwrap_or(0) as u64,
            }
        }
        other => {
            return Err(Error::parsing(format!(
                "Unknown aggregation type [{}] did you mean [terms]?",
                other
            )))
        }
    };
    Ok(AggregationRequest {
        name: name.to_string(),
        agg_type,
    })
}

/// Check each request against one index's mappings. Unmapped fields pass
/// and produce empty results.
pub fn validate(requests: &[AggregationRequest], mappings: &Mappings) -> Result<()> {
    for request in requests {
        let field = request.agg_type.field();
        let Some(prop) = mappings.get(field) else {
            continue;
        };
        if !prop.aggregatable {
            return Err(Error::illegal(format!(
                "Field [{}] of type [{}] is not aggregatable, set aggregatable=true in its mapping",
                field, prop.field_type
            )));
        }
        let needs_ordered = request.agg_type.is_metric()
            || matches!(request.agg_type, AggregationType::Histogram { .. });
        if needs_ordered && !prop.field_type.is_ordered() {
            return Err(Error::illegal(format!(
                "Field [{}] of type [{}] is not supported for aggregation [{}]",
                field, prop.field_type, request.name
            )));
        }
        if matches!(request.agg_type, AggregationType::DateHistogram { .. })
            && prop.field_type != FieldType::Time
        {
            return Err(Error::illegal(format!(
                "Field [{}] of type [{}] is not supported for aggregation [date_histogram]",
                field, prop.field_type
            )));
        }
    }
    Ok(())
}

struct AggParams<'a> {
    name: &'a str,
    kind: &'a str,
    obj: &'a Map<String, Value>,
}

impl<'a> AggParams<'a> {
    fn new(name: &'a str, kind: &'a str, value: &'a Value) -> Result<Self> {
        let obj = value.as_object().ok_or_else(|| {
            Error::parsing(format!("[{}] aggregation [{}] must be an object", kind, name))
        })?;
        Ok(Self { name, kind, obj })
    }

    fn check(&self, allowed: &[&str]) -> Result<()> {
        match self.obj.keys().find(|k| !allowed.contains(&k.as_str())) {
            Some(key) => Err(Error::parsing(format!(
                "[{}] aggregation [{}] does not support [{}]",
                self.kind, self.name, key
            ))),
            None => Ok(()),
        }
    }

    fn field(&self) -> Result<String> {
        match self.obj.get("field") {
            Some(Value::String(f)) if !f.is_empty() => Ok(f.clone()),
            _ => Err(Error::parsing(format!(
                "Required [field] missing in [{}] aggregation [{}]",
                self.kind, self.name
            ))),
        }
    }

    fn number(&self, key: &str) -> Result<Option<f64>> {
        match self.obj.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => Ok(n.as_f64()),
            Some(Value::String(s)) => s.trim().parse().map(Some).map_err(|_| self.invalid(key)),
            Some(_) => Err(self.invalid(key)),
        }
    }

    fn usize(&self, key: &str) -> Result<Option<usize>> {
        match self.number(key)? {
            None => Ok(None),
            Some(n) if n >= 0.0 && n.fract() == 0.0 => Ok(Some(n as usize)),
            Some(_) => Err(self.invalid(key)),
        }
    }

    /// `calendar_interval` takes unit names, `fixed_interval` takes
    /// durations, and the legacy `interval` accepts either.
    fn date_interval(&self) -> Result<DateInterval> {
        let text = |key: &str| -> Result<Option<String>> {
            match self.obj.get(key) {
                None | Some(Value::Null) => Ok(None),
                Some(Value::String(s)) => Ok(Some(s.clone())),
                Some(_) => Err(self.invalid(key)),
            }
        };
        let unknown = |s: &str| {
            Error::illegal(format!(
                "The supplied interval [{}] could not be parsed as a calendar or fixed interval",
                s
            ))
        };
        let calendar = text("calendar_interval")?;
        let fixed = text("fixed_interval")?;
        let legacy = text("interval")?;
        if [&calendar, &fixed, &legacy].iter().filter(|v| v.is_some()).count() > 1 {
            return Err(Error::illegal(format!(
                "[date_histogram] aggregation [{}] accepts only one of [calendar_interval], [fixed_interval] and [interval]",
                self.name
            )));
        }
        if let Some(s) = calendar {
            return parse_calendar_unit(&s)
                .map(DateInterval::Calendar)
                .ok_or_else(|| unknown(&s));
        }
        if let Some(s) = fixed {
            return parse_fixed_interval(&s)
                .map(DateInterval::Fixed)
                .ok_or_else(|| unknown(&s));
        }
        match legacy {
            Some(s) => parse_calendar_unit(&s)
                .map(DateInterval::Calendar)
                .or_else(|| parse_fixed_interval(&s).map(DateInterval::Fixed))
                .ok_or_else(|| unknown(&s)),
            None => Err(Error::parsing(format!(
                "Required [calendar_interval] or [fixed_interval] missing in date_histogram aggregation [{}]",
                self.name
            ))),
        }
    }

    fn invalid(&self, key: &str) -> Error {
        Error::parsing(format!(
            "[{}] aggregation [{}] has an invalid value for [{}]",
            self.kind, self.name, key
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry::aggregations::CalendarUnit;
    use quarry::mapping::Property;
    use serde_json::json;

    #[test]
    fn test_parse_kinds() -> Result<()> {
        let requests = parse_aggregations(&json!({
            "by_status": {"terms": {"field": "status"}},
            "top": {"max": {"field": "price"}},
            "hits": {"value_count": {"field": "status"}},
            "prices": {"histogram": {"field": "price", "interval": 10}},
            "daily": {"date_histogram": {"field": "@timestamp", "calendar_interval": "day"}},
            "hourly": {"date_histogram": {"field": "@timestamp", "fixed_interval": "2h"}}
        }))?;
        assert_eq!(requests.len(), 6);
        assert_eq!(
            requests[0].agg_type,
            AggregationType::Terms {
                field: "status".to_string(),
                size: 10
            }
        );
        assert!(matches!(requests[2].agg_type, AggregationType::Count { .. }));
        assert!(matches!(
            requests[4].agg_type,
            AggregationType::DateHistogram {
                interval: DateInterval::Calendar(CalendarUnit::Day),
                ..
            }
        ));
        assert!(matches!(
            requests[5].agg_type,
            AggregationType::DateHistogram {
                interval: DateInterval::Fixed(7_200_000),
                ..
            }
        ));
        Ok(())
    }

    #[test]
    fn test_rejects_bad_definitions() {
        let err = parse_aggregations(&json!({"x": {"terms": {"field": "a", "order": "asc"}}})).unwrap_err();
        assert!(err.to_string().contains("order"));
        assert!(parse_aggregations(&json!({"x": {"percentiles": {"field": "a"}}})).is_err());
        assert!(matches!(
            parse_aggregations(&json!({"x": {"histogram": {"field": "a", "interval": 0}}})),
            Err(Error::IllegalArgument(_))
        ));
        assert!(parse_aggregations(&json!({"x": {"date_histogram": {"field": "a", "calendar_interval": "fortnight"}}})).is_err());
        assert!(parse_aggregations(&json!({"x": {"terms": {"field": "a"}, "aggs": {}}})).is_err());
    }

    #[test]
    fn test_validate_against_mappings() -> Result<()> {
        let mut mappings = Mappings::new();
        mappings.insert("title", Property::new(FieldType::Text));
        mappings.insert("status", Property::new(FieldType::Keyword));
        mappings.insert("price", Property::new(FieldType::Numeric));

        let ok = parse_aggregations(&json!({
            "s": {"terms": {"field": "status"}},
            "p": {"avg": {"field": "price"}},
            "u": {"terms": {"field": "unmapped"}}
        }))?;
        validate(&ok, &mappings)?;

        let text_terms = parse_aggregations(&json!({"t": {"terms": {"field": "title"}}}))?;
        assert!(matches!(validate(&text_terms, &mappings), Err(Error::IllegalArgument(_))));

        let keyword_sum = parse_aggregations(&json!({"k": {"sum": {"field": "status"}}}))?;
        assert!(validate(&keyword_sum, &mappings).is_err());
        Ok(())
    }
}
