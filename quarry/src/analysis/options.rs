//! Typed accessors over loosely-typed component options.

use crate::{Error, Result};
use serde_json::{Map, Value};

pub(crate) type Options = Map<String, Value>;

fn wrong_type(component: &str, kind: &str, key: &str, expected: &str) -> Error {
    Error::parsing(format!(
        "[{}] {} option [{}] should be {}",
        component, kind, key, expected
    ))
}

pub(crate) fn get_usize(
    opts: &Options,
    component: &str,
    kind: &str,
    key: &str,
) -> Result<Option<usize>> {
    match opts.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_f64()
            .filter(|v| *v >= 0.0)
            .map(|v| Some(v as usize))
            .ok_or_else(|| wrong_type(component, kind, key, "a non-negative number")),
        Some(Value::String(s)) => s
            .parse::<usize>()
            .map(Some)
            .map_err(|_| wrong_type(component, kind, key, "a non-negative number")),
        Some(_) => Err(wrong_type(component, kind, key, "a non-negative number")),
    }
}

pub(crate) fn get_str<'a>(
    opts: &'a Options,
    component: &str,
    kind: &str,
    key: &str,
) -> Result<Option<&'a str>> {
    match opts.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(wrong_type(component, kind, key, "a string")),
    }
}

pub(crate) fn get_bool(
    opts: &Options,
    component: &str,
    kind: &str,
    key: &str,
) -> Result<Option<bool>> {
    match opts.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(Value::String(s)) if s == "true" || s == "false" => Ok(Some(s == "true")),
        Some(_) => Err(wrong_type(component, kind, key, "a boolean")),
    }
}

/// A string list option; a bare string is treated as a one-element list.
pub(crate) fn get_str_list(
    opts: &Options,
    component: &str,
    kind: &str,
    key: &str,
) -> Result<Option<Vec<String>>> {
    match opts.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(vec![s.clone()])),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| wrong_type(component, kind, key, "a list of strings"))
            })
            .collect::<Result<Vec<_>>>()
            .map(Some),
        Some(_) => Err(wrong_type(component, kind, key, "a list of strings")),
    }
}

/// Resolve `min_gram` / `max_gram` with their defaults and ordering check.
pub(crate) fn gram_bounds(opts: &Options, component: &str, kind: &str) -> Result<(usize, usize)> {
    let min = get_usize(opts, component, kind, "min_gram")?.filter(|v| *v > 0).unwrap_or(1);
    let max = get_usize(opts, component, kind, "max_gram")?.filter(|v| *v > 0).unwrap_or(2);
    if min > max {
        return Err(Error::parsing(format!(
            "[{}] {} option [min_gram] should be not greater than [max_gram]",
            component, kind
        )));
    }
    Ok((min, max))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn opts(value: Value) -> Options {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_gram_bounds_defaults() -> Result<()> {
        assert_eq!(gram_bounds(&opts(json!({})), "tokenizer", "ngram")?, (1, 2));
        assert_eq!(
            gram_bounds(&opts(json!({"min_gram": 3, "max_gram": 3})), "tokenizer", "ngram")?,
            (3, 3)
        );
        Ok(())
    }

    #[test]
    fn test_gram_bounds_rejects_inverted() {
        let err = gram_bounds(&opts(json!({"min_gram": 4, "max_gram": 2})), "token_filter", "ngram")
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "[token_filter] ngram option [min_gram] should be not greater than [max_gram]"
        );
    }

    #[test]
    fn test_str_list_accepts_single_string() -> Result<()> {
        let o = opts(json!({"stopwords": "_english_"}));
        assert_eq!(
            get_str_list(&o, "token_filter", "stop", "stopwords")?,
            Some(vec!["_english_".to_string()])
        );
        Ok(())
    }
}
