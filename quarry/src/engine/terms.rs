//! Term encodings shared by indexing, query lowering and facet decoding.
//!
//! All user fields live in a handful of physical tantivy fields; a term is
//! addressed by prefixing it with the flattened field name and [`SEP`].
//! Ordered values are written as fixed-width hex of an order-preserving
//! `u64`, so lexicographic term ranges are value ranges.

/// Separator between a field name and its value inside a term.
pub const SEP: char = '\u{1f}';

const SIGN: u64 = 1 << 63;

/// Facet value tags.
pub const FACET_STR: char = 's';
pub const FACET_NUM: char = 'n';
pub const FACET_TIME: char = 't';

pub fn term_key(field: &str, value: &str) -> String {
    let mut key = String::with_capacity(field.len() + value.len() + 1);
    key.push_str(field);
    key.push(SEP);
    key.push_str(value);
    key
}

/// Inclusive lower bound of every term of `field`.
pub fn field_start(field: &str) -> String {
    term_key(field, "")
}

/// Exclusive upper bound of every term of `field`.
pub fn field_end(field: &str) -> String {
    let mut key = String::with_capacity(field.len() + 1);
    key.push_str(field);
    key.push('\u{20}');
    key
}

pub fn f64_sortable(value: f64) -> String {
    // -0.0 and 0.0 must share a term.
    let value = if value == 0.0 { 0.0 } else { value };
    let bits = value.to_bits();
    let ordered = if bits & SIGN != 0 { !bits } else { bits ^ SIGN };
    format!("{:016x}", ordered)
}

pub fn i64_sortable(value: i64) -> String {
    format!("{:016x}", (value as u64) ^ SIGN)
}

pub fn decode_f64(hex: &str) -> Option<f64> {
    let ordered = u64::from_str_radix(hex, 16).ok()?;
    let bits = if ordered & SIGN != 0 { ordered ^ SIGN } else { !ordered };
    Some(f64::from_bits(bits))
}

pub fn decode_i64(hex: &str) -> Option<i64> {
    let ordered = u64::from_str_radix(hex, 16).ok()?;
    Some((ordered ^ SIGN) as i64)
}

/// A decoded `_facets` entry.
#[derive(Debug, Clone, PartialEq)]
pub enum FacetValue<'a> {
    Str(&'a str),
    Num(f64),
    Time(i64),
}

impl FacetValue<'_> {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FacetValue::Num(n) => Some(*n),
            FacetValue::Time(t) => Some(*t as f64),
            FacetValue::Str(_) => None,
        }
    }
}

pub fn facet_str(field: &str, value: &str) -> String {
    term_key(field, &format!("{}{}", FACET_STR, value))
}

pub fn facet_num(field: &str, value: f64) -> String {
    term_key(field, &format!("{}{}", FACET_NUM, f64_sortable(value)))
}

pub fn facet_time(field: &str, value: i64) -> String {
    term_key(field, &format!("{}{}", FACET_TIME, i64_sortable(value)))
}

/// Split a facet entry into its field and typed value.
pub fn decode_facet(entry: &str) -> Option<(&str, FacetValue<'_>)> {
    let (field, rest) = entry.split_once(SEP)?;
    let mut chars = rest.chars();
    let tag = chars.next()?;
    let body = chars.as_str();
    let value = match tag {
        FACET_STR => FacetValue::Str(body),
        FACET_NUM => FacetValue::Num(decode_f64(body)?),
        FACET_TIME => FacetValue::Time(decode_i64(body)?),
        _ => return None,
    };
    Some((field, value))
}
