use chrono::{DateTime, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Number, Value};
use uuid::Uuid;

use super::error::FilterError;
use super::types::{find_field, Field, FieldKind, FilterData};

const RESERVED: &[&str] = &["page", "sort", "limit", "fields"];

/// Keys allowed to repeat in a query string; their values become a `$in` set.
pub const POLLUTION_WHITELIST: &[&str] = &[
    "duration",
    "ratingsQuantity",
    "ratingsAverage",
    "maxGroupSize",
    "difficulty",
    "price",
];

pub const DEFAULT_SORT: &str = "-createdAt";
pub const DEFAULT_PAGE: i64 = 1;
pub const DEFAULT_LIMIT: i64 = 100;

static BRACKETED: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([A-Za-z0-9_]+)\[([A-Za-z]+)\]$").unwrap());

/// Query-string pairs to be turned into filter, sort, projection and
/// pagination, in that order.
#[derive(Debug, Clone, Default)]
pub struct QueryFeatures {
    pairs: Vec<(String, String)>,
}

impl QueryFeatures {
    pub fn new(pairs: Vec<(String, String)>) -> Self {
        Self { pairs }
    }

    /// Replaces every occurrence of `key` with a single value.
    pub fn with_override(mut self, key: &str, value: &str) -> Self {
        self.pairs.retain(|(k, _)| k != key);
        self.pairs.push((key.to_string(), value.to_string()));
        self
    }

    pub fn build(&self, fields: &[Field]) -> Result<FilterData, FilterError> {
        let grouped = self.grouped();

        let where_clause = Self::filter(&grouped, fields)?;
        let order = Some(Self::last(&grouped, "sort").unwrap_or(DEFAULT_SORT).to_string());
        let select = Self::last(&grouped, "fields").and_then(Self::parse_fields);
        let (limit, offset) = Self::paginate(Self::last(&grouped, "page"), Self::last(&grouped, "limit"));

        Ok(FilterData {
            select,
            where_clause,
            order,
            limit: Some(limit),
            offset: Some(offset),
        })
    }

    /// Groups repeated keys while keeping first-seen order.
    fn grouped(&self) -> Vec<(&str, Vec<&str>)> {
        let mut out: Vec<(&str, Vec<&str>)> = Vec::new();
        for (key, value) in &self.pairs {
            match out.iter_mut().find(|(k, _)| *k == key.as_str()) {
                Some((_, values)) => values.push(value.as_str()),
                None => out.push((key.as_str(), vec![value.as_str()])),
            }
        }
        out
    }

    fn last<'a>(grouped: &[(&str, Vec<&'a str>)], key: &str) -> Option<&'a str> {
        grouped
            .iter()
            .find(|(k, _)| *k == key)
            .and_then(|(_, values)| values.last().copied())
    }

    fn filter(grouped: &[(&str, Vec<&str>)], fields: &[Field]) -> Result<Option<Value>, FilterError> {
        let mut where_obj = Map::new();

        for (key, values) in grouped {
            if RESERVED.contains(key) {
                continue;
            }
            let (name, op) = match BRACKETED.captures(key) {
                Some(caps) => (caps[1].to_string(), Some(caps[2].to_string())),
                None => (key.to_string(), None),
            };
            let kind = find_field(fields, &name).map(|f| f.kind);

            let value = if values.len() > 1 && op.is_none() && POLLUTION_WHITELIST.contains(&name.as_str()) {
                let coerced = values
                    .iter()
                    .map(|v| coerce(&name, kind, v))
                    .collect::<Result<Vec<_>, _>>()?;
                let mut set = Map::new();
                set.insert("$in".to_string(), Value::Array(coerced));
                Value::Object(set)
            } else {
                let raw = values.last().copied().unwrap_or_default();
                coerce(&name, kind, raw)?
            };

            match op {
                Some(op) => {
                    // Only the comparison suffixes become operators; anything
                    // else stays a nested object and matches nothing.
                    let op_key = match op.as_str() {
                        "gte" | "gt" | "lte" | "lt" => format!("${}", op),
                        _ => op,
                    };
                    let entry = where_obj
                        .entry(name)
                        .or_insert_with(|| Value::Object(Map::new()));
                    match entry {
                        Value::Object(ops) => {
                            ops.insert(op_key, value);
                        }
                        other => {
                            let mut ops = Map::new();
                            ops.insert("$eq".to_string(), other.take());
                            ops.insert(op_key, value);
                            *other = Value::Object(ops);
                        }
                    }
                }
                None => match where_obj.get_mut(&name) {
                    Some(Value::Object(ops)) => {
                        ops.insert("$eq".to_string(), value);
                    }
                    _ => {
                        where_obj.insert(name, value);
                    }
                },
            }
        }

        Ok(if where_obj.is_empty() { None } else { Some(Value::Object(where_obj)) })
    }

    fn parse_fields(raw: &str) -> Option<Vec<String>> {
        let fields: Vec<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(str::to_string)
            .collect();
        if fields.is_empty() {
            None
        } else {
            Some(fields)
        }
    }

    /// Returns `(limit, offset)`; missing, non-numeric or non-positive
    /// values fall back to page 1 / limit 100.
    pub fn paginate(page: Option<&str>, limit: Option<&str>) -> (i32, i32) {
        let positive = |raw: Option<&str>, default: i64| {
            raw.and_then(|v| v.trim().parse::<i64>().ok())
                .filter(|n| *n > 0)
                .unwrap_or(default)
        };
        let page = positive(page, DEFAULT_PAGE);
        let limit = positive(limit, DEFAULT_LIMIT).min(i32::MAX as i64);
        let offset = (page - 1).saturating_mul(limit).min(i32::MAX as i64);
        (limit as i32, offset as i32)
    }

    /// Keeps `id` and the listed keys, or drops the keys prefixed with `-`.
    pub fn project(docs: Vec<Value>, select: Option<&[String]>) -> Vec<Value> {
        let select = match select {
            Some(select) if !select.is_empty() => select,
            _ => return docs,
        };
        let excluding = select.iter().all(|f| f.starts_with('-'));

        docs.into_iter()
            .map(|doc| match doc {
                Value::Object(mut obj) => {
                    if excluding {
                        for f in select {
                            obj.remove(f.trim_start_matches('-'));
                        }
                        Value::Object(obj)
                    } else {
                        let kept = obj
                            .into_iter()
                            .filter(|(k, _)| k == "id" || select.iter().any(|f| f == k))
                            .collect();
                        Value::Object(kept)
                    }
                }
                other => other,
            })
            .collect()
    }
}

fn cast_error(field: &str, value: &str) -> FilterError {
    FilterError::Cast {
        field: field.to_string(),
        value: value.to_string(),
    }
}

/// Coerces a raw query-string value by the field's kind. Unknown fields keep
/// the raw string.
pub fn coerce(field: &str, kind: Option<FieldKind>, raw: &str) -> Result<Value, FilterError> {
    let kind = match kind {
        Some(kind) => kind,
        None => return Ok(Value::String(raw.to_string())),
    };
    match kind {
        FieldKind::Int | FieldKind::Float => {
            let trimmed = raw.trim();
            if let Ok(n) = trimmed.parse::<i64>() {
                return Ok(Value::Number(n.into()));
            }
            trimmed
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| cast_error(field, raw))
        }
        FieldKind::Bool => match raw.trim() {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err(cast_error(field, raw)),
        },
        FieldKind::Uuid | FieldKind::UuidArray => Uuid::parse_str(raw.trim())
            .map(|id| Value::String(id.to_string()))
            .map_err(|_| cast_error(field, raw)),
        FieldKind::Timestamp | FieldKind::TimestampArray => parse_timestamp(raw)
            .map(|ts| Value::String(ts.to_rfc3339()))
            .ok_or_else(|| cast_error(field, raw)),
        FieldKind::Text | FieldKind::TextArray | FieldKind::Json => Ok(Value::String(raw.to_string())),
    }
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Filter;
    use serde_json::json;

    const FIELDS: &[Field] = &[
        Field::new("id", "id", FieldKind::Uuid),
        Field::new("name", "name", FieldKind::Text),
        Field::new("price", "price", FieldKind::Float),
        Field::new("duration", "duration", FieldKind::Int),
        Field::new("difficulty", "difficulty", FieldKind::Text),
        Field::new("secretTour", "secret_tour", FieldKind::Bool),
        Field::new("createdAt", "created_at", FieldKind::Timestamp),
    ];

    fn pairs(query: &[(&str, &str)]) -> QueryFeatures {
        QueryFeatures::new(query.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect())
    }

    #[test]
    fn builds_filter_sort_projection_and_page() {
        let features = pairs(&[
            ("price[gte]", "200"),
            ("sort", "-price"),
            ("limit", "5"),
            ("fields", "name,price"),
            ("page", "2"),
        ]);
        let data = features.build(FIELDS).unwrap();

        assert_eq!(data.where_clause, Some(json!({ "price": { "$gte": 200 } })));
        assert_eq!(data.order.as_deref(), Some("-price"));
        assert_eq!(data.limit, Some(5));
        assert_eq!(data.offset, Some(5));
        assert_eq!(data.select, Some(vec!["name".to_string(), "price".to_string()]));

        let mut filter = Filter::new("tours", FIELDS).unwrap();
        filter.assign(data).unwrap();
        let sql = filter.to_sql().unwrap();
        assert_eq!(
            sql.query,
            "SELECT * FROM \"tours\" WHERE \"price\" >= $1 ORDER BY \"price\" DESC, \"id\" ASC LIMIT 5 OFFSET 5"
        );
    }

    #[test]
    fn defaults_to_newest_first_and_first_page() {
        let data = pairs(&[]).build(FIELDS).unwrap();
        assert_eq!(data.where_clause, None);
        assert_eq!(data.order.as_deref(), Some(DEFAULT_SORT));
        assert_eq!(data.limit, Some(100));
        assert_eq!(data.offset, Some(0));
        assert_eq!(data.select, None);
    }

    #[test]
    fn bad_pagination_falls_back_to_defaults() {
        assert_eq!(QueryFeatures::paginate(Some("abc"), Some("-3")), (100, 0));
        assert_eq!(QueryFeatures::paginate(Some("0"), Some("10")), (10, 0));
        assert_eq!(QueryFeatures::paginate(Some("3"), Some("10")), (10, 20));
    }

    #[test]
    fn repeated_keys_keep_last_unless_whitelisted() {
        let data = pairs(&[
            ("duration", "5"),
            ("duration", "9"),
            ("name", "a"),
            ("name", "b"),
            ("sort", "price"),
            ("sort", "-duration"),
        ])
        .build(FIELDS)
        .unwrap();
        assert_eq!(
            data.where_clause,
            Some(json!({ "duration": { "$in": [5, 9] }, "name": "b" }))
        );
        assert_eq!(data.order.as_deref(), Some("-duration"));
    }

    #[test]
    fn coerces_by_field_kind() {
        let data = pairs(&[("secretTour", "false"), ("price[lt]", "99.5"), ("createdAt[gte]", "2021-03-01")])
            .build(FIELDS)
            .unwrap();
        assert_eq!(
            data.where_clause,
            Some(json!({
                "secretTour": false,
                "price": { "$lt": 99.5 },
                "createdAt": { "$gte": "2021-03-01T00:00:00+00:00" }
            }))
        );
    }

    #[test]
    fn uncoercible_values_are_cast_errors() {
        let err = pairs(&[("price", "cheap")]).build(FIELDS).unwrap_err();
        assert_eq!(err.to_string(), "Invalid price: cheap.");
        assert!(pairs(&[("id", "not-a-uuid")]).build(FIELDS).is_err());
    }

    #[test]
    fn unknown_fields_pass_through_as_equality() {
        let data = pairs(&[("colour", "blue")]).build(FIELDS).unwrap();
        assert_eq!(data.where_clause, Some(json!({ "colour": "blue" })));
    }

    #[test]
    fn override_replaces_existing_values() {
        let data = pairs(&[("limit", "50")]).with_override("limit", "5").build(FIELDS).unwrap();
        assert_eq!(data.limit, Some(5));
    }

    #[test]
    fn projection_keeps_id() {
        let docs = vec![json!({ "id": "1", "name": "Sea", "price": 10, "summary": "x" })];
        let select = vec!["name".to_string(), "price".to_string()];
        let projected = QueryFeatures::project(docs.clone(), Some(&select));
        assert_eq!(projected, vec![json!({ "id": "1", "name": "Sea", "price": 10 })]);

        let exclude = vec!["-summary".to_string()];
        let projected = QueryFeatures::project(docs, Some(&exclude));
        assert_eq!(projected, vec![json!({ "id": "1", "name": "Sea", "price": 10 })]);
    }
}
