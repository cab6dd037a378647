use super::error::FilterError;
use super::types::{find_field, Field, FieldKind, FilterOrderInfo, SortDirection};

pub struct FilterOrder;

impl FilterOrder {
    /// Parses `-price,ratingsAverage` into column/direction pairs. Unknown
    /// fields and JSON columns are skipped.
    pub fn parse(sort: &str, fields: &[Field]) -> Vec<FilterOrderInfo> {
        let mut out = Vec::new();
        for part in sort.split(',') {
            let trimmed = part.trim();
            if trimmed.is_empty() {
                continue;
            }
            let (name, sort) = match trimmed.strip_prefix('-') {
                Some(name) => (name, SortDirection::Desc),
                None => (trimmed.trim_start_matches('+'), SortDirection::Asc),
            };
            match find_field(fields, name) {
                Some(field) if field.kind != FieldKind::Json => out.push(FilterOrderInfo {
                    column: field.column.to_string(),
                    sort,
                }),
                _ => tracing::debug!("Ignoring unknown sort field '{}'", name),
            }
        }
        out
    }

    /// Always ends with `"id" ASC` so that pages are stable when sort keys tie.
    pub fn generate(infos: &[FilterOrderInfo]) -> Result<String, FilterError> {
        let mut parts: Vec<String> = infos
            .iter()
            .map(|i| format!("\"{}\" {}", i.column, i.sort.to_sql()))
            .collect();
        if !infos.iter().any(|i| i.column == "id") {
            parts.push("\"id\" ASC".to_string());
        }
        Ok(format!("ORDER BY {}", parts.join(", ")))
    }
}
