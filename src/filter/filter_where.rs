use serde_json::{Map, Value};

use super::error::FilterError;
use super::types::{find_field, Field, FieldKind, FilterOp};

/// Compiles a where document (API field names, `$`-operators) into a SQL
/// predicate with positional parameters.
///
/// Conditions on fields that the entity does not have compile to `FALSE`:
/// an equality test on an absent attribute matches nothing.
pub struct FilterWhere<'a> {
    fields: &'a [Field],
    param_values: Vec<Value>,
}

impl<'a> FilterWhere<'a> {
    pub fn new(fields: &'a [Field]) -> Self {
        Self {
            fields,
            param_values: vec![],
        }
    }

    pub fn generate(where_data: &Value, fields: &'a [Field]) -> Result<(String, Vec<Value>), FilterError> {
        let mut filter_where = Self::new(fields);
        let clause = filter_where.build_clause(where_data)?;
        Ok((clause, filter_where.param_values))
    }

    pub fn validate(where_data: &Value) -> Result<(), FilterError> {
        match where_data {
            Value::Null | Value::Object(_) => Ok(()),
            _ => Err(FilterError::InvalidWhereClause("WHERE must be an object".to_string())),
        }
    }

    fn build_clause(&mut self, where_data: &Value) -> Result<String, FilterError> {
        let obj = match where_data {
            Value::Null => return Ok(String::new()),
            Value::Object(obj) => obj,
            _ => return Err(FilterError::InvalidWhereClause("Unsupported WHERE format".to_string())),
        };

        let mut parts = Vec::new();
        for (key, value) in obj {
            let sql = if key.starts_with('$') {
                self.build_logical(key, value)?
            } else {
                self.build_field(key, value)?
            };
            if !sql.is_empty() {
                parts.push(sql);
            }
        }
        Ok(parts.join(" AND "))
    }

    fn build_logical(&mut self, op_key: &str, value: &Value) -> Result<String, FilterError> {
        match FilterOp::parse(op_key) {
            Some(FilterOp::And) => {
                let arr = value
                    .as_array()
                    .ok_or_else(|| FilterError::InvalidOperatorData(format!("{} requires array", op_key)))?;
                let mut sql_parts = Vec::new();
                for v in arr {
                    let sql = self.build_clause(v)?;
                    if !sql.is_empty() {
                        sql_parts.push(format!("({})", sql));
                    }
                }
                if sql_parts.is_empty() {
                    return Ok(String::new());
                }
                Ok(format!("({})", sql_parts.join(" AND ")))
            }
            _ => Err(FilterError::UnsupportedOperator(op_key.to_string())),
        }
    }

    fn build_field(&mut self, name: &str, value: &Value) -> Result<String, FilterError> {
        let field = match find_field(self.fields, name) {
            Some(field) if field.kind != FieldKind::Json => *field,
            _ => return Ok("FALSE".to_string()),
        };

        match value {
            Value::Object(ops) if ops.keys().all(|k| k.starts_with('$')) => {
                let mut parts = Vec::new();
                for (op_key, op_val) in ops {
                    let op = FilterOp::parse(op_key)
                        .ok_or_else(|| FilterError::UnsupportedOperator(op_key.clone()))?;
                    parts.push(self.build_condition(&field, op, op_val)?);
                }
                Ok(parts.join(" AND "))
            }
            Value::Object(_) => Ok("FALSE".to_string()),
            // Implicit equality: { field: value }
            _ => self.build_condition(&field, FilterOp::Eq, value),
        }
    }

    fn build_condition(&mut self, field: &Field, op: FilterOp, data: &Value) -> Result<String, FilterError> {
        let column = format!("\"{}\"", field.column);
        let cast = field.kind.cast();

        if data.is_null() {
            return match op {
                FilterOp::Eq => Ok(format!("{} IS NULL", column)),
                FilterOp::Ne => Ok(format!("{} IS NOT NULL", column)),
                _ => Err(FilterError::InvalidOperatorData(format!("{:?} does not accept null", op))),
            };
        }

        match op {
            FilterOp::In => {
                let values = Self::as_list(op, data)?;
                if values.is_empty() {
                    return Ok("FALSE".to_string());
                }
                let placeholders: Vec<String> = values
                    .iter()
                    .map(|v| format!("{}{}", self.push_param(v.clone()), cast))
                    .collect();
                if field.kind.is_array() {
                    Ok(format!("{} && ARRAY[{}]", column, placeholders.join(", ")))
                } else {
                    Ok(format!("{} IN ({})", column, placeholders.join(", ")))
                }
            }
            FilterOp::Ne if field.kind.is_array() => {
                let param = self.push_param(data.clone());
                Ok(format!("NOT ({}{} = ANY({}))", param, cast, column))
            }
            _ if field.kind.is_array() => {
                let sql_op = op
                    .mirrored()
                    .ok_or_else(|| FilterError::UnsupportedOperator(format!("{:?}", op)))?;
                let param = self.push_param(data.clone());
                Ok(format!("{}{} {} ANY({})", param, cast, sql_op, column))
            }
            _ => {
                let sql_op = op
                    .comparison()
                    .ok_or_else(|| FilterError::UnsupportedOperator(format!("{:?}", op)))?;
                let param = self.push_param(data.clone());
                Ok(format!("{} {} {}{}", column, sql_op, param, cast))
            }
        }
    }

    fn as_list(op: FilterOp, data: &Value) -> Result<Vec<Value>, FilterError> {
        match data {
            Value::Array(values) => Ok(values.clone()),
            _ => Err(FilterError::InvalidOperatorData(format!("{:?} requires array", op))),
        }
    }

    fn push_param(&mut self, value: Value) -> String {
        self.param_values.push(value);
        format!("${}", self.param_values.len())
    }
}

/// Joins two optional where documents with `$and`.
pub fn merge_where(scope: Option<Value>, filter: Option<Value>) -> Option<Value> {
    let is_empty = |v: &Value| v.is_null() || v.as_object().map(Map::is_empty).unwrap_or(false);
    match (scope.filter(|v| !is_empty(v)), filter.filter(|v| !is_empty(v))) {
        (Some(scope), Some(filter)) => Some(serde_json::json!({ "$and": [scope, filter] })),
        (Some(only), None) | (None, Some(only)) => Some(only),
        (None, None) => None,
    }
}
