use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use sqlx::{postgres::PgRow, FromRow, PgPool};
use uuid::Uuid;

use crate::database::manager::DatabaseError;
use crate::database::validation::ValidationErrors;
use crate::filter::types::Field;
use crate::types::Operation;

/// Entity descriptor shared by the generic handlers and the repository.
///
/// Each entity owns its table, its queryable fields, a loosely typed draft
/// (what a request body deserializes into), the validation that turns a
/// draft into a write, and its write path.
#[async_trait]
pub trait Resource: Serialize + for<'r> FromRow<'r, PgRow> + Send + Sync + Unpin + Sized + 'static {
    const TABLE: &'static str;
    const FIELDS: &'static [Field];

    type Draft: DeserializeOwned + Serialize + Send + Sync;
    type Valid: Send + Sync;

    fn id(&self) -> Uuid;

    /// Where document ANDed into every default read
    fn default_scope() -> Option<Value> {
        None
    }

    /// Current state as a draft; the update path merges the request patch
    /// over it before validating again.
    fn to_draft(&self) -> Self::Draft;

    fn validate(draft: Self::Draft, op: Operation) -> Result<Self::Valid, ValidationErrors>;

    async fn insert(pool: &PgPool, valid: Self::Valid) -> Result<Self, DatabaseError>;

    async fn replace(pool: &PgPool, current: &Self, valid: Self::Valid) -> Result<Self, DatabaseError>;

    async fn remove(pool: &PgPool, current: Self) -> Result<(), DatabaseError>;

    /// Serializes documents, resolving references and the relation named by
    /// `include`.
    async fn populate(pool: &PgPool, docs: Vec<Self>, include: Option<&str>) -> Result<Vec<Value>, DatabaseError> {
        let _ = (pool, include);
        docs.iter()
            .map(|doc| serde_json::to_value(doc).map_err(DatabaseError::from))
            .collect()
    }
}

/// Overlays the keys of `patch` onto `current`
pub fn merge_patch(current: &mut Value, patch: Value) {
    if let (Value::Object(target), Value::Object(patch)) = (current, patch) {
        for (k, v) in patch {
            target.insert(k, v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn patch_overrides_only_given_keys() {
        let mut current = json!({ "name": "The Sea Explorer", "price": 497, "summary": "s" });
        merge_patch(&mut current, json!({ "price": 550, "difficulty": "easy" }));
        assert_eq!(
            current,
            json!({ "name": "The Sea Explorer", "price": 550, "summary": "s", "difficulty": "easy" })
        );
    }
}
