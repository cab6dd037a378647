use serde_json::{json, Value};
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::manager::DatabaseError;
use crate::database::query_builder::QueryBuilder;
use crate::database::resource::Resource;
use crate::filter::filter_where::merge_where;
use crate::filter::FilterData;

/// Scoped reads over one entity table. Every query is ANDed with the
/// entity's default scope (no secret tours, no inactive users).
pub struct Repository<T> {
    pool: PgPool,
    _phantom: std::marker::PhantomData<T>,
}

impl<T: Resource> Repository<T> {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            _phantom: std::marker::PhantomData,
        }
    }

    fn scoped(mut filter_data: FilterData) -> FilterData {
        filter_data.where_clause = merge_where(T::default_scope(), filter_data.where_clause.take());
        filter_data
    }

    pub async fn select_any(&self, filter_data: FilterData) -> Result<Vec<T>, DatabaseError> {
        QueryBuilder::<T>::new(T::TABLE, T::FIELDS)?
            .filter(Self::scoped(filter_data))?
            .select_all(&self.pool)
            .await
    }

    pub async fn select_one(&self, filter_data: FilterData) -> Result<Option<T>, DatabaseError> {
        let filter_data = FilterData {
            limit: Some(1),
            offset: None,
            ..filter_data
        };
        QueryBuilder::<T>::new(T::TABLE, T::FIELDS)?
            .filter(Self::scoped(filter_data))?
            .select_optional(&self.pool)
            .await
    }

    pub async fn select_where(&self, where_clause: Value) -> Result<Vec<T>, DatabaseError> {
        self.select_any(FilterData {
            where_clause: Some(where_clause),
            ..Default::default()
        })
        .await
    }

    pub async fn select_one_where(&self, where_clause: Value) -> Result<Option<T>, DatabaseError> {
        self.select_one(FilterData {
            where_clause: Some(where_clause),
            ..Default::default()
        })
        .await
    }

    pub async fn select_by_id(&self, id: Uuid) -> Result<Option<T>, DatabaseError> {
        self.select_one_where(json!({ "id": id.to_string() })).await
    }

    pub async fn select_404(&self, id: Uuid) -> Result<T, DatabaseError> {
        self.select_by_id(id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound("No document found with that ID".to_string()))
    }

    pub async fn select_ids(&self, ids: &[Uuid]) -> Result<Vec<T>, DatabaseError> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        let ids: Vec<String> = ids.iter().map(Uuid::to_string).collect();
        self.select_where(json!({ "id": { "$in": ids } })).await
    }
}
