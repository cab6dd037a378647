use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use std::collections::HashMap;
use uuid::Uuid;

use crate::database::manager::DatabaseError;
use crate::database::models::user::User;
use crate::database::repository::Repository;
use crate::database::resource::Resource;
use crate::database::validation::ValidationErrors;
use crate::filter::types::{Field, FieldKind};
use crate::services::ratings;
use crate::types::Operation;

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    pub id: Uuid,
    pub review: String,
    pub rating: f64,
    #[serde(skip_serializing)]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "tour")]
    pub tour_id: Uuid,
    #[serde(rename = "user")]
    pub user_id: Uuid,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ReviewDraft {
    pub review: Option<String>,
    pub rating: Option<f64>,
    pub tour: Option<Uuid>,
    pub user: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct ValidReview {
    pub review: String,
    pub rating: f64,
    pub tour_id: Uuid,
    pub user_id: Uuid,
}

const REVIEW_FIELDS: &[Field] = &[
    Field::new("id", "id", FieldKind::Uuid),
    Field::new("review", "review", FieldKind::Text),
    Field::new("rating", "rating", FieldKind::Float),
    Field::new("createdAt", "created_at", FieldKind::Timestamp),
    Field::new("tour", "tour_id", FieldKind::Uuid),
    Field::new("user", "user_id", FieldKind::Uuid),
];

#[async_trait]
impl Resource for Review {
    const TABLE: &'static str = "reviews";
    const FIELDS: &'static [Field] = REVIEW_FIELDS;

    type Draft = ReviewDraft;
    type Valid = ValidReview;

    fn id(&self) -> Uuid {
        self.id
    }

    fn to_draft(&self) -> ReviewDraft {
        ReviewDraft {
            review: Some(self.review.clone()),
            rating: Some(self.rating),
            tour: Some(self.tour_id),
            user: Some(self.user_id),
        }
    }

    fn validate(draft: ReviewDraft, _op: Operation) -> Result<ValidReview, ValidationErrors> {
        let mut errors = ValidationErrors::new();

        let review = errors.require_text("review", draft.review, "You must write a review for this tour");
        if let Some(ref r) = review {
            errors.length("review", r, 15, 1000, "A review must be between 15 and 1000 characters");
        }
        let rating = errors.require("rating", draft.rating, "A review must have a rating");
        if let Some(r) = rating {
            errors.range("rating", r, 1.0, 5.0, "Rating must be between 1 and 5");
        }
        let tour_id = errors.require("tour", draft.tour, "Review must belong to a tour");
        let user_id = errors.require("user", draft.user, "Review must have an author");

        errors.finish(|| {
            Some(ValidReview {
                review: review?,
                rating: rating?,
                tour_id: tour_id?,
                user_id: user_id?,
            })
        })
    }

    async fn insert(pool: &PgPool, valid: ValidReview) -> Result<Self, DatabaseError> {
        let mut tx = pool.begin().await?;
        let review = sqlx::query_as::<_, Review>(
            "INSERT INTO reviews (id, review, rating, tour_id, user_id) VALUES ($1, $2, $3, $4, $5) RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(&valid.review)
        .bind(valid.rating)
        .bind(valid.tour_id)
        .bind(valid.user_id)
        .fetch_one(&mut *tx)
        .await?;
        ratings::recalculate(&mut *tx, review.tour_id).await?;
        tx.commit().await?;
        Ok(review)
    }

    async fn replace(pool: &PgPool, current: &Self, valid: ValidReview) -> Result<Self, DatabaseError> {
        let mut tx = pool.begin().await?;
        let review = sqlx::query_as::<_, Review>(
            "UPDATE reviews SET review = $2, rating = $3, tour_id = $4, user_id = $5 WHERE id = $1 RETURNING *",
        )
        .bind(current.id)
        .bind(&valid.review)
        .bind(valid.rating)
        .bind(valid.tour_id)
        .bind(valid.user_id)
        .fetch_one(&mut *tx)
        .await?;
        ratings::recalculate(&mut *tx, review.tour_id).await?;
        if current.tour_id != review.tour_id {
            ratings::recalculate(&mut *tx, current.tour_id).await?;
        }
        tx.commit().await?;
        Ok(review)
    }

    async fn remove(pool: &PgPool, current: Self) -> Result<(), DatabaseError> {
        let mut tx = pool.begin().await?;
        sqlx::query("DELETE FROM reviews WHERE id = $1")
            .bind(current.id)
            .execute(&mut *tx)
            .await?;
        ratings::recalculate(&mut *tx, current.tour_id).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Replaces the author id with the author's public card
    async fn populate(pool: &PgPool, docs: Vec<Self>, _include: Option<&str>) -> Result<Vec<Value>, DatabaseError> {
        let mut user_ids: Vec<Uuid> = docs.iter().map(|r| r.user_id).collect();
        user_ids.sort_unstable();
        user_ids.dedup();
        let authors: HashMap<Uuid, Value> = Repository::<User>::new(pool.clone())
            .select_ids(&user_ids)
            .await?
            .into_iter()
            .map(|u| (u.id, u.summary(false)))
            .collect();

        docs.iter()
            .map(|review| {
                let mut value = serde_json::to_value(review)?;
                value["user"] = authors.get(&review.user_id).cloned().unwrap_or(Value::Null);
                Ok(value)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn draft() -> ReviewDraft {
        ReviewDraft {
            review: Some("Amazing trip, would book again!".into()),
            rating: Some(5.0),
            tour: Some(Uuid::new_v4()),
            user: Some(Uuid::new_v4()),
        }
    }

    #[test]
    fn accepts_complete_review() {
        let valid = Review::validate(draft(), Operation::Create).unwrap();
        assert_eq!(valid.rating, 5.0);
    }

    #[test]
    fn enforces_length_and_rating_bounds() {
        let mut d = draft();
        d.review = Some("Too short".into());
        d.rating = Some(6.0);
        let errors = Review::validate(d, Operation::Create).unwrap_err();
        assert!(errors.has("review"));
        assert!(errors.has("rating"));
    }

    #[test]
    fn requires_tour_and_author() {
        let mut d = draft();
        d.tour = None;
        d.user = None;
        let errors = Review::validate(d, Operation::Create).unwrap_err();
        assert!(errors.has("tour"));
        assert!(errors.has("user"));
    }

    #[test]
    fn serializes_references_by_short_name() {
        let review = Review {
            id: Uuid::new_v4(),
            review: "Amazing trip, would book again!".into(),
            rating: 4.0,
            created_at: Utc::now(),
            tour_id: Uuid::nil(),
            user_id: Uuid::nil(),
        };
        let value = serde_json::to_value(&review).unwrap();
        assert_eq!(value["tour"], json!(Uuid::nil()));
        assert!(value.get("createdAt").is_none());
        assert!(value.get("tourId").is_none());
    }
}
