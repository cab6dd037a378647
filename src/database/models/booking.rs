use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::{FromRow, PgPool};
use std::collections::HashMap;
use uuid::Uuid;

use crate::database::manager::DatabaseError;
use crate::database::models::tour::Tour;
use crate::database::models::user::User;
use crate::database::repository::Repository;
use crate::database::resource::Resource;
use crate::database::validation::ValidationErrors;
use crate::filter::types::{Field, FieldKind};
use crate::types::Operation;

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: Uuid,
    #[serde(rename = "tour")]
    pub tour_id: Uuid,
    #[serde(rename = "user")]
    pub user_id: Uuid,
    pub price: f64,
    pub paid: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct BookingDraft {
    pub tour: Option<Uuid>,
    pub user: Option<Uuid>,
    pub price: Option<f64>,
    pub paid: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct ValidBooking {
    pub tour_id: Uuid,
    pub user_id: Uuid,
    pub price: f64,
    pub paid: bool,
}

const BOOKING_FIELDS: &[Field] = &[
    Field::new("id", "id", FieldKind::Uuid),
    Field::new("tour", "tour_id", FieldKind::Uuid),
    Field::new("user", "user_id", FieldKind::Uuid),
    Field::new("price", "price", FieldKind::Float),
    Field::new("paid", "paid", FieldKind::Bool),
    Field::new("createdAt", "created_at", FieldKind::Timestamp),
];

impl Booking {
    /// Ids of the tours `user_id` has booked, oldest booking first
    pub async fn tour_ids_for_user(pool: &PgPool, user_id: Uuid) -> Result<Vec<Uuid>, DatabaseError> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            "SELECT tour_id FROM bookings WHERE user_id = $1 GROUP BY tour_id ORDER BY MIN(created_at)",
        )
        .bind(user_id)
        .fetch_all(pool)
        .await?;
        Ok(ids)
    }
}

#[async_trait]
impl Resource for Booking {
    const TABLE: &'static str = "bookings";
    const FIELDS: &'static [Field] = BOOKING_FIELDS;

    type Draft = BookingDraft;
    type Valid = ValidBooking;

    fn id(&self) -> Uuid {
        self.id
    }

    fn to_draft(&self) -> BookingDraft {
        BookingDraft {
            tour: Some(self.tour_id),
            user: Some(self.user_id),
            price: Some(self.price),
            paid: Some(self.paid),
        }
    }

    fn validate(draft: BookingDraft, _op: Operation) -> Result<ValidBooking, ValidationErrors> {
        let mut errors = ValidationErrors::new();
        let tour_id = errors.require("tour", draft.tour, "Booking must belong to a Tour!");
        let user_id = errors.require("user", draft.user, "Booking must belong to a User!");
        let price = errors.require("price", draft.price, "Booking must have a price.");
        if let Some(p) = price {
            if p < 0.0 {
                errors.add("price", "Booking price cannot be negative");
            }
        }

        errors.finish(|| {
            Some(ValidBooking {
                tour_id: tour_id?,
                user_id: user_id?,
                price: price?,
                paid: draft.paid.unwrap_or(true),
            })
        })
    }

    async fn insert(pool: &PgPool, valid: ValidBooking) -> Result<Self, DatabaseError> {
        let booking = sqlx::query_as::<_, Booking>(
            "INSERT INTO bookings (id, tour_id, user_id, price, paid) VALUES ($1, $2, $3, $4, $5) RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(valid.tour_id)
        .bind(valid.user_id)
        .bind(valid.price)
        .bind(valid.paid)
        .fetch_one(pool)
        .await?;
        Ok(booking)
    }

    async fn replace(pool: &PgPool, current: &Self, valid: ValidBooking) -> Result<Self, DatabaseError> {
        let booking = sqlx::query_as::<_, Booking>(
            "UPDATE bookings SET tour_id = $2, user_id = $3, price = $4, paid = $5 WHERE id = $1 RETURNING *",
        )
        .bind(current.id)
        .bind(valid.tour_id)
        .bind(valid.user_id)
        .bind(valid.price)
        .bind(valid.paid)
        .fetch_one(pool)
        .await?;
        Ok(booking)
    }

    async fn remove(pool: &PgPool, current: Self) -> Result<(), DatabaseError> {
        sqlx::query("DELETE FROM bookings WHERE id = $1")
            .bind(current.id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Embeds `{id, name}` of the tour and `{id, name, email}` of the buyer
    async fn populate(pool: &PgPool, docs: Vec<Self>, _include: Option<&str>) -> Result<Vec<Value>, DatabaseError> {
        let tour_ids: Vec<Uuid> = docs.iter().map(|b| b.tour_id).collect();
        let user_ids: Vec<Uuid> = docs.iter().map(|b| b.user_id).collect();

        let tours: HashMap<Uuid, Value> = Repository::<Tour>::new(pool.clone())
            .select_ids(&tour_ids)
            .await?
            .into_iter()
            .map(|t| (t.id, json!({ "id": t.id, "name": t.name })))
            .collect();
        let users: HashMap<Uuid, Value> = Repository::<User>::new(pool.clone())
            .select_ids(&user_ids)
            .await?
            .into_iter()
            .map(|u| (u.id, json!({ "id": u.id, "name": u.name, "email": u.email })))
            .collect();

        docs.iter()
            .map(|booking| {
                let mut value = serde_json::to_value(booking)?;
                value["tour"] = tours.get(&booking.tour_id).cloned().unwrap_or(Value::Null);
                value["user"] = users.get(&booking.user_id).cloned().unwrap_or(Value::Null);
                Ok(value)
            })
            .collect()
    }
}
