use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::{types::Json, FromRow, PgPool};
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

use crate::database::manager::DatabaseError;
use crate::database::models::review::Review;
use crate::database::models::user::User;
use crate::database::repository::Repository;
use crate::database::resource::Resource;
use crate::database::validation::{round1, ValidationErrors};
use crate::filter::types::{Field, FieldKind};
use crate::types::Operation;

pub const DEFAULT_RATINGS_AVERAGE: f64 = 4.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Difficult,
}

#[derive(Debug, Error)]
#[error("Unknown difficulty: {0}")]
pub struct DifficultyParseError(pub String);

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Difficult => "difficult",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "easy" => Some(Difficulty::Easy),
            "medium" => Some(Difficulty::Medium),
            "difficult" => Some(Difficulty::Difficult),
            _ => None,
        }
    }
}

impl TryFrom<String> for Difficulty {
    type Error = DifficultyParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Difficulty::parse(&value).ok_or(DifficultyParseError(value))
    }
}

/// GeoJSON point; coordinates are `[longitude, latitude]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    #[serde(rename = "type", default = "point_type")]
    pub kind: String,
    #[serde(default)]
    pub coordinates: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day: Option<i32>,
}

fn point_type() -> String {
    "Point".to_string()
}

impl GeoPoint {
    fn is_valid(&self) -> bool {
        self.kind == "Point"
            && self.coordinates.len() == 2
            && (-180.0..=180.0).contains(&self.coordinates[0])
            && (-90.0..=90.0).contains(&self.coordinates[1])
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Tour {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub duration: i32,
    pub max_group_size: i32,
    #[sqlx(try_from = "String")]
    pub difficulty: Difficulty,
    pub ratings_average: f64,
    pub ratings_quantity: i32,
    pub price: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_discount: Option<f64>,
    pub summary: String,
    pub description: Option<String>,
    pub image_cover: String,
    pub images: Vec<String>,
    #[serde(skip_serializing)]
    pub created_at: DateTime<Utc>,
    pub start_dates: Vec<DateTime<Utc>>,
    pub secret_tour: bool,
    pub start_location: Option<Json<GeoPoint>>,
    pub locations: Json<Vec<GeoPoint>>,
    pub guides: Vec<Uuid>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TourDraft {
    pub name: Option<String>,
    pub duration: Option<i32>,
    pub max_group_size: Option<i32>,
    pub difficulty: Option<String>,
    pub ratings_average: Option<f64>,
    pub ratings_quantity: Option<i32>,
    pub price: Option<f64>,
    pub price_discount: Option<f64>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub image_cover: Option<String>,
    pub images: Option<Vec<String>>,
    pub start_dates: Option<Vec<DateTime<Utc>>>,
    pub secret_tour: Option<bool>,
    pub start_location: Option<GeoPoint>,
    pub locations: Option<Vec<GeoPoint>>,
    pub guides: Option<Vec<Uuid>>,
}

#[derive(Debug, Clone)]
pub struct ValidTour {
    pub name: String,
    pub duration: i32,
    pub max_group_size: i32,
    pub difficulty: Difficulty,
    pub ratings_average: f64,
    pub ratings_quantity: i32,
    pub price: f64,
    pub price_discount: Option<f64>,
    pub summary: String,
    pub description: Option<String>,
    pub image_cover: String,
    pub images: Vec<String>,
    pub start_dates: Vec<DateTime<Utc>>,
    pub secret_tour: bool,
    pub start_location: Option<GeoPoint>,
    pub locations: Vec<GeoPoint>,
    pub guides: Vec<Uuid>,
}

const TOUR_FIELDS: &[Field] = &[
    Field::new("id", "id", FieldKind::Uuid),
    Field::new("name", "name", FieldKind::Text),
    Field::new("slug", "slug", FieldKind::Text),
    Field::new("duration", "duration", FieldKind::Int),
    Field::new("maxGroupSize", "max_group_size", FieldKind::Int),
    Field::new("difficulty", "difficulty", FieldKind::Text),
    Field::new("ratingsAverage", "ratings_average", FieldKind::Float),
    Field::new("ratingsQuantity", "ratings_quantity", FieldKind::Int),
    Field::new("price", "price", FieldKind::Float),
    Field::new("priceDiscount", "price_discount", FieldKind::Float),
    Field::new("summary", "summary", FieldKind::Text),
    Field::new("description", "description", FieldKind::Text),
    Field::new("imageCover", "image_cover", FieldKind::Text),
    Field::new("images", "images", FieldKind::TextArray),
    Field::new("createdAt", "created_at", FieldKind::Timestamp),
    Field::new("startDates", "start_dates", FieldKind::TimestampArray),
    Field::new("secretTour", "secret_tour", FieldKind::Bool),
    Field::new("startLocation", "start_location", FieldKind::Json),
    Field::new("locations", "locations", FieldKind::Json),
    Field::new("guides", "guides", FieldKind::UuidArray),
];

/// Lowercase, ASCII-dash separated form of a name: "Test Tour One" -> "test-tour-one"
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;
    for c in name.chars() {
        if c.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.extend(c.to_lowercase());
        } else if c.is_whitespace() || c == '-' || c == '_' {
            pending_dash = true;
        }
    }
    slug
}

impl Tour {
    pub fn duration_weeks(&self) -> f64 {
        self.duration as f64 / 7.0
    }
}

#[async_trait]
impl Resource for Tour {
    const TABLE: &'static str = "tours";
    const FIELDS: &'static [Field] = TOUR_FIELDS;

    type Draft = TourDraft;
    type Valid = ValidTour;

    fn id(&self) -> Uuid {
        self.id
    }

    fn default_scope() -> Option<Value> {
        Some(json!({ "secretTour": { "$ne": true } }))
    }

    fn to_draft(&self) -> TourDraft {
        TourDraft {
            name: Some(self.name.clone()),
            duration: Some(self.duration),
            max_group_size: Some(self.max_group_size),
            difficulty: Some(self.difficulty.as_str().to_string()),
            ratings_average: Some(self.ratings_average),
            ratings_quantity: Some(self.ratings_quantity),
            price: Some(self.price),
            price_discount: self.price_discount,
            summary: Some(self.summary.clone()),
            description: self.description.clone(),
            image_cover: Some(self.image_cover.clone()),
            images: Some(self.images.clone()),
            start_dates: Some(self.start_dates.clone()),
            secret_tour: Some(self.secret_tour),
            start_location: self.start_location.as_ref().map(|loc| loc.0.clone()),
            locations: Some(self.locations.0.clone()),
            guides: Some(self.guides.clone()),
        }
    }

    fn validate(draft: TourDraft, op: Operation) -> Result<ValidTour, ValidationErrors> {
        let mut errors = ValidationErrors::new();

        let name = errors.require_text("name", draft.name, "A tour must have a name");
        if let Some(ref n) = name {
            let len = n.chars().count();
            if len > 40 {
                errors.add("name", "A tour name must have no more than 40 characters");
            } else if len < 10 {
                errors.add("name", "A tour name must have at least 10 characters");
            }
        }
        let duration = errors.require("duration", draft.duration, "A tour must have a duration");
        let max_group_size = errors.require("maxGroupSize", draft.max_group_size, "A tour must have a group size");
        let difficulty = match errors.require("difficulty", draft.difficulty, "A tour must have a difficulty") {
            Some(raw) => {
                let parsed = Difficulty::parse(raw.trim());
                if parsed.is_none() {
                    errors.add("difficulty", "Difficulty is either: easy, medium or difficult");
                }
                parsed
            }
            None => None,
        };

        let ratings_average = round1(draft.ratings_average.unwrap_or(DEFAULT_RATINGS_AVERAGE));
        if ratings_average < 1.0 {
            errors.add("ratingsAverage", "Rating must be above 1.0");
        } else if ratings_average > 5.0 {
            errors.add("ratingsAverage", "Rating cannot be above 5.0");
        }

        let price = errors.require("price", draft.price, "A tour must have a price");
        // The discount is only compared against the price when the tour is created
        if let (Operation::Create, Some(discount), Some(price)) = (op, draft.price_discount, price) {
            if discount >= price {
                errors.add(
                    "priceDiscount",
                    format!("Discount price ({}) should be below regular price", discount),
                );
            }
        }

        let summary = errors.require_text("summary", draft.summary, "A tour must have a summary");
        let description = draft
            .description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
        let image_cover = errors.require_text("imageCover", draft.image_cover, "A tour must have a cover image");

        if let Some(ref loc) = draft.start_location {
            if !loc.is_valid() {
                errors.add("startLocation", "Start location must be a Point with [longitude, latitude]");
            }
        }
        let locations = draft.locations.unwrap_or_default();
        if locations.iter().any(|loc| !loc.is_valid()) {
            errors.add("locations", "Locations must be Points with [longitude, latitude]");
        }

        errors.finish(|| {
            Some(ValidTour {
                name: name?,
                duration: duration?,
                max_group_size: max_group_size?,
                difficulty: difficulty?,
                ratings_average,
                ratings_quantity: draft.ratings_quantity.unwrap_or(0),
                price: price?,
                price_discount: draft.price_discount,
                summary: summary?,
                description,
                image_cover: image_cover?,
                images: draft.images.unwrap_or_default(),
                start_dates: draft.start_dates.unwrap_or_default(),
                secret_tour: draft.secret_tour.unwrap_or(false),
                start_location: draft.start_location,
                locations,
                guides: draft.guides.unwrap_or_default(),
            })
        })
    }

    async fn insert(pool: &PgPool, valid: ValidTour) -> Result<Self, DatabaseError> {
        let tour = sqlx::query_as::<_, Tour>(
            "INSERT INTO tours (id, name, slug, duration, max_group_size, difficulty, ratings_average, \
             ratings_quantity, price, price_discount, summary, description, image_cover, images, \
             start_dates, secret_tour, start_location, locations, guides) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19) \
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(&valid.name)
        .bind(slugify(&valid.name))
        .bind(valid.duration)
        .bind(valid.max_group_size)
        .bind(valid.difficulty.as_str())
        .bind(valid.ratings_average)
        .bind(valid.ratings_quantity)
        .bind(valid.price)
        .bind(valid.price_discount)
        .bind(&valid.summary)
        .bind(&valid.description)
        .bind(&valid.image_cover)
        .bind(&valid.images)
        .bind(&valid.start_dates)
        .bind(valid.secret_tour)
        .bind(valid.start_location.map(Json))
        .bind(Json(valid.locations))
        .bind(&valid.guides)
        .fetch_one(pool)
        .await?;
        Ok(tour)
    }

    async fn replace(pool: &PgPool, current: &Self, valid: ValidTour) -> Result<Self, DatabaseError> {
        let tour = sqlx::query_as::<_, Tour>(
            "UPDATE tours SET name = $2, slug = $3, duration = $4, max_group_size = $5, difficulty = $6, \
             ratings_average = $7, ratings_quantity = $8, price = $9, price_discount = $10, summary = $11, \
             description = $12, image_cover = $13, images = $14, start_dates = $15, secret_tour = $16, \
             start_location = $17, locations = $18, guides = $19 \
             WHERE id = $1 RETURNING *",
        )
        .bind(current.id)
        .bind(&valid.name)
        .bind(slugify(&valid.name))
        .bind(valid.duration)
        .bind(valid.max_group_size)
        .bind(valid.difficulty.as_str())
        .bind(valid.ratings_average)
        .bind(valid.ratings_quantity)
        .bind(valid.price)
        .bind(valid.price_discount)
        .bind(&valid.summary)
        .bind(&valid.description)
        .bind(&valid.image_cover)
        .bind(&valid.images)
        .bind(&valid.start_dates)
        .bind(valid.secret_tour)
        .bind(valid.start_location.map(Json))
        .bind(Json(valid.locations))
        .bind(&valid.guides)
        .fetch_one(pool)
        .await?;
        Ok(tour)
    }

    async fn remove(pool: &PgPool, current: Self) -> Result<(), DatabaseError> {
        sqlx::query("DELETE FROM tours WHERE id = $1")
            .bind(current.id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Adds `durationWeeks`, replaces guide ids with active guide cards and,
    /// with `include = "reviews"`, embeds the tour's reviews.
    async fn populate(pool: &PgPool, docs: Vec<Self>, include: Option<&str>) -> Result<Vec<Value>, DatabaseError> {
        let mut guide_ids: Vec<Uuid> = docs.iter().flat_map(|t| t.guides.iter().copied()).collect();
        guide_ids.sort_unstable();
        guide_ids.dedup();
        let guides: HashMap<Uuid, Value> = Repository::<User>::new(pool.clone())
            .select_ids(&guide_ids)
            .await?
            .into_iter()
            .map(|u| (u.id, u.summary(true)))
            .collect();

        let mut reviews_by_tour: HashMap<Uuid, Vec<Value>> = HashMap::new();
        if include == Some("reviews") && !docs.is_empty() {
            let tour_ids: Vec<String> = docs.iter().map(|t| t.id.to_string()).collect();
            let reviews = Repository::<Review>::new(pool.clone())
                .select_where(json!({ "tour": { "$in": tour_ids } }))
                .await?;
            let tour_of: Vec<Uuid> = reviews.iter().map(|r| r.tour_id).collect();
            let populated = Review::populate(pool, reviews, None).await?;
            for (tour_id, review) in tour_of.into_iter().zip(populated) {
                reviews_by_tour.entry(tour_id).or_default().push(review);
            }
        }

        let mut out = Vec::with_capacity(docs.len());
        for tour in docs {
            let mut value = serde_json::to_value(&tour)?;
            value["durationWeeks"] = json!(tour.duration_weeks());
            value["guides"] = Value::Array(tour.guides.iter().filter_map(|id| guides.get(id).cloned()).collect());
            if include == Some("reviews") {
                value["reviews"] = Value::Array(reviews_by_tour.remove(&tour.id).unwrap_or_default());
            }
            out.push(value);
        }
        Ok(out)
    }
}
