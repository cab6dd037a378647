use chrono::{NaiveDate, TimeZone, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool};

use crate::database::manager::DatabaseError;
use crate::database::models::tour::Tour;

pub const EARTH_RADIUS_MI: f64 = 3963.2;
pub const EARTH_RADIUS_KM: f64 = 6378.1;
const METERS_TO_MILES: f64 = 0.000621371;
const METERS_TO_KM: f64 = 0.001;

/// Great-circle angle in radians between `start_location` and the point
/// bound as ($1 = lng, $2 = lat).
const ANGULAR_DISTANCE_SQL: &str = "2 * ASIN(LEAST(1.0, SQRT(\
     POWER(SIN(RADIANS(((start_location->'coordinates'->>1)::float8 - $2) / 2)), 2) + \
     COS(RADIANS($2)) * COS(RADIANS((start_location->'coordinates'->>1)::float8)) * \
     POWER(SIN(RADIANS(((start_location->'coordinates'->>0)::float8 - $1) / 2)), 2))))";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceUnit {
    Miles,
    Kilometers,
}

impl DistanceUnit {
    /// `mi` means miles, anything else kilometers
    pub fn parse(raw: &str) -> Self {
        if raw == "mi" {
            DistanceUnit::Miles
        } else {
            DistanceUnit::Kilometers
        }
    }

    pub fn earth_radius(&self) -> f64 {
        match self {
            DistanceUnit::Miles => EARTH_RADIUS_MI,
            DistanceUnit::Kilometers => EARTH_RADIUS_KM,
        }
    }

    pub fn meters_multiplier(&self) -> f64 {
        match self {
            DistanceUnit::Miles => METERS_TO_MILES,
            DistanceUnit::Kilometers => METERS_TO_KM,
        }
    }
}

/// `"lat,lng"` into `(lat, lng)`; `None` when either part is missing or
/// not a number.
pub fn parse_latlng(raw: &str) -> Option<(f64, f64)> {
    let (lat, lng) = raw.split_once(',')?;
    let lat = lat.trim().parse::<f64>().ok().filter(|v| v.is_finite())?;
    let lng = lng.trim().parse::<f64>().ok().filter(|v| v.is_finite())?;
    Some((lat, lng))
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DifficultyStats {
    pub difficulty: String,
    pub num_of_tours: i64,
    pub num_of_ratings: i64,
    pub avg_rating: f64,
    pub avg_price: f64,
    pub min_price: f64,
    pub max_price: f64,
}

/// Tours rated 4.5 or better, grouped by upper-cased difficulty, cheapest
/// average first.
pub async fn tour_stats(pool: &PgPool) -> Result<Vec<DifficultyStats>, DatabaseError> {
    let stats = sqlx::query_as::<_, DifficultyStats>(
        "SELECT UPPER(difficulty) AS difficulty, \
                COUNT(*) AS num_of_tours, \
                COALESCE(SUM(ratings_quantity), 0)::bigint AS num_of_ratings, \
                AVG(ratings_average) AS avg_rating, \
                AVG(price) AS avg_price, \
                MIN(price) AS min_price, \
                MAX(price) AS max_price \
         FROM tours \
         WHERE ratings_average >= 4.5 AND secret_tour IS NOT TRUE \
         GROUP BY UPPER(difficulty) \
         ORDER BY avg_price ASC",
    )
    .fetch_all(pool)
    .await?;
    Ok(stats)
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct MonthPlan {
    pub month: i32,
    pub num_of_tour_starts: i64,
    pub tours: Vec<String>,
}

/// Start dates from Jan 1 through Dec 31 (midnight) of `year`, grouped by
/// month, busiest month first.
pub async fn monthly_plan(pool: &PgPool, year: i32) -> Result<Vec<MonthPlan>, DatabaseError> {
    let (from, to) = match year_bounds(year) {
        Some(bounds) => bounds,
        None => return Ok(vec![]),
    };
    let plan = sqlx::query_as::<_, MonthPlan>(
        "SELECT EXTRACT(MONTH FROM s.start_date AT TIME ZONE 'UTC')::int AS month, \
                COUNT(*) AS num_of_tour_starts, \
                ARRAY_AGG(t.name ORDER BY s.start_date) AS tours \
         FROM tours t CROSS JOIN LATERAL UNNEST(t.start_dates) AS s(start_date) \
         WHERE s.start_date >= $1 AND s.start_date <= $2 AND t.secret_tour IS NOT TRUE \
         GROUP BY 1 \
         ORDER BY num_of_tour_starts DESC, month ASC \
         LIMIT 12",
    )
    .bind(from)
    .bind(to)
    .fetch_all(pool)
    .await?;
    Ok(plan)
}

fn year_bounds(year: i32) -> Option<(chrono::DateTime<Utc>, chrono::DateTime<Utc>)> {
    let from = NaiveDate::from_ymd_opt(year, 1, 1)?.and_hms_opt(0, 0, 0)?;
    let to = NaiveDate::from_ymd_opt(year, 12, 31)?.and_hms_opt(0, 0, 0)?;
    Some((Utc.from_utc_datetime(&from), Utc.from_utc_datetime(&to)))
}

/// Tours whose start location lies within `distance` units of the point
pub async fn tours_within(
    pool: &PgPool,
    distance: f64,
    lat: f64,
    lng: f64,
    unit: DistanceUnit,
) -> Result<Vec<Tour>, DatabaseError> {
    let radius = distance / unit.earth_radius();
    let sql = format!(
        "SELECT * FROM tours \
         WHERE start_location IS NOT NULL AND secret_tour IS NOT TRUE AND {} <= $3 \
         ORDER BY created_at DESC, id ASC",
        ANGULAR_DISTANCE_SQL
    );
    let tours = sqlx::query_as::<_, Tour>(&sql)
        .bind(lng)
        .bind(lat)
        .bind(radius)
        .fetch_all(pool)
        .await?;
    Ok(tours)
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct TourDistance {
    pub id: uuid::Uuid,
    pub name: String,
    pub distance: f64,
}

/// Every located tour with its distance from the point, nearest first
pub async fn distances(pool: &PgPool, lat: f64, lng: f64, unit: DistanceUnit) -> Result<Vec<TourDistance>, DatabaseError> {
    let sql = format!(
        "SELECT id, name, {} * $3 * $4 AS distance FROM tours \
         WHERE start_location IS NOT NULL AND secret_tour IS NOT TRUE \
         ORDER BY distance ASC, id ASC",
        ANGULAR_DISTANCE_SQL
    );
    let rows = sqlx::query_as::<_, TourDistance>(&sql)
        .bind(lng)
        .bind(lat)
        .bind(EARTH_RADIUS_KM * 1000.0)
        .bind(unit.meters_multiplier())
        .fetch_all(pool)
        .await?;
    Ok(rows)
}
