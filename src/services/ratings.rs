use sqlx::PgExecutor;
use uuid::Uuid;

use crate::database::manager::DatabaseError;

/// Recomputes a tour's rating count and mean (one decimal) from its
/// reviews in a single statement. A tour without reviews goes back to
/// 0 ratings averaging 4.5.
pub async fn recalculate<'e, E: PgExecutor<'e>>(executor: E, tour_id: Uuid) -> Result<(), DatabaseError> {
    sqlx::query(
        "UPDATE tours SET ratings_quantity = s.n, ratings_average = s.avg \
         FROM (SELECT COUNT(*)::int AS n, \
                      COALESCE(ROUND(AVG(rating)::numeric, 1)::float8, 4.5) AS avg \
               FROM reviews WHERE tour_id = $1) AS s \
         WHERE tours.id = $1",
    )
    .bind(tour_id)
    .execute(executor)
    .await?;
    tracing::debug!("Recalculated ratings for tour {}", tour_id);
    Ok(())
}
