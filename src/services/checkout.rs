use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::models::booking::{Booking, BookingDraft};
use crate::database::models::tour::Tour;
use crate::database::models::user::User;
use crate::database::repository::Repository;
use crate::database::resource::Resource;
use crate::error::ApiError;
use crate::payments::{CheckoutRequest, CheckoutSession, CompletedCheckout, PaymentGateway};
use crate::types::Operation;

/// Opens a hosted checkout for one seat on `tour_id`
pub async fn create_session(
    pool: &PgPool,
    gateway: &dyn PaymentGateway,
    tour_id: Uuid,
    user: &User,
    origin: &str,
    currency: &str,
) -> Result<CheckoutSession, ApiError> {
    let tour = Repository::<Tour>::new(pool.clone()).select_404(tour_id).await?;

    let request = CheckoutRequest {
        success_url: format!("{}/my-tours", origin),
        cancel_url: format!("{}/tour/{}", origin, tour.slug),
        customer_email: user.email.clone(),
        client_reference_id: tour.id.to_string(),
        product_name: format!("{} Tour", tour.name),
        description: tour.summary.clone(),
        images: vec![format!("{}/img/tours/{}", origin, tour.image_cover)],
        unit_amount: (tour.price * 100.0).round() as i64,
        currency: currency.to_string(),
    };
    Ok(gateway.create_checkout_session(request).await?)
}

/// Records the booking paid for by a completed checkout
pub async fn record_booking(pool: &PgPool, checkout: &CompletedCheckout) -> Result<Booking, ApiError> {
    let tour_id = Uuid::parse_str(&checkout.client_reference_id)
        .map_err(|_| ApiError::cast_error("tour", checkout.client_reference_id.clone()))?;
    let user = Repository::<User>::new(pool.clone())
        .select_one_where(json!({ "email": checkout.customer_email.to_lowercase() }))
        .await?
        .ok_or_else(|| ApiError::not_found(format!("No user with email {}", checkout.customer_email)))?;

    let valid = Booking::validate(
        BookingDraft {
            tour: Some(tour_id),
            user: Some(user.id),
            price: Some(checkout.amount_total as f64 / 100.0),
            paid: Some(true),
        },
        Operation::Create,
    )?;
    let booking = Booking::insert(pool, valid).await?;
    tracing::info!("Booking {} recorded for tour {} by {}", booking.id, tour_id, user.id);
    Ok(booking)
}

/// Tours the user has booked
pub async fn booked_tours(pool: &PgPool, user_id: Uuid) -> Result<Vec<Tour>, ApiError> {
    let ids = Booking::tour_ids_for_user(pool, user_id).await?;
    let mut tours = Repository::<Tour>::new(pool.clone()).select_ids(&ids).await?;
    tours.sort_by_key(|t| ids.iter().position(|id| *id == t.id));
    Ok(tours)
}
