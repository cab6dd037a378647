mod common;

use anyhow::{Context, Result};
use reqwest::StatusCode;
use serde_json::{json, Value};
use uuid::Uuid;

use common::TestServer;
use tourbook::database::models::user::Role;
use tourbook::payments::stripe::sign_payload;

async fn tour_doc(server: &TestServer, id: Uuid) -> Result<Value> {
    let res = server.client.get(server.url(&format!("/api/v1/tours/{}", id))).send().await?;
    anyhow::ensure!(res.status() == StatusCode::OK, "tour lookup failed: {}", res.status());
    let body: Value = res.json().await?;
    Ok(body["data"]["data"].clone())
}

async fn post_review(server: &TestServer, token: &str, tour: Uuid, rating: u8) -> Result<reqwest::Response> {
    Ok(server
        .client
        .post(server.url(&format!("/api/v1/tours/{}/reviews", tour)))
        .bearer_auth(token)
        .json(&json!({ "review": "Cras mollis nisi parturient mi nec aliquet", "rating": rating }))
        .send()
        .await?)
}

#[tokio::test]
async fn only_staff_create_tours() -> Result<()> {
    require_database!();
    let server = TestServer::start().await?;
    let (_, user) = server.signup("Ben Hadley").await?;

    let res = server
        .client
        .post(server.url("/api/v1/tours"))
        .bearer_auth(&user)
        .json(&json!({ "name": "The Forbidden Hike" }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let (_, lead) = server.signup_as("Steve T. Scaife", Role::LeadGuide).await?;
    let id = server.create_tour(&lead).await?;
    let doc = tour_doc(&server, id).await?;
    assert_eq!(doc["ratingsAverage"], json!(4.5));
    assert_eq!(doc["ratingsQuantity"], json!(0));
    assert!(doc["slug"].as_str().unwrap_or("").starts_with("test-tour-"));
    assert_eq!(doc["durationWeeks"].as_f64(), Some(5.0 / 7.0));
    Ok(())
}

#[tokio::test]
async fn reviews_drive_tour_ratings() -> Result<()> {
    require_database!();
    let server = TestServer::start().await?;
    let (_, admin) = server.signup_as("Laura Wilson", Role::Admin).await?;
    let (_, ann) = server.signup("Ann Reviewer").await?;
    let (_, bob) = server.signup("Bob Reviewer").await?;
    let tour = server.create_tour(&admin).await?;

    let res = post_review(&server, &ann, tour, 4).await?;
    assert_eq!(res.status(), StatusCode::CREATED);
    let res = post_review(&server, &bob, tour, 3).await?;
    assert_eq!(res.status(), StatusCode::CREATED);
    let body: Value = res.json().await?;
    let bob_review = body["data"]["data"]["id"].as_str().context("review id")?.to_string();

    let doc = tour_doc(&server, tour).await?;
    assert_eq!(doc["ratingsQuantity"], json!(2));
    assert_eq!(doc["ratingsAverage"], json!(3.5));
    assert_eq!(doc["reviews"].as_array().map(Vec::len), Some(2));

    // One review per tour and author
    let res = post_review(&server, &ann, tour, 5).await?;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    // Admins cannot post reviews
    let res = post_review(&server, &admin, tour, 5).await?;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = server
        .client
        .get(server.url(&format!("/api/v1/tours/{}/reviews", tour)))
        .bearer_auth(&ann)
        .send()
        .await?;
    let body: Value = res.json().await?;
    assert_eq!(body["results"], json!(2));

    let res = server
        .client
        .delete(server.url(&format!("/api/v1/reviews/{}", bob_review)))
        .bearer_auth(&admin)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::NO_CONTENT);
    let doc = tour_doc(&server, tour).await?;
    assert_eq!(doc["ratingsQuantity"], json!(1));
    assert_eq!(doc["ratingsAverage"], json!(4.0));
    Ok(())
}

#[tokio::test]
async fn review_edits_recompute_ratings() -> Result<()> {
    require_database!();
    let server = TestServer::start().await?;
    let (_, admin) = server.signup_as("Nina Editor", Role::Admin).await?;
    let (_, ann) = server.signup("Ann Mover").await?;
    let (_, bob) = server.signup("Bob Stayer").await?;
    let first = server.create_tour(&admin).await?;
    let second = server.create_tour(&admin).await?;

    post_review(&server, &bob, first, 5).await?;
    let res = post_review(&server, &ann, first, 3).await?;
    assert_eq!(res.status(), StatusCode::CREATED);
    let body: Value = res.json().await?;
    let review = body["data"]["data"]["id"].as_str().context("review id")?.to_string();
    assert_eq!(tour_doc(&server, first).await?["ratingsAverage"], json!(4.0));

    // Rating changed in place
    let res = server
        .client
        .patch(server.url(&format!("/api/v1/reviews/{}", review)))
        .bearer_auth(&ann)
        .json(&json!({ "rating": 4 }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    let doc = tour_doc(&server, first).await?;
    assert_eq!(doc["ratingsQuantity"], json!(2));
    assert_eq!(doc["ratingsAverage"], json!(4.5));

    // Moved to another tour: both aggregates follow
    let res = server
        .client
        .patch(server.url(&format!("/api/v1/reviews/{}", review)))
        .bearer_auth(&admin)
        .json(&json!({ "tour": second, "rating": 2 }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);

    let doc = tour_doc(&server, first).await?;
    assert_eq!(doc["ratingsQuantity"], json!(1));
    assert_eq!(doc["ratingsAverage"], json!(5.0));
    let doc = tour_doc(&server, second).await?;
    assert_eq!(doc["ratingsQuantity"], json!(1));
    assert_eq!(doc["ratingsAverage"], json!(2.0));
    Ok(())
}

#[tokio::test]
async fn listing_filters_sorts_and_projects() -> Result<()> {
    require_database!();
    let server = TestServer::start().await?;
    let (_, admin) = server.signup_as("Kit Dawson", Role::Admin).await?;
    server.create_tour(&admin).await?;

    let res = server
        .client
        .get(server.url("/api/v1/tours?price[gte]=200&sort=-price&fields=name,price&limit=5"))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await?;
    let docs = body["data"]["data"].as_array().context("tour list")?;
    assert!(!docs.is_empty() && docs.len() <= 5);

    let prices: Vec<f64> = docs.iter().filter_map(|d| d["price"].as_f64()).collect();
    assert!(prices.iter().all(|p| *p >= 200.0));
    assert!(prices.windows(2).all(|w| w[0] >= w[1]));
    for doc in docs {
        let mut keys: Vec<&str> = doc.as_object().map(|o| o.keys().map(String::as_str).collect()).unwrap_or_default();
        keys.sort_unstable();
        assert_eq!(keys, vec!["id", "name", "price"]);
    }

    let res = server.client.get(server.url("/api/v1/tours/not-a-uuid")).send().await?;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await?;
    assert_eq!(body["message"], "Invalid id: not-a-uuid.");
    Ok(())
}

#[tokio::test]
async fn distances_reach_the_antipode() -> Result<()> {
    require_database!();
    let server = TestServer::start().await?;
    let (_, admin) = server.signup_as("Gus Globe", Role::Admin).await?;
    let tour = server.create_tour(&admin).await?;

    let res = server
        .client
        .patch(server.url(&format!("/api/v1/tours/{}", tour)))
        .bearer_auth(&admin)
        .json(&json!({ "startLocation": { "type": "Point", "coordinates": [-118.113491, 34.111745] } }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);

    let res = server
        .client
        .get(server.url("/api/v1/tours/distances/-34.111745,61.886509/unit/km"))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await?;
    let docs = body["data"]["data"].as_array().context("distances")?;
    let ours = docs.iter().find(|d| d["id"] == json!(tour)).context("tour in distances")?;
    let km = ours["distance"].as_f64().context("distance")?;
    assert!((km - std::f64::consts::PI * 6378.1).abs() < 1.0, "{}", km);
    Ok(())
}

fn tiny_png() -> Result<Vec<u8>> {
    let mut bytes = std::io::Cursor::new(Vec::new());
    image::RgbImage::from_pixel(8, 8, image::Rgb([40, 160, 90])).write_to(&mut bytes, image::ImageFormat::Png)?;
    Ok(bytes.into_inner())
}

fn stored_images_for(tour: Uuid) -> Result<usize> {
    let dir = std::path::Path::new(&common::test_config().server.upload_dir).join("img").join("tours");
    if !dir.exists() {
        return Ok(0);
    }
    let prefix = format!("tour-{}-", tour);
    let mut count = 0;
    for entry in std::fs::read_dir(dir)? {
        if entry?.file_name().to_string_lossy().starts_with(&prefix) {
            count += 1;
        }
    }
    Ok(count)
}

#[tokio::test]
async fn refused_image_updates_leave_no_files() -> Result<()> {
    require_database!();
    let server = TestServer::start().await?;
    let (_, admin) = server.signup_as("Ida Upload", Role::Admin).await?;
    let tour = server.create_tour(&admin).await?;
    let missing = Uuid::new_v4();

    let cover = || -> Result<reqwest::multipart::Form> {
        let part = reqwest::multipart::Part::bytes(tiny_png()?).file_name("cover.png").mime_str("image/png")?;
        Ok(reqwest::multipart::Form::new().part("imageCover", part))
    };

    let res = server
        .client
        .patch(server.url(&format!("/api/v1/tours/{}", missing)))
        .bearer_auth(&admin)
        .multipart(cover()?)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert_eq!(stored_images_for(missing)?, 0);

    let res = server
        .client
        .patch(server.url(&format!("/api/v1/tours/{}", tour)))
        .bearer_auth(&admin)
        .multipart(cover()?.text("maxGroupSize", "lots"))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(stored_images_for(tour)?, 0);

    let res = server
        .client
        .patch(server.url(&format!("/api/v1/tours/{}", tour)))
        .bearer_auth(&admin)
        .multipart(cover()?)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(stored_images_for(tour)?, 1);
    Ok(())
}

#[tokio::test]
async fn secret_tours_stay_hidden() -> Result<()> {
    require_database!();
    let server = TestServer::start().await?;
    let (_, admin) = server.signup_as("Mia Secret", Role::Admin).await?;
    let tour = server.create_tour(&admin).await?;

    let res = server
        .client
        .patch(server.url(&format!("/api/v1/tours/{}", tour)))
        .bearer_auth(&admin)
        .json(&json!({ "secretTour": true }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);

    let res = server.client.get(server.url(&format!("/api/v1/tours/{}", tour))).send().await?;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn checkout_session_is_opened_for_the_tour() -> Result<()> {
    require_database!();
    let server = TestServer::start().await?;
    let (_, admin) = server.signup_as("Cal Checkout", Role::Admin).await?;
    let email = common::unique_email();
    let (_, token) = server.signup_with_email("Pia Payer", &email).await?;
    let tour = server.create_tour(&admin).await?;

    let res = server
        .client
        .get(server.url(&format!("/api/v1/bookings/checkout-session/{}", tour)))
        .bearer_auth(&token)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await?;
    assert_eq!(body["data"]["session"]["id"], "cs_test_recorded");
    assert_eq!(body["data"]["session"]["client_reference_id"], json!(tour.to_string()));

    let request = server.payments.last_request().context("checkout request")?;
    assert_eq!(request.success_url, server.url("/my-tours"));
    assert!(request.cancel_url.starts_with(&server.url("/tour/test-tour-")));
    assert_eq!(request.customer_email, email);
    assert_eq!(request.unit_amount, 49700);
    assert_eq!(request.currency, "usd");

    let res = server
        .client
        .get(server.url(&format!("/api/v1/bookings/checkout-session/{}", Uuid::new_v4())))
        .bearer_auth(&token)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn completed_checkout_books_the_tour() -> Result<()> {
    require_database!();
    let server = TestServer::start().await?;
    let (_, admin) = server.signup_as("Sue Booker", Role::Admin).await?;
    let email = common::unique_email();
    let (_, token) = server.signup_with_email("Tom Traveller", &email).await?;
    let tour = server.create_tour(&admin).await?;

    let payload = json!({
        "type": "checkout.session.completed",
        "data": { "object": {
            "client_reference_id": tour.to_string(),
            "customer_email": email,
            "amount_total": 49700,
        }},
    })
    .to_string();
    let signature = sign_payload(payload.as_bytes(), common::WEBHOOK_SECRET, chrono::Utc::now().timestamp());

    let res = server
        .client
        .post(server.url("/webhook-checkout"))
        .header("Stripe-Signature", signature)
        .body(payload)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);

    let res = server.client.get(server.url("/api/v1/bookings/my-tours")).bearer_auth(&token).send().await?;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await?;
    assert_eq!(body["results"], json!(1));
    assert_eq!(body["data"]["tours"][0]["id"], json!(tour));

    let res = server
        .client
        .get(server.url(&format!("/api/v1/bookings?tour={}", tour)))
        .bearer_auth(&admin)
        .send()
        .await?;
    let body: Value = res.json().await?;
    assert_eq!(body["data"]["data"][0]["price"], json!(497.0));
    assert_eq!(body["data"]["data"][0]["paid"], json!(true));
    Ok(())
}
