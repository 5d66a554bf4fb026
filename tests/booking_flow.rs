//! End-to-end booking lifecycle tests against real Postgres and Redis.
//!
//! Run with a database and redis available:
//! `DATABASE_URL=... REDIS_URL=... cargo test -- --ignored`

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use cinebooker::cache::CacheService;
use cinebooker::config::{
    AppConfig, BookingConfig, CircuitBreakerConfig, Config, DatabaseConfig, PaymentConfig,
    RedisConfig,
};
use cinebooker::database::Database;
use cinebooker::errors::BookingError;
use cinebooker::redis_client::RedisClient;
use cinebooker::services::gateway::PaymentGatewayClient;
use cinebooker::services::inventory::SeatInventory;
use cinebooker::services::lifecycle::BookingLifecycle;
use cinebooker::services::reaper::LockReaper;
use cinebooker::AppState;

fn test_config(gateway_url: &str) -> Config {
    Config {
        app: AppConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            environment: "test".to_string(),
            rust_log: "cinebooker=debug".to_string(),
        },
        database: DatabaseConfig {
            url: std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for this test"),
            pool_size: 5,
        },
        redis: RedisConfig {
            url: std::env::var("REDIS_URL").expect("REDIS_URL must be set for this test"),
        },
        booking: BookingConfig {
            seat_lock_minutes: 10,
            reaper_interval_seconds: 60,
        },
        payment: PaymentConfig {
            merchant_id: "cinebooker-test".to_string(),
            merchant_password: "secret".to_string(),
            gateway_url: gateway_url.to_string(),
            success_url: "http://localhost/payment/success".to_string(),
            cancel_url: "http://localhost/payment/cancel".to_string(),
            currency: "EGP".to_string(),
        },
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 5,
            timeout_seconds: 60,
        },
    }
}

async fn test_state(gateway_url: &str) -> Arc<AppState> {
    let config = test_config(gateway_url);
    let db = Database::new(&config.database.url, config.database.pool_size)
        .await
        .expect("connect to test database");
    db.run_migrations().await.expect("run migrations");
    let redis = RedisClient::new(&config.redis.url)
        .await
        .expect("connect to test redis");
    let cache = CacheService::new(redis.clone(), db.clone());
    let gateway = PaymentGatewayClient::from_config(&config.payment, &config.circuit_breaker);
    Arc::new(AppState {
        db,
        redis,
        cache,
        gateway,
        config,
    })
}

/// Gateway double: one session id, create always succeeds, status is either
/// PAID (with a reference) or NEW.
async fn mock_gateway(session_id: &str, paid: bool) -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/sessions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "sessionId": session_id,
            "paymentURL": format!("https://pay.example.com/{}", session_id),
        })))
        .mount(&server)
        .await;

    let status_body = if paid {
        json!({
            "success": true,
            "status": "PAID",
            "paymentRef": format!("PAY-{}", session_id),
        })
    } else {
        json!({ "success": true, "status": "NEW" })
    };

    Mock::given(method("POST"))
        .and(path("/api/v1/sessions/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(status_body))
        .mount(&server)
        .await;

    server
}

async fn seed_user(db: &Database) -> i64 {
    sqlx::query_scalar(
        "INSERT INTO users (email, password_sha256, first_name, surname)
         VALUES ($1, 'x', 'Test', 'Customer') RETURNING id",
    )
    .bind(format!("cust-{}@example.com", Uuid::new_v4().simple()))
    .fetch_one(&db.pool)
    .await
    .expect("seed user")
}

/// One fresh hall with `seat_count` seats in row 1, one show, uniform price.
/// Returns the show id and its show_seat ids ordered by column.
async fn seed_show(db: &Database, price: i64, seat_count: i32) -> (i64, Vec<i64>) {
    let hall_id: i64 = sqlx::query_scalar(
        "INSERT INTO halls (cinema_name, name) VALUES ('Test Cinema', $1) RETURNING id",
    )
    .bind(format!("Hall {}", Uuid::new_v4().simple()))
    .fetch_one(&db.pool)
    .await
    .expect("seed hall");

    sqlx::query(
        "INSERT INTO seats (hall_id, seat_row, seat_col)
         SELECT $1, 1, c FROM generate_series(1, $2::INT) AS c",
    )
    .bind(hall_id)
    .bind(seat_count)
    .execute(&db.pool)
    .await
    .expect("seed seats");

    let show_id: i64 = sqlx::query_scalar(
        "INSERT INTO shows (movie_title, hall_id, starts_at, ends_at)
         VALUES ('Test Movie', $1, NOW() + interval '1 day', NOW() + interval '1 day 2 hours')
         RETURNING id",
    )
    .bind(hall_id)
    .fetch_one(&db.pool)
    .await
    .expect("seed show");

    sqlx::query(
        "INSERT INTO show_seats (show_id, seat_id, price)
         SELECT $1, id, $2 FROM seats WHERE hall_id = $3",
    )
    .bind(show_id)
    .bind(price)
    .bind(hall_id)
    .execute(&db.pool)
    .await
    .expect("seed show seats");

    let seat_ids: Vec<i64> = sqlx::query_scalar(
        "SELECT ss.id FROM show_seats ss
         JOIN seats s ON s.id = ss.seat_id
         WHERE ss.show_id = $1
         ORDER BY s.seat_row, s.seat_col",
    )
    .bind(show_id)
    .fetch_all(&db.pool)
    .await
    .expect("list show seats");

    (show_id, seat_ids)
}

async fn seat_statuses(db: &Database, seat_ids: &[i64]) -> Vec<String> {
    sqlx::query_scalar("SELECT status FROM show_seats WHERE id = ANY($1) ORDER BY id")
        .bind(seat_ids)
        .fetch_all(&db.pool)
        .await
        .expect("seat statuses")
}

async fn booking_status(db: &Database, booking_id: i64) -> String {
    sqlx::query_scalar("SELECT status FROM bookings WHERE id = $1")
        .bind(booking_id)
        .fetch_one(&db.pool)
        .await
        .expect("booking status")
}

async fn backdate_locks(db: &Database, seat_ids: &[i64]) {
    sqlx::query(
        "UPDATE show_seats SET lock_expiration = NOW() - interval '1 minute'
         WHERE id = ANY($1) AND status = 'LOCKED'",
    )
    .bind(seat_ids)
    .execute(&db.pool)
    .await
    .expect("backdate locks");
}

#[tokio::test]
#[ignore = "requires Postgres and Redis (set DATABASE_URL and REDIS_URL)"]
async fn two_customers_race_for_overlapping_seats() {
    let session_id = format!("sess-{}", Uuid::new_v4().simple());
    let gateway = mock_gateway(&session_id, true).await;
    let state = test_state(&gateway.uri()).await;

    let (show_id, seats) = seed_show(&state.db, 50, 2).await;
    let customer1 = seed_user(&state.db).await;
    let customer2 = seed_user(&state.db).await;

    let lifecycle = BookingLifecycle::from_state(&state);

    // Customer 1 wins both seats in one atomic claim.
    let booking = lifecycle.reserve(customer1, show_id, &seats).await.unwrap();
    assert_eq!(booking.amount, 100);
    assert_eq!(booking.seat_count, 2);
    assert_eq!(seat_statuses(&state.db, &seats).await, ["LOCKED", "LOCKED"]);

    // Customer 2 loses the race for the overlapping seat, with the conflict
    // named and nothing partially locked.
    let err = lifecycle
        .reserve(customer2, show_id, &seats[1..])
        .await
        .unwrap_err();
    match err {
        BookingError::SeatUnavailable(ids) => assert_eq!(ids, vec![seats[1]]),
        other => panic!("expected SeatUnavailable, got {:?}", other),
    }

    // Customer 1 pays.
    let payment = lifecycle
        .initiate_payment(customer1, booking.booking_id)
        .await
        .unwrap();
    assert_eq!(payment.session_id, session_id);

    let confirmed = lifecycle
        .confirm_payment(customer1, booking.booking_id, &session_id)
        .await
        .unwrap();
    assert!(!confirmed.already_confirmed);
    assert_eq!(confirmed.confirmation_code, format!("PAY-{}", session_id));
    assert_eq!(seat_statuses(&state.db, &seats).await, ["BOOKED", "BOOKED"]);
    assert_eq!(booking_status(&state.db, booking.booking_id).await, "APPROVED");

    // Confirm is idempotent: same code, no state change.
    let again = lifecycle
        .confirm_payment(customer1, booking.booking_id, &session_id)
        .await
        .unwrap();
    assert!(again.already_confirmed);
    assert_eq!(again.confirmation_code, confirmed.confirmation_code);
    assert_eq!(seat_statuses(&state.db, &seats).await, ["BOOKED", "BOOKED"]);

    // Customer 2 retries: seats are sold now, still a full refusal.
    let err = lifecycle
        .reserve(customer2, show_id, &seats)
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::SeatUnavailable(_)));
}

#[tokio::test]
#[ignore = "requires Postgres and Redis (set DATABASE_URL and REDIS_URL)"]
async fn explicit_cancel_frees_seats_immediately() {
    let gateway = mock_gateway("sess-unused-cancel", true).await;
    let state = test_state(&gateway.uri()).await;

    let (show_id, seats) = seed_show(&state.db, 50, 2).await;
    let customer1 = seed_user(&state.db).await;
    let customer2 = seed_user(&state.db).await;

    let lifecycle = BookingLifecycle::from_state(&state);

    let booking = lifecycle.reserve(customer1, show_id, &seats).await.unwrap();
    let outcome = lifecycle.cancel(customer1, booking.booking_id).await.unwrap();
    assert_eq!(outcome.seats_released, 2);
    assert_eq!(seat_statuses(&state.db, &seats).await, ["AVAILABLE", "AVAILABLE"]);
    assert_eq!(booking_status(&state.db, booking.booking_id).await, "CANCELLED");

    // Cancelling again is a no-op, not an error.
    let outcome = lifecycle.cancel(customer1, booking.booking_id).await.unwrap();
    assert_eq!(outcome.seats_released, 0);

    // Released seats are immediately lockable by someone else.
    let relock = lifecycle.reserve(customer2, show_id, &seats).await.unwrap();
    assert_eq!(relock.seat_count, 2);
}

#[tokio::test]
#[ignore = "requires Postgres and Redis (set DATABASE_URL and REDIS_URL)"]
async fn reaper_reclaims_expired_locks_idempotently() {
    let gateway = mock_gateway("sess-unused-reaper", true).await;
    let state = test_state(&gateway.uri()).await;

    let (show_id, seats) = seed_show(&state.db, 50, 2).await;
    let customer1 = seed_user(&state.db).await;
    let customer2 = seed_user(&state.db).await;

    let lifecycle = BookingLifecycle::from_state(&state);
    let reaper = LockReaper::new(state.clone());

    let booking = lifecycle.reserve(customer1, show_id, &seats).await.unwrap();
    backdate_locks(&state.db, &seats).await;

    let stats = reaper.sweep(Utc::now()).await.unwrap();
    assert_eq!(stats.seats_released, 2);
    assert_eq!(stats.bookings_cancelled, 1);
    assert_eq!(seat_statuses(&state.db, &seats).await, ["AVAILABLE", "AVAILABLE"]);
    assert_eq!(booking_status(&state.db, booking.booking_id).await, "CANCELLED");

    // A second sweep finds nothing more to do.
    let stats = reaper.sweep(Utc::now()).await.unwrap();
    assert_eq!(stats.seats_released, 0);
    assert_eq!(stats.bookings_cancelled, 0);

    // The reclaimed seats are lockable again.
    lifecycle.reserve(customer2, show_id, &seats).await.unwrap();
}

#[tokio::test]
#[ignore = "requires Postgres and Redis (set DATABASE_URL and REDIS_URL)"]
async fn initiate_payment_after_expiry_cancels_booking() {
    let gateway = mock_gateway("sess-unused-expiry", true).await;
    let state = test_state(&gateway.uri()).await;

    let (show_id, seats) = seed_show(&state.db, 50, 1).await;
    let customer = seed_user(&state.db).await;

    let lifecycle = BookingLifecycle::from_state(&state);

    let booking = lifecycle.reserve(customer, show_id, &seats).await.unwrap();
    backdate_locks(&state.db, &seats).await;

    let err = lifecycle
        .initiate_payment(customer, booking.booking_id)
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::SessionExpired));

    // The booking was cancelled as a side effect and the seat freed.
    assert_eq!(booking_status(&state.db, booking.booking_id).await, "CANCELLED");
    assert_eq!(seat_statuses(&state.db, &seats).await, ["AVAILABLE"]);
}

#[tokio::test]
#[ignore = "requires Postgres and Redis (set DATABASE_URL and REDIS_URL)"]
async fn unpaid_session_leaves_booking_pending() {
    let session_id = format!("sess-{}", Uuid::new_v4().simple());
    let gateway = mock_gateway(&session_id, false).await;
    let state = test_state(&gateway.uri()).await;

    let (show_id, seats) = seed_show(&state.db, 50, 1).await;
    let customer = seed_user(&state.db).await;

    let lifecycle = BookingLifecycle::from_state(&state);

    let booking = lifecycle.reserve(customer, show_id, &seats).await.unwrap();
    lifecycle
        .initiate_payment(customer, booking.booking_id)
        .await
        .unwrap();

    let err = lifecycle
        .confirm_payment(customer, booking.booking_id, &session_id)
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::PaymentNotCompleted));
    assert_eq!(booking_status(&state.db, booking.booking_id).await, "PENDING");
    assert_eq!(seat_statuses(&state.db, &seats).await, ["LOCKED"]);
}

#[tokio::test]
#[ignore = "requires Postgres and Redis (set DATABASE_URL and REDIS_URL)"]
async fn empty_seat_selection_is_rejected() {
    let gateway = mock_gateway("sess-unused-empty", true).await;
    let state = test_state(&gateway.uri()).await;

    let (show_id, _seats) = seed_show(&state.db, 50, 1).await;
    let customer = seed_user(&state.db).await;

    let lifecycle = BookingLifecycle::from_state(&state);
    let err = lifecycle.reserve(customer, show_id, &[]).await.unwrap_err();
    assert!(matches!(err, BookingError::EmptySeatSelection));
}

#[tokio::test]
#[ignore = "requires Postgres and Redis (set DATABASE_URL and REDIS_URL)"]
async fn released_seats_can_be_relocked() {
    let session_id = format!("sess-{}", Uuid::new_v4().simple());
    let gateway = mock_gateway(&session_id, true).await;
    let state = test_state(&gateway.uri()).await;

    let (show_id, seats) = seed_show(&state.db, 50, 2).await;
    let customer1 = seed_user(&state.db).await;
    let customer2 = seed_user(&state.db).await;

    let lifecycle = BookingLifecycle::from_state(&state);
    let inventory = SeatInventory::new(state.db.clone());

    // Sell the seats outright.
    let booking = lifecycle.reserve(customer1, show_id, &seats).await.unwrap();
    lifecycle
        .initiate_payment(customer1, booking.booking_id)
        .await
        .unwrap();
    lifecycle
        .confirm_payment(customer1, booking.booking_id, &session_id)
        .await
        .unwrap();
    assert_eq!(seat_statuses(&state.db, &seats).await, ["BOOKED", "BOOKED"]);

    // Releasing booked seats (refund-style) puts them back on sale; a repeat
    // release on already-available seats is a silent no-op.
    assert_eq!(inventory.release(&seats).await.unwrap(), 2);
    assert_eq!(inventory.release(&seats).await.unwrap(), 0);
    assert_eq!(seat_statuses(&state.db, &seats).await, ["AVAILABLE", "AVAILABLE"]);

    // Release then lock on the same seat set succeeds.
    let relock = lifecycle.reserve(customer2, show_id, &seats).await.unwrap();
    assert_eq!(relock.seat_count, 2);
}

#[tokio::test]
#[ignore = "requires Postgres and Redis (set DATABASE_URL and REDIS_URL)"]
async fn repricing_never_touches_pending_amounts() {
    let gateway = mock_gateway("sess-unused-reprice", true).await;
    let state = test_state(&gateway.uri()).await;

    let (show_id, seats) = seed_show(&state.db, 50, 2).await;
    let customer1 = seed_user(&state.db).await;
    let customer2 = seed_user(&state.db).await;

    let lifecycle = BookingLifecycle::from_state(&state);
    let inventory = SeatInventory::new(state.db.clone());

    let booking = lifecycle
        .reserve(customer1, show_id, &seats[..1])
        .await
        .unwrap();
    assert_eq!(booking.amount, 50);

    // Only the still-available seat is repriced.
    let repriced = inventory.reprice_available(show_id, 80).await.unwrap();
    assert_eq!(repriced, 1);

    let amount: i64 = sqlx::query_scalar("SELECT amount FROM bookings WHERE id = $1")
        .bind(booking.booking_id)
        .fetch_one(&state.db.pool)
        .await
        .unwrap();
    assert_eq!(amount, 50);

    // A new claim on the other seat sees the new price.
    let second = lifecycle
        .reserve(customer2, show_id, &seats[1..])
        .await
        .unwrap();
    assert_eq!(second.amount, 80);
}
