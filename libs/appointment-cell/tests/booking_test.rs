use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::{Datelike, Duration, NaiveDate, Utc};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use appointment_cell::router::appointment_routes;
use shared_utils::test_utils::{MockRows, TestConfig};

fn test_app(url: &str) -> Router {
    appointment_routes(Arc::new(TestConfig::with_url(url).to_app_config()))
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("authorization", "Bearer test-token")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn patch_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("PATCH")
        .uri(uri)
        .header("authorization", "Bearer test-token")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn future_date() -> (NaiveDate, i32) {
    let date = Utc::now().date_naive() + Duration::days(7);
    let day = date.weekday().num_days_from_monday() as i32;
    (date, day)
}

fn booking_body(patient_id: &Uuid, doctor_id: &Uuid, date: NaiveDate, start: &str) -> Value {
    json!({
        "patient_id": patient_id,
        "doctor_id": doctor_id,
        "appointment_date": date.to_string(),
        "start_time": start,
        "appointment_type": "consultation",
        "patient_notes": null
    })
}

/// Availability window for the doctor on the date's weekday.
async fn mock_availability(server: &MockServer, doctor_id: &Uuid, day: i32) {
    Mock::given(method("GET"))
        .and(path("/rest/v1/doctor_availability"))
        .and(query_param("doctor_id", format!("eq.{}", doctor_id)))
        .and(query_param("day_of_week", format!("eq.{}", day)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockRows::availability_row(&doctor_id.to_string(), day, "09:00:00", "12:00:00")
        ])))
        .mount(server)
        .await;
}

/// Intervals blocking the doctor's slot computation.
async fn mock_booked_intervals(server: &MockServer, doctor_id: &Uuid, rows: Value) {
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("doctor_id", format!("eq.{}", doctor_id)))
        .and(query_param("status", "in.(pending,confirmed,completed)"))
        .and(query_param("select", "start_time,end_time"))
        .respond_with(ResponseTemplate::new(200).set_body_json(rows))
        .mount(server)
        .await;
}

/// The patient's active appointments on the date.
async fn mock_patient_appointments(server: &MockServer, patient_id: &Uuid, rows: Value) {
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("patient_id", format!("eq.{}", patient_id)))
        .and(query_param("status", "in.(pending,confirmed)"))
        .respond_with(ResponseTemplate::new(200).set_body_json(rows))
        .mount(server)
        .await;
}

/// The doctor's active appointments on the date (conflict check).
async fn mock_doctor_active(server: &MockServer, doctor_id: &Uuid, rows: Value) {
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("doctor_id", format!("eq.{}", doctor_id)))
        .and(query_param("status", "in.(pending,confirmed)"))
        .respond_with(ResponseTemplate::new(200).set_body_json(rows))
        .mount(server)
        .await;
}

async fn mock_notification_sink(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/rest/v1/notification_events"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([{"id": 1}])))
        .mount(server)
        .await;
}

#[tokio::test]
async fn book_appointment_succeeds_for_open_slot() {
    let mock_server = MockServer::start().await;
    let patient_id = Uuid::new_v4();
    let doctor_id = Uuid::new_v4();
    let (date, day) = future_date();

    mock_availability(&mock_server, &doctor_id, day).await;
    mock_booked_intervals(&mock_server, &doctor_id, json!([])).await;
    mock_patient_appointments(&mock_server, &patient_id, json!([])).await;
    mock_doctor_active(&mock_server, &doctor_id, json!([])).await;
    mock_notification_sink(&mock_server).await;

    let appointment_id = Uuid::new_v4();
    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            MockRows::appointment_row(
                &appointment_id.to_string(),
                &patient_id.to_string(),
                &doctor_id.to_string(),
                &date.to_string(),
                "09:00:00",
                "09:30:00",
                "pending",
            )
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let app = test_app(&mock_server.uri());
    let response = app
        .oneshot(post_json(
            "/",
            booking_body(&patient_id, &doctor_id, date, "09:00:00"),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["appointment"]["status"], "pending");
    assert_eq!(body["appointment"]["start_time"], "09:00:00");
    assert_eq!(body["appointment"]["end_time"], "09:30:00");
}

#[tokio::test]
async fn book_appointment_rejects_past_date() {
    let mock_server = MockServer::start().await;
    let patient_id = Uuid::new_v4();
    let doctor_id = Uuid::new_v4();
    let yesterday = Utc::now().date_naive() - Duration::days(1);

    // Validation fails before any store access.
    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&mock_server)
        .await;

    let app = test_app(&mock_server.uri());
    let response = app
        .oneshot(post_json(
            "/",
            booking_body(&patient_id, &doctor_id, yesterday, "09:00:00"),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["code"], "bad_request");
}

#[tokio::test]
async fn book_appointment_rejects_date_beyond_horizon() {
    let mock_server = MockServer::start().await;
    let patient_id = Uuid::new_v4();
    let doctor_id = Uuid::new_v4();
    let far_out = Utc::now().date_naive() + Duration::days(120);

    let app = test_app(&mock_server.uri());
    let response = app
        .oneshot(post_json(
            "/",
            booking_body(&patient_id, &doctor_id, far_out, "09:00:00"),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["code"], "validation_error");
}

#[tokio::test]
async fn book_appointment_rejects_taken_slot() {
    let mock_server = MockServer::start().await;
    let patient_id = Uuid::new_v4();
    let doctor_id = Uuid::new_v4();
    let (date, day) = future_date();

    mock_availability(&mock_server, &doctor_id, day).await;
    mock_booked_intervals(
        &mock_server,
        &doctor_id,
        json!([MockRows::booked_interval_row("09:00:00", "09:30:00")]),
    )
    .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&mock_server)
        .await;

    let app = test_app(&mock_server.uri());
    let response = app
        .oneshot(post_json(
            "/",
            booking_body(&patient_id, &doctor_id, date, "09:00:00"),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await;
    assert_eq!(body["code"], "conflict");
}

#[tokio::test]
async fn book_appointment_rejects_off_grid_start_time() {
    let mock_server = MockServer::start().await;
    let patient_id = Uuid::new_v4();
    let doctor_id = Uuid::new_v4();
    let (date, day) = future_date();

    mock_availability(&mock_server, &doctor_id, day).await;
    mock_booked_intervals(&mock_server, &doctor_id, json!([])).await;

    let app = test_app(&mock_server.uri());
    // 09:15 is not on the half-hour grid the windows produce.
    let response = app
        .oneshot(post_json(
            "/",
            booking_body(&patient_id, &doctor_id, date, "09:15:00"),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn book_appointment_rejects_double_booked_patient() {
    let mock_server = MockServer::start().await;
    let patient_id = Uuid::new_v4();
    let doctor_id = Uuid::new_v4();
    let other_doctor = Uuid::new_v4();
    let (date, day) = future_date();

    mock_availability(&mock_server, &doctor_id, day).await;
    mock_booked_intervals(&mock_server, &doctor_id, json!([])).await;
    // Same patient already holds 09:00-09:30 with another doctor.
    mock_patient_appointments(
        &mock_server,
        &patient_id,
        json!([MockRows::appointment_row(
            &Uuid::new_v4().to_string(),
            &patient_id.to_string(),
            &other_doctor.to_string(),
            &date.to_string(),
            "09:00:00",
            "09:30:00",
            "confirmed",
        )]),
    )
    .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&mock_server)
        .await;

    let app = test_app(&mock_server.uri());
    let response = app
        .oneshot(post_json(
            "/",
            booking_body(&patient_id, &doctor_id, date, "09:00:00"),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn concurrent_insert_conflict_surfaces_as_409() {
    let mock_server = MockServer::start().await;
    let patient_id = Uuid::new_v4();
    let doctor_id = Uuid::new_v4();
    let (date, day) = future_date();

    mock_availability(&mock_server, &doctor_id, day).await;
    mock_booked_intervals(&mock_server, &doctor_id, json!([])).await;
    mock_patient_appointments(&mock_server, &patient_id, json!([])).await;
    mock_doctor_active(&mock_server, &doctor_id, json!([])).await;

    // Another booking won the race; the exclusion constraint rejects ours.
    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(
            ResponseTemplate::new(409)
                .set_body_json(json!({"message": "conflicting key value violates exclusion constraint"})),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let app = test_app(&mock_server.uri());
    let response = app
        .oneshot(post_json(
            "/",
            booking_body(&patient_id, &doctor_id, date, "09:00:00"),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await;
    assert_eq!(body["code"], "conflict");
}

#[tokio::test]
async fn reschedule_moves_appointment_to_new_slot() {
    let mock_server = MockServer::start().await;
    let patient_id = Uuid::new_v4();
    let doctor_id = Uuid::new_v4();
    let appointment_id = Uuid::new_v4();
    let (date, day) = future_date();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", appointment_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockRows::appointment_row(
                &appointment_id.to_string(),
                &patient_id.to_string(),
                &doctor_id.to_string(),
                &date.to_string(),
                "09:00:00",
                "09:30:00",
                "pending",
            )
        ])))
        .mount(&mock_server)
        .await;

    mock_availability(&mock_server, &doctor_id, day).await;
    // The appointment's own interval is excluded from the booked set.
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("doctor_id", format!("eq.{}", doctor_id)))
        .and(query_param("status", "in.(pending,confirmed,completed)"))
        .and(query_param("select", "start_time,end_time"))
        .and(query_param("id", format!("neq.{}", appointment_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("patient_id", format!("eq.{}", patient_id)))
        .and(query_param("id", format!("neq.{}", appointment_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;
    mock_notification_sink(&mock_server).await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", appointment_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockRows::appointment_row(
                &appointment_id.to_string(),
                &patient_id.to_string(),
                &doctor_id.to_string(),
                &date.to_string(),
                "10:00:00",
                "10:30:00",
                "pending",
            )
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let app = test_app(&mock_server.uri());
    let response = app
        .oneshot(patch_json(
            &format!("/{}/reschedule", appointment_id),
            json!({
                "new_date": date.to_string(),
                "new_start_time": "10:00:00"
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["appointment"]["start_time"], "10:00:00");
    assert_eq!(body["appointment"]["status"], "pending");
}

#[tokio::test]
async fn reschedule_rejects_cancelled_appointment() {
    let mock_server = MockServer::start().await;
    let appointment_id = Uuid::new_v4();
    let (date, _) = future_date();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", appointment_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockRows::appointment_row(
                &appointment_id.to_string(),
                &Uuid::new_v4().to_string(),
                &Uuid::new_v4().to_string(),
                &date.to_string(),
                "09:00:00",
                "09:30:00",
                "cancelled",
            )
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let app = test_app(&mock_server.uri());
    let response = app
        .oneshot(patch_json(
            &format!("/{}/reschedule", appointment_id),
            json!({
                "new_date": date.to_string(),
                "new_start_time": "10:00:00"
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn conflict_check_reports_overlap() {
    let mock_server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();
    let (date, _) = future_date();

    mock_doctor_active(
        &mock_server,
        &doctor_id,
        json!([MockRows::appointment_row(
            &Uuid::new_v4().to_string(),
            &Uuid::new_v4().to_string(),
            &doctor_id.to_string(),
            &date.to_string(),
            "09:00:00",
            "09:30:00",
            "pending",
        )]),
    )
    .await;

    let app = test_app(&mock_server.uri());
    let uri = format!(
        "/conflicts/check?doctor_id={}&date={}&start_time=09:15:00&end_time=09:45:00",
        doctor_id, date
    );
    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri(&uri)
                .header("authorization", "Bearer test-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["has_conflict"], true);
    assert_eq!(body["conflicting_appointments"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn conflict_check_rejects_inverted_interval() {
    let mock_server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();
    let (date, _) = future_date();

    let app = test_app(&mock_server.uri());
    let uri = format!(
        "/conflicts/check?doctor_id={}&date={}&start_time=10:00:00&end_time=09:00:00",
        doctor_id, date
    );
    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri(&uri)
                .header("authorization", "Bearer test-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
