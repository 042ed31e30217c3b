//! JSON boundary for the reservation engine. Authentication lives upstream:
//! callers arrive with `x-user-id` / `x-user-role` headers already verified
//! by the gateway, and everything here is translation — headers to
//! [`Identity`], engine rejections to HTTP statuses.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::{NaiveDate, NaiveDateTime};
use serde::Deserialize;
use serde_json::json;
use ulid::Ulid;

use crate::engine::{Engine, EngineError, ErrorCategory};
use crate::model::{
    ClockTime, Identity, LibrarianPatch, NewLibrarian, NewRoom, ReviewDecision, Role, RoomPatch,
    SettingsPatch,
};
use crate::observability::{REJECTIONS_TOTAL, REQUESTS_TOTAL, REQUEST_DURATION_SECONDS};

pub fn create_router(engine: Arc<Engine>) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/settings", get(get_settings).put(put_settings))
        .route("/rooms", get(get_rooms).post(post_room))
        .route("/rooms/all", get(get_all_rooms))
        .route("/rooms/:id", put(put_room).delete(delete_room))
        .route("/rooms/:id/free", get(get_free_ranges))
        .route("/librarians", get(get_librarians).post(post_librarian))
        .route("/librarians/all", get(get_all_librarians))
        .route("/librarians/:id", put(put_librarian))
        .route("/bookings", post(post_booking).get(get_all_bookings))
        .route("/bookings/my", get(get_my_bookings))
        .route("/bookings/:id", put(put_booking).delete(delete_booking))
        .route("/slots", get(get_taken_slots))
        .route("/meetings", post(post_meeting).get(get_meetings))
        .route("/meetings/my", get(get_my_meetings))
        .route("/meetings/slots", get(get_meeting_slots))
        .route("/meetings/:id", put(put_meeting).delete(delete_meeting))
        .with_state(engine)
}

fn local_now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

/// Pull the pre-authenticated identity out of the gateway headers.
fn identity(headers: &HeaderMap) -> Result<Identity, Response> {
    let user = headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Ulid::from_string(s).ok());
    let role = headers
        .get("x-user-role")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| match s {
            "student" => Some(Role::Student),
            "librarian" => Some(Role::Librarian),
            "admin" => Some(Role::Admin),
            _ => None,
        });
    match (user, role) {
        (Some(user), Some(role)) => Ok(Identity { user, role }),
        _ => Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({
                "kind": "unauthenticated",
                "message": "missing or invalid identity headers",
            })),
        )
            .into_response()),
    }
}

fn reject(err: EngineError) -> Response {
    metrics::counter!(REJECTIONS_TOTAL, "kind" => err.kind()).increment(1);
    let status = match err.category() {
        ErrorCategory::Validation | ErrorCategory::Policy => StatusCode::BAD_REQUEST,
        ErrorCategory::Conflict => StatusCode::CONFLICT,
        ErrorCategory::Authorization => StatusCode::FORBIDDEN,
        ErrorCategory::NotFound => StatusCode::NOT_FOUND,
        ErrorCategory::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(json!({ "kind": err.kind(), "message": err.to_string() })),
    )
        .into_response()
}

fn respond<T: serde::Serialize>(
    op: &'static str,
    started: Instant,
    result: Result<T, EngineError>,
    ok_status: StatusCode,
) -> Response {
    metrics::histogram!(REQUEST_DURATION_SECONDS, "op" => op)
        .record(started.elapsed().as_secs_f64());
    match result {
        Ok(value) => {
            metrics::counter!(REQUESTS_TOTAL, "op" => op, "status" => "ok").increment(1);
            (ok_status, Json(value)).into_response()
        }
        Err(err) => {
            metrics::counter!(REQUESTS_TOTAL, "op" => op, "status" => "rejected").increment(1);
            reject(err)
        }
    }
}

async fn get_health() -> Response {
    (StatusCode::OK, Json(json!({ "status": "ok" }))).into_response()
}

// ── Bookings ─────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateBookingReq {
    room: Ulid,
    date: NaiveDate,
    start_time: ClockTime,
    end_time: ClockTime,
    #[serde(default)]
    purpose: String,
}

async fn post_booking(
    State(engine): State<Arc<Engine>>,
    headers: HeaderMap,
    Json(req): Json<CreateBookingReq>,
) -> Response {
    let started = Instant::now();
    let ident = match identity(&headers) {
        Ok(i) => i,
        Err(r) => return r,
    };
    let result = engine
        .create_booking(
            &ident,
            req.room,
            req.date,
            req.start_time,
            req.end_time,
            req.purpose,
            local_now(),
        )
        .await;
    respond("create_booking", started, result, StatusCode::CREATED)
}

async fn get_my_bookings(State(engine): State<Arc<Engine>>, headers: HeaderMap) -> Response {
    let started = Instant::now();
    let ident = match identity(&headers) {
        Ok(i) => i,
        Err(r) => return r,
    };
    let bookings = engine.my_bookings(&ident, local_now()).await;
    respond("my_bookings", started, Ok(bookings), StatusCode::OK)
}

async fn get_all_bookings(State(engine): State<Arc<Engine>>, headers: HeaderMap) -> Response {
    let started = Instant::now();
    let ident = match identity(&headers) {
        Ok(i) => i,
        Err(r) => return r,
    };
    let result = engine.list_all_bookings(&ident, local_now()).await;
    respond("list_bookings", started, result, StatusCode::OK)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RescheduleReq {
    date: NaiveDate,
    start_time: ClockTime,
    end_time: ClockTime,
    purpose: Option<String>,
}

async fn put_booking(
    State(engine): State<Arc<Engine>>,
    headers: HeaderMap,
    Path(id): Path<Ulid>,
    Json(req): Json<RescheduleReq>,
) -> Response {
    let started = Instant::now();
    let ident = match identity(&headers) {
        Ok(i) => i,
        Err(r) => return r,
    };
    let result = engine
        .reschedule_booking(
            &ident,
            id,
            req.date,
            req.start_time,
            req.end_time,
            req.purpose,
            local_now(),
        )
        .await;
    respond("reschedule_booking", started, result, StatusCode::OK)
}

async fn delete_booking(
    State(engine): State<Arc<Engine>>,
    headers: HeaderMap,
    Path(id): Path<Ulid>,
) -> Response {
    let started = Instant::now();
    let ident = match identity(&headers) {
        Ok(i) => i,
        Err(r) => return r,
    };
    let result = engine
        .cancel_booking(&ident, id, local_now())
        .await
        .map(|()| json!({ "message": "Booking cancelled" }));
    respond("cancel_booking", started, result, StatusCode::OK)
}

#[derive(Deserialize)]
struct SlotsQuery {
    date: NaiveDate,
}

async fn get_taken_slots(
    State(engine): State<Arc<Engine>>,
    Query(q): Query<SlotsQuery>,
) -> Response {
    let started = Instant::now();
    let taken = engine.taken_slots(q.date).await;
    respond("taken_slots", started, Ok(taken), StatusCode::OK)
}

async fn get_free_ranges(
    State(engine): State<Arc<Engine>>,
    Path(id): Path<Ulid>,
    Query(q): Query<SlotsQuery>,
) -> Response {
    let started = Instant::now();
    let result = engine.free_room_ranges(id, q.date).await;
    respond("free_ranges", started, result, StatusCode::OK)
}

// ── Meetings ─────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateMeetingReq {
    librarian: Ulid,
    date: NaiveDate,
    preferred_time: ClockTime,
    topic: String,
    #[serde(default)]
    notes: String,
}

async fn post_meeting(
    State(engine): State<Arc<Engine>>,
    headers: HeaderMap,
    Json(req): Json<CreateMeetingReq>,
) -> Response {
    let started = Instant::now();
    let ident = match identity(&headers) {
        Ok(i) => i,
        Err(r) => return r,
    };
    let result = engine
        .create_meeting(
            &ident,
            req.librarian,
            req.date,
            req.preferred_time,
            req.topic,
            req.notes,
            local_now(),
        )
        .await;
    respond("create_meeting", started, result, StatusCode::CREATED)
}

async fn get_my_meetings(State(engine): State<Arc<Engine>>, headers: HeaderMap) -> Response {
    let started = Instant::now();
    let ident = match identity(&headers) {
        Ok(i) => i,
        Err(r) => return r,
    };
    let meetings = engine.my_meetings(&ident).await;
    respond("my_meetings", started, Ok(meetings), StatusCode::OK)
}

async fn get_meetings(State(engine): State<Arc<Engine>>, headers: HeaderMap) -> Response {
    let started = Instant::now();
    let ident = match identity(&headers) {
        Ok(i) => i,
        Err(r) => return r,
    };
    let result = engine.list_meetings(&ident).await;
    respond("list_meetings", started, result, StatusCode::OK)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MeetingSlotsQuery {
    librarian_id: Ulid,
    date: NaiveDate,
}

async fn get_meeting_slots(
    State(engine): State<Arc<Engine>>,
    Query(q): Query<MeetingSlotsQuery>,
) -> Response {
    let started = Instant::now();
    let slots = engine.taken_meeting_slots(q.librarian_id, q.date).await;
    respond("meeting_slots", started, Ok(slots), StatusCode::OK)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReviewReq {
    decision: ReviewDecision,
    note: Option<String>,
}

async fn put_meeting(
    State(engine): State<Arc<Engine>>,
    headers: HeaderMap,
    Path(id): Path<Ulid>,
    Json(req): Json<ReviewReq>,
) -> Response {
    let started = Instant::now();
    let ident = match identity(&headers) {
        Ok(i) => i,
        Err(r) => return r,
    };
    let result = engine
        .review_meeting(&ident, id, req.decision, req.note)
        .await;
    respond("review_meeting", started, result, StatusCode::OK)
}

async fn delete_meeting(
    State(engine): State<Arc<Engine>>,
    headers: HeaderMap,
    Path(id): Path<Ulid>,
) -> Response {
    let started = Instant::now();
    let ident = match identity(&headers) {
        Ok(i) => i,
        Err(r) => return r,
    };
    let result = engine
        .cancel_meeting(&ident, id)
        .await
        .map(|()| json!({ "message": "Meeting cancelled" }));
    respond("cancel_meeting", started, result, StatusCode::OK)
}

// ── Directories & settings ───────────────────────────────

async fn get_rooms(State(engine): State<Arc<Engine>>) -> Response {
    let started = Instant::now();
    respond("list_rooms", started, Ok(engine.list_rooms()), StatusCode::OK)
}

async fn get_all_rooms(State(engine): State<Arc<Engine>>, headers: HeaderMap) -> Response {
    let started = Instant::now();
    let ident = match identity(&headers) {
        Ok(i) => i,
        Err(r) => return r,
    };
    respond("list_all_rooms", started, engine.list_all_rooms(&ident), StatusCode::OK)
}

async fn post_room(
    State(engine): State<Arc<Engine>>,
    headers: HeaderMap,
    Json(req): Json<NewRoom>,
) -> Response {
    let started = Instant::now();
    let ident = match identity(&headers) {
        Ok(i) => i,
        Err(r) => return r,
    };
    let result = engine.create_room(&ident, req).await;
    respond("create_room", started, result, StatusCode::CREATED)
}

async fn put_room(
    State(engine): State<Arc<Engine>>,
    headers: HeaderMap,
    Path(id): Path<Ulid>,
    Json(req): Json<RoomPatch>,
) -> Response {
    let started = Instant::now();
    let ident = match identity(&headers) {
        Ok(i) => i,
        Err(r) => return r,
    };
    let result = engine.update_room(&ident, id, req).await;
    respond("update_room", started, result, StatusCode::OK)
}

async fn delete_room(
    State(engine): State<Arc<Engine>>,
    headers: HeaderMap,
    Path(id): Path<Ulid>,
) -> Response {
    let started = Instant::now();
    let ident = match identity(&headers) {
        Ok(i) => i,
        Err(r) => return r,
    };
    let result = engine
        .retire_room(&ident, id)
        .await
        .map(|()| json!({ "message": "Room retired" }));
    respond("retire_room", started, result, StatusCode::OK)
}

async fn get_librarians(State(engine): State<Arc<Engine>>) -> Response {
    let started = Instant::now();
    respond("list_librarians", started, Ok(engine.list_librarians()), StatusCode::OK)
}

async fn get_all_librarians(State(engine): State<Arc<Engine>>, headers: HeaderMap) -> Response {
    let started = Instant::now();
    let ident = match identity(&headers) {
        Ok(i) => i,
        Err(r) => return r,
    };
    respond(
        "list_all_librarians",
        started,
        engine.list_all_librarians(&ident),
        StatusCode::OK,
    )
}

async fn post_librarian(
    State(engine): State<Arc<Engine>>,
    headers: HeaderMap,
    Json(req): Json<NewLibrarian>,
) -> Response {
    let started = Instant::now();
    let ident = match identity(&headers) {
        Ok(i) => i,
        Err(r) => return r,
    };
    let result = engine.register_librarian(&ident, req).await;
    respond("register_librarian", started, result, StatusCode::CREATED)
}

async fn put_librarian(
    State(engine): State<Arc<Engine>>,
    headers: HeaderMap,
    Path(id): Path<Ulid>,
    Json(req): Json<LibrarianPatch>,
) -> Response {
    let started = Instant::now();
    let ident = match identity(&headers) {
        Ok(i) => i,
        Err(r) => return r,
    };
    let result = engine.update_librarian(&ident, id, req).await;
    respond("update_librarian", started, result, StatusCode::OK)
}

async fn get_settings(State(engine): State<Arc<Engine>>) -> Response {
    let started = Instant::now();
    let settings = engine.settings().await;
    respond("get_settings", started, Ok(settings), StatusCode::OK)
}

async fn put_settings(
    State(engine): State<Arc<Engine>>,
    headers: HeaderMap,
    Json(req): Json<SettingsPatch>,
) -> Response {
    let started = Instant::now();
    let ident = match identity(&headers) {
        Ok(i) => i,
        Err(r) => return r,
    };
    let result = engine.update_settings(&ident, req).await;
    respond("update_settings", started, result, StatusCode::OK)
}
