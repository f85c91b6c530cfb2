use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

/// Address that fails every call with an error envelope.
pub const BROKEN_USER: &str = "broken@example.com";
/// Id the backend reports as deleted upstream.
pub const GONE_ID: &str = "gone";

/// Stand-in for the calendar backend, served on a random local port.
#[derive(Clone, Default)]
pub struct FakeBackend {
    requests: Arc<Mutex<Vec<(String, Value)>>>,
}

impl FakeBackend {
    /// Serve on `127.0.0.1:0` and return the backend base URL.
    pub async fn start() -> (Self, String) {
        let backend = Self::default();
        let app = Router::new()
            .route("/auth/events/", get(list_events))
            .route("/auth/tasks/", get(list_tasks))
            .route("/auth/calendars/", get(list_calendars))
            .route("/auth/profile/", get(profile))
            .route("/auth/items/create/", post(create_item))
            .route("/auth/events/update", put(update_event))
            .route("/auth/events/delete", delete(delete_event))
            .route("/auth/tasks/delete", delete(delete_task))
            .with_state(backend.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind fake backend");
        let addr: SocketAddr = listener.local_addr().expect("No local address");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("Fake backend failed");
        });
        (backend, format!("http://{}/auth", addr))
    }

    /// Every request seen so far as (route, query or body).
    pub fn requests(&self) -> Vec<(String, Value)> {
        self.requests.lock().unwrap().clone()
    }

    pub fn last_request(&self, route: &str) -> Option<Value> {
        self.requests()
            .into_iter()
            .rev()
            .find(|(r, _)| r == route)
            .map(|(_, v)| v)
    }

    fn record(&self, route: &str, value: Value) {
        self.requests
            .lock()
            .unwrap()
            .push((route.to_string(), value));
    }
}

fn query_value(query: &HashMap<String, String>) -> Value {
    json!(query)
}

fn error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

fn is_broken(query: &HashMap<String, String>) -> bool {
    query.get("email").map(String::as_str) == Some(BROKEN_USER)
}

async fn list_events(
    State(backend): State<FakeBackend>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    backend.record("events", query_value(&query));
    if is_broken(&query) {
        return error(StatusCode::INTERNAL_SERVER_ERROR, "Invalid Credentials");
    }
    Json(json!({
        "events": [
            {
                "id": "e1",
                "summary": "Standup",
                "start": { "dateTime": "2024-06-01T09:00:00+05:30", "timeZone": "Asia/Kolkata" },
                "end": { "dateTime": "2024-06-01T09:15:00+05:30", "timeZone": "Asia/Kolkata" },
                "attendees": [{ "email": "team@example.com", "responseStatus": "accepted" }],
                "conferenceData": {
                    "entryPoints": [
                        { "entryPointType": "phone", "uri": "tel:+1-555-0100" },
                        { "entryPointType": "video", "uri": "https://meet.google.com/abc-defg-hij" }
                    ]
                }
            },
            {
                "id": "e2",
                "summary": "Holiday",
                "start": { "date": "2024-06-02" },
                "end": { "date": "2024-06-03" },
                "status": "confirmed"
            }
        ]
    }))
    .into_response()
}

async fn list_tasks(
    State(backend): State<FakeBackend>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    backend.record("tasks", query_value(&query));
    if is_broken(&query) {
        return error(StatusCode::INTERNAL_SERVER_ERROR, "Invalid Credentials");
    }
    Json(json!({
        "tasks": [
            { "id": "t1", "title": "Pay rent", "notes": "", "due": "2024-06-03T00:00:00.000Z", "status": "needsAction" }
        ]
    }))
    .into_response()
}

async fn list_calendars(
    State(backend): State<FakeBackend>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    backend.record("calendars", query_value(&query));
    Json(json!({
        "calendars": [
            { "id": "me@example.com", "summary": "me@example.com", "primary": true },
            { "id": "team@group.calendar.google.com", "summary": "Team" }
        ]
    }))
    .into_response()
}

async fn profile(
    State(backend): State<FakeBackend>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    backend.record("profile", query_value(&query));
    Json(json!({
        "name": "Me",
        "picture": "https://example.com/me.png",
        "email": query.get("email").cloned().unwrap_or_default()
    }))
    .into_response()
}

async fn create_item(State(backend): State<FakeBackend>, Json(body): Json<Value>) -> Response {
    backend.record("create", body.clone());
    let title = body["title"].clone();
    let hangout_link = if body["add_meet"] == json!(true) {
        json!("https://meet.google.com/new-meet-abc")
    } else {
        Value::Null
    };
    match body["type"].as_str() {
        Some("task") => Json(json!({
            "google_task": {
                "id": "t-new",
                "title": title,
                "due": format!("{}T00:00:00.000Z", body["due_at"].as_str().unwrap_or_default())
            }
        }))
        .into_response(),
        Some("event") | Some("appointment") => Json(json!({
            "google_event": {
                "id": "e-new",
                "summary": title,
                "start": { "dateTime": body["start_at"] },
                "end": { "dateTime": body["end_at"] },
                "hangoutLink": hangout_link
            }
        }))
        .into_response(),
        _ => error(StatusCode::BAD_REQUEST, "Invalid type"),
    }
}

async fn update_event(State(backend): State<FakeBackend>, Json(body): Json<Value>) -> Response {
    backend.record("update", body.clone());
    if body["event_id"] == json!(GONE_ID) {
        // the backend wraps upstream errors in a 500
        return error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "<HttpError 404 when requesting https://www.googleapis.com/calendar/v3/calendars/primary/events/gone?alt=json returned \"Not Found\">",
        );
    }
    Json(json!({
        "success": true,
        "event": {
            "id": body["event_id"],
            "summary": body["summary"],
            "start": { "dateTime": "2024-06-01T09:00:00Z" },
            "end": { "dateTime": "2024-06-01T10:00:00Z" }
        }
    }))
    .into_response()
}

async fn delete_event(State(backend): State<FakeBackend>, Json(body): Json<Value>) -> Response {
    backend.record("delete_event", body.clone());
    if body["event_id"] == json!(GONE_ID) {
        return error(StatusCode::NOT_FOUND, "Not Found");
    }
    Json(json!({ "success": true })).into_response()
}

async fn delete_task(State(backend): State<FakeBackend>, Json(body): Json<Value>) -> Response {
    backend.record("delete_task", body.clone());
    Json(json!({ "success": true })).into_response()
}
