#![allow(dead_code)]

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, put},
};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub type TestResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[derive(Debug, Clone)]
pub struct MockGroup {
    pub name: String,
    pub kind: String,
    pub now: String,
    pub all: Vec<String>,
}

pub fn selector(name: &str, now: &str, all: &[&str]) -> MockGroup {
    MockGroup {
        name: name.to_string(),
        kind: "Selector".to_string(),
        now: now.to_string(),
        all: all.iter().map(|s| s.to_string()).collect(),
    }
}

/// In-memory controller state shared with the HTTP handlers.
#[derive(Debug, Default)]
pub struct MockState {
    pub secret: Option<String>,
    pub groups: Vec<MockGroup>,
    /// Delay per node, whatever the probe URL. Absent nodes time out.
    pub delays: HashMap<String, u32>,
    pub reject_select: Vec<String>,
    pub selected: Vec<(String, String)>,
    pub reloads: Vec<String>,
    pub delay_probes: Vec<(String, String)>,
    pub unauthorized: usize,
}

pub type Shared = Arc<Mutex<MockState>>;

pub struct MockClash {
    pub state: Shared,
    base_url: String,
}

impl MockClash {
    pub async fn start(state: MockState) -> TestResult<Self> {
        let state = Arc::new(Mutex::new(state));
        let router = Router::new()
            .route("/proxies", get(list_proxies))
            .route("/proxies/{name}", get(get_proxy).put(select_proxy))
            .route("/proxies/{name}/delay", get(proxy_delay))
            .route("/configs", put(reload_configs))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        Ok(Self {
            state,
            base_url: format!("http://{}", addr),
        })
    }

    pub fn base_url(&self) -> String {
        self.base_url.clone()
    }

    pub fn now_of(&self, group: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        state
            .groups
            .iter()
            .find(|g| g.name == group)
            .map(|g| g.now.clone())
    }
}

fn authorized(state: &mut MockState, headers: &HeaderMap) -> bool {
    let Some(secret) = &state.secret else {
        return true;
    };
    let expected = format!("Bearer {}", secret);
    let ok = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == expected);
    if !ok {
        state.unauthorized += 1;
    }
    ok
}

fn unauthorized() -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({ "message": "Unauthorized" }))).into_response()
}

fn group_json(group: &MockGroup) -> Value {
    json!({
        "name": group.name,
        "type": group.kind,
        "now": group.now,
        "all": group.all,
    })
}

async fn list_proxies(State(state): State<Shared>, headers: HeaderMap) -> Response {
    let mut state = state.lock().unwrap();
    if !authorized(&mut state, &headers) {
        return unauthorized();
    }
    let mut proxies = Map::new();
    for group in &state.groups {
        for member in &group.all {
            if !proxies.contains_key(member) && !state.groups.iter().any(|g| &g.name == member) {
                proxies.insert(
                    member.clone(),
                    json!({ "name": member, "type": "Shadowsocks" }),
                );
            }
        }
        proxies.insert(group.name.clone(), group_json(group));
    }
    Json(json!({ "proxies": proxies })).into_response()
}

async fn get_proxy(
    State(state): State<Shared>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Response {
    let mut state = state.lock().unwrap();
    if !authorized(&mut state, &headers) {
        return unauthorized();
    }
    match state.groups.iter().find(|g| g.name == name) {
        Some(group) => Json(group_json(group)).into_response(),
        None => Json(json!({ "name": name, "type": "Shadowsocks" })).into_response(),
    }
}

#[derive(Deserialize)]
struct DelayQuery {
    url: String,
}

async fn proxy_delay(
    State(state): State<Shared>,
    Path(name): Path<String>,
    axum::extract::Query(query): axum::extract::Query<DelayQuery>,
    headers: HeaderMap,
) -> Response {
    let mut state = state.lock().unwrap();
    if !authorized(&mut state, &headers) {
        return unauthorized();
    }
    state.delay_probes.push((name.clone(), query.url));
    match state.delays.get(&name) {
        Some(ms) => Json(json!({ "delay": ms })).into_response(),
        None => (
            StatusCode::GATEWAY_TIMEOUT,
            Json(json!({ "message": "Timeout" })),
        )
            .into_response(),
    }
}

#[derive(Deserialize)]
struct SelectBody {
    name: String,
}

async fn select_proxy(
    State(state): State<Shared>,
    Path(group): Path<String>,
    headers: HeaderMap,
    Json(body): Json<SelectBody>,
) -> Response {
    let mut state = state.lock().unwrap();
    if !authorized(&mut state, &headers) {
        return unauthorized();
    }
    if state.reject_select.contains(&body.name) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "message": "Selector update error" })),
        )
            .into_response();
    }
    let Some(entry) = state.groups.iter_mut().find(|g| g.name == group) else {
        return (StatusCode::NOT_FOUND, Json(json!({ "message": "not found" }))).into_response();
    };
    entry.now = body.name.clone();
    state.selected.push((group, body.name));
    StatusCode::NO_CONTENT.into_response()
}

#[derive(Deserialize)]
struct ReloadBody {
    path: String,
}

async fn reload_configs(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<ReloadBody>,
) -> Response {
    let mut state = state.lock().unwrap();
    if !authorized(&mut state, &headers) {
        return unauthorized();
    }
    state.reloads.push(body.path);
    StatusCode::NO_CONTENT.into_response()
}
