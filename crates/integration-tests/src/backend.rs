//! In-process `axum` server speaking the backend's REST cart contract.
//!
//! Responses use the `{success, message, data}` envelope. Like the real
//! backend, `add` and `update` answer with the single affected line, `GET`
//! with the full list, and a missing line is a bare `404`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};

/// A failure the next request answers with.
#[derive(Debug, Clone, Copy)]
pub enum Fault {
    /// Plain status code with an error body.
    Status(u16),
    /// `429` with `Retry-After`.
    RateLimited { retry_after_secs: u64 },
    /// `200` with a body that is not JSON.
    Garbage,
    /// `200` with `success: false`.
    Refused,
}

#[derive(Debug, Clone)]
struct StoredLine {
    id: u64,
    user_id: String,
    product_id: String,
    quantity: i64,
    size: Option<String>,
    temperature: Option<String>,
    customizations: Option<String>,
}

impl StoredLine {
    fn matches(&self, body: &AddBody) -> bool {
        fn norm(value: Option<&String>) -> &str {
            value.map_or("", String::as_str)
        }
        self.product_id == body.product_id
            && norm(self.size.as_ref()) == norm(body.size.as_ref())
            && norm(self.temperature.as_ref()) == norm(body.temperature.as_ref())
            && norm(self.customizations.as_ref()) == norm(body.customizations.as_ref())
    }

    fn to_json(&self, prices: &HashMap<String, f64>) -> Value {
        json!({
            "id": self.id.to_string(),
            "user_id": self.user_id,
            "product_id": self.product_id,
            "quantity": self.quantity,
            "size": self.size,
            "temperature": self.temperature,
            "customizations": self.customizations,
            "product": { "price": prices.get(&self.product_id).copied().unwrap_or(1.0) },
        })
    }
}

#[derive(Default)]
struct BackendState {
    tokens: HashMap<String, String>,
    prices: HashMap<String, f64>,
    lines: Vec<StoredLine>,
    next_id: u64,
    faults: Vec<Fault>,
    requests: Vec<String>,
}

/// Handle to a running mock backend.
#[derive(Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<BackendState>>,
}

#[derive(Debug, Deserialize)]
struct AddBody {
    product_id: String,
    quantity: i64,
    #[serde(default)]
    size: Option<String>,
    #[serde(default)]
    temperature: Option<String>,
    #[serde(default)]
    customizations: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpdateBody {
    quantity: i64,
}

impl MockBackend {
    fn state(&self) -> MutexGuard<'_, BackendState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start serving on an ephemeral local port. Returns the base URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound.
    pub async fn start(&self) -> std::io::Result<String> {
        let listener = tokio::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await?;
        let addr = listener.local_addr()?;

        let app = Router::new()
            .route("/api/cart", get(list_lines))
            .route("/api/cart/add", post(add_line))
            .route("/api/cart/update/{line_id}", put(update_line))
            .route("/api/cart/clear", delete(clear_lines))
            .route("/api/cart/{line_id}", delete(remove_line))
            .with_state(self.clone());

        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Ok(format!("http://{addr}/api"))
    }

    /// Accept `token` as a credential for `user_id`.
    pub fn issue_token(&self, user_id: &str, token: &str) {
        self.state()
            .tokens
            .insert(token.to_owned(), user_id.to_owned());
    }

    /// Price reported for a product.
    pub fn set_price(&self, product_id: &str, price: f64) {
        self.state().prices.insert(product_id.to_owned(), price);
    }

    /// Answer the next request with a fault.
    pub fn inject(&self, fault: Fault) {
        self.state().faults.push(fault);
    }

    /// Quantity stored for a user's product without variant attributes.
    #[must_use]
    pub fn quantity(&self, user_id: &str, product_id: &str) -> i64 {
        self.state()
            .lines
            .iter()
            .filter(|l| l.user_id == user_id && l.product_id == product_id)
            .map(|l| l.quantity)
            .sum()
    }

    /// Number of lines stored for a user.
    #[must_use]
    pub fn line_count(&self, user_id: &str) -> usize {
        self.state()
            .lines
            .iter()
            .filter(|l| l.user_id == user_id)
            .count()
    }

    /// Requests received, as `METHOD path`.
    #[must_use]
    pub fn requests(&self) -> Vec<String> {
        self.state().requests.clone()
    }
}

fn envelope(message: &str, data: Value) -> Response {
    Json(json!({ "success": true, "message": message, "data": data })).into_response()
}

fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "detail": "Cart item not found" })),
    )
        .into_response()
}

/// Record the request, authenticate it, and apply any injected fault.
fn admit(backend: &MockBackend, headers: &HeaderMap, request: String) -> Result<String, Response> {
    let mut state = backend.state();
    state.requests.push(request);

    if !state.faults.is_empty() {
        let fault = state.faults.remove(0);
        return Err(match fault {
            Fault::Status(code) => (
                StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                Json(json!({ "detail": "injected" })),
            )
                .into_response(),
            Fault::RateLimited { retry_after_secs } => (
                StatusCode::TOO_MANY_REQUESTS,
                [(header::RETRY_AFTER, retry_after_secs.to_string())],
                "slow down",
            )
                .into_response(),
            Fault::Garbage => (StatusCode::OK, "<html>gateway</html>").into_response(),
            Fault::Refused => Json(json!({ "success": false, "message": "Refused" })).into_response(),
        });
    }

    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    token
        .and_then(|t| state.tokens.get(t).cloned())
        .ok_or_else(|| {
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "detail": "Could not validate credentials" })),
            )
                .into_response()
        })
}

async fn list_lines(State(backend): State<MockBackend>, headers: HeaderMap) -> Response {
    let user_id = match admit(&backend, &headers, "GET /cart".to_owned()) {
        Ok(user_id) => user_id,
        Err(response) => return response,
    };
    let state = backend.state();
    let lines: Vec<Value> = state
        .lines
        .iter()
        .filter(|l| l.user_id == user_id)
        .map(|l| l.to_json(&state.prices))
        .collect();
    envelope("Cart retrieved", Value::Array(lines))
}

async fn add_line(
    State(backend): State<MockBackend>,
    headers: HeaderMap,
    Json(body): Json<AddBody>,
) -> Response {
    let user_id = match admit(&backend, &headers, format!("POST /cart/add {}", body.product_id)) {
        Ok(user_id) => user_id,
        Err(response) => return response,
    };
    let mut state = backend.state();
    let state = &mut *state;

    let position = state
        .lines
        .iter()
        .position(|l| l.user_id == user_id && l.matches(&body));
    let line = if let Some(index) = position {
        let Some(line) = state.lines.get_mut(index) else {
            return not_found();
        };
        line.quantity += body.quantity;
        line.clone()
    } else {
        state.next_id += 1;
        let line = StoredLine {
            id: state.next_id,
            user_id,
            product_id: body.product_id,
            quantity: body.quantity,
            size: body.size,
            temperature: body.temperature,
            customizations: body.customizations,
        };
        state.lines.push(line.clone());
        line
    };
    envelope("Item added to cart", line.to_json(&state.prices))
}

async fn update_line(
    State(backend): State<MockBackend>,
    Path(line_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<UpdateBody>,
) -> Response {
    let user_id = match admit(&backend, &headers, format!("PUT /cart/update/{line_id}")) {
        Ok(user_id) => user_id,
        Err(response) => return response,
    };
    let mut state = backend.state();
    let state = &mut *state;

    let Some(line) = state
        .lines
        .iter_mut()
        .find(|l| l.user_id == user_id && l.id.to_string() == line_id)
    else {
        return not_found();
    };
    line.quantity = body.quantity;
    let line = line.clone();
    envelope("Cart item updated", line.to_json(&state.prices))
}

async fn remove_line(
    State(backend): State<MockBackend>,
    Path(line_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let user_id = match admit(&backend, &headers, format!("DELETE /cart/{line_id}")) {
        Ok(user_id) => user_id,
        Err(response) => return response,
    };
    let mut state = backend.state();
    let before = state.lines.len();
    state
        .lines
        .retain(|l| !(l.user_id == user_id && l.id.to_string() == line_id));
    if state.lines.len() == before {
        return not_found();
    }
    envelope("Item removed from cart", Value::Null)
}

async fn clear_lines(State(backend): State<MockBackend>, headers: HeaderMap) -> Response {
    let user_id = match admit(&backend, &headers, "DELETE /cart/clear".to_owned()) {
        Ok(user_id) => user_id,
        Err(response) => return response,
    };
    backend.state().lines.retain(|l| l.user_id != user_id);
    envelope("Cart cleared", Value::Null)
}
