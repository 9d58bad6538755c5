//! HTTP implementation of the remote cart gateway.
//!
//! Speaks the backend's REST cart contract with `reqwest`:
//!
//! | Operation       | Request                          |
//! |-----------------|----------------------------------|
//! | fetch           | `GET    cart`                    |
//! | add             | `POST   cart/add`                |
//! | set quantity    | `PUT    cart/update/{line_id}`   |
//! | remove          | `DELETE cart/{line_id}`          |
//! | clear           | `DELETE cart/clear`              |
//!
//! Mutations whose response carries the full line list are answered from that
//! body; anything else is followed by a `fetch`.

use std::sync::Arc;

use cart_sync_core::{Cart, LineId, ProductId, Variant};
use reqwest::{Method, StatusCode};
use serde::Serialize;
use tracing::{debug, error, instrument, warn};
use url::Url;

use crate::config::GatewayConfig;

use super::wire::{AddLineRequest, ApiEnvelope, Payload, UpdateLineRequest, decode_envelope};
use super::{CartGateway, GatewayError, GatewayErrorKind, GatewayResult, RemoteIdentity};

/// Longest slice of a response body copied into logs and errors.
const BODY_PREVIEW_CHARS: usize = 200;

/// REST client for the backend cart resource.
#[derive(Clone)]
pub struct HttpCartGateway {
    inner: Arc<HttpCartGatewayInner>,
}

struct HttpCartGatewayInner {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpCartGateway {
    /// Create a new gateway.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client fails to build.
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            inner: Arc::new(HttpCartGatewayInner {
                client,
                base_url: config.base_url.clone(),
            }),
        })
    }

    /// Resolve a route below the base URL, percent-encoding each segment.
    fn endpoint(&self, segments: &[&str]) -> GatewayResult<Url> {
        let mut url = self.inner.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| GatewayError::new(GatewayErrorKind::Network, "base URL cannot be a base"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Execute a request and decode the response envelope.
    async fn execute<B: Serialize + Sync>(
        &self,
        identity: &RemoteIdentity,
        method: Method,
        url: Url,
        body: Option<&B>,
    ) -> GatewayResult<Payload> {
        debug_assert!(
            !identity.credential.is_blank(),
            "remote cart call issued without a credential"
        );

        let mut request = self
            .inner
            .client
            .request(method.clone(), url)
            .bearer_auth(identity.credential.expose());
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();

        // Check for rate limiting
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(1);
            return Err(GatewayError::new(
                GatewayErrorKind::RateLimited {
                    retry_after_secs: retry_after,
                },
                "cart backend rate limited the request",
            ));
        }

        // Get response body as text first for better error diagnostics
        let response_text = response.text().await?;
        let preview = || response_text.chars().take(BODY_PREVIEW_CHARS).collect::<String>();

        if !status.is_success() {
            if status.is_server_error() {
                error!(status = %status, %method, body = %preview(), "Cart backend returned server error");
            } else {
                warn!(status = %status, %method, body = %preview(), "Cart backend returned client error");
            }
            return Err(GatewayError::new(
                GatewayErrorKind::Status(status.as_u16()),
                preview(),
            ));
        }

        let envelope: ApiEnvelope = serde_json::from_str(&response_text).map_err(|e| {
            error!(error = %e, body = %preview(), "Failed to parse cart backend response");
            GatewayError::malformed(e.to_string())
        })?;

        decode_envelope(envelope)
    }

    /// Resolve a payload to a full snapshot, fetching when only acknowledged.
    async fn snapshot(&self, identity: &RemoteIdentity, payload: Payload) -> GatewayResult<Cart> {
        match payload {
            Payload::Snapshot(lines) => Ok(identity.snapshot(lines)),
            Payload::Ack => {
                debug!("Mutation acknowledged without snapshot, fetching cart");
                self.fetch(identity).await
            }
        }
    }
}

impl CartGateway for HttpCartGateway {
    #[instrument(skip(self, identity), fields(user_id = %identity.user_id))]
    async fn fetch(&self, identity: &RemoteIdentity) -> GatewayResult<Cart> {
        let url = self.endpoint(&["cart"])?;
        match self.execute::<()>(identity, Method::GET, url, None).await? {
            Payload::Snapshot(lines) => Ok(identity.snapshot(lines)),
            // An empty cart may come back with `data: null`.
            Payload::Ack => Ok(identity.snapshot(Vec::new())),
        }
    }

    #[instrument(skip(self, identity, variant), fields(user_id = %identity.user_id, product_id = %product_id))]
    async fn add(
        &self,
        identity: &RemoteIdentity,
        product_id: &ProductId,
        quantity: u32,
        variant: &Variant,
    ) -> GatewayResult<Cart> {
        let url = self.endpoint(&["cart", "add"])?;
        let body = AddLineRequest::new(product_id, quantity, variant);
        let payload = self.execute(identity, Method::POST, url, Some(&body)).await?;
        self.snapshot(identity, payload).await
    }

    #[instrument(skip(self, identity), fields(user_id = %identity.user_id, line_id = %line_id))]
    async fn set_quantity(
        &self,
        identity: &RemoteIdentity,
        line_id: &LineId,
        quantity: u32,
    ) -> GatewayResult<Cart> {
        let url = self.endpoint(&["cart", "update", line_id.as_str()])?;
        let body = UpdateLineRequest { quantity };
        let payload = self.execute(identity, Method::PUT, url, Some(&body)).await?;
        self.snapshot(identity, payload).await
    }

    #[instrument(skip(self, identity), fields(user_id = %identity.user_id, line_id = %line_id))]
    async fn remove(&self, identity: &RemoteIdentity, line_id: &LineId) -> GatewayResult<Cart> {
        let url = self.endpoint(&["cart", line_id.as_str()])?;
        match self.execute::<()>(identity, Method::DELETE, url, None).await {
            Ok(payload) => self.snapshot(identity, payload).await,
            // Removing an absent line is a no-op.
            Err(err) if err.is_not_found() => {
                debug!("Line already absent on backend");
                self.fetch(identity).await
            }
            Err(err) => Err(err),
        }
    }

    #[instrument(skip(self, identity), fields(user_id = %identity.user_id))]
    async fn clear(&self, identity: &RemoteIdentity) -> GatewayResult<Cart> {
        let url = self.endpoint(&["cart", "clear"])?;
        let payload = self.execute::<()>(identity, Method::DELETE, url, None).await?;
        self.snapshot(identity, payload).await
    }
}
