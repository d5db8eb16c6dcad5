use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Serialize;
use serde_json::Value;
use slawatch_agent::InboundAck;
use slawatch_core::errors::{ApplicationError, DomainError};
use slawatch_core::signature::{self, SIGNATURE_HEADER};
use tracing::{info, warn};
use uuid::Uuid;

use crate::http::{reject, ApiRejection, HttpState};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WebhookResponse {
    pub status: &'static str,
    pub correlation_id: String,
}

/// Entry point for pushed ticketing events. The body must be a JSON
/// object; when a webhook secret is configured the raw body must carry a
/// valid `x-slawatch-signature`.
pub async fn receive_event(
    State(state): State<HttpState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<WebhookResponse>), ApiRejection> {
    let correlation_id = format!("webhook-{}", Uuid::new_v4().simple());
    let fail = |error: ApplicationError| {
        warn!(
            event_name = "http.webhook.rejected",
            correlation_id = %correlation_id,
            error = %error,
            "inbound webhook rejected"
        );
        reject(error.into_interface(correlation_id.clone()))
    };

    if let Some(secret) = state.webhook_secret.as_ref() {
        let header = headers.get(SIGNATURE_HEADER).and_then(|value| value.to_str().ok());
        signature::verify(secret, &body, header).map_err(|error| fail(error.into()))?;
    }

    let payload = match serde_json::from_slice::<Value>(&body) {
        Ok(Value::Object(map)) => map,
        Ok(_) => {
            return Err(fail(
                DomainError::InvalidEvent("webhook body must be a JSON object".to_string()).into(),
            ))
        }
        Err(error) => {
            return Err(fail(DomainError::InvalidEvent(format!("malformed JSON: {error}")).into()))
        }
    };

    if !state.ingestion.is_running() {
        return Err(fail(ApplicationError::Unavailable(
            "event ingestion agent is not running".to_string(),
        )));
    }

    let status = match state.ingestion.agent().on_inbound_event(payload) {
        InboundAck::Accepted => "received",
        InboundAck::Duplicate => "duplicate",
        InboundAck::BufferFull => {
            return Err(fail(ApplicationError::Unavailable("event buffer is full".to_string())))
        }
    };

    info!(
        event_name = "http.webhook.accepted",
        correlation_id = %correlation_id,
        status,
        "inbound webhook accepted"
    );
    Ok((StatusCode::OK, Json(WebhookResponse { status, correlation_id })))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::{
        body::{to_bytes, Body, Bytes},
        extract::State,
        http::{HeaderMap, HeaderValue, Request, StatusCode},
    };
    use secrecy::SecretString;
    use serde_json::{json, Value};
    use slawatch_core::signature::{sign, SIGNATURE_HEADER};
    use tower::ServiceExt;

    use super::receive_event;
    use crate::http::tests::app;
    use crate::http::{router, HttpState};

    fn event(id: &str) -> Bytes {
        Bytes::from(
            json!({
                "id": id,
                "event_type": "ticket_created",
                "ticket_id": "T-100",
                "priority": "low",
                "status": "open",
                "created_at": chrono::Utc::now().to_rfc3339(),
            })
            .to_string(),
        )
    }

    #[tokio::test]
    async fn first_delivery_is_received_and_redelivery_is_duplicate() {
        let app = app(None).await;
        let state = HttpState::from_app(&app);

        let (status, axum::Json(first)) =
            receive_event(State(state.clone()), HeaderMap::new(), event("evt-1"))
                .await
                .expect("ok");
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first.status, "received");

        let (_, axum::Json(second)) =
            receive_event(State(state), HeaderMap::new(), event("evt-1")).await.expect("ok");
        assert_eq!(second.status, "duplicate");

        for _ in 0..100 {
            if app.ingestion.agent().monitored_ticket("T-100").is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(app.ingestion.agent().monitored_ticket("T-100").is_some());
        app.shutdown().await;
    }

    #[tokio::test]
    async fn non_object_body_is_a_bad_request() {
        let app = app(None).await;

        let (status, axum::Json(error)) =
            receive_event(State(HttpState::from_app(&app)), HeaderMap::new(), Bytes::from("[1,2]"))
                .await
                .expect_err("rejected");

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(error.detail.contains("JSON object"));
        assert!(error.correlation_id.starts_with("webhook-"));
        app.shutdown().await;
    }

    #[tokio::test]
    async fn stopped_ingestion_returns_service_unavailable() {
        let app = app(None).await;
        app.ingestion.stop().await;

        let (status, _) =
            receive_event(State(HttpState::from_app(&app)), HeaderMap::new(), event("evt-2"))
                .await
                .expect_err("rejected");

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        app.shutdown().await;
    }

    #[tokio::test]
    async fn signed_webhooks_require_a_matching_signature() {
        let app = app(Some("whsec-test")).await;
        let state = HttpState::from_app(&app);

        let (status, _) = receive_event(State(state.clone()), HeaderMap::new(), event("evt-3"))
            .await
            .expect_err("missing signature");
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let body = event("evt-3");
        let header = sign(&SecretString::from("whsec-test".to_string()), &body).expect("sign");
        let mut headers = HeaderMap::new();
        headers.insert(SIGNATURE_HEADER, HeaderValue::from_str(&header).expect("header value"));

        let (status, axum::Json(accepted)) =
            receive_event(State(state), headers, body).await.expect("signed body accepted");
        assert_eq!(status, StatusCode::OK);
        assert_eq!(accepted.status, "received");
        app.shutdown().await;
    }

    #[tokio::test]
    async fn router_accepts_webhook_posts() {
        let app = app(None).await;

        let response = router(HttpState::from_app(&app))
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhook/events")
                    .header("content-type", "application/json")
                    .body(Body::from(event("evt-4")))
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let payload: Value = serde_json::from_slice(&bytes).expect("json");
        assert_eq!(payload["status"], json!("received"));
        app.shutdown().await;
    }
}
