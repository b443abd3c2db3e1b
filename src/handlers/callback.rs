//! # Voice Event Callback Sink
//!
//! `GET|POST /callback` receives call-lifecycle events from the voice
//! platform (the `eventUrl` in our NCCO documents points here). Payloads
//! are logged for observability and acknowledged with `204 No Content`;
//! a malformed body is logged but still acknowledged - the platform
//! retries on error statuses and these events carry nothing we must not
//! lose.

use actix_web::{web, HttpRequest, HttpResponse};
use tracing::{info, warn};

pub async fn callback(req: HttpRequest, body: web::Bytes) -> HttpResponse {
    if req.method() == actix_web::http::Method::POST {
        match serde_json::from_slice::<serde_json::Value>(&body) {
            Ok(payload) => {
                info!(payload = %payload, "Received callback event");
            }
            Err(err) => {
                warn!(error = %err, "Could not parse callback payload as JSON");
            }
        }
    } else {
        info!("Received GET request to /callback");
    }

    HttpResponse::NoContent().finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;
    use actix_web::test::TestRequest;

    #[actix_web::test]
    async fn test_get_is_acknowledged() {
        let req = TestRequest::get().uri("/callback").to_http_request();
        let response = callback(req, web::Bytes::new()).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[actix_web::test]
    async fn test_json_post_is_acknowledged() {
        let req = TestRequest::post().uri("/callback").to_http_request();
        let body = web::Bytes::from_static(br#"{"status": "answered", "uuid": "abc"}"#);
        let response = callback(req, body).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[actix_web::test]
    async fn test_malformed_post_is_still_acknowledged() {
        let req = TestRequest::post().uri("/callback").to_http_request();
        let body = web::Bytes::from_static(b"not json at all");
        let response = callback(req, body).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }
}
