//! # NCCO Call-Control Documents
//!
//! Builds the Nexmo Call Control Object documents a voice API fetches to
//! decide what to do with an answered call:
//!
//! - `/ncco/talk` - a static text-to-speech action
//! - `/ncco/connect?endpoint=...` - connect the call to a WebSocket, SIP
//!   URI or phone number, with call events delivered to our `/callback`
//!
//! The connect endpoint classifies its target from the string shape alone;
//! anything that is not a `ws(s)://` URI, a `sip:` URI or a phone number is
//! rejected with a 400.

use crate::error::{AppError, AppResult};
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    /// Endpoint string, e.g. ws://, sip:, or a phone number.
    pub endpoint: String,
}

/// The three endpoint shapes a connect action can target.
#[derive(Debug, PartialEq, Eq)]
enum ConnectEndpoint {
    Websocket(String),
    Sip(String),
    Phone(String),
}

fn classify_endpoint(endpoint: &str) -> Option<ConnectEndpoint> {
    if endpoint.starts_with("ws://") || endpoint.starts_with("wss://") {
        return Some(ConnectEndpoint::Websocket(endpoint.to_string()));
    }
    if endpoint.starts_with("sip:") {
        return Some(ConnectEndpoint::Sip(endpoint.to_string()));
    }

    let digits = endpoint.strip_prefix('+').unwrap_or(endpoint);
    if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
        return Some(ConnectEndpoint::Phone(endpoint.to_string()));
    }

    None
}

impl ConnectEndpoint {
    fn to_ncco_value(&self) -> serde_json::Value {
        match self {
            ConnectEndpoint::Websocket(uri) => json!({
                "type": "websocket",
                "uri": uri
            }),
            ConnectEndpoint::Sip(uri) => json!({
                "type": "sip",
                "uri": uri
            }),
            ConnectEndpoint::Phone(number) => json!({
                "type": "phone",
                "number": number
            }),
        }
    }
}

/// `GET /ncco/talk` - sample talk action.
pub async fn ncco_talk() -> HttpResponse {
    let ncco = json!([
        {
            "action": "talk",
            "text": "This is a sample voice relay talk action."
        }
    ]);

    HttpResponse::Ok().json(ncco)
}

/// `GET /ncco/connect?endpoint=...` - connect action with event callback.
pub async fn ncco_connect(
    query: web::Query<ConnectQuery>,
    state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    let endpoint = classify_endpoint(&query.endpoint).ok_or_else(|| {
        AppError::BadRequest(
            "Unsupported or invalid endpoint. Use ws(s)://, sip:, or phone number.".to_string(),
        )
    })?;

    let public_host = state.get_config().server.public_host;
    let event_url = format!("{}/callback", public_host.trim_end_matches('/'));

    let ncco = json!([
        {
            "action": "connect",
            "endpoint": [endpoint.to_ncco_value()],
            "eventUrl": [event_url]
        }
    ]);

    info!(endpoint = %query.endpoint, "Generated NCCO connect document");
    Ok(HttpResponse::Ok().json(ncco))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use actix_web::body::to_bytes;

    #[test]
    fn test_classify_endpoint_shapes() {
        assert_eq!(
            classify_endpoint("wss://relay.example.com/ws/audio"),
            Some(ConnectEndpoint::Websocket(
                "wss://relay.example.com/ws/audio".to_string()
            ))
        );
        assert_eq!(
            classify_endpoint("sip:agent@pbx.example.com"),
            Some(ConnectEndpoint::Sip("sip:agent@pbx.example.com".to_string()))
        );
        assert_eq!(
            classify_endpoint("+15551230000"),
            Some(ConnectEndpoint::Phone("+15551230000".to_string()))
        );
        assert_eq!(
            classify_endpoint("15551230000"),
            Some(ConnectEndpoint::Phone("15551230000".to_string()))
        );

        assert_eq!(classify_endpoint("ftp://example.com"), None);
        assert_eq!(classify_endpoint("+"), None);
        assert_eq!(classify_endpoint("555-ACME"), None);
        assert_eq!(classify_endpoint(""), None);
    }

    #[actix_web::test]
    async fn test_connect_builds_websocket_ncco() {
        let state = web::Data::new(AppState::new(AppConfig::default()));
        let query = web::Query(ConnectQuery {
            endpoint: "ws://relay.example.com/ws/audio".to_string(),
        });

        let response = ncco_connect(query, state).await.unwrap();
        let body = to_bytes(response.into_body()).await.unwrap();
        let doc: serde_json::Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(doc[0]["action"], "connect");
        assert_eq!(doc[0]["endpoint"][0]["type"], "websocket");
        assert_eq!(doc[0]["eventUrl"][0], "http://localhost:8000/callback");
    }

    #[actix_web::test]
    async fn test_connect_rejects_unknown_endpoint() {
        let state = web::Data::new(AppState::new(AppConfig::default()));
        let query = web::Query(ConnectQuery {
            endpoint: "mailto:agent@example.com".to_string(),
        });

        let err = ncco_connect(query, state).await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[actix_web::test]
    async fn test_talk_document() {
        let response = ncco_talk().await;
        let body = to_bytes(response.into_body()).await.unwrap();
        let doc: serde_json::Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(doc[0]["action"], "talk");
        assert!(doc[0]["text"].is_string());
    }
}
