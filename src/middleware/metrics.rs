//! Metrics collection middleware.
//!
//! Counts every request, folds per-endpoint duration/error stats into
//! `AppState`, and bumps the global error counter on 4xx/5xx responses.
//! Path parameters are collapsed (`/ws/play/{resource}`) so each playback
//! resource does not become its own endpoint key.

use crate::state::AppState;
use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    web, Error,
};
use futures_util::future::LocalBoxFuture;
use std::{
    future::{ready, Ready},
    time::Instant,
};

pub struct MetricsMiddleware;

impl<S, B> Transform<S, ServiceRequest> for MetricsMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = MetricsMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(MetricsMiddlewareService { service }))
    }
}

pub struct MetricsMiddlewareService<S> {
    service: S,
}

/// Collapse per-resource paths into one endpoint key.
fn endpoint_key(method: &str, path: &str) -> String {
    if path.starts_with("/ws/play/") {
        return format!("{} /ws/play/{{resource}}", method);
    }
    format!("{} {}", method, path)
}

impl<S, B> Service<ServiceRequest> for MetricsMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let start_time = Instant::now();
        let endpoint = endpoint_key(req.method().as_str(), req.uri().path());
        let app_state = req.app_data::<web::Data<AppState>>().cloned();

        if let Some(state) = &app_state {
            state.increment_request_count();
        }

        let fut = self.service.call(req);

        Box::pin(async move {
            let result = fut.await;
            let duration_ms = start_time.elapsed().as_millis() as u64;

            if let Some(state) = &app_state {
                match &result {
                    Ok(response) => {
                        let is_error = response.status().is_client_error()
                            || response.status().is_server_error();
                        if is_error {
                            state.increment_error_count();
                        }
                        state.record_endpoint_request(&endpoint, duration_ms, is_error);
                    }
                    Err(_) => {
                        state.increment_error_count();
                        state.record_endpoint_request(&endpoint, duration_ms, true);
                    }
                }
            }

            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_key_collapses_playback_resources() {
        assert_eq!(
            endpoint_key("GET", "/ws/play/tone-16000.mp3"),
            "GET /ws/play/{resource}"
        );
        assert_eq!(endpoint_key("GET", "/health"), "GET /health");
        assert_eq!(endpoint_key("POST", "/callback"), "POST /callback");
    }
}
