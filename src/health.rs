use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;
use std::path::Path;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.get_config();
    let uptime_seconds = state.get_uptime_seconds();

    let audio_root_status = audio_root_info(&config.audio.root_dir);
    let system_status = get_system_status(&config, &metrics);

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "service": {
            "name": "voice-relay-backend",
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "metrics": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": if metrics.request_count > 0 {
                metrics.error_count as f64 / metrics.request_count as f64
            } else {
                0.0
            },
            "active_stream_sessions": metrics.active_stream_sessions
        },
        "audio_root": audio_root_status,
        "transcode": {
            "encoder": config.transcode.encoder_path,
            "timeout_secs": config.transcode.timeout_secs
        },
        "system": system_status
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();

    let mut endpoint_stats = Vec::new();
    for (endpoint, metric) in metrics.endpoint_metrics.iter() {
        endpoint_stats.push(json!({
            "endpoint": endpoint,
            "request_count": metric.request_count,
            "error_count": metric.error_count,
            "error_rate": metric.error_rate(),
            "average_duration_ms": metric.average_duration_ms(),
            "total_duration_ms": metric.total_duration_ms
        }));
    }

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "overall": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": if metrics.request_count > 0 {
                metrics.error_count as f64 / metrics.request_count as f64
            } else {
                0.0
            },
            "requests_per_second": if uptime_seconds > 0 {
                metrics.request_count as f64 / uptime_seconds as f64
            } else {
                0.0
            }
        },
        "streaming": {
            "active_sessions": metrics.active_stream_sessions,
            "sessions_total": metrics.stream_sessions_total,
            "bytes_streamed": metrics.bytes_streamed,
            "chunks_streamed": metrics.chunks_streamed,
            "max_concurrent_sessions": state.get_config().performance.max_concurrent_sessions
        },
        "endpoints": endpoint_stats
    }))
}

/// Report whether the audio root exists and how many files it holds.
/// A missing root is not fatal - sessions will reject with
/// resource-not-found - but it is the first thing to check when playback
/// requests start failing.
fn audio_root_info(root_dir: &str) -> serde_json::Value {
    let root = Path::new(root_dir);

    match std::fs::read_dir(root) {
        Ok(entries) => {
            let file_count = entries
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.path().is_file())
                .count();

            json!({
                "path": root_dir,
                "available": true,
                "file_count": file_count
            })
        }
        Err(err) => json!({
            "path": root_dir,
            "available": false,
            "error": err.to_string()
        }),
    }
}

fn get_system_status(
    config: &crate::config::AppConfig,
    metrics: &crate::state::AppMetrics,
) -> serde_json::Value {
    let session_usage = if config.performance.max_concurrent_sessions > 0 {
        metrics.active_stream_sessions as f64 / config.performance.max_concurrent_sessions as f64
    } else {
        0.0
    };

    let status = if session_usage > 0.9 {
        "high_load"
    } else if session_usage > 0.7 {
        "moderate_load"
    } else {
        "normal"
    };

    json!({
        "status": status,
        "session_usage_percent": (session_usage * 100.0).round(),
        "max_sessions": config.performance.max_concurrent_sessions,
        "current_sessions": metrics.active_stream_sessions
    })
}
