use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;
use std::process;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = &state.config;

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "relay": {
            "active_connections": metrics.active_connections,
            "total": metrics.relay.total,
            "succeeded": metrics.relay.succeeded,
            "failed": metrics.relay.failed,
            "rejected": metrics.relay.rejected
        },
        "upstream": {
            "endpoint": config.transcription.endpoint_url,
            "credential_configured": !config.transcription.api_key.is_empty()
        },
        "memory": get_memory_info()
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();

    let mut endpoint_stats: Vec<_> = metrics
        .endpoint_metrics
        .iter()
        .map(|(endpoint, metric)| {
            json!({
                "endpoint": endpoint,
                "request_count": metric.request_count,
                "error_count": metric.error_count,
                "error_rate": metric.error_rate(),
                "average_duration_ms": metric.average_duration_ms(),
                "total_duration_ms": metric.total_duration_ms
            })
        })
        .collect();
    endpoint_stats.sort_by(|a, b| a["endpoint"].as_str().cmp(&b["endpoint"].as_str()));

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "http": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": if metrics.request_count > 0 {
                metrics.error_count as f64 / metrics.request_count as f64
            } else {
                0.0
            },
            "endpoints": endpoint_stats
        },
        "relay": {
            "active_connections": metrics.active_connections,
            "total": metrics.relay.total,
            "succeeded": metrics.relay.succeeded,
            "failed": metrics.relay.failed,
            "rejected": metrics.relay.rejected,
            "failure_rate": metrics.relay.failure_rate(),
            "average_duration_ms": metrics.relay.average_duration_ms(),
            "total_bytes": metrics.relay.total_bytes,
            "relays_per_second": if uptime_seconds > 0 {
                metrics.relay.total as f64 / uptime_seconds as f64
            } else {
                0.0
            }
        },
        "memory": get_memory_info()
    }))
}

fn get_memory_info() -> serde_json::Value {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", process::id())) {
            let field_bytes = |name: &str| {
                status
                    .lines()
                    .find(|line| line.starts_with(name))
                    .and_then(|line| line.split_whitespace().nth(1))
                    .and_then(|kb| kb.parse::<u64>().ok())
                    .map(|kb| kb * 1024)
                    .unwrap_or(0)
            };

            return json!({
                "resident_memory_bytes": field_bytes("VmRSS:"),
                "virtual_memory_bytes": field_bytes("VmSize:"),
                "available": true
            });
        }
    }

    json!({
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false,
        "note": format!("Memory info not available for pid {}", process::id())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::{test_state, LengthTranscriber};
    use actix_web::{test, App};
    use std::sync::Arc;
    use std::time::Duration;

    #[actix_web::test]
    async fn test_health_reports_relay_counters() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(Arc::new(LengthTranscriber), dir.path());
        state.record_relay(10, Duration::from_millis(5), true);

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/health", web::get().to(health_check)),
        )
        .await;

        let body: serde_json::Value =
            test::call_and_read_body_json(&app, test::TestRequest::get().uri("/health").to_request()).await;

        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"]["name"], env!("CARGO_PKG_NAME"));
        assert_eq!(body["relay"]["succeeded"], 1);
        assert_eq!(body["upstream"]["credential_configured"], true);
        // The credential itself never appears
        assert!(!body.to_string().contains("test-key"));
    }

    #[actix_web::test]
    async fn test_metrics_include_relay_section() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(Arc::new(LengthTranscriber), dir.path());
        state.record_relay(10, Duration::from_millis(8), false);

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/metrics", web::get().to(detailed_metrics)),
        )
        .await;

        let body: serde_json::Value =
            test::call_and_read_body_json(&app, test::TestRequest::get().uri("/metrics").to_request()).await;

        assert_eq!(body["relay"]["failed"], 1);
        assert_eq!(body["relay"]["failure_rate"], 1.0);
    }
}
