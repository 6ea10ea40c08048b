//! HTTP surface: `/probe` for on-demand probes, `/metrics` for the exporter
//! itself.

use std::{collections::HashMap, sync::Arc, time::Instant};

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;

use crate::{
    configuration::Modules,
    metrics::{exporter_metrics, render_probe},
    prober::Prober,
};

/// Content type of the Prometheus text exposition format.
pub const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Shared state of the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub modules: Arc<Modules>,
    pub prober: Prober,
    /// Process recorder; `/metrics` answers 404 without one.
    pub metrics: Option<PrometheusHandle>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/probe", get(probe))
        .route("/metrics", get(process_metrics))
        .with_state(state)
}

fn bad_request(message: String) -> Response {
    log::warn!("{}", message);
    (StatusCode::BAD_REQUEST, message).into_response()
}

async fn probe(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let Some(module) = params.get("module") else {
        return bad_request("Parameter [module] is missing.".to_string());
    };
    let Some(config) = state.modules.get(module) else {
        return bad_request(format!("Module [{}] is not defined.", module));
    };
    let Some(target) = params.get("target").filter(|t| !t.is_empty()) else {
        return bad_request("Parameter [target] is missing.".to_string());
    };

    let started = Instant::now();
    let stats = state.prober.run(config, target).await;
    exporter_metrics::record_probe(module, stats.success);
    exporter_metrics::record_probe_duration(module, started.elapsed());
    log::debug!(
        "probe of [{}] with module [{}] finished in {:?}",
        target,
        module,
        started.elapsed()
    );

    (
        [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
        render_probe(&stats),
    )
        .into_response()
}

async fn process_metrics(State(state): State<AppState>) -> Response {
    match state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        configuration::ProbeConfiguration,
        resolver::{IpVersion, NameLookup, TargetResolver},
        session::{Connection, SessionError, Transport},
    };
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use std::{
        io,
        net::{IpAddr, SocketAddr},
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };
    use tower::ServiceExt;

    struct NoLookup;

    #[async_trait]
    impl NameLookup for NoLookup {
        async fn lookup(&self, host: &str, _family: Option<IpVersion>) -> io::Result<Vec<IpAddr>> {
            Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} not found", host),
            ))
        }
    }

    #[derive(Default)]
    struct RefusingTransport {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl Transport for RefusingTransport {
        async fn connect(
            &self,
            addr: SocketAddr,
            _timeout: Duration,
        ) -> Result<Box<dyn Connection>, SessionError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(SessionError::ConnectFailed {
                addr,
                reason: "connection refused".to_string(),
            })
        }
    }

    fn build_app(metrics: Option<PrometheusHandle>) -> (Router, Arc<RefusingTransport>) {
        let transport = Arc::new(RefusingTransport::default());
        let mut modules = Modules::new();
        modules.insert("default".to_string(), ProbeConfiguration::default());
        let state = AppState {
            modules: Arc::new(modules),
            prober: Prober::new(TargetResolver::new(Arc::new(NoLookup)), transport.clone()),
            metrics,
        };
        (router(state), transport)
    }

    async fn fetch(app: Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_missing_module() {
        let (app, transport) = build_app(None);
        let (status, body) = fetch(app, "/probe?target=192.0.2.1").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("module"));
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_module() {
        let (app, transport) = build_app(None);
        let (status, body) = fetch(app, "/probe?module=nope&target=192.0.2.1").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "Module [nope] is not defined.");
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_target() {
        let (app, transport) = build_app(None);
        let (status, body) = fetch(app, "/probe?module=default").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("target"));
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_probe_is_ok_with_success_zero() {
        let (app, transport) = build_app(None);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/probe?module=default&target=192.0.2.1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            PROMETHEUS_CONTENT_TYPE
        );
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert!(body.lines().any(|l| l == "probe_success 0"), "{}", body);
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unresolvable_target() {
        let (app, transport) = build_app(None);
        let (status, body) = fetch(app, "/probe?module=default&target=nowhere.invalid").await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.lines().any(|l| l == "probe_success 0"), "{}", body);
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_process_metrics() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let (app, _) = build_app(Some(recorder.handle()));
        let (status, _) = fetch(app, "/metrics").await;
        assert_eq!(status, StatusCode::OK);

        let (app, _) = build_app(None);
        let (status, _) = fetch(app, "/metrics").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
