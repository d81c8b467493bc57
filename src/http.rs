use crate::collector::XenCollector;
use crate::hypervisor::Connector;
use crate::metrics::Metrics;
use axum::body::Body;
use axum::extract::State;
use axum::http::{header::CONTENT_TYPE, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Json, Router};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

pub struct HttpAppState<C: Connector> {
    pub metrics: Arc<Metrics>,
    pub collector: XenCollector<C>,
    pub scrape_timeout: Duration,
    gather_in_flight: Arc<AtomicBool>,
}

impl<C: Connector> Clone for HttpAppState<C> {
    fn clone(&self) -> Self {
        Self {
            metrics: self.metrics.clone(),
            collector: self.collector.clone(),
            scrape_timeout: self.scrape_timeout,
            gather_in_flight: self.gather_in_flight.clone(),
        }
    }
}

pub fn build_router<C: Connector>(
    metrics: Arc<Metrics>,
    collector: XenCollector<C>,
    scrape_timeout: Duration,
) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_handler::<C>))
        .route("/api/domains", get(domains_handler::<C>))
        .with_state(HttpAppState {
            metrics,
            collector,
            scrape_timeout,
            gather_in_flight: Arc::new(AtomicBool::new(false)),
        })
}

pub async fn bind(address: &str) -> io::Result<TcpListener> {
    let listener = TcpListener::bind(address).await?;
    info!(listen = %listener.local_addr()?, "HTTP-сервер слушает");
    Ok(listener)
}

// Clears the in-flight flag once the blocking gather ends, even after a timeout.
struct GatherSlot(Arc<AtomicBool>);

impl GatherSlot {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag.clone()))
    }
}

impl Drop for GatherSlot {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn metrics_handler<C: Connector>(State(state): State<HttpAppState<C>>) -> Response {
    state.metrics.inc_scrape_count();

    let Some(slot) = GatherSlot::acquire(&state.gather_in_flight) else {
        warn!("предыдущий опрос гипервизора ещё не завершён, отдаём только метрики экспортёра");
        return encoded_response(state.metrics.encode_exporter_metrics());
    };

    let metrics = state.metrics.clone();
    let gather = tokio::task::spawn_blocking(move || {
        let _slot = slot;
        metrics.encode_metrics()
    });
    let encoded = match tokio::time::timeout(state.scrape_timeout, gather).await {
        Ok(Ok(result)) => result,
        Ok(Err(err)) => {
            error!(error = %err, "сбор метрик завершился аварийно");
            state.metrics.encode_exporter_metrics()
        }
        Err(_elapsed) => {
            warn!(
                timeout_secs = state.scrape_timeout.as_secs_f64(),
                "опрос гипервизора не уложился в таймаут, отдаём только метрики экспортёра"
            );
            state.metrics.encode_exporter_metrics()
        }
    };

    encoded_response(encoded)
}

fn encoded_response(encoded: Result<Vec<u8>, prometheus::Error>) -> Response {
    match encoded {
        Ok(encoded) => {
            let mut response = Response::new(Body::from(encoded));
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            response
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("ошибка кодирования метрик: {err}"),
        )
            .into_response(),
    }
}

async fn domains_handler<C: Connector>(State(state): State<HttpAppState<C>>) -> Response {
    let collector = state.collector.clone();
    match tokio::task::spawn_blocking(move || collector.snapshot().unwrap_or_default()).await {
        Ok(domains) => Json(domains).into_response(),
        Err(err) => {
            error!(error = %err, "опрос гипервизора завершился аварийно");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("ошибка опроса гипервизора: {err}"),
            )
                .into_response()
        }
    }
}
