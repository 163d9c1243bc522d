use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
static OBS_INIT: OnceLock<()> = OnceLock::new();

/// Install the tracing subscriber and the Prometheus recorder. Safe to call
/// more than once; later calls return the existing recorder handle.
pub fn init_observability() -> PrometheusHandle {
    OBS_INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let fmt_layer = tracing_subscriber::fmt::layer();
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init();
    });

    install_metrics_recorder()
}

/// Serve the Prometheus scrape endpoint on its own listener, separate from
/// the gateway's public surface.
pub async fn serve_metrics(handle: PrometheusHandle, addr: SocketAddr) -> std::io::Result<()> {
    let app = axum::Router::new().route(
        "/metrics",
        axum::routing::get(move || async move { handle.render() }),
    );
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await
}

fn install_metrics_recorder() -> PrometheusHandle {
    if let Some(handle) = METRICS_HANDLE.get() {
        return handle.clone();
    }
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("install metrics recorder");
    let _ = METRICS_HANDLE.set(handle.clone());
    handle
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent_and_records_metrics() {
        let first = init_observability();
        let second = init_observability();
        metrics::counter!("observability_test_counter").increment(1);
        // Both handles render from the same recorder.
        assert!(first.render().contains("observability_test_counter"));
        assert!(second.render().contains("observability_test_counter"));
    }
}
