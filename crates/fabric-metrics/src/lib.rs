//! ---
//! fabric_section: "03-logging"
//! fabric_subsection: "module"
//! fabric_type: "source"
//! fabric_scope: "code"
//! fabric_description: "Metrics registry and Prometheus exporter."
//! fabric_version: "v0.0.0-prealpha"
//! fabric_owner: "tbd"
//! ---
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, StatusCode};
use axum::routing::get;
use axum::{response::IntoResponse, Router};
use prometheus::{
    GaugeVec, Histogram, HistogramOpts, IntCounter, IntGauge, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared registry type used across services.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Spawn an HTTP server that exposes the registry at `/metrics`.
pub fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let app = Router::new().route(
        "/metrics",
        get({
            let registry = registry.clone();
            move || metrics_handler(registry.clone())
        }),
    );

    let std_listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener {}", addr))?;
    std_listener
        .set_nonblocking(true)
        .with_context(|| "failed to configure metrics listener as non-blocking")?;
    let bound = std_listener
        .local_addr()
        .with_context(|| "failed to read metrics listener address")?;
    let listener = TcpListener::from_std(std_listener)
        .with_context(|| "failed to convert std listener into tokio listener")?;

    info!(address = %bound, "metrics server starting");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics server encountered an error")?;
        Ok(())
    });

    Ok(MetricsServer {
        addr: bound,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

async fn metrics_handler(registry: SharedRegistry) -> impl IntoResponse {
    let families = registry.gather();
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&families) {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(prometheus::TEXT_FORMAT),
            )],
            body,
        ),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"))],
                String::from("metrics encoding error"),
            )
        }
    }
}

/// Handle to the running HTTP exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    /// Address the exporter actually bound (resolves port `0`).
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and await task completion.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(result) => result,
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}

/// Metrics recorded by the daemon process itself.
#[derive(Clone)]
pub struct DaemonMetrics {
    registry: SharedRegistry,
    starts_total: IntCounter,
    config_load_seconds: Histogram,
    build_info: GaugeVec,
}

impl DaemonMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let starts_total = IntCounter::with_opts(Opts::new(
            "fabricd_starts_total",
            "Total number of times the fabric daemon has initialised",
        ))?;
        registry.register(Box::new(starts_total.clone()))?;

        let buckets = prometheus::exponential_buckets(0.001, 2.0, 16)
            .context("failed to construct histogram buckets")?;
        let config_load_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "fabricd_config_load_seconds",
                "Time spent loading and validating configuration",
            )
            .buckets(buckets),
        )?;
        registry.register(Box::new(config_load_seconds.clone()))?;

        let build_info = GaugeVec::new(
            Opts::new("fabricd_build_info", "Version and mode of the running daemon"),
            &["version", "mode"],
        )?;
        registry.register(Box::new(build_info.clone()))?;

        Ok(Self {
            registry,
            starts_total,
            config_load_seconds,
            build_info,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn inc_start(&self) {
        self.starts_total.inc();
    }

    pub fn observe_config_load(&self, seconds: f64) {
        self.config_load_seconds.observe(seconds);
    }

    pub fn set_build_info(&self, version: &str, mode: &str) {
        self.build_info.with_label_values(&[version, mode]).set(1.0);
    }
}

/// Point-in-time fabric gauges maintained by the runtime.
#[derive(Clone, Debug)]
pub struct FabricMetrics {
    registry: SharedRegistry,
    elements_total: IntGauge,
    element_healthy: IntGaugeVec,
    domain_fail_static: IntGaugeVec,
}

impl FabricMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let elements_total = IntGauge::with_opts(Opts::new(
            "fabric_elements_total",
            "Number of elements under health monitoring",
        ))?;
        registry.register(Box::new(elements_total.clone()))?;

        let element_healthy = IntGaugeVec::new(
            Opts::new(
                "fabric_element_healthy",
                "Indicator (0/1) whether an element is currently healthy",
            ),
            &["element", "role"],
        )?;
        registry.register(Box::new(element_healthy.clone()))?;

        let domain_fail_static = IntGaugeVec::new(
            Opts::new(
                "fabric_domain_fail_static",
                "Indicator (0/1) whether a protection domain is frozen in fail-static",
            ),
            &["domain"],
        )?;
        registry.register(Box::new(domain_fail_static.clone()))?;

        Ok(Self {
            registry,
            elements_total,
            element_healthy,
            domain_fail_static,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn set_element_count(&self, count: usize) {
        self.elements_total.set(count as i64);
    }

    pub fn set_element_healthy(&self, element: &str, role: &str, healthy: bool) {
        self.element_healthy
            .with_label_values(&[element, role])
            .set(i64::from(healthy));
    }

    pub fn set_domain_fail_static(&self, domain: &str, fail_static: bool) {
        self.domain_fail_static
            .with_label_values(&[domain])
            .set(i64::from(fail_static));
    }
}

pub use prometheus;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fabric_gauges_are_registered() {
        let registry = new_registry();
        let metrics = FabricMetrics::new(registry.clone()).unwrap();
        metrics.set_element_count(4);
        metrics.set_element_healthy("spine1", "spine", false);
        metrics.set_domain_fail_static("spines", true);

        let names: Vec<String> = registry
            .gather()
            .iter()
            .map(|family| family.get_name().to_owned())
            .collect();
        assert!(names.contains(&"fabric_elements_total".to_owned()));
        assert!(names.contains(&"fabric_element_healthy".to_owned()));
        assert!(names.contains(&"fabric_domain_fail_static".to_owned()));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let registry = new_registry();
        DaemonMetrics::new(registry.clone()).unwrap();
        assert!(DaemonMetrics::new(registry).is_err());
    }

    #[tokio::test]
    async fn exporter_serves_registry() {
        let registry = new_registry();
        let daemon = DaemonMetrics::new(registry.clone()).unwrap();
        daemon.inc_start();

        let server = spawn_http_server(registry, "127.0.0.1:0".parse().unwrap()).unwrap();
        let response = reqwest::get(format!("http://{}/metrics", server.addr()))
            .await
            .unwrap();
        assert_eq!(
            response.headers()[reqwest::header::CONTENT_TYPE],
            prometheus::TEXT_FORMAT
        );
        let body = response.text().await.unwrap();
        assert!(body.contains("fabricd_starts_total 1"));
        server.shutdown().await.unwrap();
    }
}
