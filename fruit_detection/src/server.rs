use crate::{
    config::{Config, ServerConfig},
    error::{DetectionError, StartupError},
    inference_service::InferenceService,
    labels::ClassLabels,
    model_service::ModelService,
    ort_service::OrtModelService,
    routes::api_routes,
    state::ServiceLifecycle,
    telemetry::Metrics,
};
use axum::{extract::DefaultBodyLimit, Router};
use axum_otel_metrics::HttpMetricsLayerBuilder;
use fruit_schema::DetectionResponse;
use std::{sync::Arc, time::Instant};
use tokio::{net::TcpListener, signal};

pub struct SharedState<M: ModelService> {
    pub inference: InferenceService<M>,
    pub metrics: Arc<Metrics>,
}

impl<M: ModelService> Clone for SharedState<M> {
    fn clone(&self) -> Self {
        Self {
            inference: self.inference.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

impl<M: ModelService> SharedState<M> {
    pub fn new(inference: InferenceService<M>, metrics: Arc<Metrics>) -> Self {
        Self { inference, metrics }
    }

    pub(crate) fn record(
        &self,
        route: &str,
        started: Instant,
        result: &Result<DetectionResponse, DetectionError>,
    ) {
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(response) => {
                self.metrics.record_request(route, "ok");
                self.metrics.record_fruits(response.total_fruits);
                tracing::info!(
                    route,
                    total_fruits = response.total_fruits,
                    elapsed_ms,
                    "Detection completed"
                );
            }
            Err(e) => self.metrics.record_request(route, e.kind()),
        }
        self.metrics.record_request_duration(elapsed_ms, route);
    }
}

pub fn build_router<M: ModelService>(state: SharedState<M>, max_upload_bytes: usize) -> Router {
    Router::new()
        .merge(api_routes())
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(HttpMetricsLayerBuilder::new().build())
}

pub struct HttpServer {
    router: Router,
    listener: TcpListener,
}

impl HttpServer {
    pub async fn new<M: ModelService>(
        state: SharedState<M>,
        config: &ServerConfig,
    ) -> Result<Self, StartupError> {
        let addr = config.get_address();
        let router = build_router(state, config.max_upload_bytes);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| StartupError::Bind { addr, source })?;

        Ok(Self { router, listener })
    }

    pub async fn run(self) -> std::io::Result<()> {
        if let Ok(addr) = self.listener.local_addr() {
            tracing::info!("Fruit detection service listening on {}", addr);
        }

        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async {
                shutdown_signal().await;
                tracing::info!("Shutdown signal received, starting graceful shutdown")
            })
            .await
    }
}

/// Loads labels and weights, then serves until a shutdown signal arrives.
/// Nothing is bound before the model is ready.
pub async fn start_server(config: Config) -> Result<(), StartupError> {
    let labels = ClassLabels::from_file(&config.model.get_labels_path())?;
    tracing::info!("Loaded {} class labels", labels.len());

    let lifecycle = Arc::new(ServiceLifecycle::new());
    let loader = lifecycle.clone();
    let model_config = config.model.clone();
    let model = tokio::task::spawn_blocking(move || {
        loader.load_with(|| OrtModelService::new(&model_config, labels))
    })
    .await
    .map_err(|e| StartupError::ModelLoad(format!("loader task failed: {}", e)))??;
    tracing::info!(device = model.device().as_str(), "Model loaded");

    let metrics = Arc::new(Metrics::new().map_err(StartupError::Telemetry)?);
    let inference = InferenceService::new(lifecycle, config.server.max_upload_bytes)?;
    let server = HttpServer::new(SharedState::new(inference, metrics), &config.server).await?;

    server.run().await.map_err(StartupError::Serve)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
