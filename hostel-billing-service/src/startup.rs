//! Application startup and lifecycle management.

use crate::config::BillingConfig;
use crate::grpc::{
    proto::{hostel_billing_service_server::HostelBillingServiceServer, FILE_DESCRIPTOR_SET},
    trace_context_interceptor, BillingComponents, HostelBillingServiceImpl,
};
use crate::services::{
    get_metrics, init_metrics, BikramSambatCalendar, BillingScheduler, Cache, Database,
    EmailSender, GenerationSettings, InMemoryCache, LogEmailSender, QueuedNotifier, RedisCache,
    SmtpEmailSender,
};
use axum::{
    extract::State, http::StatusCode, middleware, response::IntoResponse, routing::get, Json,
    Router,
};
use serde_json::json;
use service_core::error::AppError;
use service_core::middleware::request_id_middleware;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tonic::transport::Server as GrpcServer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

/// State for health check endpoints.
#[derive(Clone)]
struct HealthState {
    db: Arc<Database>,
    cache: Arc<dyn Cache>,
}

/// Health check endpoint for Docker/K8s liveness checks.
async fn health_check(State(state): State<HealthState>) -> impl IntoResponse {
    match state.db.health_check().await {
        Ok(_) => {
            tracing::debug!("Health check passed");
            (
                StatusCode::OK,
                Json(json!({
                    "status": "ok",
                    "service": "hostel-billing-service",
                    "version": env!("CARGO_PKG_VERSION")
                })),
            )
        }
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed - database unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "service": "hostel-billing-service",
                    "error": e.to_string()
                })),
            )
        }
    }
}

/// Readiness check endpoint for K8s readiness checks.
async fn readiness_check(State(state): State<HealthState>) -> impl IntoResponse {
    if let Err(e) = state.db.health_check().await {
        tracing::warn!(error = %e, "Readiness check failed - database unavailable");
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    if let Err(e) = state.cache.health_check().await {
        tracing::warn!(error = %e, "Readiness check failed - cache unavailable");
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    tracing::debug!("Readiness check passed");
    StatusCode::OK
}

/// Metrics endpoint for Prometheus scraping.
async fn metrics_handler() -> impl IntoResponse {
    let metrics = get_metrics();
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        metrics,
    )
}

/// Application container for managing server lifecycle.
pub struct Application {
    http_port: u16,
    grpc_port: u16,
    http_listener: TcpListener,
    grpc_listener: TcpListener,
    config: BillingConfig,
    db: Arc<Database>,
    cache: Arc<dyn Cache>,
    components: BillingComponents,
    notification_worker: JoinHandle<()>,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: BillingConfig) -> Result<Self, AppError> {
        Self::build_internal(config, true).await
    }

    /// Build the application without running migrations.
    pub async fn build_without_migrations(config: BillingConfig) -> Result<Self, AppError> {
        Self::build_internal(config, false).await
    }

    async fn build_internal(config: BillingConfig, run_migrations: bool) -> Result<Self, AppError> {
        init_metrics();

        let db = Database::new(
            &config.database.url,
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            e
        })?;

        if run_migrations {
            db.run_migrations().await.map_err(|e| {
                tracing::error!(error = %e, "Failed to run migrations");
                e
            })?;
        }

        let db = Arc::new(db);

        let cache: Arc<dyn Cache> = match &config.cache.redis_url {
            Some(url) => Arc::new(RedisCache::new(url).await.map_err(|e| {
                tracing::error!(error = %e, "Failed to connect to Redis");
                AppError::InternalError(e)
            })?),
            None => {
                tracing::info!("REDIS_URL not set, using in-process rule cache");
                Arc::new(InMemoryCache::new())
            }
        };

        let email: Arc<dyn EmailSender> = match &config.smtp.host {
            Some(host) => Arc::new(
                SmtpEmailSender::new(&config.smtp, host).map_err(AppError::ConfigError)?,
            ),
            None => {
                tracing::info!("SMTP_HOST not set, notifications will be logged only");
                Arc::new(LogEmailSender)
            }
        };
        let (notifier, notification_worker) =
            QueuedNotifier::start(config.notifications.queue_capacity, email);

        let components = BillingComponents::assemble(
            db.clone(),
            cache.clone(),
            Arc::new(BikramSambatCalendar::new()),
            Arc::new(notifier),
            Duration::from_secs(config.cache.rule_ttl_secs),
            GenerationSettings {
                chunk_size: config.generation.chunk_size,
                due_days: config.generation.due_days,
            },
        );

        // A shared cache can outlive this process; rules may have changed meanwhile.
        if let Err(e) = components.staff_deductions.clear_rule_cache().await {
            tracing::warn!(error = %e, "Failed to clear rule cache at startup");
        }

        let http_addr = config.common.http_addr();
        let http_listener = TcpListener::bind(http_addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %http_addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let http_port = http_listener.local_addr()?.port();

        let grpc_addr = config.common.grpc_addr();
        let grpc_listener = TcpListener::bind(grpc_addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %grpc_addr, "Failed to bind gRPC listener");
            AppError::from(e)
        })?;
        let grpc_port = grpc_listener.local_addr()?.port();

        tracing::info!(
            http_port = http_port,
            grpc_port = grpc_port,
            "Hostel billing service listeners bound"
        );

        Ok(Self {
            http_port,
            grpc_port,
            http_listener,
            grpc_listener,
            config,
            db,
            cache,
            components,
            notification_worker,
        })
    }

    /// Get the HTTP port the server is listening on.
    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    /// Get the gRPC port the server is listening on.
    pub fn grpc_port(&self) -> u16 {
        self.grpc_port
    }

    /// Get a reference to the database.
    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let health_state = HealthState {
            db: self.db.clone(),
            cache: self.cache.clone(),
        };

        let http_router = Router::new()
            .route("/health", get(health_check))
            .route("/ready", get(readiness_check))
            .route("/metrics", get(metrics_handler))
            .layer(TraceLayer::new_for_http())
            .layer(middleware::from_fn(request_id_middleware))
            .with_state(health_state);

        let scheduler = if self.config.scheduler.enabled {
            Some(
                BillingScheduler::new(
                    self.components.staff_generation.clone(),
                    self.components.student_generation.clone(),
                    self.components.calendar.clone(),
                    Duration::from_secs(self.config.scheduler.interval_secs),
                )
                .spawn(),
            )
        } else {
            tracing::info!("In-process billing scheduler disabled");
            None
        };

        let billing_service = HostelBillingServiceImpl::new(self.components);

        // gRPC health service
        let (mut health_reporter, grpc_health_service) = tonic_health::server::health_reporter();
        health_reporter
            .set_serving::<HostelBillingServiceServer<HostelBillingServiceImpl>>()
            .await;

        // Reflection service for debugging
        let reflection_service = tonic_reflection::server::Builder::configure()
            .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
            .build_v1()
            .map_err(|e| {
                std::io::Error::other(format!("Failed to build reflection service: {}", e))
            })?;

        let grpc_trace_layer = TraceLayer::new_for_grpc()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::DEBUG));

        let billing_service_with_interceptor =
            HostelBillingServiceServer::with_interceptor(billing_service, trace_context_interceptor);

        let incoming = tokio_stream::wrappers::TcpListenerStream::new(self.grpc_listener);
        let grpc_server = GrpcServer::builder()
            .layer(grpc_trace_layer)
            .add_service(grpc_health_service)
            .add_service(reflection_service)
            .add_service(billing_service_with_interceptor)
            .serve_with_incoming(incoming);

        tracing::info!(
            service = "hostel-billing-service",
            version = env!("CARGO_PKG_VERSION"),
            http_port = self.http_port,
            grpc_port = self.grpc_port,
            "Service ready to accept connections"
        );

        let result = tokio::select! {
            result = axum::serve(self.http_listener, http_router) => {
                result.map_err(|e| {
                    tracing::error!(error = %e, "HTTP server error");
                    std::io::Error::other(format!("HTTP server error: {}", e))
                })
            }
            result = grpc_server => {
                result.map_err(|e| {
                    tracing::error!(error = %e, "gRPC server error");
                    std::io::Error::other(format!("gRPC server error: {}", e))
                })
            }
        };

        if let Some(scheduler) = scheduler {
            scheduler.abort();
        }
        self.notification_worker.abort();

        result
    }
}
