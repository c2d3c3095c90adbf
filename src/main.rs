use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use privsense::config::Config;
use privsense::services::{
    ConnectionRegistry, DetectionPipeline, DetectionStrategy, HeuristicStrategy, MySQLPoolManager,
    NerStrategy, NotificationSink, QuasiIdentifierAnalyzer, RegexStrategy, Sampler,
    ScanOrchestrator, ScanStore,
};
use privsense::utils::ScheduledExecutor;
use privsense::{AppState, db, handlers, models};

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::connection::register_connection,
        handlers::connection::list_connections,
        handlers::connection::get_connection,
        handlers::connection::unregister_connection,
        handlers::connection::test_connection,

        handlers::scan::submit_scan,
        handlers::scan::get_scan_status,
        handlers::scan::list_scans,
        handlers::scan::cancel_scan,
        handlers::scan::get_scan_report,
    ),
    components(
        schemas(
            models::ConnectionResponse,
            models::CreateConnectionRequest,
            models::DriverKind,
            models::ScanRequest,
            models::ScanJobStatus,
            models::ScanStatus,
            models::SamplingConfig,
            models::SamplingMethod,
            models::DetectionConfig,
            models::QuasiIdentifierConfig,
            models::ClusteringAlgorithm,
            models::PiiType,
            models::DetectionMethod,
            models::SampleStatus,
            models::ColumnRef,
            models::PiiCandidate,
            models::DetectionResult,
            models::QuasiIdentifierGroup,
            models::ComplianceReport,
            models::ScanSummary,
            models::DatabaseInfo,
            models::ScanStatusEvent,
        )
    ),
    tags(
        (name = "Connections", description = "Target database connection management"),
        (name = "Scans", description = "Scan job submission, status, and reports"),
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let config = Config::load()?;

    let log_filter = tracing_subscriber::EnvFilter::new(&config.logging.level);

    let registry = tracing_subscriber::registry().with(log_filter);

    let _log_guard = if let Some(log_file) = &config.logging.file {
        let log_path = std::path::Path::new(log_file);
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        let log_dir = log_path.parent().and_then(|p| p.to_str()).unwrap_or("logs");
        let file_name = log_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("privsense.log");
        let file_prefix = file_name.strip_suffix(".log").unwrap_or(file_name);

        let file_appender = tracing_appender::rolling::daily(log_dir, file_prefix);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(non_blocking))
            .with(tracing_subscriber::fmt::layer())
            .init();
        Some(guard)
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
        None
    };

    tracing::info!("PrivSense starting up");

    let pool = db::create_pool(&config.database.url).await?;

    let mysql_pool_manager = Arc::new(MySQLPoolManager::new());
    let connection_registry = Arc::new(ConnectionRegistry::new(
        pool.clone(),
        Arc::clone(&mysql_pool_manager),
        config.scanner.max_handles_per_connection,
        config.scanner.handle_acquire_timeout(),
    ));

    let notification_sink = Arc::new(NotificationSink::default());
    let scan_store = Arc::new(ScanStore::new(pool.clone()));
    let sampler = Arc::new(Sampler::new(config.scanner.query_timeout()));

    let ner_strategy = Arc::new(NerStrategy::new(config.ner.clone()));
    if config.ner.enabled {
        // Startup probe gates the strategy; the scheduled probe keeps the
        // verdict current afterwards
        if ner_strategy.health_probe().await {
            tracing::info!("NER sidecar reachable at {}", config.ner.base_url);
        } else {
            tracing::warn!(
                "NER sidecar unhealthy at startup, strategy disabled until a probe succeeds"
            );
        }

        let executor = ScheduledExecutor::new(
            "ner-health-probe",
            Duration::from_secs(config.ner.health_probe_interval_secs),
        );
        let probe_strategy = Arc::clone(&ner_strategy);
        tokio::spawn(executor.start(move || {
            let strategy = Arc::clone(&probe_strategy);
            async move {
                strategy.health_probe().await;
                Ok::<(), anyhow::Error>(())
            }
        }));
    }

    let mut strategies: Vec<Arc<dyn DetectionStrategy>> =
        vec![Arc::new(HeuristicStrategy::new()), Arc::new(RegexStrategy::new())];
    if config.ner.enabled {
        strategies.push(ner_strategy);
    }
    let pipeline = Arc::new(DetectionPipeline::new(strategies));

    let orchestrator = Arc::new(ScanOrchestrator::new(
        Arc::clone(&scan_store),
        Arc::clone(&connection_registry),
        sampler,
        pipeline,
        Arc::new(QuasiIdentifierAnalyzer::new()),
        Arc::clone(&notification_sink),
        config.scanner.clone(),
    ));

    let state = Arc::new(AppState {
        db: pool,
        registry: connection_registry,
        orchestrator,
        notification_sink,
    });

    let app = Router::new()
        .route(
            "/api/connections",
            post(handlers::connection::register_connection)
                .get(handlers::connection::list_connections),
        )
        .route(
            "/api/connections/:id",
            get(handlers::connection::get_connection)
                .delete(handlers::connection::unregister_connection),
        )
        .route("/api/connections/:id/test", post(handlers::connection::test_connection))
        .route("/api/scans", post(handlers::scan::submit_scan).get(handlers::scan::list_scans))
        .route("/api/scans/:id", get(handlers::scan::get_scan_status))
        .route("/api/scans/:id/cancel", post(handlers::scan::cancel_scan))
        .route("/api/scans/:id/report", get(handlers::scan::get_scan_report))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("PrivSense listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
