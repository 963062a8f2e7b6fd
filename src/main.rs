use axum::{
    Router,
    routing::{get, post},
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use saguaro::config::Config;
use saguaro::services::supervisor::{CircuitBreakerConfig, DeadLetterQueue, RetryPolicy};
use saguaro::services::{
    CollectorRunner, ErrorSupervisor, ExtractionCache, HttpBrowser, HttpCaptchaSolver, LlmClient,
    LlmExtractor, MaricopaAdapter, MaricopaClient, MaricopaCollector, PhoenixMlsAdapter,
    PhoenixMlsCollector, PhoenixMlsScraper, ProcessingPipeline, PropertyRepository, ProxyPool,
    RateLimiter, SessionStore, WorkQueue, WorkerPool,
};
use saguaro::utils::scheduled_executor::{ScheduledExecutor, ScheduledTask, ShutdownHandle};
use saguaro::{AppState, db, handlers};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let config = Config::load()?;

    let log_filter = tracing_subscriber::EnvFilter::new(&config.logging.level);
    let registry = tracing_subscriber::registry().with(log_filter);

    if let Some(log_file) = &config.logging.file {
        let log_path = std::path::Path::new(log_file);
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let log_dir = log_path.parent().and_then(|p| p.to_str()).unwrap_or("logs");
        let file_name =
            log_path.file_name().and_then(|n| n.to_str()).unwrap_or("saguaro.log");
        let file_prefix = file_name.strip_suffix(".log").unwrap_or(file_name);

        let file_appender = tracing_appender::rolling::daily(log_dir, file_prefix);
        let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(non_blocking))
            .with(tracing_subscriber::fmt::layer())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
    tracing::info!("Saguaro starting up");

    let prometheus = PrometheusBuilder::new().install_recorder()?;

    let pool = db::init_db(&config.database.url, config.database.max_pool_size).await?;
    tracing::info!("Database ready");

    // --- supervision ---
    let retry_policy = RetryPolicy::new(config.processing.retry_attempts + 1);
    let supervisor = Arc::new(ErrorSupervisor::new(
        retry_policy,
        CircuitBreakerConfig::default(),
        DeadLetterQueue::new(pool.clone()),
    ));

    // --- shared infrastructure ---
    let maricopa_limiter = Arc::new(RateLimiter::new(
        config.sources.maricopa.rate_limit_per_window,
        config.sources.maricopa.safety_margin,
        Duration::from_secs(config.sources.maricopa.window_seconds),
    ));
    let mls_limiter = Arc::new(RateLimiter::new(
        config.sources.phoenix_mls.rate_limit_per_window,
        config.sources.phoenix_mls.safety_margin,
        Duration::from_secs(config.sources.phoenix_mls.window_seconds),
    ));

    let proxy_pool = Arc::new(ProxyPool::new(
        config.proxy.proxies.clone(),
        config.proxy.health_threshold,
        Duration::from_secs(config.proxy.cooldown_seconds),
    ));
    let session_store = Arc::new(SessionStore::new(
        pool.clone(),
        config.sources.phoenix_mls.session_max_age(),
    ));

    let solver = (!config.captcha.service.is_empty()).then(|| {
        Arc::new(HttpCaptchaSolver::new(&config.captcha))
            as Arc<dyn saguaro::services::CaptchaSolver>
    });
    let scraper = Arc::new(PhoenixMlsScraper::new(
        Arc::new(HttpBrowser::new()),
        Arc::clone(&proxy_pool),
        Arc::clone(&session_store),
        Arc::clone(&mls_limiter),
        solver,
        config.captcha.hourly_budget,
        config.sources.phoenix_mls.clone(),
    ));

    // --- extraction + pipeline ---
    let llm_client = Arc::new(LlmClient::new(&config.extraction)?);
    let extraction_cache = Arc::new(ExtractionCache::new(
        config.extraction.cache_ttl(),
        config.extraction.cache_max_entries,
    ));
    let extractor = Arc::new(LlmExtractor::new(
        Arc::clone(&llm_client),
        Arc::clone(&extraction_cache),
        supervisor.breaker("llm"),
        config.extraction.prompt_version.clone(),
    ));

    let shutdown = ShutdownHandle::new();
    let pipeline = Arc::new(ProcessingPipeline::new(
        Arc::clone(&extractor),
        MaricopaAdapter::new(config.collection.collector_version.clone()),
        PhoenixMlsAdapter::new(config.collection.collector_version.clone()),
        Arc::clone(&supervisor),
        config.processing.clone(),
        shutdown.subscribe(),
    ));

    let repository = Arc::new(PropertyRepository::new(
        pool.clone(),
        config.collection.inactive_after_days,
    ));

    // --- work queue + workers ---
    let (work_queue, work_rx) = WorkQueue::new(config.service.queue_capacity);
    let worker_pool = WorkerPool::spawn(
        config.service.workers,
        work_rx,
        work_queue.clone(),
        Arc::clone(&pipeline),
        Arc::clone(&repository),
        shutdown.subscribe(),
    );

    // --- collectors ---
    let maricopa_client =
        Arc::new(MaricopaClient::new(&config.sources.maricopa, Arc::clone(&maricopa_limiter))?);
    let runner = Arc::new(CollectorRunner::new(
        Arc::clone(&repository),
        Arc::clone(&supervisor),
        config.collection.zipcodes.clone(),
    ));
    let maricopa_collector = Arc::new(MaricopaCollector::new(
        maricopa_client,
        Arc::clone(&pipeline),
        Arc::clone(&repository),
        Arc::clone(&supervisor),
        Arc::clone(&maricopa_limiter),
    ));
    let collection_task = Arc::new(CollectionTask {
        runner: Arc::clone(&runner),
        maricopa: Arc::clone(&maricopa_collector),
        phoenix_mls: Arc::new(PhoenixMlsCollector::new(
            scraper,
            Arc::clone(&pipeline),
            Arc::clone(&repository),
            Arc::clone(&supervisor),
            Arc::clone(&mls_limiter),
        )),
    });

    if config.collection.zipcodes.is_empty() {
        tracing::warn!("no ZIP codes configured; collection runs disabled");
    } else {
        collection_task.runner.validate().await?;
        ScheduledExecutor::new("collection", Duration::from_secs(24 * 3600))
            .with_jitter(Duration::from_secs(300))
            .spawn(Arc::clone(&collection_task), shutdown.subscribe());
    }
    ScheduledExecutor::new("recent-sales", Duration::from_secs(6 * 3600))
        .with_jitter(Duration::from_secs(300))
        .spawn(
            Arc::new(RecentSalesTask {
                collector: Arc::clone(&maricopa_collector),
                days_back: config.collection.recent_sales_days_back,
            }),
            shutdown.subscribe(),
        );

    // --- maintenance loops ---
    ScheduledExecutor::new("cache-prune", Duration::from_secs(600)).spawn(
        Arc::new(CachePruneTask { cache: Arc::clone(&extraction_cache) }),
        shutdown.subscribe(),
    );
    ScheduledExecutor::new("dlq-compaction", Duration::from_secs(24 * 3600))
        .with_jitter(Duration::from_secs(600))
        .spawn(
            Arc::new(DlqCompactionTask { supervisor: Arc::clone(&supervisor) }),
            shutdown.subscribe(),
        );
    ScheduledExecutor::new("inactive-sweep", Duration::from_secs(12 * 3600))
        .with_jitter(Duration::from_secs(600))
        .spawn(
            Arc::new(InactiveSweepTask { repository: Arc::clone(&repository) }),
            shutdown.subscribe(),
        );
    ScheduledExecutor::new("daily-report", Duration::from_secs(3600)).spawn(
        Arc::new(DailyReportTask { runner: Arc::clone(&runner) }),
        shutdown.subscribe(),
    );

    // --- HTTP surface ---
    let app_state = Arc::new(AppState {
        work_queue: work_queue.clone(),
        pipeline,
        repository,
        extraction_cache,
        llm_client,
        prometheus,
    });

    let app = Router::new()
        .route("/process", post(handlers::process::enqueue))
        .route("/health", get(handlers::health::liveness))
        .route("/health/llm", get(handlers::health::readiness))
        .route("/metrics", get(handlers::metrics::scrape))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(app_state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("listening on {}", addr);

    let shutdown_for_server = shutdown.clone();
    let queue_for_server = work_queue.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            wait_for_termination().await;
            tracing::info!("termination signal received, draining");
            queue_for_server.stop_accepting();
            shutdown_for_server.shutdown();
        })
        .await?;

    // Drain the queue until the shutdown budget runs out, then cancel.
    worker_pool
        .join(Duration::from_secs(config.service.shutdown_timeout_seconds))
        .await;
    tracing::info!("Saguaro stopped");
    Ok(())
}

async fn wait_for_termination() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("install ctrl-c handler");
    };
    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

// ============================================================================
// Scheduled tasks
// ============================================================================

struct CollectionTask {
    runner: Arc<CollectorRunner>,
    maricopa: Arc<MaricopaCollector>,
    phoenix_mls: Arc<PhoenixMlsCollector>,
}

impl ScheduledTask for CollectionTask {
    fn run(
        &self,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), anyhow::Error>> + Send + '_>>
    {
        Box::pin(async move {
            self.runner.validate().await?;
            let api_run = self.runner.run_collector(self.maricopa.as_ref()).await;
            tracing::info!(
                source = %api_run.source,
                stored = api_run.properties_stored,
                failures = api_run.failures,
                "assessor collection finished"
            );
            let mls_run = self.runner.run_collector(self.phoenix_mls.as_ref()).await;
            tracing::info!(
                source = %mls_run.source,
                stored = mls_run.properties_stored,
                failures = mls_run.failures,
                "MLS collection finished"
            );
            Ok(())
        })
    }
}

struct RecentSalesTask {
    collector: Arc<MaricopaCollector>,
    days_back: u32,
}

impl ScheduledTask for RecentSalesTask {
    fn run(
        &self,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), anyhow::Error>> + Send + '_>>
    {
        Box::pin(async move {
            self.collector.collect_recent_sales(self.days_back).await?;
            Ok(())
        })
    }
}

struct CachePruneTask {
    cache: Arc<ExtractionCache>,
}

impl ScheduledTask for CachePruneTask {
    fn run(
        &self,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), anyhow::Error>> + Send + '_>>
    {
        Box::pin(async move {
            self.cache.prune_expired();
            Ok(())
        })
    }
}

struct DlqCompactionTask {
    supervisor: Arc<ErrorSupervisor>,
}

impl ScheduledTask for DlqCompactionTask {
    fn run(
        &self,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), anyhow::Error>> + Send + '_>>
    {
        Box::pin(async move {
            let cutoff = chrono::Utc::now() - chrono::Duration::days(14);
            let purged = self.supervisor.dead_letters().purge(cutoff).await?;
            if purged > 0 {
                tracing::info!(purged, "compacted dead-letter queue");
            }
            Ok(())
        })
    }
}

struct InactiveSweepTask {
    repository: Arc<PropertyRepository>,
}

impl ScheduledTask for InactiveSweepTask {
    fn run(
        &self,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), anyhow::Error>> + Send + '_>>
    {
        Box::pin(async move {
            let swept = self.repository.sweep_inactive().await?;
            if swept > 0 {
                tracing::info!(swept, "marked stale terminal listings inactive");
            }
            Ok(())
        })
    }
}

struct DailyReportTask {
    runner: Arc<CollectorRunner>,
}

impl ScheduledTask for DailyReportTask {
    fn run(
        &self,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), anyhow::Error>> + Send + '_>>
    {
        Box::pin(async move {
            let today = chrono::Utc::now().date_naive();
            self.runner.build_daily_report(today).await?;
            Ok(())
        })
    }
}
