pub mod adapters;
pub mod collectors;
pub mod processing;
pub mod proxy_pool;
pub mod rate_limiter;
pub mod repository;
pub mod scraper;
pub mod session_store;
pub mod sources;
pub mod supervisor;
pub mod work_queue;

pub use adapters::{MaricopaAdapter, PhoenixMlsAdapter, PropertyAdapter};
pub use collectors::{Collector, CollectorRunner, MaricopaCollector, PhoenixMlsCollector};
pub use processing::{
    ExtractionCache, ExtractionMethod, ExtractionResult, LlmClient, LlmExtractor, PipelineInput,
    PipelineMetrics, PipelineResult, ProcessingPipeline, ValidationResult, Validator,
};
pub use proxy_pool::{ProxyHealth, ProxyIdentity, ProxyOutcome, ProxyPool};
pub use rate_limiter::{OverallUsage, RateLimitObserver, RateLimiter, SourceUsage};
pub use repository::{PropertyRepository, SortBy, SortOrder};
pub use scraper::{
    BrowserDriver, CaptchaSolver, ErrorDetector, ErrorPattern, HttpBrowser, HttpCaptchaSolver,
    PHOENIX_MLS_SOURCE, PhoenixMlsScraper, RenderedPage, SiteErrorKind,
};
pub use session_store::{SessionArtifacts, SessionStore, StoredCookie};
pub use sources::{MARICOPA_SOURCE, MaricopaClient};
pub use supervisor::{
    BreakerState, CircuitBreaker, CircuitBreakerConfig, DeadLetterItem, DeadLetterQueue,
    ErrorSupervisor, RetryPolicy,
};
pub use work_queue::{EnqueueOutcome, WorkItem, WorkQueue, WorkerPool};
