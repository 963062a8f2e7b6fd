//! Anti-bot scraper for the Phoenix MLS site.
//!
//! A fetch attempt walks START -> NAVIGATE -> (OK | ERROR_DETECTED ->
//! RECOVER -> NAVIGATE | FAIL). Recovery is condition-specific: rate
//! limits wait out the hint, Cloudflare blocks rotate the egress identity,
//! expired sessions restart once with a fresh context, captchas are solved
//! against an hourly budget, maintenance pages wait with jitter, and
//! missing listings are surfaced as permanent.

mod browser;
mod captcha;
mod error_detection;

pub use browser::{BrowserContext, BrowserDriver, HttpBrowser, RenderedPage};
pub use captcha::{
    CaptchaBudget, CaptchaChallenge, CaptchaSolution, CaptchaSolver, CaptchaType,
    HttpCaptchaSolver, detect_challenge,
};
pub use error_detection::{
    DetectedSiteError, ErrorDetector, ErrorPattern, HeaderCondition, RecoveryAction, SiteErrorKind,
};

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};

use crate::config::PhoenixMlsConfig;
use crate::services::proxy_pool::{ProxyIdentity, ProxyOutcome, ProxyPool};
use crate::services::rate_limiter::RateLimiter;
use crate::services::session_store::SessionStore;
use crate::utils::IngestError;

/// Source tag used for rate limiting and provenance.
pub const PHOENIX_MLS_SOURCE: &str = "phoenix_mls";

/// Recovery attempts allowed within a single fetch.
const MAX_RECOVERIES: u32 = 4;

pub struct PhoenixMlsScraper {
    driver: Arc<dyn BrowserDriver>,
    proxy_pool: Arc<ProxyPool>,
    sessions: Arc<SessionStore>,
    rate_limiter: Arc<RateLimiter>,
    detector: ErrorDetector,
    solver: Option<Arc<dyn CaptchaSolver>>,
    captcha_budget: Mutex<CaptchaBudget>,
    /// One browser context per in-flight fetch, bounded
    contexts: Semaphore,
    config: PhoenixMlsConfig,
}

impl PhoenixMlsScraper {
    pub fn new(
        driver: Arc<dyn BrowserDriver>,
        proxy_pool: Arc<ProxyPool>,
        sessions: Arc<SessionStore>,
        rate_limiter: Arc<RateLimiter>,
        solver: Option<Arc<dyn CaptchaSolver>>,
        captcha_hourly_budget: u32,
        config: PhoenixMlsConfig,
    ) -> Self {
        Self {
            driver,
            proxy_pool,
            sessions,
            rate_limiter,
            detector: ErrorDetector::new(),
            solver,
            captcha_budget: Mutex::new(CaptchaBudget::new(captcha_hourly_budget)),
            contexts: Semaphore::new(config.max_parallel_contexts.max(1)),
            config,
        }
    }

    pub fn detector_mut(&mut self) -> &mut ErrorDetector {
        &mut self.detector
    }

    /// Fetch all listing fragments for a ZIP code, walking result pages
    /// until one comes back empty.
    pub async fn search_zipcode(&self, zipcode: &str) -> Result<Vec<String>, IngestError> {
        let mut listings = Vec::new();
        let mut page_no = 1u32;

        loop {
            let url = format!(
                "{}/search?zip={}&page={}",
                self.config.base_url.trim_end_matches('/'),
                urlencoding::encode(zipcode),
                page_no
            );
            let page = match self.fetch_page(&url).await {
                Ok(page) => page,
                // A missing results page past the first is just exhaustion.
                Err(IngestError::NotFound(_)) if page_no > 1 => break,
                Err(e) => return Err(e),
            };

            let fragments = page.select_fragments(&self.config.listing_selector);
            if fragments.is_empty() {
                break;
            }
            listings.extend(fragments);
            page_no += 1;
        }

        tracing::info!(zipcode, listings = listings.len(), "zipcode search complete");
        Ok(listings)
    }

    /// Fetch a single listing detail page and return its HTML.
    pub async fn fetch_detail(&self, url: &str) -> Result<String, IngestError> {
        Ok(self.fetch_page(url).await?.body)
    }

    /// Run the full fetch state machine for one URL.
    pub async fn fetch_page(&self, url: &str) -> Result<RenderedPage, IngestError> {
        let _permit = self
            .contexts
            .acquire()
            .await
            .map_err(|_| IngestError::internal("scraper context pool closed"))?;

        let mut identity = self.proxy_pool.acquire();
        let mut reauthenticated = false;
        let mut recoveries = 0u32;

        loop {
            self.rate_limiter.acquire(PHOENIX_MLS_SOURCE).await;

            let identity_label = identity_label(&identity);
            let session = self.sessions.load(PHOENIX_MLS_SOURCE, &identity_label).await?;
            let mut ctx = self.driver.open_context(identity.as_ref(), session.as_ref()).await?;

            let navigated = ctx.navigate(url, self.config.timeout()).await;
            let mut page = match navigated {
                Ok(page) => page,
                Err(e) => {
                    ctx.close().await;
                    if let Some(id) = &identity {
                        self.proxy_pool.report(id, ProxyOutcome::Failure);
                    }
                    recoveries += 1;
                    if recoveries > MAX_RECOVERIES || !e.is_retryable() {
                        return Err(e);
                    }
                    identity = self.proxy_pool.acquire();
                    continue;
                }
            };

            let mut detected = self.detector.detect(&page);
            if detected.is_empty() {
                self.finish_ok(&mut *ctx, &identity, &identity_label).await?;
                metrics::counter!("scraper_fetches_total", 1, "outcome" => "ok");
                return Ok(page);
            }

            recoveries += 1;
            let action = self.detector.suggested_action(&detected).expect("non-empty detections");

            if recoveries > MAX_RECOVERIES {
                ctx.close().await;
                metrics::counter!("scraper_fetches_total", 1, "outcome" => "failed");
                return Err(fetch_failure(url, detected.first().map(|d| d.kind)));
            }

            match action {
                RecoveryAction::Wait { duration, reason } => {
                    ctx.close().await;
                    let wait = if reason == SiteErrorKind::Maintenance {
                        // Long wait with jitter so a fleet does not return
                        // in one thundering herd.
                        let quarter = (duration / 4).max(Duration::from_secs(1));
                        let jitter = rand::thread_rng().gen_range(Duration::ZERO..quarter);
                        tracing::warn!(url, wait_seconds = duration.as_secs(), "site in maintenance");
                        duration + jitter
                    } else {
                        tracing::info!(url, wait_seconds = duration.as_secs(), "site rate limit, honoring retry-after");
                        metrics::counter!("scraper_rate_limit_hits_total", 1);
                        duration
                    };
                    tokio::time::sleep(wait).await;
                    // Retry with the same identity.
                }
                RecoveryAction::SwitchProxy => {
                    ctx.close().await;
                    if let Some(id) = &identity {
                        self.proxy_pool.report(id, ProxyOutcome::Blocked);
                        tracing::warn!(url, proxy = %id.url, "identity blocked, rotating");
                    }
                    identity = self.acquire_different(&identity);
                }
                RecoveryAction::Reauthenticate => {
                    ctx.close().await;
                    self.sessions.invalidate(PHOENIX_MLS_SOURCE, &identity_label).await?;
                    if reauthenticated {
                        return Err(IngestError::auth(format!(
                            "session for {url} rejected after re-authentication"
                        )));
                    }
                    reauthenticated = true;
                    tracing::info!(url, "session expired, restarting with a fresh context");
                }
                RecoveryAction::SolveCaptcha => {
                    match self.solve_captcha(&mut *ctx, &page, url).await {
                        Ok(solved_page) => {
                            page = solved_page;
                            detected = self.detector.detect(&page);
                            if detected.is_empty() {
                                self.finish_ok(&mut *ctx, &identity, &identity_label).await?;
                                metrics::counter!("scraper_fetches_total", 1,
                                    "outcome" => "captcha_solved");
                                return Ok(page);
                            }
                            ctx.close().await;
                            // Challenge persists; treat as a blocked identity.
                            if let Some(id) = &identity {
                                self.proxy_pool.report(id, ProxyOutcome::Blocked);
                            }
                            identity = self.acquire_different(&identity);
                        }
                        Err(e) => {
                            ctx.close().await;
                            return Err(e);
                        }
                    }
                }
                RecoveryAction::Abort { reason } => {
                    ctx.close().await;
                    metrics::counter!("scraper_fetches_total", 1, "outcome" => "not_found");
                    return Err(match reason {
                        SiteErrorKind::NotFound => {
                            IngestError::not_found(format!("listing gone: {url}"))
                        }
                        other => fetch_failure(url, Some(other)),
                    });
                }
            }
        }
    }

    async fn finish_ok(
        &self,
        ctx: &mut dyn BrowserContext,
        identity: &Option<ProxyIdentity>,
        identity_label: &str,
    ) -> Result<(), IngestError> {
        if let Some(id) = identity {
            self.proxy_pool.report(id, ProxyOutcome::Success);
        }
        let artifacts = ctx.session_artifacts();
        self.sessions.save(PHOENIX_MLS_SOURCE, identity_label, &artifacts).await
    }

    /// Detect, solve, inject, and re-navigate once (the solve-and-retry
    /// path). Budget exhaustion surfaces as a rate-limit error.
    async fn solve_captcha(
        &self,
        ctx: &mut dyn BrowserContext,
        page: &RenderedPage,
        url: &str,
    ) -> Result<RenderedPage, IngestError> {
        let Some(solver) = &self.solver else {
            return Err(IngestError::permission("captcha encountered but no solver configured"));
        };

        if !self.captcha_budget.lock().await.try_consume() {
            return Err(IngestError::rate_limit("captcha hourly budget exhausted", None));
        }

        let challenge = detect_challenge(page).ok_or_else(|| {
            IngestError::parsing(format!("captcha pattern matched but no challenge found: {url}"))
        })?;
        tracing::info!(
            url,
            captcha_type = ?challenge.captcha_type,
            site_key = challenge.site_key.as_deref().unwrap_or("-"),
            "solving captcha"
        );

        let solution = solver.solve(&challenge).await?;
        metrics::counter!("scraper_captchas_solved_total", 1);

        ctx.submit_captcha_token(
            url,
            challenge.captcha_type.response_field(),
            &solution.token,
            self.config.timeout(),
        )
        .await?;

        // Retry navigation once with the token in place.
        ctx.navigate(url, self.config.timeout()).await
    }

    fn acquire_different(&self, previous: &Option<ProxyIdentity>) -> Option<ProxyIdentity> {
        let next = self.proxy_pool.acquire();
        match (&next, previous) {
            // Single-identity pools can only hand back the same one; accept
            // it rather than stalling the fetch.
            (Some(a), Some(b)) if a.url == b.url => self.proxy_pool.acquire().or(next.clone()),
            _ => next,
        }
    }
}

fn identity_label(identity: &Option<ProxyIdentity>) -> String {
    identity.as_ref().map(|i| i.url.clone()).unwrap_or_else(|| "direct".to_string())
}

fn fetch_failure(url: &str, condition: Option<SiteErrorKind>) -> IngestError {
    match condition {
        Some(SiteErrorKind::RateLimit) => {
            IngestError::rate_limit(format!("gave up on {url}: persistent rate limiting"), None)
        }
        Some(SiteErrorKind::NotFound) => IngestError::not_found(format!("listing gone: {url}")),
        Some(kind) => {
            IngestError::network(format!("gave up on {url}: unrecovered {}", kind.as_str()))
        }
        None => IngestError::network(format!("gave up on {url}: retry ceiling reached")),
    }
}
