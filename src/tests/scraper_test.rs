//! Scraper tests: site-error classification, recovery selection, proxy
//! rotation under Cloudflare blocks, and the captcha solve-and-retry path.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

use super::common::create_test_db;
use crate::config::PhoenixMlsConfig;
use crate::services::proxy_pool::{ProxyHealth, ProxyIdentity, ProxyPool};
use crate::services::rate_limiter::RateLimiter;
use crate::services::scraper::{
    BrowserContext, BrowserDriver, CaptchaBudget, CaptchaChallenge, CaptchaSolution,
    CaptchaSolver, CaptchaType, DetectedSiteError, ErrorDetector, ErrorPattern, HeaderCondition,
    PhoenixMlsScraper, RecoveryAction, RenderedPage, SiteErrorKind, detect_challenge,
};
use crate::services::session_store::{SessionArtifacts, SessionStore};
use crate::utils::{ErrorKind, IngestError};

fn page(status: u16, body: &str) -> RenderedPage {
    RenderedPage {
        status,
        headers: HashMap::new(),
        body: body.to_string(),
        final_url: "https://www.phoenixmlssearch.com/search".to_string(),
    }
}

fn page_with_headers(status: u16, body: &str, headers: &[(&str, &str)]) -> RenderedPage {
    let mut page = page(status, body);
    page.headers =
        headers.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    page
}

// ============================================================================
// Pattern matching
// ============================================================================

#[test]
fn pattern_matches_on_status_code() {
    let pattern = ErrorPattern {
        kind: SiteErrorKind::RateLimit,
        name: "rate_limit_429".to_string(),
        status_codes: vec![429],
        headers: vec![],
        body_text: vec![],
        css_selectors: vec![],
        url_patterns: vec![],
        confidence: 1.0,
    };

    assert!(pattern.matches(&page(429, "")));
    assert!(!pattern.matches(&page(200, "")));
}

#[test]
fn pattern_matches_on_headers() {
    let pattern = ErrorPattern {
        kind: SiteErrorKind::RateLimit,
        name: "rate_limit_headers".to_string(),
        status_codes: vec![],
        headers: vec![
            HeaderCondition { name: "x-ratelimit-remaining".to_string(), equals: Some("0".to_string()) },
            HeaderCondition { name: "retry-after".to_string(), equals: None },
        ],
        body_text: vec![],
        css_selectors: vec![],
        url_patterns: vec![],
        confidence: 0.9,
    };

    assert!(pattern.matches(&page_with_headers(
        200,
        "",
        &[("x-ratelimit-remaining", "0"), ("retry-after", "60")]
    )));
    assert!(!pattern.matches(&page_with_headers(200, "", &[("x-ratelimit-remaining", "100")])));
}

#[test]
fn pattern_matches_on_body_text_case_insensitive() {
    let pattern = ErrorPattern {
        kind: SiteErrorKind::BlockedIp,
        name: "cloudflare_block".to_string(),
        status_codes: vec![],
        headers: vec![],
        body_text: vec!["cloudflare".to_string(), "access denied".to_string()],
        css_selectors: vec![],
        url_patterns: vec![],
        confidence: 0.85,
    };

    assert!(pattern.matches(&page(200, "You have been blocked by Cloudflare protection")));
    assert!(!pattern.matches(&page(200, "Welcome to Phoenix MLS")));
}

#[test]
fn pattern_matches_on_css_selectors() {
    let pattern = ErrorPattern {
        kind: SiteErrorKind::Captcha,
        name: "recaptcha_challenge".to_string(),
        status_codes: vec![],
        headers: vec![],
        body_text: vec![],
        css_selectors: vec![".g-recaptcha".to_string(), "#recaptcha".to_string()],
        url_patterns: vec![],
        confidence: 0.95,
    };

    assert!(pattern.matches(&page(200, r#"<div class="g-recaptcha"></div>"#)));
    assert!(!pattern.matches(&page(200, r#"<div class="property-list"></div>"#)));
}

#[test]
fn pattern_matches_on_url() {
    let pattern = ErrorPattern {
        kind: SiteErrorKind::SessionExpired,
        name: "login_redirect".to_string(),
        status_codes: vec![],
        headers: vec![],
        body_text: vec![],
        css_selectors: vec![],
        url_patterns: vec!["/login".to_string(), "/signin".to_string()],
        confidence: 0.9,
    };

    let mut redirected = page(200, "");
    redirected.final_url =
        "https://www.phoenixmlssearch.com/login?return_to=/search".to_string();
    assert!(pattern.matches(&redirected));
    assert!(!pattern.matches(&page(200, "")));
}

#[test]
fn combined_conditions_all_must_match() {
    let pattern = ErrorPattern {
        kind: SiteErrorKind::RateLimit,
        name: "rate_limit_combined".to_string(),
        status_codes: vec![429, 503],
        headers: vec![HeaderCondition { name: "retry-after".to_string(), equals: None }],
        body_text: vec!["rate limit".to_string(), "too many requests".to_string()],
        css_selectors: vec![],
        url_patterns: vec![],
        confidence: 0.95,
    };

    assert!(pattern.matches(&page_with_headers(
        429,
        "Rate limit exceeded",
        &[("retry-after", "60")]
    )));
    // Body matches but header group does not.
    assert!(!pattern.matches(&page(429, "Rate limit exceeded")));
}

// ============================================================================
// Detector
// ============================================================================

#[test]
fn detects_rate_limit_with_retry_after() {
    let detector = ErrorDetector::new();
    let page =
        page_with_headers(429, "Rate limit exceeded", &[("retry-after", "60")]);

    let errors = detector.detect(&page);
    let hit = errors
        .iter()
        .find(|e| e.kind == SiteErrorKind::RateLimit)
        .expect("rate limit detected");
    assert_eq!(hit.retry_after, Some(Duration::from_secs(60)));
}

#[test]
fn detects_cloudflare_block() {
    let detector = ErrorDetector::new();
    let page = page(
        403,
        "<html><head><title>Access denied | phoenixmlssearch.com used Cloudflare</title></head></html>",
    );

    let errors = detector.detect(&page);
    let block = errors
        .iter()
        .find(|e| e.kind == SiteErrorKind::BlockedIp)
        .expect("block detected");
    assert_eq!(block.block_type.as_deref(), Some("cloudflare"));
}

#[test]
fn detects_multiple_conditions_at_once() {
    let detector = ErrorDetector::new();
    let page = page_with_headers(
        429,
        "Rate limit exceeded. Protected by Cloudflare. Access denied.",
        &[("retry-after", "300"), ("cf-ray", "123456789")],
    );

    let errors = detector.detect(&page);
    let kinds: Vec<_> = errors.iter().map(|e| e.kind).collect();
    assert!(kinds.contains(&SiteErrorKind::RateLimit));
    assert!(kinds.contains(&SiteErrorKind::BlockedIp));
}

#[test]
fn clean_page_detects_nothing() {
    let detector = ErrorDetector::new();
    let errors =
        detector.detect(&page(200, r#"<div class="property-list">Properties found</div>"#));
    assert!(errors.is_empty());
}

#[test]
fn custom_patterns_can_be_added_and_removed() {
    let mut detector = ErrorDetector::new();
    detector.add_pattern(ErrorPattern {
        kind: SiteErrorKind::BlockedIp,
        name: "custom_block".to_string(),
        status_codes: vec![451],
        headers: vec![],
        body_text: vec![],
        css_selectors: vec![],
        url_patterns: vec![],
        confidence: 0.8,
    });

    assert!(
        detector.patterns_by_kind(SiteErrorKind::BlockedIp).iter().any(|p| p.name == "custom_block")
    );
    assert!(detector.remove_pattern("custom_block"));
    assert!(!detector.remove_pattern("custom_block"), "second removal is a no-op");
}

#[test]
fn suggested_action_prioritizes_rate_limit_wait() {
    let detector = ErrorDetector::new();
    let errors = vec![
        DetectedSiteError {
            kind: SiteErrorKind::RateLimit,
            pattern_name: "rate_limit".to_string(),
            confidence: 0.9,
            retry_after: Some(Duration::from_secs(60)),
            block_type: None,
            redirect_url: None,
        },
        DetectedSiteError {
            kind: SiteErrorKind::BlockedIp,
            pattern_name: "cloudflare".to_string(),
            confidence: 0.8,
            retry_after: None,
            block_type: Some("cloudflare".to_string()),
            redirect_url: None,
        },
    ];

    match detector.suggested_action(&errors) {
        Some(RecoveryAction::Wait { duration, reason }) => {
            assert_eq!(duration, Duration::from_secs(60));
            assert_eq!(reason, SiteErrorKind::RateLimit);
        }
        other => panic!("expected wait, got {other:?}"),
    }
}

// ============================================================================
// Captcha detection & budget
// ============================================================================

#[test]
fn detects_recaptcha_v2_with_site_key() {
    let page = page(
        200,
        r#"<div class="g-recaptcha" data-sitekey="test-site-key-123"></div>
           <iframe src="https://www.google.com/recaptcha/api2/anchor"></iframe>"#,
    );

    let challenge = detect_challenge(&page).expect("challenge found");
    assert_eq!(challenge.captcha_type, CaptchaType::RecaptchaV2);
    assert_eq!(challenge.site_key.as_deref(), Some("test-site-key-123"));
}

#[test]
fn detects_recaptcha_v3_from_script() {
    let page = page(
        200,
        r#"<script>grecaptcha.execute('site-key-v3', {action: 'search'})</script>"#,
    );

    let challenge = detect_challenge(&page).expect("challenge found");
    assert_eq!(challenge.captcha_type, CaptchaType::RecaptchaV3);
}

#[test]
fn detects_hcaptcha_and_image_challenges() {
    let hcaptcha = page(200, r#"<div class="h-captcha" data-sitekey="hc-key"></div>"#);
    assert_eq!(
        detect_challenge(&hcaptcha).expect("found").captcha_type,
        CaptchaType::HCaptcha
    );

    let image = page(200, r#"<img class="captcha-image" src="/captcha/xyz.png">"#);
    let challenge = detect_challenge(&image).expect("found");
    assert_eq!(challenge.captcha_type, CaptchaType::Image);
    assert_eq!(challenge.image_url.as_deref(), Some("/captcha/xyz.png"));
}

#[test]
fn no_challenge_on_clean_page() {
    assert!(detect_challenge(&page(200, "<html><body>Listings</body></html>")).is_none());
}

#[test]
fn captcha_budget_is_a_sliding_hour() {
    let mut budget = CaptchaBudget::new(2);
    assert!(budget.try_consume());
    assert!(budget.try_consume());
    assert!(!budget.try_consume(), "budget exhausted");
    assert_eq!(budget.used(), 2);
}

// ============================================================================
// Fetch state machine with a scripted driver
// ============================================================================

/// Driver whose responses are scripted per (identity, attempt).
struct ScriptedDriver {
    /// Pages served for identities in this map; others get a clean page.
    blocked_identities: Vec<String>,
    navigations: Arc<AtomicUsize>,
    tokens_submitted: Arc<Mutex<Vec<(String, String)>>>,
    /// Serve a captcha page until a token is submitted.
    captcha_until_solved: bool,
}

struct ScriptedContext {
    identity: Option<String>,
    driver_blocked: Vec<String>,
    navigations: Arc<AtomicUsize>,
    tokens_submitted: Arc<Mutex<Vec<(String, String)>>>,
    captcha_until_solved: bool,
    solved: bool,
}

#[async_trait]
impl BrowserDriver for ScriptedDriver {
    async fn open_context(
        &self,
        identity: Option<&ProxyIdentity>,
        _session: Option<&SessionArtifacts>,
    ) -> Result<Box<dyn BrowserContext>, IngestError> {
        Ok(Box::new(ScriptedContext {
            identity: identity.map(|i| i.url.clone()),
            driver_blocked: self.blocked_identities.clone(),
            navigations: Arc::clone(&self.navigations),
            tokens_submitted: Arc::clone(&self.tokens_submitted),
            captcha_until_solved: self.captcha_until_solved,
            solved: false,
        }))
    }
}

#[async_trait]
impl BrowserContext for ScriptedContext {
    async fn navigate(
        &mut self,
        url: &str,
        _timeout: Duration,
    ) -> Result<RenderedPage, IngestError> {
        self.navigations.fetch_add(1, Ordering::SeqCst);

        if let Some(identity) = &self.identity
            && self.driver_blocked.contains(identity)
        {
            return Ok(RenderedPage {
                status: 403,
                headers: HashMap::new(),
                body: "Access denied: Cloudflare".to_string(),
                final_url: url.to_string(),
            });
        }

        if self.captcha_until_solved && !self.solved {
            return Ok(RenderedPage {
                status: 200,
                headers: HashMap::new(),
                body: r#"<div class="g-recaptcha" data-sitekey="test-site-key-123"></div>
                         <iframe src="https://google.com/recaptcha/api2/anchor"></iframe>"#
                    .to_string(),
                final_url: url.to_string(),
            });
        }

        Ok(RenderedPage {
            status: 200,
            headers: HashMap::new(),
            body: r#"<div class="property-listing">789 Oak Street</div>"#.to_string(),
            final_url: url.to_string(),
        })
    }

    async fn submit_captcha_token(
        &mut self,
        url: &str,
        field: &str,
        token: &str,
        _timeout: Duration,
    ) -> Result<RenderedPage, IngestError> {
        self.tokens_submitted.lock().await.push((field.to_string(), token.to_string()));
        self.solved = true;
        self.navigate(url, Duration::from_secs(1)).await
    }

    fn session_artifacts(&self) -> SessionArtifacts {
        SessionArtifacts { cookies: vec![], storage: None }
    }

    async fn close(&mut self) {}
}

struct FixedSolver {
    seen_site_keys: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl CaptchaSolver for FixedSolver {
    async fn solve(&self, challenge: &CaptchaChallenge) -> Result<CaptchaSolution, IngestError> {
        if let Some(site_key) = &challenge.site_key {
            self.seen_site_keys.lock().await.push(site_key.clone());
        }
        Ok(CaptchaSolution {
            token: "captcha-solution-token-456".to_string(),
            captcha_type: challenge.captcha_type,
            solved_at: chrono::Utc::now(),
        })
    }
}

fn scraper_config() -> PhoenixMlsConfig {
    PhoenixMlsConfig {
        rate_limit_per_window: 1000,
        safety_margin: 0.0,
        timeout_seconds: 2,
        ..Default::default()
    }
}

async fn build_scraper(
    driver: ScriptedDriver,
    proxies: Vec<String>,
    solver: Option<Arc<dyn CaptchaSolver>>,
) -> (PhoenixMlsScraper, Arc<ProxyPool>) {
    let pool = create_test_db().await;
    let proxy_pool = Arc::new(ProxyPool::new(proxies, 1, Duration::from_secs(300)));
    let scraper = PhoenixMlsScraper::new(
        Arc::new(driver),
        Arc::clone(&proxy_pool),
        Arc::new(SessionStore::new(pool, Duration::from_secs(3600))),
        Arc::new(RateLimiter::new(1000, 0.0, Duration::from_secs(60))),
        solver,
        10,
        scraper_config(),
    );
    (scraper, proxy_pool)
}

// Cloudflare block on identity one rotates to identity two and puts the
// first on probation.
#[tokio::test]
async fn blocked_identity_rotates_and_enters_probation() {
    let driver = ScriptedDriver {
        blocked_identities: vec!["http://proxy-one:8080".to_string()],
        navigations: Arc::new(AtomicUsize::new(0)),
        tokens_submitted: Arc::new(Mutex::new(Vec::new())),
        captcha_until_solved: false,
    };
    let (scraper, proxy_pool) = build_scraper(
        driver,
        vec!["http://proxy-one:8080".to_string(), "http://proxy-two:8080".to_string()],
        None,
    )
    .await;

    let page = scraper
        .fetch_page("https://www.phoenixmlssearch.com/search?zip=85001")
        .await
        .expect("second identity succeeds");
    assert!(page.body.contains("property-listing"));

    let blocked = ProxyIdentity { url: "http://proxy-one:8080".to_string() };
    assert_eq!(
        proxy_pool.health_of(&blocked),
        Some(ProxyHealth::Probation),
        "threshold failures move the identity to probation"
    );
}

// Captcha page: detect type, solve, inject the token, retry navigation.
#[tokio::test]
async fn captcha_is_solved_and_navigation_retried() {
    let tokens = Arc::new(Mutex::new(Vec::new()));
    let navigations = Arc::new(AtomicUsize::new(0));
    let driver = ScriptedDriver {
        blocked_identities: vec![],
        navigations: Arc::clone(&navigations),
        tokens_submitted: Arc::clone(&tokens),
        captcha_until_solved: true,
    };
    let site_keys = Arc::new(Mutex::new(Vec::new()));
    let solver = Arc::new(FixedSolver { seen_site_keys: Arc::clone(&site_keys) });

    let (scraper, _) = build_scraper(driver, vec![], Some(solver)).await;

    let page = scraper
        .fetch_page("https://www.phoenixmlssearch.com/search?zip=85001")
        .await
        .expect("solved fetch succeeds");
    assert!(page.body.contains("property-listing"));

    assert_eq!(*site_keys.lock().await, vec!["test-site-key-123".to_string()]);
    let submitted = tokens.lock().await;
    assert_eq!(
        *submitted,
        vec![("g-recaptcha-response".to_string(), "captcha-solution-token-456".to_string())]
    );
    assert!(navigations.load(Ordering::SeqCst) >= 2, "navigation retried after the solve");
}

// Captcha with no solver configured is a permission error.
#[tokio::test]
async fn captcha_without_solver_fails_permanently() {
    let driver = ScriptedDriver {
        blocked_identities: vec![],
        navigations: Arc::new(AtomicUsize::new(0)),
        tokens_submitted: Arc::new(Mutex::new(Vec::new())),
        captcha_until_solved: true,
    };
    let (scraper, _) = build_scraper(driver, vec![], None).await;

    let err = scraper
        .fetch_page("https://www.phoenixmlssearch.com/search?zip=85001")
        .await
        .expect_err("no solver available");
    assert_eq!(err.kind(), ErrorKind::Permission);
}
