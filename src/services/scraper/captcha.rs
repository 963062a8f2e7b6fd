//! Captcha detection and solving.
//!
//! Detection identifies the challenge type and extracts the site key or
//! image URL from the rendered page. Solving goes through the pluggable
//! [`CaptchaSolver`] trait; the bundled implementation talks to an
//! external HTTP solver service (submit, then poll for the token with a
//! bounded total wait). Solves count against an hourly budget.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use super::browser::RenderedPage;
use crate::config::CaptchaConfig;
use crate::utils::IngestError;

/// Form field the reCAPTCHA token is injected into.
pub const RECAPTCHA_RESPONSE_FIELD: &str = "g-recaptcha-response";
pub const HCAPTCHA_RESPONSE_FIELD: &str = "h-captcha-response";

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptchaType {
    RecaptchaV2,
    RecaptchaV3,
    HCaptcha,
    Image,
}

impl CaptchaType {
    pub fn response_field(&self) -> &'static str {
        match self {
            Self::RecaptchaV2 | Self::RecaptchaV3 => RECAPTCHA_RESPONSE_FIELD,
            Self::HCaptcha => HCAPTCHA_RESPONSE_FIELD,
            Self::Image => "captcha_solution",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CaptchaChallenge {
    pub captcha_type: CaptchaType,
    pub site_key: Option<String>,
    pub image_url: Option<String>,
    pub page_url: String,
}

#[derive(Debug, Clone)]
pub struct CaptchaSolution {
    pub token: String,
    pub captcha_type: CaptchaType,
    pub solved_at: DateTime<Utc>,
}

/// Identify the challenge on a page, if any.
pub fn detect_challenge(page: &RenderedPage) -> Option<CaptchaChallenge> {
    // reCAPTCHA v3 runs headless via grecaptcha.execute; check before v2
    // because both load the same script.
    if page.body.contains("grecaptcha.execute") {
        let site_key = page
            .select_attr(".g-recaptcha", "data-sitekey")
            .or_else(|| extract_render_key(&page.body));
        return Some(CaptchaChallenge {
            captcha_type: CaptchaType::RecaptchaV3,
            site_key,
            image_url: None,
            page_url: page.final_url.clone(),
        });
    }

    if page.matches_selector(".g-recaptcha") || page.matches_selector("iframe[src*='recaptcha']") {
        return Some(CaptchaChallenge {
            captcha_type: CaptchaType::RecaptchaV2,
            site_key: page.select_attr(".g-recaptcha", "data-sitekey"),
            image_url: None,
            page_url: page.final_url.clone(),
        });
    }

    if page.matches_selector(".h-captcha") || page.matches_selector("iframe[src*='hcaptcha']") {
        return Some(CaptchaChallenge {
            captcha_type: CaptchaType::HCaptcha,
            site_key: page.select_attr(".h-captcha", "data-sitekey"),
            image_url: None,
            page_url: page.final_url.clone(),
        });
    }

    if page.matches_selector("img.captcha-image, img[src*='captcha']") {
        return Some(CaptchaChallenge {
            captcha_type: CaptchaType::Image,
            site_key: None,
            image_url: page.select_attr("img.captcha-image, img[src*='captcha']", "src"),
            page_url: page.final_url.clone(),
        });
    }

    None
}

/// `grecaptcha.render('container', {sitekey: '...'})` style embeds.
fn extract_render_key(body: &str) -> Option<String> {
    let idx = body.find("sitekey")?;
    let rest = &body[idx..];
    let start = rest.find(['\'', '"'])? + 1;
    let rest = &rest[start..];
    let end = rest.find(['\'', '"'])?;
    let key = &rest[..end];
    (!key.is_empty()).then(|| key.to_string())
}

// ============================================================================
// Solver
// ============================================================================

#[async_trait]
pub trait CaptchaSolver: Send + Sync {
    async fn solve(&self, challenge: &CaptchaChallenge) -> Result<CaptchaSolution, IngestError>;
}

/// Client for a 2captcha-style HTTP solver service.
pub struct HttpCaptchaSolver {
    client: reqwest::Client,
    service: String,
    api_key: String,
    total_timeout: Duration,
    poll_interval: Duration,
}

impl HttpCaptchaSolver {
    pub fn new(config: &CaptchaConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            service: config.service.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            total_timeout: Duration::from_secs(config.timeout_seconds),
            poll_interval: Duration::from_secs(5),
        }
    }
}

#[derive(serde::Deserialize)]
struct SolverResponse {
    status: u8,
    request: String,
}

#[async_trait]
impl CaptchaSolver for HttpCaptchaSolver {
    async fn solve(&self, challenge: &CaptchaChallenge) -> Result<CaptchaSolution, IngestError> {
        let method = match challenge.captcha_type {
            CaptchaType::RecaptchaV2 => "userrecaptcha",
            CaptchaType::RecaptchaV3 => "userrecaptcha",
            CaptchaType::HCaptcha => "hcaptcha",
            CaptchaType::Image => "base64",
        };

        let mut submit = vec![
            ("key".to_string(), self.api_key.clone()),
            ("method".to_string(), method.to_string()),
            ("pageurl".to_string(), challenge.page_url.clone()),
            ("json".to_string(), "1".to_string()),
        ];
        if let Some(site_key) = &challenge.site_key {
            submit.push(("googlekey".to_string(), site_key.clone()));
        }
        if let Some(image_url) = &challenge.image_url {
            submit.push(("imgurl".to_string(), image_url.clone()));
        }

        let response: SolverResponse = self
            .client
            .post(format!("{}/in.php", self.service))
            .form(&submit)
            .send()
            .await
            .map_err(IngestError::from)?
            .json()
            .await
            .map_err(IngestError::from)?;

        if response.status != 1 {
            return Err(IngestError::extraction(format!(
                "captcha solver rejected submission: {}",
                response.request
            )));
        }
        let request_id = response.request;

        // Poll for the token with a bounded total wait.
        let deadline = Instant::now() + self.total_timeout;
        loop {
            tokio::time::sleep(self.poll_interval).await;
            if Instant::now() >= deadline {
                return Err(IngestError::timeout("captcha solve exceeded budget"));
            }

            let poll: SolverResponse = self
                .client
                .get(format!("{}/res.php", self.service))
                .query(&[
                    ("key", self.api_key.as_str()),
                    ("action", "get"),
                    ("id", request_id.as_str()),
                    ("json", "1"),
                ])
                .send()
                .await
                .map_err(IngestError::from)?
                .json()
                .await
                .map_err(IngestError::from)?;

            if poll.status == 1 {
                return Ok(CaptchaSolution {
                    token: poll.request,
                    captcha_type: challenge.captcha_type,
                    solved_at: Utc::now(),
                });
            }
            if poll.request != "CAPCHA_NOT_READY" {
                return Err(IngestError::extraction(format!(
                    "captcha solver failed: {}",
                    poll.request
                )));
            }
        }
    }
}

// ============================================================================
// Hourly budget
// ============================================================================

/// Sliding one-hour window over solve attempts.
pub struct CaptchaBudget {
    limit: u32,
    attempts: VecDeque<Instant>,
}

impl CaptchaBudget {
    pub fn new(limit: u32) -> Self {
        Self { limit, attempts: VecDeque::new() }
    }

    /// Record an attempt if the budget allows one.
    pub fn try_consume(&mut self) -> bool {
        let now = Instant::now();
        while let Some(front) = self.attempts.front() {
            if now.duration_since(*front) >= Duration::from_secs(3600) {
                self.attempts.pop_front();
            } else {
                break;
            }
        }
        if self.attempts.len() as u32 >= self.limit {
            return false;
        }
        self.attempts.push_back(now);
        true
    }

    pub fn used(&self) -> usize {
        self.attempts.len()
    }
}
