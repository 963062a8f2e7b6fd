//! Site-specific error classification for the Phoenix MLS scraper.
//!
//! A configured pattern set is matched against (status code, headers, body
//! text, detected CSS selectors, final URL). Within one pattern every
//! non-empty condition group must match; within a group any listed value
//! matches. The pattern set is configuration, not code: patterns can be
//! added and removed at runtime.

use std::time::Duration;

use super::browser::RenderedPage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteErrorKind {
    RateLimit,
    BlockedIp,
    SessionExpired,
    Captcha,
    Maintenance,
    NotFound,
}

impl SiteErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimit => "rate_limit",
            Self::BlockedIp => "blocked_ip",
            Self::SessionExpired => "session_expired",
            Self::Captcha => "captcha",
            Self::Maintenance => "maintenance",
            Self::NotFound => "not_found",
        }
    }
}

/// Header condition: exact value or mere presence.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct HeaderCondition {
    pub name: String,
    /// `None` matches any value
    pub equals: Option<String>,
}

/// One configurable detection rule.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ErrorPattern {
    pub kind: SiteErrorKind,
    pub name: String,
    #[serde(default)]
    pub status_codes: Vec<u16>,
    #[serde(default)]
    pub headers: Vec<HeaderCondition>,
    /// Case-insensitive substrings, any-of
    #[serde(default)]
    pub body_text: Vec<String>,
    /// CSS selectors, any-of
    #[serde(default)]
    pub css_selectors: Vec<String>,
    /// URL substrings, any-of
    #[serde(default)]
    pub url_patterns: Vec<String>,
    pub confidence: f64,
}

impl ErrorPattern {
    pub fn matches(&self, page: &RenderedPage) -> bool {
        if !self.status_codes.is_empty() && !self.status_codes.contains(&page.status) {
            return false;
        }

        if !self.headers.is_empty() {
            let all = self.headers.iter().all(|cond| match page.header(&cond.name) {
                Some(value) => cond.equals.as_deref().is_none_or(|want| value == want),
                None => false,
            });
            if !all {
                return false;
            }
        }

        if !self.body_text.is_empty() {
            let body = page.body.to_ascii_lowercase();
            if !self.body_text.iter().any(|needle| body.contains(&needle.to_ascii_lowercase())) {
                return false;
            }
        }

        if !self.css_selectors.is_empty()
            && !self.css_selectors.iter().any(|sel| page.matches_selector(sel))
        {
            return false;
        }

        if !self.url_patterns.is_empty()
            && !self.url_patterns.iter().any(|p| page.final_url.contains(p.as_str()))
        {
            return false;
        }

        true
    }
}

/// A pattern hit, annotated with whatever the page disclosed.
#[derive(Debug, Clone)]
pub struct DetectedSiteError {
    pub kind: SiteErrorKind,
    pub pattern_name: String,
    pub confidence: f64,
    /// From `Retry-After`, when present
    pub retry_after: Option<Duration>,
    /// e.g. "cloudflare" for blocked_ip hits
    pub block_type: Option<String>,
    /// Where the site sent us, for session_expired hits
    pub redirect_url: Option<String>,
}

/// Recovery decision derived from the detected errors.
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction {
    /// Wait then retry with the same identity (rate_limit, maintenance)
    Wait { duration: Duration, reason: SiteErrorKind },
    /// Rotate the egress identity and retry (blocked_ip)
    SwitchProxy,
    /// Invalidate the stored session, re-authenticate, retry once
    Reauthenticate,
    /// Solve the challenge and retry
    SolveCaptcha,
    /// Permanent; surface to the collector
    Abort { reason: SiteErrorKind },
}

pub struct ErrorDetector {
    patterns: Vec<ErrorPattern>,
}

impl ErrorDetector {
    pub fn new() -> Self {
        Self { patterns: default_patterns() }
    }

    pub fn with_patterns(patterns: Vec<ErrorPattern>) -> Self {
        Self { patterns }
    }

    pub fn add_pattern(&mut self, pattern: ErrorPattern) {
        self.patterns.push(pattern);
    }

    pub fn remove_pattern(&mut self, name: &str) -> bool {
        let before = self.patterns.len();
        self.patterns.retain(|p| p.name != name);
        self.patterns.len() != before
    }

    pub fn patterns_by_kind(&self, kind: SiteErrorKind) -> Vec<&ErrorPattern> {
        self.patterns.iter().filter(|p| p.kind == kind).collect()
    }

    /// Match every configured pattern against the page. Multiple hits are
    /// all returned; the caller picks a recovery via [`suggested_action`].
    ///
    /// [`suggested_action`]: Self::suggested_action
    pub fn detect(&self, page: &RenderedPage) -> Vec<DetectedSiteError> {
        let mut detected = Vec::new();
        for pattern in &self.patterns {
            if !pattern.matches(page) {
                continue;
            }

            let retry_after = page
                .header("retry-after")
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);

            let block_type = (pattern.kind == SiteErrorKind::BlockedIp).then(|| {
                if page.body.to_ascii_lowercase().contains("cloudflare")
                    || page.header("cf-ray").is_some()
                {
                    "cloudflare".to_string()
                } else {
                    "waf".to_string()
                }
            });

            let redirect_url = (pattern.kind == SiteErrorKind::SessionExpired)
                .then(|| page.final_url.clone());

            detected.push(DetectedSiteError {
                kind: pattern.kind,
                pattern_name: pattern.name.clone(),
                confidence: pattern.confidence,
                retry_after,
                block_type,
                redirect_url,
            });
        }
        detected
    }

    /// Pick one recovery for a set of detections. Rate-limit waits win over
    /// captcha solving, which wins over proxy rotation; not_found is
    /// permanent and beaten only by nothing.
    pub fn suggested_action(&self, errors: &[DetectedSiteError]) -> Option<RecoveryAction> {
        if errors.is_empty() {
            return None;
        }

        if let Some(hit) = errors.iter().find(|e| e.kind == SiteErrorKind::RateLimit) {
            return Some(RecoveryAction::Wait {
                duration: hit.retry_after.unwrap_or(Duration::from_secs(60)),
                reason: SiteErrorKind::RateLimit,
            });
        }
        if errors.iter().any(|e| e.kind == SiteErrorKind::Captcha) {
            return Some(RecoveryAction::SolveCaptcha);
        }
        if errors.iter().any(|e| e.kind == SiteErrorKind::BlockedIp) {
            return Some(RecoveryAction::SwitchProxy);
        }
        if errors.iter().any(|e| e.kind == SiteErrorKind::SessionExpired) {
            return Some(RecoveryAction::Reauthenticate);
        }
        if let Some(hit) = errors.iter().find(|e| e.kind == SiteErrorKind::Maintenance) {
            return Some(RecoveryAction::Wait {
                duration: hit.retry_after.unwrap_or(Duration::from_secs(300)),
                reason: SiteErrorKind::Maintenance,
            });
        }
        Some(RecoveryAction::Abort { reason: SiteErrorKind::NotFound })
    }
}

impl Default for ErrorDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// Built-in pattern set for the Phoenix MLS site. Deployments override
/// these through configuration as the site evolves.
fn default_patterns() -> Vec<ErrorPattern> {
    vec![
        ErrorPattern {
            kind: SiteErrorKind::RateLimit,
            name: "rate_limit_429".to_string(),
            status_codes: vec![429],
            headers: vec![],
            body_text: vec![],
            css_selectors: vec![],
            url_patterns: vec![],
            confidence: 0.95,
        },
        ErrorPattern {
            kind: SiteErrorKind::RateLimit,
            name: "rate_limit_body".to_string(),
            status_codes: vec![],
            headers: vec![],
            body_text: vec!["rate limit exceeded".to_string(), "too many requests".to_string()],
            css_selectors: vec![],
            url_patterns: vec![],
            confidence: 0.85,
        },
        ErrorPattern {
            kind: SiteErrorKind::BlockedIp,
            name: "cloudflare_block".to_string(),
            status_codes: vec![403],
            headers: vec![],
            body_text: vec![
                "cloudflare".to_string(),
                "access denied".to_string(),
                "attention required".to_string(),
            ],
            css_selectors: vec![],
            url_patterns: vec![],
            confidence: 0.9,
        },
        ErrorPattern {
            kind: SiteErrorKind::BlockedIp,
            name: "cloudflare_challenge_page".to_string(),
            status_codes: vec![],
            headers: vec![],
            body_text: vec![],
            css_selectors: vec!["#cf-challenge-running".to_string(), "#challenge-form".to_string()],
            url_patterns: vec![],
            confidence: 0.9,
        },
        ErrorPattern {
            kind: SiteErrorKind::SessionExpired,
            name: "login_redirect".to_string(),
            status_codes: vec![],
            headers: vec![],
            body_text: vec![],
            css_selectors: vec![],
            url_patterns: vec!["/login".to_string(), "/signin".to_string(), "/auth/expired".to_string()],
            confidence: 0.9,
        },
        ErrorPattern {
            kind: SiteErrorKind::SessionExpired,
            name: "login_form".to_string(),
            status_codes: vec![],
            headers: vec![],
            body_text: vec![],
            css_selectors: vec![".login-form".to_string(), "form#login".to_string()],
            url_patterns: vec![],
            confidence: 0.8,
        },
        ErrorPattern {
            kind: SiteErrorKind::Captcha,
            name: "recaptcha_widget".to_string(),
            status_codes: vec![],
            headers: vec![],
            body_text: vec![],
            css_selectors: vec![
                ".g-recaptcha".to_string(),
                "#recaptcha".to_string(),
                "iframe[src*='recaptcha']".to_string(),
            ],
            url_patterns: vec![],
            confidence: 0.95,
        },
        ErrorPattern {
            kind: SiteErrorKind::Captcha,
            name: "hcaptcha_widget".to_string(),
            status_codes: vec![],
            headers: vec![],
            body_text: vec![],
            css_selectors: vec![".h-captcha".to_string(), "iframe[src*='hcaptcha']".to_string()],
            url_patterns: vec![],
            confidence: 0.95,
        },
        ErrorPattern {
            kind: SiteErrorKind::Maintenance,
            name: "maintenance_503".to_string(),
            status_codes: vec![503],
            headers: vec![],
            body_text: vec!["maintenance".to_string(), "be back".to_string()],
            css_selectors: vec![],
            url_patterns: vec![],
            confidence: 0.9,
        },
        ErrorPattern {
            kind: SiteErrorKind::NotFound,
            name: "listing_gone".to_string(),
            status_codes: vec![404, 410],
            headers: vec![],
            body_text: vec![],
            css_selectors: vec![],
            url_patterns: vec![],
            confidence: 0.95,
        },
        ErrorPattern {
            kind: SiteErrorKind::NotFound,
            name: "listing_absent_marker".to_string(),
            status_codes: vec![],
            headers: vec![],
            body_text: vec![
                "listing not found".to_string(),
                "no longer available".to_string(),
            ],
            css_selectors: vec![],
            url_patterns: vec![],
            confidence: 0.85,
        },
    ]
}
