//! Browser driving seam for the anti-bot scraper.
//!
//! The scraper is written against [`BrowserDriver`]/[`BrowserContext`] so a
//! headless-browser integration can be dropped in without touching the
//! error-recovery logic. The default [`HttpBrowser`] drives plain HTTPS
//! with per-identity proxies, manual redirect following, cookie session
//! reuse, and a rotated desktop user-agent profile.

use async_trait::async_trait;
use rand::seq::SliceRandom;
use reqwest::header::{HeaderMap, HeaderValue};
use scraper::{Html, Selector};
use std::collections::HashMap;
use std::time::Duration;

use crate::services::proxy_pool::ProxyIdentity;
use crate::services::session_store::{SessionArtifacts, StoredCookie};
use crate::utils::IngestError;

const MAX_REDIRECTS: usize = 10;

/// Desktop profiles rotated across contexts.
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:126.0) Gecko/20100101 Firefox/126.0",
];

/// A fetched page as observed by the scraper.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub status: u16,
    /// Lowercased header names
    pub headers: HashMap<String, String>,
    pub body: String,
    /// URL after redirects
    pub final_url: String,
}

impl RenderedPage {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// True when the document contains an element matching `selector`.
    /// Unparseable selectors never match.
    pub fn matches_selector(&self, selector: &str) -> bool {
        let Ok(parsed) = Selector::parse(selector) else {
            return false;
        };
        Html::parse_document(&self.body).select(&parsed).next().is_some()
    }

    /// Outer HTML of every element matching `selector`.
    pub fn select_fragments(&self, selector: &str) -> Vec<String> {
        let Ok(parsed) = Selector::parse(selector) else {
            return Vec::new();
        };
        Html::parse_document(&self.body).select(&parsed).map(|el| el.html()).collect()
    }

    /// First `attr` value among elements matching `selector`.
    pub fn select_attr(&self, selector: &str, attr: &str) -> Option<String> {
        let parsed = Selector::parse(selector).ok()?;
        Html::parse_document(&self.body)
            .select(&parsed)
            .find_map(|el| el.value().attr(attr).map(str::to_string))
    }
}

/// One isolated browsing context; contexts are never shared between
/// in-flight fetches.
#[async_trait]
pub trait BrowserContext: Send {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<RenderedPage, IngestError>;

    /// Submit a solved captcha token back to the site (e.g. the
    /// `g-recaptcha-response` form field) and return the resulting page.
    async fn submit_captcha_token(
        &mut self,
        url: &str,
        field: &str,
        token: &str,
        timeout: Duration,
    ) -> Result<RenderedPage, IngestError>;

    /// Export cookies/storage for persistence.
    fn session_artifacts(&self) -> SessionArtifacts;

    /// Best-effort clean abort.
    async fn close(&mut self);
}

#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn open_context(
        &self,
        identity: Option<&ProxyIdentity>,
        session: Option<&SessionArtifacts>,
    ) -> Result<Box<dyn BrowserContext>, IngestError>;
}

// ============================================================================
// Default HTTP implementation
// ============================================================================

pub struct HttpBrowser;

impl HttpBrowser {
    pub fn new() -> Self {
        Self
    }
}

impl Default for HttpBrowser {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrowserDriver for HttpBrowser {
    async fn open_context(
        &self,
        identity: Option<&ProxyIdentity>,
        session: Option<&SessionArtifacts>,
    ) -> Result<Box<dyn BrowserContext>, IngestError> {
        let user_agent =
            *USER_AGENTS.choose(&mut rand::thread_rng()).expect("user agent list is non-empty");

        let mut headers = HeaderMap::new();
        headers.insert(
            "Accept",
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert("Accept-Language", HeaderValue::from_static("en-US,en;q=0.9"));
        headers.insert("Upgrade-Insecure-Requests", HeaderValue::from_static("1"));

        let mut builder = reqwest::Client::builder()
            .user_agent(user_agent)
            .default_headers(headers)
            // Redirects are followed manually so Set-Cookie headers and the
            // final URL stay observable.
            .redirect(reqwest::redirect::Policy::none());

        if let Some(identity) = identity {
            let proxy = reqwest::Proxy::all(identity.url.as_str())
                .map_err(|e| IngestError::internal(format!("invalid proxy url: {e}")))?;
            builder = builder.proxy(proxy);
        }

        let client = builder.build().map_err(IngestError::from)?;

        let cookies = session
            .map(|s| {
                s.cookies.iter().map(|c| (c.name.clone(), c.clone())).collect::<HashMap<_, _>>()
            })
            .unwrap_or_default();

        Ok(Box::new(HttpBrowserContext { client, cookies, storage: None }))
    }
}

struct HttpBrowserContext {
    client: reqwest::Client,
    /// Cookie jar keyed by cookie name; the site sees one continuous visitor
    cookies: HashMap<String, StoredCookie>,
    storage: Option<serde_json::Value>,
}

impl HttpBrowserContext {
    fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        let joined = self
            .cookies
            .values()
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>()
            .join("; ");
        Some(joined)
    }

    fn absorb_cookies(&mut self, url: &reqwest::Url, response: &reqwest::Response) {
        for value in response.headers().get_all(reqwest::header::SET_COOKIE) {
            let Ok(raw) = value.to_str() else { continue };
            let pair = raw.split_once(';').map_or(raw, |(pair, _attrs)| pair);
            let Some((name, value)) = pair.split_once('=') else { continue };
            let name = name.trim().to_string();
            self.cookies.insert(
                name.clone(),
                StoredCookie {
                    name,
                    value: value.trim().to_string(),
                    domain: url.host_str().unwrap_or_default().to_string(),
                    path: "/".to_string(),
                    secure: url.scheme() == "https",
                },
            );
        }
    }

    async fn request(
        &mut self,
        method: reqwest::Method,
        url: &str,
        form: Option<&[(String, String)]>,
        timeout: Duration,
    ) -> Result<RenderedPage, IngestError> {
        let mut current = reqwest::Url::parse(url)
            .map_err(|e| IngestError::validation(format!("invalid url {url}: {e}")))?;
        let mut method = method;
        let mut form = form.map(<[(String, String)]>::to_vec);

        for _ in 0..=MAX_REDIRECTS {
            let mut request = self.client.request(method.clone(), current.clone()).timeout(timeout);
            if let Some(cookie) = self.cookie_header() {
                request = request.header(reqwest::header::COOKIE, cookie);
            }
            if let Some(fields) = &form {
                request = request.form(fields);
            }

            let response = request.send().await.map_err(IngestError::from)?;
            self.absorb_cookies(&current, &response);

            let status = response.status();
            if status.is_redirection() {
                let Some(location) = response
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                else {
                    break;
                };
                current = current
                    .join(location)
                    .map_err(|e| IngestError::parsing(format!("bad redirect target: {e}")))?;
                // Redirected requests downgrade to GET, like a browser.
                method = reqwest::Method::GET;
                form = None;
                continue;
            }

            let headers = response
                .headers()
                .iter()
                .map(|(k, v)| {
                    (k.as_str().to_ascii_lowercase(), v.to_str().unwrap_or_default().to_string())
                })
                .collect();
            let final_url = response.url().to_string();
            let body = response.text().await.map_err(IngestError::from)?;

            return Ok(RenderedPage { status: status.as_u16(), headers, body, final_url });
        }

        Err(IngestError::network(format!("redirect loop fetching {url}")))
    }
}

#[async_trait]
impl BrowserContext for HttpBrowserContext {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<RenderedPage, IngestError> {
        self.request(reqwest::Method::GET, url, None, timeout).await
    }

    async fn submit_captcha_token(
        &mut self,
        url: &str,
        field: &str,
        token: &str,
        timeout: Duration,
    ) -> Result<RenderedPage, IngestError> {
        let form = vec![(field.to_string(), token.to_string())];
        self.request(reqwest::Method::POST, url, Some(&form), timeout).await
    }

    fn session_artifacts(&self) -> SessionArtifacts {
        SessionArtifacts {
            cookies: self.cookies.values().cloned().collect(),
            storage: self.storage.clone(),
        }
    }

    async fn close(&mut self) {
        // Dropping the reqwest client aborts in-flight connections.
        self.cookies.clear();
    }
}
