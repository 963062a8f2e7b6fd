//! Rotating pool of upstream egress identities with health scoring.
//!
//! Identities move between tiers from observed outcomes: consecutive
//! failures past the threshold put one on probation, continued failures
//! ban it for a cooldown, after which it re-enters probation. Acquisition
//! is round-robin within the best non-empty tier.

use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyHealth {
    Healthy,
    Probation,
    Banned,
}

/// Outcome of one request made through an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyOutcome {
    Success,
    /// Transport-level failure (connect error, timeout)
    Failure,
    /// The site recognized and blocked this identity
    Blocked,
}

/// Handle returned by [`ProxyPool::acquire`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyIdentity {
    pub url: String,
}

#[derive(Debug)]
struct IdentityState {
    url: String,
    health: ProxyHealth,
    /// Exponentially-weighted success rate, used to rank within a tier
    score: f64,
    consecutive_failures: u32,
    banned_until: Option<Instant>,
    successes: u64,
    failures: u64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ProxyStatus {
    pub url: String,
    pub health: ProxyHealth,
    pub score: f64,
    pub successes: u64,
    pub failures: u64,
}

pub struct ProxyPool {
    entries: RwLock<Vec<IdentityState>>,
    cursor: AtomicUsize,
    health_threshold: u32,
    cooldown: Duration,
}

impl ProxyPool {
    pub fn new(proxies: Vec<String>, health_threshold: u32, cooldown: Duration) -> Self {
        let entries = proxies
            .into_iter()
            .map(|url| IdentityState {
                url,
                health: ProxyHealth::Healthy,
                score: 1.0,
                consecutive_failures: 0,
                banned_until: None,
                successes: 0,
                failures: 0,
            })
            .collect();

        Self {
            entries: RwLock::new(entries),
            cursor: AtomicUsize::new(0),
            health_threshold: health_threshold.max(1),
            cooldown,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().expect("proxy lock").is_empty()
    }

    /// Best-ranked identity: round-robin over the healthy tier, falling
    /// back to probation. `None` when the pool is empty or every identity
    /// is banned and still cooling down.
    pub fn acquire(&self) -> Option<ProxyIdentity> {
        let mut entries = self.entries.write().expect("proxy lock");
        if entries.is_empty() {
            return None;
        }

        // Cooldown expiry: banned identities get another chance on probation.
        let now = Instant::now();
        for entry in entries.iter_mut() {
            if entry.health == ProxyHealth::Banned
                && entry.banned_until.is_some_and(|until| now >= until)
            {
                entry.health = ProxyHealth::Probation;
                entry.banned_until = None;
                entry.consecutive_failures = 0;
                tracing::info!(proxy = %entry.url, "ban cooldown expired, probation");
            }
        }

        for tier in [ProxyHealth::Healthy, ProxyHealth::Probation] {
            let candidates: Vec<usize> = entries
                .iter()
                .enumerate()
                .filter(|(_, e)| e.health == tier)
                .map(|(i, _)| i)
                .collect();
            if candidates.is_empty() {
                continue;
            }
            let offset = self.cursor.fetch_add(1, Ordering::Relaxed);
            let chosen = candidates[offset % candidates.len()];
            return Some(ProxyIdentity { url: entries[chosen].url.clone() });
        }
        None
    }

    /// Record the outcome of a request made through `identity`.
    pub fn report(&self, identity: &ProxyIdentity, outcome: ProxyOutcome) {
        let mut entries = self.entries.write().expect("proxy lock");
        let Some(entry) = entries.iter_mut().find(|e| e.url == identity.url) else {
            return;
        };

        match outcome {
            ProxyOutcome::Success => {
                entry.successes += 1;
                entry.consecutive_failures = 0;
                entry.score = entry.score * 0.9 + 0.1;
                if entry.health == ProxyHealth::Probation {
                    entry.health = ProxyHealth::Healthy;
                    tracing::info!(proxy = %entry.url, "probation cleared");
                }
            }
            ProxyOutcome::Failure | ProxyOutcome::Blocked => {
                entry.failures += 1;
                entry.consecutive_failures += 1;
                entry.score *= if outcome == ProxyOutcome::Blocked { 0.5 } else { 0.9 };

                if entry.consecutive_failures >= self.health_threshold * 2 {
                    entry.health = ProxyHealth::Banned;
                    entry.banned_until = Some(Instant::now() + self.cooldown);
                    tracing::warn!(proxy = %entry.url, cooldown_seconds = self.cooldown.as_secs(),
                        "identity banned");
                } else if entry.consecutive_failures >= self.health_threshold {
                    entry.health = ProxyHealth::Probation;
                    tracing::warn!(proxy = %entry.url,
                        failures = entry.consecutive_failures, "identity on probation");
                }
            }
        }
    }

    /// Snapshot of every identity, for diagnostics.
    pub fn status(&self) -> Vec<ProxyStatus> {
        self.entries
            .read()
            .expect("proxy lock")
            .iter()
            .map(|e| ProxyStatus {
                url: e.url.clone(),
                health: e.health,
                score: e.score,
                successes: e.successes,
                failures: e.failures,
            })
            .collect()
    }

    pub fn health_of(&self, identity: &ProxyIdentity) -> Option<ProxyHealth> {
        self.entries
            .read()
            .expect("proxy lock")
            .iter()
            .find(|e| e.url == identity.url)
            .map(|e| e.health)
    }
}
