//! Role-weighted, per-identity rate limiting.
//!
//! Fixed windows: each identity key gets a counter that resets `window`
//! after its first request. A burst straddling a window boundary can
//! therefore see up to twice the nominal limit.
//!
//! Locking: the map is behind an `RwLock` (read for lookup, write only to
//! insert or sweep) and each counter has its own `Mutex`, so requests for
//! different identities never wait on each other.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use axum::{
    Json,
    extract::{ConnectInfo, Request, State},
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    middleware::Next,
    response::{IntoResponse, Response},
};
use classgate_core::{RateLimitConfig, Role};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::auth::Identity;

#[derive(Debug)]
struct RateCounter {
    count: u32,
    reset_at: Instant,
    /// Set by `sweep` when the entry leaves the map.
    retired: bool,
}

impl RateCounter {
    fn lock(counter: &Mutex<Self>) -> MutexGuard<'_, Self> {
        counter.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&mut self, now: Instant, window: Duration, limit: u32) -> bool {
        if now >= self.reset_at {
            self.count = 1;
            self.reset_at = now + window;
            return true;
        }

        if self.count < limit {
            self.count += 1;
            true
        } else {
            false
        }
    }
}

/// Fixed-window request counter keyed by identity.
#[derive(Debug)]
pub struct IdentityRateLimiter {
    window: Duration,
    entries: RwLock<HashMap<String, Arc<Mutex<RateCounter>>>>,
}

impl IdentityRateLimiter {
    /// Create a limiter with the given window length.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Window length.
    #[must_use]
    pub const fn window(&self) -> Duration {
        self.window
    }

    fn read_entries(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<Mutex<RateCounter>>>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_entries(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<Mutex<RateCounter>>>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count a request for `key` and report whether it is within `limit`.
    pub fn allow(&self, key: &str, limit: u32) -> bool {
        loop {
            let now = Instant::now();
            let Some(counter) = self.counter_for(key, now) else {
                return true;
            };

            let mut counter = RateCounter::lock(&counter);
            // Swept between lookup and lock; count against the live entry.
            if counter.retired {
                continue;
            }
            return counter.record(now, self.window, limit);
        }
    }

    /// Existing counter for `key`, or `None` after inserting a fresh one
    /// that already holds this request.
    fn counter_for(&self, key: &str, now: Instant) -> Option<Arc<Mutex<RateCounter>>> {
        if let Some(counter) = self.read_entries().get(key) {
            return Some(Arc::clone(counter));
        }

        match self.write_entries().entry(key.to_string()) {
            Entry::Occupied(entry) => Some(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(Mutex::new(RateCounter {
                    count: 1,
                    reset_at: now + self.window,
                    retired: false,
                })));
                None
            }
        }
    }

    /// Requests recorded for `key` in its current window (0 if untracked).
    #[must_use]
    pub fn count(&self, key: &str) -> u32 {
        self.read_entries()
            .get(key)
            .map_or(0, |counter| RateCounter::lock(counter).count)
    }

    /// Time until `key`'s window resets, if it is tracked and not yet reset.
    #[must_use]
    pub fn reset_in(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.read_entries()
            .get(key)
            .map(|counter| RateCounter::lock(counter).reset_at)
            .filter(|reset_at| *reset_at > now)
            .map(|reset_at| reset_at - now)
    }

    /// Number of tracked identities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read_entries().len()
    }

    /// Whether no identity is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read_entries().is_empty()
    }

    /// Drop every counter whose window has elapsed. Returns how many.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.write_entries();
        let before = entries.len();
        entries.retain(|_, counter| {
            let mut counter = RateCounter::lock(counter);
            counter.retired = counter.reset_at <= now;
            !counter.retired
        });
        before - entries.len()
    }

    /// Run [`Self::sweep`] every `interval` until the handle is stopped.
    #[must_use]
    pub fn start_sweeper(self: &Arc<Self>, interval: Duration) -> SweeperHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let limiter = Arc::clone(self);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = limiter.sweep();
                        if removed > 0 {
                            tracing::debug!(removed, remaining = limiter.len(), "Swept rate limit counters");
                        }
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        tracing::info!(interval = ?interval, "Rate limit sweeper started");
        SweeperHandle {
            stop: stop_tx,
            task,
        }
    }
}

/// Handle to the background sweep task.
#[derive(Debug)]
pub struct SweeperHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Signal the sweeper and wait for it to exit.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "Rate limit sweeper ended abnormally");
        }
        tracing::info!("Rate limit sweeper stopped");
    }
}

/// Per-window request ceilings by role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleQuotas {
    /// Admin ceiling.
    pub admin: u32,
    /// Teacher ceiling.
    pub teacher: u32,
    /// Student ceiling.
    pub student: u32,
    /// Anonymous or unrecognized callers.
    pub default: u32,
}

impl RoleQuotas {
    /// Ceiling for a role; no role gets the default.
    #[must_use]
    pub const fn limit_for(&self, role: Option<Role>) -> u32 {
        match role {
            Some(Role::Admin) => self.admin,
            Some(Role::Teacher) => self.teacher,
            Some(Role::Student) => self.student,
            None => self.default,
        }
    }

    /// Ceiling for a role name; unknown names get the default.
    #[must_use]
    pub fn limit_for_role_str(&self, role: &str) -> u32 {
        self.limit_for(role.parse().ok())
    }
}

impl From<&RateLimitConfig> for RoleQuotas {
    fn from(config: &RateLimitConfig) -> Self {
        Self {
            admin: config.admin,
            teacher: config.teacher,
            student: config.student,
            default: config.default,
        }
    }
}

/// Limiter state for the [`rate_limit`] middleware.
#[derive(Debug, Clone)]
pub struct RateLimitState {
    /// Shared counters.
    pub limiter: Arc<IdentityRateLimiter>,
    /// Role ceilings.
    pub quotas: RoleQuotas,
}

/// Counter key: `user:{id}` when authenticated, else `ip:{addr}`.
fn identity_key(identity: Option<&Identity>, peer: Option<&ConnectInfo<SocketAddr>>) -> String {
    match (identity, peer) {
        (Some(identity), _) => format!("user:{}", identity.user_id),
        (None, Some(ConnectInfo(addr))) => format!("ip:{}", addr.ip()),
        (None, None) => "ip:unknown".to_string(),
    }
}

#[derive(Debug, Serialize)]
struct RateLimitedResponse {
    error: String,
    code: &'static str,
    limit: u32,
    window_secs: u64,
}

/// Reject requests over the caller's quota with 429. Runs after the auth
/// layers so authenticated callers are keyed and weighted by identity.
pub async fn rate_limit(
    State(state): State<RateLimitState>,
    request: Request,
    next: Next,
) -> Response {
    let identity = request.extensions().get::<Identity>();
    let key = identity_key(identity, request.extensions().get::<ConnectInfo<SocketAddr>>());
    let limit = state.quotas.limit_for(identity.map(|i| i.role));

    if state.limiter.allow(&key, limit) {
        return next.run(request).await;
    }

    tracing::debug!(key = %key, limit, "Rate limited");

    let window = state.limiter.window();
    let retry_after = state
        .limiter
        .reset_in(&key)
        .unwrap_or(window)
        .as_secs()
        .max(1);

    let body = RateLimitedResponse {
        error: "rate limit exceeded".to_string(),
        code: "rate_limited",
        limit,
        window_secs: window.as_secs(),
    };

    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    response
        .headers_mut()
        .insert(RETRY_AFTER, HeaderValue::from(retry_after));
    response
}
