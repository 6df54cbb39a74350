//! Per-user fixed-window rate limiting.
//!
//! Same contract the original redis-backed limiter satisfied (count
//! requests per identity per window, reject with a retry-after hint), but
//! the windows live in process memory; hub state is single-process anyway.

use crate::auth::AuthUser;
use crate::{metrics, AppState};
use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::warn;

struct Window {
    started: Instant,
    count: u64,
}

/// Fixed-window request limiter keyed by user id.
pub struct RateLimiter {
    windows: DashMap<i64, Window>,
    max_requests: u64,
    window: Duration,
}

impl RateLimiter {
    /// Create a limiter allowing `max_requests` per `window`.
    #[must_use]
    pub fn new(max_requests: u64, window: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            max_requests,
            window,
        }
    }

    /// Count one request against `key` and decide whether it may proceed.
    pub fn allow(&self, key: i64) -> bool {
        let mut entry = self.windows.entry(key).or_insert_with(|| Window {
            started: Instant::now(),
            count: 0,
        });
        if entry.started.elapsed() >= self.window {
            entry.started = Instant::now();
            entry.count = 0;
        }
        entry.count += 1;
        entry.count <= self.max_requests
    }

    /// Seconds a rejected caller should wait before retrying.
    #[must_use]
    pub fn retry_after_secs(&self) -> u64 {
        self.window.as_secs()
    }
}

/// Reject requests from users over their window budget.
pub async fn enforce(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(limiter) = state.limiter.as_ref() else {
        return next.run(req).await;
    };
    // Runs behind the auth layer; anything without an identity passes
    // through untouched.
    let Some(user) = req.extensions().get::<AuthUser>() else {
        return next.run(req).await;
    };

    if limiter.allow(user.id) {
        next.run(req).await
    } else {
        metrics::record_rate_limited();
        warn!(user = %user.name, "rate limited");
        (
            StatusCode::TOO_MANY_REQUESTS,
            [(header::RETRY_AFTER, limiter.retry_after_secs().to_string())],
            "rate limit exceeded",
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_max_then_rejects() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        assert!(limiter.allow(1));
        assert!(limiter.allow(1));
        assert!(limiter.allow(1));
        assert!(!limiter.allow(1));

        // Other identities have their own window.
        assert!(limiter.allow(2));
    }

    #[tokio::test]
    async fn window_expiry_resets_the_count() {
        let limiter = RateLimiter::new(1, Duration::from_millis(20));
        assert!(limiter.allow(1));
        assert!(!limiter.allow(1));

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(limiter.allow(1));
    }

    #[test]
    fn retry_after_matches_window() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        assert_eq!(limiter.retry_after_secs(), 60);
    }
}
