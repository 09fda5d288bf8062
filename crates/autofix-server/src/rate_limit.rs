//! Fixed-window request limiter shared by all HTTP routes.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use crate::error::ServerError;

const WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct Window {
    started: Instant,
    count: u32,
}

/// Allows at most `limit` requests per window across all clients. A limit
/// of zero disables the check.
#[derive(Debug)]
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    state: Mutex<Window>,
}

impl RateLimiter {
    pub fn per_minute(limit: u32) -> Self {
        Self::with_window(limit, WINDOW)
    }

    pub fn with_window(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            state: Mutex::new(Window {
                started: Instant::now(),
                count: 0,
            }),
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Counts one request and reports whether it fits in the current window.
    pub fn try_acquire(&self) -> bool {
        if self.limit == 0 {
            return true;
        }

        let mut window = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if window.started.elapsed() >= self.window {
            window.started = Instant::now();
            window.count = 0;
        }

        if window.count >= self.limit {
            return false;
        }
        window.count += 1;
        true
    }
}

pub async fn rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Result<Response, ServerError> {
    if !limiter.try_acquire() {
        log::warn!(
            "Rejecting {} {}: more than {} requests this minute",
            request.method(),
            request.uri(),
            limiter.limit()
        );
        return Err(ServerError::RateLimited);
    }
    Ok(next.run(request).await)
}
