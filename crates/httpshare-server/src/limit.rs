use std::sync::{Arc, Mutex, PoisonError};

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{info, warn};

use crate::tofc::remote_addr;

/// Per-endpoint quota on the number of requests that reach the inner handler.
///
/// The counter only grows; once it reaches the limit the endpoint stays
/// closed for the rest of the process.
#[derive(Debug)]
pub struct RequestLimiter {
    endpoint: String,
    limit: u64,
    count: Mutex<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitReached;

impl RequestLimiter {
    /// A negative `limit` means unlimited, in which case no limiter is built.
    pub fn new(endpoint: impl Into<String>, limit: i64) -> Option<Self> {
        let limit = u64::try_from(limit).ok()?;
        Some(Self {
            endpoint: endpoint.into(),
            limit,
            count: Mutex::new(0),
        })
    }

    /// Check-and-increment under the endpoint lock. Returns the new count.
    pub fn try_acquire(&self) -> Result<u64, LimitReached> {
        let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        if *count >= self.limit {
            return Err(LimitReached);
        }
        *count += 1;
        Ok(*count)
    }

    pub fn count(&self) -> u64 {
        *self.count.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Axum middleware enforcing a [`RequestLimiter`]. The lock is released
/// before the inner handler runs.
pub async fn limit_requests(
    State(limiter): State<Arc<RequestLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    match limiter.try_acquire() {
        Ok(count) => {
            info!(
                endpoint = %limiter.endpoint,
                count,
                limit = limiter.limit,
                "request count"
            );
            next.run(request).await
        }
        Err(LimitReached) => {
            let client = remote_addr(&request)
                .map(|a| a.to_string())
                .unwrap_or_else(|| "unknown".into());
            warn!(endpoint = %limiter.endpoint, %client, "request blocked: limit reached");
            (StatusCode::UNAUTHORIZED, "Limit reached.").into_response()
        }
    }
}
