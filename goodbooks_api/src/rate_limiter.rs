use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use actix_web::body::MessageBody;
use actix_web::dev::{ServiceRequest, ServiceResponse};
use actix_web::http::header::{HeaderName, HeaderValue};
use actix_web::middleware::Next;
use actix_web::web::Data;
use actix_web::{Error, ResponseError};
use parking_lot::Mutex;

use crate::error::ApiError;

/// Paths that are never limited nor decorated with limit headers
pub const EXEMPT_PATHS: [&str; 3] = ["/healthz", "/metrics", "/apispec/v2"];

const LIMIT_HEADER: &str = "x-ratelimit-limit";
const REMAINING_HEADER: &str = "x-ratelimit-remaining";

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RateLimitDecision {
    Allowed { remaining: usize },
    Limited,
}

#[derive(Default)]
struct RequestLogs {
    logs: HashMap<String, VecDeque<Instant>>,
    last_sweep: Option<Instant>,
}

impl RequestLogs {
    /// Drops keys without a request inside the window, at most once per window
    fn sweep(&mut self, now: Instant, window: Duration) {
        if self
            .last_sweep
            .is_some_and(|last_sweep| now.saturating_duration_since(last_sweep) < window)
        {
            return;
        }
        self.logs.retain(|_, log| {
            log.back()
                .is_some_and(|latest| now.saturating_duration_since(*latest) < window)
        });
        self.last_sweep = Some(now);
    }
}

/// Sliding window log: every key keeps the instants of its accepted requests
/// that are younger than the window
pub struct RateLimiter {
    limit: usize,
    window: Duration,
    requests: Mutex<RequestLogs>,
}

impl RateLimiter {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            requests: Default::default(),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Number of keys currently remembered
    pub fn tracked_keys(&self) -> usize {
        self.requests.lock().logs.len()
    }

    pub fn check(&self, key: &str) -> RateLimitDecision {
        self.check_at(key, Instant::now())
    }

    /// Rejected requests are not recorded, so they do not extend the penalty
    pub fn check_at(&self, key: &str, now: Instant) -> RateLimitDecision {
        let mut requests = self.requests.lock();
        requests.sweep(now, self.window);
        let log = requests.logs.entry(key.to_string()).or_default();
        while log
            .front()
            .is_some_and(|accepted| now.saturating_duration_since(*accepted) >= self.window)
        {
            log.pop_front();
        }

        if log.len() >= self.limit {
            return RateLimitDecision::Limited;
        }
        log.push_back(now);
        RateLimitDecision::Allowed {
            remaining: self.limit - log.len(),
        }
    }
}

/// Limits every (client ip, path) pair, the limiter is taken from app data
pub async fn rate_limit(
    req: ServiceRequest,
    next: Next<impl MessageBody + 'static>,
) -> Result<ServiceResponse<impl MessageBody>, Error> {
    let limiter = req.app_data::<Data<RateLimiter>>().cloned();
    let Some(limiter) = limiter.filter(|_| !EXEMPT_PATHS.contains(&req.path())) else {
        return Ok(next.call(req).await?.map_into_left_body());
    };

    let client_ip = req
        .peer_addr()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let key = format!("{}:{}", client_ip, req.path());

    match limiter.check(&key) {
        RateLimitDecision::Limited => {
            tracing::warn!("Rate limit exceeded for {}", key);
            let response = ApiError::RateLimited(limiter.limit()).error_response();
            Ok(req.into_response(response).map_into_right_body())
        }
        RateLimitDecision::Allowed { remaining } => {
            let mut response = next.call(req).await?;
            let headers = response.headers_mut();
            headers.insert(
                HeaderName::from_static(LIMIT_HEADER),
                HeaderValue::from(limiter.limit()),
            );
            headers.insert(
                HeaderName::from_static(REMAINING_HEADER),
                HeaderValue::from(remaining),
            );
            Ok(response.map_into_left_body())
        }
    }
}
