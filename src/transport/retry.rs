use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Method, StatusCode};

/// Exponential backoff policy applied by the HTTP transport.
///
/// Attempt `n` (0-based) is followed by a delay of `base_delay * multiplier^n`,
/// capped at `max_delay`. A `Retry-After` header in delta-seconds overrides the
/// computed delay; if it asks for more than `max_delay` the request is not
/// retried at all.
#[derive(Clone, Debug)]
pub(crate) struct RetryConfig {
    pub(crate) max_attempts: u32,
    pub(crate) base_delay: Duration,
    pub(crate) multiplier: f64,
    pub(crate) max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            base_delay: Duration::from_millis(500),
            multiplier: 1.5,
            max_delay: Duration::from_secs(120),
        }
    }
}

/// What an attempt produced, as far as the retry policy cares.
pub(crate) enum Outcome<'a> {
    Status(StatusCode, &'a HeaderMap),
    TransportError,
}

impl RetryConfig {
    /// Disables retries entirely.
    pub(crate) fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub(crate) fn backoff(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    fn is_retryable_status(method: &Method, status: StatusCode) -> bool {
        match status.as_u16() {
            429 | 500 | 503 => true,
            502 | 504 => method == Method::GET,
            _ => false,
        }
    }

    /// Returns the delay before the next attempt, or `None` if the request
    /// should not be retried.
    pub(crate) fn next_delay(
        &self,
        attempt: u32,
        method: &Method,
        outcome: &Outcome<'_>,
    ) -> Option<Duration> {
        if attempt + 1 >= self.max_attempts {
            return None;
        }

        match outcome {
            Outcome::TransportError => Some(self.backoff(attempt)),
            Outcome::Status(status, headers) => {
                if !Self::is_retryable_status(method, *status) {
                    return None;
                }
                match retry_after(headers) {
                    Some(delay) if delay > self.max_delay => None,
                    Some(delay) => Some(delay),
                    None => Some(self.backoff(attempt)),
                }
            }
        }
    }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn backoff_grows_geometrically() {
        let config = RetryConfig::default();
        assert_eq!(config.backoff(0), Duration::from_millis(500));
        assert_eq!(config.backoff(1), Duration::from_millis(750));
        assert_eq!(config.backoff(2), Duration::from_millis(1125));
    }

    #[test]
    fn total_backoff_is_bounded_by_geometric_series() {
        let config = RetryConfig::default();
        let headers = HeaderMap::new();
        let outcome = Outcome::Status(StatusCode::SERVICE_UNAVAILABLE, &headers);

        let mut total = Duration::ZERO;
        let mut retries = 0;
        while let Some(delay) = config.next_delay(retries, &Method::POST, &outcome) {
            total += delay;
            retries += 1;
        }

        assert_eq!(retries, 7, "8 attempts means 7 retries");
        // 0.5 * (1.5^7 - 1) / 0.5
        let bound = Duration::from_secs_f64(0.5 * (1.5f64.powi(7) - 1.0) / 0.5);
        assert!(total <= bound + Duration::from_millis(1));
    }

    #[test]
    fn caps_backoff_at_max_delay() {
        let config = RetryConfig::default();
        assert_eq!(config.backoff(100), config.max_delay);
    }

    #[test]
    fn retries_only_transient_statuses() {
        let config = RetryConfig::default();
        let headers = HeaderMap::new();

        for status in [400, 401, 403, 404, 409] {
            let outcome = Outcome::Status(StatusCode::from_u16(status).unwrap(), &headers);
            assert!(config.next_delay(0, &Method::POST, &outcome).is_none());
            assert!(config.next_delay(0, &Method::GET, &outcome).is_none());
        }
        for status in [429, 500, 503] {
            let outcome = Outcome::Status(StatusCode::from_u16(status).unwrap(), &headers);
            assert!(config.next_delay(0, &Method::POST, &outcome).is_some());
        }

        let bad_gateway = Outcome::Status(StatusCode::BAD_GATEWAY, &headers);
        assert!(config.next_delay(0, &Method::POST, &bad_gateway).is_none());
        assert!(config.next_delay(0, &Method::GET, &bad_gateway).is_some());
        assert!(config
            .next_delay(0, &Method::PATCH, &Outcome::TransportError)
            .is_some());
    }

    #[test]
    fn honours_retry_after() {
        let config = RetryConfig::default();
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("3"));
        let outcome = Outcome::Status(StatusCode::SERVICE_UNAVAILABLE, &headers);
        assert_eq!(
            config.next_delay(0, &Method::POST, &outcome),
            Some(Duration::from_secs(3))
        );

        headers.insert(RETRY_AFTER, HeaderValue::from_static("3600"));
        let outcome = Outcome::Status(StatusCode::SERVICE_UNAVAILABLE, &headers);
        assert_eq!(config.next_delay(0, &Method::POST, &outcome), None);
    }
}
