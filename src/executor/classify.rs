//! HTTP status classification
//!
//! Maps a response status to the action the crawl should take, a suggested
//! retry delay, and whether the response is a rate-limit signal.

use crate::crawler::RetryAction;
use std::time::Duration;

/// What to do with a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseAction {
    Process,
    Retry,
    RetryOnce,
    ThrottleAndRetry,
    Skip,
}

impl ResponseAction {
    /// The retry policy for actions that retry, `None` otherwise
    pub fn retry_action(self) -> Option<RetryAction> {
        match self {
            ResponseAction::Retry => Some(RetryAction::Retry),
            ResponseAction::RetryOnce => Some(RetryAction::RetryOnce),
            ResponseAction::ThrottleAndRetry => Some(RetryAction::ThrottleAndRetry),
            ResponseAction::Process | ResponseAction::Skip => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub action: ResponseAction,
    pub retry_after: Option<Duration>,
    pub rate_limited: bool,
    pub reason: String,
}

impl Classification {
    fn new(
        action: ResponseAction,
        retry_after: Option<u64>,
        rate_limited: bool,
        reason: String,
    ) -> Self {
        Self {
            action,
            retry_after: retry_after.map(Duration::from_secs),
            rate_limited,
            reason,
        }
    }

    /// Replaces the suggested delay, e.g. from a `Retry-After` header
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        if self.action.retry_action().is_some() {
            self.retry_after = Some(retry_after);
        }
        self
    }
}

/// Turns an HTTP status into a `Classification`
pub trait ResponseClassifier: Send + Sync {
    fn classify(&self, status: Option<u16>) -> Classification;
}

/// Default status table
///
/// | Status | Action | Retry after | Rate limited |
/// |--------|--------|-------------|--------------|
/// | none, 2xx, 3xx | process | - | no |
/// | 429, 420, 430 | throttle and retry | 60s | yes |
/// | 403 | throttle and retry | 30s | yes |
/// | 418, 423, 425, 439, 440, 449 | throttle and retry | 45s | yes |
/// | 401, 404 | skip | - | no |
/// | other 4xx | retry once | 10s | no |
/// | 503 | throttle and retry | 45s | yes |
/// | other 5xx | retry | 30s | no |
/// | anything else | skip | - | no |
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusClassifier;

impl ResponseClassifier for StatusClassifier {
    fn classify(&self, status: Option<u16>) -> Classification {
        use ResponseAction::*;

        let Some(code) = status else {
            return Classification::new(
                Process,
                None,
                false,
                "Undetected status code (assuming success)".to_string(),
            );
        };

        match code {
            200..=299 => Classification::new(Process, None, false, format!("Successful response ({})", code)),
            300..=399 => Classification::new(Process, None, false, format!("Redirect ({})", code)),
            429 | 420 | 430 => Classification::new(
                ThrottleAndRetry,
                Some(60),
                true,
                format!("Rate limited ({})", code),
            ),
            403 => Classification::new(
                ThrottleAndRetry,
                Some(30),
                true,
                "Possible rate limiting (403 Forbidden)".to_string(),
            ),
            401 => Classification::new(
                Skip,
                None,
                false,
                "Authentication required (401)".to_string(),
            ),
            404 => Classification::new(Skip, None, false, "Page not found (404)".to_string()),
            418 | 423 | 425 | 439 | 440 | 449 => Classification::new(
                ThrottleAndRetry,
                Some(45),
                true,
                format!("Possible custom rate limiting ({})", code),
            ),
            400..=499 => Classification::new(RetryOnce, Some(10), false, format!("Client error ({})", code)),
            503 => Classification::new(
                ThrottleAndRetry,
                Some(45),
                true,
                "Server overloaded (503)".to_string(),
            ),
            500..=599 => Classification::new(Retry, Some(30), false, format!("Server error ({})", code)),
            _ => Classification::new(Skip, None, false, format!("Unknown status code ({})", code)),
        }
    }
}
