use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use reqwest::{Response, StatusCode};
use reqwest_retry::{Retryable, default_on_request_success};
use tokio_retry::RetryIf;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tracing::{error, info};

use crate::error::StageClientError;

pub const DEFAULT_MAX_ATTEMPTS: usize = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Outcome of one attempt that did not produce a value.
#[derive(Debug)]
pub enum RetryableReqwestError {
    FatalError(StageClientError),
    RetryableError(StageClientError),
}

/// Sends a backend request and decodes its JSON answer, retrying transient failures with
/// jittered exponential backoff.
pub struct RetryWrapper {
    max_attempts: usize,
    base_delay: Duration,
    api_tag: &'static str,
}

impl RetryWrapper {
    pub fn new(api_tag: &'static str) -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            api_tag,
        }
    }

    /// Number of retries after the first attempt; zero disables retrying.
    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    fn backoff(&self) -> impl Iterator<Item = Duration> + use<> {
        // Doubling from base_delay: 2^n * factor with factor = base_delay / 2.
        let base_ms = self.base_delay.as_millis().min(u64::MAX as u128) as u64;
        ExponentialBackoff::from_millis(2)
            .factor(base_ms.div_ceil(2).max(1))
            .max_delay(MAX_RETRY_DELAY)
            .map(jitter)
            .take(self.max_attempts)
    }

    /// Transient failures are logged at info since they will usually be retried away; a missing
    /// file is an answer about the file rather than a failed call.
    fn log_failure(&self, attempt: usize, context: &str, quiet: bool, err: &dyn std::fmt::Display) {
        let api = self.api_tag;
        let retry = if attempt > 0 { format!(" (retry {attempt})") } else { String::new() };
        if quiet {
            info!("{context}: {api} api call failed{retry}: {err}");
        } else {
            error!("{context}: {api} api call failed{retry}: {err}");
        }
    }

    fn classify_send_error(&self, attempt: usize, err: reqwest_middleware::Error) -> RetryableReqwestError {
        match on_request_failure(&err) {
            Some(Retryable::Transient) => {
                self.log_failure(attempt, "Backend unreachable", true, &err);
                RetryableReqwestError::RetryableError(err.into())
            },
            Some(Retryable::Fatal) | None => {
                self.log_failure(attempt, "Request failed", false, &err);
                RetryableReqwestError::FatalError(err.into())
            },
        }
    }

    fn classify_response(&self, attempt: usize, resp: Response) -> Result<Response, RetryableReqwestError> {
        let retriability = default_on_request_success(&resp);

        match (resp.error_for_status(), retriability) {
            (Ok(resp), _) => {
                info!("Request Success: {} api call succeeded.", self.api_tag);
                Ok(resp)
            },
            (Err(e), Some(Retryable::Transient)) => {
                self.log_failure(attempt, "Backend busy", true, &e);
                Err(RetryableReqwestError::RetryableError(e.into()))
            },
            (Err(e), _) => {
                let not_found = e.status() == Some(StatusCode::NOT_FOUND);
                self.log_failure(attempt, "Backend refused request", not_found, &e);
                Err(RetryableReqwestError::FatalError(e.into()))
            },
        }
    }

    /// Sends the request built by `make_request` and decodes the body as JSON.
    ///
    /// Transient transport errors, retryable statuses (5xx, 429, 408) and truncated or
    /// undecodable bodies restart the whole request, up to `max_attempts` more times.
    pub async fn run_and_extract_json<JsonDest, ReqFn, ReqFut>(
        self,
        make_request: ReqFn,
    ) -> Result<JsonDest, StageClientError>
    where
        JsonDest: for<'de> serde::Deserialize<'de>,
        ReqFn: Fn() -> ReqFut + Send + Sync + 'static,
        ReqFut: Future<Output = Result<Response, reqwest_middleware::Error>> + 'static,
    {
        let strategy = self.backoff();
        let state = Arc::new((self, make_request, AtomicUsize::new(0)));

        let result = RetryIf::start(
            strategy,
            || {
                let state = state.clone();
                async move {
                    let (wrapper, make_request, attempts) = state.as_ref();
                    let sent = make_request().await;
                    let attempt = attempts.fetch_add(1, Ordering::Relaxed);

                    let checked = sent
                        .map_err(|e| wrapper.classify_send_error(attempt, e))
                        .and_then(|resp| wrapper.classify_response(attempt, resp));
                    let resp = match checked {
                        Ok(resp) => resp,
                        Err(e) => return Err(e),
                    };

                    resp.json::<JsonDest>().await.map_err(|e| {
                        // Incomplete or corrupted body, possibly a dropped connection.
                        let retryable = e.is_connect() || e.is_decode() || e.is_body() || e.is_timeout();
                        wrapper.log_failure(attempt, "Unreadable response", retryable, &e);
                        if retryable {
                            RetryableReqwestError::RetryableError(e.into())
                        } else {
                            RetryableReqwestError::FatalError(e.into())
                        }
                    })
                }
            },
            |err: &RetryableReqwestError| matches!(err, RetryableReqwestError::RetryableError(_)),
        )
        .await;

        match result {
            Ok(value) => Ok(value),
            Err(RetryableReqwestError::FatalError(e)) => Err(e),
            Err(RetryableReqwestError::RetryableError(e)) => {
                error!("No more retries; aborting: {e}");
                Err(e)
            },
        }
    }
}

/// Like `reqwest_retry::default_on_request_failure`, but retries all IO errors surfaced through hyper
/// instead of a subset.
pub fn on_request_failure(error: &reqwest_middleware::Error) -> Option<Retryable> {
    let reqwest_middleware::Error::Reqwest(error) = error else {
        return Some(Retryable::Fatal);
    };

    if error.is_timeout() || error.is_connect() {
        Some(Retryable::Transient)
    } else if error.is_body() || error.is_decode() || error.is_builder() || error.is_redirect() {
        Some(Retryable::Fatal)
    } else if error.is_request() {
        // A response cut off halfway or a connection closed by the server is safe to retry.
        match get_source_error_type::<hyper::Error>(error) {
            Some(hyper_error)
                if hyper_error.is_incomplete_message()
                    || hyper_error.is_canceled()
                    || get_source_error_type::<std::io::Error>(hyper_error).is_some() =>
            {
                Some(Retryable::Transient)
            },
            _ => Some(Retryable::Fatal),
        }
    } else {
        None
    }
}

fn get_source_error_type<T: std::error::Error + 'static>(err: &dyn std::error::Error) -> Option<&T> {
    let mut source = err.source();
    while let Some(err) = source {
        if let Some(err) = err.downcast_ref::<T>() {
            return Some(err);
        }
        source = err.source();
    }
    None
}
