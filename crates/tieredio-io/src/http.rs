//! Blocking HTTP client used by URL sources.
//!
//! Transport failures and 5xx answers are retried with exponential backoff;
//! 4xx answers are final. Cancellation is checked before every attempt and
//! while backing off.

use std::io::Read;
use std::time::Duration;

use tieredio_core::cancel::CancelScope;
use tieredio_core::config::{HttpConfig, RetryConfig};
use tieredio_core::error::{Error, Result, SourceErrorKind};
use url::Url;

/// An opened response body.
pub struct HttpBody {
    pub reader: Box<dyn Read + Send + Sync + 'static>,
    /// From `Content-Length`, when the server reported one.
    pub len: Option<u64>,
}

#[derive(Clone)]
pub struct HttpClient {
    agent: ureq::Agent,
    retry: RetryConfig,
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new(&HttpConfig::default())
    }
}

impl HttpClient {
    pub fn new(cfg: &HttpConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_millis(cfg.connect_timeout_ms))
            .timeout_read(Duration::from_millis(cfg.read_timeout_ms))
            .user_agent(&cfg.user_agent)
            .build();
        Self {
            agent,
            retry: cfg.retry.clone(),
        }
    }

    /// Issue a GET and return the body stream once the status line is in.
    pub fn get(&self, url: &str, scope: &CancelScope) -> Result<HttpBody> {
        let parsed = Url::parse(url).map_err(|e| {
            Error::source_open(url, SourceErrorKind::Other(format!("invalid url: {e}")))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::source_open(
                url,
                SourceErrorKind::Other(format!("unsupported scheme '{}'", parsed.scheme())),
            ));
        }

        let mut attempt = 0usize;
        let mut backoff = self.retry.initial_backoff();

        loop {
            scope.check()?;

            let mut request = self.agent.request_url("GET", &parsed);
            if let Some(remaining) = scope.remaining() {
                request = request.timeout(remaining);
            }

            let kind = match request.call() {
                Ok(response) => {
                    let len = response
                        .header("Content-Length")
                        .and_then(|v| v.trim().parse::<u64>().ok());
                    tracing::debug!(url, status = response.status(), len, "opened url source");
                    return Ok(HttpBody {
                        reader: response.into_reader(),
                        len,
                    });
                }
                Err(ureq::Error::Status(status, _)) => SourceErrorKind::Remote { status },
                Err(ureq::Error::Transport(t)) => SourceErrorKind::Transport(t.to_string()),
            };

            // A deadline that fired mid-request surfaces as a transport timeout.
            scope.check()?;

            if attempt >= self.retry.max_retries || !is_retryable(&kind) {
                return Err(Error::source_open(url, kind));
            }
            attempt += 1;
            tracing::warn!(url, attempt, error = %kind, "retrying url source");
            scope.sleep(backoff)?;
            backoff = std::cmp::min(backoff * 2, self.retry.max_backoff());
        }
    }
}

fn is_retryable(kind: &SourceErrorKind) -> bool {
    match kind {
        SourceErrorKind::Transport(_) => true,
        SourceErrorKind::Remote { status } => *status >= 500,
        _ => false,
    }
}
