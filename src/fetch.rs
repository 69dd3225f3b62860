use crate::error::FetchError;
use rand::Rng;
use reqwest::header::{ACCEPT, HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use reqwest::{Client, StatusCode};
use std::collections::BTreeMap;
use std::io::ErrorKind as IoErrorKind;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (compatible; PlanScraper/1.0; +https://example.com)";
pub const DEFAULT_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

const JITTER_LOW: f64 = 0.8;
const JITTER_HIGH: f64 = 1.2;
// 2^16 * base is already far beyond any sensible retry window.
const MAX_BACKOFF_EXPONENT: u32 = 16;

#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub timeout: Duration,
    pub max_retries: u32,
    pub base_delay: Duration,
    pub headers: BTreeMap<String, String>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            max_retries: 5,
            base_delay: Duration::from_millis(500),
            headers: BTreeMap::new(),
        }
    }
}

/// GET with exponential backoff on transient failures. Cloning is cheap and
/// shares the underlying connection pool.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    options: FetchOptions,
}

enum AttemptError {
    Retryable {
        status: Option<u16>,
        message: String,
    },
    Terminal(FetchError),
}

impl Fetcher {
    pub fn new(options: FetchOptions) -> Result<Self, FetchError> {
        let headers = build_headers(&options.headers)?;
        let client = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(FetchError::Client)?;
        Ok(Self { client, options })
    }

    pub async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let mut attempt = 0u32;

        loop {
            let (status, message) = match self.attempt(url).await {
                Ok(body) => {
                    debug!(%url, attempt = attempt + 1, bytes = body.len(), "fetched page");
                    return Ok(body);
                }
                Err(AttemptError::Terminal(err)) => return Err(err),
                Err(AttemptError::Retryable { status, message }) => (status, message),
            };

            if attempt >= self.options.max_retries {
                return Err(FetchError::Transient {
                    url: url.to_string(),
                    attempts: attempt + 1,
                    status,
                    message,
                });
            }

            let delay = backoff_delay(self.options.base_delay, attempt);
            warn!(
                %url,
                attempt = attempt + 1,
                status = ?status,
                delay_ms = delay.as_millis() as u64,
                error = %message,
                "transient fetch failure; retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn attempt(&self, url: &str) -> Result<String, AttemptError> {
        let response = self
            .client
            .get(url)
            .timeout(self.options.timeout)
            .send()
            .await
            .map_err(|err| classify_transport(url, err))?;

        let status = response.status();
        if status.is_success() {
            return response
                .text()
                .await
                .map_err(|err| classify_transport(url, err));
        }

        if is_retryable_status(status) {
            return Err(AttemptError::Retryable {
                status: Some(status.as_u16()),
                message: format!("HTTP {status}"),
            });
        }

        Err(AttemptError::Terminal(FetchError::TerminalStatus {
            url: url.to_string(),
            status: status.as_u16(),
        }))
    }
}

/// Delay slept after failed attempt `attempt` (0-indexed):
/// `base * 2^attempt * U(0.8, 1.2)`.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let jitter = rand::rng().random_range(JITTER_LOW..=JITTER_HIGH);
    backoff_delay_with_jitter(base, attempt, jitter)
}

pub fn backoff_delay_with_jitter(base: Duration, attempt: u32, jitter: f64) -> Duration {
    let jitter = jitter.clamp(JITTER_LOW, JITTER_HIGH);
    let factor = 2f64.powi(attempt.min(MAX_BACKOFF_EXPONENT) as i32);
    base.mul_f64(factor * jitter)
}

pub fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn classify_transport(url: &str, err: reqwest::Error) -> AttemptError {
    if is_transient_transport(&err) {
        return AttemptError::Retryable {
            status: None,
            message: err.to_string(),
        };
    }
    AttemptError::Terminal(FetchError::Request {
        url: url.to_string(),
        source: err,
    })
}

// Timeouts, connect failures (DNS resolution included) and resets retry.
fn is_transient_transport(err: &reqwest::Error) -> bool {
    if err.is_timeout() || err.is_connect() {
        return true;
    }

    let mut source = std::error::Error::source(err);
    while let Some(inner) = source {
        if let Some(io) = inner.downcast_ref::<std::io::Error>()
            && matches!(
                io.kind(),
                IoErrorKind::ConnectionReset
                    | IoErrorKind::ConnectionAborted
                    | IoErrorKind::BrokenPipe
                    | IoErrorKind::TimedOut
            )
        {
            return true;
        }
        source = inner.source();
    }
    false
}

fn build_headers(overrides: &BTreeMap<String, String>) -> Result<HeaderMap, FetchError> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));
    headers.insert(ACCEPT, HeaderValue::from_static(DEFAULT_ACCEPT));

    for (k, v) in overrides {
        let name =
            HeaderName::from_bytes(k.as_bytes()).map_err(|err| FetchError::InvalidHeader {
                name: k.clone(),
                message: err.to_string(),
            })?;
        let value = HeaderValue::from_str(v).map_err(|err| FetchError::InvalidHeader {
            name: k.clone(),
            message: err.to_string(),
        })?;
        headers.insert(name, value);
    }

    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_stays_within_jitter_bounds() {
        let base = Duration::from_millis(500);
        for attempt in 0..6 {
            let nominal = 500.0 * 2f64.powi(attempt as i32);
            for _ in 0..200 {
                let ms = backoff_delay(base, attempt).as_secs_f64() * 1000.0;
                assert!(ms >= nominal * 0.8 - 1e-3, "attempt {attempt}: {ms} too small");
                assert!(ms <= nominal * 1.2 + 1e-3, "attempt {attempt}: {ms} too large");
            }
        }
    }

    #[test]
    fn backoff_jitter_extremes() {
        let base = Duration::from_millis(100);
        let ms = |d: Duration| d.as_secs_f64() * 1000.0;
        assert!((ms(backoff_delay_with_jitter(base, 2, 0.8)) - 320.0).abs() < 0.01);
        assert!((ms(backoff_delay_with_jitter(base, 2, 1.2)) - 480.0).abs() < 0.01);
        assert!((ms(backoff_delay_with_jitter(base, 0, 5.0)) - 120.0).abs() < 0.01);
    }

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable_status(StatusCode::BAD_GATEWAY));
        assert!(is_retryable_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!is_retryable_status(StatusCode::NOT_FOUND));
        assert!(!is_retryable_status(StatusCode::FORBIDDEN));
    }

    #[test]
    fn header_overrides_replace_defaults() {
        let mut overrides = BTreeMap::new();
        overrides.insert("user-agent".to_string(), "custom/2.0".to_string());
        overrides.insert("X-Plan".to_string(), "ot".to_string());

        let headers = build_headers(&overrides).expect("headers must build");
        assert_eq!(headers.get(USER_AGENT).unwrap(), "custom/2.0");
        assert_eq!(headers.get(ACCEPT).unwrap(), DEFAULT_ACCEPT);
        assert_eq!(headers.get("x-plan").unwrap(), "ot");
    }

    #[test]
    fn invalid_header_name_is_rejected() {
        let mut overrides = BTreeMap::new();
        overrides.insert("bad header".to_string(), "x".to_string());
        assert!(matches!(
            build_headers(&overrides),
            Err(FetchError::InvalidHeader { .. })
        ));
    }
}
