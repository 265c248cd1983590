//! Retry controller for agent invocations.
//!
//! Each attempt ends in success, a transient failure, or a fatal failure.
//! Transient failures are retried after an exponentially growing delay until
//! the attempt budget runs out; the last transient failure is then reported
//! as [`RetryFailure::Exhausted`]. Fatal failures propagate immediately.

use regex::Regex;
use std::fmt;
use std::future::Future;
use std::sync::OnceLock;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Transient(String),
    Fatal(String),
}

impl Classification {
    pub fn is_transient(&self) -> bool {
        matches!(self, Classification::Transient(_))
    }

    pub fn reason(&self) -> &str {
        match self {
            Classification::Transient(r) | Classification::Fatal(r) => r,
        }
    }
}

/// Errors that know whether another attempt could succeed.
pub trait Classify {
    fn classify(&self) -> Classification;
}

static CREDENTIALS_RE: OnceLock<Regex> = OnceLock::new();
static RATE_LIMIT_RE: OnceLock<Regex> = OnceLock::new();
static NETWORK_RE: OnceLock<Regex> = OnceLock::new();
static SERVER_RE: OnceLock<Regex> = OnceLock::new();

fn credentials_re() -> &'static Regex {
    CREDENTIALS_RE.get_or_init(|| {
        Regex::new(r"(?i)invalid api key|authentication|unauthorized|not logged in|credit balance|\b401\b|\b403\b").unwrap()
    })
}

fn rate_limit_re() -> &'static Regex {
    RATE_LIMIT_RE
        .get_or_init(|| Regex::new(r"(?i)rate.?limit|too many requests|overloaded|\b429\b|\b529\b").unwrap())
}

fn network_re() -> &'static Regex {
    NETWORK_RE.get_or_init(|| {
        Regex::new(r"(?i)timed out|timeout|connection (reset|refused|closed)|econnreset|etimedout|network").unwrap()
    })
}

fn server_re() -> &'static Regex {
    SERVER_RE.get_or_init(|| {
        Regex::new(r"(?i)internal server error|bad gateway|service unavailable|\b50[0234]\b").unwrap()
    })
}

/// Classify free-form failure text (stderr, result error messages).
///
/// Credential problems win over everything else; rate limits, network
/// trouble and 5xx responses are transient; anything unrecognised is fatal.
pub fn classify_text(text: &str) -> Classification {
    if credentials_re().is_match(text) {
        return Classification::Fatal("missing or invalid credentials".to_string());
    }
    if rate_limit_re().is_match(text) {
        return Classification::Transient("rate limited".to_string());
    }
    if network_re().is_match(text) {
        return Classification::Transient("network error".to_string());
    }
    if server_re().is_match(text) {
        return Classification::Transient("server error".to_string());
    }
    Classification::Fatal("non-retryable error".to_string())
}

// ---------------------------------------------------------------------------
// Policy and decision
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt `attempt` (1-indexed).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(30) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exp);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    FailPermanently,
}

/// Pure decision for a failed attempt.
pub fn decide(classification: &Classification, attempt: u32, policy: &RetryPolicy) -> RetryDecision {
    match classification {
        Classification::Fatal(_) => RetryDecision::FailPermanently,
        Classification::Transient(_) if attempt >= policy.max_attempts => {
            RetryDecision::FailPermanently
        }
        Classification::Transient(_) => RetryDecision::RetryAfter(policy.delay_for(attempt)),
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Retried<T> {
    pub value: T,
    pub attempts: u32,
}

#[derive(Debug)]
pub enum RetryFailure<E> {
    /// A non-retryable error; no further attempts were made.
    Fatal { error: E, attempts: u32 },
    /// Every attempt failed transiently.
    Exhausted { error: E, attempts: u32 },
}

impl<E> RetryFailure<E> {
    pub fn error(&self) -> &E {
        match self {
            RetryFailure::Fatal { error, .. } | RetryFailure::Exhausted { error, .. } => error,
        }
    }

    pub fn into_error(self) -> E {
        match self {
            RetryFailure::Fatal { error, .. } | RetryFailure::Exhausted { error, .. } => error,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            RetryFailure::Fatal { attempts, .. } | RetryFailure::Exhausted { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, RetryFailure::Exhausted { .. })
    }
}

impl<E: fmt::Display> fmt::Display for RetryFailure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryFailure::Fatal { error, .. } => write!(f, "{error}"),
            RetryFailure::Exhausted { error, attempts } => {
                write!(f, "gave up after {attempts} attempt(s): {error}")
            }
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for RetryFailure<E> {}

/// Run `op` until it succeeds, fails fatally, or the attempt budget is spent.
///
/// `op` receives the 1-indexed attempt number. It is never called more than
/// `policy.max_attempts` times (at least once).
pub async fn run_with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    mut op: F,
) -> Result<Retried<T>, RetryFailure<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Classify + fmt::Display,
{
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => {
                return Ok(Retried {
                    value,
                    attempts: attempt,
                })
            }
            Err(error) => {
                let classification = error.classify();
                match decide(&classification, attempt, policy) {
                    RetryDecision::RetryAfter(delay) => {
                        tracing::warn!(
                            attempt,
                            max_attempts = policy.max_attempts,
                            reason = classification.reason(),
                            delay_ms = delay.as_millis() as u64,
                            %error,
                            "transient failure, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    RetryDecision::FailPermanently if classification.is_transient() => {
                        return Err(RetryFailure::Exhausted {
                            error,
                            attempts: attempt,
                        })
                    }
                    RetryDecision::FailPermanently => {
                        return Err(RetryFailure::Fatal {
                            error,
                            attempts: attempt,
                        })
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
