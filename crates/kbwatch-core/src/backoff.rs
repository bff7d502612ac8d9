//! Generic retry policy: fault classification and exponential backoff.
//!
//! This governs low-level transient faults (navigation timeouts, dropped
//! connections). Row remediation has its own bounded state machine in
//! [`crate::retry_engine`].

use std::fmt;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Upper bound for any single backoff delay.
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Classification of an operation fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    // Permanent
    AuthenticationFailed,
    PermissionDenied,
    NotFound,
    InvalidInput,

    // Transient
    NetworkTimeout,
    RateLimited,
    ServerError,
    TransportCrashed,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::AuthenticationFailed => "authentication_failed",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::NotFound => "not_found",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::NetworkTimeout => "network_timeout",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::ServerError => "server_error",
            ErrorKind::TransportCrashed => "transport_crashed",
            ErrorKind::Unknown => "unknown",
        }
    }

    /// Retrying cannot change the outcome of a permanent fault.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            ErrorKind::AuthenticationFailed
                | ErrorKind::PermissionDenied
                | ErrorKind::NotFound
                | ErrorKind::InvalidInput
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Keywords that mark a fault as permanent. Checked first.
const PERMANENT_PATTERNS: &[(&str, ErrorKind)] = &[
    ("authentication", ErrorKind::AuthenticationFailed),
    ("auth", ErrorKind::AuthenticationFailed),
    ("401", ErrorKind::AuthenticationFailed),
    ("permission", ErrorKind::PermissionDenied),
    ("forbidden", ErrorKind::PermissionDenied),
    ("403", ErrorKind::PermissionDenied),
    ("not found", ErrorKind::NotFound),
    ("404", ErrorKind::NotFound),
    ("invalid", ErrorKind::InvalidInput),
];

/// Keywords that mark a fault as transient.
const TRANSIENT_PATTERNS: &[(&str, ErrorKind)] = &[
    ("timeout", ErrorKind::NetworkTimeout),
    ("timed out", ErrorKind::NetworkTimeout),
    ("rate limit", ErrorKind::RateLimited),
    ("429", ErrorKind::RateLimited),
    ("500", ErrorKind::ServerError),
    ("502", ErrorKind::ServerError),
    ("503", ErrorKind::ServerError),
    ("504", ErrorKind::ServerError),
    ("connection", ErrorKind::NetworkTimeout),
    ("network", ErrorKind::NetworkTimeout),
    ("target closed", ErrorKind::TransportCrashed),
    ("channel closed", ErrorKind::TransportCrashed),
    ("receiver is gone", ErrorKind::TransportCrashed),
    ("websocket", ErrorKind::TransportCrashed),
    ("chromium", ErrorKind::TransportCrashed),
    ("browser", ErrorKind::TransportCrashed),
];

/// Classify a fault from its type name and message.
///
/// Both inputs are lowercased; the first keyword found in either wins.
pub fn classify_message(type_name: &str, message: &str) -> ErrorKind {
    let message = message.to_lowercase();
    let type_name = type_name
        .rsplit("::")
        .next()
        .unwrap_or(type_name)
        .to_lowercase();

    PERMANENT_PATTERNS
        .iter()
        .chain(TRANSIENT_PATTERNS.iter())
        .find(|(pattern, _)| message.contains(pattern) || type_name.contains(pattern))
        .map(|(_, kind)| *kind)
        .unwrap_or(ErrorKind::Unknown)
}

/// Errors that can be sorted into an [`ErrorKind`].
///
/// The default matches the type name and the whole `Display` text. Faults
/// whose message embeds arbitrary data (URLs, ids) override it to classify
/// only the descriptive part.
pub trait Classify: std::error::Error {
    fn error_kind(&self) -> ErrorKind
    where
        Self: Sized,
    {
        classify_message(std::any::type_name::<Self>(), &self.to_string())
    }
}

/// Classify any error value.
pub fn classify<E: Classify>(fault: &E) -> ErrorKind {
    fault.error_kind()
}

/// Future returned by an operation retried under a [`BackoffPolicy`].
pub type OpFuture<'a, T, E> = BoxFuture<'a, Result<T, E>>;

/// What happened while retrying an operation.
#[derive(Debug)]
pub struct Retried<T, E> {
    pub outcome: Result<T, E>,

    /// Total executions, including the first.
    pub attempts: u32,

    /// Delays slept between executions, in order.
    pub delays: Vec<Duration>,

    /// Classification of the last fault, if the operation ended in one.
    pub last_kind: Option<ErrorKind>,
}

/// Exponential backoff policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Retries allowed after the first execution.
    pub max_attempts: u32,
    pub backoff_base: f64,
    pub initial_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: 2.0,
            initial_delay: Duration::from_secs(1),
        }
    }
}

impl BackoffPolicy {
    /// Whether a fault seen after `attempt` retries warrants another one.
    pub fn should_retry<E: Classify>(&self, fault: &E, attempt: u32) -> bool {
        self.should_retry_kind(classify(fault), attempt)
    }

    pub fn should_retry_kind(&self, kind: ErrorKind, attempt: u32) -> bool {
        if attempt >= self.max_attempts {
            warn!(max_attempts = self.max_attempts, "max retry attempts reached");
            return false;
        }
        if kind.is_permanent() {
            info!(kind = %kind, "permanent error, not retrying");
            return false;
        }
        debug!(kind = %kind, "transient error, will retry");
        true
    }

    /// `initial_delay * backoff_base^(attempt - 1)`, capped at [`MAX_BACKOFF`].
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.max(1).saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_base.powi(exponent);
        if !secs.is_finite() || secs >= MAX_BACKOFF.as_secs_f64() {
            return MAX_BACKOFF;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }

    /// Run `op` against `target`, retrying transient faults with backoff.
    ///
    /// `target` is handed to each execution by mutable reborrow, so the
    /// operation may drive a browser session without holding it across
    /// retries.
    pub async fn retry_with_backoff<S, T, E, F>(
        &self,
        operation: &str,
        target: &mut S,
        mut op: F,
    ) -> Retried<T, E>
    where
        S: ?Sized + Send,
        E: Classify,
        F: for<'a> FnMut(&'a mut S) -> OpFuture<'a, T, E>,
    {
        let mut delays = Vec::new();
        let mut retries = 0u32;

        loop {
            let attempts = retries + 1;
            match op(&mut *target).await {
                Ok(value) => {
                    if retries > 0 {
                        info!(operation, attempts, "operation succeeded after retry");
                    }
                    return Retried {
                        outcome: Ok(value),
                        attempts,
                        delays,
                        last_kind: None,
                    };
                }
                Err(fault) => {
                    let kind = classify(&fault);
                    warn!(operation, attempt = attempts, kind = %kind, error = %fault, "attempt failed");

                    if !self.should_retry_kind(kind, retries) {
                        return Retried {
                            outcome: Err(fault),
                            attempts,
                            delays,
                            last_kind: Some(kind),
                        };
                    }

                    retries += 1;
                    let delay = self.backoff_delay(retries);
                    debug!(operation, delay_ms = delay.as_millis() as u64, "waiting before retry");
                    delays.push(delay);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
