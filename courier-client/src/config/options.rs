//! Call options for per-request configuration.
//!
//! This module provides [`CallOptions`] for configuring individual RPC calls
//! with deadlines, cancellation and custom headers.

use http::{HeaderMap, HeaderName, HeaderValue};
use std::time::Duration;

use crate::cancel::CancellationToken;

/// Options for configuring individual RPC calls.
///
/// # Example
///
/// ```
/// use courier_client::{CallOptions, CancellationToken};
/// use std::time::Duration;
///
/// let token = CancellationToken::new();
/// let options = CallOptions::new()
///     .deadline(Duration::from_secs(2))
///     .cancellation(token.clone())
///     .header("authorization", "Bearer token123");
///
/// assert_eq!(options.get_deadline(), Some(Duration::from_secs(2)));
/// ```
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Deadline for this call. Overrides the channel default.
    pub(crate) deadline: Option<Duration>,
    /// External cancellation signal.
    pub(crate) cancellation: Option<CancellationToken>,
    /// Custom headers for this call.
    pub(crate) headers: HeaderMap,
    /// First header that failed to parse; the call is rejected with it.
    pub(crate) invalid_header: Option<String>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the deadline for this call, relative to when the call starts.
    ///
    /// The deadline is enforced locally and sent to the server as
    /// `grpc-timeout`.
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn get_deadline(&self) -> Option<Duration> {
        self.deadline
    }

    /// Attach a cancellation token. Cancelling it aborts the call.
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn get_cancellation(&self) -> Option<&CancellationToken> {
        self.cancellation.as_ref()
    }

    /// Add a custom header for this call.
    ///
    /// Reserved headers (`grpc-*`, `content-type`, `x-grpc-web`, `te`) are
    /// ignored when the request is built. An invalid name or value makes the
    /// call fail with [`ClientError::InvalidState`](crate::ClientError::InvalidState).
    pub fn header<K, V>(mut self, name: K, value: V) -> Self
    where
        K: TryInto<HeaderName>,
        K::Error: std::fmt::Display,
        V: TryInto<HeaderValue>,
        V::Error: std::fmt::Display,
    {
        match (name.try_into(), value.try_into()) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            (Err(e), _) => {
                self.invalid_header.get_or_insert(format!("invalid header name: {e}"));
            }
            (_, Err(e)) => {
                self.invalid_header.get_or_insert(format!("invalid header value: {e}"));
            }
        }
        self
    }

    /// Try to add a custom header for this call.
    ///
    /// Returns `None` if the header name or value is invalid.
    pub fn try_header<K, V>(mut self, name: K, value: V) -> Option<Self>
    where
        K: TryInto<HeaderName>,
        V: TryInto<HeaderValue>,
    {
        let name = name.try_into().ok()?;
        let value = value.try_into().ok()?;
        self.headers.insert(name, value);
        Some(self)
    }

    /// Set all custom headers for this call, replacing any existing headers.
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn get_headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }
}

/// Largest value the `grpc-timeout` header can carry (8 digits).
const MAX_TIMEOUT_VALUE: u128 = 99_999_999;

/// Convert a Duration to a `grpc-timeout` header value.
///
/// Picks the finest unit whose value fits in 8 digits, rounding up. Returns
/// `None` for zero or for durations too large for any unit.
pub(crate) fn duration_to_grpc_timeout(duration: Duration) -> Option<String> {
    const UNITS: [(char, u128); 6] = [
        ('n', 1),
        ('u', 1_000),
        ('m', 1_000_000),
        ('S', 1_000_000_000),
        ('M', 60 * 1_000_000_000),
        ('H', 60 * 60 * 1_000_000_000),
    ];

    let nanos = duration.as_nanos();
    if nanos == 0 {
        return None;
    }
    UNITS.iter().find_map(|&(unit, divisor)| {
        let value = nanos.div_ceil(divisor);
        (value <= MAX_TIMEOUT_VALUE).then(|| format!("{value}{unit}"))
    })
}

/// Headers the runtime owns; per-call headers cannot override them.
pub(crate) fn is_reserved_header(name: &HeaderName) -> bool {
    let name = name.as_str();
    name.starts_with("grpc-") || matches!(name, "content-type" | "x-grpc-web" | "te")
}
